//! Public client API and the session task that backs it.
//!
//! All mutable protocol state (session ids, the job registry, the current
//! transport, reconnect backoff) lives inside a single task reached only
//! through an mpsc command channel. `CmClient` itself is a thin, cheaply
//! cloneable handle.

use rsa::RsaPublicKey;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::{self, DispatchContext};
use crate::endpoint::{Endpoint, ServerDirectory, TransportConfig};
use crate::error::{CmError, Result};
use crate::events::ClientEvent;
use crate::header::{self, EMsg, NO_JOB};
use crate::job_registry::{JobCallback, JobRegistry};
use crate::reconnect::ReconnectPolicy;
use crate::schema::CMsgClientHeartbeat;
use crate::session_state::{ConnPhase, SessionState};
use crate::transport::{Transport, TransportEvent};

enum ClientCommand {
    Bind {
        local_addr: Option<String>,
        local_port: Option<u16>,
    },
    Connect,
    Disconnect,
    SetServers(Vec<Endpoint>),
    Send {
        msg: EMsg,
        proto: bool,
        body: Vec<u8>,
        callback: Option<JobCallback>,
    },
}

/// Handle to a running CM session. Cheap to clone; every clone talks to the
/// same background task.
#[derive(Clone)]
pub struct CmClient {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl CmClient {
    /// Spawns the session task and returns a handle plus the event stream.
    /// `universe_key` is the vendor's published handshake key; integrators
    /// supply it rather than the client embedding one (see DESIGN.md).
    pub fn new(config: ClientConfig, universe_key: RsaPublicKey) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = Session {
            reconnect: ReconnectPolicy::new(&config),
            config,
            universe_key,
            directory: ServerDirectory::new(),
            session_state: SessionState::new(),
            jobs: JobRegistry::new(),
            events_tx,
            transport: None,
            transport_events_rx: None,
            local_addr: None,
            local_port: None,
            want_connected: false,
            next_heartbeat: None,
        };
        tokio::spawn(session.run(cmd_rx));

        (Self { cmd_tx }, events_rx)
    }

    /// Records the local address/port to bind future connect attempts to.
    /// Takes effect on the next `connect`, not retroactively.
    pub fn bind(&self, local_addr: impl Into<String>, local_port: u16) -> Result<()> {
        self.send_command(ClientCommand::Bind {
            local_addr: Some(local_addr.into()),
            local_port: Some(local_port),
        })
    }

    /// Starts (or restarts) the connect/reconnect cycle.
    pub fn connect(&self) -> Result<()> {
        self.send_command(ClientCommand::Connect)
    }

    /// Tears down the current connection and stops retrying until
    /// `connect` is called again.
    pub fn disconnect(&self) -> Result<()> {
        self.send_command(ClientCommand::Disconnect)
    }

    /// Replaces the server directory's endpoint list, e.g. from a
    /// persisted `ClientCMList` or an external discovery step. Takes effect
    /// for the next connect attempt this selects an endpoint for.
    pub fn set_servers(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.send_command(ClientCommand::SetServers(endpoints))
    }

    /// Sends a fire-and-forget message; no job id is allocated.
    pub fn send(&self, msg: EMsg, proto: bool, body: Vec<u8>) -> Result<()> {
        self.send_command(ClientCommand::Send {
            msg,
            proto,
            body,
            callback: None,
        })
    }

    /// Sends a message and resolves once its reply is dispatched, or with
    /// `CmError::Disconnected` if the connection drops first (only when
    /// `reject_pending_on_disconnect` is enabled; otherwise this future
    /// never resolves for a dropped job, matching [`crate::job_registry`]).
    pub async fn send_with_reply(&self, msg: EMsg, proto: bool, body: Vec<u8>) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let callback: JobCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        self.send_command(ClientCommand::Send {
            msg,
            proto,
            body,
            callback: Some(callback),
        })?;
        rx.await.map_err(|_| CmError::Disconnected)?
    }

    fn send_command(&self, cmd: ClientCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| CmError::Disconnected)
    }
}

struct Session {
    config: ClientConfig,
    universe_key: RsaPublicKey,
    directory: ServerDirectory,
    session_state: SessionState,
    jobs: JobRegistry,
    reconnect: ReconnectPolicy,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    transport: Option<Transport>,
    transport_events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    local_addr: Option<String>,
    local_port: Option<u16>,
    want_connected: bool,
    next_heartbeat: Option<Instant>,
}

async fn next_transport_event(rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    match rx {
        Some(r) => match r.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

impl Session {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>) {
        let mut reconnect_at: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut reconnect_at),
                        None => break,
                    }
                }
                event = next_transport_event(&mut self.transport_events_rx) => {
                    self.handle_transport_event(event, &mut reconnect_at);
                }
                _ = sleep_until(self.next_heartbeat) => {
                    self.send_heartbeat();
                }
                _ = sleep_until(reconnect_at) => {
                    reconnect_at = None;
                    self.attempt_connect();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: ClientCommand, reconnect_at: &mut Option<Instant>) {
        match cmd {
            ClientCommand::Bind { local_addr, local_port } => {
                self.local_addr = local_addr;
                self.local_port = local_port;
            }
            ClientCommand::Connect => {
                self.want_connected = true;
                *reconnect_at = None;
                self.attempt_connect();
            }
            ClientCommand::Disconnect => {
                self.want_connected = false;
                *reconnect_at = None;
                self.next_heartbeat = None;
                if let Some(transport) = self.transport.take() {
                    transport.destroy();
                }
                self.transport_events_rx = None;
                self.session_state.phase = ConnPhase::Idle;
                self.session_state.clear_logged_on();
                self.drop_pending_jobs();
            }
            ClientCommand::SetServers(endpoints) => {
                self.directory.update(endpoints);
            }
            ClientCommand::Send { msg, proto, body, callback } => {
                self.do_send(msg, proto, body, callback);
            }
        }
    }

    fn attempt_connect(&mut self) {
        let Some(endpoint) = self.directory.random() else {
            let _ = self.events_tx.send(ClientEvent::Error(CmError::CannotConnect));
            return;
        };
        self.reconnect.remember_server(endpoint.clone());

        // Every connect attempt starts a fresh job counter and session scope:
        // job ids and latched ids from a previous connection never leak into
        // the next one.
        self.drop_pending_jobs();
        self.jobs = JobRegistry::new();
        self.session_state.begin_new_connection();
        self.next_heartbeat = None;

        let transport_config = TransportConfig {
            remote: endpoint,
            local_addr: self.local_addr.clone(),
            local_port: self.local_port,
            connect_timeout: self.config.connect_timeout,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Transport::connect(transport_config, events_tx);
        let _ = transport.set_timeout(self.config.idle_timeout);
        self.transport = Some(transport);
        self.transport_events_rx = Some(events_rx);
    }

    fn handle_transport_event(&mut self, event: TransportEvent, reconnect_at: &mut Option<Instant>) {
        match event {
            TransportEvent::Connect => {
                self.reconnect.reset();
                info!("connected to {:?}", self.reconnect.last_server);
            }
            TransportEvent::Packet(bytes) => self.handle_packet(&bytes),
            TransportEvent::Error(e) => {
                warn!(error = %e, "transport error");
                let _ = self.events_tx.send(ClientEvent::Error(e));
            }
            TransportEvent::Close { had_error } => self.handle_close(had_error, reconnect_at),
        }
    }

    fn handle_packet(&mut self, bytes: &[u8]) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let mut ctx = DispatchContext {
            session: &mut self.session_state,
            jobs: &mut self.jobs,
            transport,
            events: &self.events_tx,
            directory: &self.directory,
        };
        if let Err(e) = dispatcher::dispatch(&mut ctx, bytes, &self.universe_key) {
            let fatal = matches!(e, CmError::EncryptionFailed(_) | CmError::Protocol(_));
            let _ = self.events_tx.send(ClientEvent::Error(e));
            if fatal {
                if let Some(transport) = self.transport.take() {
                    transport.destroy();
                }
            }
        }
        self.sync_heartbeat_schedule();
    }

    /// Arms `next_heartbeat` the moment logon succeeds, and disarms it once
    /// logon is cleared (on logoff or disconnect).
    fn sync_heartbeat_schedule(&mut self) {
        if !self.session_state.logged_on() {
            self.next_heartbeat = None;
            return;
        }
        if self.next_heartbeat.is_none() {
            if let Some(interval) = self.session_state.heartbeat_interval() {
                self.next_heartbeat = Some(Instant::now() + interval);
            }
        }
    }

    fn handle_close(&mut self, had_error: bool, reconnect_at: &mut Option<Instant>) {
        self.transport = None;
        self.transport_events_rx = None;
        let was_ready = self.session_state.phase == ConnPhase::Ready;
        self.session_state.phase = ConnPhase::Idle;
        self.session_state.clear_logged_on();
        self.next_heartbeat = None;
        self.drop_pending_jobs();

        if was_ready || had_error {
            let _ = self.events_tx.send(ClientEvent::Error(CmError::Disconnected));
        }

        if !self.want_connected {
            return;
        }

        if self.reconnect.auto_retry() {
            self.session_state.phase = ConnPhase::ScheduledRetry;
            let delay = self.reconnect.next_delay();
            *reconnect_at = Some(Instant::now() + delay);
        } else if !was_ready {
            let _ = self.events_tx.send(ClientEvent::Error(CmError::CannotConnect));
            self.want_connected = false;
        }
    }

    fn drop_pending_jobs(&mut self) {
        if self.config.reject_pending_on_disconnect {
            self.jobs.reject_all();
        } else {
            self.jobs.clear();
        }
    }

    fn do_send(&mut self, msg: EMsg, proto: bool, body: Vec<u8>, callback: Option<JobCallback>) {
        let Some(transport) = self.transport.as_ref() else {
            if let Some(cb) = callback {
                cb(Err(CmError::Disconnected));
            }
            return;
        };

        let source_job = match callback {
            Some(cb) => self.jobs.alloc(cb),
            None => NO_JOB,
        };

        let header = header::build_header(msg, proto, self.session_state.ids(), source_job, NO_JOB);
        let mut frame = header::encode(&header);
        frame.extend_from_slice(&body);

        if let Err(e) = transport.send(frame) {
            let _ = self.events_tx.send(ClientEvent::Error(e));
        }
    }

    fn send_heartbeat(&mut self) {
        use prost::Message;
        let Some(interval) = self.session_state.heartbeat_interval() else {
            self.next_heartbeat = None;
            return;
        };
        let body = CMsgClientHeartbeat {}.encode_to_vec();
        self.do_send(EMsg::CLIENT_HEARTBEAT, true, body, None);
        self.next_heartbeat = Some(Instant::now() + interval);
    }
}
