//! Transport: VT01 framing over TCP, plus the optional symmetric encryption
//! layer toggled on once the handshake completes.
//!
//! Lifecycle is event-driven rather than pull-based: a background task owns
//! the socket and reports `connect`/`packet`/`error`/`close` events over an
//! unbounded channel.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, warn};

use crate::crypto;
use crate::endpoint::TransportConfig;
use crate::error::CmError;

const MAGIC: &[u8; 4] = b"VT01";
const HEADER_LEN: usize = 8;

/// Events a connection reports as it progresses through its lifecycle.
#[derive(Debug)]
pub enum TransportEvent {
    Connect,
    Packet(Vec<u8>),
    Error(CmError),
    Close { had_error: bool },
}

enum TransportCommand {
    Send(Vec<u8>),
    /// Arms encryption for every frame sent or received *after* this command
    /// is processed. Routed through the same ordered channel as `Send` so a
    /// plaintext handshake response queued just before it can never race
    /// with the switch-over and go out encrypted.
    EnableEncryption([u8; 32]),
    /// Arms (or disarms, with a zero duration) the idle-read timer.
    SetTimeout(Duration),
    Destroy,
}

/// Frame codec: `u32 LE length` + `b"VT01"` + `length` bytes of payload.
struct Vt01Codec;

impl Decoder for Vt01Codec {
    type Item = BytesMut;
    type Error = CmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
        if &src[4..8] != MAGIC {
            return Err(CmError::Protocol("bad VT01 magic".into()));
        }
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Bytes> for Vt01Codec {
    type Error = CmError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + item.len());
        dst.extend_from_slice(&(item.len() as u32).to_le_bytes());
        dst.extend_from_slice(MAGIC);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Handle to a running connection. Cheap to clone; every clone talks to the
/// same background task. Dropping the last handle does not close the
/// socket; call [`Transport::destroy`] explicitly.
#[derive(Debug, Clone)]
pub struct Transport {
    cmd_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl Transport {
    /// Spawns the background task and immediately returns a handle; the
    /// `Connect`/`Error`/`Close` events arrive asynchronously on `events`.
    pub fn connect(config: TransportConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, cmd_rx, events));
        Self { cmd_tx }
    }

    /// Switches the connection into encrypted mode. Queued behind any
    /// frame already pending, so a plaintext handshake response sent just
    /// before this call is never retroactively encrypted.
    pub fn enable_encryption(&self, session_key: [u8; 32]) -> Result<(), CmError> {
        self.cmd_tx
            .send(TransportCommand::EnableEncryption(session_key))
            .map_err(|_| CmError::Disconnected)
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), CmError> {
        self.cmd_tx
            .send(TransportCommand::Send(payload))
            .map_err(|_| CmError::Disconnected)
    }

    /// Arms the idle-read timer: if no frame is read within `d`, the
    /// connection is torn down and reported as an error. `d == Duration::ZERO`
    /// disables the timer.
    pub fn set_timeout(&self, d: Duration) -> Result<(), CmError> {
        self.cmd_tx
            .send(TransportCommand::SetTimeout(d))
            .map_err(|_| CmError::Disconnected)
    }

    /// Tears the connection down. Idempotent.
    pub fn destroy(&self) {
        let _ = self.cmd_tx.send(TransportCommand::Destroy);
    }
}

async fn run(
    config: TransportConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match connect_stream(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(e));
            let _ = events.send(TransportEvent::Close { had_error: true });
            return;
        }
    };

    debug!(remote = %config.remote, "transport connected");
    let _ = events.send(TransportEvent::Connect);

    let mut framed = Framed::new(stream, Vt01Codec);
    let had_error = run_loop(&mut framed, &mut cmd_rx, &events).await;
    let _ = events.send(TransportEvent::Close { had_error });
}

async fn connect_stream(config: &TransportConfig) -> Result<TcpStream, CmError> {
    let addr = (config.remote.host.as_str(), config.remote.port);
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(CmError::Transport("connect timed out".into())),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

/// Drives the select loop until the socket closes, the peer sends EOF, or a
/// `Destroy` command arrives. Returns whether the loop ended due to an error.
async fn run_loop(
    framed: &mut Framed<TcpStream, Vt01Codec>,
    cmd_rx: &mut mpsc::UnboundedReceiver<TransportCommand>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> bool {
    let mut key: Option<[u8; 32]> = None;
    let mut idle_timeout: Option<Duration> = None;
    let mut idle_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(TransportCommand::Send(payload)) => {
                        let out = match &key {
                            Some(k) => crypto::encrypt(k, &payload),
                            None => payload,
                        };
                        if let Err(e) = framed.send(Bytes::from(out)).await {
                            warn!(error = %e, "transport send failed");
                            let _ = events.send(TransportEvent::Error(e));
                            return true;
                        }
                    }
                    Some(TransportCommand::EnableEncryption(session_key)) => {
                        key = Some(session_key);
                    }
                    Some(TransportCommand::SetTimeout(d)) => {
                        if d.is_zero() {
                            idle_timeout = None;
                            idle_deadline = None;
                        } else {
                            idle_timeout = Some(d);
                            idle_deadline = Some(Instant::now() + d);
                        }
                    }
                    Some(TransportCommand::Destroy) | None => return false,
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(bytes)) => {
                        if let Some(d) = idle_timeout {
                            idle_deadline = Some(Instant::now() + d);
                        }
                        let decrypted = key.as_ref().map(|k| crypto::decrypt(k, &bytes));
                        match decrypted {
                            Some(Err(e)) => {
                                let _ = events.send(TransportEvent::Error(e));
                                return true;
                            }
                            Some(Ok(payload)) => {
                                let _ = events.send(TransportEvent::Packet(payload));
                            }
                            None => {
                                let _ = events.send(TransportEvent::Packet(bytes.to_vec()));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e));
                        return true;
                    }
                    None => return false,
                }
            }
            _ = sleep_until_opt(idle_deadline) => {
                let _ = events.send(TransportEvent::Error(CmError::Transport(
                    "idle timeout: no frame read within the configured window".into(),
                )));
                return true;
            }
        }
    }
}
