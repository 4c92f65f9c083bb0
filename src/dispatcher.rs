//! Packet dispatch: decode, latch session ids, run any internal
//! handler, then route by job id or fall through to a generic event.
//!
//! Internal handlers run first regardless of whether the frame also carries
//! a job id: handshake and logon-lifecycle messages are never job replies in
//! practice, and letting a job-registry match pre-empt them would leave the
//! protocol state machine stuck (open question, resolved in DESIGN.md).

use tokio::sync::mpsc;

use crate::endpoint::ServerDirectory;
use crate::error::Result;
use crate::events::ClientEvent;
use crate::handlers;
use crate::header::{self, EMsg, Header, SessionIds, NO_JOB};
use crate::job_registry::JobRegistry;
use crate::session_state::SessionState;
use crate::transport::Transport;
use rsa::RsaPublicKey;

/// Lets the receiver of a `Message` event answer the job that produced it.
/// Built from the dispatching connection's own transport handle and session
/// ids, so a reply always targets the job that carried `source_job`.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    transport: Transport,
    ids: SessionIds,
    target_job: u64,
}

impl ReplyHandle {
    /// Sends `body` back as `msg`, stamping `target_job` with the job id
    /// that was latched from the inbound message.
    pub fn reply(&self, msg: EMsg, proto: bool, body: Vec<u8>) -> Result<()> {
        let header = header::build_header(msg, proto, self.ids, NO_JOB, self.target_job);
        let mut frame = header::encode(&header);
        frame.extend_from_slice(&body);
        self.transport.send(frame)
    }
}

/// Everything a dispatch pass needs to mutate or call out to. Borrowed for
/// the duration of a single `dispatch` call from the session task.
pub struct DispatchContext<'a> {
    pub session: &'a mut SessionState,
    pub jobs: &'a mut JobRegistry,
    pub transport: &'a Transport,
    pub events: &'a mpsc::UnboundedSender<ClientEvent>,
    pub directory: &'a ServerDirectory,
}

/// Latches session/steam ids from a `Proto` header only, and only while no
/// session id has been established yet: a single `session_id == 0` check
/// gates both fields together, so a later frame with a different non-zero
/// `client_sessionid` never overwrites what was already latched.
fn latch_ids(session: &mut SessionState, header: &Header) {
    if let Header::Proto { proto, .. } = header {
        if session.session_id() == 0 && proto.client_sessionid != 0 {
            session.latch_steam_id(proto.steamid);
            session.latch_session_id(proto.client_sessionid);
        }
    }
}

/// Routes a decoded application message once no internal handler claimed
/// it: a matching pending job callback wins over the generic `Message`
/// event.
fn route_or_emit(ctx: &mut DispatchContext<'_>, header: Header, body: Vec<u8>) {
    let source_job = header.source_job();
    if source_job != NO_JOB {
        if let Some(callback) = ctx.jobs.take(source_job) {
            callback(Ok(body));
            return;
        }
    }
    let reply = if source_job != NO_JOB {
        Some(ReplyHandle {
            transport: ctx.transport.clone(),
            ids: ctx.session.ids(),
            target_job: source_job,
        })
    } else {
        None
    };
    let _ = ctx.events.send(ClientEvent::Message(header, body, reply));
}

/// Decodes and dispatches one plaintext frame. `universe_key` is needed only
/// for the handshake path; every other message type ignores it.
pub fn dispatch(ctx: &mut DispatchContext<'_>, raw: &[u8], universe_key: &RsaPublicKey) -> Result<()> {
    let (header, body) = header::decode(raw)?;
    latch_ids(ctx.session, &header);

    match header.msg() {
        EMsg::CHANNEL_ENCRYPT_REQUEST => {
            handlers::handle_channel_encrypt_request(ctx, body, universe_key)
        }
        EMsg::CHANNEL_ENCRYPT_RESULT => handlers::handle_channel_encrypt_result(ctx, body),
        EMsg::MULTI => crate::multi::handle_multi(ctx, body, universe_key),
        EMsg::CLIENT_LOG_ON_RESPONSE => handlers::handle_log_on_response(ctx, body),
        EMsg::CLIENT_LOGGED_OFF => handlers::handle_logged_off(ctx, body),
        EMsg::CLIENT_CM_LIST => handlers::handle_cm_list(ctx, body),
        EMsg::CLIENT_HEARTBEAT => handlers::handle_heartbeat(ctx),
        _ => {
            route_or_emit(ctx, header, body.to_vec());
            Ok(())
        }
    }
}
