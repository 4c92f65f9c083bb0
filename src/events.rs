//! Public event stream emitted by [`crate::client::CmClient`].

use crate::dispatcher::ReplyHandle;
use crate::endpoint::Endpoint;
use crate::error::CmError;
use crate::header::Header;
use crate::schema::{CMsgClientLogOnResponse, CMsgClientLoggedOff};

/// Something callers may want to react to. Delivered in arrival order on a
/// single channel so relative ordering between a `Message` and the
/// `LoggedOff` that follows it is never ambiguous.
#[derive(Debug)]
pub enum ClientEvent {
    /// Low-severity diagnostic. Not an error.
    Debug(String),
    /// The transport finished its handshake and the session is ready to
    /// send and receive application messages.
    Connected,
    /// An application message that was not consumed by an internal handler
    /// or a pending job callback. `Some(reply)` whenever the message carries
    /// a `source_job`, letting the receiver answer it directly.
    Message(Header, Vec<u8>, Option<ReplyHandle>),
    /// The server pushed a fresh CM endpoint list (`ClientCMList`).
    Servers(Vec<Endpoint>),
    LogOnResponse(CMsgClientLogOnResponse),
    LoggedOff(CMsgClientLoggedOff),
    Error(CmError),
}
