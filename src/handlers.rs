//! Internal message handlers invoked by the dispatcher: handshake,
//! logon lifecycle, and server list refresh.

use std::net::Ipv4Addr;
use std::time::Duration;

use prost::Message;
use rsa::RsaPublicKey;

use crate::checksum;
use crate::dispatcher::DispatchContext;
use crate::endpoint::Endpoint;
use crate::error::{CmError, Result};
use crate::events::ClientEvent;
use crate::header::{self, EMsg, SessionIds, NO_JOB};
use crate::schema::{CMsgClientCMList, CMsgClientLogOnResponse, CMsgClientLoggedOff};
use crate::session_state::ConnPhase;
use crate::crypto;

/// Raw (non-protobuf) body of an inbound `ChannelEncryptRequest`.
struct ChannelEncryptRequestBody {
    #[allow(dead_code)]
    protocol: u32,
    #[allow(dead_code)]
    universe: u32,
    #[allow(dead_code)]
    nonce: [u8; 16],
}

impl ChannelEncryptRequestBody {
    fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < 24 {
            return Err(CmError::Protocol("truncated ChannelEncryptRequest body".into()));
        }
        Ok(Self {
            protocol: u32::from_le_bytes(body[0..4].try_into().unwrap()),
            universe: u32::from_le_bytes(body[4..8].try_into().unwrap()),
            nonce: body[8..24].try_into().unwrap(),
        })
    }
}

/// Encodes the body of an outbound `ChannelEncryptResponse`: `protocol`,
/// key length, the RSA-wrapped key, its CRC32, and a trailing zero word.
fn encode_channel_encrypt_response(protocol: u32, encrypted_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + encrypted_key.len());
    out.extend_from_slice(&protocol.to_le_bytes());
    out.extend_from_slice(&(encrypted_key.len() as u32).to_le_bytes());
    out.extend_from_slice(encrypted_key);
    out.extend_from_slice(&checksum::crc32(encrypted_key).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

pub fn handle_channel_encrypt_request(
    ctx: &mut DispatchContext<'_>,
    body: &[u8],
    universe_key: &RsaPublicKey,
) -> Result<()> {
    let _request = ChannelEncryptRequestBody::decode(body)?;

    let material = crypto::generate_session_key(universe_key)?;
    let response_body = encode_channel_encrypt_response(1, &material.encrypted);

    let header = header::build_header(
        EMsg::CHANNEL_ENCRYPT_RESPONSE,
        false,
        SessionIds::default(),
        NO_JOB,
        NO_JOB,
    );
    let mut frame = header::encode(&header);
    frame.extend_from_slice(&response_body);
    ctx.transport.send(frame)?;

    ctx.session.set_pending_session_key(material.plain);
    ctx.session.phase = ConnPhase::Encrypting;
    let _ = ctx
        .events
        .send(ClientEvent::Debug("sent channel encrypt response".into()));
    Ok(())
}

pub fn handle_channel_encrypt_result(ctx: &mut DispatchContext<'_>, body: &[u8]) -> Result<()> {
    if body.len() < 4 {
        return Err(CmError::Protocol("truncated ChannelEncryptResult body".into()));
    }
    let result = u32::from_le_bytes(body[0..4].try_into().unwrap());
    if result != 1 {
        // Session key is never installed on a failed result.
        ctx.session.take_pending_session_key();
        return Err(CmError::EncryptionFailed(result));
    }
    if let Some(key) = ctx.session.take_pending_session_key() {
        ctx.transport.enable_encryption(key)?;
    }
    ctx.session.phase = ConnPhase::Ready;
    let _ = ctx.events.send(ClientEvent::Connected);
    Ok(())
}

const LOG_ON_RESULT_OK: i32 = 1;

pub fn handle_log_on_response(ctx: &mut DispatchContext<'_>, body: &[u8]) -> Result<()> {
    let msg = CMsgClientLogOnResponse::decode(body)
        .map_err(|e| CmError::Protocol(format!("ClientLogOnResponse decode: {e}")))?;
    ctx.session.latch_steam_id(msg.client_supplied_steamid);
    if msg.eresult == LOG_ON_RESULT_OK {
        let seconds = msg.out_of_game_heartbeat_seconds.max(0) as u64;
        ctx.session.set_logged_on(Duration::from_secs(seconds));
    }
    let _ = ctx.events.send(ClientEvent::LogOnResponse(msg));
    Ok(())
}

pub fn handle_logged_off(ctx: &mut DispatchContext<'_>, body: &[u8]) -> Result<()> {
    let msg = CMsgClientLoggedOff::decode(body)
        .map_err(|e| CmError::Protocol(format!("ClientLoggedOff decode: {e}")))?;
    ctx.session.clear_logged_on();
    let _ = ctx.events.send(ClientEvent::LoggedOff(msg));
    Ok(())
}

pub fn handle_cm_list(ctx: &mut DispatchContext<'_>, body: &[u8]) -> Result<()> {
    let msg = CMsgClientCMList::decode(body)
        .map_err(|e| CmError::Protocol(format!("ClientCMList decode: {e}")))?;
    let endpoints: Vec<Endpoint> = msg
        .cm_addresses
        .iter()
        .zip(msg.cm_ports.iter())
        .map(|(&addr, &port)| Endpoint::new(Ipv4Addr::from(addr).to_string(), port as u16))
        .collect();
    ctx.directory.update(endpoints.clone());
    let _ = ctx.events.send(ClientEvent::Servers(endpoints));
    Ok(())
}

pub fn handle_heartbeat(_ctx: &mut DispatchContext<'_>) -> Result<()> {
    Ok(())
}
