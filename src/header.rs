//! Header codec: the three on-wire header shapes and the rules for picking
//! between them.

use crate::error::{CmError, Result};
use crate::schema::CMsgProtoBufHeader;

/// No correlation: the protocol's sentinel "no job" value.
pub const NO_JOB: u64 = u64::MAX;

const EXTENDED_HEADER_SIZE: usize = 36;
const EXTENDED_HEADER_VERSION: u16 = 2;
const EXTENDED_HEADER_CANARY: u8 = 0xEF;

/// A 32-bit vendor message type. Modeled as a plain wrapper rather than a
/// closed Rust enum because the bit-31 proto flag is folded into the same
/// word on the wire, and because only a handful of values are meaningful to
/// this client; everything else just round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EMsg(pub u32);

impl EMsg {
    pub const CHANNEL_ENCRYPT_REQUEST: EMsg = EMsg(1303);
    pub const CHANNEL_ENCRYPT_RESPONSE: EMsg = EMsg(1304);
    pub const CHANNEL_ENCRYPT_RESULT: EMsg = EMsg(1304);
    pub const MULTI: EMsg = EMsg(1);
    pub const CLIENT_HEARTBEAT: EMsg = EMsg(703);
    pub const CLIENT_LOG_ON_RESPONSE: EMsg = EMsg(751);
    pub const CLIENT_LOGGED_OFF: EMsg = EMsg(716);
    pub const CLIENT_CM_LIST: EMsg = EMsg(283);

    fn is_handshake(self) -> bool {
        self == EMsg::CHANNEL_ENCRYPT_REQUEST || self == EMsg::CHANNEL_ENCRYPT_RESULT
    }
}

pub type ProtoHeader = CMsgProtoBufHeader;

/// The logical, variant-tagged header.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Plain {
        msg: EMsg,
        target_job: u64,
        source_job: u64,
    },
    Proto {
        msg: EMsg,
        proto: ProtoHeader,
    },
    Extended {
        msg: EMsg,
        steam_id: u64,
        session_id: i32,
        source_job: u64,
        target_job: u64,
    },
}

impl Header {
    pub fn msg(&self) -> EMsg {
        match self {
            Header::Plain { msg, .. } => *msg,
            Header::Proto { msg, .. } => *msg,
            Header::Extended { msg, .. } => *msg,
        }
    }

    /// Extracts `(source_job, target_job)` from whichever variant this is.
    pub fn normalize(&self) -> (u64, u64) {
        match self {
            Header::Plain {
                source_job,
                target_job,
                ..
            } => (*source_job, *target_job),
            Header::Proto { proto, .. } => (proto.jobid_source, proto.jobid_target),
            Header::Extended {
                source_job,
                target_job,
                ..
            } => (*source_job, *target_job),
        }
    }

    pub fn source_job(&self) -> u64 {
        self.normalize().0
    }

    pub fn target_job(&self) -> u64 {
        self.normalize().1
    }

    /// Returns a copy of this header with `target_job` overwritten, used to
    /// build a reply's header from the request it answers.
    pub fn stamp_reply_target(&self, target_job: u64) -> Header {
        match self {
            Header::Plain {
                msg, source_job, ..
            } => Header::Plain {
                msg: *msg,
                target_job,
                source_job: *source_job,
            },
            Header::Proto { msg, proto } => {
                let mut proto = proto.clone();
                proto.jobid_target = target_job;
                Header::Proto { msg: *msg, proto }
            }
            Header::Extended {
                msg,
                steam_id,
                session_id,
                source_job,
                ..
            } => Header::Extended {
                msg: *msg,
                steam_id: *steam_id,
                session_id: *session_id,
                source_job: *source_job,
                target_job,
            },
        }
    }
}

/// Snapshot of the session fields a header stamps in on encode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionIds {
    pub session_id: i32,
    pub steam_id: u64,
}

/// Builds the header for an outbound frame, applying the mirror-image of
/// the decode selection rule: `ChannelEncryptResponse` forces `Plain`;
/// otherwise the presence of `proto` selects `Proto` vs `Extended`.
pub fn build_header(
    msg: EMsg,
    proto: bool,
    ids: SessionIds,
    source_job: u64,
    target_job: u64,
) -> Header {
    if msg == EMsg::CHANNEL_ENCRYPT_RESPONSE {
        Header::Plain {
            msg,
            target_job,
            source_job,
        }
    } else if proto {
        Header::Proto {
            msg,
            proto: CMsgProtoBufHeader {
                steamid: ids.steam_id,
                client_sessionid: ids.session_id,
                jobid_source: source_job,
                jobid_target: target_job,
                target_job_name: None,
            },
        }
    } else {
        Header::Extended {
            msg,
            steam_id: ids.steam_id,
            session_id: ids.session_id,
            source_job,
            target_job,
        }
    }
}

/// Reads the raw first word of a decrypted payload: `(emsg, is_proto)`.
pub fn decode_raw_emsg(bytes: &[u8]) -> Result<(EMsg, bool)> {
    if bytes.len() < 4 {
        return Err(CmError::Protocol("frame shorter than header word".into()));
    }
    let raw = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let is_proto = raw & 0x8000_0000 != 0;
    let emsg = EMsg(raw & 0x7FFF_FFFF);
    Ok((emsg, is_proto))
}

/// Decodes a whole frame into `(Header, body)`. Variant selection: bit 31
/// set picks `Proto`; cleared with a handshake `EMsg` picks `Plain`;
/// anything else picks `Extended`.
pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8])> {
    let (emsg, is_proto) = decode_raw_emsg(bytes)?;

    if is_proto {
        if bytes.len() < 8 {
            return Err(CmError::Protocol("truncated proto header length".into()));
        }
        let header_len = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if header_len < 0 {
            return Err(CmError::Protocol("negative proto header length".into()));
        }
        let header_len = header_len as usize;
        let header_start = 8;
        let header_end = header_start
            .checked_add(header_len)
            .ok_or_else(|| CmError::Protocol("proto header length overflow".into()))?;
        if bytes.len() < header_end {
            return Err(CmError::Protocol("truncated proto header body".into()));
        }
        let proto = if header_len == 0 {
            ProtoHeader::default()
        } else {
            use prost::Message;
            ProtoHeader::decode(&bytes[header_start..header_end])
                .map_err(|e| CmError::Protocol(format!("proto header decode: {e}")))?
        };
        Ok((Header::Proto { msg: emsg, proto }, &bytes[header_end..]))
    } else if emsg.is_handshake() {
        if bytes.len() < 20 {
            return Err(CmError::Protocol("truncated plain header".into()));
        }
        let target_job = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let source_job = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        Ok((
            Header::Plain {
                msg: emsg,
                target_job,
                source_job,
            },
            &bytes[20..],
        ))
    } else {
        if bytes.len() < EXTENDED_HEADER_SIZE {
            return Err(CmError::Protocol("truncated extended header".into()));
        }
        let target_job = u64::from_le_bytes(bytes[7..15].try_into().unwrap());
        let source_job = u64::from_le_bytes(bytes[15..23].try_into().unwrap());
        let steam_id = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let session_id = i32::from_le_bytes(bytes[32..36].try_into().unwrap());
        Ok((
            Header::Extended {
                msg: emsg,
                steam_id,
                session_id,
                source_job,
                target_job,
            },
            &bytes[EXTENDED_HEADER_SIZE..],
        ))
    }
}

/// Encodes a header back onto the wire, mirroring `decode`.
pub fn encode(header: &Header) -> Vec<u8> {
    let mut out = Vec::new();
    match header {
        Header::Plain {
            msg,
            target_job,
            source_job,
        } => {
            out.extend_from_slice(&msg.0.to_le_bytes());
            out.extend_from_slice(&target_job.to_le_bytes());
            out.extend_from_slice(&source_job.to_le_bytes());
        }
        Header::Proto { msg, proto } => {
            use prost::Message;
            let raw = msg.0 | 0x8000_0000;
            let proto_bytes = proto.encode_to_vec();
            out.extend_from_slice(&raw.to_le_bytes());
            out.extend_from_slice(&(proto_bytes.len() as i32).to_le_bytes());
            out.extend_from_slice(&proto_bytes);
        }
        Header::Extended {
            msg,
            steam_id,
            session_id,
            source_job,
            target_job,
        } => {
            out.extend_from_slice(&msg.0.to_le_bytes());
            out.push(EXTENDED_HEADER_SIZE as u8);
            out.extend_from_slice(&EXTENDED_HEADER_VERSION.to_le_bytes());
            out.extend_from_slice(&target_job.to_le_bytes());
            out.extend_from_slice(&source_job.to_le_bytes());
            out.push(EXTENDED_HEADER_CANARY);
            out.extend_from_slice(&steam_id.to_le_bytes());
            out.extend_from_slice(&session_id.to_le_bytes());
        }
    }
    out
}
