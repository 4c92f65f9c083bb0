//! `Multi` batch expansion: a single frame carrying zero or more
//! sub-frames, each length-prefixed the same way payloads are framed for
//! `Multi` on the wire (not to be confused with the outer VT01 transport
//! framing, which is already stripped by the time a body reaches here).

use prost::Message;

use crate::compression;
use crate::dispatcher::{self, DispatchContext};
use crate::error::{CmError, Result};
use crate::schema::CMsgMulti;
use crate::session_state::ConnPhase;
use rsa::RsaPublicKey;

const SUB_FRAME_HEADER_LEN: usize = 4;

pub fn handle_multi(
    ctx: &mut DispatchContext<'_>,
    body: &[u8],
    universe_key: &RsaPublicKey,
) -> Result<()> {
    let multi = CMsgMulti::decode(body)
        .map_err(|e| CmError::Protocol(format!("Multi decode: {e}")))?;

    let payload = if multi.size_unzipped > 0 {
        let unzipped = compression::unzip(&multi.message_body)?;
        if unzipped.len() as i32 != multi.size_unzipped {
            return Err(CmError::Protocol(
                "Multi size_unzipped did not match decompressed length".into(),
            ));
        }
        unzipped
    } else {
        multi.message_body
    };

    let mut offset = 0usize;
    while offset + SUB_FRAME_HEADER_LEN <= payload.len() {
        // A disconnect triggered by an earlier sub-frame (e.g. a failed
        // handshake) must stop the rest of the batch from being processed.
        if ctx.session.phase != ConnPhase::Ready && ctx.session.phase != ConnPhase::Encrypting {
            break;
        }

        let len = u32::from_le_bytes(payload[offset..offset + SUB_FRAME_HEADER_LEN].try_into().unwrap())
            as usize;
        offset += SUB_FRAME_HEADER_LEN;
        if offset + len > payload.len() {
            return Err(CmError::Protocol("truncated Multi sub-frame".into()));
        }
        let sub_frame = &payload[offset..offset + len];
        offset += len;

        dispatcher::dispatch(ctx, sub_frame, universe_key)?;
    }

    Ok(())
}
