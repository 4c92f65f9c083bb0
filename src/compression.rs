//! Batch decompression for `Multi`. The vendor wire format wraps a
//! zipped batch in a single archive entry named `z`.

use std::io::{Cursor, Read};

use crate::error::{CmError, Result};

const ENTRY_NAME: &str = "z";

/// Extracts the contents of the archive's `z` entry.
pub fn unzip(archive_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| CmError::Protocol(format!("multi archive unreadable: {e}")))?;

    let mut entry = archive
        .by_name(ENTRY_NAME)
        .map_err(|e| CmError::Protocol(format!("multi archive missing `{ENTRY_NAME}` entry: {e}")))?;

    let mut out = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut out)
        .map_err(|e| CmError::Protocol(format!("multi archive read failed: {e}")))?;
    Ok(out)
}
