use std::io::{self, Read, Write};

use stan_gax::StanError;

/// Every log records the same framing: `[len:u32 | crc32(payload):u32 |
/// payload]`. `write_record`/`read_record` are the only places that touch
/// this layout so the message log and the subscription log share one
/// implementation of it.
pub fn write_record(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as u32;
    let crc = crc32fast::hash(payload);
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one record. Returns `Ok(None)` at a clean end-of-file (zero bytes
/// read for the length prefix) and `Err` on a corrupt or truncated header
/// so the caller can distinguish "nothing more to read" from "the trailing
/// bytes are a partial write and must be truncated away".
pub fn read_record(r: &mut impl Read) -> Result<Option<Vec<u8>>, RecordError> {
    let mut len_buf = [0u8; 4];
    match r.read(&mut len_buf) {
        Ok(0) => return Ok(None),
        Ok(n) if n < 4 => return Err(RecordError::Truncated),
        Ok(_) => {}
        Err(e) => return Err(RecordError::Io(e)),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut crc_buf = [0u8; 4];
    r.read_exact(&mut crc_buf).map_err(|_| RecordError::Truncated)?;
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).map_err(|_| RecordError::Truncated)?;

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(RecordError::CrcMismatch);
    }
    Ok(Some(payload))
}

#[derive(Debug)]
pub enum RecordError {
    Io(io::Error),
    /// A trailing record that was cut short by a crash mid-write. The
    /// caller truncates the file at the start of this record and treats
    /// recovery as if it had never been written.
    Truncated,
    CrcMismatch,
}

impl From<RecordError> for StanError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Io(e) => StanError::store_unavailable(format!("log io error: {e}")),
            RecordError::Truncated => StanError::store_corrupt("truncated trailing log record"),
            RecordError::CrcMismatch => StanError::store_corrupt("log record failed crc check"),
        }
    }
}
