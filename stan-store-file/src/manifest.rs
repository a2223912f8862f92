use std::fs::OpenOptions;
use std::io::{BufReader, Write};
use std::path::Path;

use stan_gax::StanError;
use stan_types::ServerInfo;

use crate::record::{read_record, write_record};

/// Reads the single `ServerInfo` record from `server.dat`, or `None` if
/// the manifest does not exist yet (an uninitialized store).
pub fn read(path: impl AsRef<Path>) -> Result<Option<ServerInfo>, StanError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| StanError::store_unavailable(format!("open manifest: {e}")))?;
    let mut reader = BufReader::new(file);
    match read_record(&mut reader)? {
        None => Ok(None),
        Some(payload) => {
            let info: ServerInfo = bincode::deserialize(&payload)
                .map_err(|e| StanError::store_corrupt(format!("bad manifest record: {e}")))?;
            Ok(Some(info))
        }
    }
}

/// Writes (overwriting) the single `ServerInfo` record.
pub fn write(path: impl AsRef<Path>, info: &ServerInfo) -> Result<(), StanError> {
    let bytes =
        bincode::serialize(info).map_err(|e| StanError::store_corrupt(format!("encode manifest: {e}")))?;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path.as_ref())
        .map_err(|e| StanError::store_unavailable(format!("open manifest: {e}")))?;
    write_record(&mut file, &bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
    file.flush().map_err(|e| StanError::store_unavailable(e.to_string()))
}
