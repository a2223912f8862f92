use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use stan_gax::StanError;
use stan_types::Channel;

use crate::record::{read_record, write_record};

/// Reads the single `Channel` record from a channel directory's
/// `channel.dat`, or `None` if it has not been created yet.
pub fn read(path: impl AsRef<Path>) -> Result<Option<Channel>, StanError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| StanError::store_unavailable(format!("open channel manifest: {e}")))?;
    let mut reader = BufReader::new(file);
    match read_record(&mut reader)? {
        None => Ok(None),
        Some(payload) => {
            let channel: Channel = bincode::deserialize(&payload)
                .map_err(|e| StanError::store_corrupt(format!("bad channel manifest record: {e}")))?;
            Ok(Some(channel))
        }
    }
}

/// Writes (overwriting) the single `Channel` record. Called on creation
/// and whenever `deleted` flips.
pub fn write(path: impl AsRef<Path>, channel: &Channel) -> Result<(), StanError> {
    let bytes =
        bincode::serialize(channel).map_err(|e| StanError::store_corrupt(format!("encode channel manifest: {e}")))?;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path.as_ref())
        .map_err(|e| StanError::store_unavailable(format!("open channel manifest: {e}")))?;
    write_record(&mut file, &bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
    use std::io::Write;
    file.flush().map_err(|e| StanError::store_unavailable(e.to_string()))
}
