use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use stan_gax::StanError;
use stan_types::Client;

use crate::record::{read_record, write_record};

#[derive(Serialize, Deserialize, Clone)]
enum ClientLogEntry {
    Add(Client),
    Delete(String),
}

/// The broker-wide client log (`clients.dat`): an append-only record of
/// `AddClient`/`DeleteClient` calls, folded at open time into the set of
/// currently-registered clients.
pub struct FileClientLog {
    file: std::sync::Mutex<File>,
    clients: std::sync::Mutex<HashMap<String, Client>>,
}

impl FileClientLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StanError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| StanError::store_unavailable(format!("open client log: {e}")))?;
        let clients = replay(&mut file)?;
        Ok(Self {
            file: std::sync::Mutex::new(file),
            clients: std::sync::Mutex::new(clients),
        })
    }

    pub fn clients(&self) -> Vec<Client> {
        self.clients.lock().unwrap().values().cloned().collect()
    }

    pub fn add(&self, client: &Client) -> Result<(), StanError> {
        self.clients
            .lock()
            .unwrap()
            .insert(client.id.as_str().to_string(), client.clone());
        self.append(&ClientLogEntry::Add(client.clone()))
    }

    pub fn delete(&self, id: &str) -> Result<(), StanError> {
        self.clients.lock().unwrap().remove(id);
        self.append(&ClientLogEntry::Delete(id.to_string()))
    }

    fn append(&self, entry: &ClientLogEntry) -> Result<(), StanError> {
        let bytes = bincode::serialize(entry)
            .map_err(|e| StanError::store_corrupt(format!("encode client record: {e}")))?;
        let mut file = self.file.lock().unwrap();
        write_record(&mut *file, &bytes).map_err(|e| StanError::store_unavailable(e.to_string()))?;
        file.flush().map_err(|e| StanError::store_unavailable(e.to_string()))
    }
}

fn replay(file: &mut File) -> Result<HashMap<String, Client>, StanError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StanError::store_unavailable(e.to_string()))?;
    let mut reader = BufReader::new(&mut *file);
    let mut clients = HashMap::new();
    let mut consumed: u64 = 0;
    loop {
        let before = consumed;
        match read_record(&mut reader) {
            Ok(None) => break,
            Ok(Some(payload)) => {
                consumed += 8 + payload.len() as u64;
                let entry: ClientLogEntry = bincode::deserialize(&payload)
                    .map_err(|e| StanError::store_corrupt(format!("bad client record: {e}")))?;
                match entry {
                    ClientLogEntry::Add(client) => {
                        clients.insert(client.id.as_str().to_string(), client);
                    }
                    ClientLogEntry::Delete(id) => {
                        clients.remove(&id);
                    }
                }
            }
            Err(crate::record::RecordError::Truncated) => {
                tracing::warn!(offset = before, "truncating partial trailing client record");
                file.set_len(before)
                    .map_err(|e| StanError::store_unavailable(e.to_string()))?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(clients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stan_types::ClientId;

    #[test]
    fn replays_add_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.dat");
        {
            let log = FileClientLog::open(&path).unwrap();
            log.add(&Client::new(ClientId::parse("c1").unwrap(), "hb.c1")).unwrap();
            log.add(&Client::new(ClientId::parse("c2").unwrap(), "hb.c2")).unwrap();
            log.delete("c1").unwrap();
        }
        let log = FileClientLog::open(&path).unwrap();
        let clients = log.clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id.as_str(), "c2");
    }
}
