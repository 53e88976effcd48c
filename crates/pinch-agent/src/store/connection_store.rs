//! JSON-file-backed connection state (§5: "a JSON file backs
//! connection state"). Small, infrequently-written, human-inspectable
//! — unlike the message/audit stores this never needs SQL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::connection::Connection;
use crate::error::Result;

pub struct ConnectionStore {
    path: PathBuf,
    data: Mutex<HashMap<String, Connection>>,
}

impl ConnectionStore {
    /// Load existing connections from `path`, or start empty if the
    /// file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    pub fn get(&self, peer_address: &str) -> Result<Option<Connection>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(peer_address).cloned())
    }

    pub fn list(&self) -> Result<Vec<Connection>> {
        let data = self.data.lock().unwrap();
        Ok(data.values().cloned().collect())
    }

    /// Insert or replace a connection and persist the whole table.
    pub fn upsert(&self, connection: Connection) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        data.insert(connection.peer_address.clone(), connection);
        self.flush(&data)
    }

    /// Write-to-temp-then-rename so a crash mid-write never corrupts
    /// the file readers see.
    fn flush(&self, data: &HashMap<String, Connection>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
