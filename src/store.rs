/// Server store: the persisted `name → {address, channels}` records the
/// session pool is reconciled against.
///
/// In-memory ordered map with JSON file persistence. Every mutation is
/// written through before it returns, so a successful `add`/`put`/`delete`
/// is durable.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Name of the record for the home server.
pub const HOME: &str = "home";

/// One configured server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// `host:port`.
    pub address: String,
    /// Channels the bot should sit in.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl ServerRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            channels: Vec::new(),
        }
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }
}

/// Snapshot of every record, ordered by name.
pub type ServerMap = BTreeMap<String, ServerRecord>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed server records: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ServerStore {
    servers: RwLock<ServerMap>,
    persist_path: Option<PathBuf>,
}

impl Default for ServerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStore {
    /// Create a new empty store (no persistence).
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(ServerMap::new()),
            persist_path: None,
        }
    }

    /// Create an unpersisted store holding `servers`.
    pub fn with_servers(servers: ServerMap) -> Self {
        Self {
            servers: RwLock::new(servers),
            persist_path: None,
        }
    }

    /// Load from `{data_dir}/servers.json`, or start empty if it does not
    /// exist yet. An unreadable or malformed file is an error.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir).map_err(|source| StoreError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let path = data_dir.join("servers.json");
        let servers = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let servers: ServerMap = serde_json::from_str(&json)?;
            info!(count = servers.len(), path = %path.display(), "loaded server records");
            servers
        } else {
            ServerMap::new()
        };

        Ok(Self {
            servers: RwLock::new(servers),
            persist_path: Some(path),
        })
    }

    /// Persist to disk (atomic write via tmp+rename).
    fn persist(&self, servers: &ServerMap) -> Result<(), StoreError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(servers)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    pub async fn all(&self) -> ServerMap {
        self.servers.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> Result<ServerRecord, StoreError> {
        self.servers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    /// Insert or replace.
    pub async fn put(&self, name: &str, record: ServerRecord) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let previous = servers.insert(name.to_owned(), record);
        if let Err(e) = self.persist(&servers) {
            match previous {
                Some(previous) => servers.insert(name.to_owned(), previous),
                None => servers.remove(name),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Insert; fails if `name` is already taken.
    pub async fn add(&self, name: &str, record: ServerRecord) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        if servers.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_owned()));
        }
        servers.insert(name.to_owned(), record);
        if let Err(e) = self.persist(&servers) {
            servers.remove(name);
            return Err(e);
        }
        Ok(())
    }

    /// Remove; fails if `name` is absent.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let Some(previous) = servers.remove(name) else {
            return Err(StoreError::NotFound(name.to_owned()));
        };
        if let Err(e) = self.persist(&servers) {
            servers.insert(name.to_owned(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// Name of the record using `address`, if any.
    pub async fn find_by_address(&self, address: &str) -> Option<String> {
        self.servers
            .read()
            .await
            .iter()
            .find(|(_, record)| record.address == address)
            .map(|(name, _)| name.clone())
    }

    /// Like [`find_by_address`](Self::find_by_address), ignoring the record
    /// called `name`.
    pub async fn find_other_by_address(&self, name: &str, address: &str) -> Option<String> {
        self.servers
            .read()
            .await
            .iter()
            .find(|(other, record)| *other != name && record.address == address)
            .map(|(other, _)| other.clone())
    }

    /// Make sure the home record exists and points at `address`, keeping its
    /// channel list.
    pub async fn pin_home(&self, address: &str) -> Result<(), StoreError> {
        let mut record = match self.get(HOME).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => ServerRecord::default(),
            Err(e) => return Err(e),
        };
        if record.address != address {
            info!(%address, "pinning home server address");
        }
        record.address = address.to_owned();
        self.put(HOME, record).await
    }
}
