/// Session pool: one session per configured server, kept in line with the
/// server store.
///
/// `sync` is the only way sessions come and go: it creates and starts
/// sessions for new records, stops and drops sessions for removed ones, and
/// moves sessions whose address changed.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use super::dispatch::SessionEvent;
use super::session::{Session, SessionConfig};
use crate::store::ServerMap;

/// What one `sync` pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub readdressed: Vec<String>,
    /// Subset of `readdressed` that was connected and got dropped.
    pub reconnected: Vec<String>,
}

#[derive(Debug)]
pub struct Pool {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: Arc<SessionConfig>,
    pub(super) owner: String,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Pool {
    pub fn new(
        config: SessionConfig,
        owner: impl Into<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config: Arc::new(config),
            owner: owner.into(),
            events,
        }
    }

    pub fn nick(&self) -> &str {
        &self.config.nick
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> BTreeSet<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Reconcile the pool against `servers`.
    pub async fn sync(&self, servers: &ServerMap) -> SyncReport {
        let mut report = SyncReport::default();

        {
            let mut sessions = self.sessions.write().await;

            for (name, record) in servers {
                let session = sessions.entry(name.clone()).or_insert_with(|| {
                    info!(server = %name, address = %record.address, "creating session");
                    report.created.push(name.clone());
                    Session::new(
                        name.as_str(),
                        record.address.as_str(),
                        Arc::clone(&self.config),
                        self.events.clone(),
                    )
                });
                let session = Arc::clone(session);

                session
                    .set_target_channels(record.channels.iter().cloned())
                    .await;
                if !session.is_active() {
                    session.start().await;
                } else {
                    tokio::spawn(async move {
                        session.sync_channels().await;
                    });
                }
            }

            let stale: Vec<String> = sessions
                .keys()
                .filter(|name| !servers.contains_key(*name))
                .cloned()
                .collect();
            for name in stale {
                if let Some(session) = sessions.remove(&name) {
                    info!(server = %name, "removing session");
                    session.stop().await;
                    report.removed.push(name);
                }
            }
        }

        let sessions = self.sessions.read().await;
        for (name, record) in servers {
            let Some(session) = sessions.get(name) else {
                warn!(server = %name, "session missing after sync");
                continue;
            };
            if session.address().await == record.address {
                continue;
            }
            report.readdressed.push(name.clone());
            if session.set_address(&record.address).await {
                report.reconnected.push(name.clone());
            }
        }

        report
    }

    /// Probe every session concurrently; any that fails is recovered.
    pub async fn probe_all(&self) {
        let sessions = self.sessions.read().await;
        let probes = sessions.values().map(|session| async move {
            if let Err(e) = session.probe().await {
                error!(server = %session.name(), "liveness probe failed: {e}");
                session.recover().await;
            }
        });
        join_all(probes).await;
    }

    /// Stop and drop every session.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (name, session) in sessions.drain() {
            info!(server = %name, "shutting down session");
            session.stop().await;
        }
    }
}
