//! Per-account worker pool
//!
//! The pool owns at most one worker per account alias. `acquire` reuses a
//! live connection or spawns a fresh one; dead connections (worker exited)
//! are replaced transparently. Connections left idle longer than
//! `idle_timeout` are torn down by [`WorkerPool::reap_idle`], which
//! [`WorkerPool::spawn_reaper`] runs on an interval.

use crate::config::{CredentialResolver, EnvCredentialResolver, WorkerConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::kind::AccountTarget;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Slot = Arc<Mutex<Option<Arc<Connection>>>>;

/// Shared pool of account workers
pub struct WorkerPool {
    config: WorkerConfig,
    credentials: Arc<dyn CredentialResolver>,
    slots: SyncMutex<HashMap<String, Slot>>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_credentials(config, Arc::new(EnvCredentialResolver))
    }

    pub fn with_credentials(config: WorkerConfig, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            config,
            credentials,
            slots: SyncMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn slot(&self, alias: &str) -> Slot {
        self.slots
            .lock()
            .entry(alias.to_string())
            .or_default()
            .clone()
    }

    fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .lock()
            .iter()
            .map(|(alias, slot)| (alias.clone(), slot.clone()))
            .collect()
    }

    /// Get a live connection for the account, spawning a worker if needed.
    pub async fn acquire(&self, target: &AccountTarget) -> Result<Arc<Connection>> {
        let slot = self.slot(&target.alias);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref() {
            if existing.is_alive() {
                existing.touch();
                return Ok(existing.clone());
            }
            warn!(account = %target.alias, pid = ?existing.pid(), "Worker exited, respawning");
            existing.close().await;
            *guard = None;
        }

        let connection = Arc::new(
            Connection::spawn(target, &self.config, self.credentials.as_ref()).await?,
        );
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Mark a connection idle after use.
    pub fn release(&self, connection: &Connection) {
        connection.touch();
    }

    /// Close connections idle longer than the configured timeout.
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut reaped = 0;

        for (alias, slot) in self.all_slots() {
            // A slot being acquired is in use, skip it.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard.as_ref().is_some_and(|connection| {
                !connection.is_alive()
                    || (connection.active_calls() == 0 && connection.idle_for() > idle_timeout)
            });
            if expired {
                if let Some(connection) = guard.take() {
                    debug!(account = %alias, idle_ms = connection.idle_for().as_millis() as u64, "Reaping idle worker");
                    connection.close().await;
                    reaped += 1;
                }
            }
        }

        if reaped > 0 {
            info!(reaped, "Closed idle worker connections");
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match pool.upgrade() {
                    Some(pool) => {
                        pool.reap_idle().await;
                    }
                    None => break,
                }
            }
        })
    }

    /// Close the worker for one account. Returns whether one was running.
    pub async fn close(&self, alias: &str) -> bool {
        let slot = self.slots.lock().remove(alias);
        match slot {
            Some(slot) => match slot.lock().await.take() {
                Some(connection) => {
                    connection.close().await;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Close every worker.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(connection) = slot.lock().await.take() {
                connection.close().await;
            }
        }
        info!("Worker pool shut down");
    }

    /// Number of live worker connections
    pub async fn active_connections(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.all_slots() {
            if slot.lock().await.as_ref().is_some_and(|c| c.is_alive()) {
                count += 1;
            }
        }
        count
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("command", &self.config.command)
            .field("accounts", &self.slots.lock().len())
            .finish()
    }
}
