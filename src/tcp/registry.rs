use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Sender;

use crate::proto::Message;

/// Address an endpoint reported for itself, kept as sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoint {
    pub ip: String,
    pub port: u32,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Handle used to push messages to the task owning a connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub id: u64,
    pub tx: Sender<Message>,
}

#[derive(Debug)]
struct Entry {
    conn: Option<ConnHandle>,
    addr: Option<Endpoint>,
    updated: Instant,
}

/// Device key to (connection, last reported address).
///
/// Every operation runs under one lock, so a read and the write that follows
/// it can not interleave with another connection's update of the same key.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind `key` to `conn` and `addr`, replacing whatever was there.
    pub fn register(&self, key: &str, conn: ConnHandle, addr: Endpoint) {
        let mut entries = self.entries();
        if let Some(prev) = entries.get(key).and_then(|e| e.conn.as_ref()) {
            if prev.id != conn.id {
                log::debug!("key {} moved from connection {} to {}", key, prev.id, conn.id);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                conn: Some(conn),
                addr: Some(addr),
                updated: Instant::now(),
            },
        );
    }

    pub fn address(&self, key: &str) -> Option<Endpoint> {
        self.entries().get(key).and_then(|e| e.addr.clone())
    }

    pub fn connection(&self, key: &str) -> Option<ConnHandle> {
        self.entries().get(key).and_then(|e| e.conn.clone())
    }

    /// Drop the connection binding of `key` if connection `id` still owns it.
    /// The address stays known.
    pub fn release(&self, key: &str, id: u64) {
        if let Some(e) = self.entries().get_mut(key) {
            if e.conn.as_ref().map(|c| c.id) == Some(id) {
                e.conn = None;
            }
        }
    }

    /// Remove entries without a live connection whose address is older than `ttl`.
    pub fn expire(&self, ttl: Duration) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, e| {
            let live = e.conn.as_ref().is_some_and(|c| !c.tx.is_closed());
            let keep = live || e.updated.elapsed() < ttl;
            if !keep {
                log::debug!("expired {}", key);
            }
            keep
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
