use std::{collections::HashMap, fmt, net::SocketAddr};

use tokio::sync::mpsc;

/// Identity of one accepted connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Has not sent cacheable traffic yet; treated as a consumer.
    Unknown,
    Producer,
    /// A former producer that another connection displaced.
    Consumer,
}

/// Outbound half of a live connection: text queued here is written to the
/// socket by that connection's task.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: ConnectionId,
    pub outbound: mpsc::Sender<String>,
}

#[derive(Debug)]
struct ConnectionRecord {
    peer: Option<SocketAddr>,
    role: Role,
    outbound: mpsc::Sender<String>,
}

/// Live connections plus the single producer reference.
///
/// The producer, when set, always names a connection in `live`; removing
/// that connection clears it in the same call.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    live: HashMap<ConnectionId, ConnectionRecord>,
    producer: Option<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<String>,
    ) {
        self.live.insert(
            id,
            ConnectionRecord {
                peer,
                role: Role::Unknown,
                outbound,
            },
        );
    }

    /// Removes `id`, returning the role it held. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Role> {
        let record = self.live.remove(&id)?;
        if self.producer == Some(id) {
            self.producer = None;
        }
        Some(record.role)
    }

    /// Makes `id` the producer, displacing any previous one. Ids that are not
    /// live are ignored.
    pub fn promote_producer(&mut self, id: ConnectionId) -> bool {
        if !self.live.contains_key(&id) {
            return false;
        }

        if let Some(previous) = self.producer.replace(id) {
            if previous != id {
                if let Some(record) = self.live.get_mut(&previous) {
                    record.role = Role::Consumer;
                }
            }
        }
        if let Some(record) = self.live.get_mut(&id) {
            record.role = Role::Producer;
        }
        true
    }

    /// Every live connection except `exclude` and the current producer.
    pub fn snapshot_recipients(&self, exclude: ConnectionId) -> Vec<Recipient> {
        self.live
            .iter()
            .filter(|(id, _)| **id != exclude && Some(**id) != self.producer)
            .map(|(id, record)| Recipient {
                id: *id,
                outbound: record.outbound.clone(),
            })
            .collect()
    }

    pub fn outbound(&self, id: ConnectionId) -> Option<mpsc::Sender<String>> {
        self.live.get(&id).map(|record| record.outbound.clone())
    }

    pub fn producer(&self) -> Option<ConnectionId> {
        self.producer
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.live.get(&id).map(|record| record.role)
    }

    pub fn peer_of(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.live.get(&id).and_then(|record| record.peer)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
