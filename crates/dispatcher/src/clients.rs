//! Connected-client registry shared by the streaming adapters

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use contracts::ClientId;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// One live client of a server adapter.
///
/// `W` is the exclusively owned write handle (a locked socket sink for
/// WebSocket, a body channel sender for SSE).
#[derive(Debug)]
pub struct ConnectedClient<W> {
    pub id: ClientId,
    pub writer: W,
    pub connected_at: i64,
    last_activity: AtomicI64,
    channels: RwLock<BTreeSet<String>>,
    cancel: CancellationToken,
}

impl<W> ConnectedClient<W> {
    pub fn new(writer: W, channels: impl IntoIterator<Item = String>, now: i64) -> Self {
        Self {
            id: ClientId::generate(),
            writer,
            connected_at: now,
            last_activity: AtomicI64::new(now),
            channels: RwLock::new(channels.into_iter().collect()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn touch(&self, now: i64) {
        self.last_activity.fetch_max(now, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn idle_ms(&self, now: i64) -> i64 {
        (now - self.last_activity()).max(0)
    }

    /// Add channels; returns how many were new
    pub fn join(&self, channels: impl IntoIterator<Item = String>) -> usize {
        let mut set = self.channels.write();
        channels.into_iter().filter(|c| set.insert(c.clone())).count()
    }

    /// Remove channels; returns how many were present
    pub fn leave<'a>(&self, channels: impl IntoIterator<Item = &'a str>) -> usize {
        let mut set = self.channels.write();
        channels.into_iter().filter(|c| set.remove(*c)).count()
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.read().iter().cloned().collect()
    }

    pub fn in_channel(&self, channel: &str) -> bool {
        self.channels.read().contains(channel)
    }

    pub fn in_any(&self, channels: &[String]) -> bool {
        let set = self.channels.read();
        channels.iter().any(|c| set.contains(c))
    }

    /// Fires when the client is evicted or the adapter shuts down
    pub fn closed(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Concurrent id -> client map
#[derive(Debug)]
pub struct ClientRegistry<W> {
    clients: DashMap<ClientId, Arc<ConnectedClient<W>>>,
}

impl<W> Default for ClientRegistry<W> {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl<W> ClientRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: ConnectedClient<W>) -> Arc<ConnectedClient<W>> {
        let client = Arc::new(client);
        self.clients.insert(client.id.clone(), Arc::clone(&client));
        client
    }

    /// Remove and signal the client's tasks to stop
    pub fn remove(&self, id: &str) -> Option<Arc<ConnectedClient<W>>> {
        let (_, client) = self.clients.remove(id)?;
        client.cancel.cancel();
        Some(client)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConnectedClient<W>>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Clients matching `pred`, cloned out so no shard lock is held
    pub fn select(&self, pred: impl Fn(&ConnectedClient<W>) -> bool) -> Vec<Arc<ConnectedClient<W>>> {
        self.clients
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<ConnectedClient<W>>> {
        self.select(|_| true)
    }

    /// Remove every client
    pub fn drain(&self) -> Vec<Arc<ConnectedClient<W>>> {
        let ids = self.ids();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Restrict `clients` to the listed ids; an empty list keeps everyone
pub fn narrow_to_ids<W>(
    clients: Vec<Arc<ConnectedClient<W>>>,
    ids: &[String],
) -> Vec<Arc<ConnectedClient<W>>> {
    if ids.is_empty() {
        return clients;
    }
    clients
        .into_iter()
        .filter(|c| ids.iter().any(|id| id == c.id.as_str()))
        .collect()
}
