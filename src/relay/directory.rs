use crate::domain::{ClientId, SubscriptionKey};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Two-way index of client interest: key -> clients and client -> keys.
///
/// Pure bookkeeping. Both indices are updated under one lock so they never
/// disagree, and empty sets are removed eagerly.
#[derive(Default)]
pub struct SubscriptionDirectory {
    inner: RwLock<DirectoryInner>,
}

#[derive(Default)]
struct DirectoryInner {
    by_key: HashMap<SubscriptionKey, HashSet<ClientId>>,
    by_client: HashMap<ClientId, HashSet<SubscriptionKey>>,
}

impl SubscriptionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the pair was newly added, `false` if already present.
    pub async fn add_interest(&self, client: &str, key: &SubscriptionKey) -> bool {
        let mut inner = self.inner.write().await;

        let added = inner
            .by_key
            .entry(key.clone())
            .or_default()
            .insert(client.to_string());

        inner
            .by_client
            .entry(client.to_string())
            .or_default()
            .insert(key.clone());

        added
    }

    /// Returns `true` if the pair was present and has been removed.
    pub async fn remove_interest(&self, client: &str, key: &SubscriptionKey) -> bool {
        let mut inner = self.inner.write().await;

        let removed = match inner.by_key.get_mut(key) {
            Some(clients) => {
                let removed = clients.remove(client);
                if clients.is_empty() {
                    inner.by_key.remove(key);
                }
                removed
            }
            None => false,
        };

        if let Some(keys) = inner.by_client.get_mut(client) {
            keys.remove(key);
            if keys.is_empty() {
                inner.by_client.remove(client);
            }
        }

        removed
    }

    pub async fn interested_clients(&self, key: &SubscriptionKey) -> Vec<ClientId> {
        self.inner
            .read()
            .await
            .by_key
            .get(key)
            .map(|clients| clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn client_keys(&self, client: &str) -> Vec<SubscriptionKey> {
        self.inner
            .read()
            .await
            .by_client
            .get(client)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn interest_count(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .read()
            .await
            .by_key
            .get(key)
            .map_or(0, HashSet::len)
    }

    pub async fn key_count(&self) -> usize {
        self.inner.read().await.by_key.len()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.by_client.len()
    }
}
