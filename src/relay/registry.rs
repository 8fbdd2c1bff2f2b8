use crate::{
    domain::SubscriptionKey,
    error::{ErrorContext, ErrorSeverity, Result},
    relay::handle_cache::ContractHandleCache,
    services::{ChainProvider, ContractHandle, EventSink, ListenerHandle},
};
use alloy::json_abi::Event;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The single upstream listener backing one subscription key.
pub struct UpstreamListener {
    listener: ListenerHandle,
    contract: Arc<ContractHandle>,
    ref_count: usize,
}

impl UpstreamListener {
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

/// Keeps at most one chain listener per key and reference-counts it by the
/// number of distinct interested clients.
///
/// The registry does not consult the subscription directory; callers keep
/// `increment_ref`/`decrement_ref` balanced with directory membership changes.
pub struct ListenerRegistry {
    provider: Arc<dyn ChainProvider>,
    cache: Arc<ContractHandleCache>,
    listeners: RwLock<HashMap<SubscriptionKey, UpstreamListener>>,
}

impl ListenerRegistry {
    pub fn new(provider: Arc<dyn ChainProvider>, cache: Arc<ContractHandleCache>) -> Self {
        Self {
            provider,
            cache,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_live(&self, key: &SubscriptionKey) -> bool {
        self.listeners.read().await.contains_key(key)
    }

    /// Ensures a listener exists for `key`. Returns `true` if one was attached
    /// by this call, `false` if it already existed. A new listener starts with
    /// a reference count of zero.
    ///
    /// On failure nothing is recorded, and the contract handle is released from
    /// the cache when no other listener uses that address.
    pub async fn acquire(
        &self,
        key: &SubscriptionKey,
        contract: Arc<ContractHandle>,
        event: &Event,
        sink: Arc<dyn EventSink>,
    ) -> Result<bool> {
        if self.is_live(key).await {
            debug!("Listener for {} already live, skipping attach", key);
            return Ok(false);
        }

        let listener = match self
            .provider
            .attach_listener(contract.clone(), event, sink)
            .await
        {
            Ok(listener) => listener,
            Err(e) => {
                ErrorContext::new(format!("attach_listener {}", key))
                    .with_severity(ErrorSeverity::Warning)
                    .log(&e);
                if !self.address_in_use(&key.address).await {
                    self.cache.release(&key.address).await;
                }
                return Err(e);
            }
        };

        let mut listeners = self.listeners.write().await;
        if listeners.contains_key(key) {
            // Lost a race with a concurrent acquire; keep the first listener.
            drop(listeners);
            warn!("Duplicate listener attached for {}, detaching it", key);
            self.detach(key, &contract, listener).await;
            return Ok(false);
        }

        listeners.insert(
            key.clone(),
            UpstreamListener {
                listener,
                contract,
                ref_count: 0,
            },
        );
        info!(
            "Upstream listener live for {} (active listeners: {})",
            key,
            listeners.len()
        );

        Ok(true)
    }

    pub async fn increment_ref(&self, key: &SubscriptionKey) -> Option<usize> {
        let mut listeners = self.listeners.write().await;
        match listeners.get_mut(key) {
            Some(entry) => {
                entry.ref_count += 1;
                debug!("Listener {} refcount -> {}", key, entry.ref_count);
                Some(entry.ref_count)
            }
            None => {
                warn!("increment_ref for {} without a live listener", key);
                None
            }
        }
    }

    /// Decrements the reference count. At zero the chain listener is detached
    /// and the local record removed regardless of the detach outcome.
    pub async fn decrement_ref(&self, key: &SubscriptionKey) -> Option<usize> {
        let removed = {
            let mut listeners = self.listeners.write().await;
            let Some(entry) = listeners.get_mut(key) else {
                warn!("decrement_ref for {} without a live listener", key);
                return None;
            };

            entry.ref_count = entry.ref_count.saturating_sub(1);
            debug!("Listener {} refcount -> {}", key, entry.ref_count);
            if entry.ref_count > 0 {
                return Some(entry.ref_count);
            }
            listeners.remove(key)
        };

        if let Some(entry) = removed {
            let UpstreamListener {
                listener, contract, ..
            } = entry;
            self.detach(key, &contract, listener).await;

            if !self.address_in_use(&key.address).await {
                self.cache.release(&key.address).await;
            }
        }

        Some(0)
    }

    pub async fn ref_count(&self, key: &SubscriptionKey) -> Option<usize> {
        self.listeners
            .read()
            .await
            .get(key)
            .map(UpstreamListener::ref_count)
    }

    pub async fn live_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    async fn address_in_use(&self, address: &str) -> bool {
        self.listeners
            .read()
            .await
            .keys()
            .any(|key| key.address == address)
    }

    async fn detach(&self, key: &SubscriptionKey, contract: &ContractHandle, listener: ListenerHandle) {
        match self
            .provider
            .detach_listener(contract, &key.event_name, listener)
            .await
        {
            Ok(()) => info!("Upstream listener for {} detached", key),
            Err(e) => {
                ErrorContext::new(format!("detach_listener {}", key))
                    .with_severity(ErrorSeverity::Warning)
                    .log(&e);
            }
        }
    }
}
