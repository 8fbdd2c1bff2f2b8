use crate::{
    domain::{
        frames::{
            SubscriptionFailure, SubscriptionStatus, STATUS_NOT_SUBSCRIBED, STATUS_SUBSCRIBED,
            STATUS_UNSUBSCRIBED,
        },
        EventData, ServerFrame, SubscriptionKey,
    },
    error::{ErrorContext, ErrorSeverity, Result, ServerError},
    relay::{
        directory::SubscriptionDirectory, gate::AddressGate, handle_cache::ContractHandleCache,
        registry::ListenerRegistry,
    },
    services::{decode::decode_event_args, AbiStore, ChainProvider, EventSink, RawEvent},
    websocket::ClientManager,
};
use alloy::{json_abi::Event, primitives::hex};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub connected_clients: usize,
    pub subscribed_clients: usize,
    pub subscription_keys: usize,
    pub live_listeners: usize,
    pub cached_handles: usize,
}

/// Multiplexes client subscriptions onto shared upstream listeners and fans
/// decoded events out to interested clients.
///
/// Reference counts follow directory membership transitions only, so repeated
/// subscribe requests from one client never inflate them.
pub struct EventRelay {
    me: Weak<EventRelay>,
    abi_store: Arc<dyn AbiStore>,
    provider: Arc<dyn ChainProvider>,
    clients: Arc<ClientManager>,
    directory: SubscriptionDirectory,
    cache: Arc<ContractHandleCache>,
    registry: ListenerRegistry,
    gate: AddressGate,
}

impl EventRelay {
    pub fn new(
        abi_store: Arc<dyn AbiStore>,
        provider: Arc<dyn ChainProvider>,
        clients: Arc<ClientManager>,
    ) -> Arc<Self> {
        let cache = Arc::new(ContractHandleCache::new());
        let registry = ListenerRegistry::new(provider.clone(), cache.clone());

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            abi_store,
            provider,
            clients,
            directory: SubscriptionDirectory::new(),
            cache,
            registry,
            gate: AddressGate::new(),
        })
    }

    pub fn directory(&self) -> &SubscriptionDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ContractHandleCache {
        &self.cache
    }

    pub async fn handle_subscribe_request(&self, client_id: &str, address: &str, event_name: &str) {
        let key = SubscriptionKey::new(address, event_name);

        let frame = match self.subscribe(client_id, &key).await {
            Ok(added) => {
                info!(
                    "Client {} subscribed to {}{}",
                    client_id,
                    key,
                    if added { "" } else { " (already subscribed)" }
                );
                ServerFrame::SubscriptionAck {
                    payload: SubscriptionStatus {
                        contract_address: key.address.clone(),
                        event_name: key.event_name.clone(),
                        status: STATUS_SUBSCRIBED.to_string(),
                    },
                }
            }
            Err(e) => {
                warn!("Subscribe {} for client {} failed: {}", key, client_id, e);
                ServerFrame::SubscriptionError {
                    payload: SubscriptionFailure {
                        contract_address: key.address.clone(),
                        event_name: key.event_name.clone(),
                        error: e.to_string(),
                    },
                }
            }
        };

        self.reply(client_id, &frame).await;
    }

    pub async fn handle_unsubscribe_request(
        &self,
        client_id: &str,
        address: &str,
        event_name: &str,
    ) {
        let key = SubscriptionKey::new(address, event_name);
        let present = self.unsubscribe(client_id, &key).await;

        let frame = ServerFrame::UnsubscriptionAck {
            payload: SubscriptionStatus {
                contract_address: key.address.clone(),
                event_name: key.event_name.clone(),
                status: if present {
                    STATUS_UNSUBSCRIBED
                } else {
                    STATUS_NOT_SUBSCRIBED
                }
                .to_string(),
            },
        };

        self.reply(client_id, &frame).await;
    }

    /// Registers interest of `client_id` in `key`. Returns `true` if this was a
    /// new (client, key) pair. On error no directory or registry state changes.
    pub async fn subscribe(&self, client_id: &str, key: &SubscriptionKey) -> Result<bool> {
        let abi = self
            .abi_store
            .get_abi(&key.address)
            .await
            .ok_or_else(|| ServerError::AbiNotFound {
                address: key.address.clone(),
            })?;

        let event = abi
            .event(&key.event_name)
            .cloned()
            .ok_or_else(|| ServerError::EventNotFoundInAbi {
                address: key.address.clone(),
                event: key.event_name.clone(),
            })?;

        let _guard = self.gate.lock(&key.address).await;

        if !self.registry.is_live(key).await {
            let handle = self
                .cache
                .get_or_create(&key.address, &abi, self.provider.as_ref())
                .await?;

            let sink = Arc::new(KeyDispatcher {
                relay: self.me.clone(),
                key: key.clone(),
                event: event.clone(),
            });
            self.registry.acquire(key, handle, &event, sink).await?;
        }

        let added = self.directory.add_interest(client_id, key).await;
        if added {
            self.registry.increment_ref(key).await;
        }

        Ok(added)
    }

    /// Removes interest of `client_id` in `key`. Returns whether the pair was
    /// present.
    pub async fn unsubscribe(&self, client_id: &str, key: &SubscriptionKey) -> bool {
        let _guard = self.gate.lock(&key.address).await;

        let present = self.directory.remove_interest(client_id, key).await;
        if present {
            self.registry.decrement_ref(key).await;
            info!("Client {} unsubscribed from {}", client_id, key);
        } else {
            debug!("Client {} was not subscribed to {}", client_id, key);
        }

        present
    }

    /// Unwinds every subscription of a departed client. Returns how many were
    /// removed.
    pub async fn handle_client_disconnect(&self, client_id: &str) -> usize {
        let keys = self.directory.client_keys(client_id).await;

        let mut removed = 0;
        for key in &keys {
            if self.unsubscribe(client_id, key).await {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                "Cleaned up {} subscriptions for disconnected client {}",
                removed, client_id
            );
        }

        removed
    }

    /// Decodes one upstream log and sends it to every client interested in
    /// `key`. Returns the number of clients the frame was queued for.
    pub async fn dispatch_upstream_event(
        &self,
        key: &SubscriptionKey,
        event: &Event,
        raw: RawEvent,
    ) -> usize {
        let recipients = self.directory.interested_clients(key).await;
        if recipients.is_empty() {
            debug!("Event for {} has no interested clients", key);
            return 0;
        }

        let args = match decode_event_args(event, &raw) {
            Ok(args) => args,
            Err(e) => {
                ErrorContext::new(format!("decode_event {}", key))
                    .with_severity(ErrorSeverity::Warning)
                    .log(&e);
                return 0;
            }
        };

        let frame = ServerFrame::EventData {
            payload: EventData {
                contract_address: key.address.clone(),
                event_name: key.event_name.clone(),
                args,
                block_number: raw.block_number,
                transaction_hash: raw.transaction_hash.map(hex::encode_prefixed),
                log_index: raw.log_index,
            },
        };

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                ErrorContext::new(format!("serialize_event {}", key)).log(&e);
                return 0;
            }
        };

        let mut delivered = 0;
        for client_id in &recipients {
            match self.clients.send_text(client_id, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Skipping {} for {}: {}", key, client_id, e),
            }
        }

        debug!(
            "Dispatched {} to {}/{} clients",
            key,
            delivered,
            recipients.len()
        );
        delivered
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            connected_clients: self.clients.get_client_count().await,
            subscribed_clients: self.directory.client_count().await,
            subscription_keys: self.directory.key_count().await,
            live_listeners: self.registry.live_count().await,
            cached_handles: self.cache.len().await,
        }
    }

    async fn reply(&self, client_id: &str, frame: &ServerFrame) {
        if let Err(e) = self.clients.send_frame(client_id, frame).await {
            ErrorContext::new(format!("reply to {}", client_id))
                .with_severity(ErrorSeverity::Info)
                .log(&e);
        }
    }
}

/// Listener callback bound to one subscription key.
struct KeyDispatcher {
    relay: Weak<EventRelay>,
    key: SubscriptionKey,
    event: Event,
}

#[async_trait]
impl EventSink for KeyDispatcher {
    async fn on_event(&self, event: RawEvent) {
        if let Some(relay) = self.relay.upgrade() {
            relay
                .dispatch_upstream_event(&self.key, &self.event, event)
                .await;
        }
    }
}
