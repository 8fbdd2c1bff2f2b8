use crate::{
    config::ChainConfig,
    domain::{AbiDescriptor, SubscriptionKey},
    error::{ErrorContext, ErrorSeverity, Result, ServerError},
};
use alloy::{
    json_abi::{Event, Function, JsonAbi},
    primitives::{Address, Bytes, B256},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log, TransactionInput, TransactionRequest},
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// A log as delivered by an upstream listener, before ABI decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl From<&Log> for RawEvent {
    fn from(log: &Log) -> Self {
        Self {
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Interaction object bound to one contract address and its ABI.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    address: Address,
    key_address: String,
    abi: Arc<JsonAbi>,
}

impl ContractHandle {
    pub fn new(address: &str, abi: &AbiDescriptor) -> Result<Self> {
        let parsed = Address::from_str(address.trim())
            .map_err(|e| ServerError::InvalidAddress(format!("{}: {}", address, e)))?;

        let abi = abi.abi();
        if abi.is_empty() {
            return Err(ServerError::InvalidAbi("ABI declares no items".to_string()));
        }

        Ok(Self {
            address: parsed,
            key_address: crate::domain::normalize_address(address),
            abi,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lowercase address, as used in subscription keys.
    pub fn key_address(&self) -> &str {
        &self.key_address
    }

    pub fn functions(&self, name: &str) -> &[Function] {
        self.abi.function(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Callback invoked by an upstream listener for every matching log.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: RawEvent);
}

/// Token for one attached upstream listener. Dropping it stops any polling
/// task it owns.
#[derive(Debug)]
pub struct ListenerHandle {
    id: Uuid,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            task: None,
        }
    }

    pub fn with_task(task: JoinHandle<()>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: Some(task),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for ListenerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    fn make_contract_handle(&self, address: &str, abi: &AbiDescriptor) -> Result<ContractHandle> {
        ContractHandle::new(address, abi)
    }

    /// Starts delivering logs of `event` emitted by the handle's contract.
    /// The event comes from the caller, not the handle's own ABI.
    async fn attach_listener(
        &self,
        handle: Arc<ContractHandle>,
        event: &Event,
        sink: Arc<dyn EventSink>,
    ) -> Result<ListenerHandle>;

    async fn detach_listener(
        &self,
        handle: &ContractHandle,
        event_name: &str,
        listener: ListenerHandle,
    ) -> Result<()>;

    /// Read-only `eth_call` against the contract.
    async fn call(&self, handle: &ContractHandle, calldata: Bytes) -> Result<Bytes>;
}

pub struct AlloyChainProvider {
    provider: Arc<RootProvider<Http<Client>>>,
    poll_interval: Duration,
    max_block_range: u64,
}

impl AlloyChainProvider {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid RPC URL: {}", e)))?;

        Ok(Self {
            provider: Arc::new(RootProvider::<Http<Client>>::new_http(url)),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_block_range: config.max_block_range.max(1),
        })
    }
}

fn setup_failed(handle: &ContractHandle, event_name: &str, details: impl Into<String>) -> ServerError {
    ServerError::ListenerSetupFailed {
        address: handle.key_address().to_string(),
        event: event_name.to_string(),
        details: details.into(),
    }
}

#[async_trait]
impl ChainProvider for AlloyChainProvider {
    async fn block_number(&self) -> Result<u64> {
        let block_number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ServerError::Rpc(format!("Failed to get block number: {}", e)))?;

        Ok(block_number)
    }

    async fn attach_listener(
        &self,
        handle: Arc<ContractHandle>,
        event: &Event,
        sink: Arc<dyn EventSink>,
    ) -> Result<ListenerHandle> {
        let event_name = event.name.as_str();

        if event.anonymous {
            return Err(setup_failed(
                &handle,
                event_name,
                "anonymous events have no selector to filter on",
            ));
        }

        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| setup_failed(&handle, event_name, e.to_string()))?;

        let poller = LogPoller {
            provider: self.provider.clone(),
            key: SubscriptionKey::new(handle.key_address(), event_name),
            address: handle.address(),
            selector: event.selector(),
            next_block: head + 1,
            poll_interval: self.poll_interval,
            max_block_range: self.max_block_range,
            sink,
        };

        info!(
            "Attached upstream listener for {} starting after block {}",
            poller.key, head
        );

        Ok(ListenerHandle::with_task(tokio::spawn(poller.run())))
    }

    async fn detach_listener(
        &self,
        handle: &ContractHandle,
        event_name: &str,
        listener: ListenerHandle,
    ) -> Result<()> {
        let id = listener.id();
        drop(listener);
        info!(
            "Detached upstream listener {} for {}:{}",
            id,
            handle.key_address(),
            event_name
        );
        Ok(())
    }

    async fn call(&self, handle: &ContractHandle, calldata: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .to(handle.address())
            .input(TransactionInput::new(calldata));

        let output = self.provider.call(&tx).await?;
        Ok(output)
    }
}

/// Polls `eth_getLogs` for one (address, event) pair and feeds the sink in
/// block order.
struct LogPoller {
    provider: Arc<RootProvider<Http<Client>>>,
    key: SubscriptionKey,
    address: Address,
    selector: B256,
    next_block: u64,
    poll_interval: Duration,
    max_block_range: u64,
    sink: Arc<dyn EventSink>,
}

impl LogPoller {
    async fn run(mut self) {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = self.poll_once().await {
                ErrorContext::new(format!("poll_logs {}", self.key))
                    .with_severity(ErrorSeverity::Warning)
                    .log(&e);
            }
        }
    }

    async fn poll_once(&mut self) -> Result<()> {
        let latest = self.provider.get_block_number().await?;
        if latest < self.next_block {
            trace!("No new blocks for {} (head {})", self.key, latest);
            return Ok(());
        }

        let to_block = latest.min(self.next_block + self.max_block_range - 1);
        let filter = Filter::new()
            .address(self.address)
            .event_signature(self.selector)
            .from_block(self.next_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await?;
        debug!(
            "Fetched {} logs for {} in blocks {}..={}",
            logs.len(),
            self.key,
            self.next_block,
            to_block
        );

        for log in logs.iter().filter(|log| !log.removed) {
            self.sink.on_event(RawEvent::from(log)).await;
        }

        self.next_block = to_block + 1;
        Ok(())
    }
}
