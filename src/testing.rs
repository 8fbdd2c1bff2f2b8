//! Test doubles for the chain provider and shared fixtures.

use crate::{
    domain::{abi::erc20_abi, normalize_address, AbiDescriptor},
    error::{Result, ServerError},
    services::{ChainProvider, ContractHandle, EventSink, ListenerHandle, RawEvent},
};
use alloy::{
    dyn_abi::DynSolValue,
    json_abi::{Event, Function},
    primitives::{Address, Bytes, B256, U256},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn on_event(&self, _event: RawEvent) {}
}

/// Scripted chain provider: records every call and lets tests fire events
/// into attached sinks.
#[derive(Default)]
pub struct MockChainProvider {
    sinks: Mutex<HashMap<(String, String), Arc<dyn EventSink>>>,
    selectors: Mutex<HashMap<(String, String), B256>>,
    call_results: Mutex<HashMap<[u8; 4], Bytes>>,
    attach_delay: Mutex<Option<Duration>>,
    fail_attach: AtomicBool,
    fail_detach: AtomicBool,
    fail_block_number: AtomicBool,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    handles_made: AtomicUsize,
    calls: AtomicUsize,
}

impl MockChainProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attach_delay(self, delay: Duration) -> Self {
        *self.attach_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_detach(&self, fail: bool) {
        self.fail_detach.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_block_number(&self, fail: bool) {
        self.fail_block_number.store(fail, Ordering::SeqCst);
    }

    /// Makes `eth_call` for `function` return `output` ABI-encoded.
    pub fn set_call_result(&self, function: &Function, output: DynSolValue) {
        self.call_results
            .lock()
            .unwrap()
            .insert(function.selector().0, Bytes::from(output.abi_encode_params()));
    }

    pub fn attach_count(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }

    pub fn handles_made(&self) -> usize {
        self.handles_made.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self, address: &str, event_name: &str) -> bool {
        self.sinks
            .lock()
            .unwrap()
            .contains_key(&(normalize_address(address), event_name.to_string()))
    }

    /// Topic0 the listener for (address, event name) was attached with.
    pub fn attached_selector(&self, address: &str, event_name: &str) -> Option<B256> {
        self.selectors
            .lock()
            .unwrap()
            .get(&(normalize_address(address), event_name.to_string()))
            .copied()
    }

    pub fn attached_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Delivers `event` to the sink attached for (address, event name).
    /// Returns `false` if nothing is attached.
    pub async fn fire(&self, address: &str, event_name: &str, event: RawEvent) -> bool {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .get(&(normalize_address(address), event_name.to_string()))
            .cloned();

        match sink {
            Some(sink) => {
                sink.on_event(event).await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    async fn block_number(&self) -> Result<u64> {
        if self.fail_block_number.load(Ordering::SeqCst) {
            return Err(ServerError::Rpc("connection refused".to_string()));
        }
        Ok(1234)
    }

    fn make_contract_handle(&self, address: &str, abi: &AbiDescriptor) -> Result<ContractHandle> {
        self.handles_made.fetch_add(1, Ordering::SeqCst);
        ContractHandle::new(address, abi)
    }

    async fn attach_listener(
        &self,
        handle: Arc<ContractHandle>,
        event: &Event,
        sink: Arc<dyn EventSink>,
    ) -> Result<ListenerHandle> {
        let event_name = event.name.as_str();
        self.attach_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.attach_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(ServerError::ListenerSetupFailed {
                address: handle.key_address().to_string(),
                event: event_name.to_string(),
                details: "upstream rejected the filter".to_string(),
            });
        }

        let key = (handle.key_address().to_string(), event_name.to_string());
        self.selectors.lock().unwrap().insert(key.clone(), event.selector());
        self.sinks.lock().unwrap().insert(key, sink);
        Ok(ListenerHandle::new())
    }

    async fn detach_listener(
        &self,
        handle: &ContractHandle,
        event_name: &str,
        _listener: ListenerHandle,
    ) -> Result<()> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(ServerError::Rpc("detach rejected".to_string()));
        }

        self.sinks
            .lock()
            .unwrap()
            .remove(&(handle.key_address().to_string(), event_name.to_string()));
        Ok(())
    }

    async fn call(&self, _handle: &ContractHandle, calldata: Bytes) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut selector = [0u8; 4];
        if calldata.len() >= 4 {
            selector.copy_from_slice(&calldata[..4]);
        }

        self.call_results
            .lock()
            .unwrap()
            .get(&selector)
            .cloned()
            .ok_or_else(|| ServerError::Rpc("execution reverted".to_string()))
    }
}

pub fn erc20_descriptor() -> AbiDescriptor {
    AbiDescriptor::parse(&erc20_abi()).unwrap()
}

/// A `Transfer(from, to, value)` log as the ERC-20 ABI encodes it.
pub fn transfer_event(from: Address, to: Address, value: U256) -> RawEvent {
    let selector = erc20_descriptor().event("Transfer").unwrap().selector();
    RawEvent {
        topics: vec![selector, from.into_word(), to.into_word()],
        data: Bytes::from(value.to_be_bytes::<32>().to_vec()),
        block_number: Some(100),
        transaction_hash: Some(B256::repeat_byte(0xab)),
        log_index: Some(0),
    }
}

/// An `Approval(owner, spender, value)` log.
pub fn approval_event(owner: Address, spender: Address, value: U256) -> RawEvent {
    let selector = erc20_descriptor().event("Approval").unwrap().selector();
    RawEvent {
        topics: vec![selector, owner.into_word(), spender.into_word()],
        data: Bytes::from(value.to_be_bytes::<32>().to_vec()),
        block_number: Some(101),
        transaction_hash: Some(B256::repeat_byte(0xcd)),
        log_index: Some(1),
    }
}
