use crate::{
    domain::{normalize_address, AbiDescriptor},
    error::Result,
    services::{ChainProvider, ContractHandle},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One live contract handle per address, shared by every listener on it.
#[derive(Default)]
pub struct ContractHandleCache {
    handles: RwLock<HashMap<String, Arc<ContractHandle>>>,
}

impl ContractHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(
        &self,
        address: &str,
        abi: &AbiDescriptor,
        provider: &dyn ChainProvider,
    ) -> Result<Arc<ContractHandle>> {
        let address = normalize_address(address);

        if let Some(handle) = self.handles.read().await.get(&address) {
            return Ok(handle.clone());
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(&address) {
            return Ok(handle.clone());
        }

        let handle = Arc::new(provider.make_contract_handle(&address, abi)?);
        handles.insert(address.clone(), handle.clone());
        debug!("Created contract handle for {} (cached: {})", address, handles.len());

        Ok(handle)
    }

    /// Drops the cached handle. No-op if nothing is cached.
    pub async fn release(&self, address: &str) -> bool {
        let address = normalize_address(address);
        let released = self.handles.write().await.remove(&address).is_some();
        if released {
            debug!("Released contract handle for {}", address);
        }
        released
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.handles
            .read()
            .await
            .contains_key(&normalize_address(address))
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
