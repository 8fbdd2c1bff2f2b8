use crate::{
    domain::{normalize_address, AbiDescriptor},
    error::Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Persistence boundary for registered contract ABIs, keyed by lowercase
/// address.
#[async_trait]
pub trait AbiStore: Send + Sync {
    async fn get_abi(&self, address: &str) -> Option<Arc<AbiDescriptor>>;

    async fn put_abi(&self, address: &str, abi: AbiDescriptor) -> Result<()>;

    async fn addresses(&self) -> Vec<String>;
}

#[derive(Default)]
pub struct InMemoryAbiStore {
    abis: RwLock<HashMap<String, Arc<AbiDescriptor>>>,
}

impl InMemoryAbiStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AbiStore for InMemoryAbiStore {
    async fn get_abi(&self, address: &str) -> Option<Arc<AbiDescriptor>> {
        self.abis.read().await.get(&normalize_address(address)).cloned()
    }

    async fn put_abi(&self, address: &str, abi: AbiDescriptor) -> Result<()> {
        let address = normalize_address(address);
        let mut abis = self.abis.write().await;
        let replaced = abis.insert(address.clone(), Arc::new(abi)).is_some();
        info!(
            "Stored ABI for {}{} (total: {})",
            address,
            if replaced { " (replaced)" } else { "" },
            abis.len()
        );
        Ok(())
    }

    async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.abis.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}
