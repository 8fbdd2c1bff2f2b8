pub mod abi;
pub mod frames;

pub use abi::AbiDescriptor;
pub use frames::{ClientRequest, EventData, ServerFrame, SubscriptionTarget};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ClientId = String;

/// Lowercases and trims a contract address so it can be used as a map key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Returns true if `address` is a 0x-prefixed 20-byte hex string.
pub fn is_valid_address(address: &str) -> bool {
    let address = address.trim();
    address.len() == 42 && address.starts_with("0x") && Address::from_str(address).is_ok()
}

/// Identifies one upstream event stream: (contract address, event name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub address: String,
    pub event_name: String,
}

impl SubscriptionKey {
    pub fn new(address: &str, event_name: &str) -> Self {
        Self {
            address: normalize_address(address),
            event_name: event_name.to_string(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.event_name)
    }
}
