use crate::error::{Result, ServerError};
use alloy::json_abi::{Event, Function, JsonAbi, StateMutability};
use serde_json::Value;
use std::sync::Arc;

/// A registered contract interface: the JSON as submitted plus its parsed form.
#[derive(Debug, Clone)]
pub struct AbiDescriptor {
    raw: Value,
    abi: Arc<JsonAbi>,
}

impl AbiDescriptor {
    /// Accepts either a JSON array or a string holding one.
    pub fn parse(value: &Value) -> Result<Self> {
        let raw = match value {
            Value::String(text) => serde_json::from_str::<Value>(text)
                .map_err(|e| ServerError::InvalidAbi(format!("ABI string is not JSON: {}", e)))?,
            other => other.clone(),
        };

        match raw.as_array() {
            Some(items) if !items.is_empty() => {}
            _ => {
                return Err(ServerError::MalformedRequestPayload(
                    "ABI must be a non-empty array.".to_string(),
                ))
            }
        }

        let abi: JsonAbi = serde_json::from_value(raw.clone())
            .map_err(|e| ServerError::InvalidAbi(e.to_string()))?;

        Ok(Self {
            raw,
            abi: Arc::new(abi),
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn abi(&self) -> Arc<JsonAbi> {
        self.abi.clone()
    }

    /// First declared overload of the named event.
    pub fn event(&self, name: &str) -> Option<&Event> {
        self.abi.event(name).and_then(|overloads| overloads.first())
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.event(name).is_some()
    }

    /// Zero-input view/pure function with the given name, if declared.
    pub fn read_only_getter(&self, name: &str) -> Option<&Function> {
        self.abi.function(name).and_then(|overloads| {
            overloads
                .iter()
                .find(|f| f.inputs.is_empty() && is_read_only(f))
        })
    }
}

pub fn is_read_only(function: &Function) -> bool {
    matches!(
        function.state_mutability,
        StateMutability::View | StateMutability::Pure
    )
}

#[cfg(test)]
pub(crate) fn erc20_abi() -> Value {
    serde_json::json!([
        {
            "type": "event",
            "name": "Transfer",
            "anonymous": false,
            "inputs": [
                { "name": "from", "type": "address", "indexed": true },
                { "name": "to", "type": "address", "indexed": true },
                { "name": "value", "type": "uint256", "indexed": false }
            ]
        },
        {
            "type": "event",
            "name": "Approval",
            "anonymous": false,
            "inputs": [
                { "name": "owner", "type": "address", "indexed": true },
                { "name": "spender", "type": "address", "indexed": true },
                { "name": "value", "type": "uint256", "indexed": false }
            ]
        },
        {
            "type": "function",
            "name": "name",
            "inputs": [],
            "outputs": [{ "name": "", "type": "string" }],
            "stateMutability": "view"
        },
        {
            "type": "function",
            "name": "decimals",
            "inputs": [],
            "outputs": [{ "name": "", "type": "uint8" }],
            "stateMutability": "view"
        },
        {
            "type": "function",
            "name": "balanceOf",
            "inputs": [{ "name": "account", "type": "address" }],
            "outputs": [{ "name": "", "type": "uint256" }],
            "stateMutability": "view"
        },
        {
            "type": "function",
            "name": "transfer",
            "inputs": [
                { "name": "to", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": [{ "name": "", "type": "bool" }],
            "stateMutability": "nonpayable"
        }
    ])
}
