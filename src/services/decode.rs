use crate::{
    error::{Result, ServerError},
    services::chain::RawEvent,
};
use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    json_abi::Event,
    primitives::hex,
};
use serde_json::{Map, Value};

/// Renders an ABI value as JSON. Integers of every width become decimal
/// strings so that values beyond 2^53 survive text serialization exactly.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word.as_slice()[..*size]))
        }
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Function(function) => Value::String(hex::encode_prefixed(function.0)),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{:?}", other)),
    }
}

/// Decodes a log into a mapping of parameter name to value. Unnamed
/// parameters are keyed `arg{position}`.
pub fn decode_event_args(event: &Event, raw: &RawEvent) -> Result<Map<String, Value>> {
    let decoded = event
        .decode_log_parts(raw.topics.iter().copied(), &raw.data, true)
        .map_err(|e| ServerError::Decode {
            event: event.name.clone(),
            details: e.to_string(),
        })?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Map::new();

    for (position, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };

        let Some(value) = value else {
            return Err(ServerError::Decode {
                event: event.name.clone(),
                details: format!("missing value for parameter {}", position),
            });
        };

        let name = if input.name.is_empty() {
            format!("arg{}", position)
        } else {
            input.name.clone()
        };
        args.insert(name, value_to_json(&value));
    }

    Ok(args)
}
