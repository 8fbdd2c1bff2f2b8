use crate::domain::{is_valid_address, normalize_address};
use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_SUBSCRIBED: &str = "subscribed";
pub const STATUS_UNSUBSCRIBED: &str = "unsubscribed";
pub const STATUS_NOT_SUBSCRIBED: &str = "not_subscribed_or_already_removed";

/// Frames pushed from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "connection_ack")]
    ConnectionAck { message: String },

    #[serde(rename = "SUBSCRIPTION_ACK")]
    SubscriptionAck { payload: SubscriptionStatus },

    #[serde(rename = "SUBSCRIPTION_ERROR")]
    SubscriptionError { payload: SubscriptionFailure },

    #[serde(rename = "UNSUBSCRIPTION_ACK")]
    UnsubscriptionAck { payload: SubscriptionStatus },

    #[serde(rename = "EVENT_DATA")]
    EventData { payload: EventData },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "message_ack")]
    MessageAck {
        info: String,
        #[serde(rename = "receivedType")]
        received_type: String,
    },
}

impl ServerFrame {
    pub fn connection_ack() -> Self {
        ServerFrame::ConnectionAck {
            message: "Connected to contract event relay".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn unknown_type(received_type: impl Into<String>) -> Self {
        ServerFrame::MessageAck {
            info: "Unknown type.".to_string(),
            received_type: received_type.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub contract_address: String,
    pub event_name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFailure {
    pub contract_address: String,
    pub event_name: String,
    pub error: String,
}

/// One decoded upstream event as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub contract_address: String,
    pub event_name: String,
    pub args: Map<String, Value>,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub contract_address: String,
    pub event_name: String,
}

/// A request the session routes to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Subscribe(SubscriptionTarget),
    Unsubscribe(SubscriptionTarget),
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientRequest {
    /// Parses an inbound text frame. JSON syntax errors are reported as
    /// `MalformedFrame` with the exact message the client sees.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| ServerError::MalformedFrame("Invalid JSON.".to_string()))?;

        let frame: InboundFrame = serde_json::from_value(value)
            .map_err(|_| ServerError::MalformedFrame("Invalid message format.".to_string()))?;

        match frame.kind.as_str() {
            "SUBSCRIBE" => Ok(ClientRequest::Subscribe(parse_target(
                "SUBSCRIBE",
                &frame.payload,
            )?)),
            "UNSUBSCRIBE" => Ok(ClientRequest::Unsubscribe(parse_target(
                "UNSUBSCRIBE",
                &frame.payload,
            )?)),
            _ => Ok(ClientRequest::Unknown(frame.kind)),
        }
    }
}

fn parse_target(kind: &str, payload: &Value) -> Result<SubscriptionTarget> {
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let (Some(address), Some(event_name)) = (field("contractAddress"), field("eventName")) else {
        return Err(ServerError::MalformedRequestPayload(format!(
            "{} requires payload.contractAddress and payload.eventName.",
            kind
        )));
    };

    if !is_valid_address(address) {
        return Err(ServerError::MalformedRequestPayload(format!(
            "Invalid contract address: {}",
            address
        )));
    }

    Ok(SubscriptionTarget {
        contract_address: normalize_address(address),
        event_name: event_name.to_string(),
    })
}
