#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("ABI not found for address {address}")]
    AbiNotFound { address: String },

    #[error("Event '{event}' not found in ABI for {address}")]
    EventNotFoundInAbi { address: String, event: String },

    #[error("Failed to set up listener for {event} on {address}: {details}")]
    ListenerSetupFailed {
        address: String,
        event: String,
        details: String,
    },

    #[error("Invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("Malformed request payload: {0}")]
    MalformedRequestPayload(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Function '{0}' not found in ABI")]
    FunctionNotFound(String),

    #[error("Function '{0}' is not a view or pure function")]
    FunctionNotReadOnly(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Failed to decode {event} log: {details}")]
    Decode { event: String, details: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Client disconnected: {id}")]
    ClientDisconnected { id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<alloy::transports::TransportError> for ServerError {
    fn from(err: alloy::transports::TransportError) -> Self {
        ServerError::Rpc(err.to_string())
    }
}

impl ServerError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::AbiNotFound { .. } => "ABI_NOT_FOUND",
            ServerError::EventNotFoundInAbi { .. } => "EVENT_NOT_FOUND_IN_ABI",
            ServerError::ListenerSetupFailed { .. } => "LISTENER_SETUP_FAILED",
            ServerError::InvalidAbi(_) => "INVALID_ABI_STRUCTURE",
            ServerError::InvalidAddress(_) => "INVALID_ADDRESS",
            ServerError::MalformedRequestPayload(_) => "MALFORMED_REQUEST_PAYLOAD",
            ServerError::MalformedFrame(_) => "MALFORMED_FRAME",
            ServerError::FunctionNotFound(_) => "FUNCTION_NOT_FOUND",
            ServerError::FunctionNotReadOnly(_) => "FUNCTION_NOT_READ_ONLY",
            ServerError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            ServerError::Decode { .. } => "DECODE_FAILED",
            ServerError::Rpc(_) => "CONTRACT_INTERACTION_FAILED",
            ServerError::ClientDisconnected { .. } => "CLIENT_DISCONNECTED",
            ServerError::Config(_) => "CONFIGURATION_ERROR",
            ServerError::Serialization(_) => "SERIALIZATION_ERROR",
            ServerError::Io(_) | ServerError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Request-level errors leave shared state untouched and are reported back
    /// to the requesting client only.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::AbiNotFound { .. }
                | ServerError::EventNotFoundInAbi { .. }
                | ServerError::InvalidAbi(_)
                | ServerError::InvalidAddress(_)
                | ServerError::MalformedRequestPayload(_)
                | ServerError::MalformedFrame(_)
                | ServerError::FunctionNotFound(_)
                | ServerError::FunctionNotReadOnly(_)
                | ServerError::InvalidArguments(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

pub struct ErrorContext {
    pub operation: String,
    pub severity: ErrorSeverity,
}

#[derive(Debug, Clone, Copy)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            severity: ErrorSeverity::Error,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn log(&self, error: &ServerError) {
        use tracing::{error, info, warn};

        match self.severity {
            ErrorSeverity::Info => {
                info!("Operation '{}' info: {}", self.operation, error);
            }
            ErrorSeverity::Warning => {
                warn!("Operation '{}' warning: {}", self.operation, error);
            }
            ErrorSeverity::Error => {
                error!("Operation '{}' failed: {}", self.operation, error);
            }
        }
    }
}
