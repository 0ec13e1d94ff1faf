use std::time::Duration;

/// JSON-RPC "parse error", used for payloads that do not match the declared result type.
pub const CODE_PARSE_ERROR: i64 = -32700;
/// JSON-RPC "invalid request", used for calls rejected before they are sent.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC "invalid params".
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "internal error". Gateway failures and transport faults map here.
pub const CODE_INTERNAL_ERROR: i64 = -32603;

/// Terminal failure of a single batch item.
///
/// Cloneable because a transport-level failure is broadcast to every item
/// that was still pending when the exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The payload did not match the result type declared by the call.
    #[error("failed to decode result: {0}")]
    Decode(String),

    /// The call itself is malformed, e.g. its method name is blank.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// The call parameters could not be encoded for the wire.
    #[error("failed to encode params: {0}")]
    Encode(String),

    /// The node or gateway answered with an error for this call.
    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },

    /// Network or protocol failure of the whole exchange.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The item was cancelled before a transport resolved it.
    #[error("call cancelled")]
    Cancelled,

    /// The server acknowledged the batch but never answered this id.
    #[error("no response for request id {id}")]
    ProtocolViolation { id: u32 },

    /// The transport was closed before the call was sent.
    #[error("transport is closed")]
    Closed,
}

impl RpcError {
    /// Error reported by the server with the JSON-RPC internal error code.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Remote {
            code: CODE_INTERNAL_ERROR,
            message: message.into(),
        }
    }

    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i64 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::Decode(_) => CODE_PARSE_ERROR,
            Self::InvalidCall(_) => CODE_INVALID_REQUEST,
            Self::Encode(_) => CODE_INVALID_PARAMS,
            Self::Transport(_) | Self::Cancelled | Self::ProtocolViolation { .. } | Self::Closed => {
                CODE_INTERNAL_ERROR
            }
        }
    }

    /// True when the failure came from the exchange as a whole rather than
    /// from this particular call.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}

/// Errors raised while configuring or tearing down transports.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection did not shut down within {0:?}")]
    CloseTimeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A result slot was completed twice. This always indicates a correlation bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("batch item {id} was already completed")]
    AlreadyCompleted { id: u32 },
}
