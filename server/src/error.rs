use thiserror::Error;
use tts_core::TtsError;

use crate::protocol::{ErrorObject, HANDLER_ERROR, METHOD_NOT_FOUND, PARSE_ERROR};

/// Failures reported back to the caller as a JSON-RPC error object.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error(transparent)]
    Handler(#[from] TtsError),

    #[error("{0}")]
    Internal(String),
}

impl RpcError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RpcError::InvalidParams(msg.into())
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => PARSE_ERROR,
            RpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) | RpcError::Handler(_) | RpcError::Internal(_) => {
                HANDLER_ERROR
            }
        }
    }

    /// Log the failure on the diagnostic channel and build the wire object.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            RpcError::Parse(msg) => tracing::warn!("Rejected frame: {}", msg),
            RpcError::MethodNotFound(method) => tracing::warn!("Unknown method: {}", method),
            RpcError::InvalidParams(msg) => tracing::warn!("Invalid params: {}", msg),
            RpcError::Handler(e) => tracing::error!("Handler error: {:?}", e),
            RpcError::Internal(msg) => tracing::error!("Internal error: {}", msg),
        }

        ErrorObject {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Internal(format!("Could not encode result: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(RpcError::Parse("x".into()).code(), -32700);
        assert_eq!(RpcError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(RpcError::invalid("x").code(), -32000);
        assert_eq!(RpcError::from(TtsError::NoModelLoaded).code(), -32000);
    }

    #[test]
    fn test_handler_message_is_passed_through() {
        let obj = RpcError::from(TtsError::invalid("Unknown model_id: nope")).to_error_object();
        assert_eq!(obj.message, "Unknown model_id: nope");

        let obj = RpcError::MethodNotFound("sing".into()).to_error_object();
        assert_eq!(obj.message, "Method not found: sing");
    }
}
