use crate::lsp::protocol::JsonRpcError;
use thiserror::Error;

/// Errors talking to the editor
#[derive(Error, Debug)]
pub enum LspError {
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("Unexpected response to {method}: {reason}")]
    UnexpectedResponse { method: String, reason: String },
}

impl LspError {
    /// The client did not answer within the request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, LspError::JsonRpc(JsonRpcError::Timeout))
    }
}
