//! JSON-RPC error codes and their mapping from engine rejections.

use thiserror::Error;

use utxod_consensus::TransactionError;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("method not found")]
    MethodNotFound,
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("transaction rejected: {0}")]
    TxRejected(#[from] TransactionError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// The numeric `error.code` field, loosely following the JSON-RPC 2.0
    /// reserved ranges.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::MethodNotFound => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::TxRejected(_) => -26,
            RpcError::Internal(_) => -32603,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code(), "message": self.to_string() })
    }
}
