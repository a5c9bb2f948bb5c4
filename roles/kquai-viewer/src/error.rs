use quai_rpc::RpcError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Another fetch cycle is already running")]
    Busy,

    #[error("Series is empty; rebuild it before appending")]
    NotInitialized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
