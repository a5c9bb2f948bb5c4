//! JSON-RPC 2.0 client for a single Quai node.
//!
//! Provides single calls and id-correlated batches over HTTP POST, with
//! per-request timeouts, exponential backoff and size-limited batch slicing.
//! Big-integer quantities are decoded from `0x` hex into `BigUint`.

pub mod client;
pub mod error;
pub mod hex;
pub mod transport;
pub mod types;

pub use client::{missing_ids, RpcBatchClient, DEFAULT_BACKOFF_BASE};
pub use error::RpcError;
pub use transport::{HttpTransport, RpcTransport};
pub use types::{BatchResult, CallOptions, RequestId, RpcRequest};
