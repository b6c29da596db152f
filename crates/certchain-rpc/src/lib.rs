//! Certchain RPC - the node client seam.
//!
//! [`NodeClient`] is the set of node capabilities the transaction pipeline
//! and the mining controller rely on. [`HttpNodeClient`] implements it over
//! JSON-RPC (HTTP for requests, WebSocket for push subscriptions).

pub mod client;
pub mod error;
pub mod http;
pub mod subscriptions;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{ChainEvent, FilterKind, NodeClient, Subscription};
pub use error::{ErrorClass, RpcError, RpcResult};
pub use http::HttpNodeClient;
