//! Certchain Types - Core value types shared across the certchain crates.
//!
//! This crate provides:
//! - Addresses (20-byte, `0x` hex encoded)
//! - Hashes (32-byte transaction/block hashes, keccak digests)
//! - Hex quantity codec used by the node's JSON-RPC interface
//! - Pending calls and gas plans
//! - Transaction receipts

pub mod address;
pub mod hash;
pub mod quantity;
pub mod call;
pub mod receipt;
pub mod error;

mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use call::{GasPlan, PendingCall};
pub use receipt::TransactionReceipt;
pub use error::TypesError;
