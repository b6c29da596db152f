//! Certchain Core - contract interaction on top of a [`NodeClient`].
//!
//! - [`TransactionPipeline`]: estimate, price, submit and confirm one call
//! - [`AccountSession`]: unlock a node-managed account for a scope
//! - [`MiningController`]: start and stop the node's miner on pending work
//! - [`ArtifactStore`]: compiled contract interfaces and payloads
//! - [`StorageContract`]: typed wrapper of the certificate storage contract
//!
//! [`NodeClient`]: certchain_rpc::NodeClient

pub mod abi;
pub mod address_file;
pub mod artifact;
pub mod contract;
pub mod error;
pub mod mining;
pub mod pipeline;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{ArtifactKey, ArtifactStore, ContractArtifact};
pub use contract::{StorageContract, STORAGE_CONTRACT};
pub use error::{AddressFileError, ArtifactError, MiningError, PipelineError, PipelineResult, Stage};
pub use mining::{MiningAction, MiningConfig, MiningController, MiningReport, MiningState};
pub use pipeline::{PipelineConfig, PipelineState, TransactionOutcome, TransactionPipeline};
pub use session::{AccountSession, DEFAULT_UNLOCK_DURATION};
