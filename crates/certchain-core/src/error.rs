use certchain_rpc::RpcError;
use certchain_types::{Address, Hash};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::abi::AbiError;
use crate::pipeline::PipelineState;

/// Errors loading compiled contract artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact {key} not found")]
    NotFound { key: String },

    #[error("Artifact {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error("Invalid artifact key {0:?}, expected <source>:<Contract>")]
    InvalidKey(String),

    #[error("Cannot read artifact document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact document is not valid JSON: {0}")]
    Document(#[from] serde_json::Error),
}

/// Errors reading or writing the deployed-address file.
#[derive(Debug, Error)]
pub enum AddressFileError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not contain a contract address: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// The step of a transaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Accounts,
    Unlock,
    Encoding,
    Estimation,
    Pricing,
    Submission,
    Confirmation,
    Call,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Accounts => "accounts",
            Stage::Unlock => "unlock",
            Stage::Encoding => "encoding",
            Stage::Estimation => "estimation",
            Stage::Pricing => "pricing",
            Stage::Submission => "submission",
            Stage::Confirmation => "confirmation",
            Stage::Call => "call",
        };
        f.write_str(name)
    }
}

/// Reasons a transaction did not reach an outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to list node accounts: {0}")]
    Accounts(#[source] RpcError),

    #[error("Node manages no accounts")]
    NoAccounts,

    #[error("Account index {index} out of range, node manages {available}")]
    AccountIndex { index: usize, available: usize },

    #[error("Failed to unlock {address}: {reason}")]
    UnlockFailed { address: Address, reason: String },

    #[error("Gas estimation failed: {0}")]
    EstimationFailed(#[source] RpcError),

    #[error("Gas price query failed: {0}")]
    PricingFailed(#[source] RpcError),

    #[error("Submission failed after {attempts} attempt(s): {source}")]
    SubmissionFailed {
        attempts: u32,
        #[source]
        source: RpcError,
    },

    #[error("Receipt query for {hash} failed: {source}")]
    ConfirmationFailed {
        hash: Hash,
        #[source]
        source: RpcError,
    },

    #[error("No receipt for {hash} after {waited:?}")]
    ReceiptTimeout { hash: Hash, waited: Duration },

    #[error("Call failed: {0}")]
    CallFailed(#[source] RpcError),

    #[error("Gas plan was derived for a different call")]
    StalePlan,

    #[error("Step {action} not allowed in state {state}")]
    InvalidTransition { state: PipelineState, action: Stage },

    #[error("Receipt of creation {0} carries no contract address")]
    MissingContractAddress(Hash),

    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),
}

impl PipelineError {
    /// The step that failed.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Accounts(_)
            | PipelineError::NoAccounts
            | PipelineError::AccountIndex { .. } => Stage::Accounts,
            PipelineError::UnlockFailed { .. } => Stage::Unlock,
            PipelineError::Abi(_) => Stage::Encoding,
            PipelineError::EstimationFailed(_) => Stage::Estimation,
            PipelineError::PricingFailed(_) | PipelineError::StalePlan => Stage::Pricing,
            PipelineError::SubmissionFailed { .. } => Stage::Submission,
            PipelineError::InvalidTransition { action, .. } => *action,
            PipelineError::ConfirmationFailed { .. }
            | PipelineError::ReceiptTimeout { .. }
            | PipelineError::MissingContractAddress(_) => Stage::Confirmation,
            PipelineError::CallFailed(_) => Stage::Call,
        }
    }

    /// The underlying node error, if there is one.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            PipelineError::Accounts(e)
            | PipelineError::EstimationFailed(e)
            | PipelineError::PricingFailed(e)
            | PipelineError::CallFailed(e) => Some(e),
            PipelineError::SubmissionFailed { source, .. }
            | PipelineError::ConfirmationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors that end the mining controller.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Node error: {0}")]
    Rpc(#[from] RpcError),

    #[error("{kind} subscription lost after {attempts} resubscribe attempt(s)")]
    SubscriptionLost { kind: &'static str, attempts: u32 },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_failed_step() {
        let err = PipelineError::EstimationFailed(RpcError::node(-32000, "execution reverted"));
        assert_eq!(err.stage(), Stage::Estimation);
        assert_eq!(err.stage().to_string(), "estimation");

        let err = PipelineError::UnlockFailed {
            address: Address::ZERO,
            reason: "could not decrypt key with given password".into(),
        };
        assert_eq!(err.stage(), Stage::Unlock);
        assert!(err.rpc_error().is_none());
    }

    #[test]
    fn test_out_of_order_step_names_attempted_stage() {
        let err = PipelineError::InvalidTransition {
            state: PipelineState::Submitted,
            action: Stage::Pricing,
        };
        assert_eq!(err.stage(), Stage::Pricing);
        assert_eq!(err.to_string(), "Step pricing not allowed in state submitted");
        assert_eq!(PipelineError::StalePlan.stage(), Stage::Pricing);
    }

    #[test]
    fn test_submission_error_keeps_source() {
        let err = PipelineError::SubmissionFailed {
            attempts: 3,
            source: RpcError::Timeout("30s".into()),
        };
        assert!(err.rpc_error().unwrap().is_retryable());
        assert_eq!(
            err.to_string(),
            "Submission failed after 3 attempt(s): Timeout: 30s"
        );
    }
}
