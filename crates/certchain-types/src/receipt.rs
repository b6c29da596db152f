use crate::address::Address;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// The node's record of a transaction's inclusion and execution outcome.
///
/// Decoded from `eth_getTransactionReceipt`. Inclusion does not imply
/// success: check [`TransactionReceipt::succeeded`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Hash of the transaction
    pub transaction_hash: Hash,
    /// Hash of the block containing this TX
    pub block_hash: Hash,
    /// Number of the block containing this TX
    #[serde(with = "crate::serialization::quantity_u64")]
    pub block_number: u64,
    /// Address of the sender
    pub from: Address,
    /// Address of the recipient (None for contract creation)
    #[serde(default)]
    pub to: Option<Address>,
    /// Address of created contract (if contract creation)
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// Gas used by this transaction
    #[serde(with = "crate::serialization::quantity_u64")]
    pub gas_used: u64,
    /// Execution status, 1 = success, 0 = reverted. Absent on pre-Byzantium receipts.
    #[serde(default, with = "crate::serialization::option_quantity_u64")]
    pub status: Option<u64>,
}

impl TransactionReceipt {
    /// Whether execution succeeded. A receipt without a status field is not
    /// treated as a success.
    pub fn succeeded(&self) -> bool {
        self.status == Some(1)
    }

    /// Check if this receipt is for a contract creation
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}
