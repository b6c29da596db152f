//! Typed access to the certificate `Storage` contract.
//!
//! ```text
//! storeKey(string id, string key)
//! retrieveKey(string id) -> string
//! hasWritePrivilege(address account) -> bool
//! ```

use certchain_rpc::NodeClient;
use certchain_types::{Address, PendingCall};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::abi::{AbiError, Token};
use crate::artifact::ContractArtifact;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{PipelineConfig, TransactionOutcome, TransactionPipeline};
use crate::session::AccountSession;

/// Artifact key of the contract, as solc names it.
pub const STORAGE_CONTRACT: &str = "contract.sol:Storage";

const STORE_KEY: &str = "storeKey";
const RETRIEVE_KEY: &str = "retrieveKey";
const HAS_WRITE_PRIVILEGE: &str = "hasWritePrivilege";

/// A deployed `Storage` contract.
pub struct StorageContract<C: NodeClient + ?Sized + 'static> {
    client: Arc<C>,
    artifact: Arc<ContractArtifact>,
    address: Address,
    config: PipelineConfig,
}

impl<C: NodeClient + ?Sized + 'static> StorageContract<C> {
    /// Bind to a contract already deployed at `address`.
    pub fn at(
        client: Arc<C>,
        artifact: Arc<ContractArtifact>,
        address: Address,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client,
            artifact,
            address,
            config,
        }
    }

    /// Deploy a new instance from `sender`.
    ///
    /// Yields `Deployed` with the new address, or `Sent { success: false }`
    /// if the creation reverted.
    pub async fn deploy(
        client: Arc<C>,
        artifact: &ContractArtifact,
        config: &PipelineConfig,
        session: &AccountSession<C>,
        sender: Address,
        passphrase: &Zeroizing<String>,
    ) -> PipelineResult<TransactionOutcome> {
        let payload = artifact.creation_payload(&[])?;
        let call = PendingCall::deploy(sender, payload);

        session
            .with_unlocked_account(sender, passphrase, |_| {
                let mut pipeline = TransactionPipeline::new(client, call, config.clone());
                async move { pipeline.run().await }
            })
            .await
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn artifact(&self) -> &ContractArtifact {
        &self.artifact
    }

    /// Whether `account` may store keys. Evaluated as `caller`.
    pub async fn has_write_privilege(&self, caller: Address, account: Address) -> PipelineResult<bool> {
        let token = self
            .query(caller, HAS_WRITE_PRIVILEGE, &[Token::Address(account)])
            .await?;
        Ok(token.into_bool()?)
    }

    /// Store `key` under `id`. A reverted transaction is returned as
    /// `Sent { success: false }`.
    pub async fn store_key(
        &self,
        session: &AccountSession<C>,
        sender: Address,
        passphrase: &Zeroizing<String>,
        id: &str,
        key: &str,
    ) -> PipelineResult<TransactionOutcome> {
        let data = self.artifact.interface().encode_call(
            STORE_KEY,
            &[Token::String(id.to_string()), Token::String(key.to_string())],
        )?;
        let call = PendingCall::method(sender, self.address, STORE_KEY, data);

        session
            .with_unlocked_account(sender, passphrase, |_| {
                let mut pipeline =
                    TransactionPipeline::new(self.client.clone(), call, self.config.clone());
                async move { pipeline.run().await }
            })
            .await
    }

    /// Key stored under `id`, evaluated as `caller`.
    pub async fn retrieve_key(&self, caller: Address, id: &str) -> PipelineResult<String> {
        let token = self
            .query(caller, RETRIEVE_KEY, &[Token::String(id.to_string())])
            .await?;
        Ok(token.into_string()?)
    }

    async fn query(&self, caller: Address, method: &str, args: &[Token]) -> PipelineResult<Token> {
        let interface = self.artifact.interface();
        let data = interface.encode_call(method, args)?;
        let call = PendingCall::method(caller, self.address, method, data);

        let mut pipeline = TransactionPipeline::new(self.client.clone(), call, self.config.clone());
        let TransactionOutcome::CallResult { value } = pipeline.query().await? else {
            return Err(PipelineError::Abi(AbiError::Truncated));
        };
        debug!(method, bytes = value.len(), "decoding call result");

        interface
            .decode_output(method, &value)?
            .into_iter()
            .next()
            .ok_or(PipelineError::Abi(AbiError::Truncated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DEFAULT_UNLOCK_DURATION;
    use crate::testing::{emulate_storage, storage_artifact};
    use certchain_rpc::mock::{MockNode, NodeCall};
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            receipt_poll_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn contract(node: &Arc<MockNode>) -> StorageContract<MockNode> {
        StorageContract::at(
            node.clone(),
            storage_artifact(),
            MockNode::DEFAULT_CONTRACT,
            config(),
        )
    }

    #[tokio::test]
    async fn test_deploy_sends_creation_payload() {
        let node = Arc::new(MockNode::new());
        let session = AccountSession::new(node.clone(), DEFAULT_UNLOCK_DURATION);

        let outcome = StorageContract::deploy(
            node.clone(),
            &storage_artifact(),
            &config(),
            &session,
            MockNode::DEFAULT_ACCOUNT,
            &Zeroizing::new(String::new()),
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            TransactionOutcome::Deployed { address, .. } if address == MockNode::DEFAULT_CONTRACT
        ));
        assert_eq!(node.count(|c| matches!(c, NodeCall::Send { label, .. } if label == "deploy")), 1);
    }

    #[tokio::test]
    async fn test_write_privilege_query() {
        let node = Arc::new(MockNode::new());
        emulate_storage(&node, MockNode::DEFAULT_ACCOUNT);
        let contract = contract(&node);

        let caller = MockNode::DEFAULT_ACCOUNT;
        assert!(contract.has_write_privilege(caller, caller).await.unwrap());
        assert!(!contract
            .has_write_privilege(caller, Address::from_bytes([0x42; 20]))
            .await
            .unwrap());

        // reads go through eth_call only
        assert_eq!(node.sends(), 0);
        assert_eq!(node.count(|c| matches!(c, NodeCall::EstimateGas { .. })), 0);
    }

    #[tokio::test]
    async fn test_store_key_unlocks_and_sends() {
        let node = Arc::new(MockNode::new());
        let keys = emulate_storage(&node, MockNode::DEFAULT_ACCOUNT);
        let contract = contract(&node);
        let session = AccountSession::new(node.clone(), DEFAULT_UNLOCK_DURATION);

        let outcome = contract
            .store_key(
                &session,
                MockNode::DEFAULT_ACCOUNT,
                &Zeroizing::new(String::new()),
                "cert-1",
                "abc123",
            )
            .await
            .unwrap();

        assert!(matches!(outcome, TransactionOutcome::Sent { success: true, .. }));
        assert_eq!(keys.lock().get("cert-1").map(String::as_str), Some("abc123"));

        let calls = node.calls();
        assert!(matches!(calls.first(), Some(NodeCall::Unlock { .. })));
        assert!(matches!(calls.last(), Some(NodeCall::Lock { .. })));
    }

    #[tokio::test]
    async fn test_empty_return_data() {
        let node = Arc::new(MockNode::new());
        let err = contract(&node)
            .retrieve_key(MockNode::DEFAULT_ACCOUNT, "cert-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Abi(AbiError::Truncated)));
    }
}
