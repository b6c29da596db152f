//! Scoped account unlocking.
//!
//! Signing is delegated to the node, so an account must be unlocked before a
//! transaction is sent from it. [`AccountSession::with_unlocked_account`]
//! keeps the unlocked window as short as the work inside it: the account is
//! locked again when the scope ends, whether it succeeded, failed or was
//! cancelled.

use certchain_rpc::NodeClient;
use certchain_types::Address;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{PipelineError, PipelineResult};

/// Default upper bound of an unlock, enforced by the node.
pub const DEFAULT_UNLOCK_DURATION: Duration = Duration::from_secs(120);

/// Unlocks node-managed accounts for the duration of a scope.
pub struct AccountSession<C: NodeClient + ?Sized + 'static> {
    client: Arc<C>,
    unlock_duration: Duration,
}

impl<C: NodeClient + ?Sized + 'static> AccountSession<C> {
    pub fn new(client: Arc<C>, unlock_duration: Duration) -> Self {
        Self {
            client,
            unlock_duration,
        }
    }

    pub fn unlock_duration(&self) -> Duration {
        self.unlock_duration
    }

    /// Pick the node account at `index`.
    pub async fn resolve_sender(&self, index: usize) -> PipelineResult<Address> {
        let accounts = self
            .client
            .list_accounts()
            .await
            .map_err(PipelineError::Accounts)?;

        if accounts.is_empty() {
            return Err(PipelineError::NoAccounts);
        }
        accounts
            .get(index)
            .copied()
            .ok_or(PipelineError::AccountIndex {
                index,
                available: accounts.len(),
            })
    }

    /// Run `work` with `address` unlocked.
    ///
    /// `work` never runs if the unlock fails. The account is locked again
    /// afterwards; a failed lock is logged and does not change the result.
    pub async fn with_unlocked_account<F, Fut, T>(
        &self,
        address: Address,
        passphrase: &Zeroizing<String>,
        work: F,
    ) -> PipelineResult<T>
    where
        F: FnOnce(Address) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        match self
            .client
            .unlock_account(address, passphrase.as_str(), self.unlock_duration)
            .await
        {
            Ok(true) => debug!(%address, "account unlocked"),
            Ok(false) => {
                return Err(PipelineError::UnlockFailed {
                    address,
                    reason: "node refused the unlock".to_string(),
                })
            }
            Err(e) => {
                return Err(PipelineError::UnlockFailed {
                    address,
                    reason: e.to_string(),
                })
            }
        }

        let mut guard = UnlockGuard {
            client: self.client.clone(),
            address,
            armed: true,
        };

        let result = work(address).await;

        lock_account(self.client.as_ref(), address).await;
        guard.armed = false;

        result
    }
}

async fn lock_account<C: NodeClient + ?Sized>(client: &C, address: Address) {
    match client.lock_account(address).await {
        Ok(true) => debug!(%address, "account locked"),
        Ok(false) => warn!(%address, "node did not lock the account"),
        Err(e) => warn!(%address, "failed to lock account: {}", e),
    }
}

/// Locks the account if the unlocked scope is dropped before it finishes.
struct UnlockGuard<C: NodeClient + ?Sized + 'static> {
    client: Arc<C>,
    address: Address,
    armed: bool,
}

impl<C: NodeClient + ?Sized + 'static> Drop for UnlockGuard<C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let address = self.address;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(%address, "unlock scope cancelled, locking account");
                let client = self.client.clone();
                handle.spawn(async move {
                    lock_account(client.as_ref(), address).await;
                });
            }
            Err(_) => warn!(%address, "unlock scope dropped outside a runtime, account stays unlocked until the node expires it"),
        }
    }
}
