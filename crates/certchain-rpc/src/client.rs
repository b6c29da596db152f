//! The node capability set.

use async_trait::async_trait;
use certchain_types::{Address, GasPlan, Hash, PendingCall, TransactionReceipt};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{RpcError, RpcResult};

/// Chain event filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// New blocks appended to the canonical chain
    Latest,
    /// Transactions entering the pending pool
    Pending,
}

impl FilterKind {
    /// Subscription name understood by `eth_subscribe`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "newHeads",
            Self::Pending => "newPendingTransactions",
        }
    }
}

impl FromStr for FilterKind {
    type Err = RpcError;

    /// Parse from the node's subscription name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newHeads" => Ok(Self::Latest),
            "newPendingTransactions" => Ok(Self::Pending),
            other => Err(RpcError::Subscription(format!(
                "unsupported subscription kind {:?}",
                other
            ))),
        }
    }
}

/// Notification delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// New block header
    NewBlock { hash: Hash, number: Option<u64> },
    /// New pending transaction
    PendingTransaction { hash: Hash },
}

impl ChainEvent {
    pub fn kind(&self) -> FilterKind {
        match self {
            ChainEvent::NewBlock { .. } => FilterKind::Latest,
            ChainEvent::PendingTransaction { .. } => FilterKind::Pending,
        }
    }
}

/// A live event subscription.
///
/// Events arrive in order on a bounded channel. Cancelling (or dropping) the
/// subscription signals the background reader to unsubscribe and exit.
pub struct Subscription {
    kind: FilterKind,
    events: mpsc::Receiver<ChainEvent>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Subscription fed directly by a channel, with no background reader.
    pub fn new(kind: FilterKind, events: mpsc::Receiver<ChainEvent>) -> Self {
        Self {
            kind,
            events,
            cancel: None,
            task: None,
        }
    }

    /// Subscription backed by a reader task that exits when `cancel` fires.
    pub fn with_task(
        kind: FilterKind,
        events: mpsc::Receiver<ChainEvent>,
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            kind,
            events,
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Next event, `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<ChainEvent> {
        self.events.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_next(&mut self) -> Option<ChainEvent> {
        self.events.try_recv().ok()
    }

    /// Cancel and wait for the reader task to finish.
    pub async fn cancel(mut self) {
        self.signal_cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!("{} subscription reader panicked", self.kind.as_str());
                }
            }
        }
    }

    fn signal_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.signal_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("has_reader", &self.task.is_some())
            .finish()
    }
}

/// Capabilities of the remote node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Accounts managed by the node.
    async fn list_accounts(&self) -> RpcResult<Vec<Address>>;

    /// Unlock `address` for signing for at most `duration`.
    async fn unlock_account(
        &self,
        address: Address,
        passphrase: &str,
        duration: Duration,
    ) -> RpcResult<bool>;

    /// Revoke a previous unlock.
    async fn lock_account(&self, address: Address) -> RpcResult<bool>;

    /// Current gas price (wei).
    async fn gas_price(&self) -> RpcResult<u128>;

    /// Gas the call would consume; fails if execution would revert.
    async fn estimate_gas(&self, call: &PendingCall) -> RpcResult<u64>;

    /// Execute read-only against the latest state.
    async fn call(&self, call: &PendingCall) -> RpcResult<Vec<u8>>;

    /// Submit a state-changing transaction signed by the node.
    async fn send_transaction(&self, call: &PendingCall, plan: &GasPlan) -> RpcResult<Hash>;

    /// Receipt of an included transaction, `None` while pending.
    async fn transaction_receipt(&self, hash: &Hash) -> RpcResult<Option<TransactionReceipt>>;

    /// Number of transactions in the pending block.
    async fn pending_transaction_count(&self) -> RpcResult<u64>;

    /// Whether the node is mining.
    async fn is_mining(&self) -> RpcResult<bool>;

    /// Start mining with `threads` worker threads.
    async fn start_mining(&self, threads: u32) -> RpcResult<()>;

    /// Stop mining.
    async fn stop_mining(&self) -> RpcResult<()>;

    /// Current block number.
    async fn block_number(&self) -> RpcResult<u64>;

    /// Push subscription to chain events.
    async fn subscribe(&self, kind: FilterKind) -> RpcResult<Subscription>;
}
