//! Scriptable in-memory node.
//!
//! Every invocation is recorded as a [`NodeCall`] so tests can assert on
//! exactly which node operations ran and in what order. Behaviour is
//! configured through `&self` setters so a test can keep an `Arc<MockNode>`
//! and change the node between steps.

use async_trait::async_trait;
use certchain_types::{Address, GasPlan, Hash, PendingCall, TransactionReceipt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::{ChainEvent, FilterKind, NodeClient, Subscription};
use crate::error::{RpcError, RpcResult};

/// A recorded node operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    ListAccounts,
    Unlock { address: Address, duration_secs: u64 },
    Lock { address: Address },
    GasPrice,
    EstimateGas { label: String },
    Call { label: String },
    Send { label: String, gas_limit: u64, gas_price: u128 },
    Receipt { hash: Hash },
    PendingCount,
    IsMining,
    StartMining { threads: u32 },
    StopMining,
    BlockNumber,
    Subscribe { kind: FilterKind },
}

/// Answers `eth_call` for a call.
pub type CallHandler = Arc<dyn Fn(&PendingCall) -> RpcResult<Vec<u8>> + Send + Sync>;

/// Observes each accepted transaction.
pub type SendHook = Arc<dyn Fn(&PendingCall) + Send + Sync>;

struct MockState {
    calls: Vec<NodeCall>,
    accounts: Vec<Address>,
    unlock: RpcResult<bool>,
    lock: RpcResult<bool>,
    gas_price: u128,
    gas_price_errors: VecDeque<RpcError>,
    estimate: RpcResult<u64>,
    call_handler: Option<CallHandler>,
    send_errors: VecDeque<RpcError>,
    send_hook: Option<SendHook>,
    sent: u64,
    receipt_status: Option<u64>,
    receipt_delay: u32,
    contract_address: Option<Address>,
    receipts: HashMap<Hash, (TransactionReceipt, u32)>,
    pending: u64,
    pending_errors: VecDeque<RpcError>,
    mining: bool,
    mining_errors: VecDeque<RpcError>,
    block_number: u64,
    subscribe_errors: VecDeque<RpcError>,
    subscribers: Vec<(FilterKind, mpsc::Sender<ChainEvent>)>,
}

/// Scriptable node.
pub struct MockNode {
    state: Mutex<MockState>,
}

impl MockNode {
    /// Account used by default.
    pub const DEFAULT_ACCOUNT: Address = Address::from_bytes([0xaa; 20]);

    /// Address reported for contract creations by default.
    pub const DEFAULT_CONTRACT: Address = Address::from_bytes([0xcc; 20]);

    /// A healthy node: one account, 1 gwei gas price, 50k gas estimates,
    /// receipts available immediately with success status.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                accounts: vec![Self::DEFAULT_ACCOUNT],
                unlock: Ok(true),
                lock: Ok(true),
                gas_price: 1_000_000_000,
                gas_price_errors: VecDeque::new(),
                estimate: Ok(50_000),
                call_handler: None,
                send_errors: VecDeque::new(),
                send_hook: None,
                sent: 0,
                receipt_status: Some(1),
                receipt_delay: 0,
                contract_address: Some(Self::DEFAULT_CONTRACT),
                receipts: HashMap::new(),
                pending: 0,
                pending_errors: VecDeque::new(),
                mining: false,
                mining_errors: VecDeque::new(),
                block_number: 0,
                subscribe_errors: VecDeque::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    // ============ Scripting ============

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().accounts = accounts;
    }

    /// Result of every `personal_unlockAccount`.
    pub fn set_unlock_result(&self, result: RpcResult<bool>) {
        self.state.lock().unlock = result;
    }

    /// Result of every `personal_lockAccount`.
    pub fn set_lock_result(&self, result: RpcResult<bool>) {
        self.state.lock().lock = result;
    }

    pub fn set_gas_price(&self, price: u128) {
        self.state.lock().gas_price = price;
    }

    /// Fail the next gas price query.
    pub fn push_gas_price_error(&self, error: RpcError) {
        self.state.lock().gas_price_errors.push_back(error);
    }

    /// Result of every `eth_estimateGas`.
    pub fn set_estimate(&self, result: RpcResult<u64>) {
        self.state.lock().estimate = result;
    }

    /// Handler answering `eth_call`. Without one, calls return empty data.
    pub fn on_call(&self, handler: impl Fn(&PendingCall) -> RpcResult<Vec<u8>> + Send + Sync + 'static) {
        self.state.lock().call_handler = Some(Arc::new(handler));
    }

    /// Hook invoked for each accepted transaction.
    pub fn on_send(&self, hook: impl Fn(&PendingCall) + Send + Sync + 'static) {
        self.state.lock().send_hook = Some(Arc::new(hook));
    }

    /// Fail the next `eth_sendTransaction`.
    pub fn push_send_error(&self, error: RpcError) {
        self.state.lock().send_errors.push_back(error);
    }

    /// Status written into receipts of later transactions.
    pub fn set_receipt_status(&self, status: Option<u64>) {
        self.state.lock().receipt_status = status;
    }

    /// Number of receipt queries answered with `None` before a receipt appears.
    pub fn set_receipt_delay(&self, polls: u32) {
        self.state.lock().receipt_delay = polls;
    }

    /// Contract address written into receipts of later contract creations.
    pub fn set_contract_address(&self, address: Option<Address>) {
        self.state.lock().contract_address = address;
    }

    pub fn set_pending(&self, count: u64) {
        self.state.lock().pending = count;
    }

    /// Fail the next pending count query.
    pub fn push_pending_error(&self, error: RpcError) {
        self.state.lock().pending_errors.push_back(error);
    }

    /// Mining flag as seen by the node, changed behind the controller's back.
    pub fn set_mining(&self, mining: bool) {
        self.state.lock().mining = mining;
    }

    /// Fail the next `miner_start` / `miner_stop`.
    pub fn push_mining_error(&self, error: RpcError) {
        self.state.lock().mining_errors.push_back(error);
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    /// Fail the next subscribe request.
    pub fn push_subscribe_error(&self, error: RpcError) {
        self.state.lock().subscribe_errors.push_back(error);
    }

    // ============ Events ============

    /// Deliver `event` to every live subscriber of its kind. Returns how many
    /// subscribers received it.
    pub fn emit(&self, event: ChainEvent) -> usize {
        let kind = event.kind();
        let mut state = self.state.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|(k, _)| *k == kind)
            .filter(|(_, tx)| tx.try_send(event.clone()).is_ok())
            .count()
    }

    /// Emit a new block notification.
    pub fn emit_block(&self) -> usize {
        let number = {
            let mut state = self.state.lock();
            state.block_number += 1;
            state.block_number
        };
        self.emit(ChainEvent::NewBlock {
            hash: Hash::keccak(&number.to_be_bytes()),
            number: Some(number),
        })
    }

    /// Emit a pending transaction notification.
    pub fn emit_pending(&self) -> usize {
        let seed = self.state.lock().calls.len() as u64;
        self.emit(ChainEvent::PendingTransaction {
            hash: Hash::keccak(&seed.to_le_bytes()),
        })
    }

    /// End every subscription of `kind` from the node side.
    pub fn close_subscriptions(&self, kind: FilterKind) {
        self.state.lock().subscribers.retain(|(k, _)| *k != kind);
    }

    /// Subscriptions whose consumer is still alive.
    pub fn active_subscriptions(&self, kind: FilterKind) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|(k, tx)| *k == kind && !tx.is_closed())
            .count()
    }

    // ============ Inspection ============

    pub fn calls(&self) -> Vec<NodeCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&NodeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn sends(&self) -> usize {
        self.count(|c| matches!(c, NodeCall::Send { .. }))
    }

    pub fn starts(&self) -> usize {
        self.count(|c| matches!(c, NodeCall::StartMining { .. }))
    }

    pub fn stops(&self) -> usize {
        self.count(|c| matches!(c, NodeCall::StopMining))
    }

    pub fn mining(&self) -> bool {
        self.state.lock().mining
    }

    fn record(&self, call: NodeCall) {
        self.state.lock().calls.push(call);
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn list_accounts(&self) -> RpcResult<Vec<Address>> {
        self.record(NodeCall::ListAccounts);
        Ok(self.state.lock().accounts.clone())
    }

    async fn unlock_account(
        &self,
        address: Address,
        _passphrase: &str,
        duration: Duration,
    ) -> RpcResult<bool> {
        self.record(NodeCall::Unlock {
            address,
            duration_secs: duration.as_secs(),
        });
        self.state.lock().unlock.clone()
    }

    async fn lock_account(&self, address: Address) -> RpcResult<bool> {
        self.record(NodeCall::Lock { address });
        self.state.lock().lock.clone()
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        self.record(NodeCall::GasPrice);
        let mut state = self.state.lock();
        match state.gas_price_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.gas_price),
        }
    }

    async fn estimate_gas(&self, call: &PendingCall) -> RpcResult<u64> {
        self.record(NodeCall::EstimateGas {
            label: call.label().to_string(),
        });
        self.state.lock().estimate.clone()
    }

    async fn call(&self, call: &PendingCall) -> RpcResult<Vec<u8>> {
        self.record(NodeCall::Call {
            label: call.label().to_string(),
        });
        let handler = self.state.lock().call_handler.clone();
        match handler {
            Some(handler) => handler(call),
            None => Ok(Vec::new()),
        }
    }

    async fn send_transaction(&self, call: &PendingCall, plan: &GasPlan) -> RpcResult<Hash> {
        self.record(NodeCall::Send {
            label: call.label().to_string(),
            gas_limit: plan.limit(),
            gas_price: plan.price(),
        });

        let (hash, hook) = {
            let mut state = self.state.lock();
            if let Some(error) = state.send_errors.pop_front() {
                return Err(error);
            }

            state.sent += 1;
            state.block_number += 1;
            let hash = Hash::keccak_multi(&[&state.sent.to_be_bytes(), call.digest().as_bytes()]);
            let receipt = TransactionReceipt {
                transaction_hash: hash,
                block_hash: Hash::keccak(&state.block_number.to_be_bytes()),
                block_number: state.block_number,
                from: call.from(),
                to: call.to(),
                contract_address: if call.is_deploy() {
                    state.contract_address
                } else {
                    None
                },
                gas_used: plan.limit().min(state.estimate.clone().unwrap_or(plan.limit())),
                status: state.receipt_status,
            };
            let delay = state.receipt_delay;
            state.receipts.insert(hash, (receipt, delay));
            (hash, state.send_hook.clone())
        };

        // outside the lock so the hook may script the node
        if let Some(hook) = hook {
            hook(call);
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: &Hash) -> RpcResult<Option<TransactionReceipt>> {
        self.record(NodeCall::Receipt { hash: *hash });
        let mut state = self.state.lock();
        match state.receipts.get_mut(hash) {
            Some((_, delay)) if *delay > 0 => {
                *delay -= 1;
                Ok(None)
            }
            Some((receipt, _)) => Ok(Some(receipt.clone())),
            None => Ok(None),
        }
    }

    async fn pending_transaction_count(&self) -> RpcResult<u64> {
        self.record(NodeCall::PendingCount);
        let mut state = self.state.lock();
        match state.pending_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.pending),
        }
    }

    async fn is_mining(&self) -> RpcResult<bool> {
        self.record(NodeCall::IsMining);
        Ok(self.state.lock().mining)
    }

    async fn start_mining(&self, threads: u32) -> RpcResult<()> {
        self.record(NodeCall::StartMining { threads });
        let mut state = self.state.lock();
        if let Some(error) = state.mining_errors.pop_front() {
            return Err(error);
        }
        state.mining = true;
        Ok(())
    }

    async fn stop_mining(&self) -> RpcResult<()> {
        self.record(NodeCall::StopMining);
        let mut state = self.state.lock();
        if let Some(error) = state.mining_errors.pop_front() {
            return Err(error);
        }
        state.mining = false;
        Ok(())
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.record(NodeCall::BlockNumber);
        Ok(self.state.lock().block_number)
    }

    async fn subscribe(&self, kind: FilterKind) -> RpcResult<Subscription> {
        self.record(NodeCall::Subscribe { kind });
        let mut state = self.state.lock();
        if let Some(error) = state.subscribe_errors.pop_front() {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(64);
        state.subscribers.push((kind, tx));
        Ok(Subscription::new(kind, rx))
    }
}
