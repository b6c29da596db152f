//! Transaction submission pipeline.
//!
//! A pipeline carries one [`PendingCall`] through
//! `Built -> GasEstimated -> Priced -> Submitted -> Confirmed`, with any
//! failure moving it to `Failed`. Each step is its own method and refuses to
//! run out of order; [`TransactionPipeline::run`] sequences them.

use certchain_rpc::NodeClient;
use certchain_types::{Address, GasPlan, Hash, PendingCall, TransactionReceipt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult, Stage};

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Extra gas on top of the estimate for contract creations (percent)
    pub deploy_margin_percent: u32,
    /// Extra gas on top of the estimate for method calls (percent)
    pub call_margin_percent: u32,
    /// Resubmissions after a retryable failure
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// How long to wait for a receipt
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deploy_margin_percent: 10,
            call_margin_percent: 5,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Built,
    GasEstimated,
    Priced,
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Built => "built",
            PipelineState::GasEstimated => "gas-estimated",
            PipelineState::Priced => "priced",
            PipelineState::Submitted => "submitted",
            PipelineState::Confirmed => "confirmed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a completed interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Contract created at `address`
    Deployed {
        address: Address,
        receipt: TransactionReceipt,
    },
    /// Return data of a read-only call
    CallResult { value: Vec<u8> },
    /// Transaction included; `success == false` means execution reverted
    Sent {
        receipt: TransactionReceipt,
        success: bool,
    },
}

impl TransactionOutcome {
    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            TransactionOutcome::Deployed { receipt, .. } | TransactionOutcome::Sent { receipt, .. } => {
                Some(receipt)
            }
            TransactionOutcome::CallResult { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, TransactionOutcome::Sent { success: false, .. })
    }
}

/// Drives one call against the node.
pub struct TransactionPipeline<C: NodeClient + ?Sized> {
    client: Arc<C>,
    config: PipelineConfig,
    call: PendingCall,
    state: PipelineState,
    estimate: Option<u64>,
    plan: Option<GasPlan>,
    hash: Option<Hash>,
    attempts: u32,
}

impl<C: NodeClient + ?Sized> TransactionPipeline<C> {
    pub fn new(client: Arc<C>, call: PendingCall, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            call,
            state: PipelineState::Built,
            estimate: None,
            plan: None,
            hash: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn call(&self) -> &PendingCall {
        &self.call
    }

    pub fn plan(&self) -> Option<&GasPlan> {
        self.plan.as_ref()
    }

    pub fn transaction_hash(&self) -> Option<Hash> {
        self.hash
    }

    /// Submission attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn expect(&self, allowed: &[PipelineState], action: Stage) -> PipelineResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        debug!(call = self.call.label(), stage = %error.stage(), "transaction failed: {}", error);
        self.state = PipelineState::Failed;
        error
    }

    fn margin(&self) -> u32 {
        if self.call.is_deploy() {
            self.config.deploy_margin_percent
        } else {
            self.config.call_margin_percent
        }
    }

    /// Ask the node how much gas the call needs.
    pub async fn estimate(&mut self) -> PipelineResult<u64> {
        self.expect(&[PipelineState::Built], Stage::Estimation)?;

        match self.client.estimate_gas(&self.call).await {
            Ok(gas) => {
                debug!(call = self.call.label(), gas, "gas estimated");
                self.estimate = Some(gas);
                self.state = PipelineState::GasEstimated;
                Ok(gas)
            }
            Err(e) => Err(self.fail(PipelineError::EstimationFailed(e))),
        }
    }

    /// Fetch the current gas price and derive the plan for this call.
    pub async fn price(&mut self) -> PipelineResult<GasPlan> {
        self.expect(&[PipelineState::GasEstimated], Stage::Pricing)?;

        match self.fresh_plan().await {
            Ok(plan) => {
                self.plan = Some(plan);
                self.state = PipelineState::Priced;
                Ok(plan)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Use a plan priced by the caller instead of [`price`](Self::price).
    pub fn use_plan(&mut self, plan: GasPlan) -> PipelineResult<()> {
        self.expect(&[PipelineState::GasEstimated, PipelineState::Priced], Stage::Pricing)?;
        if !plan.belongs_to(&self.call) {
            return Err(PipelineError::StalePlan);
        }
        self.plan = Some(plan);
        self.state = PipelineState::Priced;
        Ok(())
    }

    async fn fresh_plan(&self) -> PipelineResult<GasPlan> {
        let estimate = self.estimate.ok_or(PipelineError::InvalidTransition {
            state: self.state,
            action: Stage::Pricing,
        })?;
        let limit = GasPlan::limit_with_margin(estimate, self.margin());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.gas_price().await {
                Ok(price) => {
                    let plan = GasPlan::for_call(&self.call, price, limit);
                    debug!(call = self.call.label(), price, limit, max_fee = plan.max_fee(), "gas priced");
                    return Ok(plan);
                }
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(call = self.call.label(), attempt, ?delay, "gas price query failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(PipelineError::PricingFailed(e)),
            }
        }
    }

    /// Send the transaction. Retryable failures are re-priced and resent
    /// with exponential backoff.
    pub async fn submit(&mut self) -> PipelineResult<Hash> {
        self.expect(&[PipelineState::Priced], Stage::Submission)?;

        loop {
            let plan = match self.plan {
                Some(plan) if plan.belongs_to(&self.call) => plan,
                _ => return Err(self.fail(PipelineError::StalePlan)),
            };

            self.attempts += 1;
            match self.client.send_transaction(&self.call, &plan).await {
                Ok(hash) => {
                    debug!(call = self.call.label(), %hash, attempts = self.attempts, "transaction submitted");
                    self.hash = Some(hash);
                    self.state = PipelineState::Submitted;
                    return Ok(hash);
                }
                Err(e) if e.is_retryable() && self.attempts <= self.config.max_retries => {
                    let delay = self.config.backoff(self.attempts);
                    warn!(call = self.call.label(), attempt = self.attempts, ?delay, "submission failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;

                    match self.fresh_plan().await {
                        Ok(plan) => self.plan = Some(plan),
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                Err(e) => {
                    return Err(self.fail(PipelineError::SubmissionFailed {
                        attempts: self.attempts,
                        source: e,
                    }))
                }
            }
        }
    }

    /// Wait until the transaction is included.
    pub async fn confirm(&mut self) -> PipelineResult<TransactionReceipt> {
        self.expect(&[PipelineState::Submitted], Stage::Confirmation)?;
        let hash = self.hash.ok_or(PipelineError::InvalidTransition {
            state: self.state,
            action: Stage::Confirmation,
        })?;

        let started = Instant::now();
        let deadline = started + self.config.receipt_timeout;
        loop {
            match self.client.transaction_receipt(&hash).await {
                Ok(Some(receipt)) => {
                    info!(
                        call = self.call.label(),
                        %hash,
                        block = receipt.block_number,
                        gas_used = receipt.gas_used,
                        success = receipt.succeeded(),
                        "transaction confirmed"
                    );
                    self.state = PipelineState::Confirmed;
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    debug!(%hash, "receipt query failed, polling again: {}", e);
                }
                Err(e) => {
                    return Err(self.fail(PipelineError::ConfirmationFailed { hash, source: e }))
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.fail(PipelineError::ReceiptTimeout {
                    hash,
                    waited: now - started,
                }));
            }
            tokio::time::sleep(self.config.receipt_poll_interval.min(deadline - now)).await;
        }
    }

    /// Estimate, price, submit and confirm.
    pub async fn run(&mut self) -> PipelineResult<TransactionOutcome> {
        self.estimate().await?;
        self.price().await?;
        self.submit().await?;
        let receipt = self.confirm().await?;
        let success = receipt.succeeded();

        if self.call.is_deploy() && success {
            let address = match receipt.contract_address {
                Some(address) if !address.is_zero() => address,
                _ => {
                    return Err(self.fail(PipelineError::MissingContractAddress(
                        receipt.transaction_hash,
                    )))
                }
            };
            info!(%address, "contract deployed");
            return Ok(TransactionOutcome::Deployed { address, receipt });
        }

        if !success {
            warn!(call = self.call.label(), hash = %receipt.transaction_hash, "transaction reverted");
        }
        Ok(TransactionOutcome::Sent { receipt, success })
    }

    /// Execute a read-only call. No gas is estimated and nothing is sent.
    pub async fn query(&mut self) -> PipelineResult<TransactionOutcome> {
        self.expect(&[PipelineState::Built], Stage::Call)?;

        match self.client.call(&self.call).await {
            Ok(value) => {
                debug!(call = self.call.label(), bytes = value.len(), "call returned");
                self.state = PipelineState::Confirmed;
                Ok(TransactionOutcome::CallResult { value })
            }
            Err(e) => Err(self.fail(PipelineError::CallFailed(e))),
        }
    }
}
