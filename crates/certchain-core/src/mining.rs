//! Reactive mining controller.
//!
//! Keeps the node's miner running only while there is pending work. The
//! controller subscribes to new blocks and new pending transactions and, on
//! each notification, compares the pending transaction count with the
//! miner state read from the node at that moment:
//!
//! - pending work and not mining: start the miner
//! - no pending work and mining: stop the miner
//! - otherwise: nothing
//!
//! Notifications that arrive together are coalesced into one evaluation and
//! evaluations never overlap.

use certchain_rpc::{FilterKind, NodeClient, Subscription};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::MiningError;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningConfig {
    /// Miner threads requested on start
    pub threads: u32,
    /// Stop the miner on shutdown if this controller started it
    pub stop_on_shutdown: bool,
    /// Attempts to re-establish a subscription the node closed
    pub resubscribe_attempts: u32,
    pub resubscribe_backoff: Duration,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            stop_on_shutdown: true,
            resubscribe_attempts: 5,
            resubscribe_backoff: Duration::from_secs(1),
        }
    }
}

/// What an evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningAction {
    Started,
    Stopped,
    Unchanged,
}

/// Last observed miner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningState {
    pub is_mining: bool,
    pub threads: u32,
}

/// Summary of a controller run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningReport {
    pub evaluations: u64,
    pub failed_evaluations: u64,
    pub starts: u64,
    pub stops: u64,
    /// Notifications received
    pub events: u64,
}

enum Wake {
    Shutdown,
    Event(FilterKind),
    Closed(FilterKind),
}

/// Starts and stops the node's miner based on pending work.
pub struct MiningController<C: NodeClient + ?Sized> {
    client: Arc<C>,
    config: MiningConfig,
    state: Option<MiningState>,
    started_miner: bool,
    report: MiningReport,
}

impl<C: NodeClient + ?Sized> MiningController<C> {
    pub fn new(client: Arc<C>, config: MiningConfig) -> Self {
        Self {
            client,
            config,
            state: None,
            started_miner: false,
            report: MiningReport::default(),
        }
    }

    /// Last observed miner state, `None` until first observed or after a
    /// failed start/stop.
    pub fn state(&self) -> Option<MiningState> {
        self.state
    }

    pub fn report(&self) -> MiningReport {
        self.report
    }

    /// Refresh the cached miner state from the node.
    pub async fn reconcile(&mut self) -> Result<bool, MiningError> {
        let is_mining = self.client.is_mining().await?;
        debug!(is_mining, "miner state reconciled");
        self.state = Some(MiningState {
            is_mining,
            threads: self.config.threads,
        });
        Ok(is_mining)
    }

    /// Compare pending work with the miner state and act on the difference.
    pub async fn evaluate(&mut self) -> Result<MiningAction, MiningError> {
        self.report.evaluations += 1;
        let pending = self.client.pending_transaction_count().await?;
        // the miner can be toggled behind our back, so act on a fresh snapshot
        let is_mining = self.reconcile().await?;

        if pending > 0 && !is_mining {
            // a failed start leaves the miner state unknown
            self.state = None;
            self.client.start_mining(self.config.threads).await?;
            self.set_mining(true);
            self.started_miner = true;
            self.report.starts += 1;
            info!(pending, threads = self.config.threads, "started mining");
            Ok(MiningAction::Started)
        } else if pending == 0 && is_mining {
            self.state = None;
            self.client.stop_mining().await?;
            self.set_mining(false);
            self.started_miner = false;
            self.report.stops += 1;
            info!("stopped mining, no pending transactions");
            Ok(MiningAction::Stopped)
        } else {
            debug!(pending, is_mining, "miner state unchanged");
            Ok(MiningAction::Unchanged)
        }
    }

    fn set_mining(&mut self, is_mining: bool) {
        self.state = Some(MiningState {
            is_mining,
            threads: self.config.threads,
        });
    }

    async fn evaluate_logged(&mut self) {
        if let Err(e) = self.evaluate().await {
            self.report.failed_evaluations += 1;
            warn!("mining evaluation failed: {}", e);
        }
    }

    async fn resubscribe(&self, kind: FilterKind) -> Result<Subscription, MiningError> {
        for attempt in 1..=self.config.resubscribe_attempts {
            tokio::time::sleep(self.config.resubscribe_backoff).await;
            match self.client.subscribe(kind).await {
                Ok(subscription) => {
                    info!(kind = kind.as_str(), attempt, "resubscribed");
                    return Ok(subscription);
                }
                Err(e) => warn!(kind = kind.as_str(), attempt, "resubscribe failed: {}", e),
            }
        }
        Err(MiningError::SubscriptionLost {
            kind: kind.as_str(),
            attempts: self.config.resubscribe_attempts,
        })
    }

    /// Run until `shutdown` resolves.
    ///
    /// Both subscriptions are cancelled before this returns, and the miner
    /// is stopped if this controller started it and `stop_on_shutdown` is
    /// set.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<MiningReport, MiningError>
    where
        F: Future<Output = ()>,
    {
        let mut latest = self.client.subscribe(FilterKind::Latest).await?;
        let mut pending = match self.client.subscribe(FilterKind::Pending).await {
            Ok(subscription) => subscription,
            Err(e) => {
                latest.cancel().await;
                return Err(e.into());
            }
        };
        info!(threads = self.config.threads, "mining controller running");

        self.evaluate_logged().await;

        tokio::pin!(shutdown);
        let result = loop {
            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                event = latest.next() => match event {
                    Some(_) => Wake::Event(FilterKind::Latest),
                    None => Wake::Closed(FilterKind::Latest),
                },
                event = pending.next() => match event {
                    Some(_) => Wake::Event(FilterKind::Pending),
                    None => Wake::Closed(FilterKind::Pending),
                },
            };

            match wake {
                Wake::Shutdown => break Ok(()),
                Wake::Event(kind) => {
                    self.report.events += 1;
                    debug!(kind = kind.as_str(), "chain event");
                }
                Wake::Closed(kind) => {
                    warn!(kind = kind.as_str(), "subscription closed by node");
                    match self.resubscribe(kind).await {
                        Ok(subscription) => match kind {
                            FilterKind::Latest => latest = subscription,
                            FilterKind::Pending => pending = subscription,
                        },
                        Err(e) => break Err(e),
                    }
                }
            }

            // coalesce the burst into one evaluation
            while latest.try_next().is_some() {
                self.report.events += 1;
            }
            while pending.try_next().is_some() {
                self.report.events += 1;
            }

            self.evaluate_logged().await;
        };

        latest.cancel().await;
        pending.cancel().await;
        self.shutdown_miner().await;

        info!(
            evaluations = self.report.evaluations,
            starts = self.report.starts,
            stops = self.report.stops,
            "mining controller stopped"
        );
        result.map(|_| self.report)
    }

    async fn shutdown_miner(&mut self) {
        let mining = self.state.map_or(false, |s| s.is_mining);
        if !(self.config.stop_on_shutdown && self.started_miner && mining) {
            return;
        }

        match self.client.stop_mining().await {
            Ok(()) => {
                self.set_mining(false);
                self.started_miner = false;
                self.report.stops += 1;
                info!("stopped mining on shutdown");
            }
            Err(e) => warn!("failed to stop mining on shutdown: {}", e),
        }
    }
}
