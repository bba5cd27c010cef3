//! Retry queue for failed dispatches
//!
//! Operations whose first dispatch failed wait here in FIFO order. A single
//! worker wakes on a fixed interval and attempts the head operation. A failure
//! below the attempt limit moves the operation to the tail, so one stuck
//! operation never starves the others. At most one operation is in flight at
//! any time, which keeps the relayer's own signer from racing itself on nonces.

use alloy::primitives::B256;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainAction, ChainPair};
use crate::confirmation::{execute_action, ActionOutcome, ConfirmPolicy};
use crate::metrics;
use crate::status::StatusStore;
use crate::types::{tx_hash_key, FailedOperation, ALREADY_PROCESSED_MARKER};

// ============================================================================
// Queue
// ============================================================================

/// Shared handle to the ordered retry queue
#[derive(Clone, Default)]
pub struct RetryQueue {
    items: Arc<Mutex<VecDeque<FailedOperation>>>,
}

/// Body of `GET /retry-queue`
#[derive(Debug, Clone, Serialize)]
pub struct RetryQueueSnapshot {
    pub count: usize,
    pub items: Vec<FailedOperation>,
}

/// What happened to an operation after a failed retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureDisposition {
    /// Moved to the tail with the new attempt count
    Requeued(u32),
    /// Removed after reaching the attempt limit
    Dropped(u32),
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `op` unless its source transaction is already queued.
    /// Returns whether it was added.
    pub async fn enqueue(&self, op: FailedOperation) -> bool {
        let mut items = self.items.lock().await;
        if items
            .iter()
            .any(|queued| queued.source_tx_hash == op.source_tx_hash)
        {
            debug!(source_tx_hash = %op.source_tx_hash, "Operation already queued");
            return false;
        }

        info!(
            source_tx_hash = %op.source_tx_hash,
            operation = %op.operation_kind,
            nonce = %op.nonce,
            error = %op.last_error,
            "Queued operation for retry"
        );
        items.push_back(op);
        metrics::set_retry_queue_depth(items.len());
        true
    }

    /// Copy of the queue in order, head first
    pub async fn snapshot(&self) -> RetryQueueSnapshot {
        let items: Vec<FailedOperation> = self.items.lock().await.iter().cloned().collect();
        RetryQueueSnapshot {
            count: items.len(),
            items,
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn contains(&self, source_tx_hash: &str) -> bool {
        self.items
            .lock()
            .await
            .iter()
            .any(|op| op.source_tx_hash == source_tx_hash)
    }

    /// Head of the queue, left in place while it is attempted
    async fn front(&self) -> Option<FailedOperation> {
        self.items.lock().await.front().cloned()
    }

    async fn remove(&self, source_tx_hash: &str) -> Option<FailedOperation> {
        let mut items = self.items.lock().await;
        let position = items
            .iter()
            .position(|op| op.source_tx_hash == source_tx_hash)?;
        let removed = items.remove(position);
        metrics::set_retry_queue_depth(items.len());
        removed
    }

    /// Count a failed attempt: drop the operation once it reaches
    /// `max_attempts`, otherwise move it to the tail.
    async fn record_failure(
        &self,
        source_tx_hash: &str,
        error: &str,
        max_attempts: u32,
    ) -> Option<FailureDisposition> {
        let mut items = self.items.lock().await;
        let position = items
            .iter()
            .position(|op| op.source_tx_hash == source_tx_hash)?;
        let mut op = items.remove(position)?;

        op.attempts += 1;
        op.last_error = error.to_string();
        let attempts = op.attempts;

        let disposition = if attempts >= max_attempts {
            FailureDisposition::Dropped(attempts)
        } else {
            items.push_back(op);
            FailureDisposition::Requeued(attempts)
        };
        metrics::set_retry_queue_depth(items.len());
        Some(disposition)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Retry loop timing and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between retry cycles
    pub interval: Duration,
    /// Total attempts, including the first dispatch, before an operation fails
    pub max_attempts: u32,
    /// Confirmation wait for each retry attempt
    pub confirm: ConfirmPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 5,
            confirm: ConfirmPolicy::retry(),
        }
    }
}

/// Result of one retry cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Completed(B256),
    AlreadyProcessed,
    Reverted(B256),
    Requeued { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryOutcome {
    fn label(&self) -> &'static str {
        match self {
            RetryOutcome::Completed(_) => "completed",
            RetryOutcome::AlreadyProcessed => "already_processed",
            RetryOutcome::Reverted(_) => "reverted",
            RetryOutcome::Requeued { .. } => "requeued",
            RetryOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

/// Single consumer of the retry queue
#[derive(Clone)]
pub struct RetryWorker {
    queue: RetryQueue,
    chains: ChainPair,
    status: StatusStore,
    policy: RetryPolicy,
    in_flight: Arc<Mutex<()>>,
}

impl RetryWorker {
    pub fn new(
        queue: RetryQueue,
        chains: ChainPair,
        status: StatusStore,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            chains,
            status,
            policy,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Attempt the head operation once.
    ///
    /// Returns `None` when the queue is empty or another attempt is still in
    /// flight.
    pub async fn process_once(&self) -> Option<RetryOutcome> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Retry attempt already in flight, skipping cycle");
                return None;
            }
        };

        let op = self.queue.front().await?;
        let action = ChainAction::for_retry(&op);
        let client = self.chains.executor(op.operation_kind);
        let attempt = op.attempts + 1;

        info!(
            source_tx_hash = %op.source_tx_hash,
            operation = %op.operation_kind,
            chain = client.name(),
            attempt,
            max_attempts = self.policy.max_attempts,
            "Retrying operation"
        );

        let result = execute_action(client.as_ref(), &action, self.policy.confirm).await;
        let key = op.source_tx_hash.as_str();

        let outcome = match result {
            Ok(ActionOutcome::Confirmed(tx_hash)) => {
                self.queue.remove(key).await;
                self.status.mark_complete(key, &tx_hash_key(&tx_hash)).await;
                info!(source_tx_hash = %key, dest_tx_hash = %tx_hash, attempt, "Retry succeeded");
                RetryOutcome::Completed(tx_hash)
            }
            Ok(ActionOutcome::Reverted(tx_hash)) => {
                self.queue.remove(key).await;
                self.status.mark_failed(key, "Transaction reverted").await;
                error!(source_tx_hash = %key, dest_tx_hash = %tx_hash, attempt, "Retry reverted");
                RetryOutcome::Reverted(tx_hash)
            }
            Err(e) if e.is_already_processed() => {
                self.queue.remove(key).await;
                self.status.mark_complete(key, ALREADY_PROCESSED_MARKER).await;
                info!(source_tx_hash = %key, attempt, "Operation already processed on chain");
                RetryOutcome::AlreadyProcessed
            }
            Err(e) => {
                let message = e.to_string();
                match self
                    .queue
                    .record_failure(key, &message, self.policy.max_attempts)
                    .await
                {
                    Some(FailureDisposition::Dropped(attempts)) => {
                        let summary = format!("Failed after {} attempts: {}", attempts, message);
                        self.status.mark_failed(key, &summary).await;
                        error!(
                            source_tx_hash = %key,
                            attempts,
                            error_class = e.class().as_str(),
                            error = %message,
                            "Operation failed permanently"
                        );
                        RetryOutcome::Exhausted { attempts }
                    }
                    Some(FailureDisposition::Requeued(attempts)) => {
                        warn!(
                            source_tx_hash = %key,
                            attempts,
                            error_class = e.class().as_str(),
                            error = %message,
                            "Retry failed, moved to tail"
                        );
                        RetryOutcome::Requeued { attempts }
                    }
                    // Removed concurrently; nothing left to account for
                    None => RetryOutcome::Requeued { attempts: attempt },
                }
            }
        };

        metrics::record_retry_attempt(op.operation_kind.as_str(), outcome.label());
        Some(outcome)
    }

    /// Run a cycle every `interval` until `cancel` fires. A cycle already in
    /// progress runs to completion.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.policy.interval.as_secs(),
            max_attempts = self.policy.max_attempts,
            "Retry worker started"
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.policy.interval,
            self.policy.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.process_once().await;
                }
            }
        }

        let pending = self.queue.len().await;
        info!(pending, "Retry worker stopped");
    }
}
