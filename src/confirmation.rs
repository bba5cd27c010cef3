//! Submission and bounded confirmation of chain actions
//!
//! Both the dispatcher and the retry worker run an action the same way: submit
//! once, then wait for the receipt. A wait that times out is repeated on the
//! same transaction up to the policy's attempt count. No transaction is ever
//! resubmitted from here.

use alloy::primitives::B256;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::chain::{ChainAction, ChainClient, ChainError, ConfirmOutcome};
use crate::metrics;

/// How long, and how many times, to wait for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    /// Number of wait windows; at least 1
    pub attempts: u32,
    /// Length of each wait window
    pub timeout: Duration,
}

impl ConfirmPolicy {
    /// Dispatch path: three 60 second windows
    pub fn dispatch() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(60),
        }
    }

    /// Retry path: a single 90 second window
    pub fn retry() -> Self {
        Self {
            attempts: 1,
            timeout: Duration::from_secs(90),
        }
    }
}

/// Final result of an action whose transaction was mined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Confirmed(B256),
    Reverted(B256),
}

/// Wait for `tx_hash`, re-waiting on timeouts while attempts remain.
///
/// Only [`ChainError::Timeout`] consumes an attempt; any other error is
/// returned immediately. If every window times out the result is
/// [`ChainError::Unconfirmed`].
pub async fn wait_for_confirmation(
    client: &dyn ChainClient,
    tx_hash: B256,
    policy: ConfirmPolicy,
) -> Result<ConfirmOutcome, ChainError> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match client.confirm(tx_hash, policy.timeout).await {
            Err(e) if e.is_timeout() => {
                warn!(
                    chain = client.name(),
                    tx_hash = %tx_hash,
                    attempt,
                    max_attempts = attempts,
                    "Confirmation wait timed out"
                );
            }
            result => return result,
        }
    }

    Err(ChainError::Unconfirmed { tx_hash, attempts })
}

/// Submit `action` on `client` and wait for its receipt
pub async fn execute_action(
    client: &dyn ChainClient,
    action: &ChainAction,
    policy: ConfirmPolicy,
) -> Result<ActionOutcome, ChainError> {
    let tx_hash = client.submit(action).await?;
    let started = Instant::now();

    let outcome = wait_for_confirmation(client, tx_hash, policy).await?;
    metrics::record_confirmation_latency(action.kind().as_str(), started.elapsed());

    debug!(
        chain = client.name(),
        tx_hash = %tx_hash,
        outcome = ?outcome,
        "Transaction mined"
    );

    Ok(match outcome {
        ConfirmOutcome::Success => ActionOutcome::Confirmed(tx_hash),
        ConfirmOutcome::Reverted => ActionOutcome::Reverted(tx_hash),
    })
}
