//! Event dispatcher
//!
//! Turns each observed bridge event into the counter action on the opposite
//! chain: a lock on the source chain mints on the destination chain, a burn on
//! the destination chain unlocks on the source chain.
//!
//! Each `(sourceTxHash, logIndex)` emission is dispatched at most once per
//! process. The seen-set lives in memory only, so a restart forgets it; the
//! contracts' `AlreadyProcessed()` rejection remains the authoritative guard
//! against double execution.

use alloy::primitives::utils::format_ether;
use alloy::primitives::B256;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainAction, ChainPair};
use crate::confirmation::{execute_action, ActionOutcome, ConfirmPolicy};
use crate::metrics;
use crate::retry_queue::RetryQueue;
use crate::status::StatusStore;
use crate::types::{tx_hash_key, BridgeEvent, DedupKey, FailedOperation, ALREADY_PROCESSED_MARKER};

/// Result of handing one event to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Emission was already dispatched; nothing done
    Duplicate,
    /// Counter action confirmed with this transaction
    Completed(B256),
    /// Contract reported the operation as already performed
    AlreadyProcessed,
    /// Counter action was mined but reverted
    Reverted(B256),
    /// Counter action failed and was handed to the retry queue
    Queued,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Completed(_) => "completed",
            DispatchOutcome::AlreadyProcessed => "already_processed",
            DispatchOutcome::Reverted(_) => "reverted",
            DispatchOutcome::Queued => "queued",
        }
    }
}

/// Shared dispatcher; clones share the seen-set
#[derive(Clone)]
pub struct EventDispatcher {
    chains: ChainPair,
    status: StatusStore,
    retry_queue: RetryQueue,
    policy: ConfirmPolicy,
    seen: Arc<Mutex<HashSet<DedupKey>>>,
}

impl EventDispatcher {
    pub fn new(
        chains: ChainPair,
        status: StatusStore,
        retry_queue: RetryQueue,
        policy: ConfirmPolicy,
    ) -> Self {
        Self {
            chains,
            status,
            retry_queue,
            policy,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Record `event` as seen. Returns false if it was seen before.
    async fn mark_seen(&self, event: &BridgeEvent) -> bool {
        self.seen.lock().await.insert(event.dedup_key())
    }

    /// Number of distinct emissions dispatched so far
    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Dispatch `event` and settle its status
    pub async fn dispatch(&self, event: BridgeEvent) -> DispatchOutcome {
        let action_kind = event.kind.counter_action();

        if !self.mark_seen(&event).await {
            debug!(
                kind = %event.kind,
                source_tx_hash = %event.source_tx_hash,
                log_index = event.log_index,
                "Duplicate event ignored"
            );
            metrics::record_duplicate_event(event.kind.as_str());
            return DispatchOutcome::Duplicate;
        }

        let key = event.status_key();
        let client = self.chains.executor(action_kind);
        let emitter = self.chains.emitter(event.kind);

        info!(
            kind = %event.kind,
            chain = emitter.name(),
            source_tx_hash = %key,
            log_index = event.log_index,
            sender = %event.sender,
            recipient = %event.recipient,
            amount = %format_ether(event.amount),
            nonce = %event.nonce,
            destination_chain = event.destination_chain,
            "Bridge event received"
        );

        if event.destination_chain == event.source_chain {
            warn!(
                source_tx_hash = %key,
                chain_id = event.source_chain,
                "Event names its own chain as destination"
            );
        }

        self.status.mark_processing(&key).await;

        let action = ChainAction::for_event(&event);
        let outcome = match execute_action(client.as_ref(), &action, self.policy).await {
            Ok(ActionOutcome::Confirmed(tx_hash)) => {
                self.status.mark_complete(&key, &tx_hash_key(&tx_hash)).await;
                info!(
                    action = %action_kind,
                    chain = client.name(),
                    source_tx_hash = %key,
                    dest_tx_hash = %tx_hash,
                    "Bridge operation complete"
                );
                DispatchOutcome::Completed(tx_hash)
            }
            Ok(ActionOutcome::Reverted(tx_hash)) => {
                self.status.mark_failed(&key, "Transaction reverted").await;
                error!(
                    action = %action_kind,
                    chain = client.name(),
                    source_tx_hash = %key,
                    dest_tx_hash = %tx_hash,
                    "Counter action reverted"
                );
                DispatchOutcome::Reverted(tx_hash)
            }
            Err(e) if e.is_already_processed() => {
                self.status.mark_complete(&key, ALREADY_PROCESSED_MARKER).await;
                info!(
                    action = %action_kind,
                    source_tx_hash = %key,
                    nonce = %event.nonce,
                    "Operation already processed on chain"
                );
                DispatchOutcome::AlreadyProcessed
            }
            Err(e) => {
                warn!(
                    action = %action_kind,
                    chain = client.name(),
                    source_tx_hash = %key,
                    error_class = e.class().as_str(),
                    error = %e,
                    "Dispatch failed, handing to retry queue"
                );
                self.retry_queue
                    .enqueue(FailedOperation::from_event(&event, e.to_string()))
                    .await;
                DispatchOutcome::Queued
            }
        };

        metrics::record_action(action_kind.as_str(), outcome.label());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, ConfirmOutcome};
    use crate::testing::ScriptedChainClient;
    use crate::types::fixtures::{burned_event, locked_event};
    use crate::types::TxState;
    use std::time::Duration;

    fn setup() -> (
        Arc<ScriptedChainClient>,
        Arc<ScriptedChainClient>,
        EventDispatcher,
    ) {
        let source = Arc::new(ScriptedChainClient::new("sepolia"));
        let destination = Arc::new(ScriptedChainClient::new("base-sepolia"));
        let dispatcher = EventDispatcher::new(
            ChainPair::new(source.clone(), destination.clone()),
            StatusStore::new(),
            RetryQueue::new(),
            ConfirmPolicy::dispatch(),
        );
        (source, destination, dispatcher)
    }

    #[tokio::test]
    async fn test_duplicate_emission_dispatched_once() {
        let (_, destination, dispatcher) = setup();
        let event = locked_event(1, 0, 7);

        assert!(matches!(
            dispatcher.dispatch(event.clone()).await,
            DispatchOutcome::Completed(_)
        ));
        assert_eq!(dispatcher.dispatch(event).await, DispatchOutcome::Duplicate);
        assert_eq!(destination.submitted().len(), 1);
        assert_eq!(dispatcher.seen_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_tx_different_log_is_not_a_duplicate() {
        let (_, destination, dispatcher) = setup();
        dispatcher.dispatch(locked_event(1, 0, 1)).await;
        dispatcher.dispatch(locked_event(1, 1, 2)).await;
        assert_eq!(destination.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_burn_unlocks_on_source_chain() {
        let (source, destination, dispatcher) = setup();
        let event = burned_event(2, 0, 4);

        dispatcher.dispatch(event.clone()).await;

        assert_eq!(source.submitted(), vec![ChainAction::for_event(&event)]);
        assert!(destination.submitted().is_empty());
        assert_eq!(
            dispatcher.status.get(&event.status_key()).await.state,
            TxState::Complete
        );
    }

    #[tokio::test]
    async fn test_revert_marks_failed_without_retry() {
        let (_, destination, dispatcher) = setup();
        destination.push_confirm(Ok(ConfirmOutcome::Reverted));
        let event = locked_event(3, 0, 1);

        assert!(matches!(
            dispatcher.dispatch(event.clone()).await,
            DispatchOutcome::Reverted(_)
        ));
        let status = dispatcher.status.get(&event.status_key()).await;
        assert_eq!(status.state, TxState::Failed);
        assert!(status.error.is_some());
        assert!(dispatcher.retry_queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_exhausted_confirmation_waits_go_to_retry_queue() {
        let (_, destination, dispatcher) = setup();
        let tx_hash = B256::repeat_byte(0x44);
        destination.push_submit(Ok(tx_hash));
        for _ in 0..3 {
            destination.push_confirm(Err(ChainError::Timeout {
                tx_hash,
                timeout: Duration::from_secs(60),
            }));
        }
        let event = locked_event(4, 0, 1);

        assert_eq!(dispatcher.dispatch(event.clone()).await, DispatchOutcome::Queued);
        assert_eq!(destination.submitted().len(), 1);

        let snapshot = dispatcher.retry_queue.snapshot().await;
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.items[0].attempts, 1);
        assert!(snapshot.items[0].last_error.contains("3 attempts"));
        assert_eq!(
            dispatcher.status.get(&event.status_key()).await.state,
            TxState::Processing
        );
    }
}
