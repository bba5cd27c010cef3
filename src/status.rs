//! Per-operation status store
//!
//! Maps a normalized source transaction hash to the lifecycle record served by
//! the query API. Writes never move a record backwards along
//! pending -> processing -> {complete | failed}. A periodic sweep drops
//! records whose last update is older than the retention window.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics;
use crate::types::{normalize_tx_hash, TransactionStatus};

/// Shared handle to the status map
#[derive(Clone, Default)]
pub struct StatusStore {
    entries: Arc<RwLock<HashMap<String, TransactionStatus>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of `source_tx_hash`; unknown hashes read as pending
    pub async fn get(&self, source_tx_hash: &str) -> TransactionStatus {
        let key = normalize_tx_hash(source_tx_hash);
        self.entries
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(TransactionStatus::pending)
    }

    /// Whether a record exists for `source_tx_hash`
    pub async fn contains(&self, source_tx_hash: &str) -> bool {
        let key = normalize_tx_hash(source_tx_hash);
        self.entries.read().await.contains_key(&key)
    }

    pub async fn mark_processing(&self, source_tx_hash: &str) -> bool {
        self.transition(source_tx_hash, TransactionStatus::processing())
            .await
    }

    pub async fn mark_complete(&self, source_tx_hash: &str, dest_tx_hash: &str) -> bool {
        self.transition(source_tx_hash, TransactionStatus::complete(dest_tx_hash))
            .await
    }

    pub async fn mark_failed(&self, source_tx_hash: &str, error: &str) -> bool {
        self.transition(source_tx_hash, TransactionStatus::failed(error))
            .await
    }

    /// Store `next` if it moves the record forward. Returns whether it was stored.
    async fn transition(&self, source_tx_hash: &str, next: TransactionStatus) -> bool {
        let key = normalize_tx_hash(source_tx_hash);
        let mut entries = self.entries.write().await;

        if let Some(current) = entries.get(&key) {
            if !current.state.can_transition_to(next.state) {
                debug!(
                    source_tx_hash = %key,
                    from = %current.state,
                    to = %next.state,
                    "Ignoring status regression"
                );
                return false;
            }
        }

        debug!(source_tx_hash = %key, status = %next.state, "Status updated");
        entries.insert(key, next);
        metrics::set_status_entries(entries.len());
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every record last updated before `cutoff`, whatever its state
    pub async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, status| status.timestamp >= cutoff);
        let evicted = before - entries.len();

        metrics::set_status_entries(entries.len());
        metrics::record_status_evicted(evicted);
        evicted
    }

    /// Drop every record older than `retention`
    pub async fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));

        match cutoff {
            Some(cutoff) => self.sweep_older_than(cutoff).await,
            None => 0,
        }
    }

    /// Sweep every `interval` until `cancel` fires
    pub async fn run_sweeper(
        self,
        interval: Duration,
        retention: Duration,
        cancel: CancellationToken,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = retention.as_secs(),
            "Status sweeper started"
        );

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep_expired(retention).await;
                    if evicted > 0 {
                        let remaining = self.len().await;
                        info!(evicted, remaining, "Evicted expired statuses");
                    }
                }
            }
        }

        info!("Status sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxState;

    const HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[tokio::test]
    async fn test_unknown_hash_reads_pending() {
        let store = StatusStore::new();
        let status = store.get("0xdeadbeef").await;
        assert_eq!(status.state, TxState::Pending);
        assert!(status.dest_tx_hash.is_none());
        assert!(!store.contains("0xdeadbeef").await);
    }

    #[tokio::test]
    async fn test_keys_are_case_normalized() {
        let store = StatusStore::new();
        assert!(store.mark_processing(&HASH.to_uppercase().replace("0X", "0x")).await);
        assert_eq!(store.get(HASH).await.state, TxState::Processing);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_status_is_never_regressed() {
        let store = StatusStore::new();
        assert!(store.mark_processing(HASH).await);
        assert!(store.mark_complete(HASH, "0xbeef").await);

        assert!(!store.mark_processing(HASH).await);
        assert!(!store.mark_failed(HASH, "late failure").await);

        let status = store.get(HASH).await;
        assert_eq!(status.state, TxState::Complete);
        assert_eq!(status.dest_tx_hash.as_deref(), Some("0xbeef"));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_sweep_older_than_drops_any_state() {
        let store = StatusStore::new();
        store.mark_processing("0x01").await;
        store.mark_processing("0x02").await;
        store.mark_failed("0x02", "boom").await;

        assert_eq!(store.sweep_older_than(Utc::now() - chrono::Duration::hours(1)).await, 0);
        assert_eq!(store.sweep_older_than(Utc::now() + chrono::Duration::seconds(1)).await, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let store = StatusStore::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(store.clone().run_sweeper(
            Duration::from_secs(300),
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(900)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
