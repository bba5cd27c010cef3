//! In-memory chain client for tests
//!
//! [`ScriptedChainClient`] replays queued submit/confirm results, records every
//! call it receives, and feeds injected events to its subscriptions.

use alloy::primitives::B256;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::chain::{ChainAction, ChainClient, ChainError, ConfirmOutcome};
use crate::types::{BridgeEvent, EventKind};

/// Scripted [`ChainClient`]
///
/// Unscripted submits succeed with a fresh transaction hash and unscripted
/// confirms report success.
pub struct ScriptedChainClient {
    name: String,
    submit_results: Mutex<VecDeque<Result<B256, ChainError>>>,
    confirm_results: Mutex<VecDeque<Result<ConfirmOutcome, ChainError>>>,
    confirm_delay: Mutex<Duration>,
    submitted: Mutex<Vec<ChainAction>>,
    confirm_calls: Mutex<Vec<(B256, Duration)>>,
    feeds: Mutex<HashMap<EventKind, EventFeed>>,
    tx_counter: AtomicU64,
}

struct EventFeed {
    sender: mpsc::UnboundedSender<BridgeEvent>,
    receiver: Option<mpsc::UnboundedReceiver<BridgeEvent>>,
}

impl EventFeed {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedChainClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submit_results: Mutex::new(VecDeque::new()),
            confirm_results: Mutex::new(VecDeque::new()),
            confirm_delay: Mutex::new(Duration::ZERO),
            submitted: Mutex::new(Vec::new()),
            confirm_calls: Mutex::new(Vec::new()),
            feeds: Mutex::new(HashMap::new()),
            tx_counter: AtomicU64::new(1),
        }
    }

    /// Queue the result of the next unscripted `submit`
    pub fn push_submit(&self, result: Result<B256, ChainError>) {
        lock(&self.submit_results).push_back(result);
    }

    /// Queue the result of the next unscripted `confirm`
    pub fn push_confirm(&self, result: Result<ConfirmOutcome, ChainError>) {
        lock(&self.confirm_results).push_back(result);
    }

    /// Delay every `confirm` call by `delay` before it resolves
    pub fn set_confirm_delay(&self, delay: Duration) {
        *lock(&self.confirm_delay) = delay;
    }

    /// Deliver `event` to the subscription for its kind
    pub fn emit(&self, event: BridgeEvent) {
        let mut feeds = lock(&self.feeds);
        let feed = feeds.entry(event.kind).or_insert_with(EventFeed::new);
        // The receiver lives as long as the feed entry
        let _ = feed.sender.send(event);
    }

    /// Actions passed to `submit`, in call order
    pub fn submitted(&self) -> Vec<ChainAction> {
        lock(&self.submitted).clone()
    }

    /// `(tx_hash, timeout)` of each `confirm` call, in call order
    pub fn confirm_calls(&self) -> Vec<(B256, Duration)> {
        lock(&self.confirm_calls).clone()
    }

    fn next_tx_hash(&self) -> B256 {
        let n = self.tx_counter.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 32];
        bytes[0] = 0xee;
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        B256::from(bytes)
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, action: &ChainAction) -> Result<B256, ChainError> {
        lock(&self.submitted).push(action.clone());
        let scripted = lock(&self.submit_results).pop_front();
        scripted.unwrap_or_else(|| Ok(self.next_tx_hash()))
    }

    async fn confirm(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ConfirmOutcome, ChainError> {
        lock(&self.confirm_calls).push((tx_hash, timeout));
        let delay = *lock(&self.confirm_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.confirm_results).pop_front();
        scripted.unwrap_or(Ok(ConfirmOutcome::Success))
    }

    /// Only the first subscription per kind receives events; later ones stay
    /// pending forever.
    fn subscribe(&self, kind: EventKind) -> BoxStream<'static, BridgeEvent> {
        let receiver = lock(&self.feeds)
            .entry(kind)
            .or_insert_with(EventFeed::new)
            .receiver
            .take();

        match receiver {
            Some(receiver) => stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|event| (event, receiver))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}
