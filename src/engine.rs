//! Relay engine
//!
//! Composition root of the relayer. Owns the status store, the retry queue and
//! the dispatcher, and runs four long-lived tasks: one event subscription per
//! chain, the retry worker, and the status sweeper.
//!
//! Shutdown happens in two phases. Subscriptions stop first and every dispatch
//! already in progress finishes its confirmation wait. Only then are the retry
//! worker and the sweeper stopped.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, ChainPair};
use crate::config::RelayerConfig;
use crate::confirmation::ConfirmPolicy;
use crate::dispatcher::EventDispatcher;
use crate::metrics;
use crate::retry_queue::{RetryPolicy, RetryQueue, RetryWorker};
use crate::status::StatusStore;
use crate::types::EventKind;

/// Timing and limits of the relay loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub dispatch: ConfirmPolicy,
    pub retry: RetryPolicy,
    pub sweep_interval: Duration,
    pub status_retention: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            dispatch: ConfirmPolicy::dispatch(),
            retry: RetryPolicy::default(),
            sweep_interval: Duration::from_secs(300),
            status_retention: Duration::from_secs(3600),
        }
    }
}

impl From<&RelayerConfig> for RelaySettings {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            dispatch: ConfirmPolicy {
                attempts: config.dispatch_confirm_attempts,
                timeout: Duration::from_secs(config.dispatch_confirm_timeout_secs),
            },
            retry: RetryPolicy {
                interval: Duration::from_secs(config.retry_interval_secs),
                max_attempts: config.max_retry_attempts,
                confirm: ConfirmPolicy {
                    attempts: 1,
                    timeout: Duration::from_secs(config.retry_confirm_timeout_secs),
                },
            },
            sweep_interval: Duration::from_secs(config.status_sweep_interval_secs),
            status_retention: Duration::from_secs(config.status_retention_secs),
        }
    }
}

pub struct RelayEngine {
    chains: ChainPair,
    settings: RelaySettings,
    status: StatusStore,
    retry_queue: RetryQueue,
    dispatcher: EventDispatcher,
    retry_worker: RetryWorker,
    subscriptions_cancel: CancellationToken,
    workers_cancel: CancellationToken,
    subscription_tasks: Vec<JoinHandle<()>>,
    worker_tasks: Vec<JoinHandle<()>>,
}

impl RelayEngine {
    pub fn new(chains: ChainPair, settings: RelaySettings) -> Self {
        let status = StatusStore::new();
        let retry_queue = RetryQueue::new();
        let dispatcher = EventDispatcher::new(
            chains.clone(),
            status.clone(),
            retry_queue.clone(),
            settings.dispatch,
        );
        let retry_worker = RetryWorker::new(
            retry_queue.clone(),
            chains.clone(),
            status.clone(),
            settings.retry,
        );

        Self {
            chains,
            settings,
            status,
            retry_queue,
            dispatcher,
            retry_worker,
            subscriptions_cancel: CancellationToken::new(),
            workers_cancel: CancellationToken::new(),
            subscription_tasks: Vec::new(),
            worker_tasks: Vec::new(),
        }
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry_queue
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn retry_worker(&self) -> &RetryWorker {
        &self.retry_worker
    }

    pub fn is_running(&self) -> bool {
        !self.subscription_tasks.is_empty() || !self.worker_tasks.is_empty()
    }

    /// Spawn the subscriptions, the retry worker and the sweeper
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Relay engine already started");
            return;
        }

        for kind in [EventKind::Locked, EventKind::Burned] {
            let chain = self.chains.emitter(kind).clone();
            self.subscription_tasks.push(tokio::spawn(run_subscription(
                self.dispatcher.clone(),
                chain,
                kind,
                self.subscriptions_cancel.clone(),
            )));
        }

        self.worker_tasks.push(tokio::spawn(
            self.retry_worker.clone().run(self.workers_cancel.clone()),
        ));
        self.worker_tasks.push(tokio::spawn(self.status.clone().run_sweeper(
            self.settings.sweep_interval,
            self.settings.status_retention,
            self.workers_cancel.clone(),
        )));

        metrics::set_up(true);
        info!(
            source = self.chains.source.name(),
            destination = self.chains.destination.name(),
            "Relay engine started"
        );
    }

    /// Stop subscriptions, drain in-flight dispatches, then stop the retry
    /// worker and the sweeper
    pub async fn shutdown(&mut self) {
        info!("Relay engine shutting down");

        self.subscriptions_cancel.cancel();
        for handle in self.subscription_tasks.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Subscription task failed");
            }
        }

        self.workers_cancel.cancel();
        for handle in self.worker_tasks.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }

        metrics::set_up(false);
        info!(
            pending_retries = self.retry_queue.len().await,
            "Relay engine stopped"
        );
    }
}

/// Feed one chain's events to the dispatcher until cancelled, each event on its
/// own task, then wait for those tasks to finish
async fn run_subscription(
    dispatcher: EventDispatcher,
    chain: Arc<dyn ChainClient>,
    kind: EventKind,
    cancel: CancellationToken,
) {
    let chain_name = chain.name().to_string();
    let mut events = chain.subscribe(kind);
    let mut in_flight = JoinSet::new();

    info!(chain = %chain_name, kind = %kind, "Subscription started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(event) => {
                    metrics::record_event_observed(&chain_name, kind.as_str());
                    let dispatcher = dispatcher.clone();
                    in_flight.spawn(async move {
                        dispatcher.dispatch(event).await;
                    });
                }
                None => {
                    warn!(chain = %chain_name, kind = %kind, "Event stream ended");
                    break;
                }
            },
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    error!(chain = %chain_name, error = %e, "Dispatch task failed");
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(
            chain = %chain_name,
            in_flight = in_flight.len(),
            "Waiting for in-flight dispatches"
        );
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!(chain = %chain_name, error = %e, "Dispatch task failed");
        }
    }

    info!(chain = %chain_name, kind = %kind, "Subscription stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    #[test]
    fn test_settings_from_config() {
        let vars = HashMap::from([
            (
                "RELAYER_PRIVATE_KEY",
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            ),
            ("SOURCE_RPC_URL", "http://localhost:8545"),
            ("DESTINATION_RPC_URL", "http://localhost:8546"),
            ("DISPATCH_CONFIRM_ATTEMPTS", "4"),
            ("RETRY_CONFIRM_TIMEOUT_SECS", "120"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        let settings = RelaySettings::from(&config.relayer);

        assert_eq!(settings.dispatch.attempts, 4);
        assert_eq!(settings.dispatch.timeout, Duration::from_secs(60));
        assert_eq!(settings.retry.confirm.attempts, 1);
        assert_eq!(settings.retry.confirm.timeout, Duration::from_secs(120));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.interval, Duration::from_secs(30));
        assert_eq!(settings.sweep_interval, Duration::from_secs(300));
        assert_eq!(settings.status_retention, Duration::from_secs(3600));
    }

    #[test]
    fn test_default_settings_match_loaded_defaults() {
        let vars = HashMap::from([
            (
                "RELAYER_PRIVATE_KEY",
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            ),
            ("SOURCE_RPC_URL", "http://localhost:8545"),
            ("DESTINATION_RPC_URL", "http://localhost:8546"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(RelaySettings::from(&config.relayer), RelaySettings::default());
    }
}
