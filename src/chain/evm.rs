//! EVM chain client
//!
//! Submits bridge calls with a locally held key, waits for receipts, and turns
//! the bridge contract's logs into a polling event subscription.
//!
//! # Transaction Building
//!
//! Uses Alloy's `ProviderBuilder::with_recommended_fillers()` so nonce, gas
//! limit and fees are filled before the wallet signs.

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChainAction, ChainClient, ChainError, ConfirmOutcome};
use crate::config::ChainConfig;
use crate::contracts::{BridgeDestination, BridgeSource};
use crate::metrics;
use crate::types::{BridgeEvent, EventKind};

/// Maximum block span of one `eth_getLogs` request
const MAX_LOG_RANGE: u64 = 2000;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Backoff before the next log poll after `failures` consecutive failures
pub fn subscription_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16) as i32;
    let backoff_secs = INITIAL_BACKOFF.as_secs_f64() * 2f64.powi(exponent);
    Duration::from_secs_f64(backoff_secs.min(MAX_BACKOFF.as_secs_f64()))
}

/// Client for one EVM chain and its bridge contract
pub struct EvmChainClient {
    name: String,
    chain_id: u64,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    bridge_address: Address,
    signer: PrivateKeySigner,
    start_block: Option<u64>,
    finality_blocks: u64,
    poll_interval: Duration,
    receipt_poll_interval: Duration,
}

impl EvmChainClient {
    pub fn new(
        chain: &ChainConfig,
        private_key: &str,
        poll_interval: Duration,
        receipt_poll_interval: Duration,
    ) -> Result<Self> {
        let url = chain.rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;

        info!(
            chain = %chain.name,
            chain_id = chain.chain_id,
            bridge = %chain.bridge_address,
            "EVM chain client initialized"
        );

        Ok(Self {
            name: chain.name.clone(),
            chain_id: chain.chain_id,
            rpc_url: chain.rpc_url.clone(),
            provider,
            bridge_address: chain.bridge_address,
            signer,
            start_block: chain.start_block,
            finality_blocks: chain.finality_blocks,
            poll_interval,
            receipt_poll_interval,
        })
    }

    /// Address transactions are signed with
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn bridge_address(&self) -> Address {
        self.bridge_address
    }

    /// Native balance of the relayer account
    pub async fn relayer_balance(&self) -> Result<U256> {
        self.provider
            .get_balance(self.signer.address())
            .await
            .wrap_err_with(|| format!("Failed to get relayer balance on {}", self.name))
    }

    /// Log the relayer's native balance, ether-formatted
    pub async fn log_balance(&self) {
        match self.relayer_balance().await {
            Ok(balance) => info!(
                chain = %self.name,
                address = %self.signer.address(),
                balance = %format_ether(balance),
                "Relayer balance"
            ),
            Err(e) => warn!(chain = %self.name, error = %e, "Could not read relayer balance"),
        }
    }

    async fn send_action(&self, action: &ChainAction) -> Result<B256> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);

        let pending_tx = match action {
            ChainAction::Mint {
                source_token,
                recipient,
                amount,
                source_nonce,
                source_chain,
            } => {
                let contract = BridgeDestination::new(self.bridge_address, &provider);
                contract
                    .mintTokens(
                        *source_token,
                        *recipient,
                        *amount,
                        *source_nonce,
                        U256::from(*source_chain),
                    )
                    .send()
                    .await?
            }
            ChainAction::Unlock {
                recipient,
                amount,
                source_nonce,
                source_chain,
            } => {
                let contract = BridgeSource::new(self.bridge_address, &provider);
                contract
                    .unlockEth(
                        *recipient,
                        *amount,
                        *source_nonce,
                        U256::from(*source_chain),
                    )
                    .send()
                    .await?
            }
        };

        Ok(*pending_tx.tx_hash())
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, action: &ChainAction) -> Result<B256, ChainError> {
        debug!(chain = %self.name, action = %action.kind(), "Submitting transaction");

        let tx_hash = self
            .send_action(action)
            .await
            .map_err(|e| ChainError::Submission(format!("{:#}", e)))?;

        info!(
            chain = %self.name,
            action = %action.kind(),
            tx_hash = %tx_hash,
            "Transaction submitted"
        );
        Ok(tx_hash)
    }

    async fn confirm(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ConfirmOutcome, ChainError> {
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => {
                        return if receipt.status() {
                            ConfirmOutcome::Success
                        } else {
                            ConfirmOutcome::Reverted
                        };
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            chain = %self.name,
                            tx_hash = %tx_hash,
                            error = %e,
                            "Receipt poll failed"
                        );
                    }
                }
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ChainError::Timeout { tx_hash, timeout })
    }

    fn subscribe(&self, kind: EventKind) -> BoxStream<'static, BridgeEvent> {
        let poller = LogPoller {
            chain: self.name.clone(),
            chain_id: self.chain_id,
            provider: self.provider.clone(),
            bridge_address: self.bridge_address,
            kind,
            next_block: self.start_block,
            finality_blocks: self.finality_blocks,
            poll_interval: self.poll_interval,
            buffer: VecDeque::new(),
            failures: 0,
        };

        stream::unfold(poller, |mut poller| async move {
            let event = poller.next_event().await;
            Some((event, poller))
        })
        .boxed()
    }
}

// ============================================================================
// Log polling
// ============================================================================

/// Highest block considered final at chain head `head`
fn safe_head(head: u64, finality_blocks: u64) -> u64 {
    head.saturating_sub(finality_blocks)
}

/// Inclusive block range of the next `eth_getLogs` read, or `None` when the
/// cursor is past the safe head. Without a cursor reading starts after the
/// current safe head.
fn next_range(next_block: Option<u64>, head: u64, finality_blocks: u64) -> Option<(u64, u64)> {
    let safe_block = safe_head(head, finality_blocks);
    let from_block = next_block.unwrap_or(safe_block + 1);
    if from_block > safe_block {
        return None;
    }
    Some((from_block, safe_block.min(from_block + MAX_LOG_RANGE - 1)))
}

/// Cursor-driven `eth_getLogs` reader behind [`EvmChainClient::subscribe`]
struct LogPoller {
    chain: String,
    chain_id: u64,
    provider: RootProvider<Http<Client>>,
    bridge_address: Address,
    kind: EventKind,
    /// First block not yet read; `None` until the chain head is known
    next_block: Option<u64>,
    finality_blocks: u64,
    poll_interval: Duration,
    buffer: VecDeque<BridgeEvent>,
    failures: u32,
}

impl LogPoller {
    async fn next_event(&mut self) -> BridgeEvent {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return event;
            }

            match self.poll().await {
                Ok(true) => {
                    self.failures = 0;
                }
                Ok(false) => {
                    self.failures = 0;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    self.failures += 1;
                    metrics::record_subscription_error(&self.chain);
                    let backoff = subscription_backoff(self.failures);
                    warn!(
                        chain = %self.chain,
                        kind = %self.kind,
                        failures = self.failures,
                        backoff_secs = backoff.as_secs_f64(),
                        error = %e,
                        "Log poll failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Read the next chunk of finalized blocks. Returns whether any block was
    /// read; the cursor only advances once a chunk was fully fetched.
    async fn poll(&mut self) -> Result<bool> {
        let head = self
            .provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")?;

        let range = next_range(self.next_block, head, self.finality_blocks);
        self.next_block
            .get_or_insert(safe_head(head, self.finality_blocks) + 1);
        let Some((from_block, to_block)) = range else {
            return Ok(false);
        };

        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(event_signature(self.kind))
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err("Failed to get logs")?;

        let events = decode_logs(&self.chain, self.kind, self.chain_id, &logs);

        debug!(
            chain = %self.chain,
            kind = %self.kind,
            from_block,
            to_block,
            events = events.len(),
            "Processed block range"
        );

        self.buffer.extend(events);
        self.next_block = Some(to_block + 1);
        Ok(true)
    }
}

fn event_signature(kind: EventKind) -> B256 {
    match kind {
        EventKind::Locked => BridgeSource::EthLocked::SIGNATURE_HASH,
        EventKind::Burned => BridgeDestination::TokensBurned::SIGNATURE_HASH,
    }
}

/// Decode a batch of bridge logs in (block, logIndex) order, skipping logs
/// that do not decode
fn decode_logs(chain: &str, kind: EventKind, chain_id: u64, logs: &[Log]) -> Vec<BridgeEvent> {
    let mut events: Vec<BridgeEvent> = logs
        .iter()
        .filter_map(|log| match decode_log(kind, chain_id, log) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    chain = %chain,
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    error = %e,
                    "Failed to decode bridge log"
                );
                None
            }
        })
        .collect();
    events.sort_by_key(|e| (e.block_number, e.log_index));
    events
}

/// Decode one bridge log emitted on `chain_id`
fn decode_log(kind: EventKind, chain_id: u64, log: &Log) -> Result<BridgeEvent> {
    let source_tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre::eyre!("Missing transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or_else(|| eyre::eyre!("Missing log index"))?;

    let event = match kind {
        EventKind::Locked => {
            let data = log.log_decode::<BridgeSource::EthLocked>()?.inner.data;
            BridgeEvent {
                kind: EventKind::Locked,
                source_chain: chain_id,
                destination_chain: chain_id_from_u256(data.destinationChainId),
                sender: data.sender,
                recipient: data.recipient,
                amount: data.amount,
                nonce: data.nonce,
                source_tx_hash,
                log_index,
                block_number: log.block_number,
                wrapped_token: None,
            }
        }
        EventKind::Burned => {
            let data = log.log_decode::<BridgeDestination::TokensBurned>()?.inner.data;
            BridgeEvent {
                kind: EventKind::Burned,
                source_chain: chain_id,
                destination_chain: chain_id_from_u256(data.destinationChainId),
                sender: data.sender,
                recipient: data.recipient,
                amount: data.amount,
                nonce: data.nonce,
                source_tx_hash,
                log_index,
                block_number: log.block_number,
                wrapped_token: Some(data.wrappedToken),
            }
        }
    };
    Ok(event)
}

fn chain_id_from_u256(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
