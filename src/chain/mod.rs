//! Chain client abstraction
//!
//! A [`ChainClient`] wraps one chain's RPC endpoint and bridge contract. The
//! relay engine owns two of them: the source chain, where value is locked and
//! unlocked, and the destination chain, where wrapped value is minted and
//! burned.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{BridgeEvent, EventKind, FailedOperation, OperationKind, NATIVE_TOKEN};

pub mod error;
pub mod evm;

pub use error::{classify_error, ChainError, ErrorClass};
pub use evm::EvmChainClient;

/// Call issued on the chain opposite to the observed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAction {
    /// `mintTokens` on the destination chain
    Mint {
        source_token: Address,
        recipient: Address,
        amount: U256,
        source_nonce: U256,
        source_chain: u64,
    },
    /// `unlockEth` on the source chain
    Unlock {
        recipient: Address,
        amount: U256,
        source_nonce: U256,
        source_chain: u64,
    },
}

impl ChainAction {
    /// The action answering an observed event
    pub fn for_event(event: &BridgeEvent) -> Self {
        match event.kind {
            EventKind::Locked => ChainAction::Mint {
                source_token: NATIVE_TOKEN,
                recipient: event.recipient,
                amount: event.amount,
                source_nonce: event.nonce,
                source_chain: event.source_chain,
            },
            EventKind::Burned => ChainAction::Unlock {
                recipient: event.recipient,
                amount: event.amount,
                source_nonce: event.nonce,
                source_chain: event.source_chain,
            },
        }
    }

    /// Rebuild the action for a queued retry
    pub fn for_retry(op: &FailedOperation) -> Self {
        match op.operation_kind {
            OperationKind::Mint => ChainAction::Mint {
                source_token: NATIVE_TOKEN,
                recipient: op.recipient,
                amount: op.amount,
                source_nonce: op.nonce,
                source_chain: op.source_chain_id,
            },
            OperationKind::Unlock => ChainAction::Unlock {
                recipient: op.recipient,
                amount: op.amount,
                source_nonce: op.nonce,
                source_chain: op.source_chain_id,
            },
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            ChainAction::Mint { .. } => OperationKind::Mint,
            ChainAction::Unlock { .. } => OperationKind::Unlock,
        }
    }
}

/// Final receipt status of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Success,
    Reverted,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Human-readable chain name for logs and metric labels
    fn name(&self) -> &str;

    /// Sign and broadcast `action`, returning the transaction id
    async fn submit(&self, action: &ChainAction) -> Result<B256, ChainError>;

    /// Wait up to `timeout` for the receipt of `tx_hash`
    async fn confirm(&self, tx_hash: B256, timeout: Duration)
        -> Result<ConfirmOutcome, ChainError>;

    /// Lazy, never-ending sequence of `kind` events emitted on this chain,
    /// in emission order
    fn subscribe(&self, kind: EventKind) -> BoxStream<'static, BridgeEvent>;
}

/// The two chains the relayer bridges
#[derive(Clone)]
pub struct ChainPair {
    /// Chain A: emits `Locked`, executes `unlock`
    pub source: Arc<dyn ChainClient>,
    /// Chain B: emits `Burned`, executes `mint`
    pub destination: Arc<dyn ChainClient>,
}

impl ChainPair {
    pub fn new(source: Arc<dyn ChainClient>, destination: Arc<dyn ChainClient>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Chain that executes actions of `kind`
    pub fn executor(&self, kind: OperationKind) -> &Arc<dyn ChainClient> {
        match kind {
            OperationKind::Mint => &self.destination,
            OperationKind::Unlock => &self.source,
        }
    }

    /// Chain that emits events of `kind`
    pub fn emitter(&self, kind: EventKind) -> &Arc<dyn ChainClient> {
        match kind {
            EventKind::Locked => &self.source,
            EventKind::Burned => &self.destination,
        }
    }
}
