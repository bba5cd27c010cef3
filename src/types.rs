//! Common types for relayed bridge operations
//!
//! Events observed on either chain, the per-operation status record served to
//! clients, and the retry candidate kept in the retry queue.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker recorded as `destTxHash` when the destination contract reports the
/// operation was already performed.
pub const ALREADY_PROCESSED_MARKER: &str = "already-processed";

/// Source-token identity passed to `mintTokens` for the native asset locked on
/// the source chain.
pub const NATIVE_TOKEN: Address = Address::ZERO;

// ============================================================================
// Events
// ============================================================================

/// Kind of bridge event consumed by the relayer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Value escrowed on the source chain
    Locked,
    /// Wrapped value destroyed on the destination chain
    Burned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Locked => "locked",
            EventKind::Burned => "burned",
        }
    }

    /// Action issued on the opposite chain in response to this event
    pub fn counter_action(&self) -> OperationKind {
        match self {
            EventKind::Locked => OperationKind::Mint,
            EventKind::Burned => OperationKind::Unlock,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bridge event emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub kind: EventKind,
    /// Chain the event was emitted on
    pub source_chain: u64,
    /// Chain named in the event payload
    pub destination_chain: u64,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    /// Per-direction nonce assigned by the source contract
    pub nonce: U256,
    pub source_tx_hash: B256,
    pub log_index: u64,
    pub block_number: Option<u64>,
    /// Wrapped token burned (Burned events only)
    pub wrapped_token: Option<Address>,
}

impl BridgeEvent {
    /// Identity of the exact emission, used for deduplication
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind,
            tx_hash: self.source_tx_hash,
            log_index: self.log_index,
        }
    }

    /// Normalized status-store key of the source transaction
    pub fn status_key(&self) -> String {
        tx_hash_key(&self.source_tx_hash)
    }
}

/// `(sourceTxHash, logIndex)`, scoped by event kind since each kind is read
/// from a different chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: EventKind,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Lowercase 0x-prefixed hex of a transaction hash
pub fn tx_hash_key(hash: &B256) -> String {
    format!("0x{:x}", hash)
}

/// Case-normalize a client-supplied transaction hash
pub fn normalize_tx_hash(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ============================================================================
// Status lifecycle
// ============================================================================

/// Lifecycle state of a bridge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Pending => "pending",
            TxState::Processing => "processing",
            TxState::Complete => "complete",
            TxState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Complete | TxState::Failed)
    }

    /// Position along pending -> processing -> {complete | failed}
    fn rank(&self) -> u8 {
        match self {
            TxState::Pending => 0,
            TxState::Processing => 1,
            TxState::Complete | TxState::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: TxState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record served by `GET /status/{sourceTxHash}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    #[serde(rename = "status")]
    pub state: TxState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TransactionStatus {
    pub fn pending() -> Self {
        Self::with_state(TxState::Pending)
    }

    pub fn processing() -> Self {
        Self::with_state(TxState::Processing)
    }

    pub fn complete(dest_tx_hash: impl Into<String>) -> Self {
        Self {
            dest_tx_hash: Some(dest_tx_hash.into()),
            ..Self::with_state(TxState::Complete)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_state(TxState::Failed)
        }
    }

    fn with_state(state: TxState) -> Self {
        Self {
            state,
            dest_tx_hash: None,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Retry candidates
// ============================================================================

/// Destination action performed for a bridge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Mint,
    Unlock,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Mint => "mint",
            OperationKind::Unlock => "unlock",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation whose dispatch failed and awaits the retry loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    #[serde(rename = "type")]
    pub operation_kind: OperationKind,
    /// Normalized source transaction hash
    pub source_tx_hash: String,
    pub recipient: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    #[serde(with = "u256_decimal")]
    pub nonce: U256,
    /// Chain the originating event was emitted on
    pub source_chain_id: u64,
    /// Attempts made so far, including the initial dispatch
    pub attempts: u32,
    pub last_error: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl FailedOperation {
    /// Build the queue entry for an event whose first dispatch attempt failed
    pub fn from_event(event: &BridgeEvent, error: impl Into<String>) -> Self {
        Self {
            operation_kind: event.kind.counter_action(),
            source_tx_hash: event.status_key(),
            recipient: event.recipient,
            amount: event.amount,
            nonce: event.nonce,
            source_chain_id: event.source_chain,
            attempts: 1,
            last_error: error.into(),
            created_at: Utc::now(),
        }
    }
}

/// Serializes a `U256` as a base-10 string
mod u256_decimal {
    use alloy::primitives::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Locked event with a tx hash derived from `seed`
    pub fn locked_event(seed: u8, log_index: u64, nonce: u64) -> BridgeEvent {
        BridgeEvent {
            kind: EventKind::Locked,
            source_chain: 11155111,
            destination_chain: 84532,
            sender: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            amount: U256::from(1_000_000_000_000_000_000u128),
            nonce: U256::from(nonce),
            source_tx_hash: B256::repeat_byte(seed),
            log_index,
            block_number: Some(100),
            wrapped_token: None,
        }
    }

    /// Burned event with a tx hash derived from `seed`
    pub fn burned_event(seed: u8, log_index: u64, nonce: u64) -> BridgeEvent {
        BridgeEvent {
            kind: EventKind::Burned,
            source_chain: 84532,
            destination_chain: 11155111,
            wrapped_token: Some(Address::repeat_byte(0x33)),
            ..locked_event(seed, log_index, nonce)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_state_transitions_are_monotonic() {
        assert!(TxState::Pending.can_transition_to(TxState::Processing));
        assert!(TxState::Processing.can_transition_to(TxState::Complete));
        assert!(TxState::Processing.can_transition_to(TxState::Failed));
        assert!(TxState::Pending.can_transition_to(TxState::Failed));

        assert!(!TxState::Processing.can_transition_to(TxState::Pending));
        assert!(!TxState::Processing.can_transition_to(TxState::Processing));
        assert!(!TxState::Complete.can_transition_to(TxState::Failed));
        assert!(!TxState::Failed.can_transition_to(TxState::Complete));
    }

    #[test]
    fn test_status_json_shape() {
        let status = TransactionStatus::complete("0xabc");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "complete");
        assert_eq!(json["destTxHash"], "0xabc");
        assert!(json.get("error").is_none());
        assert!(json["timestamp"].is_i64());

        let json = serde_json::to_value(TransactionStatus::failed("boom")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("destTxHash").is_none());
    }

    #[test]
    fn test_failed_operation_json_shape() {
        let event = locked_event(0xaa, 3, 7);
        let op = FailedOperation::from_event(&event, "nonce too low");
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["type"], "mint");
        assert_eq!(json["sourceTxHash"], tx_hash_key(&B256::repeat_byte(0xaa)));
        assert_eq!(json["amount"], "1000000000000000000");
        assert_eq!(json["nonce"], "7");
        assert_eq!(json["attempts"], 1);
        assert_eq!(json["lastError"], "nonce too low");
        assert_eq!(json["sourceChainId"], 11155111);
    }

    #[test]
    fn test_counter_actions() {
        assert_eq!(EventKind::Locked.counter_action(), OperationKind::Mint);
        assert_eq!(EventKind::Burned.counter_action(), OperationKind::Unlock);
        assert_eq!(
            FailedOperation::from_event(&burned_event(1, 0, 1), "x").operation_kind,
            OperationKind::Unlock
        );
    }

    #[test]
    fn test_tx_hash_normalization() {
        let hash = B256::repeat_byte(0xab);
        let key = tx_hash_key(&hash);
        assert!(key.starts_with("0xabab"));
        assert_eq!(normalize_tx_hash(&key.to_uppercase().replace("0X", "0x")), key);
        assert_eq!(normalize_tx_hash("  0xABCD "), "0xabcd");
    }

    #[test]
    fn test_dedup_key_ignores_payload() {
        let a = locked_event(1, 0, 1);
        let mut b = a.clone();
        b.nonce = U256::from(99);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), locked_event(1, 1, 1).dedup_key());
    }
}
