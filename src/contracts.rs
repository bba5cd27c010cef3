//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the two bridge
//! contracts the relayer talks to.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

/// Selector of the `AlreadyProcessed()` custom error both bridge contracts
/// revert with when a `(sourceChainId, sourceNonce)` pair was already used.
pub const ALREADY_PROCESSED_SELECTOR: &str = "0x57eee766";

/// Name of the sentinel error as rendered by decoded revert messages
pub const ALREADY_PROCESSED_ERROR: &str = "AlreadyProcessed";

sol! {
    /// Source-chain bridge: escrows native value and releases it on unlock
    #[sol(rpc)]
    contract BridgeSource {
        /// Release escrowed value for a burn observed on the destination chain
        function unlockEth(
            address recipient,
            uint256 amount,
            uint256 sourceNonce,
            uint256 sourceChainId
        ) external;

        event EthLocked(
            address indexed sender,
            address indexed recipient,
            uint256 amount,
            uint256 nonce,
            uint256 destinationChainId
        );

        error AlreadyProcessed();
    }
}

sol! {
    /// Destination-chain bridge: mints and burns the wrapped representation
    #[sol(rpc)]
    contract BridgeDestination {
        /// Mint wrapped value for a lock observed on the source chain
        function mintTokens(
            address sourceToken,
            address recipient,
            uint256 amount,
            uint256 sourceNonce,
            uint256 sourceChainId
        ) external;

        event TokensBurned(
            address indexed wrappedToken,
            address indexed sender,
            address indexed recipient,
            uint256 amount,
            uint256 nonce,
            uint256 destinationChainId
        );

        error AlreadyProcessed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use alloy::sol_types::SolEvent;

    #[test]
    fn test_event_signatures() {
        assert_eq!(
            BridgeSource::EthLocked::SIGNATURE_HASH,
            keccak256(b"EthLocked(address,address,uint256,uint256,uint256)")
        );
        assert_eq!(
            BridgeDestination::TokensBurned::SIGNATURE_HASH,
            keccak256(b"TokensBurned(address,address,address,uint256,uint256,uint256)")
        );
    }
}
