//! RPC-specific types that do not belong to the shared domain model.

use bitcoin::{Amount, BlockHash};
use serde::Deserialize;

// ==============================================================================
// Chain Info
// ==============================================================================

/// Basic chain information from `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    #[serde(default)]
    pub pruned: bool,
}

// ==============================================================================
// Wallet Config
// ==============================================================================

/// Funding and unlock parameters the submitter reads from the wallet backend.
#[derive(Clone)]
pub struct WalletConfig {
    /// Flat fee deducted from every checkpoint transaction's change output.
    pub fee_per_tx: Amount,
    pub wallet_password: String,
    /// Seconds the key store stays unlocked after `walletpassphrase`.
    pub wallet_lock_time: u64,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("fee_per_tx", &self.fee_per_tx)
            .field("wallet_password", &"<redacted>")
            .field("wallet_lock_time", &self.wallet_lock_time)
            .finish()
    }
}
