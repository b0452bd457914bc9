//! Base-chain and wallet RPC abstraction layer.
//!
//! Defines the [`BtcRpc`] and [`WalletBackend`] traits and provides JSON-RPC
//! implementations ([`HttpRpcClient`], [`HttpWallet`]) plus test mocks
//! (`mock::MockRpc`, `mock::MockWallet`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::{HttpRpcClient, HttpWallet};
pub use types::{ChainInfo, WalletConfig};

use async_trait::async_trait;
use bitcoin::{Address, BlockHash, PrivateKey, Transaction, Txid};

use crate::error::{CacheError, CoreError};
use crate::types::{BlockHeight, IndexedBlock, Point, TxNode, TxOutput, Utxo};

/// The base-chain node methods the reporter and submitter consume.
#[async_trait]
pub trait BtcRpc: Send + Sync {
    /// Basic chain info (network, block count, best hash, pruning status).
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError>;

    /// Height and hash of the current best block.
    async fn get_best_block(&self) -> Result<Point, CoreError> {
        let info = self.get_blockchain_info().await?;
        let height = u32::try_from(info.blocks).map_err(|_| {
            CoreError::InvalidData(format!("block count out of range: {}", info.blocks))
        })?;
        Ok(Point {
            height: BlockHeight(height),
            hash: info.best_block_hash,
        })
    }

    async fn get_block_by_hash(&self, hash: &BlockHash) -> Result<IndexedBlock, CoreError>;

    async fn get_block_by_height(&self, height: BlockHeight) -> Result<IndexedBlock, CoreError>;

    /// All blocks from `base_height` up to the current best block, oldest
    /// first. Fails if the fetched run is not a contiguous chain, which
    /// happens when the best chain moves while the window is being read.
    async fn find_tail_blocks_by_height(
        &self,
        base_height: BlockHeight,
    ) -> Result<Vec<IndexedBlock>, CoreError> {
        let best = self.get_best_block().await?;
        if base_height > best.height {
            return Err(CoreError::InvalidData(format!(
                "base height {base_height} is above best height {}",
                best.height
            )));
        }

        let mut blocks: Vec<IndexedBlock> =
            Vec::with_capacity((best.height.0 - base_height.0) as usize + 1);
        for height in base_height.0..=best.height.0 {
            let block = self.get_block_by_height(BlockHeight(height)).await?;
            if let Some(prev) = blocks.last() {
                if block.prev_hash() != prev.hash() {
                    return Err(CacheError::InvalidChain {
                        expected: prev.hash(),
                        found: block.prev_hash(),
                    }
                    .into());
                }
            }
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Broadcast a signed transaction. `allow_high_fees` lifts the node's
    /// absurd-fee protection.
    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<Txid, CoreError>;

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> Result<TxNode, CoreError>;

    /// Fetch a specific unspent output. Returns `None` if it has been spent or
    /// does not exist.
    async fn get_tx_out(
        &self,
        txid: &Txid,
        vout: u32,
        include_mempool: bool,
    ) -> Result<Option<TxOutput>, CoreError>;
}

/// The wallet methods the submitter consumes to fund and sign transactions.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    async fn list_unspent(&self) -> Result<Vec<Utxo>, CoreError>;

    async fn get_raw_change_address(&self, account: &str) -> Result<Address, CoreError>;

    async fn dump_priv_key(&self, address: &Address) -> Result<PrivateKey, CoreError>;

    /// Unlock the wallet's key store for `timeout_secs` seconds.
    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64)
        -> Result<(), CoreError>;

    fn wallet_config(&self) -> &WalletConfig;
}
