//! Domain types shared by the reporter and submitter pipelines.
//!
//! Contains the block model (`IndexedBlock`, `Point`, `BlockHeight`), the
//! block event types fed to the dispatcher, wallet outputs (`Utxo`) and the
//! decoded transaction view returned by verbose RPC lookups (`TxNode`).

use bitcoin::block::Header;
use bitcoin::{Address, Amount, Block, BlockHash, OutPoint, Script, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

// ==============================================================================
// Block Height
// ==============================================================================

/// A Bitcoin block height, wrapped for type safety.
///
/// `#[serde(transparent)]` preserves the JSON representation as a bare
/// integer, so this newtype is wire-compatible with plain `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl BlockHeight {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u32 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Blocks
// ==============================================================================

/// Height and hash of a block; the cheap identity readers get from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub height: BlockHeight,
    pub hash: BlockHash,
}

/// A base-chain block together with its height.
///
/// Immutable once built; identity is the header hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlock {
    pub height: BlockHeight,
    pub header: Header,
    pub txs: Vec<Transaction>,
}

impl IndexedBlock {
    pub fn new(height: BlockHeight, block: Block) -> Self {
        Self {
            height,
            header: block.header,
            txs: block.txdata,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    pub fn point(&self) -> Point {
        Point {
            height: self.height,
            hash: self.hash(),
        }
    }

    /// Rebuild the full consensus block.
    pub fn to_block(&self) -> Block {
        Block {
            header: self.header,
            txdata: self.txs.clone(),
        }
    }
}

// ==============================================================================
// Block Events
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockEventType {
    Connected,
    Disconnected,
}

impl std::fmt::Display for BlockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A block connected to or disconnected from the base chain's best chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub event_type: BlockEventType,
    pub height: BlockHeight,
    pub header: Header,
}

impl BlockEvent {
    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }
}

/// A low-latency notice carrying only the block hash; the receiver must
/// fetch the block itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNotice {
    pub hash: BlockHash,
    pub event_type: BlockEventType,
}

impl From<BlockEvent> for SequenceNotice {
    fn from(event: BlockEvent) -> Self {
        Self {
            hash: event.hash(),
            event_type: event.event_type,
        }
    }
}

// ==============================================================================
// Wallet Outputs
// ==============================================================================

/// An unspent output reported by the wallet backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub address: Address,
    pub script_pub_key: ScriptBuf,
    pub amount: Amount,
    pub spendable: bool,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

// ==============================================================================
// Script Type Classification
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    P2pk,
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    BareMultisig,
    OpReturn,
    Unknown,
}

impl ScriptType {
    /// Classify a script with the `bitcoin` crate's built-in detection.
    #[must_use]
    pub fn of(script: &Script) -> Self {
        if script.is_p2pk() {
            Self::P2pk
        } else if script.is_p2pkh() {
            Self::P2pkh
        } else if script.is_p2sh() {
            Self::P2sh
        } else if script.is_p2wpkh() {
            Self::P2wpkh
        } else if script.is_p2wsh() {
            Self::P2wsh
        } else if script.is_p2tr() {
            Self::P2tr
        } else if script.is_multisig() {
            Self::BareMultisig
        } else if script.is_op_return() {
            Self::OpReturn
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P2pk => write!(f, "p2pk"),
            Self::P2pkh => write!(f, "p2pkh"),
            Self::P2sh => write!(f, "p2sh"),
            Self::P2wpkh => write!(f, "p2wpkh"),
            Self::P2wsh => write!(f, "p2wsh"),
            Self::P2tr => write!(f, "p2tr"),
            Self::BareMultisig => write!(f, "bare_multisig"),
            Self::OpReturn => write!(f, "op_return"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ==============================================================================
// Decoded Transactions
// ==============================================================================

/// A transaction as returned by a verbose `getrawtransaction` lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxNode {
    pub txid: Txid,
    pub block_hash: Option<BlockHash>,
    /// `None` for mempool transactions.
    pub confirmations: Option<u64>,
    pub outputs: Vec<TxOutput>,
}

impl TxNode {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub script_pub_key: ScriptBuf,
    pub script_type: ScriptType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn indexed_block_round_trips_into_full_block() {
        let chain = build_chain(BlockHeight(7), 2);
        let second = &chain[1];
        let block = second.to_block();
        assert_eq!(block.block_hash(), second.hash());
        assert_eq!(second.prev_hash(), chain[0].hash());
        assert_eq!(second.point().height, BlockHeight(8));
    }

    #[test]
    fn block_event_reduces_to_notice() {
        let chain = build_chain(BlockHeight(3), 1);
        let block = &chain[0];
        let event = BlockEvent {
            event_type: BlockEventType::Disconnected,
            height: block.height,
            header: block.header,
        };
        let notice = SequenceNotice::from(event);
        assert_eq!(notice.hash, block.hash());
        assert_eq!(notice.event_type, BlockEventType::Disconnected);
    }

    #[test]
    fn classify_op_return_script() {
        let script = op_return_script(&[0xde, 0xad]);
        assert_eq!(ScriptType::of(&script), ScriptType::OpReturn);
        assert_eq!(ScriptType::of(&p2wpkh_script()), ScriptType::P2wpkh);
    }
}
