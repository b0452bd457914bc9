//! Shared test helpers for `anchorwatch-core` unit tests.
//!
//! Deterministic builders for txids, header chains, forks, wallet keys and
//! UTXOs so tests across modules share a single source of dummy data.

use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{
    Address, Amount, BlockHash, CompactTarget, CompressedPublicKey, Network, PrivateKey, ScriptBuf,
    TxMerkleNode, Txid,
};

use crate::types::{BlockHeight, IndexedBlock, Utxo};

// ==============================================================================
// Hash Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub fn hash_from_byte(b: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    BlockHash::from_byte_array(bytes)
}

// ==============================================================================
// Block Builders
// ==============================================================================

/// A header on top of `prev`. `salt` feeds the nonce so sibling headers at
/// the same height hash differently.
pub fn make_header(prev: BlockHash, height: BlockHeight, salt: u32) -> Header {
    Header {
        version: Version::TWO,
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::all_zeros(),
        time: 1_700_000_000 + *height,
        bits: CompactTarget::from_consensus(0x207f_ffff),
        nonce: height.0.wrapping_mul(31).wrapping_add(salt),
    }
}

pub fn make_block(prev: BlockHash, height: BlockHeight, salt: u32) -> IndexedBlock {
    IndexedBlock {
        height,
        header: make_header(prev, height, salt),
        txs: Vec::new(),
    }
}

/// A contiguous chain of `count` blocks starting at `start`, the first one
/// built on an all-zero parent hash.
pub fn build_chain(start: BlockHeight, count: usize) -> Vec<IndexedBlock> {
    let mut blocks: Vec<IndexedBlock> = Vec::with_capacity(count);
    let mut prev = BlockHash::all_zeros();
    let mut height = start;
    for _ in 0..count {
        let block = make_block(prev, height, 0);
        prev = block.hash();
        height = height.next();
        blocks.push(block);
    }
    blocks
}

/// `count` blocks extending `parent`, distinguished from other forks by `salt`.
pub fn extend_chain(parent: &IndexedBlock, count: usize, salt: u32) -> Vec<IndexedBlock> {
    let mut blocks: Vec<IndexedBlock> = Vec::with_capacity(count);
    let mut prev = parent.hash();
    let mut height = parent.height.next();
    for _ in 0..count {
        let block = make_block(prev, height, salt);
        prev = block.hash();
        height = height.next();
        blocks.push(block);
    }
    blocks
}

// ==============================================================================
// Script Builders
// ==============================================================================

pub fn op_return_script(data: &[u8]) -> ScriptBuf {
    let push = PushBytesBuf::try_from(data.to_vec()).expect("test payload fits a push");
    ScriptBuf::new_op_return(push)
}

/// A minimal valid P2WPKH scriptPubKey: OP_0 PUSH20 <20-byte-hash>.
pub fn p2wpkh_script() -> ScriptBuf {
    let script_bytes = [
        0x00, 0x14, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
        0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14,
    ];
    ScriptBuf::from_bytes(script_bytes.to_vec())
}

// ==============================================================================
// Keys and UTXOs
// ==============================================================================

pub fn test_key(b: u8) -> PrivateKey {
    let secret = SecretKey::from_slice(&[b.max(1); 32]).expect("non-zero secret is valid");
    PrivateKey::new(secret, Network::Regtest)
}

pub fn p2pkh_address(key: &PrivateKey) -> Address {
    let secp = Secp256k1::signing_only();
    Address::p2pkh(key.public_key(&secp).pubkey_hash(), Network::Regtest)
}

pub fn p2wpkh_address(key: &PrivateKey) -> Address {
    let secp = Secp256k1::signing_only();
    let pubkey =
        CompressedPublicKey::from_private_key(&secp, key).expect("test keys are compressed");
    Address::p2wpkh(&pubkey, Network::Regtest)
}

/// A spendable UTXO paying `sats` to `address`.
pub fn make_utxo(txid_byte: u8, vout: u32, address: &Address, sats: u64) -> Utxo {
    Utxo {
        txid: txid_from_byte(txid_byte),
        vout,
        address: address.clone(),
        script_pub_key: address.script_pubkey(),
        amount: Amount::from_sat(sats),
        spendable: true,
    }
}
