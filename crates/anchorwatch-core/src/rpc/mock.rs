use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::{Address, Amount, BlockHash, PrivateKey, Transaction, Txid};

use crate::error::{CoreError, RpcError};
use crate::types::{BlockHeight, IndexedBlock, ScriptType, TxNode, TxOutput, Utxo};

use super::types::{ChainInfo, WalletConfig};
use super::{BtcRpc, WalletBackend};

// ==============================================================================
// MockRpc
// ==============================================================================

/// A mock base-chain node for testing. Serves blocks from an in-memory best
/// chain that tests can swap out to simulate reorgs; blocks that left the
/// best chain stay fetchable by hash, as on a real node.
pub struct MockRpc {
    state: Mutex<ChainState>,
    unreachable: Mutex<bool>,
    failing_broadcasts: HashSet<usize>,
    broadcast_calls: AtomicUsize,
    best_block_calls: AtomicUsize,
    broadcasts: Mutex<Vec<Transaction>>,
    evicted: Mutex<HashSet<Txid>>,
    tx_lookup: bool,
}

struct ChainState {
    best_chain: Vec<IndexedBlock>,
    by_hash: HashMap<BlockHash, IndexedBlock>,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            chain: Vec::new(),
            failing_broadcasts: HashSet::new(),
            tx_lookup: true,
        }
    }

    /// Replace the best chain, keeping previously served blocks fetchable.
    pub fn set_chain(&self, chain: Vec<IndexedBlock>) {
        let mut state = self.state.lock().expect("mock state lock");
        for block in &chain {
            state.by_hash.insert(block.hash(), block.clone());
        }
        state.best_chain = chain;
    }

    /// Make every chain query fail as if the node were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().expect("mock state lock") = unreachable;
    }

    pub fn best_block_calls(&self) -> usize {
        self.best_block_calls.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().expect("mock state lock").clone()
    }

    /// Forget a broadcast transaction, as if it had dropped out of the mempool.
    pub fn evict(&self, txid: Txid) {
        self.evicted.lock().expect("mock state lock").insert(txid);
    }

    fn known_tx(&self, txid: &Txid) -> Option<Transaction> {
        if self.evicted.lock().expect("mock state lock").contains(txid) {
            return None;
        }
        self.broadcasts
            .lock()
            .expect("mock state lock")
            .iter()
            .find(|tx| tx.compute_txid() == *txid)
            .cloned()
    }

    fn check_reachable(&self) -> Result<(), CoreError> {
        if *self.unreachable.lock().expect("mock state lock") {
            return Err(RpcError::InvalidResponse("node unreachable".into()).into());
        }
        Ok(())
    }
}

pub struct MockRpcBuilder {
    chain: Vec<IndexedBlock>,
    failing_broadcasts: HashSet<usize>,
    tx_lookup: bool,
}

impl MockRpcBuilder {
    pub fn with_chain(mut self, chain: Vec<IndexedBlock>) -> Self {
        self.chain = chain;
        self
    }

    /// Fail the `n`-th call (zero-based) to `send_raw_transaction`.
    pub fn failing_broadcast(mut self, n: usize) -> Self {
        self.failing_broadcasts.insert(n);
        self
    }

    /// Fail every `getrawtransaction` lookup, like a node without txindex
    /// asked about a confirmed transaction.
    pub fn without_tx_lookup(mut self) -> Self {
        self.tx_lookup = false;
        self
    }

    pub fn build(self) -> MockRpc {
        let by_hash = self
            .chain
            .iter()
            .map(|block| (block.hash(), block.clone()))
            .collect();
        MockRpc {
            state: Mutex::new(ChainState {
                best_chain: self.chain,
                by_hash,
            }),
            unreachable: Mutex::new(false),
            failing_broadcasts: self.failing_broadcasts,
            broadcast_calls: AtomicUsize::new(0),
            best_block_calls: AtomicUsize::new(0),
            broadcasts: Mutex::new(Vec::new()),
            evicted: Mutex::new(HashSet::new()),
            tx_lookup: self.tx_lookup,
        }
    }
}

#[async_trait]
impl BtcRpc for MockRpc {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        self.check_reachable()?;
        self.best_block_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().expect("mock state lock");
        let tip = state.best_chain.last().ok_or(CoreError::EmptyChain)?;
        Ok(ChainInfo {
            chain: "regtest".into(),
            blocks: u64::from(tip.height.0),
            best_block_hash: tip.hash(),
            pruned: false,
        })
    }

    async fn get_block_by_hash(&self, hash: &BlockHash) -> Result<IndexedBlock, CoreError> {
        self.check_reachable()?;
        let state = self.state.lock().expect("mock state lock");
        state
            .by_hash
            .get(hash)
            .cloned()
            .ok_or(CoreError::BlockNotFound(*hash))
    }

    async fn get_block_by_height(&self, height: BlockHeight) -> Result<IndexedBlock, CoreError> {
        self.check_reachable()?;
        let state = self.state.lock().expect("mock state lock");
        state
            .best_chain
            .iter()
            .find(|block| block.height == height)
            .cloned()
            .ok_or_else(|| CoreError::InvalidData(format!("no block at height {height}")))
    }

    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        _allow_high_fees: bool,
    ) -> Result<Txid, CoreError> {
        let call = self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_broadcasts.contains(&call) {
            return Err(RpcError::ServerError {
                code: -26,
                message: "txn-mempool-conflict".into(),
            }
            .into());
        }
        self.broadcasts
            .lock()
            .expect("mock state lock")
            .push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> Result<TxNode, CoreError> {
        let tx = self
            .known_tx(txid)
            .filter(|_| self.tx_lookup)
            .ok_or_else(|| RpcError::ServerError {
                code: -5,
                message: "No such mempool or blockchain transaction".into(),
            })?;
        Ok(TxNode {
            txid: *txid,
            block_hash: None,
            confirmations: None,
            outputs: tx
                .output
                .iter()
                .map(|out| TxOutput {
                    value: out.value,
                    script_pub_key: out.script_pubkey.clone(),
                    script_type: ScriptType::of(&out.script_pubkey),
                })
                .collect(),
        })
    }

    async fn get_tx_out(
        &self,
        txid: &Txid,
        vout: u32,
        _include_mempool: bool,
    ) -> Result<Option<TxOutput>, CoreError> {
        let Some(tx) = self.known_tx(txid) else {
            return Ok(None);
        };
        Ok(tx.output.get(vout as usize).map(|out| TxOutput {
            value: out.value,
            script_pub_key: out.script_pubkey.clone(),
            script_type: ScriptType::of(&out.script_pubkey),
        }))
    }
}

// ==============================================================================
// MockWallet
// ==============================================================================

/// A mock wallet backend holding canned UTXOs and keys.
pub struct MockWallet {
    utxos: Vec<Utxo>,
    keys: HashMap<Address, PrivateKey>,
    change_address: Address,
    config: WalletConfig,
    unlocks: AtomicUsize,
}

impl MockWallet {
    pub fn new(change_address: Address, fee_per_tx: Amount) -> Self {
        Self {
            utxos: Vec::new(),
            keys: HashMap::new(),
            change_address,
            config: WalletConfig {
                fee_per_tx,
                wallet_password: "hunter2".into(),
                wallet_lock_time: 10,
            },
            unlocks: AtomicUsize::new(0),
        }
    }

    pub fn with_utxo(mut self, utxo: Utxo) -> Self {
        self.utxos.push(utxo);
        self
    }

    pub fn with_key(mut self, address: Address, key: PrivateKey) -> Self {
        self.keys.insert(address, key);
        self
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletBackend for MockWallet {
    async fn list_unspent(&self) -> Result<Vec<Utxo>, CoreError> {
        Ok(self.utxos.clone())
    }

    async fn get_raw_change_address(&self, _account: &str) -> Result<Address, CoreError> {
        Ok(self.change_address.clone())
    }

    async fn dump_priv_key(&self, address: &Address) -> Result<PrivateKey, CoreError> {
        self.keys.get(address).copied().ok_or_else(|| {
            CoreError::Rpc(RpcError::ServerError {
                code: -4,
                message: format!("private key for address {address} is not known"),
            })
        })
    }

    async fn wallet_passphrase(
        &self,
        passphrase: &str,
        _timeout_secs: u64,
    ) -> Result<(), CoreError> {
        if passphrase != self.config.wallet_password {
            return Err(RpcError::ServerError {
                code: -14,
                message: "The wallet passphrase entered was incorrect.".into(),
            }
            .into());
        }
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wallet_config(&self) -> &WalletConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn best_block_follows_replaced_chain() {
        let chain = build_chain(BlockHeight(100), 3);
        let rpc = MockRpc::builder().with_chain(chain.clone()).build();
        assert_eq!(rpc.get_best_block().await.unwrap().hash, chain[2].hash());

        let fork = extend_chain(&chain[1], 2, 5);
        let mut reorged = chain[..2].to_vec();
        reorged.extend(fork.iter().cloned());
        rpc.set_chain(reorged);

        let best = rpc.get_best_block().await.unwrap();
        assert_eq!(best.hash, fork[1].hash());
        assert_eq!(best.height, BlockHeight(103));
        // the stale tip stays fetchable by hash
        assert!(rpc.get_block_by_hash(&chain[2].hash()).await.is_ok());
    }

    #[tokio::test]
    async fn default_find_tail_returns_window_to_tip() {
        let chain = build_chain(BlockHeight(0), 8);
        let rpc = MockRpc::builder().with_chain(chain.clone()).build();

        let tail = rpc.find_tail_blocks_by_height(BlockHeight(5)).await.unwrap();
        let heights: Vec<_> = tail.iter().map(|b| b.height.0).collect();
        assert_eq!(heights, vec![5, 6, 7]);
        assert!(rpc.find_tail_blocks_by_height(BlockHeight(9)).await.is_err());
    }

    #[tokio::test]
    async fn wallet_rejects_wrong_passphrase() {
        let key = test_key(1);
        let wallet = MockWallet::new(p2pkh_address(&key), Amount::from_sat(1000));
        assert!(wallet.wallet_passphrase("nope", 5).await.is_err());
        wallet.wallet_passphrase("hunter2", 5).await.unwrap();
        assert_eq!(wallet.unlocks(), 1);
    }
}
