//! Submitter side of the relayer: writes sealed checkpoints to the base
//! chain as a pair of null-data transactions.
//!
//! The two transactions are independent. If the second one cannot be built
//! or broadcast after the first went out, the checkpoint stays
//! half-submitted; the failure says so and [`SubmissionHook`] is told.

mod consumer;
mod tx;
mod utxo;

pub use consumer::SealedCheckpointConsumer;
pub use utxo::select_two_funding_utxos;

use std::sync::Arc;

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Amount, Transaction, Txid};
use tracing::{debug, info, warn};

use crate::consensus::{CheckpointEncoder, CodecError, RawCheckpointWithMeta, SubmitterId};
use crate::error::CoreError;
use crate::rpc::{BtcRpc, WalletBackend};
use crate::types::{ScriptType, Utxo};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("could not encode checkpoint: {0}")]
    Encode(#[from] CodecError),

    #[error("need two spendable outputs, wallet has {found}")]
    InsufficientUtxos { found: usize },

    #[error("output worth {amount} cannot pay fee {fee}")]
    InsufficientFees { fee: Amount, amount: Amount },

    #[error("cannot sign for {0} outputs")]
    UnsupportedScript(ScriptType),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Source(CoreError),

    #[error("broadcast rejected: {0}")]
    Broadcast(#[source] CoreError),
}

/// How far a submission got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStage {
    Encode,
    SelectFunds,
    BuildFirst,
    BroadcastFirst,
    BuildSecond,
    BroadcastSecond,
}

impl std::fmt::Display for SubmitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode => write!(f, "encode"),
            Self::SelectFunds => write!(f, "select_funds"),
            Self::BuildFirst => write!(f, "build_first"),
            Self::BroadcastFirst => write!(f, "broadcast_first"),
            Self::BuildSecond => write!(f, "build_second"),
            Self::BroadcastSecond => write!(f, "broadcast_second"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("checkpoint for epoch {epoch} failed at {stage}: {source}")]
pub struct SubmissionFailure {
    pub epoch: u64,
    pub stage: SubmitStage,
    /// Set when the first transaction was already broadcast.
    pub first_txid: Option<Txid>,
    #[source]
    pub source: SubmitError,
}

impl SubmissionFailure {
    pub fn is_half_submitted(&self) -> bool {
        self.first_txid.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub tx: Transaction,
    pub txid: Txid,
}

/// Both transactions of a submitted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTxPair {
    pub epoch: u64,
    pub first: SentTx,
    pub second: SentTx,
}

/// Extension point for tracking submissions, keyed by epoch. The relayer
/// does not re-submit on its own.
pub trait SubmissionHook: Send + Sync {
    fn submitted(&self, _pair: &CheckpointTxPair) {}

    /// The first transaction of `epoch` is out but the second is not.
    fn half_submitted(&self, _epoch: u64, _first_txid: Txid) {}
}

pub struct NoopHook;

impl SubmissionHook for NoopHook {}

/// Builds, signs and broadcasts the transaction pair for a checkpoint.
///
/// `submit` takes `&mut self`: the wallet unlock and UTXO selection are not
/// safe to interleave, so one submission runs at a time.
pub struct Submitter {
    rpc: Arc<dyn BtcRpc>,
    wallet: Arc<dyn WalletBackend>,
    encoder: Box<dyn CheckpointEncoder>,
    submitter_id: SubmitterId,
    change_account: String,
    hook: Arc<dyn SubmissionHook>,
    secp: Secp256k1<All>,
    last: Option<CheckpointTxPair>,
}

impl Submitter {
    pub fn new(
        rpc: Arc<dyn BtcRpc>,
        wallet: Arc<dyn WalletBackend>,
        encoder: Box<dyn CheckpointEncoder>,
        submitter_id: SubmitterId,
    ) -> Self {
        Self {
            rpc,
            wallet,
            encoder,
            submitter_id,
            change_account: String::new(),
            hook: Arc::new(NoopHook),
            secp: Secp256k1::new(),
            last: None,
        }
    }

    /// Wallet account change addresses are drawn from; empty for the default.
    pub fn with_change_account(mut self, account: impl Into<String>) -> Self {
        self.change_account = account.into();
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn SubmissionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Submit `ckpt`, or return the pair already sent for its epoch while the
    /// node still knows both of its transactions.
    pub async fn submit(
        &mut self,
        ckpt: &RawCheckpointWithMeta,
    ) -> Result<CheckpointTxPair, SubmissionFailure> {
        let epoch = ckpt.epoch();
        if let Some(pair) = self.last.as_ref().filter(|pair| pair.epoch == epoch) {
            if self.in_flight(pair).await {
                info!(
                    epoch,
                    first_txid = %pair.first.txid,
                    second_txid = %pair.second.txid,
                    "checkpoint transactions still known to node, not resubmitting"
                );
                return Ok(pair.clone());
            }
            warn!(epoch, "earlier checkpoint transactions are gone, resubmitting");
        }
        let fail = |stage: SubmitStage, first_txid: Option<Txid>, source: SubmitError| {
            SubmissionFailure {
                epoch,
                stage,
                first_txid,
                source,
            }
        };

        let (first_data, second_data) = self
            .encoder
            .encode(&ckpt.ckpt, &self.submitter_id)
            .map_err(|e| fail(SubmitStage::Encode, None, e.into()))?;

        let fee = self.wallet.wallet_config().fee_per_tx;
        let utxos = self
            .wallet
            .list_unspent()
            .await
            .map_err(|e| fail(SubmitStage::SelectFunds, None, SubmitError::Source(e)))?;
        let (first_utxo, second_utxo) = select_two_funding_utxos(utxos, fee)
            .map_err(|e| fail(SubmitStage::SelectFunds, None, e))?;

        let first = self
            .build_signed(&first_utxo, &first_data, fee)
            .await
            .map_err(|e| fail(SubmitStage::BuildFirst, None, e))?;
        let first_txid = self
            .rpc
            .send_raw_transaction(&first, true)
            .await
            .map_err(|e| fail(SubmitStage::BroadcastFirst, None, SubmitError::Broadcast(e)))?;
        debug!(epoch, txid = %first_txid, "broadcast first checkpoint transaction");

        let second = match self.build_signed(&second_utxo, &second_data, fee).await {
            Ok(tx) => tx,
            Err(e) => {
                self.hook.half_submitted(epoch, first_txid);
                return Err(fail(SubmitStage::BuildSecond, Some(first_txid), e));
            }
        };
        let second_txid = match self.rpc.send_raw_transaction(&second, true).await {
            Ok(txid) => txid,
            Err(e) => {
                self.hook.half_submitted(epoch, first_txid);
                return Err(fail(
                    SubmitStage::BroadcastSecond,
                    Some(first_txid),
                    SubmitError::Broadcast(e),
                ));
            }
        };

        let pair = CheckpointTxPair {
            epoch,
            first: SentTx {
                tx: first,
                txid: first_txid,
            },
            second: SentTx {
                tx: second,
                txid: second_txid,
            },
        };
        info!(
            epoch,
            first_txid = %first_txid,
            second_txid = %second_txid,
            "submitted checkpoint to base chain"
        );
        self.hook.submitted(&pair);
        self.last = Some(pair.clone());
        Ok(pair)
    }

    /// Whether the node still has both transactions, in its mempool or in a
    /// block. Without txindex a confirmed transaction is only visible through
    /// its unspent change output.
    async fn in_flight(&self, pair: &CheckpointTxPair) -> bool {
        for sent in [&pair.first, &pair.second] {
            match self.rpc.get_raw_transaction_verbose(&sent.txid).await {
                Ok(node) => {
                    debug!(
                        txid = %node.txid,
                        confirmed = node.is_confirmed(),
                        confirmations = node.confirmations.unwrap_or(0),
                        "checkpoint transaction known to node"
                    );
                    continue;
                }
                Err(e) => debug!(txid = %sent.txid, error = %e, "transaction lookup failed"),
            }
            match self.rpc.get_tx_out(&sent.txid, tx::CHANGE_VOUT, true).await {
                Ok(Some(_)) => {}
                Ok(None) => return false,
                Err(e) => {
                    warn!(txid = %sent.txid, error = %e, "could not check change output");
                    return false;
                }
            }
        }
        true
    }

    async fn build_signed(
        &self,
        utxo: &Utxo,
        data: &[u8],
        fee: Amount,
    ) -> Result<Transaction, SubmitError> {
        let change = self
            .wallet
            .get_raw_change_address(&self.change_account)
            .await
            .map_err(SubmitError::Source)?;
        let mut tx = tx::build_data_tx(utxo, data, &change, fee)?;

        let config = self.wallet.wallet_config();
        self.wallet
            .wallet_passphrase(&config.wallet_password, config.wallet_lock_time)
            .await
            .map_err(SubmitError::Source)?;
        let key = self
            .wallet
            .dump_priv_key(&utxo.address)
            .await
            .map_err(SubmitError::Source)?;
        tx::sign_input(&self.secp, &mut tx, utxo, &key)?;
        Ok(tx)
    }
}
