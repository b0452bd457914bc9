use bitcoin::absolute::LockTime;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Witness,
};

use crate::consensus::codec::{check_chunk_len, CodecError};
use crate::types::{ScriptType, Utxo};

use super::SubmitError;

/// Output index of the change output in a data transaction.
pub(crate) const CHANGE_VOUT: u32 = 1;

/// An unsigned transaction spending `utxo` into a null-data output carrying
/// `data` and a change output worth `utxo.amount - fee`.
pub(crate) fn build_data_tx(
    utxo: &Utxo,
    data: &[u8],
    change: &Address,
    fee: Amount,
) -> Result<Transaction, SubmitError> {
    let change_value = utxo
        .amount
        .checked_sub(fee)
        .ok_or(SubmitError::InsufficientFees {
            fee,
            amount: utxo.amount,
        })?;
    check_chunk_len(0, data)?;
    let payload = PushBytesBuf::try_from(data.to_vec()).map_err(|_| {
        CodecError::ChunkTooLarge {
            part: 0,
            len: data.len(),
        }
    })?;

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: utxo.outpoint(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![
            TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::new_op_return(payload),
            },
            TxOut {
                value: change_value,
                script_pubkey: change.script_pubkey(),
            },
        ],
    })
}

/// Sign input 0 of `tx`, which spends `utxo`, with SIGHASH_ALL.
pub(crate) fn sign_input(
    secp: &Secp256k1<All>,
    tx: &mut Transaction,
    utxo: &Utxo,
    key: &PrivateKey,
) -> Result<(), SubmitError> {
    if utxo.address.script_pubkey() != utxo.script_pub_key {
        return Err(SubmitError::InvalidAddress(format!(
            "output {} pays {} but is listed under {}",
            utxo.outpoint(),
            utxo.script_pub_key,
            utxo.address
        )));
    }

    match ScriptType::of(&utxo.script_pub_key) {
        ScriptType::P2pkh => {
            let pubkey = key.public_key(secp);
            if ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()) != utxo.script_pub_key {
                return Err(key_mismatch(utxo));
            }
            let sighash = SighashCache::new(&*tx)
                .legacy_signature_hash(0, &utxo.script_pub_key, EcdsaSighashType::All.to_u32())
                .map_err(|e| SubmitError::Signing(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &key.inner));
            tx.input[0].script_sig = ScriptBuf::builder()
                .push_slice(sig.serialize())
                .push_key(&pubkey)
                .into_script();
        }
        ScriptType::P2wpkh => {
            let pubkey = CompressedPublicKey::from_private_key(secp, key)
                .map_err(|e| SubmitError::Signing(e.to_string()))?;
            if ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()) != utxo.script_pub_key {
                return Err(key_mismatch(utxo));
            }
            let sighash = SighashCache::new(&*tx)
                .p2wpkh_signature_hash(0, &utxo.script_pub_key, utxo.amount, EcdsaSighashType::All)
                .map_err(|e| SubmitError::Signing(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, &key.inner));
            tx.input[0].witness = Witness::p2wpkh(&sig, &pubkey.0);
        }
        other => return Err(SubmitError::UnsupportedScript(other)),
    }
    Ok(())
}

fn key_mismatch(utxo: &Utxo) -> SubmitError {
    SubmitError::Signing(format!("wallet key does not control {}", utxo.address))
}
