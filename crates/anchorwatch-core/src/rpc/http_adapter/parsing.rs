use bitcoin::address::NetworkUnchecked;
use bitcoin::hex::FromHex;
use bitcoin::{Address, Amount, Block, BlockHash, Network, ScriptBuf, Txid};

use crate::error::CoreError;
use crate::types::{ScriptType, TxOutput, Utxo};

#[derive(serde::Deserialize)]
struct TxOutResponse {
    value: serde_json::Value,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: serde_json::Value,
}

pub(super) fn parse_gettxout_result(raw: serde_json::Value) -> Result<Option<TxOutput>, CoreError> {
    if raw.is_null() {
        return Ok(None);
    }

    let response: TxOutResponse = serde_json::from_value(raw)
        .map_err(|e| CoreError::InvalidData(format!("invalid gettxout result: {e}")))?;

    let value = parse_btc_amount(&response.value)?;
    let script_pub_key = parse_script_pubkey_from_json(&response.script_pubkey)?;
    let script_type = ScriptType::of(script_pub_key.as_script());

    Ok(Some(TxOutput {
        value,
        script_pub_key,
        script_type,
    }))
}

pub(super) fn parse_txid(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Txid, CoreError> {
    let value = value
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData(format!("missing {field}")))?;
    value
        .parse()
        .map_err(|e| CoreError::InvalidData(format!("invalid {field}: {e}")))
}

pub(super) fn parse_block_hash(value: &serde_json::Value) -> Result<BlockHash, CoreError> {
    let value = value
        .as_str()
        .ok_or_else(|| CoreError::InvalidData(format!("expected block hash string, got: {value}")))?;
    value
        .parse()
        .map_err(|e| CoreError::InvalidData(format!("invalid block hash: {e}")))
}

pub(super) fn parse_opt_block_hash(
    value: Option<&serde_json::Value>,
) -> Result<Option<BlockHash>, CoreError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => parse_block_hash(v).map(Some),
    }
}

/// Decode the hex block returned by `getblock <hash> false`.
pub(super) fn parse_block_hex(value: &serde_json::Value) -> Result<Block, CoreError> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| CoreError::InvalidData("expected hex-encoded block".into()))?;
    let bytes = Vec::<u8>::from_hex(hex_str)
        .map_err(|e| CoreError::InvalidData(format!("invalid block hex: {e}")))?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| CoreError::InvalidData(format!("invalid block encoding: {e}")))
}

pub(super) fn parse_integer_required<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, true>(value, field)?
        .ok_or_else(|| CoreError::InvalidData(format!("missing {field}")))
}

pub(super) fn parse_integer_optional<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
) -> Option<T>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, false>(value, "value")
        .ok()
        .flatten()
}

// Generic integer parser used by all concrete numeric helpers.
// `required=false` treats missing/null/type-mismatch as `Ok(None)`.
fn parse_integer<T, const SIGNED: bool, const REQUIRED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<T>, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let missing_or_none = || {
        if REQUIRED {
            Err(CoreError::InvalidData(format!("missing {field}")))
        } else {
            Ok(None)
        }
    };

    let Some(value) = value else {
        return missing_or_none();
    };

    if SIGNED {
        let Some(n) = value.as_i64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| CoreError::InvalidData(format!("{field} out of range: {n}")))
    } else {
        let Some(n) = value.as_u64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| CoreError::InvalidData(format!("{field} out of range: {n}")))
    }
}

pub(super) fn parse_vout(vout: &[serde_json::Value]) -> Result<Vec<TxOutput>, CoreError> {
    vout.iter()
        .map(|output| {
            let value = parse_btc_amount(
                output
                    .get("value")
                    .ok_or_else(|| CoreError::InvalidData("missing value in vout".into()))?,
            )?;

            let script =
                parse_script_pubkey_from_json(output.get("scriptPubKey").ok_or_else(|| {
                    CoreError::InvalidData("missing scriptPubKey in vout".into())
                })?)?;
            let script_type = ScriptType::of(script.as_script());

            Ok(TxOutput {
                value,
                script_pub_key: script,
                script_type,
            })
        })
        .collect()
}

/// Parse one `listunspent` entry, checking its address against `network`.
pub(super) fn parse_unspent(
    entry: &serde_json::Value,
    network: Network,
) -> Result<Utxo, CoreError> {
    let txid = parse_txid(entry.get("txid"), "listunspent.txid")?;
    let vout = parse_integer_required::<u32, false>(entry.get("vout"), "listunspent.vout")?;
    let address = entry
        .get("address")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData("missing listunspent.address".into()))?;
    let address = parse_address(address, network)?;
    let script_pub_key = entry
        .get("scriptPubKey")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData("missing listunspent.scriptPubKey".into()))
        .and_then(script_from_hex)?;
    let amount = parse_btc_amount(
        entry
            .get("amount")
            .ok_or_else(|| CoreError::InvalidData("missing listunspent.amount".into()))?,
    )?;
    let spendable = entry
        .get("spendable")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    Ok(Utxo {
        txid,
        vout,
        address,
        script_pub_key,
        amount,
        spendable,
    })
}

pub(super) fn parse_address(value: &str, network: Network) -> Result<Address, CoreError> {
    value
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| CoreError::InvalidData(format!("invalid address `{value}`: {e}")))?
        .require_network(network)
        .map_err(|e| CoreError::InvalidData(format!("address `{value}`: {e}")))
}

fn parse_script_pubkey_from_json(spk: &serde_json::Value) -> Result<ScriptBuf, CoreError> {
    let hex_str = spk
        .get("hex")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData("missing hex in scriptPubKey".into()))?;
    script_from_hex(hex_str)
}

fn script_from_hex(hex_str: &str) -> Result<ScriptBuf, CoreError> {
    ScriptBuf::from_hex(hex_str)
        .map_err(|e| CoreError::InvalidData(format!("invalid scriptPubKey hex: {e}")))
}

/// Parse a BTC amount from a JSON value.
///
/// Number values are parsed via `Amount::from_float_in` to support scientific
/// notation, while string values are parsed via `Amount::from_str_in`.
pub(super) fn parse_btc_amount(value: &serde_json::Value) -> Result<Amount, CoreError> {
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n
                .as_f64()
                .ok_or_else(|| CoreError::InvalidData(format!("invalid BTC amount `{value}`")))?;
            Amount::from_float_in(parsed, bitcoin::Denomination::Bitcoin)
                .map_err(|e| CoreError::InvalidData(format!("invalid BTC amount `{value}`: {e}")))
        }
        serde_json::Value::String(s) => Amount::from_str_in(s, bitcoin::Denomination::Bitcoin)
            .map_err(|e| CoreError::InvalidData(format!("invalid BTC amount `{s}`: {e}"))),
        _ => Err(CoreError::InvalidData(format!(
            "expected numeric BTC amount, got: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::encode::serialize_hex;

    use super::*;
    use crate::test_util::*;

    #[test]
    fn parse_btc_amount_fractional() {
        let val = serde_json::json!(0.00001);
        let amount = parse_btc_amount(&val).expect("should parse fractional");
        assert_eq!(amount, Amount::from_sat(1000));
    }

    #[test]
    fn parse_btc_amount_string() {
        let val = serde_json::json!("0.5");
        let amount = parse_btc_amount(&val).expect("should parse string");
        assert_eq!(amount, Amount::from_sat(50_000_000));
    }

    #[test]
    fn parse_btc_amount_invalid() {
        let val = serde_json::json!(true);
        assert!(parse_btc_amount(&val).is_err());
    }

    #[test]
    fn parse_gettxout_result_null() {
        let result = parse_gettxout_result(serde_json::Value::Null).expect("should parse null");
        assert!(result.is_none());
    }

    #[test]
    fn parse_block_hex_decodes_consensus_block() {
        let block = build_chain(crate::types::BlockHeight(5), 1)[0].to_block();
        let hex = serde_json::json!(serialize_hex(&block));
        let decoded = parse_block_hex(&hex).expect("block hex should decode");
        assert_eq!(decoded.block_hash(), block.block_hash());
    }

    #[test]
    fn parse_block_hex_rejects_garbage() {
        assert!(parse_block_hex(&serde_json::json!("zz")).is_err());
        assert!(parse_block_hex(&serde_json::json!(12)).is_err());
    }

    #[test]
    fn parse_unspent_reads_wallet_entry() {
        let key = test_key(3);
        let address = p2wpkh_address(&key);
        let entry = serde_json::json!({
            "txid": txid_from_byte(9).to_string(),
            "vout": 1,
            "address": address.to_string(),
            "scriptPubKey": address.script_pubkey().to_hex_string(),
            "amount": 0.25,
            "confirmations": 6,
            "spendable": true,
        });

        let utxo = parse_unspent(&entry, Network::Regtest).expect("entry should parse");
        assert_eq!(utxo.txid, txid_from_byte(9));
        assert_eq!(utxo.vout, 1);
        assert_eq!(utxo.address, address);
        assert_eq!(utxo.amount, Amount::from_sat(25_000_000));
        assert!(utxo.spendable);
    }

    #[test]
    fn parse_unspent_rejects_address_from_other_network() {
        let key = test_key(3);
        let address = p2wpkh_address(&key);
        let entry = serde_json::json!({
            "txid": txid_from_byte(9).to_string(),
            "vout": 0,
            "address": address.to_string(),
            "scriptPubKey": address.script_pubkey().to_hex_string(),
            "amount": 1,
        });

        assert!(parse_unspent(&entry, Network::Bitcoin).is_err());
    }

    #[test]
    fn parse_unspent_defaults_missing_spendable_to_false() {
        let address = p2pkh_address(&test_key(4));
        let entry = serde_json::json!({
            "txid": txid_from_byte(1).to_string(),
            "vout": 0,
            "address": address.to_string(),
            "scriptPubKey": address.script_pubkey().to_hex_string(),
            "amount": "0.1",
        });
        let utxo = parse_unspent(&entry, Network::Regtest).expect("entry should parse");
        assert!(!utxo.spendable);
    }
}
