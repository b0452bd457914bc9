use std::cmp::Ordering;

use bitcoin::Amount;
use tracing::debug;

use crate::types::Utxo;

use super::SubmitError;

/// Pick the two best outputs to fund the checkpoint pair.
///
/// Outputs rank spendable first, then by amount, both descending; equal
/// entries fall back to outpoint order so the choice is stable for a given
/// listing. Both picks must be spendable and cover `fee` on their own.
pub fn select_two_funding_utxos(
    mut utxos: Vec<Utxo>,
    fee: Amount,
) -> Result<(Utxo, Utxo), SubmitError> {
    if utxos.len() < 2 {
        return Err(SubmitError::InsufficientUtxos { found: utxos.len() });
    }
    utxos.sort_by(rank);

    let mut top = utxos.into_iter();
    let (Some(first), Some(second)) = (top.next(), top.next()) else {
        return Err(SubmitError::InsufficientUtxos { found: 0 });
    };
    if !second.spendable {
        let found = usize::from(first.spendable);
        return Err(SubmitError::InsufficientUtxos { found });
    }
    for utxo in [&first, &second] {
        if utxo.amount < fee {
            return Err(SubmitError::InsufficientFees {
                fee,
                amount: utxo.amount,
            });
        }
    }

    debug!(
        first = %first.outpoint(),
        second = %second.outpoint(),
        "selected funding outputs"
    );
    Ok((first, second))
}

fn rank(a: &Utxo, b: &Utxo) -> Ordering {
    b.spendable
        .cmp(&a.spendable)
        .then_with(|| b.amount.cmp(&a.amount))
        .then_with(|| a.txid.cmp(&b.txid))
        .then_with(|| a.vout.cmp(&b.vout))
}
