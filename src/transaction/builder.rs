use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::transaction::Sequence;
use bitcoin::{absolute, Amount, ScriptBuf};

use crate::error::WalletError;
use crate::wallet::UnspentOutputReference;

/// Outputs below this value are not created; a smaller change goes to the fee.
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

/// A transaction ready for signing together with the outputs it spends.
#[derive(Clone, Debug)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub inputs: Vec<UnspentOutputReference>,
}

#[derive(Clone, Debug, Default)]
pub struct TransactionBuilder;

impl TransactionBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Select outputs largest first until `target` is covered.
    pub fn select_utxos(
        &self,
        available: &[UnspentOutputReference],
        target: Amount,
    ) -> Result<Vec<UnspentOutputReference>, WalletError> {
        let mut sorted: Vec<&UnspentOutputReference> = available.iter().collect();
        sorted.sort_by(|a, b| {
            b.transaction
                .amount
                .cmp(&a.transaction.amount)
                .then_with(|| a.transaction.out_point.cmp(&b.transaction.out_point))
        });

        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        for utxo in sorted {
            if total >= target {
                break;
            }
            total += utxo.transaction.amount;
            selected.push(utxo.clone());
        }

        if total < target {
            let available_total: Amount = available.iter().map(|u| u.transaction.amount).sum();
            return Err(WalletError::Validation(format!(
                "Insufficient funds: need {}, but only {} is spendable",
                target.display_in(bitcoin::Denomination::Bitcoin).show_denomination(),
                available_total
                    .display_in(bitcoin::Denomination::Bitcoin)
                    .show_denomination()
            )));
        }

        Ok(selected)
    }

    /// Pay `recipients` from `available` with a fixed `fee`.
    ///
    /// The change output, when above dust, comes first and pays to
    /// `change_script`; the recipients follow in the given order.
    pub fn build_with_change(
        &self,
        available: &[UnspentOutputReference],
        recipients: Vec<TxOut>,
        fee: Amount,
        change_script: ScriptBuf,
    ) -> Result<UnsignedTransaction, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::Validation("No recipients were given.".into()));
        }
        let sent: Amount = recipients.iter().map(|r| r.value).sum();
        for recipient in &recipients {
            if recipient.value < DUST_LIMIT {
                return Err(WalletError::Validation(format!(
                    "Amount {} is below the dust limit of {} sats",
                    recipient.value.to_sat(),
                    DUST_LIMIT.to_sat()
                )));
            }
        }

        let target = sent
            .checked_add(fee)
            .ok_or_else(|| WalletError::Validation("Amount plus fee overflows.".into()))?;
        let inputs = self.select_utxos(available, target)?;
        let total_input: Amount = inputs.iter().map(|u| u.transaction.amount).sum();
        let change = total_input - target;

        let mut tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };

        for utxo in &inputs {
            tx.input.push(TxIn {
                previous_output: utxo.transaction.out_point,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }

        // Add change output if above dust limit
        if change >= DUST_LIMIT {
            tx.output.push(TxOut {
                value: change,
                script_pubkey: change_script,
            });
        } else if change > Amount::ZERO {
            log::debug!("Change of {} sats is dust and goes to the fee", change.to_sat());
        }
        tx.output.extend(recipients);

        Ok(UnsignedTransaction { tx, inputs })
    }
}
