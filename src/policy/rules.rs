use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::SighashCache;
use bitcoin::{ecdsa, Amount, PublicKey, Transaction, TxOut, Weight};
use std::collections::HashSet;

use super::{CoinView, PolicyError};
use crate::cold_staking::script::{verify_spend, ColdStakingScript};
use crate::wallet::script_reader;

/// Largest amount any single value may carry.
pub const MAX_MONEY: Amount = Amount::from_sat(21_000_000 * 100_000_000);

/// Standard transaction weight limit.
pub const MAX_STANDARD_TX_WEIGHT: Weight = Weight::from_wu(400_000);

/// Minimum relay fee rate in sats per virtual byte.
pub const MIN_RELAY_FEE_SAT_VB: u64 = 1;

/// Largest standard OP_RETURN output script.
pub const MAX_OP_RETURN_RELAY: usize = 83;

/// State shared by the rules while a transaction is checked.
pub struct RuleContext<'a> {
    pub tx: &'a Transaction,
    pub view: &'a CoinView,
    /// Filled by the coin view rule, in input order.
    pub prevouts: Vec<TxOut>,
    /// Filled by the fee rule.
    pub fee: Amount,
}

impl<'a> RuleContext<'a> {
    pub fn new(tx: &'a Transaction, view: &'a CoinView) -> Self {
        Self {
            tx,
            view,
            prevouts: Vec::new(),
            fee: Amount::ZERO,
        }
    }
}

pub trait MempoolRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError>;

    fn reject(&self, reason: impl Into<String>) -> PolicyError
    where
        Self: Sized,
    {
        PolicyError::Rejected {
            rule: self.name(),
            reason: reason.into(),
        }
    }
}

pub struct CheckStructure;

impl MempoolRule for CheckStructure {
    fn name(&self) -> &'static str {
        "check-structure"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        let tx = ctx.tx;
        if tx.input.is_empty() {
            return Err(self.reject("no inputs"));
        }
        if tx.output.is_empty() {
            return Err(self.reject("no outputs"));
        }
        if tx.is_coinbase() {
            return Err(self.reject("coinbase transactions are not relayed"));
        }
        if tx.weight() > MAX_STANDARD_TX_WEIGHT {
            return Err(self.reject(format!("weight {} above standard limit", tx.weight())));
        }

        let mut seen = HashSet::new();
        for input in &tx.input {
            if !seen.insert(input.previous_output) {
                return Err(self.reject(format!("duplicate input {}", input.previous_output)));
            }
        }

        let mut total = Amount::ZERO;
        for output in &tx.output {
            if output.value > MAX_MONEY {
                return Err(self.reject("output value too large"));
            }
            total = total
                .checked_add(output.value)
                .filter(|t| *t <= MAX_MONEY)
                .ok_or_else(|| self.reject("total output value too large"))?;
        }
        Ok(())
    }
}

pub struct CheckCoinView;

impl MempoolRule for CheckCoinView {
    fn name(&self) -> &'static str {
        "check-coin-view"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        let mut prevouts = Vec::with_capacity(ctx.tx.input.len());
        for input in &ctx.tx.input {
            let coin = ctx
                .view
                .get(&input.previous_output)
                .ok_or_else(|| self.reject(format!("missing input {}", input.previous_output)))?;
            prevouts.push(coin.clone());
        }
        ctx.prevouts = prevouts;
        Ok(())
    }
}

pub struct CheckStandardOutputs;

impl MempoolRule for CheckStandardOutputs {
    fn name(&self) -> &'static str {
        "check-standard-outputs"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        for (index, output) in ctx.tx.output.iter().enumerate() {
            let script = &output.script_pubkey;
            let standard = script.is_p2wpkh()
                || script.is_p2pkh()
                || script.is_p2wsh()
                || script.is_p2sh()
                || script.is_p2tr()
                || ColdStakingScript::is_cold_staking(script)
                || (script.is_op_return() && script.len() <= MAX_OP_RETURN_RELAY);
            if !standard {
                return Err(self.reject(format!("output {} is not standard", index)));
            }
        }
        Ok(())
    }
}

pub struct CheckDust;

impl MempoolRule for CheckDust {
    fn name(&self) -> &'static str {
        "check-dust"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        for (index, output) in ctx.tx.output.iter().enumerate() {
            if output.script_pubkey.is_op_return() {
                continue;
            }
            let threshold = output.script_pubkey.minimal_non_dust();
            if output.value < threshold {
                return Err(self.reject(format!(
                    "output {} of {} sats is dust (minimum {})",
                    index,
                    output.value.to_sat(),
                    threshold.to_sat()
                )));
            }
        }
        Ok(())
    }
}

pub struct CheckFee;

impl MempoolRule for CheckFee {
    fn name(&self) -> &'static str {
        "check-fee"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        let inputs: Amount = ctx.prevouts.iter().map(|p| p.value).sum();
        let outputs: Amount = ctx.tx.output.iter().map(|o| o.value).sum();
        let fee = inputs
            .checked_sub(outputs)
            .ok_or_else(|| self.reject(format!("outputs {} exceed inputs {}", outputs, inputs)))?;

        let min_fee = Amount::from_sat(ctx.tx.vsize() as u64 * MIN_RELAY_FEE_SAT_VB);
        if fee < min_fee {
            return Err(self.reject(format!(
                "fee {} sats below minimum relay fee {} sats",
                fee.to_sat(),
                min_fee.to_sat()
            )));
        }
        ctx.fee = fee;
        Ok(())
    }
}

pub struct CheckAllInputs;

impl MempoolRule for CheckAllInputs {
    fn name(&self) -> &'static str {
        "check-all-inputs"
    }

    fn check(&self, ctx: &mut RuleContext<'_>) -> Result<(), PolicyError> {
        let is_coinstake = script_reader::is_coinstake(ctx.tx);
        for (index, prevout) in ctx.prevouts.iter().enumerate() {
            let script = &prevout.script_pubkey;
            if script.is_p2wpkh() {
                self.verify_p2wpkh(ctx.tx, index, prevout)?;
            } else if ColdStakingScript::is_cold_staking(script) || script.is_p2wsh() {
                verify_spend(ctx.tx, index, prevout, is_coinstake)
                    .map_err(|e| self.reject(format!("input {}: {}", index, e)))?;
            } else {
                return Err(self.reject(format!("input {} spends an unsupported script", index)));
            }
        }
        Ok(())
    }
}

impl CheckAllInputs {
    fn verify_p2wpkh(&self, tx: &Transaction, index: usize, prevout: &TxOut) -> Result<(), PolicyError> {
        let witness = &tx.input[index].witness;
        if witness.len() != 2 {
            return Err(self.reject(format!("input {} witness must hold a signature and a key", index)));
        }
        let (Some(sig), Some(key)) = (witness.nth(0), witness.nth(1)) else {
            return Err(self.reject(format!("input {} witness is malformed", index)));
        };

        let pubkey = PublicKey::from_slice(key)
            .map_err(|_| self.reject(format!("input {} has an invalid public key", index)))?;
        let key_hash = pubkey
            .wpubkey_hash()
            .map_err(|_| self.reject(format!("input {} key is uncompressed", index)))?;
        if bitcoin::ScriptBuf::new_p2wpkh(&key_hash) != prevout.script_pubkey {
            return Err(self.reject(format!("input {} key does not match its prevout", index)));
        }

        let signature = ecdsa::Signature::from_slice(sig)
            .map_err(|_| self.reject(format!("input {} has an invalid signature encoding", index)))?;
        let sighash = SighashCache::new(tx)
            .p2wpkh_signature_hash(index, &prevout.script_pubkey, prevout.value, signature.sighash_type)
            .map_err(|e| self.reject(format!("input {}: {}", index, e)))?;

        Secp256k1::verification_only()
            .verify_ecdsa(
                &Message::from_digest(sighash.to_byte_array()),
                &signature.signature,
                &pubkey.inner,
            )
            .map_err(|_| self.reject(format!("input {} signature does not verify", index)))
    }
}
