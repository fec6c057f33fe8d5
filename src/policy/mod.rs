/// Acceptance oracle
///
/// Standalone relay checks a signed transaction must pass before it is
/// handed to the network. Rules run in a fixed order, and the order is
/// checked when the validator is built.
pub mod rules;

use bitcoin::{Amount, OutPoint, Transaction, TxOut};
use std::collections::HashMap;
use thiserror::Error;

use crate::error::WalletError;
pub use rules::{
    CheckAllInputs, CheckCoinView, CheckDust, CheckFee, CheckStandardOutputs, CheckStructure,
    MempoolRule, RuleContext,
};

/// Names of the rules in the order they must run.
pub const RULE_ORDER: [&str; 6] = [
    "check-structure",
    "check-coin-view",
    "check-standard-outputs",
    "check-dust",
    "check-fee",
    "check-all-inputs",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{rule}: {reason}")]
    Rejected { rule: &'static str, reason: String },

    #[error("Rule order mismatch: expected {expected:?}, found {found:?}")]
    RuleOrder {
        expected: Vec<&'static str>,
        found: Vec<&'static str>,
    },
}

impl From<PolicyError> for WalletError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Rejected { .. } => {
                WalletError::Validation(format!("Transaction rejected: {}", err))
            }
            PolicyError::RuleOrder { .. } => WalletError::Internal(err.to_string()),
        }
    }
}

/// Previous outputs available to the transactions being checked.
#[derive(Clone, Debug, Default)]
pub struct CoinView {
    coins: HashMap<OutPoint, TxOut>,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, out_point: OutPoint, output: TxOut) {
        self.coins.insert(out_point, output);
    }

    /// Make every output of `tx` available.
    pub fn add_transaction(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for (vout, output) in tx.output.iter().enumerate() {
            self.add(OutPoint::new(txid, vout as u32), output.clone());
        }
    }

    pub fn get(&self, out_point: &OutPoint) -> Option<&TxOut> {
        self.coins.get(out_point)
    }
}

pub struct MempoolValidator {
    rules: Vec<Box<dyn MempoolRule>>,
}

impl MempoolValidator {
    /// The relay rule set in its required order.
    pub fn standard() -> Result<Self, PolicyError> {
        Self::with_rules(vec![
            Box::new(CheckStructure),
            Box::new(CheckCoinView),
            Box::new(CheckStandardOutputs),
            Box::new(CheckDust),
            Box::new(CheckFee),
            Box::new(CheckAllInputs),
        ])
    }

    /// Build a validator, failing unless `rules` follow [`RULE_ORDER`].
    pub fn with_rules(rules: Vec<Box<dyn MempoolRule>>) -> Result<Self, PolicyError> {
        let found: Vec<&'static str> = rules.iter().map(|r| r.name()).collect();
        if found != RULE_ORDER {
            return Err(PolicyError::RuleOrder {
                expected: RULE_ORDER.to_vec(),
                found,
            });
        }
        Ok(Self { rules })
    }

    /// Run every rule against `tx`. Returns the fee it pays.
    pub fn accept(&self, tx: &Transaction, view: &CoinView) -> Result<Amount, PolicyError> {
        let mut ctx = RuleContext::new(tx, view);
        for rule in &self.rules {
            rule.check(&mut ctx)?;
        }
        log::debug!(
            "Transaction {} accepted with fee {} sats",
            tx.compute_txid(),
            ctx.fee.to_sat()
        );
        Ok(ctx.fee)
    }
}
