//! Maps output scripts to the owned-address scripts they pay.

use bitcoin::{Amount, ScriptBuf, Transaction, WPubkeyHash};
use bitcoin::hashes::Hash;

use crate::cold_staking::script::ColdStakingScript;

/// Scripts to look up in the address index for an output script.
///
/// A cold staking template pays both its hot and its cold key, so it expands
/// to the P2WPKH scripts of both key hashes.
pub fn destinations(script: &ScriptBuf) -> Vec<ScriptBuf> {
    let mut scripts = vec![script.clone()];
    if let Some((hot, cold)) = ColdStakingScript::extract(script) {
        for key_hash in [hot, cold] {
            let wpkh = WPubkeyHash::from_byte_array(key_hash.to_byte_array());
            scripts.push(ScriptBuf::new_p2wpkh(&wpkh));
        }
    }
    scripts
}

/// Proof-of-stake marker: inputs spend real coins and the first output is empty.
pub fn is_coinstake(tx: &Transaction) -> bool {
    !tx.input.is_empty()
        && !tx.input[0].previous_output.is_null()
        && tx.output.len() >= 2
        && tx.output[0].value == Amount::ZERO
        && tx.output[0].script_pubkey.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{absolute, transaction, OutPoint, PubkeyHash, Sequence, TxIn, TxOut, Txid, Witness};

    #[test]
    fn template_expands_to_both_keys() {
        let hot = PubkeyHash::from_byte_array([1; 20]);
        let cold = PubkeyHash::from_byte_array([2; 20]);
        let template = ColdStakingScript::build(&hot, &cold);

        let scripts = destinations(&template);
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts[0], template);
        assert_eq!(
            scripts[2],
            ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([2; 20]))
        );
    }

    #[test]
    fn coinstake_shape() {
        let mut tx = Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([1; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: ScriptBuf::new(),
                },
                TxOut {
                    value: Amount::from_sat(5),
                    script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([3; 20])),
                },
            ],
        };
        assert!(is_coinstake(&tx));

        tx.output.truncate(1);
        assert!(!is_coinstake(&tx));
    }
}
