//! The cold staking output template and its spend verifier.
//!
//! ```text
//! OP_DUP OP_HASH160 OP_ROT
//! OP_IF OP_CHECKCOLDSTAKEVERIFY <hot key hash> OP_ELSE <cold key hash> OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! A spend pushes `<sig> <selector> <pubkey>`. A true selector takes the hot
//! branch, which is only valid inside a coinstake; a false selector takes the
//! cold branch.

use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIG, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_NOP10, OP_ROT,
};
use bitcoin::blockdata::opcodes::Opcode;
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::SighashCache;
use bitcoin::{ecdsa, Address, Network, PubkeyHash, PublicKey, Script, ScriptBuf, Transaction, TxOut};
use std::str::FromStr;
use thiserror::Error;

use crate::error::WalletError;

/// `OP_CHECKCOLDSTAKEVERIFY` reuses `OP_NOP10`.
pub const OP_CHECKCOLDSTAKEVERIFY: Opcode = OP_NOP10;

/// Serialized length of the template.
pub const COLD_STAKING_SCRIPT_LEN: usize = 51;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Script is not a cold staking script")]
    NotColdStaking,

    #[error("Spend must push a signature, a selector and a public key")]
    MalformedSpend,

    #[error("The hot key path is only valid in a coinstake transaction")]
    ColdStakeVerify,

    #[error("Public key does not match the key hash of the selected path")]
    KeyHashMismatch,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Sighash computation failed: {0}")]
    Sighash(String),
}

/// Which key satisfied a cold staking spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendPath {
    Hot,
    Cold,
}

pub struct ColdStakingScript;

impl ColdStakingScript {
    pub fn build(hot: &PubkeyHash, cold: &PubkeyHash) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_opcode(OP_ROT)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKCOLDSTAKEVERIFY)
            .push_slice(hot.to_byte_array())
            .push_opcode(OP_ELSE)
            .push_slice(cold.to_byte_array())
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// P2WSH output paying to the template.
    pub fn to_p2wsh(redeem_script: &Script) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&redeem_script.wscript_hash())
    }

    /// Hot and cold key hashes of a template script.
    pub fn extract(script: &Script) -> Option<(PubkeyHash, PubkeyHash)> {
        let b = script.as_bytes();
        if b.len() != COLD_STAKING_SCRIPT_LEN {
            return None;
        }
        let shape = b[0] == OP_DUP.to_u8()
            && b[1] == OP_HASH160.to_u8()
            && b[2] == OP_ROT.to_u8()
            && b[3] == OP_IF.to_u8()
            && b[4] == OP_CHECKCOLDSTAKEVERIFY.to_u8()
            && b[5] == 20
            && b[26] == OP_ELSE.to_u8()
            && b[27] == 20
            && b[48] == OP_ENDIF.to_u8()
            && b[49] == OP_EQUALVERIFY.to_u8()
            && b[50] == OP_CHECKSIG.to_u8();
        if !shape {
            return None;
        }

        let hot = PubkeyHash::from_slice(&b[6..26]).ok()?;
        let cold = PubkeyHash::from_slice(&b[28..48]).ok()?;
        Some((hot, cold))
    }

    pub fn is_cold_staking(script: &Script) -> bool {
        Self::extract(script).is_some()
    }

    /// Key hash of a P2PKH or P2WPKH script.
    pub fn key_hash_from_script(script: &Script) -> Option<PubkeyHash> {
        let b = script.as_bytes();
        if script.is_p2wpkh() {
            PubkeyHash::from_slice(&b[2..22]).ok()
        } else if script.is_p2pkh() {
            PubkeyHash::from_slice(&b[3..23]).ok()
        } else {
            None
        }
    }

    /// Key hash behind an encoded P2PKH or P2WPKH address.
    pub fn key_hash_from_address(address: &str, network: Network) -> Result<PubkeyHash, WalletError> {
        let script = parse_address(address, network)?.script_pubkey();
        Self::key_hash_from_script(&script).ok_or_else(|| {
            WalletError::Validation(format!(
                "Address '{}' is not a public key hash address.",
                address
            ))
        })
    }
}

/// Parse an address and check it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address, WalletError> {
    Address::from_str(address)
        .map_err(|e| WalletError::Validation(format!("Invalid address '{}': {}", address, e)))?
        .require_network(network)
        .map_err(|e| WalletError::Validation(format!("Invalid address '{}': {}", address, e)))
}

/// Verify input `input_index` of `tx` against a cold staking `prevout`,
/// either bare or wrapped in P2WSH.
pub fn verify_spend(
    tx: &Transaction,
    input_index: usize,
    prevout: &TxOut,
    is_coinstake: bool,
) -> Result<SpendPath, ScriptError> {
    let input = tx.input.get(input_index).ok_or(ScriptError::MalformedSpend)?;
    let segwit = prevout.script_pubkey.is_p2wsh();

    let (script_code, stack) = if segwit {
        let mut items: Vec<Vec<u8>> = input.witness.iter().map(|item| item.to_vec()).collect();
        if items.len() != 4 {
            return Err(ScriptError::MalformedSpend);
        }
        let witness_script = ScriptBuf::from_bytes(items.pop().unwrap_or_default());
        if ColdStakingScript::to_p2wsh(&witness_script) != prevout.script_pubkey {
            return Err(ScriptError::NotColdStaking);
        }
        (witness_script, items)
    } else {
        (prevout.script_pubkey.clone(), push_data(&input.script_sig)?)
    };

    let (hot, cold) = ColdStakingScript::extract(&script_code).ok_or(ScriptError::NotColdStaking)?;
    let [sig, selector, pubkey] = <[Vec<u8>; 3]>::try_from(stack).map_err(|_| ScriptError::MalformedSpend)?;

    let path = if cast_to_bool(&selector) {
        if !is_coinstake {
            return Err(ScriptError::ColdStakeVerify);
        }
        SpendPath::Hot
    } else {
        SpendPath::Cold
    };

    let pubkey = PublicKey::from_slice(&pubkey).map_err(|_| ScriptError::KeyHashMismatch)?;
    let expected = match path {
        SpendPath::Hot => hot,
        SpendPath::Cold => cold,
    };
    if pubkey.pubkey_hash() != expected {
        return Err(ScriptError::KeyHashMismatch);
    }

    let signature = ecdsa::Signature::from_slice(&sig).map_err(|_| ScriptError::BadSignature)?;
    let cache = SighashCache::new(tx);
    let digest = if segwit {
        let mut cache = cache;
        cache
            .p2wsh_signature_hash(input_index, &script_code, prevout.value, signature.sighash_type)
            .map_err(|e| ScriptError::Sighash(e.to_string()))?
            .to_byte_array()
    } else {
        cache
            .legacy_signature_hash(input_index, &script_code, signature.sighash_type.to_u32())
            .map_err(|e| ScriptError::Sighash(e.to_string()))?
            .to_byte_array()
    };

    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(digest), &signature.signature, &pubkey.inner)
        .map_err(|_| ScriptError::BadSignature)?;

    Ok(path)
}

/// Data pushed by a push-only script.
fn push_data(script: &Script) -> Result<Vec<Vec<u8>>, ScriptError> {
    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Ok(bytes.as_bytes().to_vec()),
            Ok(Instruction::Op(op)) if (0x51..=0x60).contains(&op.to_u8()) => {
                Ok(vec![op.to_u8() - 0x50])
            }
            _ => Err(ScriptError::MalformedSpend),
        })
        .collect()
}

/// Script truthiness: any non-zero byte, ignoring a trailing sign bit.
fn cast_to_bool(value: &[u8]) -> bool {
    value.iter().enumerate().any(|(i, byte)| {
        if i == value.len() - 1 {
            byte & 0x7f != 0
        } else {
            *byte != 0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{InputSigningData, TransactionSigner};
    use crate::wallet::script_reader::is_coinstake;
    use bitcoin::blockdata::script::PushBytesBuf;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::{absolute, transaction, Amount, OutPoint, PrivateKey, Sequence, TxIn, Txid, Witness};

    fn hash(byte: u8) -> PubkeyHash {
        PubkeyHash::from_byte_array([byte; 20])
    }

    fn private_key(byte: u8) -> PrivateKey {
        PrivateKey::new(SecretKey::from_slice(&[byte; 32]).unwrap(), Network::Regtest)
    }

    fn public_key(key: &PrivateKey) -> PublicKey {
        PublicKey::from_private_key(&Secp256k1::new(), key)
    }

    fn staked(script_pubkey: ScriptBuf) -> TxOut {
        TxOut {
            value: Amount::from_sat(100_000_000),
            script_pubkey,
        }
    }

    /// Spends one staked output back to `script`. A coinstake leads with the
    /// empty marker output.
    fn spending(coinstake: bool, script: &ScriptBuf) -> Transaction {
        let mut output = vec![TxOut {
            value: Amount::from_sat(99_000_000),
            script_pubkey: script.clone(),
        }];
        if coinstake {
            output.insert(
                0,
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: ScriptBuf::new(),
                },
            );
        }
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([7; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output,
        }
    }

    fn sign(
        tx: Transaction,
        prevout: &TxOut,
        key: PrivateKey,
        witness_script: Option<ScriptBuf>,
    ) -> Result<Transaction, WalletError> {
        TransactionSigner::new().sign_transaction(
            tx,
            &[InputSigningData {
                prevout: prevout.clone(),
                key,
                witness_script,
            }],
        )
    }

    fn script_sig(items: [Vec<u8>; 3]) -> ScriptBuf {
        let mut builder = Builder::new();
        for item in items {
            builder = builder.push_slice(PushBytesBuf::try_from(item).unwrap());
        }
        builder.into_script()
    }

    #[test]
    fn template_layout_and_round_trip() {
        let script = ColdStakingScript::build(&hash(0xaa), &hash(0xbb));
        let bytes = script.as_bytes();
        assert_eq!(bytes.len(), COLD_STAKING_SCRIPT_LEN);
        assert_eq!(&bytes[..6], &[0x76, 0xa9, 0x7b, 0x63, 0xb9, 0x14]);
        assert_eq!(&bytes[26..28], &[0x67, 0x14]);
        assert_eq!(&bytes[48..], &[0x68, 0x88, 0xac]);

        assert_eq!(ColdStakingScript::extract(&script), Some((hash(0xaa), hash(0xbb))));
        assert!(ColdStakingScript::to_p2wsh(&script).is_p2wsh());
    }

    #[test]
    fn template_bytes_for_known_keys() {
        // Secret key 1; its P2WPKH address is the well-known BIP173 example
        let hot = ColdStakingScript::key_hash_from_address(
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            Network::Bitcoin,
        )
        .unwrap();
        assert_eq!(hot, public_key(&private_key_one()).pubkey_hash());

        let script = ColdStakingScript::build(&hot, &hash(0xbb));
        assert_eq!(
            script.to_hex_string(),
            "76a97b63b914751e76e8199196d454941c45d1b3a323f1433bd66714\
             bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb6888ac"
        );
    }

    fn private_key_one() -> PrivateKey {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        PrivateKey::new(SecretKey::from_slice(&secret).unwrap(), Network::Bitcoin)
    }

    #[test]
    fn hot_key_spends_only_inside_a_coinstake() {
        let hot = private_key(0x11);
        let cold = private_key(0x22);
        let template = ColdStakingScript::build(&public_key(&hot).pubkey_hash(), &public_key(&cold).pubkey_hash());
        let prevout = staked(template.clone());

        let coinstake = sign(spending(true, &template), &prevout, hot, None).unwrap();
        assert!(is_coinstake(&coinstake));
        assert_eq!(verify_spend(&coinstake, 0, &prevout, true), Ok(SpendPath::Hot));
        assert_eq!(
            verify_spend(&coinstake, 0, &prevout, false),
            Err(ScriptError::ColdStakeVerify)
        );

        let transfer = sign(spending(false, &template), &prevout, hot, None).unwrap();
        assert!(!is_coinstake(&transfer));
        assert_eq!(
            verify_spend(&transfer, 0, &prevout, is_coinstake(&transfer)),
            Err(ScriptError::ColdStakeVerify)
        );

        let withdrawal = sign(spending(false, &template), &prevout, cold, None).unwrap();
        assert_eq!(verify_spend(&withdrawal, 0, &prevout, false), Ok(SpendPath::Cold));
    }

    #[test]
    fn foreign_key_cannot_spend_the_template() {
        let hot = private_key(0x11);
        let cold = private_key(0x22);
        let stranger = private_key(0x33);
        let template = ColdStakingScript::build(&public_key(&hot).pubkey_hash(), &public_key(&cold).pubkey_hash());
        let prevout = staked(template.clone());

        let err = sign(spending(true, &template), &prevout, stranger, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bitcoin error: Signing key matches neither the hot nor the cold key"
        );

        let signed = sign(spending(true, &template), &prevout, hot, None).unwrap();
        let [sig, selector, _] = <[Vec<u8>; 3]>::try_from(push_data(&signed.input[0].script_sig).unwrap()).unwrap();

        let mut forged = signed.clone();
        forged.input[0].script_sig = script_sig([sig.clone(), selector, public_key(&stranger).to_bytes()]);
        assert_eq!(verify_spend(&forged, 0, &prevout, true), Err(ScriptError::KeyHashMismatch));

        // The hot key offered on the cold branch
        forged.input[0].script_sig = script_sig([sig, Vec::new(), public_key(&hot).to_bytes()]);
        assert_eq!(verify_spend(&forged, 0, &prevout, true), Err(ScriptError::KeyHashMismatch));
    }

    #[test]
    fn wrapped_template_hot_spend() {
        let hot = private_key(0x11);
        let cold = private_key(0x22);
        let template = ColdStakingScript::build(&public_key(&hot).pubkey_hash(), &public_key(&cold).pubkey_hash());
        let wrapped = ColdStakingScript::to_p2wsh(&template);
        let prevout = staked(wrapped.clone());

        let coinstake = sign(spending(true, &wrapped), &prevout, hot, Some(template.clone())).unwrap();
        assert_eq!(coinstake.input[0].witness.len(), 4);
        assert_eq!(verify_spend(&coinstake, 0, &prevout, true), Ok(SpendPath::Hot));
        assert_eq!(
            verify_spend(&coinstake, 0, &prevout, false),
            Err(ScriptError::ColdStakeVerify)
        );
    }

    #[test]
    fn other_scripts_are_not_templates() {
        let p2wpkh = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([1; 20]));
        assert!(!ColdStakingScript::is_cold_staking(&p2wpkh));
        assert_eq!(
            ColdStakingScript::key_hash_from_script(&p2wpkh),
            Some(hash(1))
        );

        let mut bytes = ColdStakingScript::build(&hash(1), &hash(2)).into_bytes();
        bytes[4] = 0xb0;
        assert!(!ColdStakingScript::is_cold_staking(Script::from_bytes(&bytes)));
    }

    #[test]
    fn truthiness_ignores_negative_zero() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0, 0x80]));
        assert!(cast_to_bool(&[1]));
        assert!(cast_to_bool(&[0x81]));
    }
}
