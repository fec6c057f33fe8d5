use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, PrivateKey, PublicKey, ScriptBuf, Transaction, TxOut, Witness};

use crate::cold_staking::script::{ColdStakingScript, SpendPath};
use crate::error::WalletError;

/// What the signer needs to know about one input.
#[derive(Clone, Debug)]
pub struct InputSigningData {
    pub prevout: TxOut,
    pub key: PrivateKey,
    /// Witness script of a P2WSH prevout.
    pub witness_script: Option<ScriptBuf>,
}

/// Signs P2WPKH inputs and cold staking inputs (bare or P2WSH).
///
/// Cold staking inputs take the path matching the signing key: the cold key
/// pushes an empty selector, the hot key pushes `1`.
pub struct TransactionSigner {
    secp: Secp256k1<All>,
}

impl Default for TransactionSigner {
    fn default() -> Self {
        Self::new()
    }
}

enum Unlock {
    Witness(Witness),
    ScriptSig(ScriptBuf),
}

impl TransactionSigner {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Sign every input of `tx`; `inputs` is in input order.
    pub fn sign_transaction(
        &self,
        mut tx: Transaction,
        inputs: &[InputSigningData],
    ) -> Result<Transaction, WalletError> {
        if inputs.len() != tx.input.len() {
            return Err(WalletError::Bitcoin(format!(
                "Expected signing data for {} inputs, got {}",
                tx.input.len(),
                inputs.len()
            )));
        }

        let mut unlocks = Vec::with_capacity(inputs.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (input_index, data) in inputs.iter().enumerate() {
                unlocks.push(self.sign_input(&mut cache, input_index, data)?);
            }
        }

        for (input, unlock) in tx.input.iter_mut().zip(unlocks) {
            match unlock {
                Unlock::Witness(witness) => input.witness = witness,
                Unlock::ScriptSig(script_sig) => input.script_sig = script_sig,
            }
        }
        Ok(tx)
    }

    fn sign_input(
        &self,
        cache: &mut SighashCache<&Transaction>,
        input_index: usize,
        data: &InputSigningData,
    ) -> Result<Unlock, WalletError> {
        let public_key = PublicKey::from_private_key(&self.secp, &data.key);
        let script_pubkey = &data.prevout.script_pubkey;

        if script_pubkey.is_p2wpkh() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    input_index,
                    script_pubkey,
                    data.prevout.value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
            let sig = self.sign_digest(sighash.to_byte_array(), &data.key);
            return Ok(Unlock::Witness(Witness::p2wpkh(&sig, &public_key.inner)));
        }

        if ColdStakingScript::is_cold_staking(script_pubkey) {
            let selector = self.selector(script_pubkey, &public_key)?;
            let sighash = cache
                .legacy_signature_hash(input_index, script_pubkey, EcdsaSighashType::All.to_u32())
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
            let sig = self.sign_digest(sighash.to_byte_array(), &data.key);

            let script_sig = Builder::new()
                .push_slice(push_bytes(sig.to_vec())?)
                .push_slice(push_bytes(selector)?)
                .push_slice(push_bytes(public_key.to_bytes())?)
                .into_script();
            return Ok(Unlock::ScriptSig(script_sig));
        }

        if let Some(witness_script) = data
            .witness_script
            .as_ref()
            .filter(|ws| script_pubkey.is_p2wsh() && ColdStakingScript::to_p2wsh(ws) == *script_pubkey)
        {
            let selector = self.selector(witness_script, &public_key)?;
            let sighash = cache
                .p2wsh_signature_hash(
                    input_index,
                    witness_script,
                    data.prevout.value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
            let sig = self.sign_digest(sighash.to_byte_array(), &data.key);

            let witness = Witness::from_slice(&[
                sig.to_vec(),
                selector,
                public_key.to_bytes(),
                witness_script.to_bytes(),
            ]);
            return Ok(Unlock::Witness(witness));
        }

        Err(WalletError::Bitcoin(format!(
            "Cannot sign input {} paying to unsupported script {}",
            input_index, script_pubkey
        )))
    }

    fn selector(&self, template: &bitcoin::Script, public_key: &PublicKey) -> Result<Vec<u8>, WalletError> {
        let (hot, cold) = ColdStakingScript::extract(template).ok_or_else(|| {
            WalletError::Bitcoin("Prevout is not a cold staking script".into())
        })?;
        let hash = public_key.pubkey_hash();
        let path = if hash == cold {
            SpendPath::Cold
        } else if hash == hot {
            SpendPath::Hot
        } else {
            return Err(WalletError::Bitcoin(
                "Signing key matches neither the hot nor the cold key".into(),
            ));
        };

        Ok(match path {
            SpendPath::Hot => vec![1],
            SpendPath::Cold => Vec::new(),
        })
    }

    fn sign_digest(&self, digest: [u8; 32], key: &PrivateKey) -> ecdsa::Signature {
        let message = Message::from_digest(digest);
        ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&message, &key.inner),
            sighash_type: EcdsaSighashType::All,
        }
    }
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, WalletError> {
    PushBytesBuf::try_from(bytes).map_err(|e| WalletError::Bitcoin(e.to_string()))
}
