//! Seed encryption: Argon2id key derivation and ChaCha20-Poly1305 sealing of
//! the serialized master extended private key.

use argon2::{Algorithm as Argon2Algorithm, Argon2, Params as Argon2Params, Version as Argon2Version};
use bitcoin::bip32::Xpriv;
use bitcoin::key::rand::{self, RngCore};
use bitcoin::Network;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use serde::{Deserialize, Serialize};

use crate::config::KdfConfig;
use crate::error::WalletError;

const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub mem_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    /// Hex encoded salt
    pub salt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSeed {
    pub kdf: KdfParams,
    /// Hex encoded nonce
    pub nonce: String,
    /// Hex encoded ciphertext with authentication tag
    pub ciphertext: String,
}

/// Encrypt `master` under `password`.
pub fn encrypt_seed(
    master: &Xpriv,
    password: &str,
    network: Network,
    kdf: &KdfConfig,
) -> Result<EncryptedSeed, WalletError> {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce);

    let params = KdfParams {
        mem_kib: kdf.mem_kib,
        iterations: kdf.iterations,
        parallelism: kdf.parallelism,
        salt: hex::encode(salt),
    };
    let key = derive_key(password, &params)?;

    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
    let aad = seed_aad(network);
    let ciphertext = cipher
        .encrypt(
            chacha20poly1305::Nonce::from_slice(&nonce),
            Payload {
                msg: &master.encode(),
                aad: &aad,
            },
        )
        .map_err(|_| WalletError::Internal("Seed encryption failed".into()))?;

    Ok(EncryptedSeed {
        kdf: params,
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypt the master key. A wrong password is a credential error.
pub fn decrypt_seed(
    seed: &EncryptedSeed,
    password: &str,
    network: Network,
) -> Result<Xpriv, WalletError> {
    let key = derive_key(password, &seed.kdf)?;
    let nonce = decode_hex(&seed.nonce, "nonce")?;
    if nonce.len() != NONCE_BYTES {
        return Err(WalletError::Internal("Encrypted seed has a malformed nonce".into()));
    }
    let ciphertext = decode_hex(&seed.ciphertext, "ciphertext")?;

    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
    let aad = seed_aad(network);
    let plaintext = cipher
        .decrypt(
            chacha20poly1305::Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| WalletError::Credential("Invalid password.".into()))?;

    Xpriv::decode(&plaintext).map_err(|e| WalletError::KeyDerivation(e.to_string()))
}

/// Hex encoded chain code of a master key.
pub fn chain_code_hex(master: &Xpriv) -> String {
    // Chain code occupies bytes 13..45 of the BIP32 serialization.
    hex::encode(&master.encode()[13..45])
}

fn derive_key(password: &str, kdf: &KdfParams) -> Result<[u8; 32], WalletError> {
    let salt = decode_hex(&kdf.salt, "salt")?;
    let params = Argon2Params::new(kdf.mem_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| WalletError::Internal(format!("Invalid seed KDF parameters: {}", e)))?;
    let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Argon2Version::V0x13, params);

    let mut out = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), &salt, &mut out)
        .map_err(|e| WalletError::Internal(format!("Seed key derivation failed: {}", e)))?;
    Ok(out)
}

fn seed_aad(network: Network) -> Vec<u8> {
    const PREFIX: &[u8] = b"staking-wallet-seed-v1:";
    let mut out = Vec::with_capacity(PREFIX.len() + 4);
    out.extend_from_slice(PREFIX);
    out.extend_from_slice(&network.magic().to_bytes());
    out
}

fn decode_hex(value: &str, field: &str) -> Result<Vec<u8>, WalletError> {
    hex::decode(value)
        .map_err(|e| WalletError::Internal(format!("Encrypted seed has invalid {}: {}", field, e)))
}
