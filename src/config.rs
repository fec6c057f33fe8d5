/// Wallet configuration from environment variables and node-style switches
///
/// Controls the Bitcoin network, the wallet directory, the address buffer and
/// the default wallet behaviour at startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Minimum number of trailing unused addresses kept per address sequence.
pub const DEFAULT_ADDRESS_BUFFER: u32 = 20;

/// Password used for the default wallet when none is configured.
pub const DEFAULT_WALLET_PASSWORD: &str = "default";

/// Which transaction wins when two unconfirmed transactions spend the same output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnconfirmedConflictPolicy {
    /// The transaction recorded first keeps the output; the newcomer is ignored.
    #[default]
    KeepFirstSeen,
    /// The newcomer evicts the transaction recorded first.
    ReplaceWithLatest,
}

impl FromStr for UnconfirmedConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep-first-seen" | "first-seen" => Ok(Self::KeepFirstSeen),
            "replace-with-latest" | "latest" => Ok(Self::ReplaceWithLatest),
            other => Err(format!("Unknown unconfirmed conflict policy '{}'", other)),
        }
    }
}

/// Argon2id cost parameters used when encrypting a new wallet seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfConfig {
    pub mem_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Bitcoin network type
    pub network: bitcoin::Network,
    /// Directory holding `{name}.wallet.json` files
    pub wallet_dir: PathBuf,
    /// Trailing unused addresses kept per sequence (`-walletaddressbuffer`)
    pub address_buffer: u32,
    /// Wallet created and loaded at startup when set (`-defaultwalletname`)
    pub default_wallet_name: Option<String>,
    /// Password for the default wallet (`-defaultwalletpassword`)
    pub default_wallet_password: String,
    /// Unlock the default wallet at startup (`-unlockdefaultwallet`)
    pub unlock_default_wallet: bool,
    pub unconfirmed_conflict_policy: UnconfirmedConflictPolicy,
    pub kdf: KdfConfig,
    /// Interval of the background save task, in seconds
    pub save_interval_secs: u64,
    pub bind_address: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: bitcoin::Network::Regtest,
            wallet_dir: PathBuf::from("./wallets"),
            address_buffer: DEFAULT_ADDRESS_BUFFER,
            default_wallet_name: None,
            default_wallet_password: DEFAULT_WALLET_PASSWORD.to_string(),
            unlock_default_wallet: false,
            unconfirmed_conflict_policy: UnconfirmedConflictPolicy::default(),
            kdf: KdfConfig::default(),
            save_interval_secs: 300,
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "regtest" (default), "signet", "testnet" or "bitcoin"
    /// - `WALLET_DATA_DIR`: wallet directory (default `./wallets`)
    /// - `WALLET_ADDRESS_BUFFER`: trailing unused address count (default 20)
    /// - `DEFAULT_WALLET_NAME`, `DEFAULT_WALLET_PASSWORD`, `UNLOCK_DEFAULT_WALLET`
    /// - `UNCONFIRMED_CONFLICT_POLICY`: "keep-first-seen" (default) or "replace-with-latest"
    /// - `WALLET_KDF_MEMORY_KIB`, `WALLET_KDF_ITERATIONS`: seed encryption cost
    /// - `WALLET_SAVE_INTERVAL_SECS`: background save interval
    /// - `BIND_ADDRESS`: HTTP listen address
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(network) = env::var("BITCOIN_NETWORK") {
            config.network = parse_network(&network);
        }
        log::info!("Using {} network", config.network);

        if let Ok(dir) = env::var("WALLET_DATA_DIR") {
            config.wallet_dir = PathBuf::from(dir);
        }
        log::info!("Wallet directory: {}", config.wallet_dir.display());

        if let Some(buffer) = env_parse::<u32>("WALLET_ADDRESS_BUFFER") {
            config.address_buffer = buffer;
        }

        config.default_wallet_name = env::var("DEFAULT_WALLET_NAME")
            .ok()
            .filter(|name| !name.is_empty());
        if let Ok(password) = env::var("DEFAULT_WALLET_PASSWORD") {
            config.default_wallet_password = password;
        }
        if let Some(unlock) = env_parse::<bool>("UNLOCK_DEFAULT_WALLET") {
            config.unlock_default_wallet = unlock;
        }

        if let Ok(policy) = env::var("UNCONFIRMED_CONFLICT_POLICY") {
            match policy.parse() {
                Ok(policy) => config.unconfirmed_conflict_policy = policy,
                Err(e) => log::warn!("{}, keeping {:?}", e, config.unconfirmed_conflict_policy),
            }
        }

        if let Some(mem_kib) = env_parse::<u32>("WALLET_KDF_MEMORY_KIB") {
            config.kdf.mem_kib = mem_kib;
        }
        if let Some(iterations) = env_parse::<u32>("WALLET_KDF_ITERATIONS") {
            config.kdf.iterations = iterations;
        }
        if let Some(secs) = env_parse::<u64>("WALLET_SAVE_INTERVAL_SECS") {
            config.save_interval_secs = secs;
        }
        if let Ok(addr) = env::var("BIND_ADDRESS") {
            config.bind_address = addr;
        }

        config
    }

    /// Apply `-key=value` command line switches on top of the current values.
    ///
    /// Unknown switches are ignored so the binary can share an argument list
    /// with the rest of the node.
    pub fn apply_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref().trim_start_matches('-');
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (arg, None),
            };

            match (key.to_lowercase().as_str(), value) {
                ("walletaddressbuffer", Some(value)) => match value.parse() {
                    Ok(buffer) => self.address_buffer = buffer,
                    Err(_) => log::warn!("Ignoring invalid walletaddressbuffer '{}'", value),
                },
                ("defaultwalletname", Some(value)) => {
                    self.default_wallet_name = Some(value.to_string()).filter(|n| !n.is_empty())
                }
                ("defaultwalletpassword", Some(value)) => {
                    self.default_wallet_password = value.to_string()
                }
                ("unlockdefaultwallet", value) => {
                    self.unlock_default_wallet = value.map(parse_flag).unwrap_or(true)
                }
                ("walletdir", Some(value)) => self.wallet_dir = PathBuf::from(value),
                ("network", Some(value)) => self.network = parse_network(value),
                ("unconfirmedconflictpolicy", Some(value)) => match value.parse() {
                    Ok(policy) => self.unconfirmed_conflict_policy = policy,
                    Err(e) => log::warn!("{}", e),
                },
                _ => {}
            }
        }
        self
    }

    /// Get the BIP44 coin type for this network
    ///
    /// - Mainnet: 0
    /// - Testnet/Signet/Regtest: 1
    pub fn coin_type(&self) -> u32 {
        match self.network {
            bitcoin::Network::Bitcoin => 0,
            _ => 1,
        }
    }
}

fn parse_network(value: &str) -> bitcoin::Network {
    match value.to_lowercase().as_str() {
        "bitcoin" | "mainnet" | "main" => bitcoin::Network::Bitcoin,
        "testnet" | "test" => bitcoin::Network::Testnet,
        "signet" => bitcoin::Network::Signet,
        "regtest" | "" => bitcoin::Network::Regtest,
        other => {
            log::warn!("Unknown network '{}', defaulting to Regtest", other);
            bitcoin::Network::Regtest
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value '{}' for {}", raw, key);
            None
        }
    }
}
