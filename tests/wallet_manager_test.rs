mod common;

use chrono::Utc;
use common::*;
use staking_wallet::wallet::{AccountFilter, WalletAccountReference};
use bitcoin::Amount;
use staking_wallet::storage::WalletFile;
use staking_wallet::{Storage, WalletError, WalletManager};
use std::sync::Arc;
use std::time::Duration;

const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[test]
fn test_new_wallet_has_one_account_with_full_buffers() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");

    let accounts = env.manager.get_accounts("alice", AccountFilter::AllAccounts).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].name, "account 0");
    assert_eq!(accounts[0].hd_path, "m/44'/1'/0'");
    assert_eq!(accounts[0].external_addresses.len(), 20);
    assert_eq!(accounts[0].internal_addresses.len(), 20);
    assert_eq!(accounts[0].external_addresses[3].hd_path, "m/44'/1'/0'/0/3");
    assert_eq!(accounts[0].internal_addresses[0].hd_path, "m/44'/1'/0'/1/0");

    assert_eq!(env.manager.keys_lookup_count(), 40);
    let first = &accounts[0].external_addresses[0];
    let owner = env.manager.find_script_owner(&first.script_pub_key).unwrap();
    assert_eq!(owner.wallet_name, "alice");
    assert_eq!(owner.address, first.address);
}

#[test]
fn test_duplicate_and_invalid_names_are_rejected() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");

    let err = env.manager.create_wallet(PASSWORD, "alice", "", None).unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
    assert_eq!(err.to_string(), "A wallet with name 'alice' already exists.");

    let err = env.manager.create_wallet(PASSWORD, "../evil", "", None).unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
}

#[test]
fn test_same_mnemonic_derives_same_addresses() {
    let first = TestEnvironment::new();
    let second = TestEnvironment::new();
    first.manager.create_wallet(PASSWORD, "a", "", Some(MNEMONIC)).unwrap();
    second.manager.create_wallet("other", "b", "", Some(MNEMONIC)).unwrap();

    assert_eq!(first.receive_address("a").address, second.receive_address("b").address);

    // The passphrase is part of the seed
    let third = TestEnvironment::new();
    third.manager.create_wallet(PASSWORD, "c", "salt", Some(MNEMONIC)).unwrap();
    assert_ne!(first.receive_address("a").address, third.receive_address("c").address);

    let err = first.manager.create_wallet(PASSWORD, "d", "", Some("not a mnemonic")).unwrap_err();
    assert!(err.to_string().starts_with("Invalid mnemonic"));
}

#[test]
fn test_unused_account_is_reused_until_funded() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");

    let unused = env.manager.get_unused_account("alice", PASSWORD).unwrap();
    assert_eq!(unused.index, 0);

    let address = env.receive_address("alice");
    env.mine(vec![funding_tx(&address.script_pub_key, btc(1.0), 1)]);

    let next = env.manager.get_unused_account("alice", PASSWORD).unwrap();
    assert_eq!(next.index, 1);
    assert_eq!(next.name, "account 1");
    assert_eq!(next.hd_path, "m/44'/1'/1'");
    assert_eq!(next.external_addresses.len(), 20);
    // Account 0 grew one address past its used one
    assert_eq!(env.manager.keys_lookup_count(), 81);

    // The new account is still unused, so it comes back as is
    let again = env.manager.get_unused_account("alice", PASSWORD).unwrap();
    assert_eq!(again.index, 1);
}

#[test]
fn test_receiving_on_the_last_address_extends_the_buffer() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let last = env
        .manager
        .get_accounts("alice", AccountFilter::NormalAccounts)
        .unwrap()[0]
        .external_addresses[19]
        .clone();

    env.mine(vec![funding_tx(&last.script_pub_key, btc(1.0), 2)]);

    let account = &env.manager.get_accounts("alice", AccountFilter::NormalAccounts).unwrap()[0];
    assert_eq!(account.external_addresses.len(), 40);
    assert_eq!(account.internal_addresses.len(), 20);
    assert_eq!(env.manager.keys_lookup_count(), 60);
}

#[test]
fn test_unused_addresses_extend_the_sequence() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let reference = WalletAccountReference::new("alice", FIRST_ACCOUNT);

    let addresses = env.manager.get_unused_addresses(&reference, 25).unwrap();
    assert_eq!(addresses.len(), 25);
    assert_eq!(addresses[24].index, 24);
    assert!(env.manager.find_script_owner(&addresses[24].script_pub_key).is_some());

    let err = env
        .manager
        .get_unused_address(&WalletAccountReference::new("alice", "nope"))
        .unwrap_err();
    assert_eq!(err.to_string(), "No account with the name 'nope' could be found.");

    let err = env.manager.get_balances("bob", None).unwrap_err();
    assert!(matches!(err, WalletError::NotFound(_)));
    assert_eq!(err.to_string(), "No wallet with name 'bob' could be found.");
}

#[test]
fn test_wallet_file_round_trip() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let buffer = env.manager.config.address_buffer;
    env.manager
        .with_wallet_mut("alice", |wallet| {
            wallet.add_new_account(PASSWORD, Utc::now())?;
            wallet.ensure_address_buffer(buffer)
        })
        .unwrap();
    env.manager.load_keys_lookup();
    env.manager.stop().unwrap();

    assert!(env.temp_dir.path().join("alice.wallet.json").exists());
    let saved = env.manager.with_wallet("alice", |w| WalletFile::from(w)).unwrap();

    let reloaded = env.restart();
    assert_eq!(reloaded.get_wallets_names(), vec!["alice".to_string()]);
    let loaded = reloaded.with_wallet("alice", |w| WalletFile::from(w)).unwrap();

    assert_eq!(loaded.name, saved.name);
    assert_eq!(loaded.encrypted_seed, saved.encrypted_seed);
    assert_eq!(loaded.chain_code, saved.chain_code);
    assert_eq!(loaded.creation_time, saved.creation_time);

    let saved_accounts = &saved.account_roots[0].accounts;
    let loaded_accounts = &loaded.account_roots[0].accounts;
    assert_eq!(saved_accounts.len(), 2);
    assert_eq!(loaded_accounts.len(), 2);
    for (before, after) in saved_accounts.iter().zip(loaded_accounts) {
        assert_eq!(after.hd_path, before.hd_path);
        assert_eq!(after.extended_pub_key, before.extended_pub_key);
        assert!(before.external_addresses.len() >= 5);
        assert!(before.internal_addresses.len() >= 5);
        assert_eq!(after.external_addresses, before.external_addresses);
        assert_eq!(after.internal_addresses, before.internal_addresses);
    }
    assert_eq!(loaded, saved);

    assert_eq!(reloaded.keys_lookup_count(), 80);
    assert_eq!(reloaded.keys_lookup_count(), env.manager.keys_lookup_count());
    assert_eq!(reloaded.get_wallet_file_extension(), "wallet.json");
}

#[test]
fn test_restarted_wallet_replays_its_outputs() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let blocks = vec![
        env.mine_block(vec![funding_tx(&address.script_pub_key, btc(1.0), 3)]),
        env.mine_block(Vec::new()),
        env.mine_block(Vec::new()),
    ];
    assert_eq!(env.manager.get_balances("alice", None).unwrap()[0].confirmed, btc(1.0));
    env.manager.stop().unwrap();

    // Outputs are not in the file; the wallet resumes before its creation
    let reloaded = env.restart();
    let tip = reloaded.wallet_tip().expect("wallet tip set on load");
    assert_eq!(tip.height, 0);
    assert_eq!(reloaded.last_block_height(), 0);
    assert_eq!(
        reloaded.with_wallet("alice", |w| w.last_block_synced_height()).unwrap(),
        Some(0)
    );
    assert_eq!(reloaded.get_balances("alice", None).unwrap()[0].confirmed, Amount::ZERO);

    let (second, second_header) = &blocks[1];
    assert!(reloaded.process_block(second, second_header).is_err());

    for (block, header) in blocks.iter().filter(|(_, h)| h.height > tip.height) {
        reloaded.process_block(block, header).unwrap();
    }
    assert_eq!(reloaded.get_balances("alice", None).unwrap()[0].confirmed, btc(1.0));
    assert_eq!(reloaded.with_wallet("alice", |w| w.store.len()).unwrap(), 1);
    assert_eq!(reloaded.last_block_height(), 3);
    assert_eq!(
        reloaded.with_wallet("alice", |w| w.last_block_synced_height()).unwrap(),
        Some(3)
    );
}

#[test]
fn test_loaded_wallet_rewinds_a_synced_manager() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let tip = env.mine_empty(2);

    let fresh = WalletManager::new(
        test_config(env.temp_dir.path()),
        Storage::new_with_base_dir(env.temp_dir.path().to_path_buf()),
        env.chain.clone(),
    );
    fresh.update_last_block_synced_height(&tip);
    assert_eq!(fresh.last_block_height(), 2);

    fresh.load_wallet(PASSWORD, "alice").unwrap();
    assert_eq!(fresh.last_block_height(), 0);
    assert_eq!(
        fresh.with_wallet("alice", |w| w.last_block_synced_height()).unwrap(),
        Some(0)
    );
}

#[test]
fn test_load_wallet_checks_the_password() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");

    let fresh = WalletManager::new(
        test_config(env.temp_dir.path()),
        Storage::new_with_base_dir(env.temp_dir.path().to_path_buf()),
        env.chain.clone(),
    );

    let err = fresh.load_wallet("wrong", "alice").unwrap_err();
    assert!(matches!(err, WalletError::Credential(_)));
    assert!(fresh.get_wallets_names().is_empty());

    let err = fresh.load_wallet(PASSWORD, "missing").unwrap_err();
    assert!(matches!(err, WalletError::NotFound(_)));
    assert!(err.to_string().starts_with("No wallet file found at"));

    fresh.load_wallet(PASSWORD, "alice").unwrap();
    assert_eq!(fresh.get_wallets_names(), vec!["alice".to_string()]);
    assert_eq!(fresh.keys_lookup_count(), 40);
}

#[test]
fn test_watch_only_wallet_from_account_xpub() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let account = env.manager.get_accounts("alice", AccountFilter::NormalAccounts).unwrap()[0].clone();

    env.manager
        .recover_wallet_from_xpub("watcher", &account.extended_pub_key.to_string(), None, Utc::now())
        .unwrap();

    let watched = env.manager.get_accounts("watcher", AccountFilter::NormalAccounts).unwrap();
    assert_eq!(watched[0].external_addresses[0].address, account.external_addresses[0].address);

    let err = env
        .manager
        .get_extended_private_key_for_address("watcher", PASSWORD, &account.external_addresses[0].address)
        .unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
}

#[test]
fn test_recover_wallet_rewinds_the_wallet_tip() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    env.mine_empty(3);
    assert_eq!(env.manager.last_block_height(), 3);

    // Created before any block: everything must be replayed
    let before_chain = chrono::DateTime::from_timestamp(0, 0).unwrap();
    env.manager
        .recover_wallet(PASSWORD, "restored", MNEMONIC, before_chain, "")
        .unwrap();
    assert_eq!(env.manager.last_block_height(), 0);
}

#[test]
fn test_unlocked_wallet_serves_account_keys() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let reference = WalletAccountReference::new("alice", FIRST_ACCOUNT);

    let err = env.manager.get_ext_key(&reference).unwrap_err();
    assert!(matches!(err, WalletError::Credential(_)));
    assert_eq!(err.to_string(), "Wallet 'alice' is locked.");

    assert!(env.manager.unlock_wallet("wrong", "alice", None).is_err());
    env.manager.unlock_wallet(PASSWORD, "alice", None).unwrap();
    let key = env.manager.get_ext_key(&reference).unwrap();
    let account = env.manager.get_accounts("alice", AccountFilter::NormalAccounts).unwrap()[0].clone();
    let secp = bitcoin::secp256k1::Secp256k1::new();
    assert_eq!(
        bitcoin::bip32::Xpub::from_priv(&secp, &key),
        account.extended_pub_key
    );

    env.manager.lock_wallet("alice");
    assert!(env.manager.get_ext_key(&reference).is_err());

    env.manager
        .unlock_wallet(PASSWORD, "alice", Some(Duration::from_millis(0)))
        .unwrap();
    std::thread::sleep(Duration::from_millis(5));
    assert!(env.manager.get_ext_key(&reference).is_err());
}
