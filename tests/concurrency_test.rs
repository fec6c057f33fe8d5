mod common;

use chrono::Utc;
use common::*;
use std::thread;

const WALLETS: [&str; 3] = ["w0", "w1", "w2"];

/// Three wallets with two accounts each, 40 scripts per account.
fn three_wallets() -> TestEnvironment {
    let env = TestEnvironment::new();
    for name in WALLETS {
        env.create_wallet(name);
        let buffer = env.manager.config.address_buffer;
        env.manager
            .with_wallet_mut(name, |wallet| {
                wallet.add_new_account(PASSWORD, Utc::now())?;
                wallet.ensure_address_buffer(buffer)
            })
            .unwrap();
    }
    env
}

#[test]
fn test_parallel_index_rebuilds_agree() {
    let env = three_wallets();
    env.manager.load_keys_lookup();
    assert_eq!(env.manager.keys_lookup_count(), 240);

    thread::scope(|scope| {
        for _ in 0..10 {
            scope.spawn(|| {
                for _ in 0..500 {
                    env.manager.load_keys_lookup();
                }
            });
        }
    });

    assert_eq!(env.manager.keys_lookup_count(), 240);
}

#[test]
fn test_parallel_transactions_land_in_their_wallets() {
    let env = three_wallets();
    env.manager.load_keys_lookup();

    let addresses: Vec<_> = WALLETS
        .iter()
        .map(|name| {
            env.manager
                .get_accounts(name, staking_wallet::wallet::AccountFilter::NormalAccounts)
                .unwrap()[0]
                .external_addresses
                .clone()
        })
        .collect();

    thread::scope(|scope| {
        for (wallet_index, wallet_addresses) in addresses.iter().enumerate() {
            let manager = &env.manager;
            scope.spawn(move || {
                for (i, address) in wallet_addresses.iter().take(10).enumerate() {
                    let seed = (wallet_index * 10 + i) as u8;
                    let tx = funding_tx(&address.script_pub_key, btc(1.0), seed);
                    assert!(manager.process_transaction(&tx, None).unwrap());
                }
            });
            // Rebuilds race with ingestion
            scope.spawn(|| env.manager.load_keys_lookup());
        }
    });

    for name in WALLETS {
        let balances = env.manager.get_balances(name, None).unwrap();
        assert_eq!(balances[0].unconfirmed, btc(10.0));
        assert_eq!(env.manager.with_wallet(name, |w| w.store.len()).unwrap(), 10);
    }
    // Ten used addresses push account 0 to 30 receive addresses
    assert_eq!(env.manager.keys_lookup_count(), 270);
}
