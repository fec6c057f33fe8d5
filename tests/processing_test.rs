mod common;

use bitcoin::{Amount, OutPoint, TxOut};
use common::*;
use staking_wallet::wallet::{AccountFilter, Confirmation};
use staking_wallet::{UnconfirmedConflictPolicy, WalletError};

fn output_state(env: &TestEnvironment, wallet: &str, out_point: OutPoint) -> Option<staking_wallet::wallet::TransactionOutputData> {
    env.manager
        .with_wallet(wallet, |w| w.store.get(&out_point).cloned())
        .expect("wallet loaded")
}

#[test]
fn test_confirmations_count_the_containing_block() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");

    let funding = funding_tx(&address.script_pub_key, btc(1.0), 1);
    env.mine(vec![funding]);

    let balances = env.manager.get_balances("alice", None).unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].confirmed, btc(1.0));
    assert_eq!(balances[0].unconfirmed, Amount::ZERO);

    let one = env.manager.get_spendable_transactions_in_wallet("alice", 1).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].confirmations, 1);
    assert!(env
        .manager
        .get_spendable_transactions_in_wallet("alice", 2)
        .unwrap()
        .is_empty());

    env.mine_empty(1);
    let two = env.manager.get_spendable_transactions_in_wallet("alice", 2).unwrap();
    assert_eq!(two.len(), 1);
    assert_eq!(two[0].confirmations, 2);
}

#[test]
fn test_unconfirmed_output_is_confirmed_in_place() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(2.0), 2);
    let out_point = OutPoint::new(funding.compute_txid(), 0);

    assert!(env.manager.process_transaction(&funding, None).unwrap());
    let pending = output_state(&env, "alice", out_point).expect("recorded");
    assert_eq!(pending.confirmation, Confirmation::Unconfirmed);
    assert!(env
        .manager
        .get_spendable_transactions_in_wallet("alice", 1)
        .unwrap()
        .is_empty());
    assert_eq!(
        env.manager.get_spendable_transactions_in_wallet("alice", 0).unwrap().len(),
        1
    );

    let header = env.mine(vec![funding]);
    let confirmed = output_state(&env, "alice", out_point).expect("still recorded");
    assert_eq!(confirmed.block_height(), Some(header.height));
    assert_eq!(confirmed.creation_time, pending.creation_time);
    assert_eq!(env.manager.with_wallet("alice", |w| w.store.len()).unwrap(), 1);
}

#[test]
fn test_irrelevant_transaction_is_ignored() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let tx = funding_tx(&external_script(7), btc(1.0), 3);
    assert!(!env.manager.process_transaction(&tx, None).unwrap());
    assert_eq!(env.manager.with_wallet("alice", |w| w.store.len()).unwrap(), 0);
}

#[test]
fn test_spend_records_payments_without_change() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 4);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    env.mine(vec![funding]);

    let change = env.change_address("alice");
    let spend = spend_tx(
        &[funded],
        vec![
            TxOut {
                value: btc(0.3),
                script_pubkey: external_script(9),
            },
            TxOut {
                value: btc(0.69),
                script_pubkey: change.script_pub_key.clone(),
            },
        ],
    );
    assert!(env.manager.process_transaction(&spend, None).unwrap());

    let spent = output_state(&env, "alice", funded).unwrap();
    let details = spent.spending_details.expect("spend recorded");
    assert_eq!(details.transaction_id, spend.compute_txid());
    assert_eq!(details.payments.len(), 1);
    assert_eq!(details.payments[0].amount, btc(0.3));
    assert_eq!(details.payments[0].output_index, 0);

    let balances = env.manager.get_balances("alice", None).unwrap();
    assert_eq!(balances[0].confirmed, Amount::ZERO);
    assert_eq!(balances[0].unconfirmed, btc(0.69));

    // A pending spend takes the output out of the spendable set
    assert!(env
        .manager
        .get_spendable_transactions_in_wallet("alice", 1)
        .unwrap()
        .is_empty());
}

#[test]
fn test_first_seen_unconfirmed_spend_wins_by_default() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 5);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    env.mine(vec![funding]);

    let first = spend_tx(&[funded], vec![TxOut { value: btc(0.9), script_pubkey: external_script(1) }]);
    let second = spend_tx(&[funded], vec![TxOut { value: btc(0.8), script_pubkey: external_script(2) }]);

    assert!(env.manager.process_transaction(&first, None).unwrap());
    assert!(!env.manager.process_transaction(&second, None).unwrap());

    let spend = output_state(&env, "alice", funded).unwrap().spending_details.unwrap();
    assert_eq!(spend.transaction_id, first.compute_txid());
}

#[test]
fn test_latest_unconfirmed_spend_wins_when_configured() {
    let env = TestEnvironment::with_config(|c| {
        c.unconfirmed_conflict_policy = UnconfirmedConflictPolicy::ReplaceWithLatest
    });
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 6);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    env.mine(vec![funding]);

    let change = env.change_address("alice");
    let first = spend_tx(
        &[funded],
        vec![TxOut { value: btc(0.5), script_pubkey: change.script_pub_key.clone() }],
    );
    let second = spend_tx(&[funded], vec![TxOut { value: btc(0.8), script_pubkey: external_script(2) }]);

    env.manager.process_transaction(&first, None).unwrap();
    assert!(output_state(&env, "alice", OutPoint::new(first.compute_txid(), 0)).is_some());

    assert!(env.manager.process_transaction(&second, None).unwrap());
    let spend = output_state(&env, "alice", funded).unwrap().spending_details.unwrap();
    assert_eq!(spend.transaction_id, second.compute_txid());
    // The loser's change output went with it
    assert!(output_state(&env, "alice", OutPoint::new(first.compute_txid(), 0)).is_none());
}

#[test]
fn test_confirmed_spend_displaces_unconfirmed() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 8);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    env.mine(vec![funding]);

    let change = env.change_address("alice");
    let pending = spend_tx(
        &[funded],
        vec![TxOut { value: btc(0.7), script_pubkey: change.script_pub_key.clone() }],
    );
    env.manager.process_transaction(&pending, None).unwrap();

    let mined = spend_tx(&[funded], vec![TxOut { value: btc(0.9), script_pubkey: external_script(3) }]);
    let header = env.mine(vec![mined.clone()]);

    let spend = output_state(&env, "alice", funded).unwrap().spending_details.unwrap();
    assert_eq!(spend.transaction_id, mined.compute_txid());
    assert_eq!(spend.confirmation.height(), Some(header.height));
    assert!(output_state(&env, "alice", OutPoint::new(pending.compute_txid(), 0)).is_none());

    // A late unconfirmed conflict cannot displace the mined spend
    let late = spend_tx(&[funded], vec![TxOut { value: btc(0.1), script_pubkey: external_script(4) }]);
    assert!(!env.manager.process_transaction(&late, None).unwrap());
}

#[test]
fn test_remove_blocks_rewinds_outputs_and_spends() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 10);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    let fork = env.mine(vec![funding]);

    let second_address = env.receive_address("alice");
    let late_funding = funding_tx(&second_address.script_pub_key, btc(3.0), 11);
    let spend = spend_tx(&[funded], vec![TxOut { value: btc(0.9), script_pubkey: external_script(5) }]);
    env.mine(vec![late_funding.clone(), spend]);
    env.mine_empty(1);

    let removed = env.manager.remove_blocks(&fork).unwrap();
    assert_eq!(removed, 1);

    let restored = output_state(&env, "alice", funded).unwrap();
    assert!(!restored.is_spent());
    assert!(output_state(&env, "alice", OutPoint::new(late_funding.compute_txid(), 0)).is_none());
    assert_eq!(env.manager.wallet_tip().unwrap().hash, fork.hash);
    assert_eq!(
        env.manager.with_wallet("alice", |w| w.last_block_synced_height()).unwrap(),
        Some(fork.height)
    );

    // Rewinding to the same fork again changes nothing
    assert_eq!(env.manager.remove_blocks(&fork).unwrap(), 0);
}

#[test]
fn test_process_block_requires_the_next_block() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");

    let tip = env.chain.tip();
    let first = env.block_on(&tip, Vec::new());
    let first_header = env.chain.set_tip(first.header).unwrap();
    let second = env.block_on(&first_header, Vec::new());
    let second_header = env.chain.set_tip(second.header).unwrap();

    let err = env.manager.process_block(&second, &second_header).unwrap_err();
    assert!(matches!(err, WalletError::ChainSync(_)));
    assert!(err.to_string().contains("is not the next block after the wallet tip"));

    env.manager.process_block(&first, &first_header).unwrap();
    env.manager.process_block(&second, &second_header).unwrap();
    assert_eq!(env.manager.last_block_height(), second_header.height);
}

#[test]
fn test_process_block_rejects_a_tip_off_the_chain() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let genesis = env.chain.tip();

    let stale = env.mine_empty(1);
    // A competing branch replaces the wallet tip's block on the chain
    let branch = env.block_on(&genesis, Vec::new());
    env.chain.set_tip(branch.header).unwrap();
    let next = env.block_on(&env.chain.tip(), Vec::new());
    let next_header = env.chain.set_tip(next.header).unwrap();

    let err = env.manager.process_block(&next, &next_header).unwrap_err();
    assert!(err.to_string().contains("wallet tip was not found on the chain"));

    // After the rewind the branch applies cleanly
    env.manager.remove_blocks(&genesis).unwrap();
    assert_ne!(env.manager.wallet_tip().unwrap().hash, stale.hash);
    let branch_header = env.chain.get_header_by_height(1).unwrap();
    env.manager.process_block(&branch, &branch_header).unwrap();
    env.manager.process_block(&next, &next_header).unwrap();
}

#[test]
fn test_remove_transaction_removes_dependent_spends() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    let funding = funding_tx(&address.script_pub_key, btc(1.0), 12);
    let funded = OutPoint::new(funding.compute_txid(), 0);
    env.manager.process_transaction(&funding, None).unwrap();

    let change = env.change_address("alice");
    let child = spend_tx(
        &[funded],
        vec![TxOut { value: btc(0.9), script_pubkey: change.script_pub_key.clone() }],
    );
    env.manager.process_transaction(&child, None).unwrap();

    let removed = env
        .manager
        .remove_transactions_by_ids("alice", &[funding.compute_txid()])
        .unwrap();
    let ids: Vec<_> = removed.iter().map(|(txid, _)| *txid).collect();
    assert_eq!(removed.len(), 2);
    assert!(ids.contains(&funding.compute_txid()));
    assert!(ids.contains(&child.compute_txid()));
    assert_eq!(env.manager.with_wallet("alice", |w| w.store.len()).unwrap(), 0);
}

#[test]
fn test_remove_all_transactions_empties_the_store() {
    let env = TestEnvironment::new();
    env.create_wallet("alice");
    let address = env.receive_address("alice");
    env.mine(vec![funding_tx(&address.script_pub_key, btc(1.0), 13)]);
    env.manager
        .process_transaction(&funding_tx(&address.script_pub_key, btc(2.0), 14), None)
        .unwrap();

    let removed = env.manager.remove_all_transactions("alice").unwrap();
    assert_eq!(removed.len(), 2);
    assert!(env
        .manager
        .get_history("alice", None, AccountFilter::AllAccounts)
        .unwrap()
        .iter()
        .all(|account| account.history.is_empty()));
}
