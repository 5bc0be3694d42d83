//! End-to-end scenarios on a single index: connect a few hand-built blocks,
//! inspect every column they touch, then disconnect and compare.

use num_bigint::BigUint;

use blockdex_core::constants::{CONTRACT_INDEX_OFFSET, TRANSFER_FROM, TRANSFER_TO};
use blockdex_core::testing::{
    block_hash, btc_tx, eth_addr, eth_desc, eth_tx, fungible, make_block, script, script_desc, txid, with_eth_data,
};
use blockdex_core::types::TokenStandard;
use blockdex_db::AddressBalanceDetail;
use blockdex_tests::helpers::{snapshot, temp_bitcoin_index, temp_ethereum_index};

const HEIGHT: u32 = 7;

fn sat(v: u64) -> BigUint {
    BigUint::from(v)
}

// ---------------------------------------------------------------------------
// UTXO chain
// ---------------------------------------------------------------------------

#[test]
fn payment_credits_both_outputs() {
    let (index, _dir) = temp_bitcoin_index();
    let (x, y) = (1, 2);
    let a = btc_tx(&txid(0xa), &[], &[(script(x), 10_000_000), (script(y), 5_000_000)]);
    index.connect_block(&make_block(HEIGHT, 0, vec![a])).unwrap();

    let ab = index.get_addr_desc_balance(&script_desc(x), AddressBalanceDetail::Utxo).unwrap().unwrap();
    assert_eq!(ab.balance, sat(10_000_000));
    assert_eq!(ab.sent, sat(0));
    assert_eq!(ab.txs, 1);
    assert_eq!(ab.utxos.len(), 1);
    assert_eq!(ab.utxos[0].btxid, vec![0xa; 32]);
    assert_eq!(ab.utxos[0].vout, 0);
    assert_eq!(ab.utxos[0].height, HEIGHT);
    assert_eq!(ab.utxos[0].value, sat(10_000_000));

    let row = index.get_address_row(&script_desc(x), HEIGHT).unwrap().unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].btxid, vec![0xa; 32]);
    assert_eq!(row[0].indexes, vec![0]);
    let row = index.get_address_row(&script_desc(y), HEIGHT).unwrap().unwrap();
    assert_eq!(row[0].indexes, vec![1]);

    let ta = index.get_tx_addresses(&txid(0xa)).unwrap().unwrap();
    assert_eq!(ta.height, HEIGHT);
    assert_eq!(ta.outputs.len(), 2);
    assert_eq!(ta.outputs[0].addr_desc, script_desc(x));
    assert_eq!(ta.outputs[0].value, sat(10_000_000));
    assert!(!ta.outputs[0].spent);
    assert_eq!(ta.outputs[1].addr_desc, script_desc(y));
    assert_eq!(ta.outputs[1].value, sat(5_000_000));
    assert!(!ta.outputs[1].spent);

    assert_eq!(index.get_best_block().unwrap(), Some((HEIGHT, block_hash(HEIGHT, 0))));
}

#[test]
fn spend_then_disconnect_restores_prior_state() {
    let (index, _dir) = temp_bitcoin_index();
    let (x, y, z) = (1, 2, 3);
    let a = btc_tx(&txid(0xa), &[], &[(script(x), 10_000_000), (script(y), 5_000_000)]);
    index.connect_block(&make_block(HEIGHT, 0, vec![a])).unwrap();
    let before = snapshot(&index);

    let b = btc_tx(&txid(0xb), &[(txid(0xa), 0)], &[(script(z), 9_900_000)]);
    index.connect_block(&make_block(HEIGHT + 1, 0, vec![b])).unwrap();

    let ta = index.get_tx_addresses(&txid(0xa)).unwrap().unwrap();
    assert!(ta.outputs[0].spent);
    assert!(!ta.outputs[1].spent);

    let ab = index.get_addr_desc_balance(&script_desc(x), AddressBalanceDetail::Utxo).unwrap().unwrap();
    assert_eq!(ab.txs, 2);
    assert_eq!(ab.sent, sat(10_000_000));
    assert_eq!(ab.balance, sat(0));
    assert!(ab.utxos.is_empty());

    let az = index.get_addr_desc_balance(&script_desc(z), AddressBalanceDetail::Utxo).unwrap().unwrap();
    assert_eq!(az.balance, sat(9_900_000));

    let row = index.get_address_row(&script_desc(x), HEIGHT + 1).unwrap().unwrap();
    assert_eq!(row[0].btxid, vec![0xb; 32]);
    assert_eq!(row[0].indexes, vec![!0]);

    let tb = index.get_tx_addresses(&txid(0xb)).unwrap().unwrap();
    assert_eq!(tb.inputs[0].addr_desc, script_desc(x));
    assert_eq!(tb.inputs[0].value, sat(10_000_000));

    index.disconnect_block_range(HEIGHT + 1, HEIGHT + 1).unwrap();
    assert_eq!(snapshot(&index), before);
    assert_eq!(index.get_best_block().unwrap().map(|(h, _)| h), Some(HEIGHT));
}

#[test]
fn address_history_is_newest_first() {
    let (index, _dir) = temp_bitcoin_index();
    let a = btc_tx(&txid(0xa), &[], &[(script(1), 1_000)]);
    index.connect_block(&make_block(1, 0, vec![a])).unwrap();
    let b = btc_tx(&txid(0xb), &[(txid(0xa), 0)], &[(script(1), 900)]);
    index.connect_block(&make_block(2, 0, vec![b])).unwrap();

    let mut seen = Vec::new();
    index
        .get_transactions(&script(1), 0, u32::MAX, |txid, height, indexes| {
            seen.push((txid.to_string(), height, indexes.to_vec()));
            Ok(std::ops::ControlFlow::Continue(()))
        })
        .unwrap();
    // one tx that both spends from and pays back to the address
    assert_eq!(seen, vec![(txid(0xb), 2, vec![0, !0]), (txid(0xa), 1, vec![0])]);

    let mut first = Vec::new();
    index
        .get_transactions(&script(1), 0, u32::MAX, |txid, _, _| {
            first.push(txid.to_string());
            Ok(std::ops::ControlFlow::Break(()))
        })
        .unwrap();
    assert_eq!(first, vec![txid(0xb)]);
}

// ---------------------------------------------------------------------------
// Account chain
// ---------------------------------------------------------------------------

#[test]
fn transfer_and_token_transfer_in_one_block() {
    let (index, _dir) = temp_ethereum_index();
    let (a, b) = (1, 2);
    let contract = 9;
    let t1 = eth_tx(&txid(0x11), &eth_addr(a), &eth_addr(b), 1_000_000_000_000_000_000);
    let t2 = with_eth_data(
        eth_tx(&txid(0x22), "", "", 0),
        vec![fungible(&eth_addr(contract), &eth_addr(a), &eth_addr(b), 42)],
        None,
    );
    let before = snapshot(&index);
    index.connect_block(&make_block(HEIGHT, 0, vec![t1, t2])).unwrap();

    let token_to = CONTRACT_INDEX_OFFSET;
    let row = index.get_address_row(&eth_desc(a), HEIGHT).unwrap().unwrap();
    assert_eq!(row.len(), 2);
    assert_eq!((row[0].btxid.clone(), row[0].indexes.clone()), (vec![0x11; 32], vec![TRANSFER_FROM]));
    assert_eq!((row[1].btxid.clone(), row[1].indexes.clone()), (vec![0x22; 32], vec![!token_to]));
    let row = index.get_address_row(&eth_desc(b), HEIGHT).unwrap().unwrap();
    assert_eq!((row[0].btxid.clone(), row[0].indexes.clone()), (vec![0x11; 32], vec![TRANSFER_TO]));
    assert_eq!((row[1].btxid.clone(), row[1].indexes.clone()), (vec![0x22; 32], vec![token_to]));

    let la = index.get_addr_desc_contracts(eth_desc(a).as_bytes()).unwrap().unwrap();
    assert_eq!(la.total_txs, 2);
    assert_eq!(la.non_contract_txs, 1);
    assert_eq!(la.internal_txs, 0);
    assert_eq!(la.contracts.len(), 1);
    assert_eq!(la.contracts[0].contract, eth_desc(contract));
    assert_eq!(la.contracts[0].standard, TokenStandard::Fungible);
    assert_eq!(la.contracts[0].txs, 1);
    assert_eq!(la.contracts[0].value, BigUint::default());

    let lb = index.get_addr_desc_contracts(eth_desc(b).as_bytes()).unwrap().unwrap();
    let pos = lb.find(eth_desc(contract).as_bytes()).unwrap();
    assert_eq!(lb.contracts[pos].value, BigUint::from(42u8));

    index.disconnect_block_range(HEIGHT, HEIGHT).unwrap();
    assert_eq!(snapshot(&index), before);
    assert!(index.get_addr_desc_contracts(eth_desc(a).as_bytes()).unwrap().is_none());
    assert!(index.get_best_block().unwrap().is_none());
}
