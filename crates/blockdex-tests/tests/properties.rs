//! Property tests over randomly generated chains.

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigUint;
use proptest::prelude::*;

use blockdex_core::testing::{
    btc_tx, coinbase_tx, eth_addr, eth_tx, eth_zero_addr, fungible, make_block, script, with_eth_data,
    TestBitcoinParser, TestEthereumParser,
};
use blockdex_core::types::Block;
use blockdex_db::balance::unpack_addr_balance;
use blockdex_db::schema::{unpack_height_key, CF_ADDRESS_BALANCE, CF_HEIGHT};
use blockdex_db::{AddressBalanceDetail, RocksIndex};
use blockdex_tests::helpers::{comparable_state, init_tracing, open_index, tx_id};

/// Per block: coinbase payee, change payee, coinbase value, which unspent
/// output to spend.
type UtxoPlan = Vec<(u8, u8, u32, u8)>;

/// Blocks built from `plan` and the outputs still unspent at the tip.
fn utxo_chain(plan: &UtxoPlan) -> (Vec<Block>, Vec<(String, u32, u64)>) {
    let mut unspent: Vec<(String, u32, u64)> = Vec::new();
    let mut blocks = Vec::with_capacity(plan.len());
    for (h, &(payee, change, value, pick)) in plan.iter().enumerate() {
        let h = h as u32;
        let coinbase = tx_id(h, 0, 0);
        let mut txs = vec![coinbase_tx(&coinbase, &[(script(payee), u64::from(value))])];
        if !unspent.is_empty() {
            let (prev, vout, amount) = unspent.remove(pick as usize % unspent.len());
            let spend = tx_id(h, 0, 1);
            let half = amount / 2;
            txs.push(btc_tx(&spend, &[(prev, vout)], &[(script(change), half), (script(payee), amount - half)]));
            unspent.push((spend.clone(), 0, half));
            unspent.push((spend, 1, amount - half));
        }
        unspent.push((coinbase, 0, u64::from(value)));
        blocks.push(make_block(h, 0, txs));
    }
    (blocks, unspent)
}

fn utxo_plan() -> impl Strategy<Value = UtxoPlan> {
    prop::collection::vec((1u8..7, 1u8..7, 1u32..100_000, any::<u8>()), 2..24)
}

/// Per block: minted amount and recipient, then a transfer of a share of
/// the sender's holdings.
type TokenPlan = Vec<(u8, u32, u8, u8, u8)>;

/// Token blocks that never move more than the sender holds, so every
/// debit is exactly reversible.
fn token_chain(plan: &TokenPlan) -> Vec<Block> {
    let token = eth_addr(90);
    let mut holdings: BTreeMap<u8, u64> = BTreeMap::new();
    let mut blocks = Vec::with_capacity(plan.len());
    for (h, &(to, minted, from, recipient, share)) in plan.iter().enumerate() {
        let h = h as u32;
        *holdings.entry(to).or_default() += u64::from(minted);
        let mut transfers = vec![fungible(&token, &eth_zero_addr(), &eth_addr(to), u64::from(minted))];
        let held = holdings.get(&from).copied().unwrap_or(0);
        let amount = held * u64::from(share) / 255;
        if amount > 0 {
            *holdings.entry(from).or_default() -= amount;
            *holdings.entry(recipient).or_default() += amount;
            transfers.push(fungible(&token, &eth_addr(from), &eth_addr(recipient), amount));
        }
        let tx = with_eth_data(eth_tx(&tx_id(h, 0, 0), &eth_addr(to), &token, 0), transfers, None);
        blocks.push(make_block(h, 0, vec![tx]));
    }
    blocks
}

fn token_plan() -> impl Strategy<Value = TokenPlan> {
    prop::collection::vec((1u8..5, 1u32..1_000, 1u8..5, 1u8..5, any::<u8>()), 2..16)
}

fn heights(index: &RocksIndex) -> Vec<u32> {
    index
        .column_rows(CF_HEIGHT)
        .unwrap()
        .iter()
        .map(|(k, _)| unpack_height_key(k).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn utxo_disconnect_restores_state(plan in utxo_plan(), cut in any::<prop::sample::Index>()) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir, "db", Arc::new(TestBitcoinParser::default()), "Bitcoin");
        let (blocks, _) = utxo_chain(&plan);
        let lower = cut.index(blocks.len()) as u32;

        for block in &blocks[..lower as usize] {
            index.connect_block(block).unwrap();
        }
        let before = comparable_state(&index);
        for block in &blocks[lower as usize..] {
            index.connect_block(block).unwrap();
        }
        index.disconnect_block_range(lower, blocks.len() as u32 - 1).unwrap();

        prop_assert_eq!(comparable_state(&index), before);
        prop_assert_eq!(heights(&index), (0..lower).collect::<Vec<_>>());
        prop_assert_eq!(index.internal_state().best_height(), lower.saturating_sub(1));
    }

    #[test]
    fn balances_equal_their_utxos(plan in utxo_plan()) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir, "db", Arc::new(TestBitcoinParser::default()), "Bitcoin");
        let (blocks, unspent) = utxo_chain(&plan);
        for block in &blocks {
            index.connect_block(block).unwrap();
        }

        let mut total = BigUint::default();
        for (_, value) in index.column_rows(CF_ADDRESS_BALANCE).unwrap() {
            let ab = unpack_addr_balance(&value, 32, AddressBalanceDetail::Utxo).unwrap();
            prop_assert_eq!(&ab.balance, &ab.utxo_sum());
            prop_assert!(ab.txs > 0);
            prop_assert!(ab.utxos.windows(2).all(|w| w[0].height <= w[1].height));
            total += &ab.balance;
        }
        let expected: u64 = unspent.iter().map(|(_, _, v)| v).sum();
        prop_assert_eq!(total, BigUint::from(expected));
        prop_assert_eq!(heights(&index), (0..blocks.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn token_disconnect_restores_state(plan in token_plan(), cut in any::<prop::sample::Index>()) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir, "db", Arc::new(TestEthereumParser::default()), "Ethereum");
        let blocks = token_chain(&plan);
        let lower = cut.index(blocks.len()) as u32;

        for block in &blocks[..lower as usize] {
            index.connect_block(block).unwrap();
        }
        let before = comparable_state(&index);
        for block in &blocks[lower as usize..] {
            index.connect_block(block).unwrap();
        }
        index.disconnect_block_range(lower, blocks.len() as u32 - 1).unwrap();

        prop_assert_eq!(comparable_state(&index), before);
        prop_assert_eq!(heights(&index), (0..lower).collect::<Vec<_>>());
    }
}
