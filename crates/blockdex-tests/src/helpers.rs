//! Shared test helpers: temporary indexes, chain builders, and an in-memory
//! block oracle whose chain can be reorganized mid-test.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;

use blockdex_core::error::OracleError;
use blockdex_core::testing::{
    btc_tx, coinbase_tx, eth_addr, eth_tx, eth_zero_addr, fungible, make_block, nft, script, with_eth_data,
    TestBitcoinParser, TestEthereumParser,
};
use blockdex_core::traits::{BlockOracle, ChainParser};
use blockdex_core::types::{Block, Tx};
use blockdex_db::balance::unpack_addr_balance;
use blockdex_db::{AddressBalanceDetail, DbConfig, RocksIndex};

/// Install a test subscriber once; `RUST_LOG` selects what is printed.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

pub fn open_index(dir: &tempfile::TempDir, name: &str, parser: Arc<dyn ChainParser>, coin: &str) -> Arc<RocksIndex> {
    Arc::new(RocksIndex::open(dir.path().join(name), parser, coin, &DbConfig::default()).unwrap())
}

/// Fresh Bitcoin-type index in a temp directory.
pub fn temp_bitcoin_index() -> (Arc<RocksIndex>, tempfile::TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "db", Arc::new(TestBitcoinParser::default()), "Bitcoin");
    (index, dir)
}

/// Fresh Ethereum-type index in a temp directory.
pub fn temp_ethereum_index() -> (Arc<RocksIndex>, tempfile::TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "db", Arc::new(TestEthereumParser::default()), "Ethereum");
    (index, dir)
}

/// Every column family except `default`, which carries timestamps.
pub fn snapshot(index: &RocksIndex) -> Vec<(&'static str, Vec<(Box<[u8]>, Box<[u8]>)>)> {
    blockdex_db::schema::column_families(index.chain_type())
        .into_iter()
        .filter(|name| *name != blockdex_db::schema::CF_DEFAULT)
        .map(|name| (name, index.column_rows(name).unwrap()))
        .collect()
}

/// A balance row with its UTXOs in (height, txid, vout) order.
pub type BalanceSummary = (u32, String, String, Vec<(u32, Vec<u8>, i32)>);

/// [`snapshot`] for comparing indexes built along different paths: the
/// UTXO lists of balance rows are compared as sets, everything else byte
/// for byte.
pub fn comparable_state(index: &RocksIndex) -> (Vec<(&'static str, Vec<(Box<[u8]>, Box<[u8]>)>)>, Vec<(Box<[u8]>, BalanceSummary)>) {
    let mut columns = snapshot(index);
    let mut balances = Vec::new();
    if let Some(pos) = columns.iter().position(|(name, _)| *name == blockdex_db::schema::CF_ADDRESS_BALANCE) {
        let (_, rows) = columns.remove(pos);
        let txid_len = index.parser().packed_txid_len();
        for (key, value) in rows {
            let ab = unpack_addr_balance(&value, txid_len, AddressBalanceDetail::Utxo).unwrap();
            let mut utxos: Vec<_> = ab.utxos.iter().map(|u| (u.height, u.btxid.clone(), u.vout)).collect();
            utxos.sort();
            balances.push((key, (ab.txs, ab.sent.to_string(), ab.balance.to_string(), utxos)));
        }
    }
    (columns, balances)
}

// ---------------------------------------------------------------------------
// Chain builders
// ---------------------------------------------------------------------------

/// A txid unique per (height, branch, position).
pub fn tx_id(height: u32, fork: u8, n: u8) -> String {
    let mut b = [0u8; 32];
    b[0] = n;
    b[1] = fork;
    b[2..6].copy_from_slice(&height.to_be_bytes());
    b[31] = 0xee;
    hex::encode(b)
}

/// Seed of the script paid by the coinbase at `height`; six scripts rotate
/// so addresses recur across blocks.
pub fn miner_seed(height: u32, fork: u8) -> u8 {
    (height % 6) as u8 + 1 + fork.wrapping_mul(10)
}

/// Next UTXO block on top of `prev`: a coinbase plus a tx spending the
/// parent's coinbase into two outputs.
pub fn next_bitcoin_block(prev: Option<&Block>, fork: u8) -> Block {
    let height = prev.map_or(0, |b| b.height + 1);
    let mut txs = vec![coinbase_tx(&tx_id(height, fork, 0), &[(script(miner_seed(height, fork)), 50_000)])];
    if let Some(prev) = prev {
        let parent_coinbase = prev.txs[0].txid.clone();
        txs.push(btc_tx(
            &tx_id(height, fork, 1),
            &[(parent_coinbase, 0)],
            &[(script(miner_seed(height + 2, fork)), 30_000), (script(miner_seed(height + 4, fork)), 19_000)],
        ));
    }
    let mut block = make_block(height, fork, txs);
    block.prev_hash = prev.map(|b| b.hash.clone()).unwrap_or_default();
    block
}

/// Next account block on top of `prev`: a value transfer and a token mint
/// or transfer, rotating over a handful of addresses.
pub fn next_ethereum_block(prev: Option<&Block>, fork: u8) -> Block {
    let height = prev.map_or(0, |b| b.height + 1);
    let a = |k: u32| eth_addr(((height + k) % 5) as u8 + 1 + fork.wrapping_mul(10));
    let token = eth_addr(90);
    let collection = eth_addr(91);
    let plain = eth_tx(&tx_id(height, fork, 0), &a(0), &a(1), 1_000);
    let tokens = with_eth_data(
        eth_tx(&tx_id(height, fork, 1), &a(2), &token, 0),
        vec![
            fungible(&token, &eth_zero_addr(), &a(2), 500),
            fungible(&token, &a(2), &a(3), 200),
            nft(&collection, &eth_zero_addr(), &a(4), u64::from(height)),
        ],
        None,
    );
    let mut block = make_block(height, fork, vec![plain, tokens]);
    // account chains report hashes with the 0x prefix
    block.hash = format!("0x{}", block.hash);
    block.prev_hash = prev.map(|b| b.hash.clone()).unwrap_or_default();
    block
}

/// Extend `chain` by `count` blocks built with `next` on branch `fork`.
pub fn extend_chain(chain: &mut Vec<Block>, count: u32, fork: u8, next: fn(Option<&Block>, u8) -> Block) {
    for _ in 0..count {
        let block = next(chain.last(), fork);
        chain.push(block);
    }
}

pub fn bitcoin_chain(len: u32) -> Vec<Block> {
    let mut chain = Vec::new();
    extend_chain(&mut chain, len, 0, next_bitcoin_block);
    chain
}

pub fn ethereum_chain(len: u32) -> Vec<Block> {
    let mut chain = Vec::new();
    extend_chain(&mut chain, len, 0, next_ethereum_block);
    chain
}

/// `base[..fork_height]` followed by `count` blocks on branch `fork`.
pub fn fork_chain(base: &[Block], fork_height: u32, count: u32, fork: u8, next: fn(Option<&Block>, u8) -> Block) -> Vec<Block> {
    let mut chain = base[..fork_height as usize].to_vec();
    extend_chain(&mut chain, count, fork, next);
    chain
}

// ---------------------------------------------------------------------------
// Mock oracle
// ---------------------------------------------------------------------------

/// In-memory [`BlockOracle`] serving a replaceable chain.
#[derive(Default)]
pub struct MockOracle {
    chain: Mutex<Vec<Block>>,
    txs: Mutex<HashMap<String, Tx>>,
    /// Remaining transient failures per height.
    failures: Mutex<HashMap<u32, u32>>,
    block_calls: Mutex<u32>,
}

impl MockOracle {
    pub fn new(chain: Vec<Block>) -> Arc<Self> {
        Arc::new(Self { chain: Mutex::new(chain), ..Self::default() })
    }

    /// Replace the served chain, e.g. with a reorganized one.
    pub fn set_chain(&self, chain: Vec<Block>) {
        *self.chain.lock() = chain;
    }

    pub fn push_block(&self, block: Block) {
        self.chain.lock().push(block);
    }

    pub fn add_tx(&self, tx: Tx) {
        self.txs.lock().insert(tx.txid.clone(), tx);
    }

    /// Make the next `times` fetches of `height` fail with a transport error.
    pub fn fail_block(&self, height: u32, times: u32) {
        self.failures.lock().insert(height, times);
    }

    pub fn block_calls(&self) -> u32 {
        *self.block_calls.lock()
    }

    fn at(&self, height: u32) -> Option<Block> {
        self.chain.lock().iter().find(|b| b.height == height).cloned()
    }
}

#[async_trait]
impl BlockOracle for MockOracle {
    async fn best_block_hash(&self) -> Result<String, OracleError> {
        self.chain.lock().last().map(|b| b.hash.clone()).ok_or(OracleError::BlockNotFound)
    }

    async fn best_block_height(&self) -> Result<u32, OracleError> {
        self.chain.lock().last().map(|b| b.height).ok_or(OracleError::BlockNotFound)
    }

    async fn block_hash(&self, height: u32) -> Result<String, OracleError> {
        self.at(height).map(|b| b.hash).ok_or(OracleError::BlockNotFound)
    }

    async fn block(&self, hash: &str, height: u32) -> Result<Block, OracleError> {
        *self.block_calls.lock() += 1;
        {
            let mut failures = self.failures.lock();
            if let Some(left) = failures.get_mut(&height) {
                if *left > 0 {
                    *left -= 1;
                    return Err(OracleError::Transport(format!("connection reset at height {height}")));
                }
            }
        }
        match self.at(height) {
            Some(b) if b.hash == hash => Ok(b),
            _ => Err(OracleError::BlockNotFound),
        }
    }

    async fn transaction(&self, txid: &str) -> Result<Tx, OracleError> {
        self.txs.lock().get(txid).cloned().ok_or_else(|| OracleError::TxNotFound(txid.to_string()))
    }
}
