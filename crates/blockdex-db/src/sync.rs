//! Synchronization of the index with a block oracle.
//!
//! [`SyncWorker::resync_index`] brings the local tip up to the backend's
//! tip: it detects forks by comparing hashes, disconnects the orphaned
//! blocks, then connects forward in one of three modes (serial, parallel
//! fetch, bulk). Database work runs on the blocking pool; blocks are always
//! committed in strictly increasing height order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use blockdex_core::error::{IndexError, OracleError};
use blockdex_core::traits::BlockOracle;
use blockdex_core::types::{Block, ChainType};

use crate::bulk::BulkConnect;
use crate::config::{BulkConfig, SyncConfig};
use crate::store::RocksIndex;

/// Log a progress line every this many connected heights.
const PROGRESS_INTERVAL: u32 = 1000;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("sync interrupted")]
    Interrupted,
    #[error("backend is behind the index: local height {local}, backend height {remote}")]
    RemoteBehind { local: u32, remote: u32 },
    #[error("background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Join(e.to_string())
    }
}

/// How blocks are connected forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Serial,
    ParallelFetch,
    Bulk,
}

/// Pick the connect mode for a gap of `gap` blocks.
pub fn choose_sync_mode(config: &SyncConfig, chain_type: ChainType, initial: bool, gap: u32) -> SyncMode {
    let parallel = config.workers > 1;
    if initial && config.bulk_connect && parallel && gap > config.chunk {
        SyncMode::Bulk
    } else if parallel && (gap > config.chunk || (chain_type == ChainType::Ethereum && gap > 1)) {
        SyncMode::ParallelFetch
    } else {
        SyncMode::Serial
    }
}

/// Callback invoked with (hash, height) after each serially connected block.
pub type NewBlockHook = Arc<dyn Fn(&str, u32) + Send + Sync>;

// ------------------------------------------------------------------
// Fetching
// ------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct FetchPolicy {
    timeout: Duration,
    retry_delay: Duration,
}

impl FetchPolicy {
    fn from_config(config: &SyncConfig) -> Self {
        Self { timeout: config.rpc_timeout(), retry_delay: config.retry_delay() }
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T, OracleError>>) -> Result<T, OracleError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(OracleError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Fetch the block at `height`, retrying transient failures until it
/// arrives or shutdown is requested.
async fn fetch_block(
    oracle: &dyn BlockOracle,
    policy: FetchPolicy,
    shutdown: &mut watch::Receiver<bool>,
    height: u32,
) -> Result<Block, SyncError> {
    loop {
        if is_shutdown(shutdown) {
            return Err(SyncError::Interrupted);
        }
        let result = async {
            let hash = policy.call(oracle.block_hash(height)).await?;
            policy.call(oracle.block(&hash, height)).await
        }
        .await;
        match result {
            Ok(block) => return Ok(block),
            Err(e @ (OracleError::Transport(_) | OracleError::Timeout(_))) => {
                tracing::warn!(height, error = %e, "block fetch failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            tokio::time::sleep(policy.retry_delay).await;
                        }
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Aborts the fetch workers when the writer stops, for whatever reason.
struct Workers(Vec<JoinHandle<()>>);

impl Drop for Workers {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// `W` fetch tasks; task `i` fetches the heights `h` with `h % W == i` and
/// hands them to the writer over its own channel of capacity one.
struct ParallelFetcher {
    channels: Vec<mpsc::Receiver<Result<Block, SyncError>>>,
    _workers: Workers,
}

impl ParallelFetcher {
    fn spawn(
        oracle: &Arc<dyn BlockOracle>,
        policy: FetchPolicy,
        shutdown: &watch::Receiver<bool>,
        workers: usize,
        start: u32,
        end: u32,
    ) -> Self {
        let workers = workers.max(1);
        let mut channels = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let (tx, rx) = mpsc::channel(1);
            let oracle = Arc::clone(oracle);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                for height in (start..=end).filter(|h| *h as usize % workers == i) {
                    let result = fetch_block(oracle.as_ref(), policy, &mut shutdown, height).await;
                    let failed = result.is_err();
                    if tx.send(result).await.is_err() || failed {
                        break;
                    }
                }
            }));
            channels.push(rx);
        }
        Self { channels, _workers: Workers(handles) }
    }

    async fn next(&mut self, height: u32, shutdown: &mut watch::Receiver<bool>) -> Result<Block, SyncError> {
        if is_shutdown(shutdown) {
            return Err(SyncError::Interrupted);
        }
        let n = self.channels.len();
        let channel = &mut self.channels[height as usize % n];
        tokio::select! {
            received = channel.recv() => match received {
                Some(result) => result,
                None => Err(SyncError::Join(format!("fetch worker for height {height} stopped"))),
            },
            Ok(()) = shutdown.changed() => Err(SyncError::Interrupted),
        }
    }
}

// ------------------------------------------------------------------
// Worker
// ------------------------------------------------------------------

/// Keeps a [`RocksIndex`] in step with a [`BlockOracle`].
pub struct SyncWorker {
    index: Arc<RocksIndex>,
    oracle: Arc<dyn BlockOracle>,
    config: SyncConfig,
    bulk: BulkConfig,
    shutdown: watch::Receiver<bool>,
    on_new_block: Option<NewBlockHook>,
}

impl SyncWorker {
    pub fn new(
        index: Arc<RocksIndex>,
        oracle: Arc<dyn BlockOracle>,
        config: SyncConfig,
        bulk: BulkConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { index, oracle, config, bulk, shutdown, on_new_block: None }
    }

    pub fn with_new_block_hook(mut self, hook: NewBlockHook) -> Self {
        self.on_new_block = Some(hook);
        self
    }

    pub fn index(&self) -> &Arc<RocksIndex> {
        &self.index
    }

    fn policy(&self) -> FetchPolicy {
        FetchPolicy::from_config(&self.config)
    }

    fn check_shutdown(&self) -> Result<(), SyncError> {
        if is_shutdown(&self.shutdown) {
            return Err(SyncError::Interrupted);
        }
        Ok(())
    }

    /// Synchronize the index with the backend tip.
    ///
    /// `initial` marks the first sync after startup, which may use the
    /// bulk loader. Returns once the local tip equals the backend tip.
    pub async fn resync_index(&self, initial: bool) -> Result<(), SyncError> {
        let is = Arc::clone(self.index.internal_state());
        is.start_sync(initial);
        let result = self.resync_loop(initial).await;
        match &result {
            Ok(height) => {
                is.finish_sync(*height);
                tracing::info!(height, "index synchronized");
            }
            Err(SyncError::Interrupted) => tracing::info!("sync interrupted"),
            Err(e) => tracing::error!(error = %e, "sync failed"),
        }
        self.index.store_internal_state()?;
        result.map(|_| ())
    }

    async fn resync_loop(&self, initial: bool) -> Result<u32, SyncError> {
        let policy = self.policy();
        let mut initial = initial;
        loop {
            self.check_shutdown()?;
            let remote_hash = policy.call(self.oracle.best_block_hash()).await?;
            let start = match self.index.get_best_block()? {
                Some((height, hash)) => {
                    if hash == remote_hash {
                        return Ok(height);
                    }
                    let remote_at_local = match policy.call(self.oracle.block_hash(height)).await {
                        Ok(h) => h,
                        Err(OracleError::BlockNotFound) => String::new(),
                        Err(e) => return Err(e.into()),
                    };
                    if remote_at_local != hash {
                        self.handle_fork(height).await?;
                        continue;
                    }
                    height + 1
                }
                None => self.config.min_start_height,
            };

            let remote_best = policy.call(self.oracle.best_block_height()).await?;
            if remote_best < start {
                return Err(SyncError::RemoteBehind { local: start.saturating_sub(1), remote: remote_best });
            }
            let gap = remote_best - start + 1;
            let mode = match choose_sync_mode(&self.config, self.index.chain_type(), initial, gap) {
                SyncMode::Bulk if self.config.dry_run => SyncMode::ParallelFetch,
                mode => mode,
            };
            tracing::info!(start, end = remote_best, ?mode, "connecting blocks");
            match mode {
                SyncMode::Serial => self.connect_serial(start, remote_best).await?,
                SyncMode::ParallelFetch => self.connect_parallel(start, remote_best).await?,
                SyncMode::Bulk => self.connect_bulk(start, remote_best).await?,
            }
            if self.config.dry_run {
                // nothing was connected, so the tip never moves
                return Ok(self.index.internal_state().best_height());
            }
            initial = false;
        }
    }

    /// Walk back from `local_best` to the last height on which local and
    /// backend agree and disconnect everything above it.
    async fn handle_fork(&self, local_best: u32) -> Result<(), SyncError> {
        let policy = self.policy();
        let mut lower = local_best;
        while lower > 0 {
            self.check_shutdown()?;
            let Some(local) = self.index.get_block_hash(lower - 1)? else {
                break;
            };
            let remote = match policy.call(self.oracle.block_hash(lower - 1)).await {
                Ok(h) => h,
                Err(OracleError::BlockNotFound) => String::new(),
                Err(e) => return Err(e.into()),
            };
            if local == remote {
                break;
            }
            lower -= 1;
        }
        tracing::warn!(lower, higher = local_best, "fork detected, disconnecting blocks");
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.disconnect_block_range(lower, local_best)).await??;
        Ok(())
    }

    async fn connect(&self, block: Block) -> Result<(), SyncError> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.connect_block(&block)).await??;
        Ok(())
    }

    fn notify(&self, hash: &str, height: u32) {
        if let Some(hook) = &self.on_new_block {
            hook(hash, height);
        }
        if height % PROGRESS_INTERVAL == 0 {
            tracing::info!(height, "connected block");
        }
    }

    /// Hash of the block below `start`, if the index has it.
    fn parent_hash(&self, start: u32) -> Result<Option<String>, SyncError> {
        if start == 0 {
            return Ok(None);
        }
        Ok(self.index.get_block_hash(start - 1)?)
    }

    /// Returns false, after logging, when `block` does not extend `prev`.
    fn links(prev: &Option<String>, block: &Block) -> bool {
        match prev {
            Some(prev) if *prev != block.prev_hash => {
                tracing::warn!(height = block.height, hash = %block.hash, "block does not connect to local tip");
                false
            }
            _ => true,
        }
    }

    async fn connect_serial(&self, start: u32, end: u32) -> Result<(), SyncError> {
        let policy = self.policy();
        let mut shutdown = self.shutdown.clone();
        let mut prev = self.parent_hash(start)?;
        for height in start..=end {
            let block = fetch_block(self.oracle.as_ref(), policy, &mut shutdown, height).await?;
            if !Self::links(&prev, &block) {
                return Ok(());
            }
            let hash = block.hash.clone();
            if !self.config.dry_run {
                self.connect(block).await?;
            }
            self.notify(&hash, height);
            prev = Some(hash);
        }
        Ok(())
    }

    async fn connect_parallel(&self, start: u32, end: u32) -> Result<(), SyncError> {
        let mut shutdown = self.shutdown.clone();
        let mut fetcher = ParallelFetcher::spawn(&self.oracle, self.policy(), &shutdown, self.config.workers, start, end);
        let mut prev = self.parent_hash(start)?;
        for height in start..=end {
            let block = fetcher.next(height, &mut shutdown).await?;
            if !Self::links(&prev, &block) {
                return Ok(());
            }
            let hash = block.hash.clone();
            if !self.config.dry_run {
                self.connect(block).await?;
            }
            self.notify(&hash, height);
            prev = Some(hash);
        }
        Ok(())
    }

    async fn connect_bulk(&self, start: u32, end: u32) -> Result<(), SyncError> {
        let keep = self.index.parser().keep_block_addresses();
        let mut shutdown = self.shutdown.clone();
        let mut fetcher = ParallelFetcher::spawn(&self.oracle, self.policy(), &shutdown, self.config.workers, start, end);
        let mut prev = self.parent_hash(start)?;
        let mut bulk: BulkConnect = self.index.init_bulk_connect(self.bulk.clone())?;
        let mut result = Ok(());

        for height in start..=end {
            let block = match fetcher.next(height, &mut shutdown).await {
                Ok(b) => b,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            if !Self::links(&prev, &block) {
                break;
            }
            let hash = block.hash.clone();
            let store_block_txs = keep > 0 && height.saturating_add(keep) > end;
            let (returned, connected) = tokio::task::spawn_blocking(move || {
                let r = bulk.connect_block(&block, store_block_txs);
                (bulk, r)
            })
            .await?;
            bulk = returned;
            if let Err(e) = connected {
                // the loader holds part of the failed block; nothing more may be written
                tracing::error!(height, error = %e, "bulk connect failed");
                tokio::task::spawn_blocking(move || bulk.abort()).await?;
                return Err(e.into());
            }
            self.notify(&hash, height);
            prev = Some(hash);
        }

        tokio::task::spawn_blocking(move || bulk.close()).await??;
        result
    }
}
