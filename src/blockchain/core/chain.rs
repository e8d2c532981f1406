use crate::crypto::{hash_hex, zero_hash};
use crate::error::ChainError;
use crate::events::{ChainEvent, ChainObserver, NoopObserver};
use crate::miner::{CancelToken, MinedBlock, Miner, NonceAttempts};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::state::{Account, AccountTable, LedgerState, PendingPool, SolvencyPolicy};
use super::validation::{validate_block, validate_difficulty_prefix, validate_proof_of_work};

/// Header version stamped on every block unless configured otherwise.
pub const DEFAULT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub prev_block_hash: String,
    pub timestamp: i64,
    pub version: u32,
    pub merkle_root: String,
    pub nonce: u64,
    pub difficulty_prefix: String,
}

impl BlockHeader {
    /// Compact JSON with sorted keys; the exact bytes fed to the hash.
    pub fn canonical_string(&self) -> String {
        self.canonical_string_with_nonce(self.nonce)
    }

    /// Same as [`canonical_string`](Self::canonical_string) with `nonce` substituted.
    pub fn canonical_string_with_nonce(&self, nonce: u64) -> String {
        // `json!` builds a BTreeMap-backed object, so keys serialize sorted.
        serde_json::json!({
            "difficulty_target": self.difficulty_prefix,
            "merkle_root_hash": self.merkle_root,
            "nonce": nonce,
            "prev_block_hash": self.prev_block_hash,
            "timestamp": self.timestamp,
            "version": self.version,
        })
        .to_string()
    }

    pub fn hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        hash_hex(self.canonical_string_with_nonce(nonce))
    }

    pub fn meets_difficulty(&self, hash: &str) -> bool {
        hash.starts_with(&self.difficulty_prefix)
    }

    /// Lazily hash successive nonces, starting from the current one.
    pub fn attempts(&self) -> NonceAttempts<'_> {
        NonceAttempts::new(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build an un-mined block stamped with the current time.
    pub fn build(
        index: u64,
        prev_block_hash: impl Into<String>,
        version: u32,
        transactions: Vec<Transaction>,
        difficulty_prefix: impl Into<String>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp();
        Self::build_at(index, prev_block_hash, version, transactions, difficulty_prefix, timestamp)
    }

    pub fn build_at(
        index: u64,
        prev_block_hash: impl Into<String>,
        version: u32,
        transactions: Vec<Transaction>,
        difficulty_prefix: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let merkle_root = Block::calculate_merkle_root(&transactions);

        Block {
            index,
            header: BlockHeader {
                prev_block_hash: prev_block_hash.into(),
                timestamp,
                version,
                merkle_root,
                nonce: 0,
                difficulty_prefix: difficulty_prefix.into(),
            },
            transactions,
        }
    }

    /// Hash of the header only; transactions are bound through the merkle root.
    pub fn hash(&self) -> String {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let ids: Vec<&str> = transactions.iter().map(Transaction::id).collect();
        merkle_root(&ids)
    }

    /// Search nonces upward from the current one until the header hash meets
    /// the prefix. No attempt cap; use [`Miner`] for a bounded search.
    pub fn mine(&mut self) -> Result<String, ChainError> {
        let found = Miner::unbounded().search(self, &CancelToken::new(), &NoopObserver)?;
        self.header.nonce = found.nonce;
        Ok(found.hash)
    }
}

/// Placeholder aggregate: the hash of all ids concatenated in order.
/// An empty list hashes the empty string.
pub fn merkle_root<S: AsRef<str>>(ids: &[S]) -> String {
    let joined: String = ids.iter().map(AsRef::as_ref).collect();
    hash_hex(joined)
}

/// Read-only snapshot of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub chain_length: usize,
    pub account_count: usize,
    pub pending_count: usize,
    pub tip_hash: String,
}

impl std::fmt::Display for ChainSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Chain length: {} blocks", self.chain_length)?;
        writeln!(f, "Accounts: {}", self.account_count)?;
        writeln!(f, "Pending transactions: {}", self.pending_count)?;
        writeln!(f, "Last block hash: {}", self.tip_hash)
    }
}

/// Totals for one `run_until_pool_empty` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub blocks: usize,
    pub transactions: usize,
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Stages of the mine-until-empty loop.
enum Stage {
    Selecting,
    Mining(Vec<Transaction>),
    Applying(Block),
    Appending(Block),
    Done,
}

/// Single-node ledger: accounts, pending pool and the append-only chain.
///
/// The chain is never empty; the genesis block is mined in the constructor.
pub struct Ledger {
    blocks: Vec<Block>,
    state: LedgerState,
    difficulty_prefix: String,
    version: u32,
    solvency: SolvencyPolicy,
    miner: Miner,
    observer: Arc<dyn ChainObserver>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("blocks", &self.blocks.len())
            .field("accounts", &self.state.accounts.len())
            .field("pending", &self.state.pending.len())
            .field("difficulty_prefix", &self.difficulty_prefix)
            .field("version", &self.version)
            .field("solvency", &self.solvency)
            .finish()
    }
}

impl Ledger {
    /// Create a ledger with default settings and no reporting.
    pub fn new(difficulty_prefix: &str) -> Result<Self, ChainError> {
        Self::with_parts(
            difficulty_prefix,
            DEFAULT_VERSION,
            SolvencyPolicy::default(),
            Miner::default(),
            Arc::new(NoopObserver),
        )
    }

    /// Create a ledger from loaded configuration.
    pub fn from_config(
        config: &crate::config::Config,
        observer: Arc<dyn ChainObserver>,
    ) -> Result<Self, ChainError> {
        Self::with_parts(
            &config.chain.difficulty_prefix,
            config.chain.version,
            config.chain.solvency,
            Miner::from_config(&config.miner),
            observer,
        )
    }

    pub fn with_parts(
        difficulty_prefix: &str,
        version: u32,
        solvency: SolvencyPolicy,
        miner: Miner,
        observer: Arc<dyn ChainObserver>,
    ) -> Result<Self, ChainError> {
        validate_difficulty_prefix(difficulty_prefix)?;

        let mut ledger = Ledger {
            blocks: Vec::new(),
            state: LedgerState::new(),
            difficulty_prefix: difficulty_prefix.to_string(),
            version,
            solvency,
            miner,
            observer,
        };
        ledger.create_genesis()?;
        Ok(ledger)
    }

    fn create_genesis(&mut self) -> Result<(), ChainError> {
        let genesis = Block::build(0, zero_hash(), self.version, vec![], self.difficulty_prefix.clone());
        let mined = self
            .miner
            .mine(genesis, &CancelToken::new(), self.observer.as_ref())?;

        info!(hash = %mined.hash, nonce = mined.block.header.nonce, "Genesis block created");
        self.observer.notify(&ChainEvent::GenesisCreated {
            hash: mined.hash.clone(),
        });
        self.blocks.push(mined.block);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    pub fn seed_accounts<I>(&mut self, accounts: I) -> Result<usize, ChainError>
    where
        I: IntoIterator<Item = Account>,
    {
        let mut added = 0;
        for account in accounts {
            self.state.accounts.insert(account)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn submit_transaction(&mut self, tx: Transaction) {
        self.state.pending.push(tx);
    }

    pub fn submit_transactions<I>(&mut self, txs: I) -> usize
    where
        I: IntoIterator<Item = Transaction>,
    {
        let before = self.state.pending.len();
        for tx in txs {
            self.state.pending.push(tx);
        }
        self.state.pending.len() - before
    }

    // ------------------------------------------------------------------
    // Block production
    // ------------------------------------------------------------------

    /// The first `k` pending transactions, oldest first. Does not touch the pool.
    pub fn select_batch(&self, k: usize) -> Vec<Transaction> {
        self.state.pending.select(k)
    }

    /// Un-mined block on top of the current tip.
    pub fn next_block(&self, batch: Vec<Transaction>) -> Block {
        Block::build(
            self.blocks.len() as u64,
            self.tip().hash(),
            self.version,
            batch,
            self.difficulty_prefix.clone(),
        )
    }

    /// Build and mine the next block. Ledger state is left untouched.
    pub fn mine_next_block(&self, batch: Vec<Transaction>) -> Result<MinedBlock, ChainError> {
        self.mine_next_block_with(batch, &CancelToken::new())
    }

    pub fn mine_next_block_with(
        &self,
        batch: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<MinedBlock, ChainError> {
        let block = self.next_block(batch);
        self.observer.notify(&ChainEvent::MiningStarted {
            index: block.index,
            transactions: block.transactions.len(),
            prev_hash: block.header.prev_block_hash.clone(),
            prefix: self.difficulty_prefix.clone(),
        });
        self.miner.mine(block, cancel, self.observer.as_ref())
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Debit senders, credit receivers, and drop the block's transactions
    /// from the pending pool. All or nothing.
    pub fn apply(&mut self, block: &Block) -> Result<usize, ChainError> {
        self.state.apply_block(block, self.solvency).map_err(|e| {
            warn!(index = block.index, error = %e, "Block rejected during apply");
            e
        })
    }

    /// Append a mined block to the chain. The block must link to the tip.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        validate_block(&block, self.tip(), &self.difficulty_prefix, self.version).map_err(|e| {
            warn!(index = block.index, error = %e, "Block rejected during append");
            e
        })?;

        info!(
            index = block.index,
            hash = %block.hash(),
            nonce = block.header.nonce,
            transactions = block.transactions.len(),
            "Block appended"
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Validate, apply and append in one step. Nothing changes on failure.
    pub fn commit(&mut self, block: Block) -> Result<(), ChainError> {
        validate_block(&block, self.tip(), &self.difficulty_prefix, self.version)?;
        self.apply(&block)?;
        self.append(block)
    }

    pub fn run_until_pool_empty(&mut self, batch_size: usize) -> Result<RunReport, ChainError> {
        self.run_until_pool_empty_with(batch_size, &CancelToken::new())
    }

    /// Select, mine, apply and append until the pending pool is empty.
    pub fn run_until_pool_empty_with(
        &mut self,
        batch_size: usize,
        cancel: &CancelToken,
    ) -> Result<RunReport, ChainError> {
        if batch_size == 0 {
            return Err(ChainError::ConfigError("batch size must be greater than zero".to_string()));
        }

        let started = Instant::now();
        let mut report = RunReport::default();
        let mut stage = Stage::Selecting;

        loop {
            stage = match stage {
                Stage::Selecting => {
                    let batch = self.select_batch(batch_size);
                    if batch.is_empty() {
                        Stage::Done
                    } else {
                        debug!(
                            size = batch.len(),
                            pending = self.state.pending.len(),
                            "Selected batch"
                        );
                        Stage::Mining(batch)
                    }
                }
                Stage::Mining(batch) => {
                    let mined = self.mine_next_block_with(batch, cancel)?;
                    report.attempts += mined.attempts;
                    self.observer.notify(&ChainEvent::BlockMined {
                        index: mined.block.index,
                        hash: mined.hash.clone(),
                        nonce: mined.block.header.nonce,
                        attempts: mined.attempts,
                        elapsed: mined.elapsed,
                    });
                    Stage::Applying(mined.block)
                }
                Stage::Applying(block) => {
                    validate_block(&block, self.tip(), &self.difficulty_prefix, self.version)?;
                    self.apply(&block)?;
                    Stage::Appending(block)
                }
                Stage::Appending(block) => {
                    let transactions = block.transactions.len();
                    self.append(block)?;
                    report.blocks += 1;
                    report.transactions += transactions;

                    let tip = self.tip();
                    self.observer.notify(&ChainEvent::BlockCommitted {
                        index: tip.index,
                        hash: tip.hash(),
                        transactions,
                        chain_length: self.blocks.len(),
                        pending: self.state.pending.len(),
                    });
                    Stage::Selecting
                }
                Stage::Done => break,
            };
        }

        report.elapsed = started.elapsed();
        info!(
            blocks = report.blocks,
            transactions = report.transactions,
            attempts = report.attempts,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Pending pool drained"
        );
        self.observer.notify(&ChainEvent::RunFinished {
            summary: self.summary(),
        });
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            chain_length: self.blocks.len(),
            account_count: self.state.accounts.len(),
            pending_count: self.state.pending.len(),
            tip_hash: self.tip().hash(),
        }
    }

    /// Re-check every block: genesis shape, linkage, proof of work, merkle roots.
    pub fn verify_chain(&self) -> Result<(), ChainError> {
        let genesis = self.genesis();
        if genesis.index != 0
            || genesis.header.prev_block_hash != zero_hash()
            || !genesis.transactions.is_empty()
        {
            return Err(ChainError::InvalidBlock("Malformed genesis block.".to_string()));
        }
        validate_proof_of_work(genesis)?;

        for pair in self.blocks.windows(2) {
            validate_block(&pair[1], &pair[0], &self.difficulty_prefix, self.version)?;
        }
        Ok(())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn tip(&self) -> &Block {
        // Never empty: the constructor pushes genesis before returning.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn accounts(&self) -> &AccountTable {
        &self.state.accounts
    }

    pub fn pending(&self) -> &PendingPool {
        &self.state.pending
    }

    pub fn balance(&self, key: &str) -> Option<i64> {
        self.state.accounts.balance(key)
    }

    pub fn difficulty_prefix(&self) -> &str {
        &self.difficulty_prefix
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn solvency(&self) -> SolvencyPolicy {
        self.solvency
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    pub fn observer(&self) -> Arc<dyn ChainObserver> {
        Arc::clone(&self.observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_hex;

    fn fixed_header(prefix: &str) -> Block {
        Block::build_at(0, zero_hash(), 1, vec![], prefix, 1_700_000_000)
    }

    fn ledger_with_accounts(prefix: &str, balances: &[(&str, i64)]) -> Ledger {
        let mut ledger = Ledger::new(prefix).unwrap();
        ledger
            .seed_accounts(
                balances
                    .iter()
                    .map(|(key, balance)| Account::new(key.to_uppercase(), *key, *balance)),
            )
            .unwrap();
        ledger
    }

    #[test]
    fn test_canonical_header_serialization() {
        let block = fixed_header("0");
        let expected = format!(
            "{{\"difficulty_target\":\"0\",\"merkle_root_hash\":\"{}\",\"nonce\":0,\"prev_block_hash\":\"{}\",\"timestamp\":1700000000,\"version\":1}}",
            hash_hex(""),
            zero_hash()
        );
        assert_eq!(block.header.canonical_string(), expected);
        assert_eq!(block.header.canonical_string(), block.header.clone().canonical_string());
        assert_eq!(
            block.hash(),
            "0e8f0e2831c9ccc0512bdef9d4a57f1c3892a8c8d750d5d5f3731fd9336cde81"
        );
    }

    #[test]
    fn test_merkle_placeholder() {
        let empty: [&str; 0] = [];
        assert_eq!(merkle_root(&empty), hash_hex(""));

        let id = hash_hex("x");
        assert_eq!(merkle_root(&[id.as_str()]), hash_hex(&id));
        assert_eq!(
            merkle_root(&[hash_hex("x"), hash_hex("y")]),
            "b672dc0c548e9d021bf92f9f572cd30ae0fb4406f42674207670c7e742eada77"
        );
        assert_eq!(Block::calculate_merkle_root(&[]), hash_hex(""));
    }

    #[test]
    fn test_empty_prefix_mines_at_nonce_zero() {
        let mut block = fixed_header("");
        let hash = block.mine().unwrap();
        assert_eq!(block.header.nonce, 0);
        assert_eq!(hash, block.hash());
    }

    #[test]
    fn test_mine_known_nonces() {
        let mut block = fixed_header("0");
        let hash = block.mine().unwrap();
        assert!(hash.starts_with('0'));
        assert_eq!(block.header.nonce, 0);

        let mut block = fixed_header("00");
        let hash = block.mine().unwrap();
        assert_eq!(block.header.nonce, 17);
        assert_eq!(
            hash,
            "00ba174a9f8dbb89910679bf280c28bc6067833bb374e41b3fdddb02ef77e18e"
        );
        assert_eq!(block.header.hash(), hash);
    }

    #[test]
    fn test_mine_rejects_non_hex_prefix() {
        let mut block = fixed_header("zz");
        assert!(matches!(
            block.mine(),
            Err(ChainError::InvalidDifficultyPrefix { .. })
        ));
        assert_eq!(block.header.nonce, 0);
    }

    #[test]
    fn test_genesis_shape() {
        let ledger = Ledger::new("0").unwrap();
        let genesis = ledger.genesis();
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(genesis.index, 0);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.header.prev_block_hash, "0".repeat(64));
        assert!(genesis.hash().starts_with('0'));
        assert!(ledger.verify_chain().is_ok());
    }

    #[test]
    fn test_invalid_prefix_rejected_before_mining() {
        assert!(matches!(
            Ledger::new("00x"),
            Err(ChainError::InvalidDifficultyPrefix { .. })
        ));
    }

    #[test]
    fn test_single_transfer_end_to_end() {
        let mut ledger = ledger_with_accounts("", &[("a", 100), ("b", 100), ("c", 100)]);
        ledger.submit_transaction(Transaction::new("a", "b", 30));

        let report = ledger.run_until_pool_empty(10).unwrap();

        assert_eq!(report.blocks, 1);
        assert_eq!(report.transactions, 1);
        assert_eq!(ledger.balance("a"), Some(70));
        assert_eq!(ledger.balance("b"), Some(130));
        assert_eq!(ledger.balance("c"), Some(100));
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.blocks().len(), 2);
        assert_eq!(ledger.tip().header.nonce, 0);
    }

    #[test]
    fn test_mine_next_block_leaves_state_untouched() {
        let mut ledger = ledger_with_accounts("0", &[("a", 100), ("b", 100)]);
        ledger.submit_transaction(Transaction::new("a", "b", 30));

        let batch = ledger.select_batch(5);
        let mined = ledger.mine_next_block(batch).unwrap();

        assert_eq!(mined.block.index, 1);
        assert_eq!(mined.block.header.prev_block_hash, ledger.tip().hash());
        assert!(mined.hash.starts_with('0'));
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.balance("a"), Some(100));

        ledger.apply(&mined.block).unwrap();
        ledger.append(mined.block).unwrap();
        assert_eq!(ledger.balance("a"), Some(70));
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_append_rejects_stale_block() {
        let mut ledger = ledger_with_accounts("0", &[("a", 100), ("b", 100)]);
        ledger.submit_transaction(Transaction::with_timestamp("a", "b", 1, 1.0));
        ledger.submit_transaction(Transaction::with_timestamp("a", "b", 2, 2.0));

        let first = ledger.mine_next_block(ledger.select_batch(1)).unwrap().block;
        let stale = ledger.mine_next_block(ledger.select_batch(2)).unwrap().block;
        ledger.commit(first).unwrap();

        let err = ledger.append(stale).unwrap_err();
        assert!(err.is_integrity_violation());
        assert_eq!(ledger.blocks().len(), 2);
    }

    #[test]
    fn test_commit_failure_changes_nothing() {
        let mut ledger = ledger_with_accounts("", &[("a", 100)]);
        ledger.submit_transaction(Transaction::with_timestamp("a", "nobody", 5, 1.0));

        let err = ledger.run_until_pool_empty(4).unwrap_err();
        assert_eq!(err, ChainError::UnknownAccount("nobody".to_string()));
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.balance("a"), Some(100));
    }

    #[test]
    fn test_zero_batch_size_is_config_error() {
        let mut ledger = Ledger::new("").unwrap();
        assert!(matches!(
            ledger.run_until_pool_empty(0),
            Err(ChainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_summary_reflects_state() {
        let mut ledger = ledger_with_accounts("", &[("a", 5), ("b", 5)]);
        ledger.submit_transaction(Transaction::new("a", "b", 1));
        let summary = ledger.summary();
        assert_eq!(summary.chain_length, 1);
        assert_eq!(summary.account_count, 2);
        assert_eq!(summary.pending_count, 1);
        assert_eq!(summary.tip_hash, ledger.genesis().hash());
        assert!(summary.to_string().contains("Pending transactions: 1"));
    }
}
