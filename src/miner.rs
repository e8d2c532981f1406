//! Proof-of-work nonce search
//!
//! [`NonceAttempts`] yields `(nonce, hash)` pairs lazily. [`Miner`] drives it
//! with an optional attempt budget, deadline and [`CancelToken`], either on
//! the calling thread or across a rayon pool. The parallel search scans
//! fixed windows of nonces and keeps the lowest match in a window, so it
//! settles on the same nonce the sequential search would.

use crate::blockchain::{validate_difficulty_prefix, Block, BlockHeader};
use crate::config::MinerConfig;
use crate::error::ChainError;
use crate::events::{ChainEvent, ChainObserver};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Nonces each rayon worker gets per window.
const WINDOW_PER_THREAD: usize = 4096;

/// How often the sequential search looks at the clock.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Lazy iterator over `(nonce, header hash)` starting at the header's nonce.
pub struct NonceAttempts<'a> {
    header: &'a BlockHeader,
    next: Option<u64>,
}

impl<'a> NonceAttempts<'a> {
    pub fn new(header: &'a BlockHeader) -> Self {
        NonceAttempts {
            header,
            next: Some(header.nonce),
        }
    }
}

impl Iterator for NonceAttempts<'_> {
    type Item = (u64, String);

    fn next(&mut self) -> Option<Self::Item> {
        let nonce = self.next?;
        self.next = nonce.checked_add(1);
        Some((nonce, self.header.hash_with_nonce(nonce)))
    }
}

/// Shared flag that stops a running search. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Winning nonce and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub nonce: u64,
    pub hash: String,
    /// Hashes computed, counted as a sequential search would count them.
    pub attempts: u64,
}

/// A block whose header now carries a winning nonce.
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub hash: String,
    pub attempts: u64,
    pub elapsed: Duration,
}

impl MinedBlock {
    pub fn into_block(self) -> Block {
        self.block
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miner {
    threads: usize,
    max_attempts: Option<u64>,
    timeout: Option<Duration>,
    progress_interval: u64,
}

impl Default for Miner {
    fn default() -> Self {
        Miner {
            threads: 1,
            max_attempts: None,
            timeout: None,
            progress_interval: 100_000,
        }
    }
}

impl Miner {
    /// Single-threaded search with no budget and no deadline.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MinerConfig) -> Self {
        Miner {
            threads: config.threads,
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
            timeout: (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms)),
            progress_interval: config.progress_interval.max(1),
        }
    }

    /// Worker count; `0` means one per core.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Mine `block`, returning it with the winning nonce set.
    pub fn mine(
        &self,
        mut block: Block,
        cancel: &CancelToken,
        observer: &dyn ChainObserver,
    ) -> Result<MinedBlock, ChainError> {
        let started = Instant::now();
        let found = self.search(&block, cancel, observer)?;
        block.header.nonce = found.nonce;

        debug!(
            index = block.index,
            nonce = found.nonce,
            attempts = found.attempts,
            "Proof of work found"
        );
        Ok(MinedBlock {
            block,
            hash: found.hash,
            attempts: found.attempts,
            elapsed: started.elapsed(),
        })
    }

    /// Find the lowest nonce at or above the header's current nonce whose
    /// hash meets the difficulty prefix. The block itself is not modified.
    pub fn search(
        &self,
        block: &Block,
        cancel: &CancelToken,
        observer: &dyn ChainObserver,
    ) -> Result<Found, ChainError> {
        validate_difficulty_prefix(&block.header.difficulty_prefix)?;

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let result = if self.threads == 1 {
            self.search_sequential(block, deadline, cancel, observer)
        } else {
            self.search_parallel(block, deadline, cancel, observer)
        };

        if let Err(e) = &result {
            warn!(index = block.index, error = %e, "Mining stopped without a result");
        }
        result
    }

    fn search_sequential(
        &self,
        block: &Block,
        deadline: Option<Instant>,
        cancel: &CancelToken,
        observer: &dyn ChainObserver,
    ) -> Result<Found, ChainError> {
        let header = &block.header;
        let mut attempts = 0u64;

        for (nonce, hash) in header.attempts() {
            attempts += 1;
            if header.meets_difficulty(&hash) {
                return Ok(Found { nonce, hash, attempts });
            }

            if cancel.is_cancelled() {
                return Err(ChainError::MiningCancelled { attempts });
            }
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(ChainError::MiningBudgetExhausted { attempts });
            }
            if attempts % DEADLINE_CHECK_INTERVAL == 0 && deadline_passed(deadline) {
                return Err(ChainError::MiningTimedOut { attempts });
            }
            if attempts % self.progress_interval == 0 {
                observer.notify(&ChainEvent::MiningProgress {
                    index: block.index,
                    attempts,
                    nonce,
                });
            }
        }
        Err(ChainError::MiningBudgetExhausted { attempts })
    }

    fn search_parallel(
        &self,
        block: &Block,
        deadline: Option<Instant>,
        cancel: &CancelToken,
        observer: &dyn ChainObserver,
    ) -> Result<Found, ChainError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| ChainError::ConfigError(format!("Failed to build mining pool: {}", e)))?;

        let header = &block.header;
        let window = WINDOW_PER_THREAD * pool.current_num_threads().max(1);
        let budget = self.max_attempts.unwrap_or(u64::MAX);
        let mut start = header.nonce;
        let mut attempts = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(ChainError::MiningCancelled { attempts });
            }
            if attempts >= budget {
                return Err(ChainError::MiningBudgetExhausted { attempts });
            }
            if deadline_passed(deadline) {
                return Err(ChainError::MiningTimedOut { attempts });
            }

            let room = u64::MAX - start;
            let len = (window as u64).min(budget - attempts).min(room);
            if len == 0 {
                return Err(ChainError::MiningBudgetExhausted { attempts });
            }

            debug!(index = block.index, start, len, "Scanning nonce window");
            let hit = pool.install(|| {
                (0..len as usize)
                    .into_par_iter()
                    .map(|offset| start + offset as u64)
                    .filter(|_| !cancel.is_cancelled())
                    .map(|nonce| (nonce, header.hash_with_nonce(nonce)))
                    .find_first(|(_, hash)| header.meets_difficulty(hash))
            });

            if let Some((nonce, hash)) = hit {
                attempts += nonce - start + 1;
                return Ok(Found { nonce, hash, attempts });
            }

            let before = attempts;
            attempts += len;
            start += len;
            if before / self.progress_interval != attempts / self.progress_interval {
                observer.notify(&ChainEvent::MiningProgress {
                    index: block.index,
                    attempts,
                    nonce: start,
                });
            }
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::zero_hash;
    use crate::events::NoopObserver;
    use std::sync::Mutex;

    fn fixed_block(prefix: &str) -> Block {
        Block::build_at(0, zero_hash(), 1, vec![], prefix, 1_700_000_000)
    }

    #[test]
    fn test_attempts_iterator_is_lazy_and_sequential() {
        let block = fixed_block("0");
        let first: Vec<(u64, String)> = block.header.attempts().take(3).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].0, 0);
        assert_eq!(first[2].0, 2);
        assert_eq!(first[0].1, block.hash());
        assert_eq!(first[1].1, block.header.hash_with_nonce(1));
    }

    #[test]
    fn test_attempts_stop_at_nonce_space_end() {
        let mut block = fixed_block("0");
        block.header.nonce = u64::MAX;
        assert_eq!(block.header.attempts().count(), 1);
    }

    #[test]
    fn test_sequential_finds_known_nonce() {
        let mined = Miner::default()
            .mine(fixed_block("000"), &CancelToken::new(), &NoopObserver)
            .unwrap();
        assert_eq!(mined.block.header.nonce, 4442);
        assert_eq!(mined.attempts, 4443);
        assert_eq!(
            mined.hash,
            "000e802035d2741c4ed229778e5697e5146bc49ebdb42c5d5c4a4b5911deeaba"
        );
        assert_eq!(mined.block.hash(), mined.hash);
    }

    #[test]
    fn test_parallel_agrees_with_sequential() {
        for prefix in ["0", "00", "000"] {
            let sequential = Miner::default()
                .search(&fixed_block(prefix), &CancelToken::new(), &NoopObserver)
                .unwrap();
            let parallel = Miner::default()
                .with_threads(4)
                .search(&fixed_block(prefix), &CancelToken::new(), &NoopObserver)
                .unwrap();
            assert_eq!(sequential, parallel, "prefix {}", prefix);
        }
    }

    #[test]
    fn test_budget_exhaustion() {
        let miner = Miner::default().with_max_attempts(10);
        let err = miner
            .search(&fixed_block("ffffffff"), &CancelToken::new(), &NoopObserver)
            .unwrap_err();
        assert_eq!(err, ChainError::MiningBudgetExhausted { attempts: 10 });

        let err = miner
            .with_threads(2)
            .search(&fixed_block("ffffffff"), &CancelToken::new(), &NoopObserver)
            .unwrap_err();
        assert_eq!(err, ChainError::MiningBudgetExhausted { attempts: 10 });
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Miner::default()
            .search(&fixed_block("ffffffff"), &cancel, &NoopObserver)
            .unwrap_err();
        assert_eq!(err, ChainError::MiningCancelled { attempts: 1 });

        let err = Miner::default()
            .with_threads(2)
            .search(&fixed_block("ffffffff"), &cancel, &NoopObserver)
            .unwrap_err();
        assert_eq!(err, ChainError::MiningCancelled { attempts: 0 });
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let err = Miner::default()
            .search(&fixed_block("ffffffffffff"), &cancel, &NoopObserver)
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, ChainError::MiningCancelled { .. }));
    }

    #[test]
    fn test_deadline() {
        let miner = Miner::default().with_timeout(Duration::from_millis(5));
        let err = miner
            .search(&fixed_block("ffffffffffff"), &CancelToken::new(), &NoopObserver)
            .unwrap_err();
        assert!(matches!(err, ChainError::MiningTimedOut { .. }));
    }

    #[test]
    fn test_progress_events() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: &ChainEvent| {
            if let ChainEvent::MiningProgress { attempts, .. } = event {
                seen.lock().unwrap().push(*attempts);
            }
        };
        let miner = Miner::default().with_progress_interval(100).with_max_attempts(350);
        let _ = miner.search(&fixed_block("ffffffff"), &CancelToken::new(), &observer);
        assert_eq!(*seen.lock().unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn test_invalid_prefix_never_enters_search() {
        let err = Miner::default()
            .search(&fixed_block("xyz"), &CancelToken::new(), &NoopObserver)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidDifficultyPrefix { .. }));
    }

    #[test]
    fn test_search_resumes_from_current_nonce() {
        let mut block = fixed_block("00");
        block.header.nonce = 18;
        let found = Miner::default()
            .search(&block, &CancelToken::new(), &NoopObserver)
            .unwrap();
        assert!(found.nonce > 17);
        assert!(found.hash.starts_with("00"));
        assert_eq!(found.hash, block.header.hash_with_nonce(found.nonce));
    }

    #[test]
    fn test_from_config_maps_zero_to_unbounded() {
        let config = MinerConfig {
            threads: 3,
            max_attempts: 0,
            timeout_ms: 0,
            progress_interval: 0,
        };
        let miner = Miner::from_config(&config);
        assert_eq!(miner.threads(), 3);
        assert_eq!(miner, Miner::default().with_threads(3).with_progress_interval(1));
    }
}
