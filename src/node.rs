//! Multi-threaded access to a single ledger.
//!
//! The ledger sits behind one `RwLock`. A worker takes the read lock only to
//! build a block template, mines with no lock held, then takes the write
//! lock once to validate, apply and append. Observers are notified after
//! the lock is released.

use crate::blockchain::{ChainSummary, Ledger, RunReport};
use crate::error::ChainError;
use crate::events::{ChainEvent, ChainObserver};
use crate::miner::{CancelToken, Miner};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub type SharedLedger = Arc<RwLock<Ledger>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Ready,
    Mining,
    Stopped,
}

#[derive(Clone)]
pub struct Node {
    ledger: SharedLedger,
    miner: Miner,
    observer: Arc<dyn ChainObserver>,
    cancel: CancelToken,
    state: Arc<RwLock<NodeState>>,
}

impl Node {
    pub fn new(ledger: Ledger) -> Self {
        let miner = ledger.miner().clone();
        let observer = ledger.observer();
        Node {
            ledger: Arc::new(RwLock::new(ledger)),
            miner,
            observer,
            cancel: CancelToken::new(),
            state: Arc::new(RwLock::new(NodeState::Ready)),
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn summary(&self) -> ChainSummary {
        self.ledger.read().summary()
    }

    /// Stop every worker on this node at its next check.
    pub fn stop(&self) {
        self.cancel.cancel();
        *self.state.write() = NodeState::Stopped;
    }

    /// Mine until the pending pool is empty, holding the lock only around
    /// template creation and commit.
    ///
    /// When another worker extends the chain first, the stale block is
    /// dropped and a fresh batch is selected.
    pub fn mine_until_empty(&self, batch_size: usize) -> Result<RunReport, ChainError> {
        if batch_size == 0 {
            return Err(ChainError::ConfigError("batch size must be greater than zero".to_string()));
        }

        let started = Instant::now();
        let mut report = RunReport::default();
        self.set_state(NodeState::Mining);

        let result = loop {
            if self.cancel.is_cancelled() {
                break Err(ChainError::MiningCancelled { attempts: report.attempts });
            }

            let template = {
                let ledger = self.ledger.read();
                let batch = ledger.select_batch(batch_size);
                if batch.is_empty() {
                    break Ok(());
                }
                ledger.next_block(batch)
            };

            let mined = match self.miner.mine(template, &self.cancel, self.observer.as_ref()) {
                Ok(mined) => mined,
                Err(e) => break Err(e),
            };
            report.attempts += mined.attempts;
            self.observer.notify(&ChainEvent::BlockMined {
                index: mined.block.index,
                hash: mined.hash.clone(),
                nonce: mined.block.header.nonce,
                attempts: mined.attempts,
                elapsed: mined.elapsed,
            });

            let index = mined.block.index;
            let transactions = mined.block.transactions.len();
            let committed = {
                let mut ledger = self.ledger.write();
                match ledger.commit(mined.block) {
                    Ok(()) => Ok((ledger.blocks().len(), ledger.pending().len())),
                    Err(e) => Err(e),
                }
            };

            match committed {
                Ok((chain_length, pending)) => {
                    report.blocks += 1;
                    report.transactions += transactions;
                    self.observer.notify(&ChainEvent::BlockCommitted {
                        index,
                        hash: mined.hash,
                        transactions,
                        chain_length,
                        pending,
                    });
                }
                Err(e) if is_stale(&e) => {
                    debug!(index, error = %e, "Lost race for tip; reselecting");
                }
                Err(e) => break Err(e),
            }
        };

        self.set_state(if self.cancel.is_cancelled() {
            NodeState::Stopped
        } else {
            NodeState::Ready
        });
        result?;

        report.elapsed = started.elapsed();
        info!(blocks = report.blocks, transactions = report.transactions, "Worker finished");
        Ok(report)
    }

    fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }
}

/// The tip moved while this block was being mined.
fn is_stale(err: &ChainError) -> bool {
    match err {
        ChainError::InvalidBlockLinkage { .. } => true,
        ChainError::InvalidBlock(msg) => msg.starts_with("Invalid block index"),
        _ => false,
    }
}
