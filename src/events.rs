//! Reporting side channel for the ledger.
//!
//! Core operations hand [`ChainEvent`]s to a [`ChainObserver`]. Observers
//! never run while a ledger lock is held and must not block for long.

use crate::blockchain::ChainSummary;
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    GenesisCreated {
        hash: String,
    },
    MiningStarted {
        index: u64,
        transactions: usize,
        prev_hash: String,
        prefix: String,
    },
    MiningProgress {
        index: u64,
        attempts: u64,
        nonce: u64,
    },
    BlockMined {
        index: u64,
        hash: String,
        nonce: u64,
        attempts: u64,
        elapsed: Duration,
    },
    BlockCommitted {
        index: u64,
        hash: String,
        transactions: usize,
        chain_length: usize,
        pending: usize,
    },
    RunFinished {
        summary: ChainSummary,
    },
}

pub trait ChainObserver: Send + Sync {
    fn notify(&self, event: &ChainEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ChainObserver for NoopObserver {
    fn notify(&self, _event: &ChainEvent) {}
}

impl<F> ChainObserver for F
where
    F: Fn(&ChainEvent) + Send + Sync,
{
    fn notify(&self, event: &ChainEvent) {
        self(event)
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ChainObserver for TracingObserver {
    fn notify(&self, event: &ChainEvent) {
        match event {
            ChainEvent::GenesisCreated { hash } => info!(%hash, "genesis created"),
            ChainEvent::MiningStarted {
                index,
                transactions,
                prefix,
                ..
            } => info!(index, transactions, %prefix, "mining started"),
            ChainEvent::MiningProgress {
                index,
                attempts,
                nonce,
            } => debug!(index, attempts, nonce, "mining progress"),
            ChainEvent::BlockMined {
                index,
                hash,
                nonce,
                attempts,
                elapsed,
            } => info!(
                index,
                %hash,
                nonce,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "block mined"
            ),
            ChainEvent::BlockCommitted {
                index,
                chain_length,
                pending,
                ..
            } => info!(index, chain_length, pending, "block committed"),
            ChainEvent::RunFinished { summary } => info!(
                chain_length = summary.chain_length,
                accounts = summary.account_count,
                pending = summary.pending_count,
                tip = %summary.tip_hash,
                "run finished"
            ),
        }
    }
}

/// Sends a copy of every event down a crossbeam channel. A disconnected
/// receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: Sender<ChainEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<ChainEvent>) -> Self {
        ChannelObserver { sender }
    }

    /// Unbounded channel plus the observer feeding it.
    pub fn unbounded() -> (Self, Receiver<ChainEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }
}

impl ChainObserver for ChannelObserver {
    fn notify(&self, event: &ChainEvent) {
        let _ = self.sender.send(event.clone());
    }
}
