/// Transaction types for powledger
use crate::crypto::hash_hex;
use serde::{Deserialize, Serialize};

/// A transfer of `amount` from one account to another.
///
/// Fields are private so the id, which is derived from all of them at
/// construction, can never drift from the data it identifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    sender_key: String,
    receiver_key: String,
    amount: u64,
    /// Seconds since the Unix epoch, with sub-second precision.
    created_at: f64,
    id: String,
}

impl Transaction {
    /// Create a transfer stamped with the current wall-clock time.
    pub fn new(sender_key: impl Into<String>, receiver_key: impl Into<String>, amount: u64) -> Self {
        Self::with_timestamp(sender_key, receiver_key, amount, now_seconds())
    }

    /// Create a transfer with an explicit creation timestamp.
    pub fn with_timestamp(
        sender_key: impl Into<String>,
        receiver_key: impl Into<String>,
        amount: u64,
        created_at: f64,
    ) -> Self {
        let sender_key = sender_key.into();
        let receiver_key = receiver_key.into();
        let id = transaction_id(&sender_key, &receiver_key, amount, created_at);
        Transaction {
            sender_key,
            receiver_key,
            amount,
            created_at,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_key(&self) -> &str {
        &self.sender_key
    }

    pub fn receiver_key(&self) -> &str {
        &self.receiver_key
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Recompute the id from the fields, ignoring the stored one.
    pub fn compute_id(&self) -> String {
        transaction_id(&self.sender_key, &self.receiver_key, self.amount, self.created_at)
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transaction(id={}..., {} -> {}, amount={})",
            short(&self.id, 10),
            short(&self.sender_key, 8),
            short(&self.receiver_key, 8),
            self.amount
        )
    }
}

fn short(s: &str, n: usize) -> &str {
    s.get(..n).unwrap_or(s)
}

/// `hash("{sender}|{receiver}|{amount}|{timestamp}")`
pub fn transaction_id(sender_key: &str, receiver_key: &str, amount: u64, created_at: f64) -> String {
    hash_hex(format!(
        "{}|{}|{}|{}",
        sender_key,
        receiver_key,
        amount,
        format_timestamp(created_at)
    ))
}

/// Render a float timestamp with full round-trip precision.
///
/// Whole numbers keep a trailing `.0` so `1700000000.0` and `1700000000`
/// never produce the same id text as an integer field would.
pub fn format_timestamp(ts: f64) -> String {
    if ts.is_finite() && ts.fract() == 0.0 {
        format!("{:.1}", ts)
    } else {
        format!("{}", ts)
    }
}

/// Current wall-clock time in fractional seconds.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
