//! Error types for powledger

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Invalid block linkage: expected previous hash {expected}, got {found}")]
    InvalidBlockLinkage { expected: String, found: String },
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid proof of work: hash {hash} does not start with '{prefix}'")]
    InvalidProofOfWork { hash: String, prefix: String },
    #[error("Invalid Merkle root: expected {expected}, got {found}")]
    InvalidMerkleRoot { expected: String, found: String },
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
    #[error("Duplicate account: {0}")]
    DuplicateAccount(String),
    #[error("Insufficient balance for {key}: balance {balance}, needs {amount}")]
    InsufficientBalance { key: String, balance: i64, amount: u64 },
    #[error("Invalid difficulty prefix '{prefix}': {reason}")]
    InvalidDifficultyPrefix { prefix: String, reason: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Not enough accounts to generate transfers: have {available}, need at least 2")]
    InsufficientAccounts { available: usize },
    #[error("Mining budget exhausted after {attempts} attempts")]
    MiningBudgetExhausted { attempts: u64 },
    #[error("Mining deadline passed after {attempts} attempts")]
    MiningTimedOut { attempts: u64 },
    #[error("Mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },
    #[error("IO error: {0}")]
    IoError(String),
}

impl ChainError {
    /// True for errors that mean the chain or ledger would be corrupted had
    /// the operation continued.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidBlockLinkage { .. }
                | ChainError::InvalidBlock(_)
                | ChainError::InvalidProofOfWork { .. }
                | ChainError::InvalidMerkleRoot { .. }
                | ChainError::UnknownAccount(_)
        )
    }

    pub fn mining_attempts(&self) -> Option<u64> {
        match self {
            ChainError::MiningBudgetExhausted { attempts }
            | ChainError::MiningTimedOut { attempts }
            | ChainError::MiningCancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_classification() {
        assert!(ChainError::UnknownAccount("k".into()).is_integrity_violation());
        assert!(ChainError::InvalidBlockLinkage {
            expected: "a".into(),
            found: "b".into()
        }
        .is_integrity_violation());
        assert!(!ChainError::ConfigError("x".into()).is_integrity_violation());
        assert!(!ChainError::MiningCancelled { attempts: 3 }.is_integrity_violation());
    }

    #[test]
    fn test_mining_attempts_reported() {
        assert_eq!(ChainError::MiningTimedOut { attempts: 42 }.mining_attempts(), Some(42));
        assert_eq!(ChainError::DuplicateAccount("k".into()).mining_attempts(), None);
    }
}
