// Thin re-export module: implementation lives in `blockchain/core.rs`, which
// splits chain management, ledger state and block validation.

pub mod core;
pub use self::core::*;
