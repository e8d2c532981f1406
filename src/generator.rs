//! Synthetic accounts and transfers for seeding a ledger

use crate::blockchain::Account;
use crate::config::GeneratorConfig;
use crate::crypto::public_key_for;
use crate::error::ChainError;
use crate::transaction::Transaction;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;

/// Seeded when a seed is given, otherwise drawn from OS entropy.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// `count` accounts named `user_0000`, `user_0001`, ... with keys derived
/// from their names and balances drawn uniformly from `balances`.
pub fn generate_accounts<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    balances: RangeInclusive<i64>,
) -> Result<Vec<Account>, ChainError> {
    if balances.is_empty() {
        return Err(ChainError::ConfigError(format!("empty balance range {:?}", balances)));
    }

    Ok((0..count)
        .map(|i| {
            let name = format!("user_{:04}", i);
            let public_key = public_key_for(&name);
            Account::new(name, public_key, rng.gen_range(balances.clone()))
        })
        .collect())
}

/// `count` transfers between two distinct keys drawn from `keys`.
pub fn generate_transfers<R: Rng + ?Sized, K: AsRef<str>>(
    rng: &mut R,
    keys: &[K],
    count: usize,
    amounts: RangeInclusive<u64>,
) -> Result<Vec<Transaction>, ChainError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if keys.len() < 2 {
        return Err(ChainError::InsufficientAccounts { available: keys.len() });
    }
    if amounts.is_empty() {
        return Err(ChainError::ConfigError(format!("empty amount range {:?}", amounts)));
    }

    Ok((0..count)
        .map(|_| {
            let pair = sample(rng, keys.len(), 2);
            let sender = keys[pair.index(0)].as_ref();
            let receiver = keys[pair.index(1)].as_ref();
            Transaction::new(sender, receiver, rng.gen_range(amounts.clone()))
        })
        .collect())
}

/// Bundles the generator settings with an RNG.
pub struct Generator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = rng_from_seed(config.seed);
        Generator { config, rng }
    }

    pub fn accounts(&mut self) -> Result<Vec<Account>, ChainError> {
        generate_accounts(
            &mut self.rng,
            self.config.accounts,
            self.config.min_balance..=self.config.max_balance,
        )
    }

    pub fn transfers<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Vec<Transaction>, ChainError> {
        generate_transfers(
            &mut self.rng,
            keys,
            self.config.transactions,
            self.config.min_amount..=self.config.max_amount,
        )
    }
}
