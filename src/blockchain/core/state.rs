use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::chain::Block;

/// A named account holding a signed balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    name: String,
    public_key: String,
    balance: i64,
}

impl Account {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>, balance: i64) -> Self {
        Account {
            name: name.into(),
            public_key: public_key.into(),
            balance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = self.public_key.get(..8).unwrap_or(&self.public_key);
        write!(f, "Account(name={}, key={}..., balance={})", self.name, key, self.balance)
    }
}

/// Whether a block may drive a sender's balance below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolvencyPolicy {
    /// Balances may go negative.
    #[default]
    Permissive,
    /// A block is rejected if any transfer would overdraw its sender.
    Strict,
}

/// Accounts keyed by public key. Balances change only through
/// [`AccountTable::debit`] and [`AccountTable::credit`].
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    accounts: HashMap<String, Account>,
}

impl AccountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: Account) -> Result<(), ChainError> {
        if self.accounts.contains_key(account.public_key()) {
            return Err(ChainError::DuplicateAccount(account.public_key.clone()));
        }
        self.accounts.insert(account.public_key.clone(), account);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Account> {
        self.accounts.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&Account, ChainError> {
        self.get(key).ok_or_else(|| ChainError::UnknownAccount(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.accounts.contains_key(key)
    }

    pub fn balance(&self, key: &str) -> Option<i64> {
        self.get(key).map(Account::balance)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.accounts.keys().map(String::as_str)
    }

    /// Sum of all balances. Widened so a table of extreme balances cannot overflow.
    pub fn total_balance(&self) -> i128 {
        self.accounts.values().map(|a| i128::from(a.balance)).sum()
    }

    pub(crate) fn debit(&mut self, key: &str, amount: i64) -> Result<(), ChainError> {
        let account = self
            .accounts
            .get_mut(key)
            .ok_or_else(|| ChainError::UnknownAccount(key.to_string()))?;
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| ChainError::InvalidBlock(format!("Balance underflow on {}", key)))?;
        Ok(())
    }

    pub(crate) fn credit(&mut self, key: &str, amount: i64) -> Result<(), ChainError> {
        let account = self
            .accounts
            .get_mut(key)
            .ok_or_else(|| ChainError::UnknownAccount(key.to_string()))?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::InvalidBlock(format!("Balance overflow on {}", key)))?;
        Ok(())
    }
}

/// FIFO queue of transactions waiting for a block.
#[derive(Debug, Clone, Default)]
pub struct PendingPool {
    transactions: Vec<Transaction>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// The first `k` transactions in arrival order.
    pub fn select(&self, k: usize) -> Vec<Transaction> {
        self.transactions.iter().take(k).cloned().collect()
    }

    /// Drop every transaction whose id is in `ids`. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &HashSet<&str>) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|tx| !ids.contains(tx.id()));
        before - self.transactions.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id() == id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

/// Everything a block application touches: accounts and the pending pool.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub accounts: AccountTable,
    pub pending: PendingPool,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every transfer in `block`, then drop its transactions from the pool.
    ///
    /// The whole block is checked against staged balances first; if any
    /// transfer fails nothing is written. Returns the number of pool entries
    /// removed.
    pub fn apply_block(&mut self, block: &Block, policy: SolvencyPolicy) -> Result<usize, ChainError> {
        let staged = self.stage_balances(block, policy)?;

        for tx in &block.transactions {
            let amount = to_signed(tx)?;
            self.accounts.debit(tx.sender_key(), amount)?;
            self.accounts.credit(tx.receiver_key(), amount)?;
        }
        debug_assert!(staged
            .iter()
            .all(|(key, balance)| self.accounts.balance(key) == Some(*balance)));

        let ids: HashSet<&str> = block.transactions.iter().map(Transaction::id).collect();
        Ok(self.pending.remove_ids(&ids))
    }

    fn stage_balances<'b>(
        &self,
        block: &'b Block,
        policy: SolvencyPolicy,
    ) -> Result<HashMap<&'b str, i64>, ChainError> {
        let mut staged: HashMap<&str, i64> = HashMap::new();

        for tx in &block.transactions {
            tx.validate(&self.accounts)?;
            let amount = to_signed(tx)?;

            let sender = tx.sender_key();
            let current = self.staged_balance(&staged, sender)?;
            let debited = current.checked_sub(amount).ok_or_else(|| {
                ChainError::InvalidBlock(format!("Balance underflow on {}", sender))
            })?;
            if policy == SolvencyPolicy::Strict && debited < 0 {
                return Err(ChainError::InsufficientBalance {
                    key: sender.to_string(),
                    balance: current,
                    amount: tx.amount(),
                });
            }
            staged.insert(sender, debited);

            let receiver = tx.receiver_key();
            let current = self.staged_balance(&staged, receiver)?;
            let credited = current.checked_add(amount).ok_or_else(|| {
                ChainError::InvalidBlock(format!("Balance overflow on {}", receiver))
            })?;
            staged.insert(receiver, credited);
        }
        Ok(staged)
    }

    fn staged_balance(&self, staged: &HashMap<&str, i64>, key: &str) -> Result<i64, ChainError> {
        match staged.get(key) {
            Some(balance) => Ok(*balance),
            None => Ok(self.accounts.require(key)?.balance()),
        }
    }
}

fn to_signed(tx: &Transaction) -> Result<i64, ChainError> {
    i64::try_from(tx.amount()).map_err(|_| {
        ChainError::InvalidBlock(format!("Transaction {} amount {} out of range", tx.id(), tx.amount()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::zero_hash;

    fn state_with(balances: &[(&str, i64)]) -> LedgerState {
        let mut state = LedgerState::new();
        for (key, balance) in balances {
            state
                .accounts
                .insert(Account::new(format!("user-{}", key), *key, *balance))
                .unwrap();
        }
        state
    }

    fn block_of(txs: Vec<Transaction>) -> Block {
        Block::build_at(1, zero_hash(), 1, txs, "", 1_700_000_000)
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let mut table = AccountTable::new();
        table.insert(Account::new("a", "k1", 1)).unwrap();
        assert_eq!(
            table.insert(Account::new("b", "k1", 2)),
            Err(ChainError::DuplicateAccount("k1".to_string()))
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.balance("k1"), Some(1));
    }

    #[test]
    fn test_apply_conserves_total_balance() {
        let mut state = state_with(&[("a", 100), ("b", 50), ("c", 0)]);
        let txs = vec![
            Transaction::with_timestamp("a", "b", 30, 1.0),
            Transaction::with_timestamp("b", "c", 70, 2.0),
            Transaction::with_timestamp("c", "a", 5, 3.0),
        ];
        let before = state.accounts.total_balance();
        state.apply_block(&block_of(txs), SolvencyPolicy::Permissive).unwrap();
        assert_eq!(state.accounts.total_balance(), before);
        assert_eq!(state.accounts.balance("a"), Some(75));
        assert_eq!(state.accounts.balance("b"), Some(10));
        assert_eq!(state.accounts.balance("c"), Some(65));
    }

    #[test]
    fn test_permissive_policy_allows_negative_balance() {
        let mut state = state_with(&[("a", 10), ("b", 0)]);
        let tx = Transaction::with_timestamp("a", "b", 25, 1.0);
        state.apply_block(&block_of(vec![tx]), SolvencyPolicy::Permissive).unwrap();
        assert_eq!(state.accounts.balance("a"), Some(-15));
        assert_eq!(state.accounts.balance("b"), Some(25));
    }

    #[test]
    fn test_strict_policy_rejects_overdraft_without_partial_writes() {
        let mut state = state_with(&[("a", 10), ("b", 0)]);
        let txs = vec![
            Transaction::with_timestamp("b", "a", 0, 1.0),
            Transaction::with_timestamp("a", "b", 5, 2.0),
            Transaction::with_timestamp("a", "b", 6, 3.0),
        ];
        let err = state.apply_block(&block_of(txs), SolvencyPolicy::Strict).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientBalance { balance: 5, amount: 6, .. }));
        assert_eq!(state.accounts.balance("a"), Some(10));
        assert_eq!(state.accounts.balance("b"), Some(0));
    }

    #[test]
    fn test_unknown_account_aborts_whole_block() {
        let mut state = state_with(&[("a", 100), ("b", 100)]);
        let good = Transaction::with_timestamp("a", "b", 10, 1.0);
        let bad = Transaction::with_timestamp("a", "ghost", 10, 2.0);
        state.pending.push(good.clone());
        state.pending.push(bad.clone());

        let err = state
            .apply_block(&block_of(vec![good, bad]), SolvencyPolicy::Permissive)
            .unwrap_err();
        assert_eq!(err, ChainError::UnknownAccount("ghost".to_string()));
        assert_eq!(state.accounts.balance("a"), Some(100));
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn test_pool_removal_is_exact() {
        let mut state = state_with(&[("a", 100), ("b", 100)]);
        let txs: Vec<Transaction> = (0..5)
            .map(|i| Transaction::with_timestamp("a", "b", i, i as f64 + 0.5))
            .collect();
        for tx in &txs {
            state.pending.push(tx.clone());
        }

        let included = vec![txs[1].clone(), txs[3].clone()];
        let removed = state
            .apply_block(&block_of(included), SolvencyPolicy::Permissive)
            .unwrap();

        assert_eq!(removed, 2);
        assert!(!state.pending.contains(txs[1].id()));
        assert!(!state.pending.contains(txs[3].id()));
        let remaining: Vec<&str> = state.pending.iter().map(Transaction::id).collect();
        assert_eq!(remaining, vec![txs[0].id(), txs[2].id(), txs[4].id()]);
    }

    #[test]
    fn test_self_transfer_is_neutral() {
        let mut state = state_with(&[("a", 40)]);
        let tx = Transaction::with_timestamp("a", "a", 15, 1.0);
        state.apply_block(&block_of(vec![tx]), SolvencyPolicy::Strict).unwrap();
        assert_eq!(state.accounts.balance("a"), Some(40));
    }

    #[test]
    fn test_select_does_not_mutate_pool() {
        let mut pool = PendingPool::new();
        for i in 0..3 {
            pool.push(Transaction::with_timestamp("a", "b", i, 1.0));
        }
        assert_eq!(pool.select(2).len(), 2);
        assert_eq!(pool.select(10).len(), 3);
        assert_eq!(pool.len(), 3);
    }
}
