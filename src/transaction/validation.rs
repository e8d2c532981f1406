/// Validation logic for transactions separated from type definitions
use crate::blockchain::AccountTable;
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Stateless checks: the stored id matches the fields.
    pub fn validate_id(&self) -> Result<(), ChainError> {
        let expected = self.compute_id();
        if expected != self.id() {
            return Err(ChainError::InvalidBlock(format!(
                "Transaction id {} does not match its contents (expected {})",
                self.id(),
                expected
            )));
        }
        Ok(())
    }

    /// Full validation against the account table: both endpoints must exist.
    pub fn validate(&self, accounts: &AccountTable) -> Result<(), ChainError> {
        self.validate_id()?;

        for key in [self.sender_key(), self.receiver_key()] {
            if !accounts.contains(key) {
                return Err(ChainError::UnknownAccount(key.to_string()));
            }
        }
        Ok(())
    }
}
