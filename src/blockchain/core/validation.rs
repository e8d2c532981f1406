use crate::error::ChainError;

use super::chain::Block;

/// Longest difficulty prefix accepted. Each character multiplies the
/// expected mining cost by 16.
pub const MAX_DIFFICULTY_PREFIX_LEN: usize = 16;

/// Reject prefixes that could never match a rendered hash, or that are too
/// long to ever be mined.
pub fn validate_difficulty_prefix(prefix: &str) -> Result<(), ChainError> {
    if let Some(bad) = prefix.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(ChainError::InvalidDifficultyPrefix {
            prefix: prefix.to_string(),
            reason: format!("character {:?} is not lowercase hex", bad),
        });
    }
    if prefix.len() > MAX_DIFFICULTY_PREFIX_LEN {
        return Err(ChainError::InvalidDifficultyPrefix {
            prefix: prefix.to_string(),
            reason: format!(
                "length {} exceeds maximum {}",
                prefix.len(),
                MAX_DIFFICULTY_PREFIX_LEN
            ),
        });
    }
    Ok(())
}

/// `block` must sit directly on top of `tip`.
pub fn validate_block_linkage(block: &Block, tip: &Block) -> Result<(), ChainError> {
    if block.index != tip.index + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block index. Expected {}, but got {}.",
            tip.index + 1,
            block.index
        )));
    }

    let tip_hash = tip.hash();
    if block.header.prev_block_hash != tip_hash {
        return Err(ChainError::InvalidBlockLinkage {
            expected: tip_hash,
            found: block.header.prev_block_hash.clone(),
        });
    }
    Ok(())
}

pub fn validate_proof_of_work(block: &Block) -> Result<(), ChainError> {
    let hash = block.hash();
    if !block.header.meets_difficulty(&hash) {
        return Err(ChainError::InvalidProofOfWork {
            hash,
            prefix: block.header.difficulty_prefix.clone(),
        });
    }
    Ok(())
}

pub fn validate_merkle_root(block: &Block) -> Result<(), ChainError> {
    let expected = Block::calculate_merkle_root(&block.transactions);
    if expected != block.header.merkle_root {
        return Err(ChainError::InvalidMerkleRoot {
            expected,
            found: block.header.merkle_root.clone(),
        });
    }
    Ok(())
}

/// Every check a block must pass before it may touch ledger state.
pub fn validate_block(
    block: &Block,
    tip: &Block,
    difficulty_prefix: &str,
    version: u32,
) -> Result<(), ChainError> {
    validate_block_linkage(block, tip)?;

    if block.header.difficulty_prefix != difficulty_prefix {
        return Err(ChainError::InvalidBlock(format!(
            "Difficulty prefix '{}' does not match chain prefix '{}'.",
            block.header.difficulty_prefix, difficulty_prefix
        )));
    }
    if block.header.version != version {
        return Err(ChainError::InvalidBlock(format!(
            "Block version {} does not match chain version {}.",
            block.header.version, version
        )));
    }

    validate_proof_of_work(block)?;
    validate_merkle_root(block)?;
    for tx in &block.transactions {
        tx.validate_id()?;
    }
    Ok(())
}
