//! Hashing primitives for powledger
//!
//! Every identifier in the ledger (transaction ids, merkle roots, block
//! hashes, generated public keys) comes from [`mix_hash`]. It is a fast
//! non-cryptographic mixer over four 64-bit lanes. Its output must stay
//! bit-for-bit stable: proof-of-work checks compare the leading hex
//! characters of the rendered digest.

/// Raw 256-bit digest, four big-endian 64-bit lanes.
pub type Digest = [u8; 32];

/// Length of a rendered digest in hex characters.
pub const HASH_HEX_LEN: usize = 64;

const LANE_A: u64 = 0x1A2B_3C4D_5E6F_7788;
const LANE_B: u64 = 0x8899_AABB_CCDD_EEFF;
const LANE_C: u64 = 0x0123_4567_89AB_CDEF;
const LANE_D: u64 = 0xF0E1_D2C3_B4A5_9687;

/// Hash a byte sequence into a raw digest.
pub fn mix_hash(data: &[u8]) -> Digest {
    let (mut a, mut b, mut c, mut d) = (LANE_A, LANE_B, LANE_C, LANE_D);

    for &byte in data {
        let ch = u64::from(byte);

        a ^= ch;
        a = a.rotate_left(7);
        a = a.wrapping_mul(33).wrapping_add(ch ^ (ch >> 2));

        b ^= ch.rotate_left(11);
        b = b.wrapping_mul(29).wrapping_add(ch ^ (ch >> 4));

        c ^= ch.rotate_left(19);
        c = c.wrapping_mul(35).wrapping_add(ch ^ (ch >> 6));

        d ^= ch.rotate_left(23);
        d = d.wrapping_mul(39).wrapping_add(ch ^ (ch >> 8));
    }

    // Fold each lane into the next so every output word depends on all four.
    a ^= b.rotate_left(13);
    a = a.wrapping_add(c);
    b ^= c.rotate_left(17);
    b = b.wrapping_add(d);
    c ^= d.rotate_left(29);
    c = c.wrapping_add(a);
    d ^= a.rotate_left(31);
    d = d.wrapping_add(b);

    let mut digest = [0u8; 32];
    for (chunk, lane) in digest.chunks_exact_mut(8).zip([a, b, c, d]) {
        chunk.copy_from_slice(&lane.to_be_bytes());
    }
    digest
}

/// Hash and render as 64 lowercase hex characters.
pub fn hash_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(mix_hash(data.as_ref()))
}

/// The all-zero predecessor hash carried by the genesis block.
pub fn zero_hash() -> String {
    "0".repeat(HASH_HEX_LEN)
}

/// Check that a string looks like a rendered digest.
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Derive a stable public key for a generated account name.
pub fn public_key_for(name: &str) -> String {
    hash_hex(format!("pk::{}", name))
}
