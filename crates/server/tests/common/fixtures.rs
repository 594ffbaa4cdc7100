//! Deterministic payloads and their content hashes.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// `len` pseudo-random bytes; the same seed always yields the same payload,
/// and different seeds yield different content hashes.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    // xorshift64*, with the seed folded so zero still produces output
    let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        out.extend_from_slice(&state.wrapping_mul(0x2545_f491_4f6c_dd1d).to_le_bytes());
    }
    out.truncate(len);
    Bytes::from(out)
}

/// Lowercase hex SHA-256, computed independently of `ContentHash`.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Split `data` into `chunk_size` pieces, the last one possibly shorter.
#[allow(dead_code)]
pub fn split_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}
