//! Keyed hash (C1): a 128-bit keyed PRF used to fingerprint map keys.
//!
//! Out of scope as an algorithm per the design docs ("a black-box keyed PRF
//! producing 128-bit output") but the map needs *some* concrete, correct
//! implementation to depend on. `original_source/src/siphash.h` documents
//! SipHash with 2 compression rounds and 4 finalization rounds producing a
//! 128-bit digest — exactly `siphasher::sip128::SipHasher24`'s shape — so
//! this wraps that published crate rather than hand-rolling the PRF.

use std::hash::Hasher;
use std::sync::OnceLock;

use parking_lot::RwLock;
use siphasher::sip128::{Hash128, Hasher128, SipHasher24};

/// Process-wide hash key (§4.7 "Global keying"). All maps in a process share
/// this key; applications wanting per-process isolation must set it before
/// creating any maps and must treat it as immutable thereafter — the spec
/// makes no provision for re-keying an already-populated trie.
static KEY: OnceLock<RwLock<[u8; 16]>> = OnceLock::new();

fn key_cell() -> &'static RwLock<[u8; 16]> {
    KEY.get_or_init(|| RwLock::new([0u8; 16]))
}

/// Sets the process-wide hash key, zero-padding or truncating `bytes` to 16
/// bytes as §4.7 specifies.
pub fn siphash_set_key(bytes: &[u8]) {
    let mut key = [0u8; 16];
    let n = bytes.len().min(16);
    key[..n].copy_from_slice(&bytes[..n]);
    *key_cell().write() = key;
}

/// Computes the 16-byte keyed digest of `data` under the current global key.
pub fn digest(data: &[u8]) -> [u8; 16] {
    let key = *key_cell().read();
    let k0 = u64::from_le_bytes(key[0..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(key[8..16].try_into().unwrap());
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(data);
    let Hash128 { h1, h2 } = hasher.finish128();
    let mut out = [0u8; 16];
    out[0..8].copy_from_slice(&h1.to_le_bytes());
    out[8..16].copy_from_slice(&h2.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_for_a_fixed_key() {
        siphash_set_key(b"0123456789abcdef");
        let a = digest(b"hello");
        let b = digest(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_the_key() {
        siphash_set_key(b"key-one-padded..");
        let a = digest(b"same input");
        siphash_set_key(b"key-two-padded..");
        let b = digest(b"same input");
        assert_ne!(a, b);
        // restore a neutral key for any later test in this binary
        siphash_set_key(b"");
    }

    #[test]
    fn short_keys_are_zero_padded() {
        siphash_set_key(b"short");
        let padded = digest(b"x");
        siphash_set_key(b"short\0\0\0\0\0\0\0\0\0\0\0");
        let explicit = digest(b"x");
        assert_eq!(padded, explicit);
        siphash_set_key(b"");
    }
}
