//! Symmetric hashing: `H1`, the expandable PRG `H2`, and the seeded bucket-location hashing
//! shared by the two-layer hash layout and the PIR cuckoo table.

use sha2::{Digest, Sha256};

/// `H1 : {0,1}* -> {0,1}^256`, plain SHA-256.
pub(crate) fn h1(input: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(input);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// `H2(key, data)` expanded to `len` bytes.
///
/// Chained SHA-256: `s_0 = SHA256(key ‖ data)`, `s_{i+1} = SHA256(s_i)`; the blocks are
/// concatenated and truncated to the requested length. Deterministic for fixed inputs.
pub(crate) fn h2(key: &[u8], data: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len.div_ceil(32) * 32);
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(data);
    let mut block = hasher.finalize();
    while out.len() < len {
        out.extend_from_slice(&block);
        block = Sha256::digest(block);
    }
    out.truncate(len);
    out
}

/// A 128-bit table item, the unit all bucket-location functions operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Item128(pub(crate) [u8; 16]);

/// Builds an item from two 64-bit words.
pub(crate) fn make_item(hi: u64, lo: u64) -> Item128 {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&hi.to_be_bytes());
    bytes[8..].copy_from_slice(&lo.to_be_bytes());
    Item128(bytes)
}

/// Compresses an arbitrary byte string into an [`Item128`] via SHA-256: the first 8 digest
/// bytes become the high word, the next 8 the low word.
pub(crate) fn make_item_from_bytes(bytes: &[u8]) -> Item128 {
    let digest = Sha256::digest(bytes);
    let mut item = [0u8; 16];
    item.copy_from_slice(&digest[..16]);
    Item128(item)
}

/// A seeded location function mapping items into `[0, modulus)`.
///
/// Both parties construct location functions from public seeds, so any keyed hash works as
/// long as it is deterministic; a blake3 keyed hash stands in for tabulation hashing here.
#[derive(Debug, Clone)]
pub(crate) struct LocFunc {
    modulus: usize,
    key: [u8; 32],
}

impl LocFunc {
    pub(crate) fn new(modulus: usize, seed: Item128) -> Self {
        debug_assert!(modulus > 0);
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(&seed.0);
        key[16..].copy_from_slice(&seed.0);
        Self { modulus, key }
    }

    pub(crate) fn locate(&self, item: Item128) -> usize {
        let digest = blake3::keyed_hash(&self.key, &item.0);
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_be_bytes(word) % self.modulus as u64) as usize
    }
}

/// Multi-instance bucket hashing: `SHA256(bytes)` compressed to an item, located under a seed
/// derived from `hash_idx`. The outer layer draws `hash_idx` from `0..3`, the inner layer from
/// `10..10 + nh`, keeping the instance families disjoint.
pub(crate) fn instance_hash(bytes: &[u8], hash_idx: usize, modulus: usize) -> usize {
    let item = make_item_from_bytes(bytes);
    let seed_lo = 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(hash_idx as u64 + 1);
    let seed_hi = seed_lo ^ 0xD1B5_4A32_D192_ED03;
    LocFunc::new(modulus, make_item(seed_hi, seed_lo)).locate(item)
}

#[test]
fn h2_expands_deterministically() {
    let a = h2(b"key", b"data", 100);
    let b = h2(b"key", b"data", 100);
    assert_eq!(a, b);
    assert_eq!(a.len(), 100);
    // A prefix of a longer expansion matches a shorter one.
    let c = h2(b"key", b"data", 40);
    assert_eq!(&a[..40], &c[..]);
    // First block is SHA256(key ‖ data).
    assert_eq!(&a[..32], Sha256::digest(b"keydata").as_slice());
    assert_ne!(h2(b"other", b"data", 32), c[..32].to_vec());
}

#[test]
fn instance_hash_is_stable_and_in_range() {
    for idx in 0..6 {
        let pos = instance_hash(b"element", idx, 97);
        assert!(pos < 97);
        assert_eq!(pos, instance_hash(b"element", idx, 97));
    }
    // Different instances disagree somewhere over a handful of inputs.
    let collisions = (0..16u8)
        .filter(|i| instance_hash(&[*i], 0, 1 << 20) == instance_hash(&[*i], 1, 1 << 20))
        .count();
    assert!(collisions < 16);
}
