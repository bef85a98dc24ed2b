//! Protocol-wide constants and per-session configuration.

/// Outer main-bucket inflation over the Receiver's query count.
pub(crate) const MAIN_BUCKET_FACTOR: f64 = 1.5;

/// Number of outer-layer hash functions (candidate main buckets per element).
pub(crate) const OUTER_NUM_HASH_FUNCS: usize = 3;

/// Inner sub-bucket capacity inflation over the largest main-bucket fill.
pub(crate) const SUB_BUCKET_FACTOR: f64 = 1.5;

/// Lower bound on the inner sub-bucket capacity `C`.
pub(crate) const MIN_SUB_BUCKET_CAPACITY: usize = 20;

/// Retry bound shared by the outer and inner cuckoo placements.
pub(crate) const MAX_RETRY: usize = 750;

/// Hash-function index offset for the inner layer (`10..10 + nh`); the outer layer uses
/// `0..OUTER_NUM_HASH_FUNCS`, so the two seed ranges stay disjoint.
pub(crate) const INNER_HASH_IDX_BASE: usize = 10;

/// Byte length of a per-main-bucket key `r_k`.
pub(crate) const BUCKET_KEY_SIZE: usize = 32;

/// Byte length of one OT-delivered string (equals [`BUCKET_KEY_SIZE`]).
pub(crate) const OT_DATA_SIZE: usize = 32;

/// Statistical security of the malicious OT consistency check.
pub(crate) const OT_STAT_SEC: usize = 40;

/// Byte length of `x'` (a SHA-256 digest) at the head of every PIR row record.
pub(crate) const XPRIME_SIZE: usize = 32;

/// Bytes of the `len ‖ x_len` header preceding every masked record.
pub(crate) const MASK_HEADER_SIZE: usize = 4;

/// Batch PIR mode selector.
///
/// Both modes share the server multiply-and-sum and the client answer extraction; they differ
/// only in how logical rows are mapped onto the ciphertext grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PirMode {
    /// Cuckoo-hashed rows: payload indices are spread over a 3-hash cuckoo table.
    Default,
    /// Deterministic rows: logical row `i` is ciphertext row `i`, columns are sub-bucket slots.
    Direct,
}

/// Per-session protocol configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Byte size of one PIR row record (32-byte `x'` prefix plus the masked payload region).
    pub item_size: usize,
    /// Number of inner sub-buckets per main bucket (`nh`).
    pub nh: usize,
    /// Batch PIR row-layout mode.
    pub pir_mode: PirMode,
    /// Whether the OT extension runs its malicious consistency check.
    pub malicious_ot: bool,
    /// Optional seed for all session randomness; `None` draws from system entropy.
    pub rng_seed: Option<[u8; 32]>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            item_size: 128,
            nh: 3,
            pir_mode: PirMode::Default,
            malicious_ot: true,
            rng_seed: None,
        }
    }
}

