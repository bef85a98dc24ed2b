//! Sender-side protocol state: OPRF evaluation key, bucket keys and the PIR database build.

use log::{debug, info, warn};
use p256::Scalar;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use zeroize::Zeroize;

use crate::buckets::{candidate_buckets, cuckoo_place_inner, seal_record, BucketSlot};
use crate::config::{
    ProtocolConfig, BUCKET_KEY_SIZE, MASK_HEADER_SIZE, MAX_RETRY, MIN_SUB_BUCKET_CAPACITY,
    OUTER_NUM_HASH_FUNCS, SUB_BUCKET_FACTOR, XPRIME_SIZE,
};
use crate::curve;
use crate::hash::{h1, h2};
use crate::Error;

/// The party holding the labeled database `{(x, v)}`.
///
/// Owns the OPRF key `r_s` and one 32-byte key `r_k` per outer main bucket; learns nothing
/// about the Receiver's queries beyond the final intersection size.
pub struct LpsiSender {
    r_s: Scalar,
    input: Vec<(Vec<u8>, Vec<u8>)>,
    x_prime: Vec<[u8; XPRIME_SIZE]>,
    h_x_rs: Vec<Vec<u8>>,
    bucket_keys: Vec<[u8; BUCKET_KEY_SIZE]>,
    main_buckets: Vec<Vec<BucketSlot>>,
    sub_buckets: Vec<Vec<Vec<BucketSlot>>>,
    flattened: Vec<BucketSlot>,
    num_main_buckets: usize,
    nh: usize,
    sub_capacity: usize,
    intersection_size: usize,
    item_size: usize,
    shuffle_map: Vec<usize>,
    rng: ChaCha20Rng,
}

impl LpsiSender {
    /// Creates a session over the given key-value pairs.
    pub fn new(input: Vec<(Vec<u8>, Vec<u8>)>, config: &ProtocolConfig, seed: [u8; 32]) -> Self {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let r_s = curve::random_scalar(&mut rng);
        Self {
            r_s,
            input,
            x_prime: Vec::new(),
            h_x_rs: Vec::new(),
            bucket_keys: Vec::new(),
            main_buckets: Vec::new(),
            sub_buckets: Vec::new(),
            flattened: Vec::new(),
            num_main_buckets: 0,
            nh: config.nh,
            sub_capacity: 0,
            intersection_size: 0,
            item_size: config.item_size,
            shuffle_map: Vec::new(),
            rng,
        }
    }

    /// Phase 1 step 2: evaluates the Receiver's blinded points under `r_s` in an order
    /// shuffled by a session-private PRP. The shuffle map never leaves this struct.
    pub fn process_oprf_step2(&mut self, blinded: &[Vec<u8>]) -> Vec<Vec<u8>> {
        // Fisher-Yates over both the data and the index map.
        let mut shuffled: Vec<&Vec<u8>> = blinded.iter().collect();
        let mut indices: Vec<usize> = (0..blinded.len()).collect();
        for i in (1..shuffled.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            shuffled.swap(i, j);
            indices.swap(i, j);
        }
        self.shuffle_map = indices;

        let r_s = self.r_s;
        shuffled
            .par_iter()
            .map(|bytes| match curve::bytes_to_point(bytes.as_slice()) {
                Ok(point) => curve::point_to_bytes(&curve::scalar_mul(&point, &r_s)),
                Err(_) => {
                    warn!("oprf step 2: skipping malformed point");
                    vec![0u8; curve::POINT_LEN]
                }
            })
            .collect()
    }

    /// Populates `X' = H1(H(x)^{r_s})` and the raw `H(x)^{r_s}` encodings.
    pub fn compute_x_prime(&mut self) {
        let r_s = self.r_s;
        let pairs: Vec<(Vec<u8>, [u8; XPRIME_SIZE])> = self
            .input
            .par_iter()
            .map(|(x, _)| {
                let point = curve::scalar_mul(&curve::map_to_point(x), &r_s);
                let encoded = curve::point_to_bytes(&point);
                let digest = h1(&encoded);
                (encoded, digest)
            })
            .collect();
        self.h_x_rs = pairs.iter().map(|(encoded, _)| encoded.clone()).collect();
        self.x_prime = pairs.into_iter().map(|(_, digest)| digest).collect();
    }

    /// Phase 2: allocates one `r_k` per main bucket and inserts every record into all of its
    /// candidate buckets, each replica masked under that bucket's own key.
    pub fn build_hash_buckets(&mut self, num_main_buckets: usize) -> Result<(), Error> {
        self.num_main_buckets = num_main_buckets;
        self.main_buckets = vec![Vec::new(); num_main_buckets];
        self.bucket_keys = (0..num_main_buckets)
            .map(|_| {
                let mut key = [0u8; BUCKET_KEY_SIZE];
                self.rng.fill_bytes(&mut key);
                key
            })
            .collect();

        let max_record = self.item_size - XPRIME_SIZE - MASK_HEADER_SIZE;
        for i in 0..self.input.len() {
            let (x, v) = &self.input[i];
            if x.len() + v.len() > max_record {
                return Err(Error::InputShape(format!(
                    "record {i}: {} key+label bytes exceed the {} available per PIR row",
                    x.len() + v.len(),
                    max_record
                )));
            }
            for bucket_idx in candidate_buckets(
                &self.x_prime[i],
                OUTER_NUM_HASH_FUNCS,
                num_main_buckets,
            ) {
                let pad = h2(
                    &self.bucket_keys[bucket_idx],
                    &self.h_x_rs[i],
                    x.len() + v.len(),
                );
                self.main_buckets[bucket_idx].push(BucketSlot {
                    x_prime: self.x_prime[i],
                    masked: seal_record(x, v, &pad),
                });
            }
        }
        Ok(())
    }

    /// Phase 2: derives the sub-bucket capacity `C` from the largest main-bucket fill and
    /// cuckoo-places each main bucket's (deduplicated) slots across `nh` rows.
    pub fn build_sub_buckets(&mut self) -> Result<(), Error> {
        let max_fill = self.main_buckets.iter().map(Vec::len).max().unwrap_or(0);
        self.sub_capacity = ((max_fill as f64 * SUB_BUCKET_FACTOR).ceil() as usize)
            .max(MIN_SUB_BUCKET_CAPACITY);
        debug!(
            "sender sub-buckets: max fill {max_fill}, nh {}, capacity {}",
            self.nh, self.sub_capacity
        );

        self.sub_buckets = Vec::with_capacity(self.main_buckets.len());
        for main_bucket in &self.main_buckets {
            // The outer simple hash can land an element in the same bucket more than once;
            // keep one replica per x'.
            let mut seen = std::collections::HashSet::new();
            let unique: Vec<BucketSlot> = main_bucket
                .iter()
                .filter(|slot| seen.insert(slot.x_prime))
                .cloned()
                .collect();
            self.sub_buckets.push(cuckoo_place_inner(
                unique,
                self.nh,
                self.sub_capacity,
                MAX_RETRY,
                &mut self.rng,
            )?);
        }
        Ok(())
    }

    /// Phase 3: flattens the sub-bucket grid in `(main, sub_row, slot)` order.
    pub fn prepare_pir_database(&mut self) {
        self.flattened.clear();
        let mut non_empty = 0usize;
        for main_bucket in &self.sub_buckets {
            for row in main_bucket {
                for slot in row {
                    if !slot.is_empty() {
                        non_empty += 1;
                    }
                    self.flattened.push(slot.clone());
                }
            }
        }
        info!(
            "sender pir database: {} slots ({} occupied), inflation x{:.1}",
            self.flattened.len(),
            non_empty,
            self.flattened.len() as f64 / self.input.len().max(1) as f64
        );
    }

    /// Exports the flattened database as fixed-size rows: bytes `[0..32)` hold `x'`, the rest
    /// the masked record. Empty cells get an all-zero `x'` and the fixed non-zero byte
    /// pattern `(i + 1) mod 256` in the payload region.
    pub fn pir_database_as_bytes(&self) -> Vec<Vec<u8>> {
        self.flattened
            .iter()
            .map(|slot| {
                let mut row = vec![0u8; self.item_size];
                if slot.is_empty() {
                    for (i, byte) in row[XPRIME_SIZE..].iter_mut().enumerate() {
                        *byte = ((i + 1) % 256) as u8;
                    }
                } else {
                    row[..XPRIME_SIZE].copy_from_slice(&slot.x_prime);
                    row[XPRIME_SIZE..XPRIME_SIZE + slot.masked.len()]
                        .copy_from_slice(&slot.masked);
                }
                row
            })
            .collect()
    }

    /// The hash-layout metadata published to the Receiver: `(B, nh, C)`.
    pub fn layout(&self) -> (usize, usize, usize) {
        (self.num_main_buckets, self.nh, self.sub_capacity)
    }

    /// Phase 5: records the Receiver's choice count — the only signal the Sender receives
    /// about the intersection.
    pub fn prepare_ot_inputs(&mut self, receiver_choice_count: usize) -> Result<(), Error> {
        if self.bucket_keys.is_empty() && receiver_choice_count > 0 {
            return Err(Error::InputShape("bucket keys are not generated yet".into()));
        }
        self.intersection_size = receiver_choice_count;
        Ok(())
    }

    /// The single-vector OT input basis `[r_k[0], r_k[1], …]`; the protocol layer pads it to
    /// `2^b` entries and broadcasts it across instances.
    pub fn ot_input_basis(&self) -> Vec<[u8; BUCKET_KEY_SIZE]> {
        self.bucket_keys.clone()
    }

    /// The Sender's view of the intersection size.
    pub fn intersection_size(&self) -> usize {
        self.intersection_size
    }

    #[cfg(test)]
    pub(crate) fn shuffle_map(&self) -> &[usize] {
        &self.shuffle_map
    }

    #[cfg(test)]
    pub(crate) fn r_s(&self) -> &Scalar {
        &self.r_s
    }

    #[cfg(test)]
    pub(crate) fn flattened(&self) -> &[BucketSlot] {
        &self.flattened
    }

    /// Test-only plaintext stand-in for the OT phase: serves the requested bucket keys
    /// directly.
    #[cfg(test)]
    pub(crate) fn send_bucket_keys_plaintext(
        &self,
        requested: &[usize],
    ) -> Vec<[u8; BUCKET_KEY_SIZE]> {
        requested
            .iter()
            .map(|idx| {
                self.bucket_keys
                    .get(*idx)
                    .copied()
                    .unwrap_or([0u8; BUCKET_KEY_SIZE])
            })
            .collect()
    }
}

impl Drop for LpsiSender {
    fn drop(&mut self) {
        for key in self.bucket_keys.iter_mut() {
            key.zeroize();
        }
    }
}
