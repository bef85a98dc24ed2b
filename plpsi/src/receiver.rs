//! Receiver-side protocol state: OPRF blinding, cuckoo placement, PIR query generation,
//! hit filtering and the final decryption.

use log::{debug, info, warn};
use p256::Scalar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use crate::buckets::{cuckoo_place_outer, open_record, parse_record_header};
use crate::config::{
    ProtocolConfig, BUCKET_KEY_SIZE, MAX_RETRY, OUTER_NUM_HASH_FUNCS, XPRIME_SIZE,
};
use crate::config::INNER_HASH_IDX_BASE;
use crate::curve;
use crate::hash::{h1, h2, instance_hash};
use crate::Error;

/// The party holding the query set `{y}`.
///
/// Owns the blinding scalar `r_c` and its inverse; after a session it holds exactly the
/// matched `(x, v)` pairs and nothing else.
pub struct LpsiReceiver {
    r_c: Scalar,
    r_c_inv: Scalar,
    input: Vec<Vec<u8>>,
    y_prime: Vec<[u8; XPRIME_SIZE]>,
    h_y_rs: Vec<Vec<u8>>,
    element_to_main_bucket: Vec<usize>,
    bucket_to_element: Vec<Option<usize>>,
    query_indices: Vec<Vec<usize>>,
    sender_num_main_buckets: usize,
    sender_nh: usize,
    sender_sub_capacity: usize,
    pir_results: Vec<Vec<u8>>,
    hit_element_indices: Vec<usize>,
    hit_sub_bucket_indices: Vec<usize>,
    intersection: Vec<(Vec<u8>, Vec<u8>)>,
    rng: ChaCha20Rng,
}

impl LpsiReceiver {
    /// Creates a session over the given query set.
    pub fn new(input: Vec<Vec<u8>>, _config: &ProtocolConfig, seed: [u8; 32]) -> Result<Self, Error> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let r_c = curve::random_scalar(&mut rng);
        let r_c_inv = curve::invert_scalar(&r_c)?;
        Ok(Self {
            r_c,
            r_c_inv,
            input,
            y_prime: Vec::new(),
            h_y_rs: Vec::new(),
            element_to_main_bucket: Vec::new(),
            bucket_to_element: Vec::new(),
            query_indices: Vec::new(),
            sender_num_main_buckets: 0,
            sender_nh: 0,
            sender_sub_capacity: 0,
            pir_results: Vec::new(),
            hit_element_indices: Vec::new(),
            hit_sub_bucket_indices: Vec::new(),
            intersection: Vec::new(),
            rng,
        })
    }

    /// Phase 1 step 1: `B_j = MapToPoint(y_j)^{r_c}`.
    pub fn compute_oprf_step1(&self) -> Vec<Vec<u8>> {
        let r_c = self.r_c;
        self.input
            .par_iter()
            .map(|y| curve::point_to_bytes(&curve::scalar_mul(&curve::map_to_point(y), &r_c)))
            .collect()
    }

    /// Phase 1 step 3: unblinds `C_i^{r_c^{-1}} = H(y)^{r_s}` and derives `Y' = H1(·)`.
    ///
    /// The order is the Sender's PRP-shuffled order; all later state is indexed by shuffled
    /// position. Malformed points are logged and zeroed out, never matching anything.
    pub fn process_oprf_step3(&mut self, evaluated: &[Vec<u8>]) {
        let r_c_inv = self.r_c_inv;
        let pairs: Vec<(Vec<u8>, [u8; XPRIME_SIZE])> = evaluated
            .par_iter()
            .map(|bytes| match curve::bytes_to_point(bytes) {
                Ok(point) => {
                    let unblinded = curve::point_to_bytes(&curve::scalar_mul(&point, &r_c_inv));
                    let digest = h1(&unblinded);
                    (unblinded, digest)
                }
                Err(_) => {
                    warn!("oprf step 3: skipping malformed point");
                    (Vec::new(), [0u8; XPRIME_SIZE])
                }
            })
            .collect();
        self.h_y_rs = pairs.iter().map(|(encoded, _)| encoded.clone()).collect();
        self.y_prime = pairs.into_iter().map(|(_, digest)| digest).collect();
    }

    /// Phase 2: cuckoo-places every `Y'` into one of `bucket_count` main buckets; aborts on
    /// an unresolvable eviction chain.
    pub fn build_hash_buckets(&mut self, bucket_count: usize) -> Result<(), Error> {
        let (element_to_bucket, bucket_to_element) = cuckoo_place_outer(
            &self.y_prime,
            bucket_count,
            OUTER_NUM_HASH_FUNCS,
            MAX_RETRY,
            &mut self.rng,
        )?;
        self.element_to_main_bucket = element_to_bucket;
        self.bucket_to_element = bucket_to_element;
        debug!(
            "receiver cuckoo: {} elements over {} main buckets",
            self.y_prime.len(),
            bucket_count
        );
        Ok(())
    }

    /// Phase 3: emits `nh` candidate slots per main bucket — real probes for buckets holding
    /// one of its elements, uniform random decoys for the empty ones.
    pub fn generate_pir_query_indices(&mut self, num_main_buckets: usize, nh: usize, capacity: usize) {
        self.sender_num_main_buckets = num_main_buckets;
        self.sender_nh = nh;
        self.sender_sub_capacity = capacity;
        self.query_indices = (0..num_main_buckets)
            .map(|main_idx| match self.bucket_to_element.get(main_idx) {
                Some(Some(elem_idx)) => {
                    let y_prime = &self.y_prime[*elem_idx];
                    (0..nh)
                        .map(|h| instance_hash(y_prime, INNER_HASH_IDX_BASE + h, capacity))
                        .collect()
                }
                _ => (0..nh).map(|_| self.rng.gen_range(0..capacity)).collect(),
            })
            .collect();
        info!(
            "receiver pir queries: {} main buckets x {} probes",
            num_main_buckets, nh
        );
    }

    /// Flattens the query groups as `virtual_row · C + slot` with
    /// `virtual_row = main_idx · nh + h`. Slots are clamped to `C - 1` defensively.
    pub fn query_indices_flat(&self) -> Vec<u32> {
        let capacity = self.sender_sub_capacity;
        let mut flat = Vec::with_capacity(self.query_indices.len() * self.sender_nh);
        for (main_idx, group) in self.query_indices.iter().enumerate() {
            for (h, slot) in group.iter().enumerate() {
                let slot = (*slot).min(capacity - 1);
                let virtual_row = main_idx * self.sender_nh + h;
                flat.push((virtual_row * capacity + slot) as u32);
            }
        }
        flat
    }

    /// Phase 4: scans each main bucket's `nh` answers against its assigned `Y'`, recording at
    /// most one hit per element.
    pub fn process_pir_results(&mut self, results: Vec<Vec<u8>>) {
        self.pir_results = results;
        self.hit_element_indices.clear();
        self.hit_sub_bucket_indices.clear();

        for main_idx in 0..self.query_indices.len() {
            let elem_idx = match self.bucket_to_element.get(main_idx) {
                Some(Some(idx)) => *idx,
                _ => continue,
            };
            for h in 0..self.sender_nh {
                let result_idx = main_idx * self.sender_nh + h;
                let Some(result) = self.pir_results.get(result_idx) else {
                    warn!("pir result index {result_idx} out of range");
                    continue;
                };
                if result.len() < XPRIME_SIZE {
                    continue;
                }
                if result[..XPRIME_SIZE] == self.y_prime[elem_idx] {
                    self.hit_element_indices.push(elem_idx);
                    self.hit_sub_bucket_indices.push(h);
                    break;
                }
            }
        }
        info!(
            "receiver pir hits: {}/{}",
            self.hit_element_indices.len(),
            self.y_prime.len()
        );
    }

    /// Phase 5: the main-bucket index of each hit, in hit order; its length is the observed
    /// intersection size.
    pub fn ot_choices(&self) -> Vec<usize> {
        self.hit_element_indices
            .iter()
            .map(|elem_idx| self.element_to_main_bucket[*elem_idx])
            .collect()
    }

    /// Phase 6: unmasks each hit record under its OT-delivered bucket key.
    ///
    /// Header corruption in a single record skips that record only; a parse failure must not
    /// leak timing about which queries matched.
    pub fn decrypt_intersection(&mut self, bucket_keys: &[[u8; BUCKET_KEY_SIZE]]) {
        self.intersection.clear();
        if bucket_keys.len() != self.hit_element_indices.len() {
            warn!(
                "{} bucket keys for {} hits",
                bucket_keys.len(),
                self.hit_element_indices.len()
            );
        }

        for (key_idx, r_k) in bucket_keys.iter().enumerate() {
            let elem_idx = self.hit_element_indices[key_idx];
            let h = self.hit_sub_bucket_indices[key_idx];
            let main_idx = self.element_to_main_bucket[elem_idx];
            let result_idx = main_idx * self.sender_nh + h;

            let Some(result) = self.pir_results.get(result_idx) else {
                warn!("decrypt: pir result {result_idx} out of range");
                continue;
            };
            if result.len() < XPRIME_SIZE || result[..XPRIME_SIZE] != self.y_prime[elem_idx] {
                warn!("decrypt: hit record no longer matches its Y'");
                continue;
            }
            let masked = &result[XPRIME_SIZE..];
            let (data_len, _) = match parse_record_header(masked) {
                Ok(lens) => lens,
                Err(_) => {
                    warn!("decrypt: corrupt record header, skipping record");
                    continue;
                }
            };
            let pad = h2(r_k, &self.h_y_rs[elem_idx], data_len);
            match open_record(masked, &pad) {
                Ok((x, v)) => self.intersection.push((x, v)),
                Err(_) => warn!("decrypt: corrupt record body, skipping record"),
            }
        }
        info!("receiver intersection size: {}", self.intersection.len());
    }

    /// The decrypted intersection `{(x, v)}`.
    pub fn intersection(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.intersection
    }

    pub(crate) fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Recomputes `H(y)^{r_s}` locally from the Sender's scalar and shuffle map and compares
    /// against the in-protocol values (debugging aid for the OPRF path).
    #[cfg(test)]
    pub(crate) fn verify_oprf_correctness(
        &self,
        sender_r_s: &Scalar,
        shuffle_map: &[usize],
    ) -> usize {
        let mut matches = 0;
        for (pos, original_idx) in shuffle_map.iter().enumerate() {
            let expected = curve::point_to_bytes(&curve::scalar_mul(
                &curve::map_to_point(&self.input[*original_idx]),
                sender_r_s,
            ));
            if self.h_y_rs[pos] == expected {
                matches += 1;
            }
        }
        matches
    }

    /// Checks that every placed `Y'` is reachable through one of its `nh` candidate cells of
    /// the Sender's flattened database (the PIR row-alignment invariant).
    #[cfg(test)]
    pub(crate) fn verify_mapping(&self, sender_db: &[crate::buckets::BucketSlot]) -> bool {
        for (elem_idx, main_idx) in self.element_to_main_bucket.iter().enumerate() {
            let y_prime = &self.y_prime[elem_idx];
            let found = (0..self.sender_nh).any(|h| {
                let slot = instance_hash(y_prime, INNER_HASH_IDX_BASE + h, self.sender_sub_capacity);
                let virtual_row = main_idx * self.sender_nh + h;
                let global = virtual_row * self.sender_sub_capacity + slot;
                sender_db
                    .get(global)
                    .map(|entry| entry.x_prime == *y_prime)
                    .unwrap_or(false)
            });
            if !found {
                return false;
            }
        }
        true
    }
}
