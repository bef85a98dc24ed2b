//! Derived batch-PIR parameters: BFV geometry, row layout, bundle/compression sizing and the
//! constant-weight codeword table shared by server and client.

use std::collections::HashMap;

use crate::config::PirMode;
use crate::hash::{make_item, Item128};
use crate::pir::bfv::BfvEncParams;
use crate::pir::cuckoo::{KukuTable, PIR_CUCKOO_HASH_COUNT, PIR_CUCKOO_MAX_PROBE};
use crate::Error;

/// Inflation of the default-mode cuckoo table over the query count.
const PIR_CUCKOO_FACTOR: f64 = 1.5;

/// Seed item of the default-mode cuckoo table.
fn pir_cuckoo_seed() -> Item128 {
    make_item(1, 0)
}

/// Batching primes `p ≡ 1 (mod 2N)` by `(poly_degree, prime_bits)`, as a lattice library's
/// batching-modulus search would produce them.
fn batching_prime(poly_degree: usize, prime_bits: u32) -> u64 {
    match (poly_degree, prime_bits) {
        (4096, 17) => 65_537,
        (4096, 18) => 163_841,
        (8192, 18) => 147_457,
        _ => unreachable!("unsupported (poly_degree, prime_bits) combination"),
    }
}

/// Smallest `m` with `C(m, 2) >= col_size`.
pub(crate) fn calculate_encoding_size(col_size: usize) -> usize {
    let mut m = 2;
    while m * (m - 1) / 2 < col_size.max(1) {
        m += 1;
    }
    m
}

/// The weight-2 codeword of column `offset`: the pair `(a, b)`, `a < b < m`, at position
/// `offset` of the canonical enumeration `(0,1), (0,2), (1,2), (0,3), …`.
pub(crate) fn get_cw_code_k2(offset: usize, m: usize) -> (usize, usize) {
    let mut count = 0;
    for hi in 1..m {
        for lo in 0..hi {
            if count == offset {
                return (lo, hi);
            }
            count += 1;
        }
    }
    unreachable!("codeword offset {offset} out of range for encoding size {m}")
}

/// Shared, deterministically derived batch-PIR parameters.
#[derive(Debug, Clone)]
pub(crate) struct PirParams {
    pub(crate) mode: PirMode,
    pub(crate) num_payloads: usize,
    pub(crate) payload_size: usize,
    pub(crate) num_query: usize,
    pub(crate) enc: BfvEncParams,
    pub(crate) num_payload_slot: usize,
    pub(crate) is_compress: bool,
    pub(crate) table_size: usize,
    pub(crate) bundle_size: usize,
    pub(crate) num_slot: usize,
    pub(crate) col_size: usize,
    pub(crate) encoding_size: usize,
    /// Per-column weight-2 codewords.
    pub(crate) cw_index: Vec<(usize, usize)>,
    /// Per table row: the payload indices stored in that row's columns.
    pub(crate) bucket: Vec<Vec<u32>>,
    /// `(payload index, row) -> column` reverse map.
    pub(crate) hash_index: HashMap<(u32, u32), u32>,
}

impl PirParams {
    /// Default (cuckoo-row) mode parameters.
    ///
    /// Compression is disabled whenever the cuckoo table would not fit a single polynomial;
    /// in that case the table grows to whole bundles of `N` rows.
    pub(crate) fn new_batch(
        num_payloads: usize,
        payload_size: usize,
        num_query: usize,
        is_compress: bool,
    ) -> Result<Self, Error> {
        if num_payloads == 0 || num_query == 0 {
            return Err(Error::InputShape(
                "batch PIR requires a non-empty database and query set".into(),
            ));
        }
        let poly_degree = 4096;
        let coeff_modulus_bits = vec![48, 32, 24];
        let plain_bits: u32 = if is_compress { 18 } else { 17 };
        let enc = BfvEncParams::new(
            poly_degree,
            coeff_modulus_bits,
            plain_bits,
            batching_prime(poly_degree, plain_bits),
        );
        let num_payload_slot = (payload_size * 8).div_ceil(plain_bits as usize - 1);

        let target = (num_query as f64 * PIR_CUCKOO_FACTOR).ceil() as usize;
        let is_compress = is_compress && target < poly_degree;

        let (table_size, bundle_size, num_slot) = if !is_compress {
            // One payload slot per response row; whole bundles of N rows.
            let bundle_size = target.div_ceil(poly_degree).max(1);
            (bundle_size * poly_degree, bundle_size, 1)
        } else {
            // Pack num_slot rows' worth of payload into each ciphertext, then grow the table
            // back to use every slot of the polynomial.
            let num_slot = (poly_degree / target).max(1);
            (poly_degree / num_slot, 1, num_slot)
        };

        let table = KukuTable::new(
            table_size,
            PIR_CUCKOO_HASH_COUNT,
            pir_cuckoo_seed(),
            PIR_CUCKOO_MAX_PROBE,
        );
        let mut bucket = vec![Vec::new(); table_size];
        let mut hash_index = HashMap::new();
        for index in 0..num_payloads as u32 {
            for position in table.all_locations(make_item(0, index as u64)) {
                bucket[position].push(index);
                hash_index.insert((index, position as u32), bucket[position].len() as u32 - 1);
            }
        }

        let col_size = bucket.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let encoding_size = calculate_encoding_size(col_size);
        let cw_index = (0..col_size)
            .map(|c| get_cw_code_k2(c, encoding_size))
            .collect();

        Ok(Self {
            mode: PirMode::Default,
            num_payloads,
            payload_size,
            num_query,
            enc,
            num_payload_slot,
            is_compress,
            table_size,
            bundle_size,
            num_slot,
            col_size,
            encoding_size,
            cw_index,
            bucket,
            hash_index,
        })
    }

    /// Direct (deterministic-row) mode parameters: row `i` of the table is logical row `i`,
    /// `bucket[row][col] = row * col_size + col`.
    pub(crate) fn new_direct(
        num_payloads: usize,
        payload_size: usize,
        num_query: usize,
        col_size: usize,
    ) -> Result<Self, Error> {
        if num_payloads == 0 || num_query == 0 || col_size == 0 {
            return Err(Error::InputShape(
                "direct PIR requires non-empty database, query set and row size".into(),
            ));
        }
        let poly_degree = 8192;
        let coeff_modulus_bits = vec![56, 56, 24, 24];
        let plain_bits: u32 = 18;
        let enc = BfvEncParams::new(
            poly_degree,
            coeff_modulus_bits,
            plain_bits,
            batching_prime(poly_degree, plain_bits),
        );
        let num_payload_slot = (payload_size * 8).div_ceil(plain_bits as usize - 1);

        let table_size = num_query;
        let bundle_size = table_size.div_ceil(poly_degree);
        // Multi-bundle alignment requires a stride of one slot per row.
        let num_slot = 1;

        let mut bucket = vec![Vec::new(); table_size];
        let mut hash_index = HashMap::new();
        for row in 0..table_size {
            for col in 0..col_size {
                let global = row * col_size + col;
                if global < num_payloads {
                    bucket[row].push(global as u32);
                    hash_index.insert((global as u32, row as u32), col as u32);
                }
            }
        }

        let encoding_size = calculate_encoding_size(col_size);
        let cw_index = (0..col_size)
            .map(|c| get_cw_code_k2(c, encoding_size))
            .collect();

        Ok(Self {
            mode: PirMode::Direct,
            num_payloads,
            payload_size,
            num_query,
            enc,
            num_payload_slot,
            is_compress: true,
            table_size,
            bundle_size,
            num_slot,
            col_size,
            encoding_size,
            cw_index,
            bucket,
            hash_index,
        })
    }

    /// A fresh, empty cuckoo table with this parameter set's geometry, for the client to
    /// place its own query indices.
    pub(crate) fn new_query_table(&self) -> KukuTable {
        KukuTable::new(
            self.table_size,
            PIR_CUCKOO_HASH_COUNT,
            pir_cuckoo_seed(),
            PIR_CUCKOO_MAX_PROBE,
        )
    }

    /// The codeword of payload `index` as stored at table row `loc`.
    pub(crate) fn cw_for(&self, index: u32, loc: u32) -> Result<(usize, usize), Error> {
        let col = *self
            .hash_index
            .get(&(index, loc))
            .ok_or_else(|| Error::InputShape(format!("payload {index} absent from row {loc}")))?;
        Ok(self.cw_index[col as usize])
    }

    /// Response ciphertexts per bundle: `ceil(num_payload_slot / num_slot)`.
    pub(crate) fn num_response_slot(&self) -> usize {
        self.num_payload_slot.div_ceil(self.num_slot)
    }

    /// Total ciphertexts in a query (`m · bundle_size`).
    pub(crate) fn query_ct_count(&self) -> usize {
        self.encoding_size * self.bundle_size
    }

    /// Total ciphertexts in a response (`num_response_slot · bundle_size`).
    pub(crate) fn response_ct_count(&self) -> usize {
        self.num_response_slot() * self.bundle_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_size_is_minimal() {
        assert_eq!(calculate_encoding_size(1), 2);
        assert_eq!(calculate_encoding_size(3), 3);
        assert_eq!(calculate_encoding_size(4), 4);
        assert_eq!(calculate_encoding_size(10), 5);
        assert_eq!(calculate_encoding_size(11), 6);
    }

    #[test]
    fn codewords_enumerate_all_pairs_once() {
        let m = 6;
        let mut seen = std::collections::HashSet::new();
        for offset in 0..m * (m - 1) / 2 {
            let (a, b) = get_cw_code_k2(offset, m);
            assert!(a < b && b < m);
            assert!(seen.insert((a, b)));
        }
    }

    #[test]
    fn batch_params_cover_every_payload_three_ways() {
        let params = PirParams::new_batch(500, 64, 100, false).unwrap();
        assert_eq!(params.table_size, 4096);
        assert_eq!(params.bundle_size, 1);
        assert_eq!(params.num_slot, 1);
        assert!(!params.is_compress);

        for index in 0..500u32 {
            let rows: Vec<u32> = params
                .hash_index
                .keys()
                .filter(|(i, _)| *i == index)
                .map(|(_, r)| *r)
                .collect();
            assert!(!rows.is_empty() && rows.len() <= 3);
            for row in rows {
                let col = params.hash_index[&(index, row)] as usize;
                assert_eq!(params.bucket[row as usize][col], index);
            }
        }
    }

    #[test]
    fn direct_params_use_deterministic_rows() {
        let params = PirParams::new_direct(120, 64, 6, 20).unwrap();
        assert_eq!(params.table_size, 6);
        assert_eq!(params.bundle_size, 1);
        assert_eq!(params.num_slot, 1);
        assert_eq!(params.col_size, 20);
        for row in 0..6usize {
            for col in 0..20usize {
                assert_eq!(params.bucket[row][col], (row * 20 + col) as u32);
            }
        }
        assert_eq!(params.cw_for(45, 2).unwrap(), params.cw_index[5]);
    }

    #[test]
    fn direct_params_force_single_slot_across_bundles() {
        let params = PirParams::new_direct(9000 * 4, 32, 9000, 4).unwrap();
        assert_eq!(params.bundle_size, 2);
        assert_eq!(params.num_slot, 1);
    }
}
