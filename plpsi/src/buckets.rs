//! Two-layer hash layout and masked record framing.
//!
//! Outer layer: the Receiver cuckoo-places each `Y'` into exactly one of `B` main buckets
//! while the Sender replicates each `X'` into all of its 3 candidate buckets. Inner layer:
//! the Sender cuckoo-places the (deduplicated) slots of every main bucket across `nh` rows
//! of capacity `C`; the Receiver probes all `nh` candidate rows per element instead of
//! storing anything.

use rand::Rng;
use rand_chacha::ChaCha20Rng;

use crate::config::{INNER_HASH_IDX_BASE, MASK_HEADER_SIZE, XPRIME_SIZE};
use crate::hash::instance_hash;
use crate::Error;

/// One cell of the Sender-side layout: `x'` plus the masked `x ‖ v` record.
///
/// An all-zero `x'` marks an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BucketSlot {
    pub(crate) x_prime: [u8; XPRIME_SIZE],
    pub(crate) masked: Vec<u8>,
}

impl BucketSlot {
    pub(crate) fn is_empty(&self) -> bool {
        self.x_prime == [0u8; XPRIME_SIZE]
    }
}

/// The candidate main buckets of an element under the outer hash family.
pub(crate) fn candidate_buckets(
    element: &[u8],
    num_hash_funcs: usize,
    bucket_count: usize,
) -> Vec<usize> {
    (0..num_hash_funcs)
        .map(|h| instance_hash(element, h, bucket_count))
        .collect()
}

/// The candidate inner slot of an element in sub-bucket row `h` (`0 <= h < nh`).
pub(crate) fn inner_slot(element: &[u8], h: usize, capacity: usize) -> usize {
    instance_hash(element, INNER_HASH_IDX_BASE + h, capacity)
}

/// Receiver-side outer cuckoo placement.
///
/// Returns `element_to_bucket` and the inverse `bucket_to_element` arena. Fails with
/// [`Error::CuckooOverflow`] when an eviction chain exceeds `max_retry`; the caller aborts the
/// session in that case, there is no stash and no fallback bucket.
pub(crate) fn cuckoo_place_outer(
    elements: &[[u8; XPRIME_SIZE]],
    bucket_count: usize,
    num_hash_funcs: usize,
    max_retry: usize,
    rng: &mut ChaCha20Rng,
) -> Result<(Vec<usize>, Vec<Option<usize>>), Error> {
    let invalid = bucket_count;
    let mut element_to_bucket = vec![invalid; elements.len()];
    let mut bucket_to_element: Vec<Option<usize>> = vec![None; bucket_count];

    for start_idx in 0..elements.len() {
        let mut current_idx = start_idx;
        let mut candidates = candidate_buckets(&elements[current_idx], num_hash_funcs, bucket_count);
        let mut placed = false;

        for _ in 0..max_retry {
            if let Some(&bucket) = candidates.iter().find(|b| bucket_to_element[**b].is_none()) {
                bucket_to_element[bucket] = Some(current_idx);
                element_to_bucket[current_idx] = bucket;
                placed = true;
                break;
            }

            // All candidates are occupied: evict a random one and continue with the victim.
            let victim_bucket = candidates[rng.gen_range(0..candidates.len())];
            let victim_idx = bucket_to_element[victim_bucket]
                .expect("occupied bucket must name its occupant");
            bucket_to_element[victim_bucket] = Some(current_idx);
            element_to_bucket[current_idx] = victim_bucket;

            current_idx = victim_idx;
            candidates = candidate_buckets(&elements[current_idx], num_hash_funcs, bucket_count);
        }

        if !placed {
            return Err(Error::CuckooOverflow {
                load_factor: elements.len() as f64 / bucket_count as f64,
            });
        }
    }

    debug_assert!(element_to_bucket.iter().all(|b| *b < bucket_count));
    Ok((element_to_bucket, bucket_to_element))
}

/// Sender-side inner cuckoo placement of one main bucket.
///
/// `slots` must already be deduplicated by `x'`. Places every slot into one of its `nh`
/// candidate cells (`inner_slot` per row), evicting at random on conflicts, bounded by
/// `max_retry` per element.
pub(crate) fn cuckoo_place_inner(
    slots: Vec<BucketSlot>,
    nh: usize,
    capacity: usize,
    max_retry: usize,
    rng: &mut ChaCha20Rng,
) -> Result<Vec<Vec<BucketSlot>>, Error> {
    let mut rows = vec![vec![BucketSlot::default(); capacity]; nh];
    let num_slots = slots.len();

    for slot in slots {
        let mut current = slot;
        let mut placed = false;

        for _ in 0..max_retry {
            let empty = (0..nh)
                .map(|h| (h, inner_slot(&current.x_prime, h, capacity)))
                .find(|(h, s)| rows[*h][*s].is_empty());
            if let Some((h, s)) = empty {
                rows[h][s] = current;
                placed = true;
                break;
            }

            let victim_h = rng.gen_range(0..nh);
            let victim_s = inner_slot(&current.x_prime, victim_h, capacity);
            std::mem::swap(&mut rows[victim_h][victim_s], &mut current);
        }

        if !placed {
            return Err(Error::CuckooOverflow {
                load_factor: num_slots as f64 / (nh * capacity) as f64,
            });
        }
    }

    Ok(rows)
}

/// Seals `x ‖ v` under a one-time pad: `len_u16 ‖ x_len_u16 ‖ (x ‖ v) XOR pad`.
///
/// The pad must be exactly `x.len() + v.len()` bytes.
pub(crate) fn seal_record(x: &[u8], v: &[u8], pad: &[u8]) -> Vec<u8> {
    let data_len = x.len() + v.len();
    debug_assert_eq!(pad.len(), data_len);
    let mut out = Vec::with_capacity(MASK_HEADER_SIZE + data_len);
    out.extend_from_slice(&(data_len as u16).to_be_bytes());
    out.extend_from_slice(&(x.len() as u16).to_be_bytes());
    out.extend(
        x.iter()
            .chain(v.iter())
            .zip(pad.iter())
            .map(|(byte, mask)| byte ^ mask),
    );
    out
}

/// Parses a masked record header, returning `(data_len, x_len)`.
///
/// Rejects headers whose declared lengths exceed the available bytes; the caller recovers
/// per record instead of aborting.
pub(crate) fn parse_record_header(masked: &[u8]) -> Result<(usize, usize), Error> {
    if masked.len() < MASK_HEADER_SIZE {
        return Err(Error::HeaderCorruption);
    }
    let data_len = u16::from_be_bytes([masked[0], masked[1]]) as usize;
    let x_len = u16::from_be_bytes([masked[2], masked[3]]) as usize;
    if data_len > masked.len() - MASK_HEADER_SIZE || x_len > data_len {
        return Err(Error::HeaderCorruption);
    }
    Ok((data_len, x_len))
}

/// Unmasks a sealed record with the given pad and splits it into `(x, v)`.
pub(crate) fn open_record(masked: &[u8], pad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let (data_len, x_len) = parse_record_header(masked)?;
    debug_assert_eq!(pad.len(), data_len);
    let body = &masked[MASK_HEADER_SIZE..MASK_HEADER_SIZE + data_len];
    let plain: Vec<u8> = body.iter().zip(pad.iter()).map(|(b, m)| b ^ m).collect();
    let (x, v) = plain.split_at(x_len);
    Ok((x.to_vec(), v.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::h2;
    use rand::SeedableRng;

    fn digest(label: &[u8]) -> [u8; XPRIME_SIZE] {
        crate::hash::h1(label)
    }

    #[test]
    fn outer_cuckoo_is_a_bijection() {
        let elements: Vec<[u8; 32]> = (0..40u32).map(|i| digest(&i.to_be_bytes())).collect();
        let bucket_count = 60;
        let mut rng = ChaCha20Rng::from_seed([3; 32]);
        let (element_to_bucket, bucket_to_element) =
            cuckoo_place_outer(&elements, bucket_count, 3, 750, &mut rng).unwrap();

        let mut seen = std::collections::HashSet::new();
        for (idx, bucket) in element_to_bucket.iter().enumerate() {
            assert!(*bucket < bucket_count);
            assert!(seen.insert(*bucket), "main bucket claimed twice");
            assert_eq!(bucket_to_element[*bucket], Some(idx));
            assert!(candidate_buckets(&elements[idx], 3, bucket_count).contains(bucket));
        }
    }

    #[test]
    fn outer_cuckoo_overflows_when_elements_exceed_buckets() {
        let elements: Vec<[u8; 32]> = (0..10u32).map(|i| digest(&i.to_be_bytes())).collect();
        let mut rng = ChaCha20Rng::from_seed([4; 32]);
        let result = cuckoo_place_outer(&elements, 4, 3, 100, &mut rng);
        assert!(matches!(result, Err(Error::CuckooOverflow { .. })));
    }

    #[test]
    fn inner_cuckoo_places_each_slot_at_a_candidate_cell() {
        let slots: Vec<BucketSlot> = (0..12u32)
            .map(|i| BucketSlot {
                x_prime: digest(&i.to_be_bytes()),
                masked: vec![i as u8; 8],
            })
            .collect();
        let (nh, capacity) = (3, 20);
        let mut rng = ChaCha20Rng::from_seed([5; 32]);
        let rows = cuckoo_place_inner(slots.clone(), nh, capacity, 750, &mut rng).unwrap();

        for slot in &slots {
            let found = (0..nh).any(|h| rows[h][inner_slot(&slot.x_prime, h, capacity)] == *slot);
            assert!(found, "slot missing from all candidate cells");
        }
        let occupied: usize = rows
            .iter()
            .flat_map(|row| row.iter())
            .filter(|s| !s.is_empty())
            .count();
        assert_eq!(occupied, slots.len());
    }

    #[test]
    fn sealed_records_round_trip() {
        let (x, v) = (b"bob".as_slice(), b"222".as_slice());
        let pad = h2(&[7u8; 32], b"shared-point", x.len() + v.len());
        let masked = seal_record(x, v, &pad);
        assert_eq!(masked.len(), MASK_HEADER_SIZE + x.len() + v.len());

        let (x_out, v_out) = open_record(&masked, &pad).unwrap();
        assert_eq!(x_out, x);
        assert_eq!(v_out, v);
    }

    #[test]
    fn corrupt_headers_are_rejected_not_fatal() {
        let pad = h2(&[7u8; 32], b"p", 4);
        let mut masked = seal_record(b"ab", b"cd", &pad);
        masked[0] = 0xFF; // data_len far beyond the buffer
        assert_eq!(parse_record_header(&masked), Err(Error::HeaderCorruption));

        let mut masked = seal_record(b"ab", b"cd", &pad);
        masked[3] = 0xFF; // x_len > data_len
        assert_eq!(parse_record_header(&masked), Err(Error::HeaderCorruption));

        assert_eq!(parse_record_header(&[0u8; 2]), Err(Error::HeaderCorruption));
    }
}
