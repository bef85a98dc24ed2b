//! A small 3-hash cuckoo table over 128-bit items, used to lay out the default-mode PIR rows.
//!
//! The table is built from public parameters (size, hash count, seed), so the Sender and the
//! Receiver derive identical bucket layouts independently. The eviction RNG is seeded from the
//! table seed for the same reason.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::hash::{make_item, Item128, LocFunc};
use crate::Error;

pub(crate) const PIR_CUCKOO_HASH_COUNT: usize = 3;
pub(crate) const PIR_CUCKOO_MAX_PROBE: usize = 100;

#[derive(Debug, Clone)]
pub(crate) struct KukuTable {
    table_size: usize,
    loc_funcs: Vec<LocFunc>,
    slots: Vec<Option<Item128>>,
    max_probe: usize,
    rng: ChaCha20Rng,
}

impl KukuTable {
    pub(crate) fn new(table_size: usize, hash_count: usize, seed: Item128, max_probe: usize) -> Self {
        let loc_funcs = (0..hash_count)
            .map(|j| {
                let mut hi = [0u8; 8];
                let mut lo = [0u8; 8];
                hi.copy_from_slice(&seed.0[..8]);
                lo.copy_from_slice(&seed.0[8..]);
                let lo = u64::from_be_bytes(lo).wrapping_add(j as u64);
                LocFunc::new(table_size, make_item(u64::from_be_bytes(hi), lo))
            })
            .collect();
        let mut rng_seed = [0u8; 32];
        rng_seed[..16].copy_from_slice(&seed.0);
        rng_seed[16..].copy_from_slice(&seed.0);
        Self {
            table_size,
            loc_funcs,
            slots: vec![None; table_size],
            max_probe,
            rng: ChaCha20Rng::from_seed(rng_seed),
        }
    }

    /// All candidate locations of an item, deduplicated, in hash order.
    pub(crate) fn all_locations(&self, item: Item128) -> Vec<usize> {
        let mut locations = Vec::with_capacity(self.loc_funcs.len());
        for f in &self.loc_funcs {
            let loc = f.locate(item);
            if !locations.contains(&loc) {
                locations.push(loc);
            }
        }
        locations
    }

    /// Cuckoo-inserts an item, evicting at random on conflicts, bounded by `max_probe`.
    pub(crate) fn insert(&mut self, item: Item128) -> Result<(), Error> {
        let mut current = item;
        for _ in 0..self.max_probe {
            let locations = self.all_locations(current);
            if let Some(&loc) = locations.iter().find(|l| self.slots[**l].is_none()) {
                self.slots[loc] = Some(current);
                return Ok(());
            }
            let victim_loc = locations[self.rng.gen_range(0..locations.len())];
            let victim = self.slots[victim_loc].replace(current).expect("occupied");
            current = victim;
        }
        Err(Error::CuckooOverflow {
            load_factor: self.slots.iter().filter(|s| s.is_some()).count() as f64
                / self.table_size as f64,
        })
    }

    /// Location of a previously inserted item.
    pub(crate) fn query(&self, item: Item128) -> Option<usize> {
        self.all_locations(item)
            .into_iter()
            .find(|loc| self.slots[*loc] == Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_items_are_found_at_a_candidate_location() {
        let seed = make_item(1, 0);
        let mut table = KukuTable::new(256, PIR_CUCKOO_HASH_COUNT, seed, PIR_CUCKOO_MAX_PROBE);
        let items: Vec<Item128> = (0..128u64).map(|i| make_item(0, i)).collect();
        for item in &items {
            table.insert(*item).unwrap();
        }
        for item in &items {
            let loc = table.query(*item).expect("inserted item must be present");
            assert!(table.all_locations(*item).contains(&loc));
        }
        assert_eq!(table.query(make_item(0, 999)), None);
    }

    #[test]
    fn identically_seeded_tables_agree() {
        let seed = make_item(1, 0);
        let a = KukuTable::new(512, 3, seed, 100);
        let b = KukuTable::new(512, 3, seed, 100);
        for i in 0..64u64 {
            assert_eq!(a.all_locations(make_item(0, i)), b.all_locations(make_item(0, i)));
        }
    }

    #[test]
    fn overfull_table_reports_overflow() {
        let mut table = KukuTable::new(4, 3, make_item(1, 0), 50);
        let mut failed = false;
        for i in 0..16u64 {
            if table.insert(make_item(0, i)).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }
}
