//! Batch-PIR client: key generation, constant-weight query construction and answer
//! extraction, plus the bit-serial slot packing shared with the protocol layer.

use rand::{CryptoRng, RngCore};

use crate::config::PirMode;
use crate::hash::make_item;
use crate::pir::bfv::{BfvContext, Ciphertext, RelinKeys, SecretKey};
use crate::pir::params::{get_cw_code_k2, PirParams};
use crate::Error;

/// Sentinel standing in for a zero slot value; BFV plaintexts should not be all-zero, so the
/// substitution is applied symmetrically on pack and unpack.
pub(crate) const ZERO_SENTINEL: u64 = 8888;

/// Packs a byte payload into slot values of `bits_per_slot` bits each (LSB-first within each
/// byte), substituting [`ZERO_SENTINEL`] for zeros.
pub(crate) fn bytes_to_slots(bytes: &[u8], bits_per_slot: usize, num_slots: usize) -> Vec<u64> {
    let total_bits = bytes.len() * 8;
    let mut slots = Vec::with_capacity(num_slots);
    let mut bit_offset = 0;
    for _ in 0..num_slots {
        let mut value = 0u64;
        for bit in 0..bits_per_slot {
            if bit_offset + bit >= total_bits {
                break;
            }
            let byte_idx = (bit_offset + bit) / 8;
            let bit_in_byte = (bit_offset + bit) % 8;
            let bit_value = (bytes[byte_idx] >> bit_in_byte) & 1;
            value |= (bit_value as u64) << bit;
        }
        slots.push(if value == 0 { ZERO_SENTINEL } else { value });
        bit_offset += bits_per_slot;
    }
    slots
}

/// Reverses [`bytes_to_slots`], mapping the sentinel back to zero.
pub(crate) fn slots_to_bytes(slots: &[u64], bits_per_slot: usize, payload_size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; payload_size];
    let mut bit_offset = 0;
    for slot in slots {
        let value = if *slot == ZERO_SENTINEL { 0 } else { *slot };
        let bits_here = bits_per_slot.min((payload_size * 8).saturating_sub(bit_offset));
        for bit in 0..bits_here {
            let byte_idx = (bit_offset + bit) / 8;
            let bit_in_byte = (bit_offset + bit) % 8;
            bytes[byte_idx] |= (((value >> bit) & 1) as u8) << bit_in_byte;
        }
        bit_offset += bits_per_slot;
    }
    bytes
}

/// The Receiver-side PIR endpoint.
pub(crate) struct PirClient {
    params: PirParams,
    ctx: BfvContext,
    secret_key: SecretKey,
    relin_keys: RelinKeys,
    /// Table location chosen for each query, in query order; filled by query generation.
    query_locs: Vec<usize>,
}

impl PirClient {
    pub(crate) fn new<R: RngCore + CryptoRng>(params: PirParams, rng: &mut R) -> Self {
        let ctx = BfvContext::new(params.enc.clone());
        let secret_key = SecretKey::random(rng);
        let relin_keys = ctx.make_relin_keys(&secret_key);
        Self {
            params,
            ctx,
            secret_key,
            relin_keys,
            query_locs: Vec::new(),
        }
    }

    /// The relinearization keys the server needs for its selection-vector products.
    pub(crate) fn keys(&self) -> RelinKeys {
        self.relin_keys.clone()
    }

    /// Builds the serialized query for the given payload indices (`m · bundle_size`
    /// ciphertexts in interleaved `codeword · bundle_size + bundle` order).
    pub(crate) fn gen_batch_query(&mut self, indices: &[u32]) -> Result<Vec<u8>, Error> {
        if indices.len() != self.params.num_query {
            return Err(Error::InputShape(format!(
                "{} query indices, expected {}",
                indices.len(),
                self.params.num_query
            )));
        }

        let n = self.params.enc.poly_degree;
        let bundle_size = self.params.bundle_size;
        let num_slot = self.params.num_slot;
        let mut cw_query = vec![vec![0u64; n]; self.params.query_ct_count()];
        self.query_locs.clear();

        match self.params.mode {
            PirMode::Default => {
                // Place the queried indices in a private copy of the public cuckoo table to
                // discover each one's row.
                let mut table = self.params.new_query_table();
                for q in indices {
                    table.insert(make_item(0, *q as u64))?;
                }
                for q in indices {
                    let loc = table
                        .query(make_item(0, *q as u64))
                        .ok_or(Error::UnexpectedMessageType)?;
                    let (a, b) = self.params.cw_for(*q, loc as u32)?;
                    for s in 0..num_slot {
                        let pos = loc * num_slot + s;
                        cw_query[a * bundle_size + pos / n][pos % n] = 1;
                        cw_query[b * bundle_size + pos / n][pos % n] = 1;
                    }
                    self.query_locs.push(loc);
                }
            }
            PirMode::Direct => {
                // Query i targets table row i; the index selects the column within that row.
                for (i, q) in indices.iter().enumerate() {
                    let row = *q as usize / self.params.col_size;
                    let offset = *q as usize % self.params.col_size;
                    if row != i {
                        return Err(Error::InputShape(format!(
                            "direct query {i} targets row {row}; queries must be row-aligned"
                        )));
                    }
                    let (a, b) = get_cw_code_k2(offset, self.params.encoding_size);
                    let pos = i * num_slot;
                    cw_query[a * bundle_size + pos / n][pos % n] = 1;
                    cw_query[b * bundle_size + pos / n][pos % n] = 1;
                    self.query_locs.push(i);
                }
            }
        }

        let mut query = Vec::with_capacity(cw_query.len());
        for slots in &cw_query {
            let plain = self.ctx.encode(slots)?;
            query.push(self.ctx.encrypt_symmetric(&self.secret_key, &plain));
        }
        Ok(bincode::serialize(&query)?)
    }

    /// Deserializes, decrypts and decodes the response into slot-value matrices.
    pub(crate) fn extract_batch_answer(
        &self,
        response_bytes: &[u8],
    ) -> Result<Vec<Vec<u64>>, Error> {
        let response: Vec<Ciphertext> = bincode::deserialize(response_bytes)?;
        if response.len() != self.params.response_ct_count() {
            return Err(Error::InputShape(format!(
                "response holds {} ciphertexts, expected {}",
                response.len(),
                self.params.response_ct_count()
            )));
        }
        response
            .iter()
            .map(|ct| {
                let plain = self.ctx.decrypt(&self.secret_key, ct)?;
                Ok(self.ctx.decode(&plain))
            })
            .collect()
    }

    /// Assembles each query's payload bytes out of the decoded answer matrices.
    pub(crate) fn extract_payloads(&self, answer: &[Vec<u64>]) -> Vec<Vec<u8>> {
        let n = self.params.enc.poly_degree;
        let bundle_size = self.params.bundle_size;
        let num_slot = self.params.num_slot;
        let num_payload_slot = self.params.num_payload_slot;
        let bits_per_slot = self.params.enc.plain_bits as usize - 1;

        self.query_locs
            .iter()
            .map(|loc| {
                let mut slots = Vec::with_capacity(num_payload_slot);
                if !self.params.is_compress {
                    let slot_index = loc % n;
                    let bundle_index = loc / n;
                    for i in 0..num_payload_slot {
                        slots.push(answer[bundle_size * i + bundle_index][slot_index]);
                    }
                } else {
                    let base = loc * num_slot;
                    for i in 0..num_payload_slot {
                        let group = i / num_slot;
                        let within = i % num_slot;
                        let pos = base + within;
                        slots.push(answer[group * bundle_size + pos / n][pos % n]);
                    }
                }
                slots_to_bytes(&slots, bits_per_slot, self.params.payload_size)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pir::server::PirServer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn slot_packing_round_trips() {
        let bits_per_slot = 16;
        for payload in [
            vec![0u8; 32],
            (0u8..64).collect::<Vec<u8>>(),
            vec![0xFF; 17],
        ] {
            let num_slots = (payload.len() * 8).div_ceil(bits_per_slot);
            let slots = bytes_to_slots(&payload, bits_per_slot, num_slots);
            assert!(slots.iter().all(|s| *s != 0));
            assert_eq!(
                slots_to_bytes(&slots, bits_per_slot, payload.len()),
                payload
            );
        }
    }

    fn run_pir(params: PirParams, raw_db: Vec<Vec<u64>>, indices: &[u32]) -> Vec<Vec<u8>> {
        let mut rng = ChaCha20Rng::from_seed([21; 32]);
        let mut client = PirClient::new(params.clone(), &mut rng);
        let mut server = PirServer::new(params, &raw_db).unwrap();
        server.set_keys(client.keys());

        let query = client.gen_batch_query(indices).unwrap();
        let response = server.gen_batch_response(&query).unwrap();
        let answer = client.extract_batch_answer(&response).unwrap();
        client.extract_payloads(&answer)
    }

    fn payload_bytes(index: u32, payload_size: usize) -> Vec<u8> {
        (0..payload_size)
            .map(|i| (index as usize * 31 + i * 7) as u8)
            .collect()
    }

    fn build_raw_db(
        num_payloads: usize,
        payload_size: usize,
        bits_per_slot: usize,
        num_payload_slot: usize,
    ) -> Vec<Vec<u64>> {
        (0..num_payloads as u32)
            .map(|i| bytes_to_slots(&payload_bytes(i, payload_size), bits_per_slot, num_payload_slot))
            .collect()
    }

    #[test]
    fn default_mode_retrieves_the_queried_rows() {
        let (num_payloads, payload_size) = (600, 48);
        let indices: Vec<u32> = vec![0, 7, 123, 599, 301, 42];
        let params =
            PirParams::new_batch(num_payloads, payload_size, indices.len(), false).unwrap();
        let raw_db = build_raw_db(
            num_payloads,
            payload_size,
            params.enc.plain_bits as usize - 1,
            params.num_payload_slot,
        );
        let payloads = run_pir(params, raw_db, &indices);
        for (q, payload) in indices.iter().zip(payloads.iter()) {
            assert_eq!(payload, &payload_bytes(*q, payload_size));
        }
    }

    #[test]
    fn direct_mode_retrieves_row_aligned_queries() {
        let (col_size, rows, payload_size) = (20, 9, 32);
        let num_payloads = col_size * rows;
        // Query i must target row i; pick an arbitrary column per row.
        let indices: Vec<u32> = (0..rows)
            .map(|i| (i * col_size + (i * 3) % col_size) as u32)
            .collect();
        let params = PirParams::new_direct(num_payloads, payload_size, rows, col_size).unwrap();
        let raw_db = build_raw_db(
            num_payloads,
            payload_size,
            params.enc.plain_bits as usize - 1,
            params.num_payload_slot,
        );
        let payloads = run_pir(params, raw_db, &indices);
        for (q, payload) in indices.iter().zip(payloads.iter()) {
            assert_eq!(payload, &payload_bytes(*q, payload_size));
        }
    }

    #[test]
    fn compressed_default_mode_packs_multiple_rows_per_ciphertext() {
        let (num_payloads, payload_size) = (300, 48);
        let indices: Vec<u32> = vec![3, 77, 150, 299, 8];
        let params =
            PirParams::new_batch(num_payloads, payload_size, indices.len(), true).unwrap();
        assert!(params.is_compress);
        assert!(params.num_slot > 1);
        assert_eq!(params.bundle_size, 1);

        let raw_db = build_raw_db(
            num_payloads,
            payload_size,
            params.enc.plain_bits as usize - 1,
            params.num_payload_slot,
        );
        let payloads = run_pir(params, raw_db, &indices);
        for (q, payload) in indices.iter().zip(payloads.iter()) {
            assert_eq!(payload, &payload_bytes(*q, payload_size));
        }
    }

    #[test]
    fn misaligned_direct_queries_are_rejected() {
        let params = PirParams::new_direct(60, 16, 3, 20).unwrap();
        let mut rng = ChaCha20Rng::from_seed([22; 32]);
        let mut client = PirClient::new(params, &mut rng);
        // Query 0 targets row 2.
        let err = client.gen_batch_query(&[41, 21, 1]).unwrap_err();
        assert!(matches!(err, Error::InputShape(_)));
    }
}
