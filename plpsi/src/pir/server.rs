//! Batch-PIR server: NTT-domain database encoding and the multiply-and-sum response path.

use log::debug;
use rayon::prelude::*;

use crate::pir::bfv::{BfvContext, Ciphertext, Plaintext, RelinKeys};
use crate::pir::params::PirParams;
use crate::Error;

/// The Sender-side PIR endpoint holding the encoded database.
pub(crate) struct PirServer {
    params: PirParams,
    ctx: BfvContext,
    encoded_db: Vec<Plaintext>,
    relin_keys: Option<RelinKeys>,
}

impl PirServer {
    /// Validates the raw slot database against the declared shape and encodes it.
    ///
    /// `raw_db` is one slot vector per payload; every value must be nonzero (the caller
    /// substitutes the `8888` sentinel for zeros while packing) and below the plain modulus.
    pub(crate) fn new(params: PirParams, raw_db: &[Vec<u64>]) -> Result<Self, Error> {
        if raw_db.len() != params.num_payloads {
            return Err(Error::InputShape(format!(
                "database holds {} payloads but the parameters declare {}",
                raw_db.len(),
                params.num_payloads
            )));
        }
        for (index, payload) in raw_db.iter().enumerate() {
            if payload.len() != params.num_payload_slot {
                return Err(Error::InputShape(format!(
                    "payload {index} has {} slots, expected {}",
                    payload.len(),
                    params.num_payload_slot
                )));
            }
            if payload.iter().any(|v| *v >= params.enc.plain_modulus) {
                return Err(Error::BfvModulusOverflow);
            }
        }

        let ctx = BfvContext::new(params.enc.clone());
        let encoded_db = if params.is_compress {
            Self::encode_with_compress(&params, &ctx, raw_db)?
        } else {
            Self::encode_without_compress(&params, &ctx, raw_db)?
        };
        debug!(
            "pir server: encoded {} plaintexts ({} payloads, col_size {}, bundle_size {})",
            encoded_db.len(),
            params.num_payloads,
            params.col_size,
            params.bundle_size
        );
        Ok(Self {
            params,
            ctx,
            encoded_db,
            relin_keys: None,
        })
    }

    /// Installs the client's relinearization keys.
    pub(crate) fn set_keys(&mut self, keys: RelinKeys) {
        self.relin_keys = Some(keys);
    }

    /// Uncompressed layout: one plaintext per `(payload slot, column, bundle)`; row `i` of
    /// bundle `b` is table row `b·N + i`. Dummy cells carry 1 (a zero could make a whole
    /// polynomial transparent).
    fn encode_without_compress(
        params: &PirParams,
        ctx: &BfvContext,
        raw_db: &[Vec<u64>],
    ) -> Result<Vec<Plaintext>, Error> {
        let n = params.enc.poly_degree;
        let db_pt_size = params.num_payload_slot * params.col_size * params.bundle_size;

        (0..db_pt_size)
            .into_par_iter()
            .map(|pt_index| {
                let pl_slot = pt_index / (params.col_size * params.bundle_size);
                let rest = pt_index % (params.col_size * params.bundle_size);
                let col = rest / params.bundle_size;
                let bundle = rest % params.bundle_size;

                let mut plain_vector = vec![1u64; n];
                for (i, value) in plain_vector.iter_mut().enumerate() {
                    let row = &params.bucket[bundle * n + i];
                    if col < row.len() {
                        *value = raw_db[row[col] as usize][pl_slot];
                    }
                }
                let mut plain = ctx.encode(&plain_vector)?;
                ctx.transform_plain_to_ntt_inplace(&mut plain);
                Ok(plain)
            })
            .collect()
    }

    /// Compressed layout: table row `i` occupies `num_slot` consecutive slots starting at
    /// `i·num_slot`; payload slot `pl·num_slot + s` of the row's entry lands in plaintext
    /// group `pl` at offset `(i·num_slot + s) mod N` of bundle `(i·num_slot + s) / N`.
    fn encode_with_compress(
        params: &PirParams,
        ctx: &BfvContext,
        raw_db: &[Vec<u64>],
    ) -> Result<Vec<Plaintext>, Error> {
        let n = params.enc.poly_degree;
        let num_groups = params.num_response_slot();

        let groups: Vec<Vec<Plaintext>> = (0..num_groups * params.col_size)
            .into_par_iter()
            .map(|group_index| {
                let pl = group_index / params.col_size;
                let col = group_index % params.col_size;

                let mut vectors = vec![vec![1u64; n]; params.bundle_size];
                for i in 0..params.table_size {
                    let row = &params.bucket[i];
                    if col >= row.len() {
                        continue;
                    }
                    let payload = &raw_db[row[col] as usize];
                    for s in 0..params.num_slot {
                        let payload_slot = pl * params.num_slot + s;
                        if payload_slot >= params.num_payload_slot {
                            break;
                        }
                        let pos = i * params.num_slot + s;
                        vectors[pos / n][pos % n] = payload[payload_slot];
                    }
                }

                vectors
                    .into_iter()
                    .map(|v| {
                        let mut plain = ctx.encode(&v)?;
                        ctx.transform_plain_to_ntt_inplace(&mut plain);
                        Ok(plain)
                    })
                    .collect::<Result<Vec<_>, Error>>()
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Flatten in (pl, col, bundle) order.
        Ok(groups.into_iter().flatten().collect())
    }

    /// Builds the selection vector: for each column's codeword `(a, b)` and each bundle,
    /// `q_{a·bundle_size+bundle} · q_{b·bundle_size+bundle}`, relinearized and moved to NTT
    /// form for the plaintext products that follow.
    fn gen_selection_vector_batch(
        &self,
        query: &[Ciphertext],
    ) -> Result<Vec<Ciphertext>, Error> {
        let relin_keys = self
            .relin_keys
            .as_ref()
            .ok_or(Error::UnexpectedMessageType)?;
        let bundle_size = self.params.bundle_size;
        let mut selection = Vec::with_capacity(self.params.col_size * bundle_size);

        for col in 0..self.params.col_size {
            let (a, b) = self.params.cw_index[col];
            for bundle in 0..bundle_size {
                let mut product = self.ctx.multiply(
                    &query[b * bundle_size + bundle],
                    &query[a * bundle_size + bundle],
                )?;
                self.ctx.relinearize_inplace(&mut product, relin_keys)?;
                self.ctx.transform_to_ntt_inplace(&mut product);
                selection.push(product);
            }
        }
        Ok(selection)
    }

    /// Consumes a serialized query and produces the serialized response, `response_ct_count`
    /// ciphertexts in `(payload group, bundle)` order, each mod-switched to the last level
    /// with irrelevant bits cleared.
    pub(crate) fn gen_batch_response(&self, query_bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let query: Vec<Ciphertext> = bincode::deserialize(query_bytes)?;
        if query.len() != self.params.query_ct_count() {
            return Err(Error::InputShape(format!(
                "query holds {} ciphertexts, expected {}",
                query.len(),
                self.params.query_ct_count()
            )));
        }

        let selection = self.gen_selection_vector_batch(&query)?;

        let bundle_size = self.params.bundle_size;
        let col_size = self.params.col_size;
        let mut response = Vec::with_capacity(self.params.response_ct_count());
        for pl in 0..self.params.num_response_slot() {
            for bundle in 0..bundle_size {
                let mut sum: Option<Ciphertext> = None;
                for col in 0..col_size {
                    let sel = &selection[col * bundle_size + bundle];
                    let db_plain =
                        &self.encoded_db[pl * col_size * bundle_size + col * bundle_size + bundle];
                    let product = self.ctx.multiply_plain(sel, db_plain);
                    match sum.as_mut() {
                        None => sum = Some(product),
                        Some(acc) => self.ctx.add_inplace(acc, &product),
                    }
                }
                let mut sum = sum.ok_or_else(|| {
                    Error::InputShape("response over an empty column set".into())
                })?;
                self.ctx.transform_from_ntt_inplace(&mut sum);
                self.ctx.mod_switch_to_last_inplace(&mut sum);
                self.ctx.clear_irrelevant_bits(&mut sum);
                response.push(sum);
            }
        }

        Ok(bincode::serialize(&response)?)
    }
}
