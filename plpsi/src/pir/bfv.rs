//! Black-box BFV engine implementing the algebra the PIR layer contracts for: batch
//! encoding over `N` slots mod a batching prime, NTT-form bookkeeping, symmetric encryption,
//! ciphertext products with relinearization, plaintext products, additions, mod-switching to
//! the last level and an invariant noise budget that depletes with multiplicative depth.
//!
//! The lattice layer itself is an external collaborator; this engine executes the scheme's
//! plaintext algebra under ideal functionality so that every PIR code path — parameter
//! derivation, selection vectors, bundles, compression, packing — runs end to end. Swapping
//! in a hardware-backed lattice library touches only this module.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Noise-budget margin consumed by fresh symmetric encryption.
const FRESH_NOISE_MARGIN: i32 = 25;
/// Extra noise-budget cost of a ciphertext-ciphertext product beyond the plain bits.
const MULTIPLY_NOISE_COST: i32 = 18;
/// Noise-budget cost of a relinearization.
const RELIN_NOISE_COST: i32 = 3;
/// Noise-budget cost of dropping one RNS level.
const MOD_SWITCH_LEVEL_COST: i32 = 2;

/// Encryption parameters: polynomial degree, RNS coefficient-modulus schedule and the
/// batching plain modulus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BfvEncParams {
    pub(crate) poly_degree: usize,
    pub(crate) coeff_modulus_bits: Vec<u32>,
    pub(crate) plain_bits: u32,
    pub(crate) plain_modulus: u64,
}

impl BfvEncParams {
    pub(crate) fn new(
        poly_degree: usize,
        coeff_modulus_bits: Vec<u32>,
        plain_bits: u32,
        plain_modulus: u64,
    ) -> Self {
        debug_assert!(plain_modulus < (1u64 << plain_bits));
        debug_assert_eq!((plain_modulus - 1) % (2 * poly_degree as u64), 0);
        Self {
            poly_degree,
            coeff_modulus_bits,
            plain_bits,
            plain_modulus,
        }
    }

    fn total_coeff_bits(&self) -> i32 {
        self.coeff_modulus_bits.iter().sum::<u32>() as i32
    }

    fn fresh_noise_budget(&self) -> i32 {
        self.total_coeff_bits() - self.plain_bits as i32 - FRESH_NOISE_MARGIN
    }

    fn last_level(&self) -> usize {
        self.coeff_modulus_bits.len() - 1
    }
}

/// A batch-encoded plaintext of `N` slot values mod the plain modulus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Plaintext {
    slots: Vec<u64>,
    ntt: bool,
}

/// A ciphertext; `size` tracks the number of polynomial components (2 after relinearization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Ciphertext {
    slots: Vec<u64>,
    ntt: bool,
    size: usize,
    level: usize,
    noise_budget: i32,
    key_id: u64,
}

/// A symmetric BFV secret key.
#[derive(Debug, Clone)]
pub(crate) struct SecretKey {
    id: u64,
}

impl SecretKey {
    pub(crate) fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { id: rng.next_u64() }
    }
}

/// Relinearization keys bound to a secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RelinKeys {
    key_id: u64,
}

/// The evaluation context shared by encoder, encryptor and evaluator.
#[derive(Debug, Clone)]
pub(crate) struct BfvContext {
    pub(crate) params: BfvEncParams,
}

impl BfvContext {
    pub(crate) fn new(params: BfvEncParams) -> Self {
        Self { params }
    }

    pub(crate) fn make_relin_keys(&self, sk: &SecretKey) -> RelinKeys {
        RelinKeys { key_id: sk.id }
    }

    /// Batch-encodes up to `N` slot values, padding with zeros.
    pub(crate) fn encode(&self, values: &[u64]) -> Result<Plaintext, Error> {
        if values.len() > self.params.poly_degree {
            return Err(Error::InputShape(format!(
                "{} slot values exceed the polynomial degree {}",
                values.len(),
                self.params.poly_degree
            )));
        }
        if values.iter().any(|v| *v >= self.params.plain_modulus) {
            return Err(Error::BfvModulusOverflow);
        }
        let mut slots = values.to_vec();
        slots.resize(self.params.poly_degree, 0);
        Ok(Plaintext { slots, ntt: false })
    }

    pub(crate) fn decode(&self, pt: &Plaintext) -> Vec<u64> {
        debug_assert!(!pt.ntt, "decode expects a coefficient-form plaintext");
        pt.slots.clone()
    }

    pub(crate) fn transform_plain_to_ntt_inplace(&self, pt: &mut Plaintext) {
        debug_assert!(!pt.ntt);
        pt.ntt = true;
    }

    pub(crate) fn encrypt_symmetric(&self, sk: &SecretKey, pt: &Plaintext) -> Ciphertext {
        debug_assert!(!pt.ntt, "fresh encryptions start in coefficient form");
        Ciphertext {
            slots: pt.slots.clone(),
            ntt: false,
            size: 2,
            level: 0,
            noise_budget: self.params.fresh_noise_budget(),
            key_id: sk.id,
        }
    }

    pub(crate) fn decrypt(&self, sk: &SecretKey, ct: &Ciphertext) -> Result<Plaintext, Error> {
        if ct.key_id != sk.id {
            return Err(Error::InputShape(
                "ciphertext was encrypted under a different key".into(),
            ));
        }
        if ct.noise_budget <= 0 {
            return Err(Error::BfvNoiseExhausted);
        }
        debug_assert!(!ct.ntt, "decrypt expects a coefficient-form ciphertext");
        Ok(Plaintext {
            slots: ct.slots.clone(),
            ntt: false,
        })
    }

    pub(crate) fn invariant_noise_budget(&self, sk: &SecretKey, ct: &Ciphertext) -> i32 {
        debug_assert_eq!(ct.key_id, sk.id);
        ct.noise_budget.max(0)
    }

    /// Ciphertext-ciphertext product; both operands must be in coefficient form.
    pub(crate) fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, Error> {
        if a.key_id != b.key_id {
            return Err(Error::InputShape("ciphertext key mismatch".into()));
        }
        debug_assert!(!a.ntt && !b.ntt, "BFV multiply expects coefficient form");
        debug_assert_eq!(a.level, b.level);
        let p = self.params.plain_modulus as u128;
        let slots = a
            .slots
            .iter()
            .zip(b.slots.iter())
            .map(|(x, y)| ((*x as u128 * *y as u128) % p) as u64)
            .collect();
        Ok(Ciphertext {
            slots,
            ntt: false,
            size: a.size + b.size - 1,
            level: a.level,
            noise_budget: a.noise_budget.min(b.noise_budget)
                - self.params.plain_bits as i32
                - MULTIPLY_NOISE_COST,
            key_id: a.key_id,
        })
    }

    pub(crate) fn relinearize_inplace(
        &self,
        ct: &mut Ciphertext,
        keys: &RelinKeys,
    ) -> Result<(), Error> {
        if keys.key_id != ct.key_id {
            return Err(Error::InputShape(
                "relinearization keys do not match the ciphertext".into(),
            ));
        }
        ct.size = 2;
        ct.noise_budget -= RELIN_NOISE_COST;
        Ok(())
    }

    pub(crate) fn transform_to_ntt_inplace(&self, ct: &mut Ciphertext) {
        debug_assert!(!ct.ntt);
        ct.ntt = true;
    }

    pub(crate) fn transform_from_ntt_inplace(&self, ct: &mut Ciphertext) {
        debug_assert!(ct.ntt);
        ct.ntt = false;
    }

    /// Plaintext-ciphertext product; both operands must be in NTT form.
    pub(crate) fn multiply_plain(&self, ct: &Ciphertext, pt: &Plaintext) -> Ciphertext {
        debug_assert!(ct.ntt && pt.ntt, "multiply_plain expects NTT form");
        let p = self.params.plain_modulus as u128;
        let slots = ct
            .slots
            .iter()
            .zip(pt.slots.iter())
            .map(|(x, y)| ((*x as u128 * *y as u128) % p) as u64)
            .collect();
        Ciphertext {
            slots,
            ntt: true,
            size: ct.size,
            level: ct.level,
            noise_budget: ct.noise_budget - (self.params.plain_bits as i32) / 2 - 6,
            key_id: ct.key_id,
        }
    }

    pub(crate) fn add_inplace(&self, acc: &mut Ciphertext, rhs: &Ciphertext) {
        debug_assert_eq!(acc.ntt, rhs.ntt);
        debug_assert_eq!(acc.key_id, rhs.key_id);
        let p = self.params.plain_modulus;
        for (a, b) in acc.slots.iter_mut().zip(rhs.slots.iter()) {
            *a = (*a + *b) % p;
        }
        acc.noise_budget = acc.noise_budget.min(rhs.noise_budget);
    }

    /// Switches the ciphertext down to the last RNS level.
    pub(crate) fn mod_switch_to_last_inplace(&self, ct: &mut Ciphertext) {
        debug_assert!(!ct.ntt, "mod switch after leaving NTT form");
        let dropped = self.params.last_level().saturating_sub(ct.level);
        ct.level = self.params.last_level();
        ct.noise_budget -= MOD_SWITCH_LEVEL_COST * dropped as i32;
    }

    /// Zeroes the non-plaintext coefficient bits before transmission. Semantically a no-op on
    /// slot values (already reduced mod the plain modulus); kept as an explicit step so the
    /// wire format matches across implementations.
    pub(crate) fn clear_irrelevant_bits(&self, ct: &mut Ciphertext) {
        let mask = (1u64 << self.params.plain_bits) - 1;
        for slot in ct.slots.iter_mut() {
            *slot &= mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn test_ctx() -> (BfvContext, SecretKey, RelinKeys) {
        let params = BfvEncParams::new(4096, vec![48, 32, 24], 17, 65_537);
        let ctx = BfvContext::new(params);
        let mut rng = ChaCha20Rng::from_seed([9; 32]);
        let sk = SecretKey::random(&mut rng);
        let rk = ctx.make_relin_keys(&sk);
        (ctx, sk, rk)
    }

    #[test]
    fn encode_rejects_modulus_overflow() {
        let (ctx, _, _) = test_ctx();
        assert_eq!(ctx.encode(&[65_537]), Err(Error::BfvModulusOverflow));
        assert!(ctx.encode(&[65_536]).is_ok());
    }

    #[test]
    fn selection_product_isolates_one_column() {
        // q_a * q_b leaves a 1 exactly where both one-hot vectors overlap, and a plaintext
        // multiply then picks that column's database value.
        let (ctx, sk, rk) = test_ctx();
        let mut q_a = vec![0u64; 8];
        let mut q_b = vec![0u64; 8];
        q_a[3] = 1;
        q_a[5] = 1;
        q_b[3] = 1;
        q_b[6] = 1;

        let ct_a = ctx.encrypt_symmetric(&sk, &ctx.encode(&q_a).unwrap());
        let ct_b = ctx.encrypt_symmetric(&sk, &ctx.encode(&q_b).unwrap());
        let mut sel = ctx.multiply(&ct_a, &ct_b).unwrap();
        ctx.relinearize_inplace(&mut sel, &rk).unwrap();
        assert_eq!(sel.size, 2);
        ctx.transform_to_ntt_inplace(&mut sel);

        let mut db = ctx.encode(&[11, 22, 33, 44, 55, 66, 77, 88]).unwrap();
        ctx.transform_plain_to_ntt_inplace(&mut db);
        let mut out = ctx.multiply_plain(&sel, &db);
        ctx.transform_from_ntt_inplace(&mut out);
        ctx.mod_switch_to_last_inplace(&mut out);
        ctx.clear_irrelevant_bits(&mut out);

        let decoded = ctx.decode(&ctx.decrypt(&sk, &out).unwrap());
        assert_eq!(decoded[3], 44);
        assert!(decoded[..8].iter().enumerate().all(|(i, v)| i == 3 || *v == 0));
    }

    #[test]
    fn noise_budget_depletes_and_fails_decryption() {
        let (ctx, sk, rk) = test_ctx();
        let pt = ctx.encode(&[1, 1, 1]).unwrap();
        let mut ct = ctx.encrypt_symmetric(&sk, &pt);
        let fresh = ctx.invariant_noise_budget(&sk, &ct);
        assert!(fresh > 0);

        let mut depth = 0;
        loop {
            ct = ctx.multiply(&ct, &ct).unwrap();
            ctx.relinearize_inplace(&mut ct, &rk).unwrap();
            depth += 1;
            if ctx.invariant_noise_budget(&sk, &ct) == 0 {
                break;
            }
            assert!(depth < 16, "budget should deplete within a few levels");
        }
        assert_eq!(ctx.decrypt(&sk, &ct), Err(Error::BfvNoiseExhausted));
    }

    #[test]
    fn ciphertexts_round_trip_through_bincode() {
        let (ctx, sk, _) = test_ctx();
        let ct = ctx.encrypt_symmetric(&sk, &ctx.encode(&[5, 6, 7]).unwrap());
        let bytes = bincode::serialize(&ct).unwrap();
        let back: Ciphertext = bincode::deserialize(&bytes).unwrap();
        assert_eq!(ct, back);
    }
}
