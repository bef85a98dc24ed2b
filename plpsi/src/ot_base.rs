//! Chou-Orlandi Simplest OT base protocol based on a version from [ABKLX21], instantiated
//! over Ristretto.
//!
//! One run transfers two 32-byte seeds of which the receiver recovers exactly the chosen one.
//! The OT extension sets up [`crate::oos_ot::K`] of these as a fresh batch per session.
//!
//! [ABKLX21]: https://eprint.iacr.org/2021/1218.pdf

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;

use crate::Error;

pub(crate) const SEED_LEN: usize = 32;

/// The type of (random) seed exchanged via the base OT protocol.
pub(crate) type OtSeed = [u8; SEED_LEN];

/// A compressed Ristretto point on the wire.
pub(crate) type PointBytes = [u8; 32];

/// The party offering two seeds of which the [`BaseReceiver`] recovers one.
#[derive(Clone)]
pub(crate) struct BaseSender {
    private_key: Scalar,
    pub_key: RistrettoPoint,
    pub_key_squared: RistrettoPoint,
}

/// The party choosing 1-out-of-2 seeds without the [`BaseSender`] learning which.
#[derive(Clone)]
pub(crate) struct BaseReceiver {
    private_key: Scalar,
    upstream_pub_key: RistrettoPoint,
    choice: bool,
}

fn decompress(bytes: &PointBytes) -> Result<RistrettoPoint, Error> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(Error::OtDeserialization)
}

fn hash_shared(pub_key_bytes: &[u8; 32], shared: &RistrettoPoint) -> OtSeed {
    let mut hasher = blake3::Hasher::new();
    hasher.update(pub_key_bytes);
    hasher.update(&shared.compress().to_bytes());
    let mut out = [0u8; SEED_LEN];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..SEED_LEN]);
    out
}

fn xor_seeds(lhs: &OtSeed, rhs: &OtSeed) -> OtSeed {
    let mut result = [0u8; SEED_LEN];
    for idx in 0..SEED_LEN {
        result[idx] = lhs[idx] ^ rhs[idx];
    }
    result
}

impl BaseSender {
    pub(crate) fn new<RNG>(rng: &mut RNG) -> Self
    where
        RNG: rand::RngCore + rand::CryptoRng,
    {
        let private_key = Scalar::random::<RNG>(rng);
        let pub_key = RISTRETTO_BASEPOINT_TABLE * &private_key;
        let pub_key_squared = pub_key * private_key;
        Self {
            private_key,
            pub_key,
            pub_key_squared,
        }
    }

    /// Step 1: the sender's public key, sent to the receiver.
    pub(crate) fn init_message(&self) -> PointBytes {
        self.pub_key.compress().to_bytes()
    }

    /// Step 3: blinds both seeds against the receiver's key.
    ///
    /// Computes `e_b = H(A, U^y B^{-b}) XOR m_b` with `A` the sender key, `U` the receiver's
    /// reply and `B = A^y`.
    pub(crate) fn send(
        &self,
        upstream_reply: &PointBytes,
        seeds: &[OtSeed; 2],
    ) -> Result<[OtSeed; 2], Error> {
        let upstream_pub_key = decompress(upstream_reply)?;
        let my_pub_key_bytes = self.pub_key.compress().to_bytes();

        let shared0 = upstream_pub_key * self.private_key;
        let key0 = xor_seeds(&hash_shared(&my_pub_key_bytes, &shared0), &seeds[0]);

        let shared1 = shared0 - self.pub_key_squared;
        let key1 = xor_seeds(&hash_shared(&my_pub_key_bytes, &shared1), &seeds[1]);

        Ok([key0, key1])
    }
}

impl BaseReceiver {
    /// Step 2: answers the sender's public key with `g^x` or `A·g^x` depending on the choice.
    pub(crate) fn init<RNG>(
        rng: &mut RNG,
        upstream_init: &PointBytes,
        choice: bool,
    ) -> Result<(PointBytes, Self), Error>
    where
        RNG: rand::RngCore + rand::CryptoRng,
    {
        let upstream_pub_key = decompress(upstream_init)?;
        let private_key = Scalar::random(rng);
        let my_pub_key = RISTRETTO_BASEPOINT_TABLE * &private_key;

        let chosen_pub_key = if choice {
            upstream_pub_key + my_pub_key
        } else {
            my_pub_key
        };

        Ok((
            chosen_pub_key.compress().to_bytes(),
            Self {
                private_key,
                upstream_pub_key,
                choice,
            },
        ))
    }

    /// Step 4: recovers the chosen seed from the sender's blinded pair.
    pub(crate) fn recv(self, blinded: &[OtSeed; 2]) -> OtSeed {
        let upstream_bytes = self.upstream_pub_key.compress().to_bytes();
        let shared = self.upstream_pub_key * self.private_key;
        let key = hash_shared(&upstream_bytes, &shared);
        xor_seeds(&key, &blinded[usize::from(self.choice)])
    }
}

#[test]
fn test_base_ot() {
    use rand::RngCore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng_send = ChaCha20Rng::from_entropy();
    let mut rng_recv = ChaCha20Rng::from_entropy();

    for choice in [false, true] {
        let mut seeds = [[0u8; SEED_LEN]; 2];
        rng_send.fill_bytes(&mut seeds[0]);
        rng_send.fill_bytes(&mut seeds[1]);

        let sender = BaseSender::new(&mut rng_send);
        let init = sender.init_message();
        let (reply, receiver) = BaseReceiver::init(&mut rng_recv, &init, choice).unwrap();
        let blinded = sender.send(&reply, &seeds).unwrap();

        let seed = receiver.recv(&blinded);
        assert_eq!(seed, seeds[usize::from(choice)]);
        assert_ne!(seed, seeds[usize::from(!choice)]);
    }
}
