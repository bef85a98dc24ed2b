//! NIST P-256 group operations backing the DH-OPRF phase.
//!
//! `map_to_point` is deterministic try-and-increment: hash `data ‖ counter_u32_be`, interpret
//! the digest as an x-coordinate and accept the first counter yielding a curve point with an
//! even y. All points travel as 33-byte compressed SEC1 encodings.

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::Field;
use p256::{AffinePoint, EncodedPoint, ProjectivePoint, Scalar};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::Error;

/// Length of a compressed P-256 point encoding.
pub(crate) const POINT_LEN: usize = 33;

/// Samples a uniformly random nonzero scalar in `[1, order)`.
pub(crate) fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    loop {
        let scalar = Scalar::random(&mut *rng);
        if !bool::from(scalar.is_zero()) {
            return scalar;
        }
    }
}

/// Inverts a scalar mod the group order.
pub(crate) fn invert_scalar(scalar: &Scalar) -> Result<Scalar, Error> {
    Option::<Scalar>::from(scalar.invert()).ok_or(Error::DecodeFailure)
}

/// Hash-to-curve by try-and-increment.
///
/// The even-y choice makes the mapping deterministic; the counter rarely exceeds a handful of
/// iterations since roughly half of all x-candidates lie on the curve.
pub(crate) fn map_to_point(data: &[u8]) -> ProjectivePoint {
    let mut counter: u32 = 0;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();

        let mut candidate = [0u8; POINT_LEN];
        candidate[0] = 0x02; // compressed tag, even y
        candidate[1..].copy_from_slice(&digest);

        if let Ok(encoded) = EncodedPoint::from_bytes(candidate) {
            let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded));
            if let Some(point) = affine {
                return ProjectivePoint::from(point);
            }
        }
        counter = counter.wrapping_add(1);
    }
}

/// Scalar multiplication `point * scalar`.
pub(crate) fn scalar_mul(point: &ProjectivePoint, scalar: &Scalar) -> ProjectivePoint {
    point * scalar
}

/// Serializes a point into its 33-byte compressed encoding.
pub(crate) fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Parses a compressed point encoding, with an explicit error on malformed bytes.
pub(crate) fn bytes_to_point(bytes: &[u8]) -> Result<ProjectivePoint, Error> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Error::DecodeFailure)?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .map(ProjectivePoint::from)
        .ok_or(Error::DecodeFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn map_to_point_is_deterministic() {
        let a = map_to_point(b"alice");
        let b = map_to_point(b"alice");
        assert_eq!(point_to_bytes(&a), point_to_bytes(&b));
        assert_ne!(point_to_bytes(&a), point_to_bytes(&map_to_point(b"bob")));
        assert_eq!(point_to_bytes(&a).len(), POINT_LEN);
    }

    #[test]
    fn point_encoding_round_trips() {
        let point = map_to_point(b"round-trip");
        let bytes = point_to_bytes(&point);
        let back = bytes_to_point(&bytes).unwrap();
        assert_eq!(bytes, point_to_bytes(&back));

        assert_eq!(bytes_to_point(&[0u8; POINT_LEN]), Err(Error::DecodeFailure));
        assert_eq!(bytes_to_point(b"short"), Err(Error::DecodeFailure));
    }

    #[test]
    fn oprf_exponents_commute() {
        // (H(y)^{r_c})^{r_s} unblinded by r_c^{-1} equals H(y)^{r_s}.
        let mut rng = ChaCha20Rng::from_seed([1; 32]);
        let r_c = random_scalar(&mut rng);
        let r_s = random_scalar(&mut rng);
        let r_c_inv = invert_scalar(&r_c).unwrap();

        let base = map_to_point(b"query");
        let blinded = scalar_mul(&base, &r_c);
        let evaluated = scalar_mul(&blinded, &r_s);
        let unblinded = scalar_mul(&evaluated, &r_c_inv);

        assert_eq!(
            point_to_bytes(&unblinded),
            point_to_bytes(&scalar_mul(&base, &r_s))
        );
    }
}
