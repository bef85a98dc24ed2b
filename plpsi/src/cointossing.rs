//! A simple commit-reveal coin tossing protocol.
//!
//! Used to jointly sample the challenge seed of the OT consistency check: the OT receiver
//! commits to its coin alongside its corrections, the sender answers with its own coin in the
//! clear, and the receiver then opens the commitment. Neither party can bias the combined
//! seed without being caught.

use crate::Error;

/// Number of bytes of a coin.
pub(crate) const COIN_LEN: usize = 32;

/// Result of the coin tossing protocol.
pub(crate) type CoinResult = [u8; COIN_LEN];

/// Commits to a coin.
pub(crate) fn commit(coin: &[u8; COIN_LEN]) -> [u8; blake3::OUT_LEN] {
    *blake3::hash(coin).as_bytes()
}

/// Verifies an opened coin against its commitment and combines both shares.
pub(crate) fn finish(
    commitment: &[u8; blake3::OUT_LEN],
    opened_coin: &[u8; COIN_LEN],
    own_coin: &[u8; COIN_LEN],
) -> Result<CoinResult, Error> {
    if commit(opened_coin) != *commitment {
        return Err(Error::MaliciousOtReject);
    }
    Ok(combine(opened_coin, own_coin))
}

/// XOR of two coin shares.
pub(crate) fn combine(lhs: &[u8; COIN_LEN], rhs: &[u8; COIN_LEN]) -> CoinResult {
    let mut result = [0u8; COIN_LEN];
    for i in 0..COIN_LEN {
        result[i] = lhs[i] ^ rhs[i];
    }
    result
}

#[test]
fn test_cointossing() {
    let coin1 = [0x55u8; COIN_LEN];
    let coin2 = [0xAAu8; COIN_LEN];
    let commitment = commit(&coin1);

    // The honest opening combines to the XOR of both shares.
    assert_eq!(finish(&commitment, &coin1, &coin2).unwrap(), [0xFF; COIN_LEN]);

    // A single flipped bit in the opening is caught.
    let mut tampered = coin1;
    tampered[7] ^= 0x04;
    assert_eq!(
        finish(&commitment, &tampered, &coin2),
        Err(Error::MaliciousOtReject)
    );
}
