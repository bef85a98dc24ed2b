//! Malicious OOS-style N-choose-1 OT extension.
//!
//! [`crate::ot_base`] establishes `K = 128` seed pairs whose column RNGs drive the extension.
//! Per instance the receiver's choice is encoded through a public binary linear code
//! `C : {0,1}^b -> {0,1}^128`; corrections `u_i = t0_i ^ t1_i ^ C(w_i)` travel in batches of
//! 128 rows. In malicious mode both parties coin-toss a challenge seed and the receiver opens
//! `stat_sec` blinded linear combinations of its rows, which the sender verifies against
//! `q_i = t0_i ^ (Δ & C(w_i))` before releasing anything. Delivery is `T·N` masked 32-byte
//! blocks in `(instance, choice)` row-major order, padded with `H(i, q_i ^ (Δ & C(w)))`.

use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::cointossing;
use crate::config::{OT_DATA_SIZE, OT_STAT_SEC};
use crate::ot_base::{BaseReceiver, BaseSender, OtSeed, PointBytes};
use crate::Error;

/// Number of base OTs / code length; rows of the extension matrix are `u128`s.
pub(crate) const K: usize = 128;

/// Rows per correction batch (also the transpose block size).
pub(crate) const CORRECTION_BATCH: usize = 128;

/// One OT-delivered block.
pub(crate) type OtBlock = [u8; OT_DATA_SIZE];

/// The public linear code mapping `b`-bit choices to 128-bit codewords.
///
/// The generator matrix is derived from a fixed domain-separation string, so both parties
/// hold the same code without exchanging it.
#[derive(Debug, Clone)]
pub(crate) struct OtCode {
    bit_count: usize,
    generator: Vec<u128>,
}

impl OtCode {
    pub(crate) fn new(bit_count: usize) -> Self {
        debug_assert!(bit_count >= 1 && bit_count <= 64);
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"plpsi-oos-code-v1");
        let mut reader = hasher.finalize_xof();
        let mut generator = Vec::with_capacity(bit_count);
        for _ in 0..bit_count {
            let mut word = [0u8; 16];
            reader.fill(&mut word);
            generator.push(u128::from_le_bytes(word));
        }
        Self {
            bit_count,
            generator,
        }
    }

    pub(crate) fn encode(&self, w: u64) -> u128 {
        let mut codeword = 0u128;
        for (j, row) in self.generator.iter().enumerate() {
            if (w >> j) & 1 == 1 {
                codeword ^= row;
            }
        }
        codeword
    }

    fn mask(&self, w: u64) -> u64 {
        if self.bit_count == 64 {
            w
        } else {
            w & ((1u64 << self.bit_count) - 1)
        }
    }
}

/// Collection of messages exchanged between OT sender and receiver.
pub(crate) mod message {
    use super::*;

    /// Receiver → sender: the K base-OT public keys.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct BaseInit {
        pub(crate) points: Vec<PointBytes>,
    }

    /// Sender → receiver: the K Δ-dependent base-OT replies.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct BaseChoices {
        pub(crate) points: Vec<PointBytes>,
    }

    /// Receiver → sender: the K blinded seed pairs closing the base OTs.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct BaseReplies {
        pub(crate) replies: Vec<[OtSeed; 2]>,
    }

    /// Receiver → sender: choice corrections in batches of [`CORRECTION_BATCH`], plus the
    /// receiver's coin commitment for the check phase.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct Corrections {
        pub(crate) batches: Vec<Vec<u128>>,
        pub(crate) coin_commitment: [u8; 32],
    }

    /// Sender → receiver: the sender's coin share, in the clear (the receiver is already
    /// committed).
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct SenderCoin {
        pub(crate) coin: [u8; cointossing::COIN_LEN],
    }

    /// Receiver → sender: the coin opening plus the blinded check combinations.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct ConsistencyCheck {
        pub(crate) coin_opening: [u8; cointossing::COIN_LEN],
        pub(crate) t_hats: Vec<u128>,
        pub(crate) w_hats: Vec<u64>,
    }

    /// Sender → receiver: `T·N` masked blocks in `(instance, choice)` row-major order.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct MaskedInputs {
        pub(crate) blocks: Vec<OtBlock>,
    }
}

/// Transposes one block of K column words into [`CORRECTION_BATCH`] row words.
fn transpose_block(cols: &[u128; K]) -> Vec<u128> {
    let mut rows = vec![0u128; CORRECTION_BATCH];
    for (r, row) in rows.iter_mut().enumerate() {
        let mut value = 0u128;
        for (j, col) in cols.iter().enumerate() {
            value |= (((col >> r) & 1) as u128) << j;
        }
        *row = value;
    }
    rows
}

/// Challenge coefficient words for one check; both parties derive these identically from the
/// tossed seed.
fn challenge_words(rng: &mut ChaCha20Rng, num_real: usize) -> Vec<u64> {
    (0..num_real.div_ceil(64)).map(|_| rng.gen::<u64>()).collect()
}

fn challenge_bit(words: &[u64], i: usize) -> bool {
    (words[i / 64] >> (i % 64)) & 1 == 1
}

/// Derives the 32-byte pad of instance `i` from its row encoding.
fn pad_hash(instance: usize, encoding: u128) -> OtBlock {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"plpsi-oos-pad");
    hasher.update(&(instance as u64).to_le_bytes());
    hasher.update(&encoding.to_le_bytes());
    let mut out = [0u8; OT_DATA_SIZE];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..OT_DATA_SIZE]);
    out
}

fn xor_block(lhs: &OtBlock, rhs: &OtBlock) -> OtBlock {
    let mut out = [0u8; OT_DATA_SIZE];
    for idx in 0..OT_DATA_SIZE {
        out[idx] = lhs[idx] ^ rhs[idx];
    }
    out
}

// ---------------------------------------------------------------------------
// Receiver states
// ---------------------------------------------------------------------------

/// Receiver before the base OTs complete: acts as base-OT *sender* for the K columns.
pub(crate) struct OosReceiverInit {
    senders: Vec<BaseSender>,
    seed_pairs: Vec<[OtSeed; 2]>,
}

impl OosReceiverInit {
    pub(crate) fn new<R: RngCore + CryptoRng>(rng: &mut R) -> (Self, message::BaseInit) {
        let senders: Vec<BaseSender> = (0..K).map(|_| BaseSender::new(rng)).collect();
        let points = senders.iter().map(|s| s.init_message()).collect();
        let seed_pairs = (0..K)
            .map(|_| {
                let mut pair = [[0u8; 32]; 2];
                rng.fill_bytes(&mut pair[0]);
                rng.fill_bytes(&mut pair[1]);
                pair
            })
            .collect();
        (
            Self {
                senders,
                seed_pairs,
            },
            message::BaseInit { points },
        )
    }

    pub(crate) fn on_base_choices(
        self,
        m: &message::BaseChoices,
    ) -> Result<(OosReceiverExt, message::BaseReplies), Error> {
        if m.points.len() != K {
            return Err(Error::OtDeserialization);
        }
        let mut replies = Vec::with_capacity(K);
        for (j, sender) in self.senders.iter().enumerate() {
            replies.push(sender.send(&m.points[j], &self.seed_pairs[j])?);
        }
        let otg0 = self
            .seed_pairs
            .iter()
            .map(|pair| ChaCha20Rng::from_seed(pair[0]))
            .collect();
        let otg1 = self
            .seed_pairs
            .iter()
            .map(|pair| ChaCha20Rng::from_seed(pair[1]))
            .collect();
        Ok((OosReceiverExt { otg0, otg1 }, message::BaseReplies { replies }))
    }
}

/// Receiver with live column RNGs, ready to encode choices.
pub(crate) struct OosReceiverExt {
    otg0: Vec<ChaCha20Rng>,
    otg1: Vec<ChaCha20Rng>,
}

impl OosReceiverExt {
    /// Encodes the choice vector (plus `stat_sec` blinding rows in malicious mode) into
    /// per-instance corrections.
    pub(crate) fn encode_choices(
        mut self,
        choices: &[usize],
        input_bit_count: usize,
        malicious: bool,
        rng: &mut ChaCha20Rng,
    ) -> Result<(OosReceiverPending, message::Corrections), Error> {
        let n = 1usize << input_bit_count;
        if choices.iter().any(|c| *c >= n) {
            return Err(Error::InputShape(format!(
                "OT choice out of range for {input_bit_count}-bit instances"
            )));
        }
        let code = OtCode::new(input_bit_count);
        let blind_count = if malicious { OT_STAT_SEC } else { 0 };
        let mut ws: Vec<u64> = choices.iter().map(|c| *c as u64).collect();
        ws.extend((0..blind_count).map(|_| rng.gen_range(0..n as u64)));
        let total = ws.len();

        let mut t0_rows = Vec::with_capacity(total);
        let mut batches = Vec::with_capacity(total.div_ceil(CORRECTION_BATCH));
        for block in 0..total.div_ceil(CORRECTION_BATCH) {
            let mut cols0 = [0u128; K];
            let mut cols1 = [0u128; K];
            for j in 0..K {
                cols0[j] = self.otg0[j].gen::<u128>();
                cols1[j] = self.otg1[j].gen::<u128>();
            }
            let rows0 = transpose_block(&cols0);
            let rows1 = transpose_block(&cols1);

            let mut batch = Vec::with_capacity(CORRECTION_BATCH);
            for r in 0..CORRECTION_BATCH {
                let i = block * CORRECTION_BATCH + r;
                if i >= total {
                    break;
                }
                t0_rows.push(rows0[r]);
                batch.push(rows0[r] ^ rows1[r] ^ code.encode(ws[i]));
            }
            batches.push(batch);
        }

        let mut coin = [0u8; cointossing::COIN_LEN];
        rng.fill_bytes(&mut coin);
        let coin_commitment = cointossing::commit(&coin);

        Ok((
            OosReceiverPending {
                t0: t0_rows,
                ws,
                num_real: choices.len(),
                coin,
                malicious,
            },
            message::Corrections {
                batches,
                coin_commitment,
            },
        ))
    }
}

/// Receiver waiting for the sender's coin share.
#[derive(Debug)]
pub(crate) struct OosReceiverPending {
    t0: Vec<u128>,
    ws: Vec<u64>,
    num_real: usize,
    coin: [u8; cointossing::COIN_LEN],
    malicious: bool,
}

impl OosReceiverPending {
    pub(crate) fn on_sender_coin(
        self,
        m: &message::SenderCoin,
    ) -> (OosReceiverFinal, message::ConsistencyCheck) {
        let mut t_hats = Vec::new();
        let mut w_hats = Vec::new();
        if self.malicious {
            let seed = cointossing::combine(&self.coin, &m.coin);
            let mut challenge = ChaCha20Rng::from_seed(seed);
            for l in 0..OT_STAT_SEC {
                let words = challenge_words(&mut challenge, self.num_real);
                let mut t_hat = self.t0[self.num_real + l];
                let mut w_hat = self.ws[self.num_real + l];
                for i in 0..self.num_real {
                    if challenge_bit(&words, i) {
                        t_hat ^= self.t0[i];
                        w_hat ^= self.ws[i];
                    }
                }
                t_hats.push(t_hat);
                w_hats.push(w_hat);
            }
        }
        (
            OosReceiverFinal {
                t0: self.t0,
                ws: self.ws,
                num_real: self.num_real,
            },
            message::ConsistencyCheck {
                coin_opening: self.coin,
                t_hats,
                w_hats,
            },
        )
    }
}

/// Receiver ready to unmask its chosen blocks.
pub(crate) struct OosReceiverFinal {
    t0: Vec<u128>,
    ws: Vec<u64>,
    num_real: usize,
}

impl OosReceiverFinal {
    /// Keeps exactly the block at each instance's choice index and strips its pad.
    pub(crate) fn recover(
        &self,
        m: &message::MaskedInputs,
        input_bit_count: usize,
    ) -> Result<Vec<OtBlock>, Error> {
        let n = 1usize << input_bit_count;
        if m.blocks.len() != self.num_real * n {
            return Err(Error::OtDeserialization);
        }
        Ok((0..self.num_real)
            .map(|i| {
                let block = &m.blocks[i * n + self.ws[i] as usize];
                xor_block(block, &pad_hash(i, self.t0[i]))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Sender states
// ---------------------------------------------------------------------------

/// Sender before the base OTs complete: acts as base-OT *receiver* with Δ as its choices.
pub(crate) struct OosSenderInit {
    delta: u128,
    receivers: Vec<BaseReceiver>,
}

impl OosSenderInit {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        m: &message::BaseInit,
    ) -> Result<(Self, message::BaseChoices), Error> {
        if m.points.len() != K {
            return Err(Error::OtDeserialization);
        }
        let delta: u128 = rng.gen();
        let mut points = Vec::with_capacity(K);
        let mut receivers = Vec::with_capacity(K);
        for (j, point) in m.points.iter().enumerate() {
            let chosen = (delta >> j) & 1 == 1;
            let (reply, receiver) = BaseReceiver::init(rng, point, chosen)?;
            points.push(reply);
            receivers.push(receiver);
        }
        Ok((Self { delta, receivers }, message::BaseChoices { points }))
    }

    pub(crate) fn on_base_replies(
        self,
        m: &message::BaseReplies,
    ) -> Result<OosSenderExt, Error> {
        if m.replies.len() != K {
            return Err(Error::OtDeserialization);
        }
        let otg = self
            .receivers
            .into_iter()
            .zip(m.replies.iter())
            .map(|(receiver, reply)| ChaCha20Rng::from_seed(receiver.recv(reply)))
            .collect();
        Ok(OosSenderExt {
            delta: self.delta,
            otg,
        })
    }
}

/// Sender with live column RNGs, waiting for corrections.
pub(crate) struct OosSenderExt {
    delta: u128,
    otg: Vec<ChaCha20Rng>,
}

impl OosSenderExt {
    pub(crate) fn on_corrections<R: RngCore + CryptoRng>(
        mut self,
        m: &message::Corrections,
        num_instances: usize,
        input_bit_count: usize,
        malicious: bool,
        rng: &mut R,
    ) -> Result<(OosSenderPending, message::SenderCoin), Error> {
        let blind_count = if malicious { OT_STAT_SEC } else { 0 };
        let total = num_instances + blind_count;
        let corrections: Vec<u128> = m.batches.iter().flatten().copied().collect();
        if corrections.len() != total
            || m.batches.iter().any(|b| b.len() > CORRECTION_BATCH)
        {
            return Err(Error::OtDeserialization);
        }

        let mut q_rows = Vec::with_capacity(total);
        for block in 0..total.div_ceil(CORRECTION_BATCH) {
            let mut cols = [0u128; K];
            for j in 0..K {
                cols[j] = self.otg[j].gen::<u128>();
            }
            let rows = transpose_block(&cols);
            for r in 0..CORRECTION_BATCH {
                let i = block * CORRECTION_BATCH + r;
                if i >= total {
                    break;
                }
                q_rows.push(rows[r] ^ (self.delta & corrections[i]));
            }
        }

        let mut coin = [0u8; cointossing::COIN_LEN];
        rng.fill_bytes(&mut coin);
        Ok((
            OosSenderPending {
                delta: self.delta,
                q: q_rows,
                code: OtCode::new(input_bit_count),
                commitment: m.coin_commitment,
                coin,
                num_real: num_instances,
                malicious,
            },
            message::SenderCoin { coin },
        ))
    }
}

/// Sender holding `q_i = t0_i ^ (Δ & C(w_i))` rows, waiting for the check opening.
pub(crate) struct OosSenderPending {
    delta: u128,
    q: Vec<u128>,
    code: OtCode,
    commitment: [u8; 32],
    coin: [u8; cointossing::COIN_LEN],
    num_real: usize,
    malicious: bool,
}

impl OosSenderPending {
    /// Verifies the consistency check and, on success, releases the masked inputs.
    ///
    /// `inputs` holds one vector of `N` blocks per instance.
    pub(crate) fn on_check(
        self,
        m: &message::ConsistencyCheck,
        inputs: &[Vec<OtBlock>],
    ) -> Result<message::MaskedInputs, Error> {
        if inputs.len() != self.num_real {
            return Err(Error::InputShape(format!(
                "{} OT input vectors for {} instances",
                inputs.len(),
                self.num_real
            )));
        }
        let n = 1usize << self.code.bit_count;
        if inputs.iter().any(|row| row.len() != n) {
            return Err(Error::InputShape(format!(
                "every OT instance must offer exactly {n} inputs"
            )));
        }

        if self.malicious {
            if m.t_hats.len() != OT_STAT_SEC || m.w_hats.len() != OT_STAT_SEC {
                return Err(Error::OtDeserialization);
            }
            let seed = cointossing::finish(&self.commitment, &m.coin_opening, &self.coin)?;
            let mut challenge = ChaCha20Rng::from_seed(seed);
            for l in 0..OT_STAT_SEC {
                let words = challenge_words(&mut challenge, self.num_real);
                let mut q_hat = self.q[self.num_real + l];
                for i in 0..self.num_real {
                    if challenge_bit(&words, i) {
                        q_hat ^= self.q[i];
                    }
                }
                let expected =
                    m.t_hats[l] ^ (self.delta & self.code.encode(self.code.mask(m.w_hats[l])));
                if q_hat != expected {
                    return Err(Error::MaliciousOtReject);
                }
            }
        }

        let mut blocks = Vec::with_capacity(self.num_real * n);
        for (i, row) in inputs.iter().enumerate() {
            for (w, input) in row.iter().enumerate() {
                let encoding = self.q[i] ^ (self.delta & self.code.encode(w as u64));
                blocks.push(xor_block(input, &pad_hash(i, encoding)));
            }
        }
        Ok(message::MaskedInputs { blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Transcript {
        recovered: Vec<OtBlock>,
    }

    /// Drives a full OT session in memory, optionally tampering with the corrections.
    fn run_session(
        choices: &[usize],
        input_bit_count: usize,
        inputs: &[Vec<OtBlock>],
        tamper: bool,
    ) -> Result<Transcript, Error> {
        let mut rng_r = ChaCha20Rng::from_seed([31; 32]);
        let mut rng_s = ChaCha20Rng::from_seed([32; 32]);

        let (r_init, base_init) = OosReceiverInit::new(&mut rng_r);
        let (s_init, base_choices) = OosSenderInit::new(&mut rng_s, &base_init)?;
        let (r_ext, base_replies) = r_init.on_base_choices(&base_choices)?;
        let s_ext = s_init.on_base_replies(&base_replies)?;

        let (r_pending, mut corrections) =
            r_ext.encode_choices(choices, input_bit_count, true, &mut rng_r)?;
        if tamper {
            corrections.batches[0][0] ^= u128::MAX;
        }
        let (s_pending, sender_coin) =
            s_ext.on_corrections(&corrections, choices.len(), input_bit_count, true, &mut rng_s)?;
        let (r_final, check) = r_pending.on_sender_coin(&sender_coin);
        let masked = s_pending.on_check(&check, inputs)?;
        let recovered = r_final.recover(&masked, input_bit_count)?;
        Ok(Transcript { recovered })
    }

    fn test_inputs(num_instances: usize, n: usize) -> Vec<Vec<OtBlock>> {
        (0..num_instances)
            .map(|i| {
                (0..n)
                    .map(|w| {
                        let mut block = [0u8; OT_DATA_SIZE];
                        block[0] = i as u8;
                        block[1] = w as u8;
                        block[31] = 0xA5;
                        block
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn receiver_recovers_exactly_the_chosen_inputs() {
        let bit_count = 3;
        let n = 1 << bit_count;
        let choices = vec![0, 5, 7, 2, 5];
        let inputs = test_inputs(choices.len(), n);

        let transcript = run_session(&choices, bit_count, &inputs, false).unwrap();
        assert_eq!(transcript.recovered.len(), choices.len());
        for (i, choice) in choices.iter().enumerate() {
            assert_eq!(transcript.recovered[i], inputs[i][*choice]);
            for w in 0..n {
                if w != *choice {
                    assert_ne!(transcript.recovered[i], inputs[i][w]);
                }
            }
        }
    }

    #[test]
    fn more_instances_than_one_correction_batch() {
        let bit_count = 2;
        let n = 1 << bit_count;
        let choices: Vec<usize> = (0..150).map(|i| i % n).collect();
        let inputs = test_inputs(choices.len(), n);
        let transcript = run_session(&choices, bit_count, &inputs, false).unwrap();
        for (i, choice) in choices.iter().enumerate() {
            assert_eq!(transcript.recovered[i], inputs[i][*choice]);
        }
    }

    #[test]
    fn tampered_corrections_are_rejected() {
        let bit_count = 3;
        let choices = vec![1, 2, 3];
        let inputs = test_inputs(choices.len(), 1 << bit_count);
        assert_eq!(
            run_session(&choices, bit_count, &inputs, true).unwrap_err(),
            Error::MaliciousOtReject
        );
    }

    #[test]
    fn out_of_range_choices_are_rejected() {
        let mut rng = ChaCha20Rng::from_seed([33; 32]);
        let (r_init, base_init) = OosReceiverInit::new(&mut rng.clone());
        let (s_init, base_choices) = OosSenderInit::new(&mut rng, &base_init).unwrap();
        let (r_ext, _) = r_init.on_base_choices(&base_choices).unwrap();
        let mut rng_r = ChaCha20Rng::from_seed([34; 32]);
        let err = r_ext.encode_choices(&[8], 3, true, &mut rng_r).unwrap_err();
        assert!(matches!(err, Error::InputShape(_)));
        let _ = s_init;
    }
}
