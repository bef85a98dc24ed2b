//! Payable Labeled Private Set Intersection (PLPSI) for 2 parties.
//!
//! A *Sender* holds a labeled database of key-value pairs `(x, v)`; a *Receiver* holds a query
//! set `{y}`. At the end of a session the Receiver learns exactly the pairs whose keys it
//! queried, and the Sender learns only the size of the intersection. Records the Receiver did
//! not legitimately match stay hidden behind per-bucket one-time pads whose keys are delivered
//! through a malicious-secure 1-of-N oblivious transfer.
//!
//! The protocol composes four cryptographic subsystems over a two-layer cuckoo-hash layout:
//!
//! 1. a DH-OPRF over NIST P-256 ([`curve`], [`sender`], [`receiver`]),
//! 2. outer cuckoo / 3-replica simple hashing plus inner per-bucket cuckoo hashing
//!    ([`buckets`]),
//! 3. a constant-weight batch PIR in the PIRANA style ([`pir`]),
//! 4. an OOS 1-of-N OT extension with a consistency check ([`ot_base`], [`oos_ot`]).
//!
//! Communication channels are deliberately _not_ part of this crate. Every phase produces and
//! consumes plain byte messages, which allows the protocol to be driven over any ordered
//! reliable transport. [`simulate`] runs both parties locally under ideal network conditions:
//!
//! ```
//! use plpsi::{simulate, ProtocolConfig};
//!
//! let sender_db = vec![
//!     (b"alice".to_vec(), b"111".to_vec()),
//!     (b"bob".to_vec(), b"222".to_vec()),
//!     (b"carol".to_vec(), b"333".to_vec()),
//! ];
//! let receiver_queries = vec![b"bob".to_vec()];
//!
//! let mut config = ProtocolConfig::default();
//! config.rng_seed = Some([7u8; 32]);
//! let report = simulate(&sender_db, &receiver_queries, &config).unwrap();
//!
//! assert_eq!(report.intersection, vec![(b"bob".to_vec(), b"222".to_vec())]);
//! assert_eq!(report.sender_intersection_size, 1);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod buckets;
mod cointossing;
mod config;
mod curve;
mod hash;
mod oos_ot;
mod ot_base;
mod pir;
mod protocol;
mod receiver;
mod sender;
mod simulator;

pub use config::{PirMode, ProtocolConfig};
pub use protocol::{run_protocol, CommReport, PhaseTimings, ProtocolReport};
pub use receiver::LpsiReceiver;
pub use sender::LpsiSender;
pub use simulator::*;

/// Errors occurring during the validation or the execution of the PLPSI protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A database, query or message shape is inconsistent with the declared parameters.
    InputShape(String),
    /// A payload slot value reached or exceeded the BFV plain modulus.
    BfvModulusOverflow,
    /// A response ciphertext ran out of invariant noise budget before decryption.
    BfvNoiseExhausted,
    /// A cuckoo placement exceeded its retry bound; the load factor is reported.
    CuckooOverflow {
        /// Occupancy ratio of the table that failed to absorb the element.
        load_factor: f64,
    },
    /// The OT consistency check failed; the counterparty is treated as adversarial.
    MaliciousOtReject,
    /// A decrypted record header declared more bytes than are available.
    HeaderCorruption,
    /// A curve point could not be parsed from its byte encoding.
    DecodeFailure,
    /// An OT message could not be deserialized into the expected batch.
    OtDeserialization,
    /// A different message was expected from the other party at this point in the protocol.
    UnexpectedMessageType,
    /// The message could not be serialized to / deserialized from bincode.
    BincodeError,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InputShape(detail) => write!(f, "input shape mismatch: {detail}"),
            Error::BfvModulusOverflow => {
                f.write_str("payload slot value reached the BFV plain modulus")
            }
            Error::BfvNoiseExhausted => {
                f.write_str("invariant noise budget exhausted before decryption")
            }
            Error::CuckooOverflow { load_factor } => write!(
                f,
                "cuckoo placement exceeded its retry bound at load factor {:.1}%",
                load_factor * 100.0
            ),
            Error::MaliciousOtReject => {
                f.write_str("OT consistency check failed; aborting the session")
            }
            Error::HeaderCorruption => {
                f.write_str("record header declares more bytes than are available")
            }
            Error::DecodeFailure => f.write_str("malformed curve point encoding"),
            Error::OtDeserialization => {
                f.write_str("OT message could not be deserialized into the expected batch")
            }
            Error::UnexpectedMessageType => f.write_str("unexpected message kind"),
            Error::BincodeError => {
                f.write_str("message could not be serialized to / deserialized from bincode")
            }
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(_: bincode::Error) -> Self {
        Self::BincodeError
    }
}
