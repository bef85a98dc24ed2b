//! PLPSI simulation environment under ideal network conditions.

use crate::config::ProtocolConfig;
use crate::protocol::{run_protocol, ProtocolReport};
use crate::Error;

/// Runs a complete PLPSI session with both parties on the local machine.
///
/// The full cryptographic protocol is executed; messages between Sender and Receiver are
/// exchanged through local buffers, so this simulates a session without any latency or
/// bandwidth restrictions. `sender_input` holds the labeled database, `receiver_input` the
/// query set.
pub fn simulate(
    sender_input: &[(Vec<u8>, Vec<u8>)],
    receiver_input: &[Vec<u8>],
    config: &ProtocolConfig,
) -> Result<ProtocolReport, Error> {
    run_protocol(sender_input.to_vec(), receiver_input.to_vec(), config)
}
