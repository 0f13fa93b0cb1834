//! NetFlow v5 decoding.
//!
//! The version field is checked here so that other versions surface as
//! [`NetFlowLegacyError::Version`]. The packet length is checked against the
//! declared record count before the rest is handed to `V5::parse_direct`,
//! which expects its input to start right after the version.

use netflow_parser::static_versions::v5::{Header, V5};
use thiserror::Error;

pub use netflow_parser::static_versions::v5::FlowSet;

pub type PacketV5 = V5;

pub const VERSION: u16 = 5;
pub const HEADER_SIZE: usize = 24;
pub const RECORD_SIZE: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetFlowLegacyError {
    #[error("unsupported netflow version {0} (expected {VERSION})")]
    Version(u16),

    #[error("netflow v5 packet truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("malformed netflow v5 packet: {0}")]
    Malformed(String),
}

pub fn decode_message(payload: &[u8]) -> Result<PacketV5, NetFlowLegacyError> {
    let &[hi, lo, ..] = payload else {
        return Err(truncated(2, payload));
    };
    let version = u16::from_be_bytes([hi, lo]);
    if version != VERSION {
        return Err(NetFlowLegacyError::Version(version));
    }

    if payload.len() < HEADER_SIZE {
        return Err(truncated(HEADER_SIZE, payload));
    }
    let count = usize::from(u16::from_be_bytes([payload[2], payload[3]]));
    let needed = HEADER_SIZE + count * RECORD_SIZE;
    if payload.len() < needed {
        return Err(truncated(needed, payload));
    }

    // Rejects a record count of zero or above 30.
    V5::parse_direct(&payload[2..])
        .map(|(_, packet)| packet)
        .map_err(|err| NetFlowLegacyError::Malformed(err.to_string()))
}

fn truncated(needed: usize, payload: &[u8]) -> NetFlowLegacyError {
    NetFlowLegacyError::Truncated {
        needed,
        available: payload.len(),
    }
}

/// Sampling rate carried in the low 14 bits of the sampling interval.
/// Zero means unsampled and is reported as 1.
pub fn sampling_rate(header: &Header) -> u32 {
    match u32::from(header.sampling_interval & 0x3fff) {
        0 => 1,
        rate => rate,
    }
}

/// Router boot time in milliseconds since the Unix epoch.
pub fn boot_millis(header: &Header) -> u64 {
    u64::from(header.unix_secs)
        .saturating_mul(1000)
        .saturating_add(u64::from(header.unix_nsecs) / 1_000_000)
        .saturating_sub(u64::from(header.sys_up_time))
}
