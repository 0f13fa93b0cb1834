//! Decoding entry points for flow telemetry datagrams.
//!
//! Parsing is done by `netflow_parser` and `sflow_parser`. Each protocol
//! module wraps its parser in a single `decode_message` call that returns
//! the parser's message type, or an error drawn from a small closed set of
//! variants so callers can classify failures without looking at bytes.

pub mod netflow_legacy;
pub mod sflow;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use netflow_legacy::{NetFlowLegacyError, PacketV5};
pub use sflow::{Datagram, SflowError};
