//! Per-datagram flow decoding pipeline.
//!
//! Each supported wire protocol has one adapter ([`NetFlowLegacyDecoder`],
//! [`SflowDecoder`]) implementing [`FlowDecoder`]. For every datagram the
//! adapter decodes the payload, classifies and counts decode failures, and on
//! success runs the transform, enrichment and publish stages it was built
//! with. Adapters hold no per-packet state, so one instance is shared by all
//! workers of a listener. All accounting goes through a shared [`Metrics`]
//! registry.

mod decoder;
mod error;
pub mod metrics;
mod netflow_legacy;
mod packet;
mod sflow;
mod stage;

pub use decoder::FlowDecoder;
pub use error::{DecodeError, ErrorKind, Protocol, TransformError};
pub use metrics::Metrics;
pub use netflow_legacy::NetFlowLegacyDecoder;
pub use packet::{EnrichmentContext, RawPacket, normalize_sampler, router_key};
pub use sflow::{SampleKind, SflowDecoder};
pub use stage::{Enrich, Transform, TransformOutput, Transport};
