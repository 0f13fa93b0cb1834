//! sFlow v5 decoding.
//!
//! `sflow_parser` reports every failure as either an I/O error or invalid
//! data. The datagram version and agent address type are checked up front so
//! they can be told apart, and samples of a format this collector does not
//! handle fail the whole datagram with [`SflowError::DataFormat`].

use sflow_parser::models::{SFlowDatagram, SampleData};
use sflow_parser::{ParseError, parse_datagram};
use thiserror::Error;

pub type Datagram = SFlowDatagram;

pub const VERSION: u32 = 5;

pub const ADDRESS_TYPE_IPV4: u32 = 1;
pub const ADDRESS_TYPE_IPV6: u32 = 2;

pub const SAMPLE_FORMAT_FLOW: u32 = 1;
pub const SAMPLE_FORMAT_COUNTER: u32 = 2;
pub const SAMPLE_FORMAT_EXPANDED_FLOW: u32 = 3;
pub const SAMPLE_FORMAT_EXPANDED_COUNTER: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SflowError {
    #[error("unsupported sflow version {0} (expected {VERSION})")]
    Version(u32),

    #[error("unsupported sflow agent address type {0}")]
    IpVersion(u32),

    #[error("unsupported sflow sample format {0:#x}")]
    DataFormat(u32),

    #[error("sflow datagram truncated")]
    Truncated,

    #[error("malformed sflow datagram: {0}")]
    Malformed(String),
}

impl From<ParseError> for SflowError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Io(_) => Self::Truncated,
            ParseError::InvalidData(msg) => Self::Malformed(msg),
        }
    }
}

pub fn decode_message(payload: &[u8]) -> Result<Datagram, SflowError> {
    let version = word(payload, 0)?;
    if version != VERSION {
        return Err(SflowError::Version(version));
    }
    let address_type = word(payload, 1)?;
    if !matches!(address_type, ADDRESS_TYPE_IPV4 | ADDRESS_TYPE_IPV6) {
        return Err(SflowError::IpVersion(address_type));
    }

    let datagram = parse_datagram(payload)?;
    if let Some(sample) = datagram
        .samples
        .iter()
        .find(|sample| !is_supported(&sample.sample_data))
    {
        return Err(SflowError::DataFormat(sample.sample_type.0));
    }
    Ok(datagram)
}

fn is_supported(data: &SampleData) -> bool {
    matches!(
        data,
        SampleData::FlowSample(_)
            | SampleData::CountersSample(_)
            | SampleData::FlowSampleExpanded(_)
            | SampleData::CountersSampleExpanded(_)
    )
}

fn word(payload: &[u8], index: usize) -> Result<u32, SflowError> {
    let offset = index * 4;
    match payload.get(offset..offset + 4) {
        Some(&[a, b, c, d]) => Ok(u32::from_be_bytes([a, b, c, d])),
        _ => Err(SflowError::Truncated),
    }
}
