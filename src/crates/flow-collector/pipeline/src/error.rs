use flow_wire::{NetFlowLegacyError, SflowError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    NetFlowLegacy,
    Sflow,
}

impl Protocol {
    /// Name used for the latency histogram and transform-error counter.
    pub fn name(self) -> &'static str {
        match self {
            Self::NetFlowLegacy => "NetFlowV5",
            Self::Sflow => "sFlow",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decode failure classes shared by every protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    VersionMismatch,
    IpVersionMismatch,
    DataFormat,
    Decoding,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::VersionMismatch => "error_version",
            Self::IpVersionMismatch => "error_ip_version",
            Self::DataFormat => "error_data_format",
            Self::Decoding => "error_decoding",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VersionMismatch => "version_mismatch",
            Self::IpVersionMismatch => "ip_version_mismatch",
            Self::DataFormat => "data_format",
            Self::Decoding => "decoding",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("netflow v5: {0}")]
    NetFlowLegacy(#[from] NetFlowLegacyError),

    #[error("sflow: {0}")]
    Sflow(#[from] SflowError),
}

impl DecodeError {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::NetFlowLegacy(_) => Protocol::NetFlowLegacy,
            Self::Sflow(_) => Protocol::Sflow,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetFlowLegacy(NetFlowLegacyError::Version(_)) => ErrorKind::VersionMismatch,
            Self::NetFlowLegacy(
                NetFlowLegacyError::Truncated { .. } | NetFlowLegacyError::Malformed(_),
            ) => ErrorKind::Decoding,
            Self::Sflow(SflowError::Version(_)) => ErrorKind::VersionMismatch,
            Self::Sflow(SflowError::IpVersion(_)) => ErrorKind::IpVersionMismatch,
            Self::Sflow(SflowError::DataFormat(_)) => ErrorKind::DataFormat,
            Self::Sflow(SflowError::Truncated | SflowError::Malformed(_)) => {
                ErrorKind::Decoding
            }
        }
    }
}

/// Reported by a transform next to whatever records it still produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
