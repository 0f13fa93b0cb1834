//! Per-datagram input and the collection-time context derived from it.

use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

/// One received datagram, owned by the worker that decodes it.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub source: SocketAddr,
    pub payload: Bytes,
    pub received_at: SystemTime,
    /// Whether `received_at` was captured by the receiver. When false the
    /// pipeline stamps records with the time it processes the packet.
    pub time_is_set: bool,
}

impl RawPacket {
    pub fn new(source: SocketAddr, payload: impl Into<Bytes>, received_at: SystemTime) -> Self {
        Self {
            source,
            payload: payload.into(),
            received_at,
            time_is_set: true,
        }
    }

    pub fn untimed(source: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            payload: payload.into(),
            received_at: UNIX_EPOCH,
            time_is_set: false,
        }
    }

    /// Receive time in UTC Unix seconds.
    pub fn receive_timestamp(&self) -> u64 {
        let at = if self.time_is_set {
            self.received_at
        } else {
            SystemTime::now()
        };
        unix_seconds(at)
    }
}

/// Label used for every per-exporter metric.
pub fn router_key(source: &SocketAddr) -> String {
    normalize_sampler(source.ip()).to_string()
}

/// Rewrites IPv4-mapped IPv6 addresses to their IPv4 form so one exporter
/// has one identity regardless of the socket family it was received on.
pub fn normalize_sampler(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

/// Metadata stamped on every record produced from one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentContext {
    pub time_received: u64,
    pub sampler_address: Option<IpAddr>,
}

impl EnrichmentContext {
    pub fn for_packet(packet: &RawPacket) -> Self {
        Self {
            time_received: packet.receive_timestamp(),
            sampler_address: Some(normalize_sampler(packet.source.ip())),
        }
    }

    pub fn without_sampler(self) -> Self {
        Self {
            sampler_address: None,
            ..self
        }
    }
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
