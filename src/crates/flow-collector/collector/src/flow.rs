//! Canonical flow record published by the collector.
//!
//! Every record carries the same set of upper-snake field names whatever
//! protocol produced it. Fields a protocol cannot fill keep their defaults.

use flow_pipeline::EnrichmentContext;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

pub(crate) const ETYPE_IPV4: &str = "2048";
pub(crate) const ETYPE_IPV6: &str = "34525";

const CANONICAL_FLOW_DEFAULTS: &[(&str, &str)] = &[
    ("FLOW_VERSION", ""),
    ("EXPORTER_IP", ""),
    ("SAMPLER_ADDRESS", ""),
    ("SEQUENCE_NUM", "0"),
    ("SAMPLING_RATE", "0"),
    ("ETYPE", "0"),
    ("PROTOCOL", "0"),
    ("BYTES", "0"),
    ("PACKETS", "0"),
    ("FORWARDING_STATUS", "0"),
    ("SRC_ADDR", ""),
    ("DST_ADDR", ""),
    ("SRC_MASK", "0"),
    ("DST_MASK", "0"),
    ("SRC_AS", "0"),
    ("DST_AS", "0"),
    ("DST_AS_PATH", ""),
    ("DST_COMMUNITIES", ""),
    ("IN_IF", "0"),
    ("OUT_IF", "0"),
    ("NEXT_HOP", ""),
    ("SRC_PORT", "0"),
    ("DST_PORT", "0"),
    ("FLOW_START_SECONDS", "0"),
    ("FLOW_END_SECONDS", "0"),
    ("TIME_RECEIVED", "0"),
    ("SRC_VLAN", "0"),
    ("DST_VLAN", "0"),
    ("SRC_MAC", ""),
    ("DST_MAC", ""),
    ("IPTTL", "0"),
    ("IPTOS", "0"),
    ("TCP_FLAGS", "0"),
    ("ICMP_TYPE", "0"),
    ("ICMP_CODE", "0"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct FlowRecord {
    fields: BTreeMap<String, String>,
}

impl FlowRecord {
    pub(crate) fn new(version: &str) -> Self {
        let mut record = Self::default();
        record.set("FLOW_VERSION", version);
        record
    }

    pub(crate) fn set(&mut self, key: &str, value: impl Display) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn get_u64(&self, key: &str) -> u64 {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn is_unset(&self, key: &str) -> bool {
        self.get(key).is_none_or(|v| v.is_empty() || v == "0")
    }

    #[cfg(test)]
    pub(crate) fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Fills defaults and derives fields other fields imply.
    pub(crate) fn finalize(mut self) -> Self {
        for (name, default_value) in CANONICAL_FLOW_DEFAULTS {
            self.fields
                .entry((*name).to_string())
                .or_insert_with(|| (*default_value).to_string());
        }

        self.apply_icmp_port_fallback();

        if self.is_unset("ETYPE")
            && let Some(inferred) = self.infer_etype_from_endpoints()
        {
            self.set("ETYPE", inferred);
        }
        self
    }

    // Exporters put ICMP type and code in the destination port.
    fn apply_icmp_port_fallback(&mut self) {
        let protocol = self.get_u64("PROTOCOL");
        let src_port = self.get_u64("SRC_PORT");
        let dst_port = self.get_u64("DST_PORT");
        if !matches!(protocol, 1 | 58) || src_port != 0 || dst_port == 0 {
            return;
        }
        if self.is_unset("ICMP_TYPE") && self.is_unset("ICMP_CODE") {
            self.set("ICMP_TYPE", (dst_port >> 8) & 0xff);
            self.set("ICMP_CODE", dst_port & 0xff);
        }
    }

    fn infer_etype_from_endpoints(&self) -> Option<&'static str> {
        let sample_addr = [self.get("SRC_ADDR"), self.get("DST_ADDR")]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())?;
        if sample_addr.contains(':') {
            Some(ETYPE_IPV6)
        } else if sample_addr.contains('.') {
            Some(ETYPE_IPV4)
        } else {
            None
        }
    }
}

/// Stamps the collection context on a record.
pub(crate) fn enrich(record: &mut FlowRecord, ctx: &EnrichmentContext) {
    record.set("TIME_RECEIVED", ctx.time_received);
    if let Some(sampler) = ctx.sampler_address {
        record.set("SAMPLER_ADDRESS", sampler);
        if record.get("EXPORTER_IP").is_none_or(str::is_empty) {
            record.set("EXPORTER_IP", sampler);
        }
    }
}
