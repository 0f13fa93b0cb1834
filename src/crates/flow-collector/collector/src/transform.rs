//! Wire message to canonical flow record conversion.

use crate::flow::{ETYPE_IPV4, ETYPE_IPV6, FlowRecord};
use flow_pipeline::{TransformError, TransformOutput};
use flow_wire::netflow_legacy::{boot_millis, sampling_rate};
use flow_wire::{Datagram, PacketV5};
use sflow_parser::models::{
    Address, FlowData, HeaderProtocol, Interface, InterfaceExpanded, SampleData, SampledHeader,
};
use std::net::{Ipv4Addr, Ipv6Addr};

const ETYPE_VLAN: u16 = 0x8100;
const ETYPE_IPV4_RAW: u16 = 0x0800;
const ETYPE_IPV6_RAW: u16 = 0x86dd;
const FORWARDING_STATUS_DROPPED: u32 = 128;
const INTERFACE_LOCAL: u32 = 0x3fff_ffff;
const INTERFACE_LOCAL_EXPANDED: u32 = 0xffff_ffff;
const INTERFACE_FORMAT_DISCARD: u32 = 1;

/// Per-protocol options for sFlow records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SflowConfig {
    pub(crate) parse_sampled_header: bool,
}

impl Default for SflowConfig {
    fn default() -> Self {
        Self {
            parse_sampled_header: true,
        }
    }
}

pub(crate) fn netflow_v5(packet: &PacketV5, _: &()) -> TransformOutput<FlowRecord> {
    let header = &packet.header;
    let boot_millis = boot_millis(header);
    let sampling_rate = sampling_rate(header);

    let records = packet
        .flowsets
        .iter()
        .map(|flow| {
            let mut record = FlowRecord::new("v5");
            record.set("SEQUENCE_NUM", header.flow_sequence);
            record.set("SAMPLING_RATE", sampling_rate);
            record.set("ETYPE", ETYPE_IPV4);
            record.set("SRC_ADDR", flow.src_addr);
            record.set("DST_ADDR", flow.dst_addr);
            record.set("NEXT_HOP", flow.next_hop);
            record.set("SRC_PORT", flow.src_port);
            record.set("DST_PORT", flow.dst_port);
            record.set("PROTOCOL", flow.protocol_number);
            record.set("SRC_AS", flow.src_as);
            record.set("DST_AS", flow.dst_as);
            record.set("SRC_MASK", flow.src_mask);
            record.set("DST_MASK", flow.dst_mask);
            record.set("IN_IF", flow.input);
            record.set("OUT_IF", flow.output);
            record.set("IPTOS", flow.tos);
            record.set("TCP_FLAGS", flow.tcp_flags);
            record.set("BYTES", flow.d_octets);
            record.set("PACKETS", flow.d_pkts);
            record.set(
                "FLOW_START_SECONDS",
                boot_millis.saturating_add(u64::from(flow.first)) / 1000,
            );
            record.set(
                "FLOW_END_SECONDS",
                boot_millis.saturating_add(u64::from(flow.last)) / 1000,
            );
            record.finalize()
        })
        .collect();

    TransformOutput::ok(records)
}

/// One record per flow sample; counter samples produce nothing.
pub(crate) fn sflow(datagram: &Datagram, config: &SflowConfig) -> TransformOutput<FlowRecord> {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    let agent = agent_ip(&datagram.agent_address);

    for sample in &datagram.samples {
        let (sequence, sampling_rate, input, output, dropped, flow_records) =
            match &sample.sample_data {
                SampleData::FlowSample(s) => (
                    s.sequence_number,
                    s.sampling_rate,
                    compact_index(s.input),
                    compact_index(s.output),
                    s.output.is_discarded(),
                    &s.flow_records,
                ),
                SampleData::FlowSampleExpanded(s) => (
                    s.sequence_number,
                    s.sampling_rate,
                    expanded_index(s.input),
                    expanded_index(s.output),
                    s.output.format == INTERFACE_FORMAT_DISCARD,
                    &s.flow_records,
                ),
                _ => continue,
            };

        let mut record = FlowRecord::new("sflow");
        if let Some(agent) = &agent {
            record.set("EXPORTER_IP", agent);
            record.set("SAMPLER_ADDRESS", agent);
        }
        record.set("SEQUENCE_NUM", sequence);
        record.set("SAMPLING_RATE", sampling_rate);
        record.set("IN_IF", input);
        record.set("OUT_IF", output);
        if dropped {
            record.set("FORWARDING_STATUS", FORWARDING_STATUS_DROPPED);
        }

        let mut l3_length = 0_u64;
        for flow_record in flow_records {
            match &flow_record.flow_data {
                FlowData::SampledHeader(sampled) => {
                    if !config.parse_sampled_header {
                        continue;
                    }
                    match parse_sampled_header(sampled, &mut record) {
                        Some(length) if length > 0 => l3_length = length,
                        Some(_) => {}
                        None => errors.push(format!(
                            "sample {}: unparseable sampled header",
                            sequence
                        )),
                    }
                }
                FlowData::SampledIpv4(sampled) => {
                    record.set("ETYPE", ETYPE_IPV4);
                    record.set("SRC_ADDR", sampled.src_ip);
                    record.set("DST_ADDR", sampled.dst_ip);
                    record.set("SRC_PORT", sampled.src_port);
                    record.set("DST_PORT", sampled.dst_port);
                    record.set("PROTOCOL", sampled.protocol);
                    record.set("TCP_FLAGS", sampled.tcp_flags);
                    record.set("IPTOS", sampled.tos);
                    l3_length = u64::from(sampled.length);
                }
                FlowData::SampledIpv6(sampled) => {
                    record.set("ETYPE", ETYPE_IPV6);
                    record.set("SRC_ADDR", sampled.src_ip);
                    record.set("DST_ADDR", sampled.dst_ip);
                    record.set("SRC_PORT", sampled.src_port);
                    record.set("DST_PORT", sampled.dst_port);
                    record.set("PROTOCOL", sampled.protocol);
                    record.set("TCP_FLAGS", sampled.tcp_flags);
                    record.set("IPTOS", sampled.priority);
                    l3_length = u64::from(sampled.length);
                }
                FlowData::SampledEthernet(sampled) => {
                    // Frame length minus the Ethernet header and FCS.
                    if l3_length == 0 {
                        l3_length = u64::from(sampled.length.saturating_sub(16));
                    }
                    record.set("SRC_MAC", sampled.src_mac);
                    record.set("DST_MAC", sampled.dst_mac);
                }
                FlowData::ExtendedSwitch(switch) => {
                    if switch.src_vlan < 4096 {
                        record.set("SRC_VLAN", switch.src_vlan);
                    }
                    if switch.dst_vlan < 4096 {
                        record.set("DST_VLAN", switch.dst_vlan);
                    }
                }
                FlowData::ExtendedRouter(router) => {
                    if let Some(next_hop) = agent_ip(&router.next_hop) {
                        record.set("NEXT_HOP", next_hop);
                    }
                    record.set("SRC_MASK", router.src_mask_len);
                    record.set("DST_MASK", router.dst_mask_len);
                }
                FlowData::ExtendedGateway(gateway) => {
                    if let Some(next_hop) = agent_ip(&gateway.next_hop) {
                        record.set("NEXT_HOP", next_hop);
                    }
                    record.set("SRC_AS", gateway.as_number);
                    if gateway.src_as > 0 {
                        record.set("SRC_AS", gateway.src_as);
                    }
                    let path: Vec<u32> = gateway
                        .dst_as_path
                        .iter()
                        .flat_map(|segment| segment.path.iter().copied())
                        .collect();
                    record.set(
                        "DST_AS",
                        path.last().copied().unwrap_or(gateway.as_number),
                    );
                    if !path.is_empty() {
                        record.set("DST_AS_PATH", join(&path));
                    }
                    if !gateway.communities.is_empty() {
                        record.set("DST_COMMUNITIES", join(&gateway.communities));
                    }
                }
                _ => {}
            }
        }

        record.set("BYTES", l3_length);
        record.set("PACKETS", 1);
        records.push(record.finalize());
    }

    if errors.is_empty() {
        TransformOutput::ok(records)
    } else {
        TransformOutput::partial(records, TransformError::new(errors.join("; ")))
    }
}

fn agent_ip(address: &Address) -> Option<String> {
    match address {
        Address::IPv4(ip) => Some(ip.to_string()),
        Address::IPv6(ip) => Some(ip.to_string()),
        Address::Unknown => None,
    }
}

/// ifIndex of a single-interface value, 0 for local traffic, discards and
/// multiple destinations.
fn compact_index(interface: Interface) -> u32 {
    match interface.value() {
        index if interface.is_single() && index != INTERFACE_LOCAL => index,
        _ => 0,
    }
}

fn expanded_index(interface: InterfaceExpanded) -> u32 {
    match interface {
        InterfaceExpanded { format: 0, value } if value != INTERFACE_LOCAL_EXPANDED => value,
        _ => 0,
    }
}

fn join(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns the L3 length the header claims, `None` when it cannot be parsed.
fn parse_sampled_header(sampled: &SampledHeader, record: &mut FlowRecord) -> Option<u64> {
    match sampled.protocol {
        HeaderProtocol::EthernetIso88023 => parse_ethernet(&sampled.header, record),
        HeaderProtocol::Ipv4 => parse_ipv4(&sampled.header, record),
        HeaderProtocol::Ipv6 => parse_ipv6(&sampled.header, record),
        _ => Some(0),
    }
}

fn parse_ethernet(data: &[u8], record: &mut FlowRecord) -> Option<u64> {
    if data.len() < 14 {
        return None;
    }
    record.set("DST_MAC", mac_to_string(&data[0..6]));
    record.set("SRC_MAC", mac_to_string(&data[6..12]));

    let mut etype = u16::from_be_bytes([data[12], data[13]]);
    let mut cursor = &data[14..];
    while etype == ETYPE_VLAN {
        if cursor.len() < 4 {
            return None;
        }
        let vlan = (u16::from(cursor[0] & 0x0f) << 8) | u16::from(cursor[1]);
        if vlan > 0 && record.get("SRC_VLAN").is_none() {
            record.set("SRC_VLAN", vlan);
        }
        etype = u16::from_be_bytes([cursor[2], cursor[3]]);
        cursor = &cursor[4..];
    }

    match etype {
        ETYPE_IPV4_RAW => parse_ipv4(cursor, record),
        ETYPE_IPV6_RAW => parse_ipv6(cursor, record),
        _ => Some(0),
    }
}

fn parse_ipv4(data: &[u8], record: &mut FlowRecord) -> Option<u64> {
    if data.len() < 20 {
        return None;
    }
    let ihl = usize::from(data[0] & 0x0f).saturating_mul(4);
    if ihl < 20 || ihl > data.len() {
        return None;
    }

    let total_length = u64::from(u16::from_be_bytes([data[2], data[3]]));
    let fragment_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1fff;
    let proto = data[9];

    record.set("ETYPE", ETYPE_IPV4);
    record.set("SRC_ADDR", Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    record.set("DST_ADDR", Ipv4Addr::new(data[16], data[17], data[18], data[19]));
    record.set("PROTOCOL", proto);
    record.set("IPTOS", data[1]);
    record.set("IPTTL", data[8]);

    if fragment_offset == 0 {
        parse_transport(proto, &data[ihl..], record);
    }
    Some(total_length)
}

fn parse_ipv6(data: &[u8], record: &mut FlowRecord) -> Option<u64> {
    if data.len() < 40 {
        return None;
    }
    let payload_length = u64::from(u16::from_be_bytes([data[4], data[5]]));
    let next_header = data[6];
    let traffic_class = (u16::from_be_bytes([data[0], data[1]]) & 0x0ff0) >> 4;
    let mut src = [0_u8; 16];
    let mut dst = [0_u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);

    record.set("ETYPE", ETYPE_IPV6);
    record.set("SRC_ADDR", Ipv6Addr::from(src));
    record.set("DST_ADDR", Ipv6Addr::from(dst));
    record.set("PROTOCOL", next_header);
    record.set("IPTOS", traffic_class);
    record.set("IPTTL", data[7]);

    parse_transport(next_header, &data[40..], record);
    Some(payload_length.saturating_add(40))
}

fn parse_transport(proto: u8, data: &[u8], record: &mut FlowRecord) {
    match proto {
        6 | 17 => {
            if data.len() >= 4 {
                record.set("SRC_PORT", u16::from_be_bytes([data[0], data[1]]));
                record.set("DST_PORT", u16::from_be_bytes([data[2], data[3]]));
            }
            if proto == 6 && data.len() >= 14 {
                record.set("TCP_FLAGS", data[13]);
            }
        }
        1 | 58 => {
            if data.len() >= 2 {
                record.set("ICMP_TYPE", data[0]);
                record.set("ICMP_CODE", data[1]);
            }
        }
        _ => {}
    }
}

fn mac_to_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
