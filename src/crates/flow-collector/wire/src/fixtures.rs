//! Synthetic datagrams for tests in this and dependent crates.

use crate::netflow_legacy;
use crate::sflow::{
    ADDRESS_TYPE_IPV4, ADDRESS_TYPE_IPV6, SAMPLE_FORMAT_COUNTER, SAMPLE_FORMAT_EXPANDED_COUNTER,
    SAMPLE_FORMAT_EXPANDED_FLOW, SAMPLE_FORMAT_FLOW,
};

pub const FLOW_RECORD_SAMPLED_HEADER: u32 = 1;
pub const FLOW_RECORD_SAMPLED_ETHERNET: u32 = 2;
pub const FLOW_RECORD_SAMPLED_IPV4: u32 = 3;
pub const FLOW_RECORD_EXTENDED_SWITCH: u32 = 1001;
pub const FLOW_RECORD_EXTENDED_ROUTER: u32 = 1002;
pub const FLOW_RECORD_EXTENDED_GATEWAY: u32 = 1003;
pub const COUNTER_RECORD_INTERFACE: u32 = 1;

const HEADER_PROTOCOL_ETHERNET: u32 = 1;

/// A flow record as (data format, body).
pub type RawRecord = (u32, Vec<u8>);

/// NetFlow v5 packet with `count` TCP records, exported at 1_700_000_000s
/// by a router that has been up for 60s, sampling 1 in 100.
pub fn synthetic_v5_packet(count: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        netflow_legacy::HEADER_SIZE + count as usize * netflow_legacy::RECORD_SIZE,
    );
    out.extend_from_slice(&netflow_legacy::VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&60_000_u32.to_be_bytes()); // sys_uptime
    out.extend_from_slice(&1_700_000_000_u32.to_be_bytes()); // unix_secs
    out.extend_from_slice(&0_u32.to_be_bytes()); // unix_nsecs
    out.extend_from_slice(&42_u32.to_be_bytes()); // flow_sequence
    out.push(1); // engine_type
    out.push(7); // engine_id
    out.extend_from_slice(&(0x4000_u16 | 100).to_be_bytes());
    for i in 0..count {
        out.extend_from_slice(&[10, 0, 0, (i % 250) as u8 + 1]);
        out.extend_from_slice(&[192, 0, 2, 10]);
        out.extend_from_slice(&[10, 0, 0, 254]);
        out.extend_from_slice(&3_u16.to_be_bytes());
        out.extend_from_slice(&4_u16.to_be_bytes());
        out.extend_from_slice(&5_u32.to_be_bytes());
        out.extend_from_slice(&1500_u32.to_be_bytes());
        out.extend_from_slice(&50_000_u32.to_be_bytes());
        out.extend_from_slice(&55_000_u32.to_be_bytes());
        out.extend_from_slice(&443_u16.to_be_bytes());
        out.extend_from_slice(&51_000_u16.to_be_bytes());
        out.extend_from_slice(&[0, 0x18, 6, 0]);
        out.extend_from_slice(&65_001_u16.to_be_bytes());
        out.extend_from_slice(&65_002_u16.to_be_bytes());
        out.extend_from_slice(&[24, 16, 0, 0]);
    }
    out
}

pub struct SflowDatagramBuilder {
    agent_type: u32,
    agent: Vec<u8>,
    sequence_number: u32,
    samples: Vec<(u32, Vec<u8>)>,
}

impl SflowDatagramBuilder {
    pub fn ipv4(agent: [u8; 4]) -> Self {
        Self {
            agent_type: ADDRESS_TYPE_IPV4,
            agent: agent.to_vec(),
            sequence_number: 1,
            samples: Vec::new(),
        }
    }

    pub fn ipv6(agent: [u8; 16]) -> Self {
        Self {
            agent_type: ADDRESS_TYPE_IPV6,
            agent: agent.to_vec(),
            sequence_number: 1,
            samples: Vec::new(),
        }
    }

    /// Compact flow sample, input ifIndex 3, output ifIndex 4.
    pub fn flow_sample(mut self, sampling_rate: u32, records: Vec<RawRecord>) -> Self {
        let mut body = Vec::new();
        push_u32s(&mut body, &[self.next_sequence(), 0x0000_0003, sampling_rate, 1000, 0, 3, 4]);
        push_records(&mut body, records);
        self.samples.push((SAMPLE_FORMAT_FLOW, body));
        self
    }

    /// Expanded flow sample, input ifIndex 7, output discarded.
    pub fn expanded_flow_sample(mut self, sampling_rate: u32, records: Vec<RawRecord>) -> Self {
        let mut body = Vec::new();
        push_u32s(
            &mut body,
            &[self.next_sequence(), 0, 7, sampling_rate, 1000, 0, 0, 7, 1, 0],
        );
        push_records(&mut body, records);
        self.samples.push((SAMPLE_FORMAT_EXPANDED_FLOW, body));
        self
    }

    /// Compact counter sample carrying `records` generic interface records.
    pub fn counter_sample(mut self, records: usize) -> Self {
        let mut body = Vec::new();
        push_u32s(&mut body, &[self.next_sequence(), 0x0000_0003]);
        push_records(&mut body, interface_counter_records(records));
        self.samples.push((SAMPLE_FORMAT_COUNTER, body));
        self
    }

    pub fn expanded_counter_sample(mut self, records: usize) -> Self {
        let mut body = Vec::new();
        push_u32s(&mut body, &[self.next_sequence(), 0, 3]);
        push_records(&mut body, interface_counter_records(records));
        self.samples.push((SAMPLE_FORMAT_EXPANDED_COUNTER, body));
        self
    }

    /// Sample with an arbitrary format tag and body.
    pub fn raw_sample(mut self, format: u32, body: &[u8]) -> Self {
        self.samples.push((format, body.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32s(&mut out, &[crate::sflow::VERSION, self.agent_type]);
        out.extend_from_slice(&self.agent);
        push_u32s(
            &mut out,
            &[0, self.sequence_number, 123_456, self.samples.len() as u32],
        );
        for (format, body) in self.samples {
            push_u32s(&mut out, &[format, body.len() as u32]);
            out.extend_from_slice(&body);
        }
        out
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence_number += 1;
        self.sequence_number
    }
}

/// Ethernet/IPv4/TCP frame 00:11:22:33:44:55 <- 66:77:88:99:aa:bb,
/// 172.16.0.1:12345 -> 172.16.0.2:443, TTL 64, SYN+ACK, 1514 bytes on the wire.
pub fn sampled_tcp_header_record() -> RawRecord {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    frame.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
    frame.extend_from_slice(&0x0800_u16.to_be_bytes());
    frame.extend_from_slice(&[
        0x45, 0x10, 0x05, 0xdc, 0x12, 0x34, 0x40, 0x00, 64, 6, 0, 0, 172, 16, 0, 1, 172, 16, 0, 2,
    ]);
    frame.extend_from_slice(&12_345_u16.to_be_bytes());
    frame.extend_from_slice(&443_u16.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x12, 0xff, 0xff, 0, 0, 0, 0]);

    let mut body = Vec::new();
    push_u32s(
        &mut body,
        &[HEADER_PROTOCOL_ETHERNET, 1514, 4, frame.len() as u32],
    );
    body.extend_from_slice(&frame);
    while body.len() % 4 != 0 {
        body.push(0);
    }
    (FLOW_RECORD_SAMPLED_HEADER, body)
}

/// Sampled IPv4 record for a 1000-byte TCP packet to port 80.
pub fn sampled_ipv4_record(src: [u8; 4], dst: [u8; 4]) -> RawRecord {
    let mut body = Vec::new();
    push_u32s(&mut body, &[1000, 6]);
    body.extend_from_slice(&src);
    body.extend_from_slice(&dst);
    push_u32s(&mut body, &[40_000, 80, 0x10, 0]);
    (FLOW_RECORD_SAMPLED_IPV4, body)
}

/// Sampled Ethernet record 00:11:22:33:44:55 -> 66:77:88:99:aa:bb, IPv4.
pub fn sampled_ethernet_record(length: u32) -> RawRecord {
    let mut body = Vec::new();
    push_u32s(&mut body, &[length]);
    body.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    body.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
    push_u32s(&mut body, &[0x0800]);
    (FLOW_RECORD_SAMPLED_ETHERNET, body)
}

pub fn extended_switch_record(src_vlan: u32, dst_vlan: u32) -> RawRecord {
    let mut body = Vec::new();
    push_u32s(&mut body, &[src_vlan, 0, dst_vlan, 0]);
    (FLOW_RECORD_EXTENDED_SWITCH, body)
}

pub fn extended_router_record(next_hop: [u8; 4], src_mask: u32, dst_mask: u32) -> RawRecord {
    let mut body = Vec::new();
    push_u32s(&mut body, &[ADDRESS_TYPE_IPV4]);
    body.extend_from_slice(&next_hop);
    push_u32s(&mut body, &[src_mask, dst_mask]);
    (FLOW_RECORD_EXTENDED_ROUTER, body)
}

fn interface_counter_records(count: usize) -> Vec<RawRecord> {
    (0..count)
        .map(|i| {
            let mut body = Vec::new();
            push_u32s(&mut body, &[i as u32 + 1, 6]);
            body.extend_from_slice(&10_000_000_000_u64.to_be_bytes());
            push_u32s(&mut body, &[1, 3]);
            body.extend_from_slice(&1_000_000_u64.to_be_bytes());
            push_u32s(&mut body, &[100, 0, 0, 0, 0, 0]);
            body.extend_from_slice(&2_000_000_u64.to_be_bytes());
            push_u32s(&mut body, &[200, 0, 0, 0, 0, 0]);
            (COUNTER_RECORD_INTERFACE, body)
        })
        .collect()
}

fn push_records(out: &mut Vec<u8>, records: Vec<RawRecord>) {
    push_u32s(out, &[records.len() as u32]);
    for (format, body) in records {
        push_u32s(out, &[format, body.len() as u32]);
        out.extend_from_slice(&body);
    }
}

fn push_u32s(out: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
}
