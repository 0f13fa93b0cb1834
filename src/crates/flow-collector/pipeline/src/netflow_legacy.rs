//! NetFlow v5 decoder adapter.

use crate::decoder::{FlowDecoder, Stages};
use crate::error::{DecodeError, ErrorKind, Protocol};
use crate::metrics::{DATA_FLOW_SET, Metrics, VERSION_5};
use crate::packet::{EnrichmentContext, RawPacket, router_key};
use crate::stage::{Enrich, Transform, Transport};
use flow_wire::PacketV5;
use flow_wire::netflow_legacy::decode_message;
use std::sync::Arc;
use std::time::Instant;

pub struct NetFlowLegacyDecoder<T> {
    metrics: Arc<Metrics>,
    stages: Stages<PacketV5, (), T>,
}

impl<T> NetFlowLegacyDecoder<T> {
    pub fn new(
        metrics: Arc<Metrics>,
        transform: impl Transform<PacketV5, (), T> + 'static,
        enrich: impl Enrich<T> + 'static,
    ) -> Self {
        Self {
            metrics,
            stages: Stages::new(transform, enrich),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport<T>>) -> Self {
        self.stages.set_transport(transport);
        self
    }
}

impl<T> FlowDecoder for NetFlowLegacyDecoder<T> {
    fn name(&self) -> &'static str {
        Protocol::NetFlowLegacy.name()
    }

    fn decode(&self, packet: RawPacket) -> Result<(), DecodeError> {
        let router = router_key(&packet.source);
        let ctx = EnrichmentContext::for_packet(&packet);

        let started = Instant::now();
        let message = match decode_message(&packet.payload) {
            Ok(message) => message,
            Err(err) => {
                let err = DecodeError::from(err);
                // Only version mismatches have a series; other failures are
                // left to the caller's decoder error count.
                if err.kind() == ErrorKind::VersionMismatch {
                    self.metrics
                        .netflow_errors
                        .with_label_values(&[&router, err.kind().label()])
                        .inc();
                }
                return Err(err);
            }
        };

        self.metrics
            .netflow_stats
            .with_label_values(&[&router, VERSION_5])
            .inc();
        self.metrics
            .netflow_set_stats_sum
            .with_label_values(&[&router, VERSION_5, DATA_FLOW_SET])
            .inc_by(u64::from(message.header.count));

        let output = self.stages.transform(&message, &());
        self.metrics.observe_decode_time(self.name(), started.elapsed());

        self.stages.complete(
            output,
            &ctx,
            &self.metrics,
            Protocol::NetFlowLegacy,
            &router,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::CapturingTransport;
    use crate::metrics::counter_total;
    use crate::stage::TransformOutput;
    use flow_wire::fixtures::synthetic_v5_packet;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Debug, Clone, PartialEq)]
    struct Flow {
        src: Ipv4Addr,
        time_received: u64,
        sampler: Option<IpAddr>,
    }

    fn transform(packet: &PacketV5, _: &()) -> TransformOutput<Flow> {
        TransformOutput::ok(
            packet
                .flowsets
                .iter()
                .map(|r| Flow {
                    src: r.src_addr,
                    time_received: 0,
                    sampler: None,
                })
                .collect(),
        )
    }

    fn enrich(flow: &mut Flow, ctx: &EnrichmentContext) {
        flow.time_received = ctx.time_received;
        flow.sampler = ctx.sampler_address;
    }

    fn source() -> SocketAddr {
        "192.0.2.1:2055".parse().unwrap()
    }

    fn packets(metrics: &Metrics, router: &str) -> u64 {
        metrics
            .netflow_stats
            .with_label_values(&[router, "5"])
            .get()
    }

    fn decode_times(metrics: &Metrics) -> u64 {
        metrics
            .decoder_time
            .with_label_values(&["NetFlowV5"])
            .get_sample_count()
    }

    fn decoder(
        metrics: &Arc<Metrics>,
    ) -> (NetFlowLegacyDecoder<Flow>, Arc<CapturingTransport<Flow>>) {
        let transport = Arc::new(CapturingTransport::<Flow>::default());
        let decoder = NetFlowLegacyDecoder::new(Arc::clone(metrics), transform, enrich)
            .with_transport(transport.clone());
        (decoder, transport)
    }

    #[test]
    fn well_formed_packet_updates_counters_and_publishes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (decoder, transport) = decoder(&metrics);
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_100);

        decoder
            .decode(RawPacket::new(source(), synthetic_v5_packet(30), at))
            .expect("valid v5 packet");

        assert_eq!(packets(&metrics, "192.0.2.1"), 1);
        assert_eq!(
            metrics
                .netflow_set_stats_sum
                .with_label_values(&["192.0.2.1", "5", "DataFlowSet"])
                .get(),
            30
        );
        assert_eq!(decode_times(&metrics), 1);
        assert_eq!(counter_total(&metrics.netflow_errors), 0);

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 30);
        for flow in &batches[0] {
            assert_eq!(flow.time_received, 1_700_000_100);
            assert_eq!(flow.sampler, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
        }
        assert_eq!(batches[0][0].src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(batches[0][29].src, Ipv4Addr::new(10, 0, 0, 30));
    }

    #[test]
    fn unsupported_version_is_counted_and_dropped() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (decoder, transport) = decoder(&metrics);
        let mut payload = synthetic_v5_packet(1);
        payload[1] = 9;

        for _ in 0..2 {
            let err = decoder
                .decode(RawPacket::untimed(source(), payload.clone()))
                .expect_err("v9 header must be rejected");
            assert_eq!(err.kind(), ErrorKind::VersionMismatch);
        }

        assert_eq!(
            metrics
                .netflow_errors
                .with_label_values(&["192.0.2.1", "error_version"])
                .get(),
            2
        );
        assert_eq!(counter_total(&metrics.netflow_stats), 0);
        assert_eq!(counter_total(&metrics.netflow_set_stats_sum), 0);
        assert_eq!(decode_times(&metrics), 0);
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn truncated_packet_is_a_decoding_error() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (decoder, transport) = decoder(&metrics);
        let mut payload = synthetic_v5_packet(3);
        payload.truncate(payload.len() - 1);

        let err = decoder
            .decode(RawPacket::untimed(source(), payload))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert_eq!(counter_total(&metrics.netflow_errors), 0);
        assert_eq!(counter_total(&metrics.netflow_stats), 0);
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn empty_record_count_is_a_decoding_error() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (decoder, transport) = decoder(&metrics);

        let err = decoder
            .decode(RawPacket::untimed(source(), synthetic_v5_packet(0)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert_eq!(counter_total(&metrics.netflow_errors), 0);
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn transform_without_records_publishes_an_empty_batch() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let transport = Arc::new(CapturingTransport::<Flow>::default());
        let decoder = NetFlowLegacyDecoder::new(
            Arc::clone(&metrics),
            |_: &PacketV5, _: &()| TransformOutput::<Flow>::ok(Vec::new()),
            enrich,
        )
        .with_transport(transport.clone());

        decoder
            .decode(RawPacket::untimed(source(), synthetic_v5_packet(2)))
            .unwrap();

        assert_eq!(transport.batches(), vec![Vec::<Flow>::new()]);
        assert_eq!(packets(&metrics, "192.0.2.1"), 1);
    }

    #[test]
    fn mapped_ipv6_source_uses_ipv4_router_key() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (decoder, transport) = decoder(&metrics);
        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv4Addr::new(192, 0, 2, 1).to_ipv6_mapped()),
            2055,
        );

        decoder
            .decode(RawPacket::untimed(mapped, synthetic_v5_packet(1)))
            .unwrap();

        assert_eq!(packets(&metrics, "192.0.2.1"), 1);
        assert_eq!(
            transport.batches()[0][0].sampler,
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
    }

    #[test]
    fn works_without_transport() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let decoder = NetFlowLegacyDecoder::new(Arc::clone(&metrics), transform, enrich);
        decoder
            .decode(RawPacket::untimed(source(), synthetic_v5_packet(2)))
            .unwrap();
        assert_eq!(packets(&metrics, "192.0.2.1"), 1);
    }
}
