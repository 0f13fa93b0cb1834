//! sFlow v5 decoder adapter.
//!
//! Besides the per-datagram counters, every sample in a decoded datagram is
//! classified and counted together with the number of records it carries.
//! Records produced from sFlow are enriched without a sampler address; the
//! agent address inside the datagram identifies the exporter instead.

use crate::decoder::{FlowDecoder, Stages};
use crate::error::{DecodeError, Protocol};
use crate::metrics::{Metrics, VERSION_5};
use crate::packet::{EnrichmentContext, RawPacket, router_key};
use crate::stage::{Enrich, Transform, Transport};
use flow_wire::Datagram;
use flow_wire::sflow::decode_message;
use sflow_parser::models::{Address, SampleData};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Flow,
    Counter,
    ExpandedCounter,
    ExpandedFlow,
    Unknown,
}

impl SampleKind {
    pub fn of(sample: &SampleData) -> Self {
        match sample {
            SampleData::FlowSample(_) => Self::Flow,
            SampleData::CountersSample(_) => Self::Counter,
            SampleData::CountersSampleExpanded(_) => Self::ExpandedCounter,
            SampleData::FlowSampleExpanded(_) => Self::ExpandedFlow,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Flow => "FlowSample",
            Self::Counter => "CounterSample",
            Self::ExpandedCounter => "ExpandedCounterSample",
            Self::ExpandedFlow => "ExpandedFlowSample",
            Self::Unknown => "unknown",
        }
    }

    fn record_count(sample: &SampleData) -> usize {
        match sample {
            SampleData::FlowSample(s) => s.flow_records.len(),
            SampleData::CountersSample(s) => s.counters.len(),
            SampleData::FlowSampleExpanded(s) => s.flow_records.len(),
            SampleData::CountersSampleExpanded(s) => s.counters.len(),
            _ => 0,
        }
    }
}

fn agent_label(address: &Address) -> String {
    match address {
        Address::IPv4(ip) => ip.to_string(),
        Address::IPv6(ip) => ip.to_string(),
        Address::Unknown => String::new(),
    }
}

pub struct SflowDecoder<T, C> {
    metrics: Arc<Metrics>,
    config: C,
    stages: Stages<Datagram, C, T>,
}

impl<T, C> SflowDecoder<T, C>
where
    C: Send + Sync,
{
    pub fn new(
        metrics: Arc<Metrics>,
        config: C,
        transform: impl Transform<Datagram, C, T> + 'static,
        enrich: impl Enrich<T> + 'static,
    ) -> Self {
        Self {
            metrics,
            config,
            stages: Stages::new(transform, enrich),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport<T>>) -> Self {
        self.stages.set_transport(transport);
        self
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    fn record_samples(&self, router: &str, datagram: &Datagram) {
        let agent = agent_label(&datagram.agent_address);
        self.metrics
            .sflow_stats
            .with_label_values(&[router, &agent, VERSION_5])
            .inc();

        for sample in &datagram.samples {
            let data = &sample.sample_data;
            let labels = [router, agent.as_str(), VERSION_5, SampleKind::of(data).label()];
            self.metrics
                .sflow_sample_stats_sum
                .with_label_values(&labels)
                .inc();
            self.metrics
                .sflow_sample_records_stats_sum
                .with_label_values(&labels)
                .inc_by(SampleKind::record_count(data) as u64);
        }
    }
}

impl<T, C> FlowDecoder for SflowDecoder<T, C>
where
    C: Send + Sync,
{
    fn name(&self) -> &'static str {
        Protocol::Sflow.name()
    }

    fn decode(&self, packet: RawPacket) -> Result<(), DecodeError> {
        let router = router_key(&packet.source);
        let ctx = EnrichmentContext::for_packet(&packet).without_sampler();

        let started = Instant::now();
        let datagram = match decode_message(&packet.payload) {
            Ok(datagram) => datagram,
            Err(err) => {
                let err = DecodeError::from(err);
                self.metrics
                    .sflow_errors
                    .with_label_values(&[&router, err.kind().label()])
                    .inc();
                return Err(err);
            }
        };

        self.record_samples(&router, &datagram);

        let output = self.stages.transform(&datagram, &self.config);
        self.metrics.observe_decode_time(self.name(), started.elapsed());

        self.stages
            .complete(output, &ctx, &self.metrics, Protocol::Sflow, &router);
        Ok(())
    }
}
