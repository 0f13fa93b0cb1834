use crate::error::{DecodeError, Protocol};
use crate::metrics::Metrics;
use crate::packet::{EnrichmentContext, RawPacket};
use crate::stage::{Enrich, Transform, TransformOutput, Transport};
use std::sync::Arc;

/// Entry point the ingestion driver calls once per received datagram.
pub trait FlowDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, packet: RawPacket) -> Result<(), DecodeError>;
}

/// Transform, enrichment and publish stages of one adapter.
pub(crate) struct Stages<M, C, T> {
    transform: Box<dyn Transform<M, C, T>>,
    enrich: Box<dyn Enrich<T>>,
    transport: Option<Arc<dyn Transport<T>>>,
}

impl<M, C, T> Stages<M, C, T> {
    pub(crate) fn new(
        transform: impl Transform<M, C, T> + 'static,
        enrich: impl Enrich<T> + 'static,
    ) -> Self {
        Self {
            transform: Box::new(transform),
            enrich: Box::new(enrich),
            transport: None,
        }
    }

    pub(crate) fn set_transport(&mut self, transport: Arc<dyn Transport<T>>) {
        self.transport = Some(transport);
    }

    pub(crate) fn transform(&self, message: &M, config: &C) -> TransformOutput<T> {
        self.transform.transform(message, config)
    }

    /// Enriches and publishes whatever the transform produced. A transform
    /// error is logged and counted, its partial records still go out.
    pub(crate) fn complete(
        &self,
        output: TransformOutput<T>,
        ctx: &EnrichmentContext,
        metrics: &Metrics,
        protocol: Protocol,
        router: &str,
    ) {
        let TransformOutput {
            mut records,
            error,
        } = output;

        if let Some(err) = error {
            metrics
                .transform_errors
                .with_label_values(&[protocol.name(), router])
                .inc();
            tracing::debug!(
                "{} transform from {} kept {} records after error: {}",
                protocol,
                router,
                records.len(),
                err
            );
        }

        for record in &mut records {
            self.enrich.enrich(record, ctx);
        }

        if let Some(transport) = &self.transport {
            transport.publish(records);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CapturingTransport;
    use super::*;
    use crate::error::TransformError;
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Debug, Clone, PartialEq)]
    struct Stamped {
        id: u32,
        time: u64,
        sampler: Option<IpAddr>,
    }

    fn stamp(record: &mut Stamped, ctx: &EnrichmentContext) {
        record.time = ctx.time_received;
        record.sampler = ctx.sampler_address;
    }

    #[test]
    fn partial_output_is_enriched_published_and_counted() {
        let metrics = Metrics::new().unwrap();
        let transport = Arc::new(CapturingTransport::<Stamped>::default());
        let mut stages = Stages::new(
            |count: &u32, _: &()| {
                let records = (0..*count)
                    .map(|id| Stamped {
                        id,
                        time: 0,
                        sampler: None,
                    })
                    .collect();
                TransformOutput::partial(records, TransformError::new("short"))
            },
            stamp,
        );
        stages.set_transport(transport.clone());

        let ctx = EnrichmentContext {
            time_received: 99,
            sampler_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        };
        let output = stages.transform(&2, &());
        stages.complete(output, &ctx, &metrics, Protocol::NetFlowLegacy, "127.0.0.1");

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(batches[0].iter().all(|r| r.time == 99));
        assert_eq!(
            metrics
                .transform_errors
                .with_label_values(&["NetFlowV5", "127.0.0.1"])
                .get(),
            1
        );
    }

    #[test]
    fn missing_transport_is_valid() {
        let metrics = Metrics::new().unwrap();
        let stages: Stages<u32, (), Stamped> =
            Stages::new(|_: &u32, _: &()| TransformOutput::default(), stamp);
        let ctx = EnrichmentContext {
            time_received: 1,
            sampler_address: None,
        };
        let output = stages.transform(&0, &());
        stages.complete(output, &ctx, &metrics, Protocol::Sflow, "192.0.2.1");
        assert_eq!(crate::metrics::counter_total(&metrics.transform_errors), 0);
    }
}
