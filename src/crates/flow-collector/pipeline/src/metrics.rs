//! Labelled counters and histograms shared by every decoder and worker.
//!
//! Every family is a `prometheus` vector registered on a registry owned by
//! [`Metrics`]. A label tuple resolves to its own atomic series, so workers
//! only contend on the family lock the first time a tuple shows up.

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Version label used by both NetFlow v5 and sFlow v5 series.
pub const VERSION_5: &str = "5";

/// Set type label for NetFlow v5 record sums.
pub const DATA_FLOW_SET: &str = "DataFlowSet";

/// Bucket upper bounds, in microseconds, for decode latency.
pub const DECODE_TIME_BUCKETS_US: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
    50_000.0,
];

/// Process-wide registry. Build once and share behind an `Arc`.
pub struct Metrics {
    registry: Registry,
    pub netflow_stats: IntCounterVec,
    pub netflow_errors: IntCounterVec,
    pub netflow_set_stats_sum: IntCounterVec,
    pub sflow_stats: IntCounterVec,
    pub sflow_errors: IntCounterVec,
    pub sflow_sample_stats_sum: IntCounterVec,
    pub sflow_sample_records_stats_sum: IntCounterVec,
    pub decoder_time: HistogramVec,
    pub transform_errors: IntCounterVec,
    pub traffic_bytes: IntCounterVec,
    pub traffic_packets: IntCounterVec,
    pub decoder_stats: IntCounterVec,
    pub decoder_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            netflow_stats: counter_vec(
                &registry,
                "flow_process_nf_count",
                "NetFlow packets processed.",
                &["router", "version"],
            )?,
            netflow_errors: counter_vec(
                &registry,
                "flow_process_nf_errors_count",
                "NetFlow packets rejected for an unsupported version.",
                &["router", "error"],
            )?,
            netflow_set_stats_sum: counter_vec(
                &registry,
                "flow_process_nf_flowset_sum",
                "NetFlow flow records declared by processed packets.",
                &["router", "version", "type"],
            )?,
            sflow_stats: counter_vec(
                &registry,
                "flow_process_sf_count",
                "sFlow datagrams processed.",
                &["router", "agent", "version"],
            )?,
            sflow_errors: counter_vec(
                &registry,
                "flow_process_sf_errors_count",
                "sFlow datagrams that failed to decode.",
                &["router", "error"],
            )?,
            sflow_sample_stats_sum: counter_vec(
                &registry,
                "flow_process_sf_samples_sum",
                "sFlow samples processed, by sample type.",
                &["router", "agent", "version", "type"],
            )?,
            sflow_sample_records_stats_sum: counter_vec(
                &registry,
                "flow_process_sf_samples_records_sum",
                "sFlow records carried by processed samples, by sample type.",
                &["router", "agent", "version", "type"],
            )?,
            decoder_time: histogram_vec(
                &registry,
                "flow_summary_decoding_time_us",
                "Time spent decoding and transforming one datagram, in microseconds.",
                &["name"],
                DECODE_TIME_BUCKETS_US,
            )?,
            transform_errors: counter_vec(
                &registry,
                "flow_transform_errors_count",
                "Datagrams whose transform reported an error.",
                &["name", "router"],
            )?,
            traffic_bytes: counter_vec(
                &registry,
                "flow_traffic_bytes",
                "Bytes received by the collector.",
                &["remote_ip", "local_ip", "local_port", "type"],
            )?,
            traffic_packets: counter_vec(
                &registry,
                "flow_traffic_packets",
                "Datagrams received by the collector.",
                &["remote_ip", "local_ip", "local_port", "type"],
            )?,
            decoder_stats: counter_vec(
                &registry,
                "flow_decoder_count",
                "Datagrams handed to a decoder, by worker.",
                &["worker", "name"],
            )?,
            decoder_errors: counter_vec(
                &registry,
                "flow_decoder_error_count",
                "Datagrams a decoder rejected, by worker.",
                &["worker", "name"],
            )?,
            registry,
        })
    }

    /// Records one decode latency sample for decoder `name`.
    pub fn observe_decode_time(&self, name: &str, elapsed: Duration) {
        self.decoder_time
            .with_label_values(&[name])
            .observe(elapsed.as_nanos() as f64 / 1_000.0);
    }

    /// Flat view keyed by `name{labels}`, labels sorted by name. Histograms
    /// contribute their `_count` and `_sum`.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for family in self.registry.gather() {
            snapshot_family(&family, &mut out);
        }
        out
    }

    /// Prometheus text exposition of every family.
    pub fn render_text(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

/// Sum over every series of a counter family.
pub fn counter_total(family: &IntCounterVec) -> u64 {
    family
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntCounterVec> {
    let family = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(family.clone()))?;
    Ok(family)
}

fn histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: &[f64],
) -> prometheus::Result<HistogramVec> {
    let opts = HistogramOpts::new(name, help).buckets(buckets.to_vec());
    let family = HistogramVec::new(opts, labels)?;
    registry.register(Box::new(family.clone()))?;
    Ok(family)
}

fn snapshot_family(family: &MetricFamily, out: &mut BTreeMap<String, u64>) {
    let name = family.get_name();
    for metric in family.get_metric() {
        let mut labels = String::new();
        for (i, pair) in metric.get_label().iter().enumerate() {
            if i > 0 {
                labels.push(',');
            }
            let _ = write!(
                labels,
                "{}=\"{}\"",
                pair.get_name(),
                escape_label(pair.get_value())
            );
        }
        let labels = if labels.is_empty() {
            labels
        } else {
            format!("{{{labels}}}")
        };

        if metric.has_histogram() {
            let histogram = metric.get_histogram();
            out.insert(
                format!("{name}_count{labels}"),
                histogram.get_sample_count(),
            );
            out.insert(
                format!("{name}_sum{labels}"),
                histogram.get_sample_sum() as u64,
            );
        } else {
            out.insert(
                format!("{name}{labels}"),
                metric.get_counter().get_value() as u64,
            );
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counters_are_keyed_by_label_tuple() {
        let metrics = Metrics::new().unwrap();
        metrics
            .netflow_stats
            .with_label_values(&["192.0.2.1", VERSION_5])
            .inc();
        metrics
            .netflow_stats
            .with_label_values(&["192.0.2.1", VERSION_5])
            .inc_by(2);
        metrics
            .netflow_stats
            .with_label_values(&["192.0.2.2", VERSION_5])
            .inc();

        let get = |router: &str| {
            metrics
                .netflow_stats
                .with_label_values(&[router, VERSION_5])
                .get()
        };
        assert_eq!(get("192.0.2.1"), 3);
        assert_eq!(get("192.0.2.2"), 1);
        assert_eq!(get("192.0.2.3"), 0);
        assert_eq!(counter_total(&metrics.netflow_stats), 4);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let router = if i % 2 == 0 { "a" } else { "b" };
                        metrics
                            .sflow_errors
                            .with_label_values(&[router, "error_version"])
                            .inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for router in ["a", "b"] {
            assert_eq!(
                metrics
                    .sflow_errors
                    .with_label_values(&[router, "error_version"])
                    .get(),
                4000
            );
        }
    }

    #[test]
    fn decode_time_is_observed_in_microseconds() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_decode_time("sFlow", Duration::from_micros(3));
        metrics.observe_decode_time("sFlow", Duration::from_micros(80));
        metrics.observe_decode_time("sFlow", Duration::from_secs(1));

        let h = metrics.decoder_time.with_label_values(&["sFlow"]);
        assert_eq!(h.get_sample_count(), 3);
        assert_eq!(h.get_sample_sum(), 1_000_083.0);
    }

    #[test]
    fn render_text_emits_exposition_format() {
        let metrics = Metrics::new().unwrap();
        metrics
            .netflow_set_stats_sum
            .with_label_values(&["192.0.2.1", VERSION_5, DATA_FLOW_SET])
            .inc_by(30);
        metrics.observe_decode_time("NetFlowV5", Duration::from_micros(7));

        let text = metrics.render_text().unwrap();
        assert!(text.contains("# TYPE flow_process_nf_flowset_sum counter"));
        assert!(text.contains(
            "flow_process_nf_flowset_sum{router=\"192.0.2.1\",type=\"DataFlowSet\",version=\"5\"} 30"
        ));
        assert!(
            text.contains("flow_summary_decoding_time_us_bucket{name=\"NetFlowV5\",le=\"10\"} 1")
        );
        assert!(
            text.contains("flow_summary_decoding_time_us_bucket{name=\"NetFlowV5\",le=\"5\"} 0")
        );
        assert!(
            text.contains("flow_summary_decoding_time_us_bucket{name=\"NetFlowV5\",le=\"+Inf\"} 1")
        );
        assert!(text.contains("flow_summary_decoding_time_us_count{name=\"NetFlowV5\"} 1"));
    }

    #[test]
    fn snapshot_flattens_series() {
        let metrics = Metrics::new().unwrap();
        metrics
            .sflow_errors
            .with_label_values(&["192.0.2.1", "error_decoding"])
            .inc();
        metrics.observe_decode_time("sFlow", Duration::from_micros(12));

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot
                .get("flow_process_sf_errors_count{error=\"error_decoding\",router=\"192.0.2.1\"}"),
            Some(&1)
        );
        assert_eq!(
            snapshot.get("flow_summary_decoding_time_us_count{name=\"sFlow\"}"),
            Some(&1)
        );
        assert_eq!(
            snapshot.get("flow_summary_decoding_time_us_sum{name=\"sFlow\"}"),
            Some(&12)
        );
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }
}
