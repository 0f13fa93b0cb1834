use crate::collector_config::{OutputConfig, OutputFormat};
use crate::flow::FlowRecord;
use anyhow::{Context, Result};
use flow_pipeline::Transport;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The configured sink, kept concrete so its counters can be reported.
pub(crate) enum Output {
    Json(Arc<JsonLinesTransport<FlowRecord>>),
    Discard(Arc<DiscardTransport>),
    None,
}

impl Output {
    pub(crate) fn from_config(config: &OutputConfig) -> Result<Self> {
        Ok(match config.format {
            OutputFormat::Json => match &config.file {
                Some(path) => Self::Json(Arc::new(JsonLinesTransport::append_to(path)?)),
                None => Self::Json(Arc::new(JsonLinesTransport::stdout())),
            },
            OutputFormat::Discard => Self::Discard(Arc::new(DiscardTransport::default())),
            OutputFormat::None => Self::None,
        })
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport<FlowRecord>>> {
        match self {
            Self::Json(json) => Some(json.clone()),
            Self::Discard(discard) => Some(discard.clone()),
            Self::None => None,
        }
    }

    pub(crate) fn log_stats(&self) {
        match self {
            Self::Json(json) => {
                let errors = json.write_errors();
                if errors > 0 {
                    tracing::warn!("flow output: {} failed batch writes", errors);
                }
            }
            Self::Discard(discard) => {
                tracing::info!(
                    "flow output: discarded {} records in {} batches",
                    discard.records(),
                    discard.batches()
                );
            }
            Self::None => {}
        }
    }
}

/// Writes each record as one JSON line. A batch is written and flushed
/// under a single lock so records of one packet stay contiguous.
pub(crate) struct JsonLinesTransport<T> {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    write_errors: AtomicU64,
    _record: PhantomData<fn(T)>,
}

impl<T> JsonLinesTransport<T> {
    pub(crate) fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    pub(crate) fn append_to(path: &Path) -> Result<Self> {
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        Ok(Self::from_writer(Box::new(file)))
    }

    fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            write_errors: AtomicU64::new(0),
            _record: PhantomData,
        }
    }

    pub(crate) fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

impl<T: Serialize> Transport<T> for JsonLinesTransport<T> {
    fn publish(&self, records: Vec<T>) {
        if records.is_empty() {
            return;
        }

        let mut writer = self.writer.lock();
        let result = records
            .iter()
            .try_for_each(|record| -> io::Result<()> {
                serde_json::to_writer(&mut *writer, record)?;
                writer.write_all(b"\n")
            })
            .and_then(|()| writer.flush());

        if let Err(err) = result {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("flow output write failed: {}", err);
        }
    }
}

/// Drops records, counting them.
#[derive(Default)]
pub(crate) struct DiscardTransport {
    records: AtomicU64,
    batches: AtomicU64,
}

impl DiscardTransport {
    pub(crate) fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub(crate) fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl<T> Transport<T> for DiscardTransport {
    fn publish(&self, records: Vec<T>) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records
            .fetch_add(records.len() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRecord;
    use std::sync::Arc;
    use std::thread;

    fn record(id: usize) -> FlowRecord {
        let mut record = FlowRecord::default();
        record.set("SEQUENCE_NUM", id);
        record
    }

    #[test]
    fn json_lines_are_appended_in_batch_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.jsonl");
        let transport = JsonLinesTransport::<FlowRecord>::append_to(&path).unwrap();

        transport.publish(vec![record(1), record(2)]);
        transport.publish(Vec::new());
        transport.publish(vec![record(3)]);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"SEQUENCE_NUM":"1"}"#,
                r#"{"SEQUENCE_NUM":"2"}"#,
                r#"{"SEQUENCE_NUM":"3"}"#,
            ]
        );
        assert_eq!(transport.write_errors(), 0);
    }

    #[test]
    fn concurrent_batches_stay_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.jsonl");
        let transport = Arc::new(JsonLinesTransport::<FlowRecord>::append_to(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let transport = Arc::clone(&transport);
                thread::spawn(move || {
                    for batch in 0..50 {
                        let base = worker * 1000 + batch * 10;
                        transport.publish((base..base + 5).map(record).collect());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<usize> = content
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["SEQUENCE_NUM"].as_str().unwrap().parse().unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 4 * 50 * 5);
        for chunk in ids.chunks(5) {
            assert_eq!(chunk[0] % 10, 0);
            for pair in chunk.windows(2) {
                assert_eq!(pair[1], pair[0] + 1);
            }
        }
    }

    #[test]
    fn open_failure_has_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("flows.jsonl");
        let err = JsonLinesTransport::<FlowRecord>::append_to(&path)
            .err()
            .expect("expected open error");
        assert!(err.to_string().contains("failed to open output file"));
    }

    #[test]
    fn output_follows_configured_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig {
            format: OutputFormat::Json,
            file: Some(dir.path().join("flows.jsonl")),
        };
        assert!(matches!(Output::from_config(&config).unwrap(), Output::Json(_)));

        let config = OutputConfig {
            format: OutputFormat::Discard,
            file: None,
        };
        let output = Output::from_config(&config).unwrap();
        let transport = output.transport().expect("discard publishes");
        transport.publish(vec![record(1)]);
        match &output {
            Output::Discard(discard) => assert_eq!(discard.records(), 1),
            _ => panic!("expected discard output"),
        }

        let config = OutputConfig {
            format: OutputFormat::None,
            file: None,
        };
        assert!(Output::from_config(&config).unwrap().transport().is_none());
    }

    #[test]
    fn discard_counts_records_and_batches() {
        let transport = DiscardTransport::default();
        Transport::<FlowRecord>::publish(&transport, vec![record(1), record(2)]);
        Transport::<FlowRecord>::publish(&transport, Vec::new());
        assert_eq!(transport.records(), 2);
        assert_eq!(transport.batches(), 2);
    }
}
