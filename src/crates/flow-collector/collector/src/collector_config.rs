use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| {
        format!(
            "invalid duration '{}' (examples: '10s', '1m', '5m'): {}",
            value, e
        )
    })
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ListenerConfig {
    /// Workers per protocol listener.
    #[arg(long = "workers", default_value_t = 1)]
    pub(crate) workers: usize,

    /// Bind one SO_REUSEPORT socket per worker instead of sharing one socket.
    #[arg(long = "reuse-port", default_value_t = false)]
    pub(crate) reuse_port: bool,

    #[arg(long = "max-packet-size", default_value_t = 9216)]
    pub(crate) max_packet_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            reuse_port: false,
            max_packet_size: 9216,
        }
    }
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProtocolConfig {
    #[arg(long = "netflow-v5-enable", default_value_t = true, action = ArgAction::Set)]
    pub(crate) netflow_v5: bool,

    #[arg(long = "netflow-v5-listen", default_value = "0.0.0.0:2055")]
    pub(crate) netflow_v5_listen: String,

    #[arg(long = "sflow-enable", default_value_t = true, action = ArgAction::Set)]
    pub(crate) sflow: bool,

    #[arg(long = "sflow-listen", default_value = "0.0.0.0:6343")]
    pub(crate) sflow_listen: String,

    /// Decode Ethernet/IP/transport headers carried in sFlow sampled
    /// header records.
    #[arg(long = "sflow-parse-sampled-header", default_value_t = true, action = ArgAction::Set)]
    pub(crate) sflow_parse_sampled_header: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            netflow_v5: true,
            netflow_v5_listen: "0.0.0.0:2055".to_string(),
            sflow: true,
            sflow_listen: "0.0.0.0:6343".to_string(),
            sflow_parse_sampled_header: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    #[default]
    Json,
    Discard,
    None,
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OutputConfig {
    #[arg(long = "output", value_enum, default_value_t = OutputFormat::Json)]
    pub(crate) format: OutputFormat,

    /// Append JSON lines to this file instead of stdout.
    #[arg(id = "output_file", long = "output-file")]
    #[serde(default)]
    pub(crate) file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            file: None,
        }
    }
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MetricsConfig {
    #[arg(
        long = "metrics-interval",
        default_value = "30s",
        value_parser = parse_duration
    )]
    #[serde(with = "humantime_serde")]
    pub(crate) interval: Duration,

    /// Rewrite this file with the Prometheus text exposition on every tick.
    #[arg(id = "metrics_file", long = "metrics-file")]
    #[serde(default)]
    pub(crate) file: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            file: None,
        }
    }
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[command(name = "flow-collector")]
#[command(about = "NetFlow v5 and sFlow v5 collector")]
#[command(version = "0.1")]
#[serde(deny_unknown_fields)]
pub(crate) struct CollectorConfig {
    /// Load settings from a YAML file; other flags are ignored.
    #[arg(long = "config")]
    #[serde(skip)]
    pub(crate) config_file: Option<PathBuf>,

    #[arg(long = "log-filter", default_value = "info")]
    #[serde(default = "default_log_filter")]
    pub(crate) log_filter: String,

    #[command(flatten)]
    #[serde(default, rename = "listener")]
    pub(crate) listener: ListenerConfig,

    #[command(flatten)]
    #[serde(default, rename = "protocols")]
    pub(crate) protocols: ProtocolConfig,

    #[command(flatten)]
    #[serde(default, rename = "output")]
    pub(crate) output: OutputConfig,

    #[command(flatten)]
    #[serde(default, rename = "metrics")]
    pub(crate) metrics: MetricsConfig,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            log_filter: default_log_filter(),
            listener: ListenerConfig::default(),
            protocols: ProtocolConfig::default(),
            output: OutputConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl CollectorConfig {
    pub(crate) fn new() -> Result<Self> {
        let args = Self::parse();
        let cfg = match &args.config_file {
            Some(path) => {
                let mut cfg = Self::from_yaml_file(path).with_context(|| {
                    format!("failed to load collector config from {}", path.display())
                })?;
                cfg.config_file = Some(path.clone());
                cfg
            }
            None => args,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg = serde_yaml::from_str::<Self>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(cfg)
    }

    pub(crate) fn netflow_v5_listen(&self) -> Result<SocketAddr> {
        self.protocols
            .netflow_v5_listen
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "invalid protocols.netflow_v5_listen address: {}",
                    self.protocols.netflow_v5_listen
                )
            })
    }

    pub(crate) fn sflow_listen(&self) -> Result<SocketAddr> {
        self.protocols
            .sflow_listen
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "invalid protocols.sflow_listen address: {}",
                    self.protocols.sflow_listen
                )
            })
    }

    fn validate(&self) -> Result<()> {
        if self.listener.workers == 0 {
            anyhow::bail!("listener.workers must be greater than 0");
        }
        if self.listener.max_packet_size == 0 {
            anyhow::bail!("listener.max_packet_size must be greater than 0");
        }
        if !(self.protocols.netflow_v5 || self.protocols.sflow) {
            anyhow::bail!("at least one protocol must be enabled");
        }

        let netflow = if self.protocols.netflow_v5 {
            Some(self.netflow_v5_listen()?)
        } else {
            None
        };
        let sflow = if self.protocols.sflow {
            Some(self.sflow_listen()?)
        } else {
            None
        };
        if let (Some(netflow), Some(sflow)) = (netflow, sflow)
            && netflow == sflow
        {
            anyhow::bail!("netflow v5 and sflow cannot share listen address {netflow}");
        }

        if self.metrics.interval.is_zero() {
            anyhow::bail!("metrics.interval must be greater than 0");
        }
        if self.output.file.is_some() && self.output.format != OutputFormat::Json {
            anyhow::bail!("output.file is only valid with the json output format");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = CollectorConfig::default();
        cfg.validate().expect("default configuration should be valid");
        assert_eq!(cfg.netflow_v5_listen().unwrap().port(), 2055);
        assert_eq!(cfg.sflow_listen().unwrap().port(), 6343);
    }

    #[test]
    fn cli_defaults_match_struct_defaults() {
        let cli = CollectorConfig::parse_from(["flow-collector"]);
        let defaults = CollectorConfig::default();
        assert_eq!(cli.listener.workers, defaults.listener.workers);
        assert_eq!(cli.listener.reuse_port, defaults.listener.reuse_port);
        assert_eq!(cli.protocols.sflow_listen, defaults.protocols.sflow_listen);
        assert_eq!(cli.metrics.interval, defaults.metrics.interval);
        assert_eq!(cli.output.format, defaults.output.format);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = CollectorConfig::parse_from([
            "flow-collector",
            "--workers",
            "4",
            "--reuse-port",
            "--sflow-listen",
            "127.0.0.1:16343",
            "--output",
            "discard",
            "--netflow-v5-enable",
            "false",
            "--metrics-interval",
            "5s",
        ]);
        assert_eq!(cli.listener.workers, 4);
        assert!(cli.listener.reuse_port);
        assert_eq!(cli.protocols.sflow_listen, "127.0.0.1:16343");
        assert_eq!(cli.output.format, OutputFormat::Discard);
        assert!(!cli.protocols.netflow_v5);
        assert!(cli.protocols.sflow);
        assert_eq!(cli.metrics.interval, Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = CollectorConfig::default();
        cfg.listener.workers = 0;

        let err = cfg.validate().expect_err("expected validation error");
        assert!(
            err.to_string()
                .contains("listener.workers must be greater than 0")
        );
    }

    #[test]
    fn validate_rejects_all_protocols_disabled() {
        let mut cfg = CollectorConfig::default();
        cfg.protocols.netflow_v5 = false;
        cfg.protocols.sflow = false;

        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("at least one protocol"));
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let mut cfg = CollectorConfig::default();
        cfg.protocols.sflow_listen = "not-an-address".to_string();

        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("invalid protocols.sflow_listen"));
    }

    #[test]
    fn validate_ignores_disabled_protocol_address() {
        let mut cfg = CollectorConfig::default();
        cfg.protocols.sflow = false;
        cfg.protocols.sflow_listen = "not-an-address".to_string();

        cfg.validate().expect("disabled protocol address is not checked");
    }

    #[test]
    fn validate_rejects_shared_listen_address() {
        let mut cfg = CollectorConfig::default();
        cfg.protocols.sflow_listen = cfg.protocols.netflow_v5_listen.clone();

        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("cannot share listen address"));
    }

    #[test]
    fn validate_rejects_output_file_without_json() {
        let mut cfg = CollectorConfig::default();
        cfg.output.format = OutputFormat::Discard;
        cfg.output.file = Some(PathBuf::from("/tmp/flows.jsonl"));

        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("output.file is only valid"));
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listener:\n  workers: 3\n  reuse_port: true\n  max_packet_size: 1500\n\
             protocols:\n  netflow_v5: false\n  netflow_v5_listen: \"0.0.0.0:2055\"\n  \
             sflow: true\n  sflow_listen: \"127.0.0.1:6343\"\n  sflow_parse_sampled_header: false\n\
             metrics:\n  interval: 1m\n"
        )
        .unwrap();

        let cfg = CollectorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(cfg.listener.workers, 3);
        assert!(cfg.listener.reuse_port);
        assert!(!cfg.protocols.netflow_v5);
        assert!(!cfg.protocols.sflow_parse_sampled_header);
        assert_eq!(cfg.metrics.interval, Duration::from_secs(60));
        assert_eq!(cfg.output.format, OutputFormat::Json);
        assert_eq!(cfg.log_filter, "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn yaml_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listener:\n  workerz: 3\n").unwrap();

        let err = CollectorConfig::from_yaml_file(file.path()).expect_err("expected parse error");
        assert!(err.to_string().contains("failed to parse"));
    }
}
