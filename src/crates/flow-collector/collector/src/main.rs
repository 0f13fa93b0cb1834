//! flow-collector standalone binary

mod collector_config;
mod flow;
mod ingest;
mod report;
mod tracing_setup;
mod transform;
mod transport;

use anyhow::Result;
use collector_config::CollectorConfig;
use flow_pipeline::{FlowDecoder, Metrics, NetFlowLegacyDecoder, SflowDecoder};
use ingest::FlowRoutine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use transform::SflowConfig;
use transport::Output;

fn routine(
    config: &CollectorConfig,
    listen: SocketAddr,
    decoder: Arc<dyn FlowDecoder>,
) -> FlowRoutine {
    FlowRoutine {
        decoder,
        workers: config.listener.workers,
        addr: listen.ip(),
        port: listen.port(),
        reuse_port: config.listener.reuse_port,
        max_packet_size: config.listener.max_packet_size,
    }
}

/// One routine per enabled protocol, each with its own decoder.
fn build_routines(
    config: &CollectorConfig,
    metrics: &Arc<Metrics>,
    output: &Output,
) -> Result<Vec<FlowRoutine>> {
    let mut routines = Vec::new();

    if config.protocols.netflow_v5 {
        let mut decoder = NetFlowLegacyDecoder::new(
            Arc::clone(metrics),
            transform::netflow_v5,
            flow::enrich,
        );
        if let Some(transport) = output.transport() {
            decoder = decoder.with_transport(transport);
        }
        routines.push(routine(config, config.netflow_v5_listen()?, Arc::new(decoder)));
    }

    if config.protocols.sflow {
        let sflow_config = SflowConfig {
            parse_sampled_header: config.protocols.sflow_parse_sampled_header,
        };
        let mut decoder = SflowDecoder::new(
            Arc::clone(metrics),
            sflow_config,
            transform::sflow,
            flow::enrich,
        );
        if let Some(transport) = output.transport() {
            decoder = decoder.with_transport(transport);
        }
        routines.push(routine(config, config.sflow_listen()?, Arc::new(decoder)));
    }

    Ok(routines)
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[tokio::main]
async fn main() {
    let config = match CollectorConfig::new() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing_setup::init_tracing("info");
            tracing::error!("failed to load configuration: {err:#}");
            std::process::exit(1);
        }
    };
    tracing_setup::init_tracing(&config.log_filter);

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(err) => {
            tracing::error!("failed to register metrics: {err}");
            std::process::exit(1);
        }
    };
    let output = match Output::from_config(&config.output) {
        Ok(output) => Arc::new(output),
        Err(err) => {
            tracing::error!("failed to open flow output: {err:#}");
            std::process::exit(1);
        }
    };
    let routines = match build_routines(&config, &metrics, &output) {
        Ok(routines) => routines,
        Err(err) => {
            tracing::error!("failed to build flow listeners: {err:#}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    let mut tasks = Vec::with_capacity(routines.len());
    for routine in routines {
        let name = routine.decoder.name();
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        tasks.push((
            name,
            tokio::spawn(async move {
                let result = ingest::flow_routine(routine, metrics, shutdown.clone()).await;
                if result.is_err() {
                    shutdown.cancel();
                }
                result
            }),
        ));
    }

    let reporter_task = tokio::spawn(report::run_reporter(
        Arc::clone(&metrics),
        Arc::clone(&output),
        config.metrics.interval,
        config.metrics.file.clone(),
        shutdown.clone(),
    ));

    let mut exit_code = 0;

    tokio::select! {
        result = wait_for_signal() => match result {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(err) => {
                tracing::error!("failed to listen for shutdown signal: {err}");
                exit_code = 1;
            }
        },
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();

    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!("{name} listener error: {err:#}");
                exit_code = 1;
            }
            Err(err) if !err.is_cancelled() => {
                tracing::error!("{name} listener join error: {err}");
                exit_code = 1;
            }
            Err(_) => {}
        }
    }

    if let Err(err) = reporter_task.await
        && !err.is_cancelled()
    {
        tracing::error!("metrics reporter join error: {err}");
        exit_code = 1;
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
