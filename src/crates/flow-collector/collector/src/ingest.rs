use anyhow::{Context, Result};
use flow_pipeline::{FlowDecoder, Metrics, RawPacket, router_key};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// How long a blocked receive waits before the worker rechecks shutdown.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One protocol listener: where to bind and how many workers share it.
pub(crate) struct FlowRoutine {
    pub(crate) decoder: Arc<dyn FlowDecoder>,
    pub(crate) workers: usize,
    pub(crate) addr: IpAddr,
    pub(crate) port: u16,
    pub(crate) reuse_port: bool,
    pub(crate) max_packet_size: usize,
}

/// Binds the listener and runs its workers until `shutdown` fires. Only a
/// bind failure ends it early.
pub(crate) async fn flow_routine(
    routine: FlowRoutine,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let sockets = bind_sockets(
        SocketAddr::new(routine.addr, routine.port),
        routine.workers,
        routine.reuse_port,
    )?;
    serve(
        sockets,
        routine.workers,
        routine.decoder,
        routine.max_packet_size,
        metrics,
        shutdown,
    )
    .await;
    Ok(())
}

/// One socket per worker with SO_REUSEPORT, otherwise a single socket the
/// workers share.
pub(crate) fn bind_sockets(
    listen: SocketAddr,
    workers: usize,
    reuse_port: bool,
) -> Result<Vec<Arc<UdpSocket>>> {
    let first = bind_udp(listen, reuse_port)
        .with_context(|| format!("failed to bind {}", listen))?;
    if !reuse_port {
        return Ok(vec![Arc::new(first)]);
    }

    // Port 0 resolves on the first bind; the other workers join that port.
    let bound = first
        .local_addr()
        .with_context(|| format!("failed to read local address of {}", listen))?;
    let mut sockets = vec![Arc::new(first)];
    for _ in 1..workers {
        let socket =
            bind_udp(bound, true).with_context(|| format!("failed to bind {}", bound))?;
        sockets.push(Arc::new(socket));
    }
    Ok(sockets)
}

fn bind_udp(listen: SocketAddr, reuse_port: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(listen), Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_port {
        set_reuse_port(&socket)?;
    }
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
    socket.bind(&listen.into())?;
    Ok(socket.into())
}

#[cfg(unix)]
fn set_reuse_port(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_port(true)
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &Socket) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_REUSEPORT is not available on this platform",
    ))
}

/// Runs `workers` receive loops spread over `sockets` on the blocking pool
/// and waits for all of them to stop. Decoding, enrichment and publishing
/// happen inline on the worker, so a slow stage never holds an async thread.
pub(crate) async fn serve(
    sockets: Vec<Arc<UdpSocket>>,
    workers: usize,
    decoder: Arc<dyn FlowDecoder>,
    max_packet_size: usize,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) {
    if sockets.is_empty() {
        return;
    }

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers.max(1) {
        let socket = Arc::clone(&sockets[worker % sockets.len()]);
        let decoder = Arc::clone(&decoder);
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, &socket, decoder.as_ref(), max_packet_size, &metrics, &shutdown);
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await
            && !err.is_cancelled()
        {
            tracing::error!("flow worker join error: {}", err);
        }
    }
}

fn run_worker(
    worker: usize,
    socket: &UdpSocket,
    decoder: &dyn FlowDecoder,
    max_packet_size: usize,
    metrics: &Metrics,
    shutdown: &CancellationToken,
) {
    let name = decoder.name();
    let worker_label = worker.to_string();
    let (local_ip, local_port) = match socket.local_addr() {
        Ok(addr) => (addr.ip().to_string(), addr.port().to_string()),
        Err(_) => (String::new(), String::new()),
    };
    tracing::info!(
        "{} worker {} listening on {}:{}",
        name,
        worker,
        local_ip,
        local_port
    );

    let mut buffer = vec![0_u8; max_packet_size];
    while !shutdown.is_cancelled() {
        let (received, source) = match socket.recv_from(&mut buffer) {
            Ok(result) => result,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(err) => {
                tracing::warn!("udp recv error: {}", err);
                continue;
            }
        };

        if received == 0 {
            continue;
        }

        let remote_ip = router_key(&source);
        let traffic: [&str; 4] = [&remote_ip, &local_ip, &local_port, name];
        metrics
            .traffic_bytes
            .with_label_values(&traffic)
            .inc_by(received as u64);
        metrics.traffic_packets.with_label_values(&traffic).inc();
        let per_worker = [worker_label.as_str(), name];
        metrics.decoder_stats.with_label_values(&per_worker).inc();

        let packet = RawPacket::new(source, buffer[..received].to_vec(), SystemTime::now());
        if let Err(err) = decoder.decode(packet) {
            metrics.decoder_errors.with_label_values(&per_worker).inc();
            tracing::debug!(
                "{} decode error from {} ({}): {}",
                name,
                remote_ip,
                err.kind(),
                err
            );
        }
    }

    tracing::info!("{} worker {} stopped", name, worker);
}
