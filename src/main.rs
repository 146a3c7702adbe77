use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpSocket, TcpStream},
    signal,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use streamgate::{
    Config, Gateway,
    admin::format_stats,
    analytics::GatewayStats,
    config::{ConfigHandle, LogLevel},
    inference::PipelineRegistry,
    tls, transport,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🦀 streamgate";

/// Time given to signalled sessions to send their close frames.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = setup().await;
    run_forever(config).await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() -> Config {
    // This has to be the first thing we do, the log level comes from it
    let config = Config::init().await;

    init_tracing(config.log_level);
    config
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_new(level.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new(LogLevel::default().filter_directive()));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever(config: Config) -> io::Result<()> {
    let stats = Arc::new(GatewayStats::new());
    let gateway = Gateway::new(
        config.limits.clone(),
        Arc::new(config.clients.clone()),
        Arc::new(PipelineRegistry::with_mock()),
        stats.clone(),
    );

    let maintenance = gateway.spawn_maintenance();
    let stats_logger = spawn_stats_logger(config.limits.clone(), stats);
    let tls = tls::acceptor();

    let socket = if config.listen_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    socket.bind(config.listen_addr)?;

    let listener: TcpListener = socket.listen(1024)?;
    let mut reload = ReloadSignal::new()?;

    info!(
        "{} listening on {} ({})",
        APP_NAME,
        config.listen_addr,
        if tls.is_some() { "wss" } else { "ws" }
    );

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("{} shutting down", APP_NAME);
                break;
            }

            _ = reload.recv() => {
                info!("reload requested");
                config.reload().await;
            }

            accept_res = listener.accept() => {
                let (stream, peer) = match accept_res {
                    Ok(v) => v,
                    Err(e) => { error!("accept error: {e}"); continue; }
                };

                let _ = stream.set_nodelay(true);
                tokio::spawn(handle_connection(gateway.clone(), stream, peer, tls.clone()));
            }
        }
    }

    gateway.shutdown();
    maintenance.abort();
    stats_logger.abort();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Connections -----------------------------------------------------------

async fn handle_connection(
    gateway: Arc<Gateway>,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
) {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => upgrade(gateway, stream, peer).await,
            Err(e) => warn!("tls handshake with {peer} failed: {e}"),
        },
        None => upgrade(gateway, stream, peer).await,
    }
}

async fn upgrade<S>(gateway: Arc<Gateway>, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match transport::accept(stream).await {
        Ok(ws) => {
            let outcome = gateway.serve(ws).await;
            debug!(%peer, ?outcome, "connection finished");
        }
        Err(e) => warn!("websocket upgrade from {peer} failed: {e}"),
    }
}

fn spawn_stats_logger(limits: ConfigHandle, stats: Arc<GatewayStats>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(limits.snapshot().metrics_interval).await;
            info!("gateway stats\n{}", format_stats(&stats.snapshot()));
        }
    })
}

// -----------------------------------------------------------------------------
// ----- Reload signal ---------------------------------------------------------

#[cfg(unix)]
struct ReloadSignal(signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn new() -> io::Result<Self> {
        Ok(Self(signal::unix::signal(signal::unix::SignalKind::hangup())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
