use std::{net::SocketAddr, sync::Arc, time::Duration};

use log::{info, warn};
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

use dnsd::{logging, HostEntry, Server, ServerConfig, StaticHandler};

#[derive(Debug, StructOpt)]
#[structopt(name = "dnsd", about = "Answer DNS queries over UDP from a static host table")]
struct Opt {
    /// Address to listen on
    #[structopt(short, long, default_value = "127.0.0.1:2053")]
    listen: SocketAddr,

    /// Host entry as name=address, may be repeated
    #[structopt(long = "host", number_of_values = 1)]
    hosts: Vec<HostEntry>,

    /// TTL of every answer, in seconds
    #[structopt(long, default_value = "300")]
    ttl: u32,

    /// Largest response that will be sent
    #[structopt(long, default_value = "512")]
    max_message_size: usize,

    #[structopt(long, default_value = "1024")]
    max_in_flight: usize,

    /// How long to wait for in-flight requests on shutdown, in milliseconds
    #[structopt(long, default_value = "2000")]
    shutdown_grace_ms: u64,

    /// Per-request deadline in milliseconds
    #[structopt(long)]
    request_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();

    let mut hosts = StaticHandler::new(opt.ttl);
    hosts.extend(opt.hosts);
    if hosts.is_empty() {
        warn!("no --host entries given, every query will be answered with NXDOMAIN");
    } else {
        info!("serving {} names", hosts.len());
    }

    let config = ServerConfig::builder()
        .bind_addr(opt.listen)
        .max_message_size(opt.max_message_size)
        .max_in_flight(opt.max_in_flight)
        .shutdown_grace(Duration::from_millis(opt.shutdown_grace_ms))
        .request_timeout(opt.request_timeout_ms.map(Duration::from_millis))
        .build();

    let cancel = CancellationToken::new();
    let handle = Server::new(config, Arc::new(hosts), logging::global(), cancel.clone())
        .start()
        .await?;

    shutdown_signal().await?;
    info!("shutting down");
    cancel.cancel();
    handle.stopped().await?;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
