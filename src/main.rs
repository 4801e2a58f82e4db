//! DNS Relay - a caching DNS relay with a static rule table

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use dns_relay::config::{self, RelayConfig};
use dns_relay::dns_server::RelayServer;
use dns_relay::relay::{CorrelationTable, DnsCache, Dispatcher};
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Timestamps in local time rather than the default UTC.
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "dns-relay")]
#[command(about = "A caching DNS relay with a static rule table", long_about = None)]
struct Args {
    /// 0: warnings only, 1: one line per packet, 2: message dumps, 3: raw hex dumps
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug_level: u8,

    /// Cached records kept before the cache is flushed; 0 disables caching
    #[arg(short, long, default_value_t = 4096)]
    cache_size: usize,

    #[arg(short = 'p', long, default_value_t = 53)]
    listen_port: u16,

    /// Rules file of "<address> <name>" lines; address 0.0.0.0 blocks the name
    #[arg(short = 'f', long, default_value = "hosts.txt")]
    hosts_file: PathBuf,

    /// Upstream resolver, IP or IP:port
    #[arg(short = 's', long, default_value = "114.114.114.114", value_parser = config::parse_upstream)]
    dns_server: SocketAddr,

    #[arg(short, long, default_value = "dns_relay.log")]
    log_file: PathBuf,

    /// Also write the log to stderr
    #[arg(short = 'e', long)]
    stderr_enable: bool,

    /// Seconds to wait for an upstream response before giving up on a relayed query
    #[arg(long, default_value_t = 10)]
    relay_timeout: u64,

    /// Serve prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            debug_level: args.debug_level,
            cache_size: args.cache_size,
            listen_port: args.listen_port,
            hosts_file: args.hosts_file,
            upstream: args.dns_server,
            log_file: args.log_file,
            stderr_enable: args.stderr_enable,
            relay_timeout: Duration::from_secs(args.relay_timeout),
            metrics_addr: args.metrics_addr,
        }
    }
}

fn init_logging(config: &RelayConfig) -> Result<WorkerGuard> {
    if let Some(dir) = config.log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    // Rotated at local midnight, keeping a week of history.
    let file_appender = RollingFileAppender::new(
        &config.log_file,
        RollingConditionBasic::new().daily(),
        7,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = config
        .stderr_enable
        .then(|| fmt::layer().with_writer(std::io::stderr).with_timer(LocalTimer));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter())))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(stderr_layer)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let config = RelayConfig::from(Args::parse());
    let _guard = init_logging(&config)?;

    // Packets are dispatched inline on the receive loop; a single-threaded runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("dns-relay")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: RelayConfig) -> Result<()> {
    info!("Starting DNS Relay version {}", env!("CARGO_PKG_VERSION"));
    info!(">>> Rules file: {}", config.hosts_file.display());
    info!(">>> Upstream resolver: {}", config.upstream);

    let rules = config::load_rules(&config.hosts_file)?;
    let dispatcher = Dispatcher::new(
        rules,
        DnsCache::new(config.cache_size),
        CorrelationTable::new(),
        config.upstream,
    )
    .with_relay_timeout(config.relay_timeout);

    let server = RelayServer::new(dispatcher, config.listen_addr()).with_metrics(config.metrics_addr);
    server.run().await?;

    info!("DNS Relay stopped");
    Ok(())
}
