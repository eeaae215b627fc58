//! tunproxy - CLI Entry Point
//!
//! Settings are read from `conf.json` (or the file given with `-c`) and any
//! flag given on the command line replaces the matching file value.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunproxy::config::DEFAULT_CONFIG_PATH;
use tunproxy::tunnel::RelayMode;
use tunproxy::{Config, TunProxy, VERSION};

#[derive(Parser, Debug)]
#[command(name = "tunproxy")]
#[command(version = VERSION)]
#[command(about = "Transparent HTTP/CONNECT proxy with a domain allowlist")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Port to listen on
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Downstream proxy host
    #[arg(long = "proxy-ip")]
    proxy_ip: Option<String>,

    /// Downstream proxy port
    #[arg(long = "proxy-port")]
    proxy_port: Option<u16>,

    /// Connect to destinations directly
    #[arg(long = "no-proxy")]
    no_proxy: bool,

    /// Allowed destination domain (repeatable, replaces the file list)
    #[arg(long = "allowed-domain")]
    allowed_domains: Vec<String>,

    /// Relay timeout strategy: deadline or idle
    #[arg(long = "relay-mode")]
    relay_mode: Option<String>,

    /// Deadline / idle window in seconds
    #[arg(long = "idle-timeout")]
    idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("tunproxy-worker")
        .build()?;

    runtime.block_on(async_main())
}

fn apply_overrides(config: &mut Config, args: &Args) -> tunproxy::Result<()> {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref ip) = args.proxy_ip {
        config.proxy_ip = Some(ip.clone());
    }
    if let Some(port) = args.proxy_port {
        config.proxy_port = Some(port);
    }
    if args.no_proxy {
        config.no_proxy = true;
    }
    if !args.allowed_domains.is_empty() {
        config.allowed_domains = args.allowed_domains.clone();
    }
    if let Some(ref mode) = args.relay_mode {
        config.relay_mode = RelayMode::try_from(mode.as_str())?;
    }
    if let Some(secs) = args.idle_timeout {
        config.idle_timeout = secs;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }
    Ok(())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load before logging is set up so the file can choose the level
    let loaded = Config::load_or_default(&args.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    let overrides = apply_overrides(&mut config, &args);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tunproxy={}", config.log_level).parse()?),
        )
        .init();

    info!("tunproxy v{}", VERSION);
    info!("Loading configuration from: {}", args.config.display());

    if let Err(e) = loaded {
        error!("Failed to load configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = overrides.and_then(|_| config.validate()) {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    config.log_summary();

    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let proxy = match TunProxy::new(config).await {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to start proxy: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = proxy.run().await {
        error!("Proxy error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
