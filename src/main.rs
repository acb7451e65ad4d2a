//! perfmux - network performance test server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use perfmux::config::Config;
use perfmux::net::AddressFamily;
use perfmux::serve::{Ports, Server, ServerConfig};

/// Initialize logging with optional file output
fn init_logging(log_file: Option<&str>, log_level: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = log_level.unwrap_or("info");
    let env_filter =
        EnvFilter::from_default_env().add_directive(format!("perfmux={}", level).parse()?);

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    if let Some(file_path) = log_file {
        // Expand tilde to home directory
        let expanded_path = if let Some(rest) = file_path.strip_prefix("~/") {
            dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(file_path))
        } else {
            PathBuf::from(file_path)
        };

        if let Some(parent) = expanded_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_appender = tracing_appender::rolling::daily(
            expanded_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new(".")),
            expanded_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("perfmux.log")),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep guard alive for the duration of the program
        std::mem::forget(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "perfmux")]
#[command(author, version, about = "Network performance test server")]
struct Cli {
    /// Config file (default: ~/.config/perfmux/config.toml)
    #[arg(long, env = "PERFMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Control plane port
    #[arg(long, env = "PERFMUX_CONTROL_PORT")]
    control_port: Option<u16>,

    /// TCP bandwidth port
    #[arg(long)]
    tcp_bandwidth_port: Option<u16>,

    /// TCP connections/s port
    #[arg(long)]
    tcp_cps_port: Option<u16>,

    /// TCP latency port
    #[arg(long)]
    tcp_latency_port: Option<u16>,

    /// UDP packets/s port
    #[arg(long)]
    udp_pps_port: Option<u16>,

    /// HTTP bandwidth port
    #[arg(long)]
    http_bandwidth_port: Option<u16>,

    /// Address family (ipv4, ipv6, dual)
    #[arg(long, value_parser = parse_address_family)]
    address_family: Option<AddressFamily>,

    /// Interval between per-test result lines
    #[arg(long, value_parser = parse_duration)]
    stats_interval: Option<Duration>,

    /// Disable per-test result lines
    #[arg(long)]
    no_stats: bool,

    /// Log file path (e.g., "~/.config/perfmux/perfmux.log")
    #[arg(long, env = "PERFMUX_LOG_FILE")]
    log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "PERFMUX_LOG_LEVEL")]
    log_level: Option<String>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_address_family(s: &str) -> Result<AddressFamily, String> {
    s.parse::<AddressFamily>()
}

/// Merge CLI values over the config file over defaults
fn build_server_config(cli: &Cli, file_config: &Config) -> Result<ServerConfig> {
    let file = &file_config.server;
    let defaults = Ports::default();
    let ports = Ports {
        control: cli
            .control_port
            .or(file.control_port)
            .unwrap_or(defaults.control),
        tcp_bandwidth: cli
            .tcp_bandwidth_port
            .or(file.tcp_bandwidth_port)
            .unwrap_or(defaults.tcp_bandwidth),
        tcp_cps: cli
            .tcp_cps_port
            .or(file.tcp_cps_port)
            .unwrap_or(defaults.tcp_cps),
        tcp_latency: cli
            .tcp_latency_port
            .or(file.tcp_latency_port)
            .unwrap_or(defaults.tcp_latency),
        udp_pps: cli
            .udp_pps_port
            .or(file.udp_pps_port)
            .unwrap_or(defaults.udp_pps),
        http_bandwidth: cli
            .http_bandwidth_port
            .or(file.http_bandwidth_port)
            .unwrap_or(defaults.http_bandwidth),
    };

    let address_family = match (cli.address_family, file.address_family.as_deref()) {
        (Some(family), _) => family,
        (None, Some(s)) => s.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        (None, None) => AddressFamily::default(),
    };

    let stats_interval = if cli.no_stats || file.no_stats.unwrap_or(false) {
        None
    } else {
        match (cli.stats_interval, file.stats_interval.as_deref()) {
            (Some(interval), _) => Some(interval),
            (None, Some(s)) => Some(parse_duration(s).map_err(|e| anyhow::anyhow!(e))?),
            (None, None) => ServerConfig::default().stats_interval,
        }
    };

    Ok(ServerConfig {
        ports,
        address_family,
        stats_interval,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file (falls back to defaults if not found)
    let file_config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_default(),
    };

    let log_file = cli
        .log_file
        .as_ref()
        .or(file_config.server.log_file.as_ref());
    let log_level = cli
        .log_level
        .as_ref()
        .or(file_config.server.log_level.as_ref());
    init_logging(log_file.map(|s| s.as_str()), log_level.map(|s| s.as_str()))?;

    let config = build_server_config(&cli, &file_config)?;
    info!(
        "Starting server on control port {} ({})",
        config.ports.control, config.address_family
    );
    let server = Server::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
