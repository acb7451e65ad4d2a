//! Server mode implementation
//!
//! Binds the control port and every data-plane port at startup, then accepts
//! control connections for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::control;
use crate::http;
use crate::net::{self, AddressFamily, normalize_ip};
use crate::protocol::{
    DEFAULT_CONTROL_PORT, DEFAULT_HTTP_BANDWIDTH_PORT, DEFAULT_TCP_BANDWIDTH_PORT,
    DEFAULT_TCP_CPS_PORT, DEFAULT_TCP_LATENCY_PORT, DEFAULT_UDP_PPS_PORT,
};
use crate::registry::{SessionTable, TestRegistry};
use crate::report::{DEFAULT_STATS_INTERVAL, StatsTimer};
use crate::tcp;
use crate::ui::{LogUi, ServerUi};

/// Well-known ports, all independent of any negotiated test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub control: u16,
    pub tcp_bandwidth: u16,
    pub tcp_cps: u16,
    pub tcp_latency: u16,
    pub udp_pps: u16,
    pub http_bandwidth: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            control: DEFAULT_CONTROL_PORT,
            tcp_bandwidth: DEFAULT_TCP_BANDWIDTH_PORT,
            tcp_cps: DEFAULT_TCP_CPS_PORT,
            tcp_latency: DEFAULT_TCP_LATENCY_PORT,
            udp_pps: DEFAULT_UDP_PPS_PORT,
            http_bandwidth: DEFAULT_HTTP_BANDWIDTH_PORT,
        }
    }
}

pub struct ServerConfig {
    pub ports: Ports,
    /// Address family (IPv4, IPv6, dual-stack)
    pub address_family: AddressFamily,
    /// Period of the per-test result lines, `None` to disable them
    pub stats_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: Ports::default(),
            address_family: AddressFamily::default(),
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
        }
    }
}

/// Collaborators shared by every handler
pub struct ServerContext {
    pub registry: Arc<dyn TestRegistry>,
    pub ui: Arc<dyn ServerUi>,
    pub ports: Ports,
    pub address_family: AddressFamily,
}

pub struct Server {
    config: ServerConfig,
    registry: Arc<dyn TestRegistry>,
    ui: Arc<dyn ServerUi>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SessionTable::new()),
            ui: Arc::new(LogUi),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn TestRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn ServerUi>) -> Self {
        self.ui = ui;
        self
    }

    pub fn registry(&self) -> Arc<dyn TestRegistry> {
        self.registry.clone()
    }

    /// Bind every port and serve control connections.
    ///
    /// Only returns on a bind failure. Any TCP port that cannot be bound is
    /// fatal; the HTTP port is not, HTTP tests are simply unavailable.
    /// Dropping the returned future stops the listeners and the stats timer.
    pub async fn run(&self) -> anyhow::Result<()> {
        let ports = self.config.ports;
        let family = self.config.address_family;
        let ctx = Arc::new(ServerContext {
            registry: self.registry.clone(),
            ui: self.ui.clone(),
            ports,
            address_family: family,
        });

        let control = bind(ports.control, family, "control plane")?;
        self.ui.print_msg(&format!(
            "Listening on {} for control plane",
            ports.control
        ));

        let latency = bind(ports.tcp_latency, family, "TCP latency tests")?;
        self.ui.print_msg(&format!(
            "Listening on {} for TCP latency tests",
            ports.tcp_latency
        ));
        let mut tasks = TaskSet::default();
        tasks.spawn(tcp::run_latency_listener(latency, ctx.clone()));

        let cps = bind(ports.tcp_cps, family, "TCP conn/s tests")?;
        self.ui
            .print_msg(&format!("Listening on {} for TCP conn/s tests", ports.tcp_cps));
        tasks.spawn(tcp::run_cps_listener(cps, ctx.clone()));

        let bandwidth = bind(ports.tcp_bandwidth, family, "TCP bandwidth tests")?;
        self.ui.print_msg(&format!(
            "Listening on {} for TCP bandwidth tests",
            ports.tcp_bandwidth
        ));
        tasks.spawn(tcp::run_bandwidth_listener(bandwidth, ctx.clone()));

        match net::create_tcp_listener(ports.http_bandwidth, family) {
            Ok(listener) => {
                self.ui.print_msg(&format!(
                    "Listening on {} for HTTP bandwidth tests",
                    ports.http_bandwidth
                ));
                tasks.spawn(http::run_http_server(listener, ctx.clone()));
            }
            Err(e) => self.ui.print_err(&format!(
                "Unable to start HTTP server, so HTTP tests cannot be run: {}",
                e
            )),
        }

        if let Some(interval) = self.config.stats_interval {
            let timer = StatsTimer::new(self.registry.clone(), self.ui.clone());
            tasks.0.push(timer.start(interval));
        }

        accept_control(control, ctx).await;
        Ok(())
    }
}

/// Background listener tasks, aborted when the server stops
#[derive(Default)]
struct TaskSet(Vec<JoinHandle<()>>);

impl TaskSet {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.push(tokio::spawn(task));
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn bind(port: u16, family: AddressFamily, purpose: &str) -> anyhow::Result<TcpListener> {
    net::create_tcp_listener(port, family).map_err(|e| {
        error!("Fatal error listening on {} for {}: {}", port, purpose, e);
        anyhow::anyhow!("Failed to listen on {} for {}: {}", port, purpose, e)
    })
}

async fn accept_control(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.ui
                    .print_err(&format!("Error accepting new control connection: {}", e));
                continue;
            }
        };
        info!("Control connection from {}", peer);

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let outcome = control::handle_control(stream, normalize_ip(peer.ip()), ctx).await;
            tracing::debug!("Control session from {} ended: {:?}", peer, outcome);
        });
    }
}

/// Context over a private registry with free ports, for unit tests
#[cfg(test)]
pub(crate) fn test_context() -> Arc<ServerContext> {
    let udp_pps = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap();
    Arc::new(ServerContext {
        registry: Arc::new(SessionTable::new()),
        ui: Arc::new(LogUi),
        ports: Ports {
            udp_pps,
            ..Ports::default()
        },
        address_family: AddressFamily::V4Only,
    })
}
