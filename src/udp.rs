//! UDP packets-per-second handler
//!
//! One socket is bound on the well-known pkt/s port when a pkt/s test starts
//! and shared by one receive worker per available CPU. Every worker credits
//! datagrams to whichever pkt/s test is registered for the sender, so a single
//! socket serves all clients.

use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;

use crate::net;
use crate::protocol::{TestProtocol, TestType};
use crate::registry::{Test, TestRegistry};
use crate::serve::ServerContext;
use crate::ui::ServerUi;

/// Bind the pkt/s socket for `test` and start the receive workers.
///
/// Workers exit once the test's `done` signal fires; the socket is closed when
/// the last one exits.
pub fn start_pps_test(test: &Arc<Test>, ctx: &Arc<ServerContext>) -> io::Result<()> {
    let socket = match net::create_udp_socket(ctx.ports.udp_pps, ctx.address_family) {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            ctx.ui.print_dbg(&format!(
                "Error listening on {} for UDP pkt/s tests: {}",
                ctx.ports.udp_pps, e
            ));
            return Err(e);
        }
    };

    let workers = worker_count();
    debug!(
        "Starting {} pkt/s workers on port {} for {}",
        workers,
        ctx.ports.udp_pps,
        test.key()
    );
    for _ in 0..workers {
        let socket = socket.clone();
        let registry = ctx.registry.clone();
        let ui = ctx.ui.clone();
        let done = test.done();
        tokio::spawn(async move {
            receive_packets(socket, registry.as_ref(), ui.as_ref(), done).await;
        });
    }
    Ok(())
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Count 1-byte datagrams against the sender's pkt/s test.
///
/// Datagrams from senders without a registered test are dropped. Returns on
/// `done` or on the first receive error.
pub async fn receive_packets(
    socket: Arc<UdpSocket>,
    registry: &dyn TestRegistry,
    ui: &dyn ServerUi,
    mut done: watch::Receiver<bool>,
) {
    let port = socket.local_addr().map(|a| a.port()).unwrap_or(0);
    let mut buffer = [0u8; 1];
    loop {
        if *done.borrow() {
            break;
        }
        tokio::select! {
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((_, from)) => {
                        match registry.lookup(from.ip(), TestProtocol::Udp, TestType::Pps) {
                            Some(test) => test.result().add_cumulative(1),
                            None if ui.debug_enabled() => ui.print_dbg(&format!(
                                "Received unsolicited UDP traffic on port {} from {}",
                                port, from
                            )),
                            None => {}
                        }
                    }
                    Err(e) => {
                        ui.print_dbg(&format!("Error receiving data from UDP for pkt/s test: {}", e));
                        break;
                    }
                }
            }
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    break;
                }
            }
        }
    }
}
