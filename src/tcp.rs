//! TCP data-plane handlers
//!
//! Each listener runs for the life of the server on a well-known port and
//! routes accepted connections to the test registered for the peer address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::{TestProtocol, TestType};
use crate::registry::Test;
use crate::serve::ServerContext;
use crate::stats::LatencySummary;
use crate::ui::ServerUi;

/// Largest bandwidth read unit a client may request
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Largest latency batch a client may request
pub const MAX_RTT_COUNT: usize = 1_000_000;

/// Accept loop for the TCP bandwidth port
pub async fn run_bandwidth_listener(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.ui
                    .print_err(&format!("Error accepting new bandwidth connection: {}", e));
                continue;
            }
        };

        let Some(test) = ctx
            .registry
            .lookup(peer.ip(), TestProtocol::Tcp, TestType::Bandwidth)
        else {
            ctx.ui.print_dbg(&format!(
                "Received unsolicited TCP connection on port {} from {}",
                ctx.ports.tcp_bandwidth, peer
            ));
            drop(stream);
            continue;
        };

        let ui = ctx.ui.clone();
        tokio::spawn(async move {
            receive_bandwidth(stream, peer, test, ui.as_ref()).await;
        });
    }
}

/// Read full `buffer_size` chunks until the peer stops or the test ends.
///
/// `done` is checked between reads; a read already in progress is allowed to
/// finish first.
pub async fn receive_bandwidth(
    mut stream: TcpStream,
    peer: SocketAddr,
    test: Arc<Test>,
    ui: &dyn ServerUi,
) {
    let size = test.param().buffer_size as usize;
    if size == 0 || size > MAX_BUFFER_SIZE {
        ui.print_dbg(&format!(
            "Closing bandwidth connection from {}: unsupported buffer size {}",
            peer, size
        ));
        return;
    }

    let mut buffer = Vec::new();
    if let Err(e) = buffer.try_reserve_exact(size) {
        ui.print_dbg(&format!("Closing bandwidth connection from {}: {}", peer, e));
        return;
    }
    buffer.resize(size, 0u8);

    let done = test.done();
    loop {
        if *done.borrow() {
            break;
        }
        match stream.read_exact(&mut buffer).await {
            Ok(_) => test.result().add_cumulative(size as u64),
            Err(e) => {
                ui.print_dbg(&format!(
                    "Error receiving data on a connection for bandwidth test: {}",
                    e
                ));
                break;
            }
        }
    }
    ui.print_dbg(&format!("Closing TCP connection from {}", peer));
}

/// Accept loop for the TCP conn/s port.
///
/// Each accepted connection from a registered peer counts once and is closed
/// immediately; nothing is read.
pub async fn run_cps_listener(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Expected under heavy connection churn
                ctx.ui
                    .print_dbg(&format!("Error accepting new conn/s connection: {}", e));
                continue;
            }
        };

        if let Some(test) = ctx
            .registry
            .lookup(peer.ip(), TestProtocol::Tcp, TestType::Cps)
        {
            test.result().add_cumulative(1);
        }
        drop(stream);
    }
}

/// Accept loop for the TCP latency port
pub async fn run_latency_listener(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.ui
                    .print_err(&format!("Error accepting new latency connection: {}", e));
                continue;
            }
        };

        let Some(test) = ctx
            .registry
            .lookup(peer.ip(), TestProtocol::Tcp, TestType::Latency)
        else {
            ctx.ui.print_dbg(&format!(
                "Received unsolicited TCP connection on port {} from {}",
                ctx.ports.tcp_latency, peer
            ));
            drop(stream);
            continue;
        };

        ctx.ui.emit_latency_header();
        let ui = ctx.ui.clone();
        tokio::spawn(async move {
            if let Err(e) = measure_latency(stream, test, ui.as_ref()).await {
                ui.print_dbg(&format!("Latency test from {} ended: {}", peer, e));
            }
        });
    }
}

/// Echo 1-byte probes in batches of `rtt_count` round trips.
///
/// Batches larger than [`MAX_RTT_COUNT`] are refused. After each batch the
/// mean RTT overwrites the test result and the full summary goes to the UI. Runs until a read or write fails.
pub async fn measure_latency(
    mut stream: TcpStream,
    test: Arc<Test>,
    ui: &dyn ServerUi,
) -> anyhow::Result<()> {
    let rtt_count = test.param().rtt_count as usize;
    if rtt_count == 0 || rtt_count > MAX_RTT_COUNT {
        return Err(anyhow::anyhow!("unsupported rtt count {}", rtt_count));
    }
    let mut samples: Vec<Duration> = Vec::new();
    samples.try_reserve_exact(rtt_count)?;
    stream.set_nodelay(true)?;

    let mut probe = [0u8; 1];
    loop {
        stream.read_exact(&mut probe).await?;

        samples.clear();
        for _ in 0..rtt_count {
            let start = Instant::now();
            stream.write_all(&probe).await?;
            stream.read_exact(&mut probe).await?;
            samples.push(start.elapsed());
        }

        if let Some(summary) = LatencySummary::from_samples(&mut samples) {
            test.result().set_latest(summary.avg.as_nanos() as u64);
            ui.emit_latency_results(test.remote(), test.param().test_id.protocol, &summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TestId, TestParam};
    use crate::registry::TestRegistry;
    use crate::serve::test_context;

    async fn loopback_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    fn register(
        ctx: &ServerContext,
        test_type: TestType,
        param: impl FnOnce(TestParam) -> TestParam,
    ) -> Arc<Test> {
        let p = param(TestParam::new(TestId::new(TestProtocol::Tcp, test_type)));
        ctx.registry
            .create("127.0.0.1".parse().unwrap(), p)
            .unwrap()
    }

    #[tokio::test]
    async fn test_bandwidth_counts_full_buffers() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Bandwidth, |p| p.with_buffer_size(1024));
        let (mut client, server, peer) = loopback_pair().await;

        let handle = {
            let test = test.clone();
            let ui = ctx.ui.clone();
            tokio::spawn(async move { receive_bandwidth(server, peer, test, ui.as_ref()).await })
        };

        for _ in 0..10 {
            client.write_all(&[0xAB; 1024]).await.unwrap();
        }
        // A trailing partial buffer is never credited
        client.write_all(&[0xAB; 100]).await.unwrap();
        drop(client);

        handle.await.unwrap();
        assert_eq!(test.result().get(), 10 * 1024);
    }

    #[tokio::test]
    async fn test_bandwidth_stops_when_done() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Bandwidth, |p| p.with_buffer_size(4));
        let (mut client, server, peer) = loopback_pair().await;

        let handle = {
            let test = test.clone();
            let ui = ctx.ui.clone();
            tokio::spawn(async move { receive_bandwidth(server, peer, test, ui.as_ref()).await })
        };

        client.write_all(&[1; 4]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        test.finish();
        // Wake the reader so it observes `done` on its next iteration
        client.write_all(&[1; 4]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(test.result().get() >= 4);
    }

    #[tokio::test]
    async fn test_latency_batches() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Latency, |p| p.with_rtt_count(5));
        let (mut client, server, _) = loopback_pair().await;

        let handle = {
            let test = test.clone();
            let ui = ctx.ui.clone();
            tokio::spawn(async move { measure_latency(server, test, ui.as_ref()).await })
        };

        let mut b = [7u8; 1];
        for _ in 0..2 {
            client.write_all(&b).await.unwrap();
            for _ in 0..5 {
                client.read_exact(&mut b).await.unwrap();
                client.write_all(&b).await.unwrap();
            }
        }
        // Let the second batch be recorded before hanging up
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client);

        assert!(handle.await.unwrap().is_err());
        assert!(test.result().get() > 0);
    }

    #[tokio::test]
    async fn test_latency_zero_rtt_count_rejected() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Latency, |p| p.with_rtt_count(0));
        let (_client, server, _) = loopback_pair().await;
        assert!(measure_latency(server, test, ctx.ui.as_ref()).await.is_err());
    }

    #[tokio::test]
    async fn test_latency_huge_rtt_count_rejected() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Latency, |p| p.with_rtt_count(u32::MAX));
        let (_client, server, _) = loopback_pair().await;
        let err = measure_latency(server, test.clone(), ctx.ui.as_ref())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported rtt count"));
        assert_eq!(test.result().get(), 0);
    }

    #[tokio::test]
    async fn test_bandwidth_huge_buffer_closes_connection() {
        let ctx = test_context();
        let test = register(&ctx, TestType::Bandwidth, |p| p.with_buffer_size(u32::MAX));
        let (mut client, server, peer) = loopback_pair().await;

        tokio::time::timeout(
            Duration::from_secs(2),
            receive_bandwidth(server, peer, test.clone(), ctx.ui.as_ref()),
        )
        .await
        .unwrap();

        // Server side is gone
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(test.result().get(), 0);
    }

    #[tokio::test]
    async fn test_cps_counts_registered_only() {
        let ctx = test_context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_cps_listener(listener, ctx.clone()));

        // Unsolicited: no test registered yet
        let _ = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let test = register(&ctx, TestType::Cps, |p| p);
        for _ in 0..5 {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            // Server closes without sending anything
            let mut buf = [0u8; 1];
            assert_eq!(conn.read(&mut buf).await.unwrap_or(0), 0);
        }
        assert_eq!(test.result().get(), 5);
    }
}
