//! Control channel handler
//!
//! Drives the per-connection handshake:
//!
//! ```text
//! client                      server
//!   Syn(param)  ---------->     register test (duplicate => Fin, close)
//!               <----------     Ack
//!   Ack         ---------->     test active
//!   ...data on the data-plane ports...
//!   close       ---------->     test torn down
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::{SessionMessage, TestType};
use crate::registry::{Test, TestRegistry};
use crate::serve::ServerContext;
use crate::session::SessionChannel;
use crate::udp;

/// Where a control session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// First message was not a `Syn`
    ProtocolViolation,
    /// A test already existed for the key; `Fin` was sent
    Rejected,
    /// Data-plane setup, the `Ack` exchange, or the transport failed before activation
    HandshakeFailed,
    /// Test ran and the client closed the control connection
    Completed,
}

/// Tears the test down when dropped: fires `done` and removes the record.
///
/// Dropping the guard on any exit path, including task cancellation, leaves
/// no test behind.
struct TestGuard {
    test: Arc<Test>,
    registry: Arc<dyn TestRegistry>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        self.test.set_active(false);
        self.test.finish();
        self.registry.delete(&self.test);
    }
}

/// Run the handshake state machine for one control connection from `remote`.
///
/// Returns once the session is over; the connection is closed when `stream`
/// is dropped.
pub async fn handle_control<S>(stream: S, remote: IpAddr, ctx: Arc<ServerContext>) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite,
{
    let mut channel = SessionChannel::new(stream);

    let param = match channel.recv().await {
        Ok(SessionMessage::Syn { test_param }) => test_param,
        Ok(other) => {
            ctx.ui.print_dbg(&format!("Expected syn from {}, got {}", remote, other.kind()));
            return SessionOutcome::ProtocolViolation;
        }
        Err(e) => {
            ctx.ui.print_dbg(&format!("Failed to read syn from {}: {}", remote, e));
            return SessionOutcome::ProtocolViolation;
        }
    };
    let test_id = param.test_id;

    ctx.ui
        .print_msg(&format!("New control connection from {}", remote));
    ctx.ui
        .print_msg(&format!("Starting {} test from {}", test_id, remote));

    let test = match ctx.registry.create(remote, param) {
        Ok(test) => test,
        Err(duplicate) => {
            let reason = duplicate.to_string();
            ctx.ui.print_msg(&reason);
            if let Err(e) = channel.send(&SessionMessage::fin(reason)).await {
                ctx.ui.print_dbg(&format!("Failed to send fin to {}: {}", remote, e));
            }
            return SessionOutcome::Rejected;
        }
    };
    let guard = TestGuard {
        test: test.clone(),
        registry: ctx.registry.clone(),
    };
    ctx.ui.emit_test_header();

    // pkt/s has no later begin step, so its socket must be up before the ack
    if test_id.test_type == TestType::Pps && udp::start_pps_test(&test, &ctx).is_err() {
        return SessionOutcome::HandshakeFailed;
    }

    if let Err(e) = channel.send(&SessionMessage::Ack).await {
        ctx.ui.print_dbg(&format!("Failed to send ack to {}: {}", remote, e));
        return SessionOutcome::HandshakeFailed;
    }

    match channel.recv().await {
        Ok(SessionMessage::Ack) => {}
        Ok(other) => {
            ctx.ui.print_dbg(&format!("Expected ack from {}, got {}", remote, other.kind()));
            return SessionOutcome::HandshakeFailed;
        }
        Err(e) => {
            ctx.ui.print_dbg(&format!("Failed to read ack from {}: {}", remote, e));
            return SessionOutcome::HandshakeFailed;
        }
    }

    test.set_active(true);
    channel.wait_for_close().await;

    ctx.ui.print_msg(&format!(
        "Ending {} test from {}",
        test_id.test_type, remote
    ));
    drop(guard);
    drop(channel);

    if !ctx.registry.is_empty() {
        ctx.ui.emit_test_header();
    }
    SessionOutcome::Completed
}
