//! Server-side UI collaborator
//!
//! Handlers report progress and results through [`ServerUi`]. The default
//! [`LogUi`] writes everything to the tracing subscriber.

use std::net::IpAddr;

use tracing::{debug, error, info};

use crate::protocol::{TestId, TestProtocol};
use crate::stats::{LatencySummary, duration_to_human};

/// Output sink for human-readable progress. Calls must not block.
pub trait ServerUi: Send + Sync {
    fn print_msg(&self, msg: &str);

    fn print_err(&self, msg: &str);

    fn print_dbg(&self, msg: &str);

    /// Whether `print_dbg` output goes anywhere. Hot paths skip formatting
    /// debug lines when this is false.
    fn debug_enabled(&self) -> bool {
        true
    }

    /// Column header for the periodic per-test results
    fn emit_test_header(&self);

    fn emit_latency_header(&self);

    fn emit_latency_results(&self, remote: IpAddr, protocol: TestProtocol, summary: &LatencySummary);

    /// One periodic measurement line, already formatted
    fn emit_test_result(&self, remote: IpAddr, test_id: TestId, value: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl ServerUi for LogUi {
    fn print_msg(&self, msg: &str) {
        info!("{}", msg);
    }

    fn print_err(&self, msg: &str) {
        error!("{}", msg);
    }

    fn print_dbg(&self, msg: &str) {
        debug!("{}", msg);
    }

    fn debug_enabled(&self) -> bool {
        tracing::enabled!(tracing::Level::DEBUG)
    }

    fn emit_test_header(&self) {
        info!(
            "{:<40} {:>6} {:>14} {:>14}",
            "RemoteAddress", "Proto", "Test", "Result"
        );
    }

    fn emit_latency_header(&self) {
        info!(
            "{:<40} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "RemoteAddress", "Proto", "Avg", "Min", "50%", "90%", "95%", "99%", "99.9%", "99.99%",
            "Max"
        );
    }

    fn emit_latency_results(&self, remote: IpAddr, protocol: TestProtocol, s: &LatencySummary) {
        info!(
            "{:<40} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            remote.to_string(),
            protocol.to_string(),
            duration_to_human(s.avg),
            duration_to_human(s.min),
            duration_to_human(s.p50),
            duration_to_human(s.p90),
            duration_to_human(s.p95),
            duration_to_human(s.p99),
            duration_to_human(s.p999),
            duration_to_human(s.p9999),
            duration_to_human(s.max),
        );
    }

    fn emit_test_result(&self, remote: IpAddr, test_id: TestId, value: &str) {
        info!(
            "{:<40} {:>6} {:>14} {:>14}",
            remote.to_string(),
            test_id.protocol.to_string(),
            test_id.test_type.to_string(),
            value
        );
    }
}
