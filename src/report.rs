//! Periodic per-test result emission

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::protocol::TestType;
use crate::registry::{TestKey, TestRegistry};
use crate::stats::{bits_per_sec_to_human, duration_to_human, rate_to_human};
use crate::ui::ServerUi;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Turns raw test counters into per-interval rates.
///
/// Cumulative counters are reported as the delta since the previous tick
/// divided by the elapsed time; latency is reported as the current gauge.
pub struct StatsTimer {
    registry: Arc<dyn TestRegistry>,
    ui: Arc<dyn ServerUi>,
    last: HashMap<TestKey, (u64, Instant)>,
}

impl StatsTimer {
    pub fn new(registry: Arc<dyn TestRegistry>, ui: Arc<dyn ServerUi>) -> Self {
        Self {
            registry,
            ui,
            last: HashMap::new(),
        }
    }

    /// Start ticking every `interval` on a background task
    pub fn start(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick(Instant::now());
            }
        })
    }

    /// Emit one line per active test and return how many were emitted
    pub fn tick(&mut self, now: Instant) -> usize {
        let tests = self.registry.snapshot();
        let mut emitted = 0;
        let mut seen = HashMap::with_capacity(tests.len());

        for test in tests.iter().filter(|t| t.is_active()) {
            let key = test.key();
            let value = test.result().get();
            let (prev_value, prev_time) = self
                .last
                .get(&key)
                .copied()
                .unwrap_or((0, test.started()));
            seen.insert(key, (value, now));

            let delta = value.saturating_sub(prev_value);
            let elapsed = now.saturating_duration_since(prev_time);
            let line = match key.test_id.test_type {
                TestType::Bandwidth => bits_per_sec_to_human(delta, elapsed),
                TestType::Cps => format!("{} conn/s", rate_to_human(delta, elapsed)),
                TestType::Pps => format!("{} pkt/s", rate_to_human(delta, elapsed)),
                TestType::Latency => duration_to_human(Duration::from_nanos(value)),
            };
            self.ui.emit_test_result(key.remote, key.test_id, &line);
            emitted += 1;
        }

        // Forget tests that ended
        self.last = seen;
        emitted
    }
}
