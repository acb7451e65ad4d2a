use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-test measurement counter.
///
/// Cumulative tests (bandwidth, conn/s, pkt/s) only ever add to it; latency
/// tests overwrite it with the latest mean round-trip time in nanoseconds.
#[derive(Debug, Default)]
pub struct TestResult {
    data: AtomicU64,
}

impl TestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cumulative(&self, n: u64) {
        self.data.fetch_add(n, Ordering::Relaxed);
    }

    /// Last writer wins
    pub fn set_latest(&self, n: u64) {
        self.data.swap(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.data.load(Ordering::Relaxed)
    }
}

/// One latency batch reduced to the figures shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub p999: Duration,
    pub p9999: Duration,
}

impl LatencySummary {
    /// Summarize a batch of round-trip samples. Sorts `samples` in place.
    ///
    /// Returns `None` for an empty batch.
    pub fn from_samples(samples: &mut [Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as u64;
        let sum: u128 = samples.iter().map(|d| d.as_nanos()).sum();
        let avg = Duration::from_nanos((sum / count as u128) as u64);

        samples.sort();

        // A single sample would index -1 for the low percentiles; pretend
        // there are two so every percentile lands on index 0.
        let fixed = if count == 1 { 2 } else { count };

        Some(Self {
            avg,
            min: samples[0],
            max: samples[samples.len() - 1],
            p50: samples[percentile_index(fixed, 50)],
            p90: samples[percentile_index(fixed, 90)],
            p95: samples[percentile_index(fixed, 95)],
            p99: samples[percentile_index(fixed, 99)],
            p999: samples[fractional_percentile_index(fixed, 99.9)],
            p9999: samples[fractional_percentile_index(fixed, 99.99)],
        })
    }
}

/// `(count * pct) / 100 - 1` in integer arithmetic
fn percentile_index(count: u64, pct: u64) -> usize {
    ((count * pct) / 100 - 1) as usize
}

/// `(count * pct) / 100 - 1` in floating point, truncated toward zero
fn fractional_percentile_index(count: u64, pct: f64) -> usize {
    ((count as f64 * pct) / 100.0 - 1.0) as usize
}

pub fn bits_per_sec_to_human(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let bps = if secs > 0.0 {
        bytes as f64 * 8.0 / secs
    } else {
        0.0
    };

    if bps >= 1e12 {
        format!("{:.2} Tbps", bps / 1e12)
    } else if bps >= 1e9 {
        format!("{:.2} Gbps", bps / 1e9)
    } else if bps >= 1e6 {
        format!("{:.2} Mbps", bps / 1e6)
    } else if bps >= 1e3 {
        format!("{:.2} Kbps", bps / 1e3)
    } else {
        format!("{:.0} bps", bps)
    }
}

pub fn rate_to_human(count: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };

    if rate >= 1e9 {
        format!("{:.2}G", rate / 1e9)
    } else if rate >= 1e6 {
        format!("{:.2}M", rate / 1e6)
    } else if rate >= 1e3 {
        format!("{:.2}K", rate / 1e3)
    } else {
        format!("{:.0}", rate)
    }
}

pub fn duration_to_human(d: Duration) -> String {
    let ns = d.as_nanos();
    if ns >= 1_000_000_000 {
        format!("{:.3}s", d.as_secs_f64())
    } else if ns >= 1_000_000 {
        format!("{:.3}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.3}us", ns as f64 / 1e3)
    } else {
        format!("{}ns", ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn us(n: u64) -> Duration {
        Duration::from_micros(n)
    }

    #[test]
    fn test_result_cumulative() {
        let result = TestResult::new();
        result.add_cumulative(1024);
        result.add_cumulative(1024);
        assert_eq!(result.get(), 2048);
    }

    #[test]
    fn test_result_latest_overwrites() {
        let result = TestResult::new();
        result.set_latest(500);
        result.set_latest(200);
        assert_eq!(result.get(), 200);
    }

    #[test]
    fn test_result_concurrent_adds_not_lost() {
        let result = Arc::new(TestResult::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let result = result.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        result.add_cumulative(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(result.get(), 80_000);
    }

    #[test]
    fn test_single_sample() {
        let mut samples = vec![us(42)];
        let s = LatencySummary::from_samples(&mut samples).unwrap();
        for d in [
            s.avg, s.min, s.max, s.p50, s.p90, s.p95, s.p99, s.p999, s.p9999,
        ] {
            assert_eq!(d, us(42));
        }
    }

    #[test]
    fn test_empty_batch() {
        assert!(LatencySummary::from_samples(&mut []).is_none());
    }

    #[test]
    fn test_hundred_samples() {
        // 100..1 reversed so sorting matters
        let mut samples: Vec<Duration> = (1..=100).rev().map(us).collect();
        let s = LatencySummary::from_samples(&mut samples).unwrap();
        assert_eq!(s.min, us(1));
        assert_eq!(s.max, us(100));
        assert_eq!(s.p50, us(50));
        assert_eq!(s.p90, us(90));
        assert_eq!(s.p95, us(95));
        assert_eq!(s.p99, us(99));
        // 100 * 99.9 / 100 - 1 = 98.9 -> 98
        assert_eq!(s.p999, us(99));
        assert_eq!(s.p9999, us(99));
        // (1 + ... + 100) / 100 = 50.5us
        assert_eq!(s.avg, Duration::from_nanos(50_500));
    }

    #[test]
    fn test_index_arithmetic() {
        assert_eq!(percentile_index(2, 50), 0);
        assert_eq!(percentile_index(2, 99), 0);
        assert_eq!(percentile_index(3, 50), 0);
        assert_eq!(percentile_index(1000, 99), 989);
        assert_eq!(fractional_percentile_index(2, 99.9), 0);
        assert_eq!(fractional_percentile_index(1000, 99.9), 998);
        assert_eq!(fractional_percentile_index(1000, 99.99), 998);
        assert_eq!(fractional_percentile_index(10_000, 99.99), 9998);
    }

    #[test]
    fn test_percentiles_monotonic() {
        for n in 1..=257u64 {
            let mut samples: Vec<Duration> =
                (0..n).map(|i| us((i * 7919) % 1009)).collect();
            let s = LatencySummary::from_samples(&mut samples).unwrap();
            let ordered = [s.min, s.p50, s.p90, s.p95, s.p99, s.p999, s.p9999, s.max];
            assert!(
                ordered.windows(2).all(|w| w[0] <= w[1]),
                "not monotonic for n={}",
                n
            );
        }
    }

    #[test]
    fn test_avg_truncates() {
        let mut samples = vec![Duration::from_nanos(1), Duration::from_nanos(2)];
        let s = LatencySummary::from_samples(&mut samples).unwrap();
        assert_eq!(s.avg, Duration::from_nanos(1));
    }

    #[test]
    fn test_bits_per_sec_to_human() {
        let one_sec = Duration::from_secs(1);
        assert_eq!(bits_per_sec_to_human(100, one_sec), "800 bps");
        assert_eq!(bits_per_sec_to_human(125_000, one_sec), "1.00 Mbps");
        assert_eq!(bits_per_sec_to_human(125_000_000, one_sec), "1.00 Gbps");
        assert_eq!(bits_per_sec_to_human(1, Duration::ZERO), "0 bps");
    }

    #[test]
    fn test_rate_to_human() {
        let one_sec = Duration::from_secs(1);
        assert_eq!(rate_to_human(999, one_sec), "999");
        assert_eq!(rate_to_human(1500, one_sec), "1.50K");
        assert_eq!(rate_to_human(2_000_000, Duration::from_secs(2)), "1.00M");
    }

    #[test]
    fn test_duration_to_human() {
        assert_eq!(duration_to_human(Duration::from_nanos(500)), "500ns");
        assert_eq!(duration_to_human(us(250)), "250.000us");
        assert_eq!(duration_to_human(Duration::from_millis(3)), "3.000ms");
    }
}
