use std::collections::VecDeque;
use std::time::Duration;

pub const HISTORY_CAPACITY: usize = 1200;
pub const LOG_INTERVAL: Duration = Duration::from_secs(5);
pub const WARMUP: Duration = Duration::from_secs(2);
pub const HITCH_THRESHOLD_MS: f32 = 12.0;

#[derive(Clone, Debug, PartialEq)]
pub struct TimingSummary {
    pub sample_count: usize,
    pub avg_ms: f32,
    pub p95_ms: f32,
    pub p99_ms: f32,
    pub hitches: usize,
}

/// Rolling frame-time history, summarised once per `log_interval`.
pub struct FrameTimer {
    history: VecDeque<f32>,
    max_history: usize,
    warmup: Duration,
    log_interval: Duration,
    last_report: Option<Duration>,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY, WARMUP, LOG_INTERVAL)
    }
}

impl FrameTimer {
    pub fn new(max_history: usize, warmup: Duration, log_interval: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history),
            max_history: max_history.max(1),
            warmup,
            log_interval,
            last_report: None,
        }
    }

    /// `elapsed` is time since start-up. Returns a summary when one is due;
    /// samples taken during warm-up are dropped.
    pub fn record(&mut self, elapsed: Duration, frame: Duration) -> Option<TimingSummary> {
        if elapsed < self.warmup {
            return None;
        }

        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(frame.as_secs_f32() * 1000.0);

        let since = self.last_report.get_or_insert(elapsed);
        if elapsed.saturating_sub(*since) < self.log_interval {
            return None;
        }
        self.last_report = Some(elapsed);

        let summary = self.summarize();
        log::info!(
            "frame time: avg {:.2} ms, p95 {:.2} ms, p99 {:.2} ms over {} frames ({} hitches)",
            summary.avg_ms,
            summary.p95_ms,
            summary.p99_ms,
            summary.sample_count,
            summary.hitches
        );
        Some(summary)
    }

    fn summarize(&self) -> TimingSummary {
        let mut sorted: Vec<f32> = self.history.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);

        let count = sorted.len().max(1);
        TimingSummary {
            sample_count: sorted.len(),
            avg_ms: sorted.iter().sum::<f32>() / count as f32,
            p95_ms: quantile(&sorted, 0.95),
            p99_ms: quantile(&sorted, 0.99),
            hitches: sorted.iter().filter(|&&ms| ms > HITCH_THRESHOLD_MS).count(),
        }
    }
}

fn quantile(sorted: &[f32], q: f32) -> f32 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0.0;
    };
    let idx = (last as f32 * q.clamp(0.0, 1.0)).ceil() as usize;
    sorted[idx.min(last)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_quantile() {
        let sorted: Vec<f32> = (1..=100).map(|v| v as f32).collect();
        assert_eq!(quantile(&sorted, 0.95), 96.0);
        assert_eq!(quantile(&sorted, 0.99), 100.0);
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_warmup_samples_dropped() {
        let mut timer = FrameTimer::new(16, ms(2000), ms(100));
        for t in 0..20 {
            assert!(timer.record(ms(t * 100), ms(50)).is_none());
        }
        assert!(timer.history.is_empty());
    }

    #[test]
    fn test_reports_once_per_interval() {
        let mut timer = FrameTimer::new(64, Duration::ZERO, ms(1000));
        let mut reports = Vec::new();
        for t in 0..=30u64 {
            if let Some(summary) = timer.record(ms(t * 100), ms(10)) {
                reports.push((t, summary));
            }
        }
        let at: Vec<u64> = reports.iter().map(|(t, _)| *t).collect();
        assert_eq!(at, vec![10, 20, 30]);
        assert!((reports[0].1.avg_ms - 10.0).abs() < 1e-3);
        assert_eq!(reports[0].1.hitches, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut timer = FrameTimer::new(4, Duration::ZERO, ms(1_000_000));
        for t in 0..10 {
            timer.record(ms(t), ms(t + 1));
        }
        assert_eq!(timer.history.len(), 4);
        let summary = timer.summarize();
        assert_eq!(summary.sample_count, 4);
        assert!((summary.p99_ms - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_counts_hitches() {
        let mut timer = FrameTimer::new(8, Duration::ZERO, ms(10));
        timer.record(ms(0), ms(5));
        timer.record(ms(1), ms(30));
        let summary = timer.record(ms(20), ms(5)).unwrap();
        assert_eq!(summary.hitches, 1);
        assert_eq!(summary.sample_count, 3);
    }
}
