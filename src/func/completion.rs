use crate::stats::Stats;
use std::time::{Duration, Instant};

/// Decides when the training loop stops. Checked between batches only, so a batch that
/// has started always completes.
#[derive(Clone, Copy, Debug)]
pub struct CompletionFn {
    max_batches: Option<usize>,
    max_duration: Option<Duration>,
    target_avg_error: Option<f64>,
}

#[allow(dead_code)]
impl CompletionFn {

    pub fn stop_after_batches(batches: usize) -> Self {
        CompletionFn {
            max_batches: Some(batches),
            max_duration: None,
            target_avg_error: None
        }
    }

    pub fn stop_after_duration(duration: Duration) -> Self {
        CompletionFn {
            max_batches: None,
            max_duration: Some(duration),
            target_avg_error: None
        }
    }

    pub fn with_max_batches(mut self, batches: usize) -> Self {
        self.max_batches = Some(batches);
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn with_target_avg_error(mut self, error: f64) -> Self {
        self.target_avg_error = Some(error);
        self
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// `batch_count` is the number of batches applied so far, `error_stats` the per-sample
    /// errors of the most recent batch (empty before the first one).
    pub fn should_stop_training(&self, batch_count: usize, start_time: Instant, error_stats: &Stats) -> bool {
        if let Some(target) = self.target_avg_error {
            if error_stats.count() > 0 && target >= error_stats.mean() {
                return true;
            }
        }
        if let Some(max_batch_count) = self.max_batches {
            if max_batch_count <= batch_count {
                return true;
            }
        }
        if let Some(max_duration) = self.max_duration {
            if max_duration <= start_time.elapsed() {
                return true
            }
        }
        false
    }

    /// Fraction of the budget used, for progress reporting.
    pub fn progress(&self, batch_count: usize, start_time: Instant) -> f64 {
        let by_batches = self.max_batches
            .map(|max| batch_count as f64 / max.max(1) as f64)
            .unwrap_or(0.0);
        let by_time = self.max_duration
            .map(|max| start_time.elapsed().as_secs_f64() / max.as_secs_f64().max(1e-9))
            .unwrap_or(0.0);
        by_batches.max(by_time).min(1.0)
    }

}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_batch_limit() {
        let f = CompletionFn::stop_after_batches(3);
        let start = Instant::now();
        let stats = Stats::new();
        assert!(!f.should_stop_training(2, start, &stats));
        assert!(f.should_stop_training(3, start, &stats));
        assert!((f.progress(1, start) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_duration_limit() {
        let f = CompletionFn::stop_after_duration(Duration::from_millis(0));
        assert!(f.should_stop_training(0, Instant::now(), &Stats::new()));
    }

    #[test]
    fn test_target_error_ignores_empty_stats() {
        let f = CompletionFn::stop_after_batches(100).with_target_avg_error(0.1);
        let start = Instant::now();
        let mut stats = Stats::new();
        assert!(!f.should_stop_training(0, start, &stats));
        stats.report(0.05);
        assert!(f.should_stop_training(1, start, &stats));
    }

}
