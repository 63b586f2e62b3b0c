use std::{f64, fmt};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct Stats {
    sum: f64,
    count: u32,
    max: f64,
    min: f64
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("Stats")
            .field("count", &self.count)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("sum", &self.sum)
            .field("mean", &self.mean())
            .finish()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new()
    }
}

#[allow(dead_code)]
impl Stats {

    pub fn new() -> Self {
        Stats {
            sum: 0.0,
            count: 0,
            max: f64::NAN,
            min: f64::NAN
        }
    }

    #[inline]
    pub fn report(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        if self.min.is_nan() || self.min > value {
            self.min = value;
        }
        if self.max.is_nan() || self.max < value {
            self.max = value;
        }
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.min
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
        self.max = f64::NAN;
        self.min = f64::NAN;
    }
}

/// Loss and argmax accuracy of a network over a data set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub loss: f64,
    pub correct: usize,
    pub total: usize,
}

impl LossReport {

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.loss / self.total as f64
    }

}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "loss = {:.3}, correct = {}/{} ({:.2}%)",
            self.loss,
            self.correct,
            self.total,
            self.accuracy() * 100.0
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stats() {
        let mut stats = Stats::new();
        assert!(stats.min().is_nan());
        stats.report(2.0);
        stats.report(4.0);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.mean(), 3.0);
        assert_eq!(stats.min(), 2.0);
        assert_eq!(stats.max(), 4.0);
        stats.reset();
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_report() {
        let report = LossReport { loss: 3.0, correct: 3, total: 4 };
        assert_eq!(report.accuracy(), 0.75);
        assert_eq!(report.mean_loss(), 0.75);
        assert_eq!(report.to_string(), "loss = 3.000, correct = 3/4 (75.00%)");
    }

}
