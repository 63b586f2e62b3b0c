use serde::{Deserialize, Serialize};

/// Learning rate as a function of the number of batches already applied.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LearningRateFn {
    Constant(f64),
    /// `scale · (1 − tanh(log_base(batch + 1)))`: starts at `scale` and reaches zero
    /// asymptotically, at a pace set by `log_base`.
    TanhLogarithmicDescent {
        log_base: f64,
        scale: f64,
    },
}

impl LearningRateFn {

    pub fn tanh_logarithmic_descent(log_base: f64, scale: f64) -> Self {
        LearningRateFn::TanhLogarithmicDescent { log_base, scale }
    }

    pub fn standard_tanh_logarithmic_descent() -> Self {
        Self::tanh_logarithmic_descent(100.0, 1.0)
    }

    pub fn get_learning_rate(&self, batch_num: usize) -> f64 {
        match *self {
            LearningRateFn::Constant(rate) => rate,
            LearningRateFn::TanhLogarithmicDescent { log_base, scale } => {
                let progress = (batch_num as f64 + 1.0).ln() / log_base.ln();
                scale * (1.0 - progress.tanh())
            },
        }
    }
}
