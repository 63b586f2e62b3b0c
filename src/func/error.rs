use serde::{Deserialize, Serialize};
use crate::utils::square;

/// Floor applied to outputs before taking their logarithm.
const LOG_FLOOR: f64 = 1e-12;

/// Per-sample loss, summed over the output elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorFn {
    /// `0.5·(target − output)²`
    SquaredError,
    /// `−target·ln(output)`, for probability outputs such as a softmax.
    CrossEntropy,
}

impl ErrorFn {

    pub fn element_error(self, target: f64, output: f64) -> f64 {
        match self {
            ErrorFn::SquaredError => 0.5 * square(target - output),
            ErrorFn::CrossEntropy => -target * output.max(LOG_FLOOR).ln(),
        }
    }

    /// `−∂loss/∂output`. Adding it to the output lowers the loss.
    pub fn element_descent(self, target: f64, output: f64) -> f64 {
        match self {
            ErrorFn::SquaredError => target - output,
            ErrorFn::CrossEntropy => target / output.max(LOG_FLOOR),
        }
    }

    pub fn sample_error(self, target: &[f64], output: &[f64]) -> f64 {
        target.iter()
            .zip(output)
            .map(|(&t, &y)| self.element_error(t, y))
            .sum()
    }

    /// Output gradient handed to the last layer's backward pass.
    pub fn descent(self, target: &[f64], output: &[f64]) -> Vec<f64> {
        target.iter()
            .zip(output)
            .map(|(&t, &y)| self.element_descent(t, y))
            .collect()
    }

}
