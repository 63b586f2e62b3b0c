use serde::{Deserialize, Serialize};
use crate::buffer::Matrix;
use crate::utils::sigmoid;

/// Slope applied to non-positive inputs in the Relu backward pass.
pub const RELU_LEAK: f64 = 0.1;

/// Slope applied where Lanh clips its input.
pub const LANH_LEAK: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFn {
    Sigmoid,
    Tanh,
    Relu,
    Softmax,
    /// Linear inside `[-1, 1]` and clipped outside; the clipped region still passes a
    /// leaked gradient.
    Lanh,
}

impl ActivationFn {

    pub fn name(&self) -> &'static str {
        match self {
            ActivationFn::Sigmoid => "Sigmoid",
            ActivationFn::Tanh => "Tanh",
            ActivationFn::Relu => "Relu",
            ActivationFn::Softmax => "Softmax",
            ActivationFn::Lanh => "Lanh",
        }
    }

    /// Whether the derivative is computed from the forward input (otherwise the output).
    pub fn derivative_uses_input(&self) -> bool {
        match self {
            ActivationFn::Relu | ActivationFn::Lanh => true,
            _ => false,
        }
    }

    pub fn activate(&self, input: &Matrix) -> Matrix {
        match self {
            ActivationFn::Sigmoid => input.map(sigmoid),
            ActivationFn::Tanh => input.map(f64::tanh),
            ActivationFn::Relu => input.map(|v| v.max(0.0)),
            ActivationFn::Lanh => input.map(|v| v.max(-1.0).min(1.0)),
            ActivationFn::Softmax => {
                let max = input.max();
                let mut exps = input.map(|v| f64::exp(v - max));
                let sum = exps.sum();
                exps.scale(1.0 / sum);
                exps
            },
        }
    }

    /// Local derivative given the cached value (input for Relu and Lanh, output otherwise).
    /// Softmax uses the diagonal of its Jacobian only.
    #[inline]
    pub fn derivative(&self, cached: f64) -> f64 {
        match self {
            ActivationFn::Sigmoid | ActivationFn::Softmax => cached * (1.0 - cached),
            ActivationFn::Tanh => 1.0 - cached * cached,
            ActivationFn::Relu => if cached > 0.0 { 1.0 } else { RELU_LEAK },
            ActivationFn::Lanh => if cached > -1.0 && cached < 1.0 { 1.0 } else { LANH_LEAK },
        }
    }

}
