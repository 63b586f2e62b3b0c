use crate::buffer::Matrix;
use crate::error::NetError;
use crate::optimizer::Optimizer;

/// Plain gradient descent: the gradient is the update.
#[derive(Clone, Debug, Default)]
pub struct GradientDescent {
    size: usize,
    initialized: bool,
}

impl GradientDescent {
    pub fn new() -> Self {
        GradientDescent::default()
    }
}

impl Optimizer for GradientDescent {

    fn initialize(&mut self, slots: usize) {
        self.size = slots;
        self.initialized = true;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn size(&self) -> usize {
        self.size
    }

    fn rescale(&self, gradient: Matrix, _slot: usize) -> Result<Matrix, NetError> {
        Ok(gradient)
    }

}
