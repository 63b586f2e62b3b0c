use crate::buffer::Matrix;
use crate::error::NetError;
use crate::optimizer::{Optimizer, SlotTable, check_slot_shape};

/// Divides the gradient by a decaying root-mean-square of past gradients.
#[derive(Debug)]
pub struct RmsProp {
    gamma: f64,
    epsilon: f64,
    cache: SlotTable<Matrix>,
}

impl RmsProp {
    pub fn new(gamma: f64, epsilon: f64) -> Self {
        RmsProp {
            gamma,
            epsilon,
            cache: SlotTable::new(),
        }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        RmsProp::new(0.9, 1e-8)
    }
}

impl Optimizer for RmsProp {

    fn initialize(&mut self, slots: usize) {
        self.cache.initialize(slots);
    }

    fn is_initialized(&self) -> bool {
        self.cache.is_initialized()
    }

    fn size(&self) -> usize {
        self.cache.len()
    }

    fn rescale(&self, gradient: Matrix, slot: usize) -> Result<Matrix, NetError> {
        let (gamma, epsilon) = (self.gamma, self.epsilon);
        let squares = gradient.map(|g| g * g);
        let cache = self.cache.with_slot(slot, |state| {
            // first visit seeds the average with the gradient itself
            let cache = state.get_or_insert_with(|| squares.clone());
            check_slot_shape(cache, &gradient, slot)?;
            cache.scale(gamma);
            cache.add_with_multiplier(&squares, 1.0 - gamma);
            Ok(cache.clone())
        })?;
        Ok(gradient.zip_map(&cache, |g, v| g / (v + epsilon).sqrt()))
    }

}
