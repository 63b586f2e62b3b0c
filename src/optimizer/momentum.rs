use crate::buffer::Matrix;
use crate::error::NetError;
use crate::optimizer::{Optimizer, SlotTable, check_slot_shape};

/// Exponentially averaged gradient: `m ← γ·m + (1−γ)·g`.
#[derive(Debug)]
pub struct Momentum {
    gamma: f64,
    cache: SlotTable<Matrix>,
}

impl Momentum {
    pub fn new(gamma: f64) -> Self {
        Momentum {
            gamma,
            cache: SlotTable::new(),
        }
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Momentum::new(0.9)
    }
}

impl Optimizer for Momentum {

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
        let gamma = self.gamma;
        self.cache.with_slot(slot, |state| {
            let cache = state.get_or_insert_with(|| Matrix::zeros_like(&gradient));
            check_slot_shape(cache, &gradient, slot)?;
            cache.scale(gamma);
            cache.add_with_multiplier(&gradient, 1.0 - gamma);
            Ok(cache.clone())
        })
    }

}
