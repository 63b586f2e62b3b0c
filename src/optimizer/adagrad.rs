use crate::buffer::Matrix;
use crate::error::NetError;
use crate::optimizer::{Optimizer, SlotTable, check_slot_shape};

#[derive(Debug)]
struct AdaGradSlot {
    squares: Matrix,
    visits: u64,
}

/// Undecayed sum of squared gradients, averaged over the number of visits.
#[derive(Debug)]
pub struct AdaGrad {
    epsilon: f64,
    cache: SlotTable<AdaGradSlot>,
}

impl AdaGrad {
    pub fn new(epsilon: f64) -> Self {
        AdaGrad {
            epsilon,
            cache: SlotTable::new(),
        }
    }
}

impl Default for AdaGrad {
    fn default() -> Self {
        AdaGrad::new(1e-8)
    }
}

impl Optimizer for AdaGrad {

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
        let epsilon = self.epsilon;
        self.cache.with_slot(slot, |state| {
            let entry = state.get_or_insert_with(|| AdaGradSlot {
                squares: Matrix::zeros_like(&gradient),
                visits: 0,
            });
            check_slot_shape(&entry.squares, &gradient, slot)?;
            for (v, g) in entry.squares.as_mut_slice().iter_mut().zip(gradient.as_slice()) {
                *v += g * g;
            }
            // one sweep over the network visits every slot exactly once
            entry.visits += 1;
            let visits = entry.visits as f64;
            Ok(gradient.zip_map(&entry.squares, |g, v| g / ((v / visits).sqrt() + epsilon)))
        })
    }

}
