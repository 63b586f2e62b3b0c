use crate::buffer::Matrix;
use crate::error::NetError;
use crate::optimizer::{Optimizer, SlotTable, check_slot_shape};

#[derive(Debug)]
struct AdamSlot {
    first_moment: Matrix,
    second_moment: Matrix,
    steps: i32,
}

/// Adam with optional bias correction.
///
/// Without bias correction (the default, which keeps saved training runs reproducible)
/// both moments are seeded with the first gradient seen by a slot, so early steps are not
/// shrunk towards zero. With `with_bias_correction` the moments start at zero and are
/// divided by `1 − βᵗ`.
#[derive(Debug)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    bias_correction: bool,
    cache: SlotTable<AdamSlot>,
}

impl Adam {

    pub fn new(beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            bias_correction: false,
            cache: SlotTable::new(),
        }
    }

    pub fn with_bias_correction(mut self) -> Self {
        self.bias_correction = true;
        self
    }

}

impl Default for Adam {
    fn default() -> Self {
        Adam::new(0.9, 0.999, 1e-7)
    }
}

impl Optimizer for Adam {

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
        let (beta1, beta2, epsilon, bias_correction) = (self.beta1, self.beta2, self.epsilon, self.bias_correction);
        let squares = gradient.map(|g| g * g);
        self.cache.with_slot(slot, |state| {
            let entry = state.get_or_insert_with(|| {
                if bias_correction {
                    AdamSlot {
                        first_moment: Matrix::zeros_like(&gradient),
                        second_moment: Matrix::zeros_like(&gradient),
                        steps: 0,
                    }
                } else {
                    AdamSlot {
                        first_moment: gradient.clone(),
                        second_moment: squares.clone(),
                        steps: 0,
                    }
                }
            });
            check_slot_shape(&entry.first_moment, &gradient, slot)?;

            entry.first_moment.scale(beta1);
            entry.first_moment.add_with_multiplier(&gradient, 1.0 - beta1);
            entry.second_moment.scale(beta2);
            entry.second_moment.add_with_multiplier(&squares, 1.0 - beta2);
            entry.steps = entry.steps.saturating_add(1);

            let (m_scale, v_scale) = if bias_correction {
                (1.0 / (1.0 - beta1.powi(entry.steps)), 1.0 / (1.0 - beta2.powi(entry.steps)))
            } else {
                (1.0, 1.0)
            };
            Ok(entry.first_moment.zip_map(&entry.second_moment, |m, v| {
                m * m_scale / ((v * v_scale).sqrt() + epsilon)
            }))
        })
    }

}
