//! Gradient rescaling strategies.
//!
//! Every parameter matrix in a network owns one optimizer slot, addressed by a stable
//! index assigned when the network is initialized. Slots are locked individually, so
//! rescaling unrelated parameters never contends, while two updates aimed at the same
//! slot are serialized.

mod gradient_descent;
mod momentum;
mod rmsprop;
mod adagrad;
mod adam;

pub use self::{
    gradient_descent::*,
    momentum::*,
    rmsprop::*,
    adagrad::*,
    adam::*,
};

use std::fmt;
use parking_lot::Mutex;
use crate::buffer::Matrix;
use crate::error::NetError;

pub trait Optimizer: Send + Sync + fmt::Debug {

    /// Fixes the number of slots. Discards any previous state.
    fn initialize(&mut self, slots: usize);

    fn is_initialized(&self) -> bool;

    fn size(&self) -> usize;

    /// Turns a raw (averaged) gradient for `slot` into the update to apply, advancing
    /// the slot's running statistics.
    fn rescale(&self, gradient: Matrix, slot: usize) -> Result<Matrix, NetError>;

}

/// Lazily populated per-slot state, one mutex per slot.
pub struct SlotTable<T> {
    slots: Vec<Mutex<Option<T>>>,
    initialized: bool,
}

impl<T: fmt::Debug> fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("SlotTable")
            .field("slots", &self.slots.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<T> SlotTable<T> {

    pub fn new() -> Self {
        SlotTable {
            slots: Vec::new(),
            initialized: false,
        }
    }

    pub fn initialize(&mut self, slots: usize) {
        self.slots = (0..slots).map(|_| Mutex::new(None)).collect();
        self.initialized = true;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Runs `f` with the slot's state while holding that slot's lock.
    pub fn with_slot<R>(
        &self,
        slot: usize,
        f: impl FnOnce(&mut Option<T>) -> Result<R, NetError>,
    ) -> Result<R, NetError> {
        let cell = self.slots.get(slot)
            .ok_or_else(|| NetError::OptimizerSlot(slot, self.slots.len()))?;
        let mut state = cell.lock();
        f(&mut state)
    }

}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        SlotTable::new()
    }
}

pub(crate) fn check_slot_shape(state: &Matrix, gradient: &Matrix, slot: usize) -> Result<(), NetError> {
    if !state.same_shape(gradient) {
        return Err(NetError::ShiftMismatch(format!(
            "optimizer slot {} holds a {}x{} buffer, got {}x{}",
            slot, state.rows(), state.cols(), gradient.rows(), gradient.cols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_slot_out_of_range() {
        let mut table: SlotTable<Matrix> = SlotTable::new();
        assert!(!table.is_initialized());
        table.initialize(2);
        assert!(table.with_slot(1, |_| Ok(())).is_ok());
        match table.with_slot(2, |_| Ok(())) {
            Err(NetError::OptimizerSlot(2, 2)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_updates_on_one_slot_are_serialized() {
        let mut optimizer = Momentum::new(0.0);
        optimizer.initialize(3);
        let optimizer = Arc::new(optimizer);
        let handles: Vec<_> = (0..8).map(|_| {
            let optimizer = Arc::clone(&optimizer);
            thread::spawn(move || {
                for _ in 0..100 {
                    optimizer.rescale(Matrix::column(vec![1.0, 2.0]), 1).unwrap();
                }
            })
        }).collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // gamma = 0 keeps exactly the last gradient; any torn update would leave other values
        let update = optimizer.rescale(Matrix::column(vec![1.0, 2.0]), 1).unwrap();
        assert_eq!(update.as_slice(), &[1.0, 2.0]);
    }

}
