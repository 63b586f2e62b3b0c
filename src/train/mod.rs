//! Concurrent mini-batch training.

mod error;
mod executor;
mod trainer;

pub use self::{
    error::*,
    executor::*,
    trainer::*,
};
