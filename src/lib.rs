#[macro_use]
extern crate quick_error;

#[macro_use]
extern crate derive_builder;

#[macro_use]
extern crate log;

pub mod buffer;
pub mod error;
pub mod func;
pub mod initializer;
pub mod layer;
pub mod optimizer;
pub mod net;
pub mod train;
pub mod data;
pub mod save;
pub mod stats;
mod utils;

pub use crate::{
    error::{NetError, NetResult},
    layer::{Layer, LayerBase, LayerKind, Shape},
    net::{Network, NetworkBuilder},
    data::DataPoint,
    train::TrainingResult,
};
