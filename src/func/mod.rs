
mod activation;
mod error;
mod learningrate;
mod completion;

pub use self::{
    activation::*,
    error::*,
    completion::*,
    learningrate::*,
};
