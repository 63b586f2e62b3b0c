use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::optimizer::Optimizer;

/// Parameter update produced by one backward pass.
///
/// Shifts from several samples are summed with `combine` and averaged with `scale`; `Nil`
/// is the identity of `combine`, so parameterless layers and empty accumulators need no
/// special casing.
#[derive(Clone, Debug, PartialEq)]
pub enum Shift {
    Nil,
    Weights { weights: Matrix, biases: Matrix },
    Kernels { kernels: Vec<Matrix>, biases: Matrix },
    BatchNorm { means: Matrix, stddevs: Matrix },
    /// Forget, input, candidate and output gate shifts.
    Lstm(Box<[Shift; 4]>),
}

fn add_checked(target: &mut Matrix, other: &Matrix, what: &str) -> NetResult<()> {
    if !target.same_shape(other) {
        return Err(NetError::ShiftMismatch(format!(
            "{} shift is {}x{}, other is {}x{}",
            what, target.rows(), target.cols(), other.rows(), other.cols()
        )));
    }
    target.add(other);
    Ok(())
}

impl Shift {

    pub fn variant_name(&self) -> &'static str {
        match self {
            Shift::Nil => "Nil",
            Shift::Weights { .. } => "Weights",
            Shift::Kernels { .. } => "Kernels",
            Shift::BatchNorm { .. } => "BatchNorm",
            Shift::Lstm(_) => "Lstm",
        }
    }

    /// Pointwise sum.
    pub fn combine(self, other: Shift) -> NetResult<Shift> {
        match (self, other) {
            (Shift::Nil, other) => Ok(other),
            (this, Shift::Nil) => Ok(this),
            (Shift::Weights { mut weights, mut biases }, Shift::Weights { weights: w2, biases: b2 }) => {
                add_checked(&mut weights, &w2, "weight")?;
                add_checked(&mut biases, &b2, "bias")?;
                Ok(Shift::Weights { weights, biases })
            },
            (Shift::Kernels { mut kernels, mut biases }, Shift::Kernels { kernels: k2, biases: b2 }) => {
                if kernels.len() != k2.len() {
                    return Err(NetError::ShiftMismatch(format!(
                        "{} kernels combined with {}", kernels.len(), k2.len()
                    )));
                }
                for (kernel, other) in kernels.iter_mut().zip(k2.iter()) {
                    add_checked(kernel, other, "kernel")?;
                }
                add_checked(&mut biases, &b2, "bias")?;
                Ok(Shift::Kernels { kernels, biases })
            },
            (Shift::BatchNorm { mut means, mut stddevs }, Shift::BatchNorm { means: m2, stddevs: s2 }) => {
                add_checked(&mut means, &m2, "mean")?;
                add_checked(&mut stddevs, &s2, "stddev")?;
                Ok(Shift::BatchNorm { means, stddevs })
            },
            (Shift::Lstm(gates), Shift::Lstm(others)) => {
                let [f1, i1, c1, o1] = *gates;
                let [f2, i2, c2, o2] = *others;
                Ok(Shift::Lstm(Box::new([
                    f1.combine(f2)?,
                    i1.combine(i2)?,
                    c1.combine(c2)?,
                    o1.combine(o2)?,
                ])))
            },
            (this, other) => Err(NetError::ShiftMismatch(format!(
                "cannot combine {} with {}", this.variant_name(), other.variant_name()
            ))),
        }
    }

    pub fn scale(&mut self, factor: f64) {
        match self {
            Shift::Nil => {},
            Shift::Weights { weights, biases } => {
                weights.scale(factor);
                biases.scale(factor);
            },
            Shift::Kernels { kernels, biases } => {
                for kernel in kernels.iter_mut() {
                    kernel.scale(factor);
                }
                biases.scale(factor);
            },
            Shift::BatchNorm { means, stddevs } => {
                means.scale(factor);
                stddevs.scale(factor);
            },
            Shift::Lstm(gates) => {
                for gate in gates.iter_mut() {
                    gate.scale(factor);
                }
            },
        }
    }

}

/// Everything a layer needs to turn a shift into a parameter update.
#[derive(Clone, Copy)]
pub struct ShiftUpdate<'a> {
    pub optimizer: &'a dyn Optimizer,
    /// Optimizer slot of the layer's first parameter matrix.
    pub slot_offset: usize,
    pub learning_rate: f64,
}

impl<'a> ShiftUpdate<'a> {

    pub fn new(optimizer: &'a dyn Optimizer, slot_offset: usize, learning_rate: f64) -> Self {
        ShiftUpdate { optimizer, slot_offset, learning_rate }
    }

    /// The same update for a sub-component whose slots start `offset` slots later.
    pub fn offset_by(&self, offset: usize) -> ShiftUpdate<'a> {
        ShiftUpdate {
            optimizer: self.optimizer,
            slot_offset: self.slot_offset + offset,
            learning_rate: self.learning_rate,
        }
    }

    /// Rescales `gradient` through the optimizer slot `slot_offset + local_slot` and adds
    /// it, times the learning rate, into `target`.
    pub fn step(&self, target: &mut Matrix, gradient: Matrix, local_slot: usize) -> NetResult<()> {
        if !target.same_shape(&gradient) {
            return Err(NetError::ShiftMismatch(format!(
                "parameter is {}x{}, shift is {}x{}",
                target.rows(), target.cols(), gradient.rows(), gradient.cols()
            )));
        }
        let delta = self.optimizer.rescale(gradient, self.slot_offset + local_slot)?;
        target.add_with_multiplier(&delta, self.learning_rate);
        Ok(())
    }

}
