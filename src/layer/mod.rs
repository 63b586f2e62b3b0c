mod cache;
mod shift;
mod payload;
mod linear;
mod conv;
mod pool;
mod flatten;
mod activation;
mod batchnorm;
mod lstm;
mod variable_linear;

pub use self::{
    cache::*,
    shift::*,
    linear::*,
    conv::*,
    pool::*,
    flatten::*,
    activation::*,
    batchnorm::*,
    lstm::*,
    variable_linear::*,
};
pub use crate::buffer::Shape;
pub(crate) use self::payload::{PayloadReader, put_u32, put_f64, put_matrix};

use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::func::ActivationFn;
use crate::initializer::NetInitializer;

pub trait LayerBase {

    /// Validates hyperparameters against the incoming size and allocates parameters.
    /// Parameters that already exist (a loaded layer) are validated instead of replaced.
    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()>;

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)>;

    /// Forward pass without side effects.
    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.forward(input).map(|(output, _)| output)
    }

    /// Consumes the cache of one forward pass. The returned input gradient has the shape of
    /// that pass's input.
    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)>;

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()>;

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    /// Number of optimizer slots the layer occupies.
    fn num_parameter_matrices(&self) -> usize;

    fn kind(&self) -> LayerKind;

    /// Persisted payload, without the kind tag and length header.
    fn write_bytes(&self, out: &mut Vec<u8>);

    fn pretty_print(&self) -> String;
}

/// Persisted layer kind tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Linear = 0,
    Relu = 1,
    Sigmoid = 2,
    Tanh = 3,
    Softmax = 4,
    Conv2D = 5,
    MaxPool = 6,
    Flatten = 7,
    Lstm = 8,
    BatchNorm = 9,
    Lanh = 10,
    VariableLinear = 11,
}

impl LayerKind {

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Linear => "Linear",
            LayerKind::Relu => "Relu",
            LayerKind::Sigmoid => "Sigmoid",
            LayerKind::Tanh => "Tanh",
            LayerKind::Softmax => "Softmax",
            LayerKind::Conv2D => "Conv2D",
            LayerKind::MaxPool => "MaxPool",
            LayerKind::Flatten => "Flatten",
            LayerKind::Lstm => "LSTM",
            LayerKind::BatchNorm => "BatchNorm",
            LayerKind::Lanh => "Lanh",
            LayerKind::VariableLinear => "VariableLinear",
        }
    }

    pub fn from_tag(tag: u32) -> NetResult<LayerKind> {
        Ok(match tag {
            0 => LayerKind::Linear,
            1 => LayerKind::Relu,
            2 => LayerKind::Sigmoid,
            3 => LayerKind::Tanh,
            4 => LayerKind::Softmax,
            5 => LayerKind::Conv2D,
            6 => LayerKind::MaxPool,
            7 => LayerKind::Flatten,
            8 => LayerKind::Lstm,
            9 => LayerKind::BatchNorm,
            10 => LayerKind::Lanh,
            11 => LayerKind::VariableLinear,
            _ => return Err(NetError::UnknownLayerKind(tag)),
        })
    }

}

#[derive(Clone, Debug)]
pub enum Layer {
    Linear(LinearLayer),
    Conv2D(Conv2DLayer),
    MaxPool(MaxPoolLayer),
    Flatten(FlattenLayer),
    Activation(ActivationLayer),
    BatchNorm(BatchNormLayer),
    Lstm(LstmLayer),
    VariableLinear(VariableLinearLayer),
}

impl Layer {

    pub fn linear(outputs: usize) -> Layer {
        Layer::Linear(LinearLayer::new(outputs))
    }

    pub fn conv2d(input_shape: Shape, kernel_shape: Shape, num_kernels: usize) -> Layer {
        Layer::Conv2D(Conv2DLayer::new(input_shape, kernel_shape, num_kernels))
    }

    pub fn max_pool(pool_shape: Shape) -> Layer {
        Layer::MaxPool(MaxPoolLayer::new(pool_shape))
    }

    pub fn flatten() -> Layer {
        Layer::Flatten(FlattenLayer::new())
    }

    pub fn activation(activation: ActivationFn) -> Layer {
        Layer::Activation(ActivationLayer::new(activation))
    }

    pub fn relu() -> Layer {
        Layer::activation(ActivationFn::Relu)
    }

    pub fn sigmoid() -> Layer {
        Layer::activation(ActivationFn::Sigmoid)
    }

    pub fn tanh() -> Layer {
        Layer::activation(ActivationFn::Tanh)
    }

    pub fn softmax() -> Layer {
        Layer::activation(ActivationFn::Softmax)
    }

    pub fn lanh() -> Layer {
        Layer::activation(ActivationFn::Lanh)
    }

    pub fn batch_norm() -> Layer {
        Layer::BatchNorm(BatchNormLayer::default())
    }

    pub fn lstm(outputs: usize, interval: usize, output_sequence: bool) -> Layer {
        Layer::Lstm(LstmLayer::new(outputs, interval, output_sequence))
    }

    /// A shared linear map over every `chunk_inputs`-sized piece of the input.
    pub fn variable_linear(chunk_inputs: usize, chunk_outputs: usize) -> Layer {
        Layer::VariableLinear(VariableLinearLayer::new(chunk_inputs, chunk_outputs))
    }

    /// Rebuilds a layer from its persisted payload. The layer still has to be initialized.
    pub fn from_bytes(kind: LayerKind, payload: &[u8]) -> NetResult<Layer> {
        let mut reader = PayloadReader::new(payload);
        let layer = match kind {
            LayerKind::Linear => Layer::Linear(LinearLayer::read_payload(&mut reader)?),
            LayerKind::Relu => Layer::Activation(ActivationLayer::read_payload(ActivationFn::Relu, &mut reader)?),
            LayerKind::Sigmoid => Layer::Activation(ActivationLayer::read_payload(ActivationFn::Sigmoid, &mut reader)?),
            LayerKind::Tanh => Layer::Activation(ActivationLayer::read_payload(ActivationFn::Tanh, &mut reader)?),
            LayerKind::Softmax => Layer::Activation(ActivationLayer::read_payload(ActivationFn::Softmax, &mut reader)?),
            LayerKind::Conv2D => Layer::Conv2D(Conv2DLayer::read_payload(&mut reader)?),
            LayerKind::MaxPool => Layer::MaxPool(MaxPoolLayer::read_payload(&mut reader)?),
            LayerKind::Flatten => Layer::Flatten(FlattenLayer::new()),
            LayerKind::Lstm => Layer::Lstm(LstmLayer::read_payload(&mut reader)?),
            LayerKind::BatchNorm => Layer::BatchNorm(BatchNormLayer::read_payload(&mut reader)?),
            LayerKind::Lanh => Layer::Activation(ActivationLayer::read_payload(ActivationFn::Lanh, &mut reader)?),
            LayerKind::VariableLinear => Layer::VariableLinear(VariableLinearLayer::read_payload(&mut reader)?),
        };
        reader.finish(kind.name())?;
        Ok(layer)
    }

    /// Marks a convolution as the network's first layer, which skips its input gradient.
    pub(crate) fn mark_first(&mut self) {
        if let Layer::Conv2D(layer) = self {
            layer.set_first_layer(true);
        }
    }

    fn get_delegate(&self) -> &dyn LayerBase {
        match self {
            Layer::Linear(layer) => layer,
            Layer::Conv2D(layer) => layer,
            Layer::MaxPool(layer) => layer,
            Layer::Flatten(layer) => layer,
            Layer::Activation(layer) => layer,
            Layer::BatchNorm(layer) => layer,
            Layer::Lstm(layer) => layer,
            Layer::VariableLinear(layer) => layer,
        }
    }

    fn get_delegate_mut(&mut self) -> &mut dyn LayerBase {
        match self {
            Layer::Linear(layer) => layer,
            Layer::Conv2D(layer) => layer,
            Layer::MaxPool(layer) => layer,
            Layer::Flatten(layer) => layer,
            Layer::Activation(layer) => layer,
            Layer::BatchNorm(layer) => layer,
            Layer::Lstm(layer) => layer,
            Layer::VariableLinear(layer) => layer,
        }
    }

}

impl LayerBase for Layer {

    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()> {
        self.get_delegate_mut().initialize(num_inputs, initializer)
    }

    // NOTE: forward and backward match directly to avoid dynamic dispatch on the hot path

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        match self {
            Layer::Linear(layer) => layer.forward(input),
            Layer::Conv2D(layer) => layer.forward(input),
            Layer::MaxPool(layer) => layer.forward(input),
            Layer::Flatten(layer) => layer.forward(input),
            Layer::Activation(layer) => layer.forward(input),
            Layer::BatchNorm(layer) => layer.forward(input),
            Layer::Lstm(layer) => layer.forward(input),
            Layer::VariableLinear(layer) => layer.forward(input),
        }
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.get_delegate().infer(input)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        match self {
            Layer::Linear(layer) => layer.backward(cache, grad_output),
            Layer::Conv2D(layer) => layer.backward(cache, grad_output),
            Layer::MaxPool(layer) => layer.backward(cache, grad_output),
            Layer::Flatten(layer) => layer.backward(cache, grad_output),
            Layer::Activation(layer) => layer.backward(cache, grad_output),
            Layer::BatchNorm(layer) => layer.backward(cache, grad_output),
            Layer::Lstm(layer) => layer.backward(cache, grad_output),
            Layer::VariableLinear(layer) => layer.backward(cache, grad_output),
        }
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        self.get_delegate_mut().apply_shift(shift, update)
    }

    fn num_inputs(&self) -> usize {
        self.get_delegate().num_inputs()
    }

    fn num_outputs(&self) -> usize {
        self.get_delegate().num_outputs()
    }

    fn num_parameter_matrices(&self) -> usize {
        self.get_delegate().num_parameter_matrices()
    }

    fn kind(&self) -> LayerKind {
        self.get_delegate().kind()
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.get_delegate().write_bytes(out)
    }

    fn pretty_print(&self) -> String {
        self.get_delegate().pretty_print()
    }
}

pub(crate) fn cache_mismatch(layer: &'static str, cache: &Cache) -> NetError {
    debug!("{} layer got a {} cache", layer, cache.variant_name());
    NetError::CacheMismatch(layer)
}

pub(crate) fn shift_mismatch(layer: &str, shift: &Shift) -> NetError {
    NetError::ShiftMismatch(format!("{} layer cannot apply a {} shift", layer, shift.variant_name()))
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::optimizer::{GradientDescent, Optimizer};

    pub fn random_matrix(init: &mut RandomNetInitializer, rows: usize, cols: usize) -> Matrix {
        Matrix::from_fn(rows, cols, |_, _| init.sample_normal())
    }

    /// 0.5·Σ(target − output)² after a forward pass.
    pub fn loss(layer: &dyn LayerBase, input: &Matrix, target: &[f64]) -> f64 {
        let (output, _) = layer.forward(input).unwrap();
        output.as_slice().iter().zip(target.iter())
            .map(|(y, t)| 0.5 * (t - y) * (t - y))
            .sum()
    }

    /// Output gradient `target − output` for the loss above.
    pub fn descent_gradient(layer: &dyn LayerBase, input: &Matrix, target: &[f64]) -> Matrix {
        let (output, _) = layer.forward(input).unwrap();
        let data = output.as_slice().iter().zip(target.iter()).map(|(y, t)| t - y).collect();
        Matrix::new(output.rows(), output.cols(), data)
    }

    /// Central difference of the loss for every input element, compared against the
    /// negated backward input gradient.
    pub fn check_input_gradient(layer: &dyn LayerBase, input: &Matrix, target: &[f64], tolerance: f64) {
        let (_, cache) = layer.forward(input).unwrap();
        let grad = descent_gradient(layer, input, target);
        let (_, grad_input) = layer.backward(cache, &grad).unwrap();
        assert!(grad_input.same_shape(input));
        let h = 1e-6;
        for idx in 0..input.len() {
            let mut plus = input.clone();
            plus.as_mut_slice()[idx] += h;
            let mut minus = input.clone();
            minus.as_mut_slice()[idx] -= h;
            let numeric = (loss(layer, &plus, target) - loss(layer, &minus, target)) / (2.0 * h);
            let analytic = -grad_input.as_slice()[idx];
            let scale = numeric.abs().max(analytic.abs()).max(1.0);
            assert!((numeric - analytic).abs() / scale < tolerance,
                    "input {}: numeric {} vs analytic {}", idx, numeric, analytic);
        }
    }

    /// Applies a single-slot-per-matrix gradient descent step with the given learning rate.
    pub fn apply(layer: &mut dyn LayerBase, shift: Shift, learning_rate: f64) {
        let mut optimizer = GradientDescent::new();
        optimizer.initialize(layer.num_parameter_matrices());
        layer.apply_shift(shift, &ShiftUpdate::new(&optimizer, 0, learning_rate)).unwrap();
    }
}
