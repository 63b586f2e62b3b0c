use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::func::ActivationFn;
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_f64};

/// Elementwise activation. The backward pass multiplies the local derivative by
/// `gradient_scale`.
#[derive(Clone, Debug)]
pub struct ActivationLayer {
    activation: ActivationFn,
    gradient_scale: f64,
    inputs: usize,
}

impl ActivationLayer {

    pub fn new(activation: ActivationFn) -> Self {
        ActivationLayer {
            activation,
            gradient_scale: 1.0,
            inputs: 0,
        }
    }

    /// A scale of 0 is treated as 1.
    pub fn with_gradient_scale(mut self, gradient_scale: f64) -> Self {
        self.gradient_scale = if gradient_scale == 0.0 { 1.0 } else { gradient_scale };
        self
    }

    pub fn activation(&self) -> ActivationFn {
        self.activation
    }

    pub(crate) fn read_payload(activation: ActivationFn, reader: &mut PayloadReader) -> NetResult<Self> {
        let layer = ActivationLayer::new(activation);
        if reader.remaining() == 0 {
            return Ok(layer);
        }
        Ok(layer.with_gradient_scale(reader.read_f64("activation gradient scale")?))
    }

}

impl LayerBase for ActivationLayer {

    fn initialize(&mut self, num_inputs: usize, _initializer: &mut dyn NetInitializer) -> NetResult<()> {
        self.inputs = num_inputs;
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let output = self.activation.activate(input);
        let cache = if self.activation.derivative_uses_input() {
            Cache::Input(input.clone())
        } else {
            Cache::Output(output.clone())
        };
        Ok((output, cache))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        Ok(self.activation.activate(input))
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let cached = match (cache, self.activation.derivative_uses_input()) {
            (Cache::Input(input), true) => input,
            (Cache::Output(output), false) => output,
            (other, _) => return Err(cache_mismatch(self.activation.name(), &other)),
        };
        if cached.len() != grad_output.len() {
            return Err(NetError::ShapeMismatch(
                format!("{} layer gradient", self.activation.name()), cached.len(), grad_output.len()
            ));
        }
        let (activation, scale) = (self.activation, self.gradient_scale);
        let grad = grad_output.reshape(cached.rows(), cached.cols());
        Ok((Shift::Nil, grad.zip_map(&cached, |g, c| g * activation.derivative(c) * scale)))
    }

    fn apply_shift(&mut self, shift: Shift, _update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            other => Err(shift_mismatch(self.activation.name(), &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.inputs
    }

    fn num_parameter_matrices(&self) -> usize {
        0
    }

    fn kind(&self) -> LayerKind {
        match self.activation {
            ActivationFn::Relu => LayerKind::Relu,
            ActivationFn::Sigmoid => LayerKind::Sigmoid,
            ActivationFn::Tanh => LayerKind::Tanh,
            ActivationFn::Softmax => LayerKind::Softmax,
            ActivationFn::Lanh => LayerKind::Lanh,
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_f64(out, self.gradient_scale);
    }

    fn pretty_print(&self) -> String {
        format!("{} Layer\n{} Inputs, gradient scale {}\n", self.activation.name(), self.inputs, self.gradient_scale)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::test_util::*;
    use crate::func::{LANH_LEAK, RELU_LEAK};
    use approx::assert_abs_diff_eq;

    fn layer(activation: ActivationFn, inputs: usize) -> ActivationLayer {
        let mut init = RandomNetInitializer::new_with_seed("activation");
        let mut layer = ActivationLayer::new(activation);
        layer.initialize(inputs, &mut init).unwrap();
        layer
    }

    #[test]
    fn test_smooth_activations_match_finite_differences() {
        let mut init = RandomNetInitializer::new_with_seed("activation gradients");
        let input = random_matrix(&mut init, 5, 1);
        let target = [0.1, 0.9, -0.3, 0.4, 0.0];
        check_input_gradient(&layer(ActivationFn::Sigmoid, 5), &input, &target, 1e-4);
        check_input_gradient(&layer(ActivationFn::Tanh, 5), &input, &target, 1e-4);
    }

    #[test]
    fn test_relu_leaks_gradient() {
        let relu = layer(ActivationFn::Relu, 3);
        let input = Matrix::column(vec![-2.0, 0.0, 3.0]);
        let (output, cache) = relu.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[0.0, 0.0, 3.0]);
        let (_, grad) = relu.backward(cache, &Matrix::column(vec![1.0, 1.0, 1.0])).unwrap();
        assert_eq!(grad.as_slice(), &[RELU_LEAK, RELU_LEAK, 1.0]);
    }

    #[test]
    fn test_lanh_leaks_gradient_where_clipped() {
        let lanh = layer(ActivationFn::Lanh, 4).with_gradient_scale(2.0);
        let input = Matrix::column(vec![-1.5, -1.0, 0.5, 3.0]);
        let (output, cache) = lanh.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[-1.0, -1.0, 0.5, 1.0]);
        let (shift, grad) = lanh.backward(cache, &Matrix::column(vec![1.0; 4])).unwrap();
        assert_eq!(shift, Shift::Nil);
        let leaked = 2.0 * LANH_LEAK;
        assert_eq!(grad.as_slice(), &[leaked, leaked, 2.0, leaked]);
        assert_eq!(lanh.kind(), LayerKind::Lanh);
    }

    #[test]
    fn test_gradient_scale() {
        let scaled = layer(ActivationFn::Sigmoid, 1).with_gradient_scale(2.0);
        let (_, cache) = scaled.forward(&Matrix::column(vec![0.0])).unwrap();
        let (_, grad) = scaled.backward(cache, &Matrix::column(vec![1.0])).unwrap();
        assert_abs_diff_eq!(grad.at(0, 0), 0.5);
        assert_eq!(ActivationLayer::new(ActivationFn::Tanh).with_gradient_scale(0.0).gradient_scale, 1.0);
    }

    #[test]
    fn test_empty_payload_reads_unit_scale() {
        let mut reader = PayloadReader::new(&[]);
        let layer = ActivationLayer::read_payload(ActivationFn::Softmax, &mut reader).unwrap();
        assert_eq!(layer.gradient_scale, 1.0);
        assert_eq!(layer.kind(), LayerKind::Softmax);
    }

}
