use std::fmt;
use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_matrix, put_u32};

/// Fully connected layer, `W·x + b`.
#[derive(Clone)]
pub struct LinearLayer {
    outputs: usize,
    inputs: usize,
    weights: Matrix,
    biases: Matrix,
}

impl fmt::Debug for LinearLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("LinearLayer")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("weights", &self.weights.len())
            .field("biases", &self.biases.len())
            .finish()
    }
}

#[allow(dead_code)]
impl LinearLayer {

    pub fn new(outputs: usize) -> Self {
        LinearLayer {
            outputs,
            inputs: 0,
            weights: Matrix::zeros(0, 0),
            biases: Matrix::zeros(0, 0),
        }
    }

    /// A layer with the given parameters; `initialize` will only validate them.
    pub fn with_parameters(weights: Matrix, biases: Matrix) -> Self {
        LinearLayer {
            outputs: weights.rows(),
            inputs: weights.cols(),
            weights,
            biases,
        }
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    #[cfg(test)]
    pub(crate) fn weights_mut(&mut self) -> &mut Matrix {
        &mut self.weights
    }

    /// `W·x + b` over the input read as a flat vector.
    pub(crate) fn affine(&self, input: &Matrix) -> NetResult<Matrix> {
        if input.len() != self.inputs {
            return Err(NetError::ShapeMismatch("Linear layer input".to_string(), self.inputs, input.len()));
        }
        let column = input.reshape(input.len(), 1);
        let mut output = self.weights.matmul(&column);
        output.add(&self.biases);
        Ok(output)
    }

    /// Weight and bias shifts plus `Wᵀ·g`, shaped like `input`.
    pub(crate) fn gradients(&self, input: &Matrix, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        if grad_output.len() != self.outputs {
            return Err(NetError::ShapeMismatch("Linear layer gradient".to_string(), self.outputs, grad_output.len()));
        }
        let grad = grad_output.reshape(self.outputs, 1);
        let column = input.reshape(input.len(), 1);
        let weights = grad.matmul_transpose(&column);
        let grad_input = self.weights.transpose_matmul(&grad);
        Ok((
            Shift::Weights { weights, biases: grad },
            grad_input.reshape(input.rows(), input.cols()),
        ))
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let outputs = reader.read_u32("linear outputs")?;
        let weight_count = reader.read_u32("linear weight count")?;
        if outputs == 0 || weight_count % outputs != 0 {
            return Err(NetError::Corrupt(format!(
                "linear layer with {} weights over {} outputs", weight_count, outputs
            )));
        }
        let weights = reader.read_matrix(outputs, weight_count / outputs, "linear weights")?;
        let biases = reader.read_matrix(outputs, 1, "linear biases")?;
        Ok(LinearLayer::with_parameters(weights, biases))
    }

}

impl LayerBase for LinearLayer {

    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()> {
        if self.outputs == 0 {
            return Err(NetError::MissingHyperparameter("Linear", "outputs"));
        }
        self.inputs = num_inputs;
        if !self.weights.is_empty() {
            if self.weights.cols() != num_inputs {
                return Err(NetError::ShapeMismatch("Linear layer weights".to_string(), num_inputs, self.weights.cols()));
            }
            return Ok(());
        }
        let (inputs, outputs) = (num_inputs, self.outputs);
        self.weights = Matrix::from_fn(outputs, inputs, |_, _| initializer.xavier(inputs, outputs));
        self.biases = Matrix::from_fn(outputs, 1, |_, _| initializer.xavier(inputs, outputs));
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let output = self.affine(input)?;
        Ok((output, Cache::Input(input.clone())))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.affine(input)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        match cache {
            Cache::Input(input) => self.gradients(&input, grad_output),
            other => Err(cache_mismatch("Linear", &other)),
        }
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            Shift::Weights { weights, biases } => {
                update.step(&mut self.weights, weights, 0)?;
                update.step(&mut self.biases, biases, 1)
            },
            other => Err(shift_mismatch("Linear", &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.outputs
    }

    fn num_parameter_matrices(&self) -> usize {
        2
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Linear
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_u32(out, self.outputs);
        put_u32(out, self.weights.len());
        put_matrix(out, &self.weights);
        put_matrix(out, &self.biases);
    }

    fn pretty_print(&self) -> String {
        format!("Linear Layer\n{} Inputs -> {} Outputs\n\nweights =\n{}\nbiases =\n{}\n",
                self.inputs, self.outputs, self.weights, self.biases.transpose())
    }
}
