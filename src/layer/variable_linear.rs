use std::fmt;
use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, LinearLayer, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, put_matrix, put_u32};

/// One shared `W·x + b` applied to every consecutive `chunk_inputs`-sized piece of the
/// input, with the results concatenated. Shifts sum over the chunks.
///
/// Unless `constant_length` is set, the forward pass accepts any multiple of the chunk
/// size, not just the length the layer was initialized with.
#[derive(Clone)]
pub struct VariableLinearLayer {
    chunk_inputs: usize,
    chunk_outputs: usize,
    constant_length: bool,
    inputs: usize,
    chunk: LinearLayer,
}

impl fmt::Debug for VariableLinearLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("VariableLinearLayer")
            .field("chunk_inputs", &self.chunk_inputs)
            .field("chunk_outputs", &self.chunk_outputs)
            .field("constant_length", &self.constant_length)
            .field("inputs", &self.inputs)
            .finish()
    }
}

impl VariableLinearLayer {

    pub fn new(chunk_inputs: usize, chunk_outputs: usize) -> Self {
        VariableLinearLayer {
            chunk_inputs,
            chunk_outputs,
            constant_length: false,
            inputs: 0,
            chunk: LinearLayer::new(chunk_outputs),
        }
    }

    pub fn with_constant_length(mut self, constant_length: bool) -> Self {
        self.constant_length = constant_length;
        self
    }

    pub fn chunk(&self) -> &LinearLayer {
        &self.chunk
    }

    fn num_chunks(&self, len: usize) -> NetResult<usize> {
        if self.constant_length && len != self.inputs {
            return Err(NetError::ShapeMismatch("VariableLinear layer input".to_string(), self.inputs, len));
        }
        if len == 0 || len % self.chunk_inputs != 0 {
            return Err(NetError::NotDivisible("VariableLinear layer input".to_string(), len, self.chunk_inputs));
        }
        Ok(len / self.chunk_inputs)
    }

    fn chunked(&self, input: &Matrix) -> NetResult<Matrix> {
        let chunks = self.num_chunks(input.len())?;
        let mut output = Vec::with_capacity(chunks * self.chunk_outputs);
        for piece in input.as_slice().chunks(self.chunk_inputs) {
            output.extend_from_slice(self.chunk.affine(&Matrix::column(piece.to_vec()))?.as_slice());
        }
        Ok(Matrix::column(output))
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let chunk_inputs = reader.read_u32("variable linear chunk inputs")?;
        let chunk_outputs = reader.read_u32("variable linear chunk outputs")?;
        let constant_length = reader.read_u32("variable linear constant length flag")? != 0;
        let weight_count = reader.read_u32("variable linear weight count")?;
        if chunk_outputs == 0 || weight_count != chunk_inputs * chunk_outputs {
            return Err(NetError::Corrupt(format!(
                "variable linear layer with {} weights for {}x{} chunks", weight_count, chunk_outputs, chunk_inputs
            )));
        }
        let weights = reader.read_matrix(chunk_outputs, chunk_inputs, "variable linear weights")?;
        let biases = reader.read_matrix(chunk_outputs, 1, "variable linear biases")?;
        Ok(VariableLinearLayer {
            chunk_inputs,
            chunk_outputs,
            constant_length,
            inputs: 0,
            chunk: LinearLayer::with_parameters(weights, biases),
        })
    }

}

impl LayerBase for VariableLinearLayer {

    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()> {
        if self.chunk_inputs == 0 {
            return Err(NetError::MissingHyperparameter("VariableLinear", "chunk inputs"));
        }
        if self.chunk_outputs == 0 {
            return Err(NetError::MissingHyperparameter("VariableLinear", "chunk outputs"));
        }
        if num_inputs % self.chunk_inputs != 0 {
            return Err(NetError::NotDivisible("VariableLinear layer inputs".to_string(), num_inputs, self.chunk_inputs));
        }
        self.inputs = num_inputs;
        self.chunk.initialize(self.chunk_inputs, initializer)
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let output = self.chunked(input)?;
        Ok((output, Cache::Input(input.clone())))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.chunked(input)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let input = match cache {
            Cache::Input(input) => input,
            other => return Err(cache_mismatch("VariableLinear", &other)),
        };
        let chunks = self.num_chunks(input.len())?;
        if grad_output.len() != chunks * self.chunk_outputs {
            return Err(NetError::ShapeMismatch(
                "VariableLinear layer gradient".to_string(), chunks * self.chunk_outputs, grad_output.len()
            ));
        }

        let mut shift = Shift::Nil;
        let mut grad_input = Vec::with_capacity(input.len());
        let pieces = input.as_slice().chunks(self.chunk_inputs)
            .zip(grad_output.as_slice().chunks(self.chunk_outputs));
        for (piece, grad) in pieces {
            let (piece_shift, piece_grad) = self.chunk.gradients(
                &Matrix::column(piece.to_vec()),
                &Matrix::column(grad.to_vec()),
            )?;
            shift = shift.combine(piece_shift)?;
            grad_input.extend_from_slice(piece_grad.as_slice());
        }
        Ok((shift, Matrix::new(input.rows(), input.cols(), grad_input)))
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        self.chunk.apply_shift(shift, update)
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.inputs / self.chunk_inputs.max(1) * self.chunk_outputs
    }

    fn num_parameter_matrices(&self) -> usize {
        self.chunk.num_parameter_matrices()
    }

    fn kind(&self) -> LayerKind {
        LayerKind::VariableLinear
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_u32(out, self.chunk_inputs);
        put_u32(out, self.chunk_outputs);
        put_u32(out, self.constant_length as usize);
        put_u32(out, self.chunk.weights().len());
        put_matrix(out, self.chunk.weights());
        put_matrix(out, self.chunk.biases());
    }

    fn pretty_print(&self) -> String {
        format!("VariableLinear Layer\n{} Inputs per chunk -> {} Outputs per chunk\n\nweights =\n{}\nbiases =\n{}\n",
                self.chunk_inputs, self.chunk_outputs, self.chunk.weights(), self.chunk.biases().transpose())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::test_util::*;

    fn layer(chunk_inputs: usize, chunk_outputs: usize, inputs: usize) -> VariableLinearLayer {
        let mut init = RandomNetInitializer::new_with_seed("variable linear");
        let mut layer = VariableLinearLayer::new(chunk_inputs, chunk_outputs);
        layer.initialize(inputs, &mut init).unwrap();
        layer
    }

    #[test]
    fn test_chunks_share_weights() {
        let chunk = LinearLayer::with_parameters(Matrix::new(1, 2, vec![1., 2.]), Matrix::column(vec![0.5]));
        let mut layer = VariableLinearLayer {
            chunk,
            ..VariableLinearLayer::new(2, 1)
        };
        let mut init = RandomNetInitializer::new_with_seed("shared");
        layer.initialize(6, &mut init).unwrap();
        assert_eq!(layer.num_outputs(), 3);

        let input = Matrix::column(vec![1., 1., 0., 2., -1., 0.]);
        let (output, cache) = layer.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[3.5, 4.5, -0.5]);

        let (shift, grad_input) = layer.backward(cache, &Matrix::column(vec![1., 2., 3.])).unwrap();
        assert_eq!(grad_input.as_slice(), &[1., 2., 2., 4., 3., 6.]);
        match shift {
            Shift::Weights { weights, biases } => {
                // Σ gᵢ·xᵢᵀ over the chunks
                assert_eq!(weights.as_slice(), &[1. + 0. - 3., 1. + 4. + 0.]);
                assert_eq!(biases.as_slice(), &[6.]);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let layer = layer(3, 2, 9);
        let mut init = RandomNetInitializer::new_with_seed("variable linear gradients");
        let input = random_matrix(&mut init, 9, 1);
        check_input_gradient(&layer, &input, &[0.3, -0.2, 0.8, 0.0, -0.5, 0.1], 1e-4);
    }

    #[test]
    fn test_apply_lowers_loss() {
        let mut layer = layer(2, 2, 4);
        let input = Matrix::column(vec![0.5, -1.0, 2.0, 0.25]);
        let target = [1.0, -1.0, 0.0, 0.5];
        let before = loss(&layer, &input, &target);
        let (_, cache) = layer.forward(&input).unwrap();
        let (shift, _) = layer.backward(cache, &descent_gradient(&layer, &input, &target)).unwrap();
        apply(&mut layer, shift, 0.05);
        assert!(loss(&layer, &input, &target) < before);
    }

    #[test]
    fn test_input_length() {
        let variable = layer(2, 3, 4);
        assert_eq!(variable.infer(&Matrix::column(vec![1.0; 8])).unwrap().len(), 12);
        match variable.infer(&Matrix::column(vec![1.0; 5])) {
            Err(NetError::NotDivisible(_, 5, 2)) => {},
            other => panic!("unexpected {:?}", other),
        }

        let constant = layer(2, 3, 4).with_constant_length(true);
        match constant.infer(&Matrix::column(vec![1.0; 8])) {
            Err(NetError::ShapeMismatch(_, 4, 8)) => {},
            other => panic!("unexpected {:?}", other),
        }

        let mut init = RandomNetInitializer::new_with_seed("indivisible");
        match VariableLinearLayer::new(2, 3).initialize(5, &mut init) {
            Err(NetError::NotDivisible(_, 5, 2)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let original = layer(3, 2, 6).with_constant_length(true);
        let mut bytes = Vec::new();
        original.write_bytes(&mut bytes);
        let mut reader = PayloadReader::new(&bytes);
        let mut loaded = VariableLinearLayer::read_payload(&mut reader).unwrap();
        reader.finish("variable linear").unwrap();
        let mut init = RandomNetInitializer::new_with_seed("unused");
        loaded.initialize(6, &mut init).unwrap();

        assert!(loaded.constant_length);
        assert_eq!(loaded.chunk.weights(), original.chunk.weights());
        assert_eq!(loaded.chunk.biases(), original.chunk.biases());
    }

}
