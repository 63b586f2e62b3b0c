use crate::buffer::{Matrix, Shape};
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, Shift, ShiftUpdate, cache_mismatch, shift_mismatch};

/// Reshapes its input into a column.
#[derive(Clone, Debug, Default)]
pub struct FlattenLayer {
    inputs: usize,
}

impl FlattenLayer {
    pub fn new() -> Self {
        FlattenLayer::default()
    }
}

impl LayerBase for FlattenLayer {

    fn initialize(&mut self, num_inputs: usize, _initializer: &mut dyn NetInitializer) -> NetResult<()> {
        self.inputs = num_inputs;
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        Ok((
            input.reshape(input.len(), 1),
            Cache::Shape(Shape::new(input.rows(), input.cols())),
        ))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        Ok(input.reshape(input.len(), 1))
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        match cache {
            Cache::Shape(shape) if shape.len() == grad_output.len() => {
                Ok((Shift::Nil, grad_output.reshape(shape.rows, shape.cols)))
            },
            Cache::Shape(shape) => {
                Err(NetError::ShapeMismatch("Flatten layer gradient".to_string(), shape.len(), grad_output.len()))
            },
            other => Err(cache_mismatch("Flatten", &other)),
        }
    }

    fn apply_shift(&mut self, shift: Shift, _update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            other => Err(shift_mismatch("Flatten", &other)),
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
        LayerKind::Flatten
    }

    fn write_bytes(&self, _out: &mut Vec<u8>) {}

    fn pretty_print(&self) -> String {
        format!("Flatten Layer\n{} Inputs\n", self.inputs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_flatten_round_trip() {
        let layer = FlattenLayer::new();
        let input = Matrix::new(2, 3, vec![1., 2., 3., 4., 5., 6.]);
        let (output, cache) = layer.forward(&input).unwrap();
        assert_eq!(output.cols(), 1);
        assert_eq!(output.as_slice(), input.as_slice());
        let (_, grad) = layer.backward(cache, &output).unwrap();
        assert_eq!(grad, input);
    }

}
