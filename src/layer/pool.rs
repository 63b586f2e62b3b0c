use crate::buffer::{Matrix, Shape, max_pool, max_pool_mask, unpool};
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_u32};

/// Block-wise maximum over the incoming matrix.
#[derive(Clone, Debug)]
pub struct MaxPoolLayer {
    pool_shape: Shape,
    inputs: usize,
}

impl MaxPoolLayer {

    pub fn new(pool_shape: Shape) -> Self {
        MaxPoolLayer { pool_shape, inputs: 0 }
    }

    fn pooled(&self, input: &Matrix) -> NetResult<Matrix> {
        if input.len() != self.inputs {
            return Err(NetError::InputSize(self.inputs, input.len()));
        }
        max_pool(input, self.pool_shape)
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let rows = reader.read_u32("max pool rows")?;
        let cols = reader.read_u32("max pool cols")?;
        Ok(MaxPoolLayer::new(Shape::new(rows, cols)))
    }

}

impl LayerBase for MaxPoolLayer {

    fn initialize(&mut self, num_inputs: usize, _initializer: &mut dyn NetInitializer) -> NetResult<()> {
        if self.pool_shape.is_empty() {
            return Err(NetError::MissingHyperparameter("MaxPool", "pool_shape"));
        }
        if num_inputs % self.pool_shape.len() != 0 {
            return Err(NetError::NotDivisible("MaxPool inputs".to_string(), num_inputs, self.pool_shape.len()));
        }
        self.inputs = num_inputs;
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let output = self.pooled(input)?;
        Ok((output, Cache::Input(input.clone())))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.pooled(input)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let input = match cache {
            Cache::Input(input) => input,
            other => return Err(cache_mismatch("MaxPool", &other)),
        };
        let pooled = Shape::new(input.rows() / self.pool_shape.rows, input.cols() / self.pool_shape.cols);
        if grad_output.len() != pooled.len() {
            return Err(NetError::ShapeMismatch("MaxPool layer gradient".to_string(), pooled.len(), grad_output.len()));
        }
        let grad = grad_output.reshape(pooled.rows, pooled.cols);
        let mut grad_input = unpool(&grad, self.pool_shape);
        grad_input.mul_elem(&max_pool_mask(&input, self.pool_shape)?);
        Ok((Shift::Nil, grad_input))
    }

    fn apply_shift(&mut self, shift: Shift, _update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            other => Err(shift_mismatch("MaxPool", &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.inputs / self.pool_shape.len().max(1)
    }

    fn num_parameter_matrices(&self) -> usize {
        0
    }

    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_u32(out, self.pool_shape.rows);
        put_u32(out, self.pool_shape.cols);
    }

    fn pretty_print(&self) -> String {
        format!("MaxPool Layer\n{}x{} Pool, {} Inputs -> {} Outputs\n",
                self.pool_shape.rows, self.pool_shape.cols, self.inputs, self.num_outputs())
    }
}
