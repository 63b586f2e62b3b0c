use std::collections::VecDeque;
use std::fmt;
use parking_lot::Mutex;
use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_matrix, put_u32};

pub const DEFAULT_BATCH_SIZE: usize = 30;

/// Normalizes every input element with running statistics gathered from recent training
/// inputs, then rescales it with a trained mean and standard deviation.
///
/// Training forward passes record their raw input in a ring buffer holding the last
/// `batch_size` inputs. Once full, the buffer is folded into the running statistics the
/// next time a shift is applied.
pub struct BatchNormLayer {
    batch_size: usize,
    gradient_scale: f64,
    inputs: usize,

    means: Matrix,
    stddevs: Matrix,
    trained_means: Matrix,
    trained_stddevs: Matrix,

    popped: usize,
    recorded: Mutex<VecDeque<Matrix>>,
}

impl fmt::Debug for BatchNormLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("BatchNormLayer")
            .field("batch_size", &self.batch_size)
            .field("gradient_scale", &self.gradient_scale)
            .field("inputs", &self.inputs)
            .field("popped", &self.popped)
            .field("recorded", &self.recorded.lock().len())
            .finish()
    }
}

impl Clone for BatchNormLayer {
    fn clone(&self) -> Self {
        BatchNormLayer {
            batch_size: self.batch_size,
            gradient_scale: self.gradient_scale,
            inputs: self.inputs,
            means: self.means.clone(),
            stddevs: self.stddevs.clone(),
            trained_means: self.trained_means.clone(),
            trained_stddevs: self.trained_stddevs.clone(),
            popped: self.popped,
            recorded: Mutex::new(self.recorded.lock().clone()),
        }
    }
}

impl Default for BatchNormLayer {
    fn default() -> Self {
        BatchNormLayer::new(DEFAULT_BATCH_SIZE, 1.0)
    }
}

#[allow(dead_code)]
impl BatchNormLayer {

    /// Zero for either argument selects the default.
    pub fn new(batch_size: usize, gradient_scale: f64) -> Self {
        BatchNormLayer {
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
            gradient_scale: if gradient_scale == 0.0 { 1.0 } else { gradient_scale },
            inputs: 0,
            means: Matrix::zeros(0, 0),
            stddevs: Matrix::zeros(0, 0),
            trained_means: Matrix::zeros(0, 0),
            trained_stddevs: Matrix::zeros(0, 0),
            popped: 0,
            recorded: Mutex::new(VecDeque::new()),
        }
    }

    pub fn means(&self) -> &Matrix {
        &self.means
    }

    pub fn stddevs(&self) -> &Matrix {
        &self.stddevs
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded.lock().len()
    }

    fn normalize(&self, input: &Matrix) -> NetResult<(Matrix, Matrix)> {
        if input.len() != self.inputs {
            return Err(NetError::ShapeMismatch("BatchNorm layer input".to_string(), self.inputs, input.len()));
        }
        let mut normed = input.clone();
        let mut output = input.clone();
        let stats = self.means.as_slice().iter()
            .zip(self.stddevs.as_slice())
            .zip(self.trained_means.as_slice().iter().zip(self.trained_stddevs.as_slice()));
        for ((n, o), ((mean, stddev), (t_mean, t_stddev))) in normed.as_mut_slice().iter_mut()
            .zip(output.as_mut_slice().iter_mut())
            .zip(stats) {
            *n = if *stddev == 0.0 { 0.0 } else { (*n - mean) / stddev };
            *o = *n * t_stddev + t_mean;
        }
        Ok((normed, output))
    }

    /// Folds the recorded inputs into the running statistics with weight `1/(popped+1)`.
    fn pop_recorded(&mut self) {
        let recorded = self.recorded.get_mut();
        let count = recorded.len() as f64;
        let mut batch_means = Matrix::zeros(self.inputs, 1);
        for input in recorded.iter() {
            for (m, v) in batch_means.as_mut_slice().iter_mut().zip(input.as_slice()) {
                *m += v / count;
            }
        }
        let mut batch_stddevs = Matrix::zeros(self.inputs, 1);
        for input in recorded.iter() {
            for ((s, v), m) in batch_stddevs.as_mut_slice().iter_mut().zip(input.as_slice()).zip(batch_means.as_slice()) {
                *s += (v - m) * (v - m) / count;
            }
        }
        batch_stddevs.apply(f64::sqrt);
        recorded.clear();

        let weight = 1.0 / (self.popped + 1) as f64;
        self.means.scale(1.0 - weight);
        self.means.add_with_multiplier(&batch_means, weight);
        self.stddevs.scale(1.0 - weight);
        self.stddevs.add_with_multiplier(&batch_stddevs, weight);
        self.popped += 1;
        trace!("batch norm statistics updated, {} batches folded in", self.popped);
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let inputs = reader.read_u32("batch norm inputs")?;
        let popped = reader.read_u32("batch norm popped count")?;
        let batch_size = reader.read_u32("batch norm batch size")?;
        let mut layer = BatchNormLayer::new(batch_size, 1.0);
        layer.popped = popped;
        layer.means = reader.read_matrix(inputs, 1, "batch norm means")?;
        layer.stddevs = reader.read_matrix(inputs, 1, "batch norm stddevs")?;
        layer.trained_means = reader.read_matrix(inputs, 1, "batch norm trained means")?;
        layer.trained_stddevs = reader.read_matrix(inputs, 1, "batch norm trained stddevs")?;
        Ok(layer)
    }

}

impl LayerBase for BatchNormLayer {

    fn initialize(&mut self, num_inputs: usize, _initializer: &mut dyn NetInitializer) -> NetResult<()> {
        self.inputs = num_inputs;
        self.recorded.get_mut().clear();
        if !self.means.is_empty() {
            if self.means.len() != num_inputs {
                return Err(NetError::ShapeMismatch("BatchNorm statistics".to_string(), num_inputs, self.means.len()));
            }
            return Ok(());
        }
        self.means = Matrix::zeros(num_inputs, 1);
        self.stddevs = Matrix::filled(num_inputs, 1, 1.0);
        self.trained_means = Matrix::zeros(num_inputs, 1);
        self.trained_stddevs = Matrix::filled(num_inputs, 1, 1.0);
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let (normed, output) = self.normalize(input)?;
        {
            let mut recorded = self.recorded.lock();
            if recorded.len() >= self.batch_size {
                recorded.pop_front();
            }
            recorded.push_back(input.clone());
        }
        Ok((output, Cache::Normed(normed)))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.normalize(input).map(|(_, output)| output)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let normed = match cache {
            Cache::Normed(normed) => normed,
            other => return Err(cache_mismatch("BatchNorm", &other)),
        };
        if grad_output.len() != self.inputs {
            return Err(NetError::ShapeMismatch("BatchNorm layer gradient".to_string(), self.inputs, grad_output.len()));
        }
        let grad = grad_output.reshape(self.inputs, 1);
        let scale = self.gradient_scale;
        let stddev_shift = grad.zip_map(&normed.reshape(self.inputs, 1), |g, n| g * n * scale);
        let ratios = self.trained_stddevs.zip_map(&self.stddevs, |t, s| if s == 0.0 { 0.0 } else { t / s });
        let grad_input = grad.zip_map(&ratios, |g, r| g * r);
        Ok((
            Shift::BatchNorm { means: grad, stddevs: stddev_shift },
            grad_input.reshape(normed.rows(), normed.cols()),
        ))
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        if self.recorded.get_mut().len() >= self.batch_size {
            self.pop_recorded();
        }
        match shift {
            Shift::Nil => Ok(()),
            Shift::BatchNorm { means, stddevs } => {
                update.step(&mut self.trained_means, means, 0)?;
                update.step(&mut self.trained_stddevs, stddevs, 1)
            },
            other => Err(shift_mismatch("BatchNorm", &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.inputs
    }

    fn num_parameter_matrices(&self) -> usize {
        2
    }

    fn kind(&self) -> LayerKind {
        LayerKind::BatchNorm
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_u32(out, self.inputs);
        put_u32(out, self.popped);
        put_u32(out, self.batch_size);
        put_matrix(out, &self.means);
        put_matrix(out, &self.stddevs);
        put_matrix(out, &self.trained_means);
        put_matrix(out, &self.trained_stddevs);
    }

    fn pretty_print(&self) -> String {
        format!("BatchNorm Layer\nMeans: {}\nStdDevs: {}\nTrained Means: {}\nTrained StdDevs: {}\n",
                self.means.transpose(), self.stddevs.transpose(),
                self.trained_means.transpose(), self.trained_stddevs.transpose())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::test_util::*;
    use approx::assert_abs_diff_eq;

    fn layer(batch_size: usize, inputs: usize) -> BatchNormLayer {
        let mut init = RandomNetInitializer::new_with_seed("batch norm");
        let mut layer = BatchNormLayer::new(batch_size, 1.0);
        layer.initialize(inputs, &mut init).unwrap();
        layer
    }

    #[test]
    fn test_fresh_layer_is_identity() {
        let bn = layer(4, 3);
        let input = Matrix::column(vec![1.5, -2.0, 0.25]);
        assert_eq!(bn.infer(&input).unwrap(), input);
        assert_eq!(bn.recorded_len(), 0);
        bn.forward(&input).unwrap();
        assert_eq!(bn.recorded_len(), 1);
    }

    #[test]
    fn test_running_statistics() {
        let mut bn = layer(2, 1);
        bn.forward(&Matrix::column(vec![1.0])).unwrap();
        bn.forward(&Matrix::column(vec![3.0])).unwrap();
        apply(&mut bn, Shift::Nil, 0.1);
        assert_eq!(bn.recorded_len(), 0);
        assert_abs_diff_eq!(bn.means().at(0, 0), 2.0);
        assert_abs_diff_eq!(bn.stddevs().at(0, 0), 1.0);

        // ring buffer keeps the last two inputs
        for v in &[100.0, 5.0, 9.0] {
            bn.forward(&Matrix::column(vec![*v])).unwrap();
        }
        apply(&mut bn, Shift::Nil, 0.1);
        // batch mean 7, stddev 2, folded in with weight 1/2
        assert_abs_diff_eq!(bn.means().at(0, 0), 4.5);
        assert_abs_diff_eq!(bn.stddevs().at(0, 0), 1.5);
        let normed = bn.infer(&Matrix::column(vec![6.0])).unwrap();
        assert_abs_diff_eq!(normed.at(0, 0), 1.0);
    }

    #[test]
    fn test_zero_variance_yields_zero() {
        let mut bn = layer(2, 2);
        bn.forward(&Matrix::column(vec![4.0, 1.0])).unwrap();
        bn.forward(&Matrix::column(vec![4.0, 3.0])).unwrap();
        apply(&mut bn, Shift::Nil, 0.1);
        let (output, cache) = bn.forward(&Matrix::column(vec![7.0, 3.0])).unwrap();
        assert_eq!(output.at(0, 0), 0.0);
        assert_abs_diff_eq!(output.at(1, 0), 1.0);
        let (_, grad) = bn.backward(cache, &Matrix::column(vec![1.0, 1.0])).unwrap();
        assert_eq!(grad.at(0, 0), 0.0);
        assert!(grad.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_shift_trains_rescaling() {
        let mut bn = layer(30, 2);
        let input = Matrix::column(vec![1.0, -1.0]);
        let target = [3.0, 0.0];
        let before = loss(&bn, &input, &target);
        let (_, cache) = bn.forward(&input).unwrap();
        let grad = descent_gradient(&bn, &input, &target);
        let (shift, _) = bn.backward(cache, &grad).unwrap();
        apply(&mut bn, shift, 0.1);
        assert!(loss(&bn, &input, &target) < before);
    }

}
