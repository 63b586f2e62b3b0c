use std::fmt;
use std::mem;
use crate::buffer::{Matrix, Shape};
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, LinearLayer, LstmCache, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_u32};
use crate::utils::sigmoid;

/// Long short-term memory over a sequence of `interval` equally sized steps.
///
/// The input is read as a flat vector and split into `interval` steps. Each gate is a
/// linear layer over the concatenation `[h_{t−1}, x_t]`. The output is the last hidden
/// state, or every hidden state as an `interval × outputs` matrix when `output_sequence`
/// is set.
#[derive(Clone)]
pub struct LstmLayer {
    outputs: usize,
    interval: usize,
    output_sequence: bool,

    inputs: usize,
    step_inputs: usize,

    forget: LinearLayer,
    input: LinearLayer,
    candidate: LinearLayer,
    output: LinearLayer,
}

impl fmt::Debug for LstmLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("LstmLayer")
            .field("outputs", &self.outputs)
            .field("interval", &self.interval)
            .field("output_sequence", &self.output_sequence)
            .field("inputs", &self.inputs)
            .finish()
    }
}

fn sigmoid_slope(y: f64) -> f64 {
    y * (1.0 - y)
}

fn tanh_slope(y: f64) -> f64 {
    1.0 - y * y
}

impl LstmLayer {

    pub fn new(outputs: usize, interval: usize, output_sequence: bool) -> Self {
        LstmLayer {
            outputs,
            interval,
            output_sequence,
            inputs: 0,
            step_inputs: 0,
            forget: LinearLayer::new(outputs),
            input: LinearLayer::new(outputs),
            candidate: LinearLayer::new(outputs),
            output: LinearLayer::new(outputs),
        }
    }

    fn gates(&self) -> [&LinearLayer; 4] {
        [&self.forget, &self.input, &self.candidate, &self.output]
    }

    fn run(&self, input: &Matrix, mut cache: Option<&mut LstmCache>) -> NetResult<Matrix> {
        if input.len() != self.inputs {
            return Err(NetError::ShapeMismatch("LSTM layer input".to_string(), self.inputs, input.len()));
        }
        if self.step_inputs == 0 {
            return Err(NetError::NotInitialized);
        }
        let data = input.as_slice();
        let mut hidden = Matrix::zeros(self.outputs, 1);
        let mut cell = Matrix::zeros(self.outputs, 1);
        let mut sequence = Vec::with_capacity(self.num_outputs());

        for step in data.chunks(self.step_inputs) {
            let mut concat = hidden.as_slice().to_vec();
            concat.extend_from_slice(step);
            let concat = Matrix::column(concat);

            let forget = self.forget.affine(&concat)?.map(sigmoid);
            let remember = self.input.affine(&concat)?.map(sigmoid);
            let candidate = self.candidate.affine(&concat)?.map(f64::tanh);
            let output = self.output.affine(&concat)?.map(sigmoid);

            cell.mul_elem(&forget);
            let mut fresh = remember.clone();
            fresh.mul_elem(&candidate);
            cell.add(&fresh);

            hidden = cell.map(f64::tanh);
            hidden.mul_elem(&output);
            sequence.extend_from_slice(hidden.as_slice());

            if let Some(cache) = cache.as_mut() {
                cache.input_shape = Shape::new(input.rows(), input.cols());
                cache.inputs.push(concat);
                cache.cell_states.push(cell.clone());
                cache.forget.push(forget);
                cache.input.push(remember);
                cache.candidate.push(candidate);
                cache.output.push(output);
            }
        }

        if self.output_sequence {
            Ok(Matrix::new(self.interval, self.outputs, sequence))
        } else {
            Ok(hidden)
        }
    }

    /// Backpropagation through time.
    fn unroll_backward(&self, cache: &LstmCache, grad_output: &Matrix) -> NetResult<(Shift, Vec<f64>)> {
        if grad_output.len() != self.num_outputs() {
            return Err(NetError::ShapeMismatch("LSTM layer gradient".to_string(), self.num_outputs(), grad_output.len()));
        }
        let steps = cache.inputs.len();
        let step_grads: Vec<Matrix> = if self.output_sequence {
            grad_output.as_slice().chunks(self.outputs).map(|c| Matrix::column(c.to_vec())).collect()
        } else {
            let mut grads = vec![Matrix::zeros(self.outputs, 1); steps];
            if let Some(last) = grads.last_mut() {
                *last = grad_output.reshape(self.outputs, 1);
            }
            grads
        };

        let mut shifts = [Shift::Nil, Shift::Nil, Shift::Nil, Shift::Nil];
        let mut grad_input = vec![0.0; self.inputs];
        let mut hidden_grad = Matrix::zeros(self.outputs, 1);
        let mut cell_grad = Matrix::zeros(self.outputs, 1);
        let zero_cell = Matrix::zeros(self.outputs, 1);

        for t in (0..steps).rev() {
            let (forget, remember, candidate, output) =
                (&cache.forget[t], &cache.input[t], &cache.candidate[t], &cache.output[t]);
            hidden_grad.add(&step_grads[t]);

            let tanh_cell = cache.cell_states[t].map(f64::tanh);
            let through_hidden = Matrix::from_fn(self.outputs, 1, |r, _| {
                hidden_grad.at(r, 0) * output.at(r, 0) * tanh_slope(tanh_cell.at(r, 0))
            });
            cell_grad.add(&through_hidden);

            let prev_cell = if t == 0 { &zero_cell } else { &cache.cell_states[t - 1] };
            let gate_grads = [
                Matrix::from_fn(self.outputs, 1, |r, _| {
                    cell_grad.at(r, 0) * prev_cell.at(r, 0) * sigmoid_slope(forget.at(r, 0))
                }),
                Matrix::from_fn(self.outputs, 1, |r, _| {
                    cell_grad.at(r, 0) * candidate.at(r, 0) * sigmoid_slope(remember.at(r, 0))
                }),
                Matrix::from_fn(self.outputs, 1, |r, _| {
                    cell_grad.at(r, 0) * remember.at(r, 0) * tanh_slope(candidate.at(r, 0))
                }),
                Matrix::from_fn(self.outputs, 1, |r, _| {
                    hidden_grad.at(r, 0) * tanh_cell.at(r, 0) * sigmoid_slope(output.at(r, 0))
                }),
            ];
            cell_grad.mul_elem(forget);

            let mut passback = Matrix::zeros(self.outputs + self.step_inputs, 1);
            for (k, (gate, grad)) in self.gates().iter().zip(gate_grads.iter()).enumerate() {
                let (shift, pass) = gate.gradients(&cache.inputs[t], grad)?;
                shifts[k] = mem::replace(&mut shifts[k], Shift::Nil).combine(shift)?;
                passback.add(&pass);
            }

            let passback = passback.into_vec();
            hidden_grad = Matrix::column(passback[..self.outputs].to_vec());
            grad_input[t * self.step_inputs..(t + 1) * self.step_inputs]
                .copy_from_slice(&passback[self.outputs..]);
        }

        Ok((Shift::Lstm(Box::new(shifts)), grad_input))
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let outputs = reader.read_u32("lstm outputs")?;
        let interval = reader.read_u32("lstm interval")?;
        let output_sequence = reader.read_u32("lstm output sequence flag")? != 0;
        let gate_len = reader.read_u32("lstm gate length")?;
        let mut layer = LstmLayer::new(outputs, interval, output_sequence);
        for gate in [&mut layer.forget, &mut layer.input, &mut layer.candidate, &mut layer.output].iter_mut() {
            let mut gate_reader = PayloadReader::new(reader.read_bytes(gate_len, "lstm gate")?);
            **gate = LinearLayer::read_payload(&mut gate_reader)?;
            gate_reader.finish("lstm gate")?;
        }
        Ok(layer)
    }

}

impl LayerBase for LstmLayer {

    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()> {
        if self.outputs == 0 {
            return Err(NetError::MissingHyperparameter("LSTM", "outputs"));
        }
        if self.interval == 0 {
            return Err(NetError::MissingHyperparameter("LSTM", "interval"));
        }
        if num_inputs == 0 || num_inputs % self.interval != 0 {
            return Err(NetError::NotDivisible("LSTM inputs".to_string(), num_inputs, self.interval));
        }
        self.inputs = num_inputs;
        self.step_inputs = num_inputs / self.interval;
        let concat = self.outputs + self.step_inputs;
        self.forget.initialize(concat, initializer)?;
        self.input.initialize(concat, initializer)?;
        self.candidate.initialize(concat, initializer)?;
        self.output.initialize(concat, initializer)
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        let mut cache = LstmCache::default();
        let output = self.run(input, Some(&mut cache))?;
        Ok((output, Cache::Lstm(Box::new(cache))))
    }

    fn infer(&self, input: &Matrix) -> NetResult<Matrix> {
        self.run(input, None)
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let cache = match cache {
            Cache::Lstm(cache) => cache,
            other => return Err(cache_mismatch("LSTM", &other)),
        };
        let (shift, grad_input) = self.unroll_backward(&cache, grad_output)?;
        Ok((shift, Matrix::new(cache.input_shape.rows, cache.input_shape.cols, grad_input)))
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            Shift::Lstm(gates) => {
                let [forget, input, candidate, output] = *gates;
                self.forget.apply_shift(forget, &update.offset_by(0))?;
                self.input.apply_shift(input, &update.offset_by(2))?;
                self.candidate.apply_shift(candidate, &update.offset_by(4))?;
                self.output.apply_shift(output, &update.offset_by(6))
            },
            other => Err(shift_mismatch("LSTM", &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        if self.output_sequence {
            self.outputs * self.interval
        } else {
            self.outputs
        }
    }

    fn num_parameter_matrices(&self) -> usize {
        8
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Lstm
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        let gates: Vec<Vec<u8>> = self.gates().iter()
            .map(|gate| {
                let mut bytes = Vec::new();
                gate.write_bytes(&mut bytes);
                bytes
            })
            .collect();
        put_u32(out, self.outputs);
        put_u32(out, self.interval);
        put_u32(out, self.output_sequence as usize);
        put_u32(out, gates[0].len());
        for gate in gates {
            out.extend_from_slice(&gate);
        }
    }

    fn pretty_print(&self) -> String {
        let mut ret = format!("LSTM Layer\n{} Inputs ({} steps of {}) -> {} Outputs\n",
                              self.inputs, self.interval, self.step_inputs, self.num_outputs());
        for (name, gate) in ["Forget", "Input", "Candidate", "Output"].iter().zip(self.gates().iter()) {
            ret += &format!("\n{} Gate:\n{}", name, gate.pretty_print());
        }
        ret
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::test_util::*;

    fn layer(outputs: usize, interval: usize, output_sequence: bool, inputs: usize) -> LstmLayer {
        let mut init = RandomNetInitializer::new_with_seed("lstm");
        let mut layer = LstmLayer::new(outputs, interval, output_sequence);
        layer.initialize(inputs, &mut init).unwrap();
        layer
    }

    fn gate_weights(lstm: &mut LstmLayer, gate: usize) -> &mut Matrix {
        match gate {
            0 => lstm.forget.weights_mut(),
            1 => lstm.input.weights_mut(),
            2 => lstm.candidate.weights_mut(),
            _ => lstm.output.weights_mut(),
        }
    }

    #[test]
    fn test_infer_matches_forward() {
        let lstm = layer(3, 4, true, 8);
        let input = Matrix::column((0..8).map(|i| i as f64 * 0.1).collect());
        let (output, _) = lstm.forward(&input).unwrap();
        assert_eq!(output.rows(), 4);
        assert_eq!(output.cols(), 3);
        assert_eq!(lstm.infer(&input).unwrap(), output);
        // the last row is the final hidden state
        let last = layer(3, 4, false, 8).infer(&input).unwrap();
        assert_eq!(last.as_slice(), output.row(3));
    }

    #[test]
    fn test_gates_are_distinct() {
        let lstm = layer(2, 1, false, 2);
        let weights: Vec<&Matrix> = lstm.gates().iter().map(|g| g.weights()).collect();
        assert_ne!(weights[0], weights[1]);
        assert_ne!(weights[1], weights[2]);
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut init = RandomNetInitializer::new_with_seed("lstm input gradient");
        let input = random_matrix(&mut init, 6, 1);
        check_input_gradient(&layer(2, 3, false, 6), &input, &[0.3, -0.6], 1e-4);
        let target: Vec<f64> = (0..6).map(|i| (i as f64).cos() * 0.5).collect();
        check_input_gradient(&layer(2, 3, true, 6), &input, &target, 1e-4);
    }

    #[test]
    fn test_gate_shifts_match_finite_differences() {
        let mut init = RandomNetInitializer::new_with_seed("lstm weight gradient");
        let mut lstm = layer(2, 3, true, 6);
        let input = random_matrix(&mut init, 6, 1);
        let target: Vec<f64> = (0..6).map(|i| (i as f64 * 0.7).sin() * 0.5).collect();

        let (_, cache) = lstm.forward(&input).unwrap();
        let grad = descent_gradient(&lstm, &input, &target);
        let (shift, _) = lstm.backward(cache, &grad).unwrap();
        let gate_shifts = match shift {
            Shift::Lstm(gates) => gates,
            other => panic!("unexpected {:?}", other),
        };

        let h = 1e-6;
        for k in 0..4 {
            let analytic = match &gate_shifts[k] {
                Shift::Weights { weights, .. } => weights.clone(),
                other => panic!("unexpected {:?}", other),
            };
            for idx in 0..analytic.len() {
                let base = gate_weights(&mut lstm, k).as_slice()[idx];
                gate_weights(&mut lstm, k).as_mut_slice()[idx] = base + h;
                let plus = loss(&lstm, &input, &target);
                gate_weights(&mut lstm, k).as_mut_slice()[idx] = base - h;
                let minus = loss(&lstm, &input, &target);
                gate_weights(&mut lstm, k).as_mut_slice()[idx] = base;
                let numeric = (plus - minus) / (2.0 * h);
                assert!((numeric + analytic.as_slice()[idx]).abs() / numeric.abs().max(1.0) < 1e-4,
                        "gate {} weight {}: numeric {} vs analytic {}", k, idx, numeric, -analytic.as_slice()[idx]);
            }
        }
    }

    #[test]
    fn test_configuration_errors() {
        let mut init = RandomNetInitializer::new_with_seed("lstm errors");
        match LstmLayer::new(0, 2, false).initialize(4, &mut init) {
            Err(NetError::MissingHyperparameter("LSTM", "outputs")) => {},
            other => panic!("unexpected {:?}", other),
        }
        match LstmLayer::new(2, 0, false).initialize(4, &mut init) {
            Err(NetError::MissingHyperparameter("LSTM", "interval")) => {},
            other => panic!("unexpected {:?}", other),
        }
        match LstmLayer::new(2, 3, false).initialize(4, &mut init) {
            Err(NetError::NotDivisible(_, 4, 3)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

}
