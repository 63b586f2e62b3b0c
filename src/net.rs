use std::sync::Arc;
use std::time::Duration;

use crate::{
    buffer::Matrix,
    data::DataPoint,
    error::{NetError, NetResult},
    func::{ErrorFn, LearningRateFn},
    initializer::NetInitializer,
    layer::{Cache, Layer, LayerBase, Shift, ShiftUpdate},
    optimizer::{GradientDescent, Optimizer},
    stats::LossReport,
    utils::max_index,
};

/// A stack of layers together with everything needed to train it.
///
/// Built with [`NetworkBuilder`], then given its layers once with `initialize`.
#[derive(Builder, Debug)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct Network {
    #[builder(default = "8")]
    batch_size: usize,
    #[builder(default = "LearningRateFn::Constant(0.05)")]
    learning_rate_fn: LearningRateFn,
    #[builder(default = "Box::new(GradientDescent::new())")]
    optimizer: Box<dyn Optimizer>,
    #[builder(default = "ErrorFn::SquaredError")]
    error_fn: ErrorFn,
    #[builder(default = "Duration::from_secs(60)")]
    worker_timeout: Duration,
    #[builder(default = "num_cpus::get()")]
    max_workers: usize,
    #[builder(setter(skip))]
    input_size: Option<usize>,
    #[builder(setter(skip))]
    layers: Arc<Vec<Layer>>,
    #[builder(setter(skip))]
    slot_offsets: Vec<usize>,
}

impl NetworkBuilder {

    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.batch_size {
            return Err("batch size must be positive".to_string());
        }
        if let Some(0) = self.max_workers {
            return Err("max workers must be positive".to_string());
        }
        if let Some(LearningRateFn::Constant(rate)) = self.learning_rate_fn {
            if !(rate > 0.0) {
                return Err(format!("learning rate must be positive, got {}", rate));
            }
        }
        Ok(())
    }

    /// `build`, with validation failures mapped into the crate error type.
    pub fn build_network(self) -> NetResult<Network> {
        self.build().map_err(NetError::InvalidConfig)
    }

}

#[allow(dead_code)]
impl Network {

    /// Runs shape inference over `layers`, allocates their parameters and assigns every
    /// parameter matrix its optimizer slot.
    pub fn initialize(
        &mut self,
        input_size: usize,
        layers: Vec<Layer>,
        initializer: &mut dyn NetInitializer,
    ) -> NetResult<()> {
        if self.input_size.is_some() {
            return Err(NetError::AlreadyInitialized);
        }
        if input_size == 0 {
            return Err(NetError::InvalidConfig("input size must be positive".to_string()));
        }
        if layers.is_empty() {
            return Err(NetError::InvalidConfig("a network needs at least one layer".to_string()));
        }

        let mut layers = layers;
        if let Some(first) = layers.first_mut() {
            first.mark_first();
        }

        let mut slot_offsets = Vec::with_capacity(layers.len());
        let mut num_inputs = input_size;
        let mut slot = 0;
        for (i, layer) in layers.iter_mut().enumerate() {
            layer.initialize(num_inputs, initializer)?;
            debug!("layer {}: {} {} -> {}", i, layer.kind().name(), num_inputs, layer.num_outputs());
            slot_offsets.push(slot);
            slot += layer.num_parameter_matrices();
            num_inputs = layer.num_outputs();
        }

        info!("initialized network: {} inputs, {} layers, {} outputs, {} parameter matrices",
              input_size, layers.len(), num_inputs, slot);

        self.layers = Arc::new(layers);
        self.slot_offsets = slot_offsets;
        self.input_size = Some(input_size);
        Ok(())
    }

    fn require_input_size(&self) -> NetResult<usize> {
        self.input_size.ok_or(NetError::NotInitialized)
    }

    fn check_input(&self, input: &[f64]) -> NetResult<()> {
        let expected = self.require_input_size()?;
        if input.len() != expected {
            return Err(NetError::InputSize(expected, input.len()));
        }
        Ok(())
    }

    /// Checks every sample against the network's input and output sizes.
    pub fn check_data(&self, data: &[DataPoint]) -> NetResult<()> {
        let output_size = self.output_size();
        for point in data {
            self.check_input(&point.input)?;
            if point.output.len() != output_size {
                return Err(NetError::TargetSize(output_size, point.output.len()));
            }
        }
        Ok(())
    }

    /// Output of the network for `input`. Leaves every layer untouched.
    pub fn evaluate(&self, input: &[f64]) -> NetResult<Vec<f64>> {
        self.check_input(input)?;
        let mut signal = Matrix::column(input.to_vec());
        for layer in self.layers.iter() {
            signal = layer.infer(&signal)?;
        }
        Ok(signal.into_vec())
    }

    /// One forward and backward pass over a single sample. Returns a shift per layer and
    /// the sample's loss.
    pub fn learn(&self, input: &[f64], target: &[f64]) -> NetResult<(Vec<Shift>, f64)> {
        self.check_input(input)?;
        learn_sample(&self.layers, self.error_fn, input, target)
    }

    /// Shares the current layers with code that may outlive this borrow, such as batch
    /// workers that are abandoned at a timeout.
    pub fn snapshot(&self) -> NetResult<NetSnapshot> {
        Ok(NetSnapshot {
            input_size: self.require_input_size()?,
            error_fn: self.error_fn,
            layers: Arc::clone(&self.layers),
        })
    }

    /// Initializes the optimizer for this network's slots if needed.
    pub fn prepare_optimizer(&mut self) -> NetResult<()> {
        let slots = self.parameter_slot_count();
        if !self.optimizer.is_initialized() {
            self.optimizer.initialize(slots);
        } else if self.optimizer.size() != slots {
            return Err(NetError::InvalidConfig(format!(
                "optimizer holds {} slots, network has {} parameter matrices",
                self.optimizer.size(), slots
            )));
        }
        Ok(())
    }

    /// Applies one shift per layer, each rescaled by the optimizer and multiplied by
    /// `learning_rate`.
    pub fn apply_shifts(&mut self, shifts: Vec<Shift>, learning_rate: f64) -> NetResult<()> {
        self.require_input_size()?;
        if shifts.len() != self.layers.len() {
            return Err(NetError::ShiftMismatch(format!(
                "{} shifts for {} layers", shifts.len(), self.layers.len()
            )));
        }
        self.prepare_optimizer()?;
        let optimizer = self.optimizer.as_ref();
        // copies the layers only while a snapshot from an abandoned batch is still alive
        let layers = Arc::make_mut(&mut self.layers);
        for ((layer, shift), &offset) in layers.iter_mut()
            .zip(shifts.into_iter())
            .zip(self.slot_offsets.iter())
        {
            layer.apply_shift(shift, &ShiftUpdate::new(optimizer, offset, learning_rate))?;
        }
        Ok(())
    }

    /// Summed loss and argmax accuracy over `data`.
    pub fn test_on(&self, data: &[DataPoint]) -> NetResult<LossReport> {
        let mut report = LossReport { loss: 0.0, correct: 0, total: 0 };
        for point in data {
            let output = self.evaluate(&point.input)?;
            if output.len() != point.output.len() {
                return Err(NetError::TargetSize(output.len(), point.output.len()));
            }
            report.loss += self.error_fn.sample_error(&point.output, &output);
            if max_index(&output) == max_index(&point.output) {
                report.correct += 1;
            }
            report.total += 1;
        }
        Ok(report)
    }

    /// Samples whose argmax output disagrees with their target.
    pub fn get_errors<'a>(&self, data: &'a [DataPoint]) -> NetResult<Vec<&'a DataPoint>> {
        let mut errors = Vec::new();
        for point in data {
            let output = self.evaluate(&point.input)?;
            if max_index(&output) != max_index(&point.output) {
                errors.push(point);
            }
        }
        Ok(errors)
    }

    pub fn pretty_print(&self) -> String {
        let mut out = format!("Network: {} inputs, {} outputs\n",
                              self.input_size.unwrap_or(0), self.output_size());
        for (i, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!("\n--- layer {} ---\n", i));
            out.push_str(&layer.pretty_print());
        }
        out
    }

    pub fn is_initialized(&self) -> bool {
        self.input_size.is_some()
    }

    pub fn input_size(&self) -> usize {
        self.input_size.unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(LayerBase::num_outputs).unwrap_or(0)
    }

    pub fn layers(&self) -> &[Layer] {
        self.layers.as_slice()
    }

    /// Total number of optimizer slots, one per parameter matrix.
    pub fn parameter_slot_count(&self) -> usize {
        self.layers.iter().map(LayerBase::num_parameter_matrices).sum()
    }

    pub fn slot_offsets(&self) -> &[usize] {
        &self.slot_offsets
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learning_rate_fn(&self) -> LearningRateFn {
        self.learning_rate_fn
    }

    pub fn error_fn(&self) -> ErrorFn {
        self.error_fn
    }

    pub fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }

}

/// Read-only handle on a network's layers, detached from the network's lifetime.
#[derive(Clone, Debug)]
pub struct NetSnapshot {
    input_size: usize,
    error_fn: ErrorFn,
    layers: Arc<Vec<Layer>>,
}

impl NetSnapshot {

    /// Same as `Network::learn` on the layers this snapshot was taken from.
    pub fn learn(&self, input: &[f64], target: &[f64]) -> NetResult<(Vec<Shift>, f64)> {
        if input.len() != self.input_size {
            return Err(NetError::InputSize(self.input_size, input.len()));
        }
        learn_sample(&self.layers, self.error_fn, input, target)
    }

}

fn learn_sample(
    layers: &[Layer],
    error_fn: ErrorFn,
    input: &[f64],
    target: &[f64],
) -> NetResult<(Vec<Shift>, f64)> {
    let mut caches: Vec<Cache> = Vec::with_capacity(layers.len());
    let mut signal = Matrix::column(input.to_vec());
    for layer in layers {
        let (output, cache) = layer.forward(&signal)?;
        caches.push(cache);
        signal = output;
    }

    if target.len() != signal.len() {
        return Err(NetError::TargetSize(signal.len(), target.len()));
    }

    let loss = error_fn.sample_error(target, signal.as_slice());
    let mut grad = Matrix::new(signal.rows(), signal.cols(), error_fn.descent(target, signal.as_slice()));

    let mut shifts = Vec::with_capacity(layers.len());
    for (layer, cache) in layers.iter().zip(caches.into_iter()).rev() {
        let (shift, grad_input) = layer.backward(cache, &grad)?;
        shifts.push(shift);
        grad = grad_input;
    }
    shifts.reverse();
    Ok((shifts, loss))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::LinearLayer;
    use crate::optimizer::Momentum;

    fn identity_net() -> Network {
        let mut net = NetworkBuilder::default().build_network().unwrap();
        let identity = LinearLayer::with_parameters(
            Matrix::new(2, 2, vec![1., 0., 0., 1.]),
            Matrix::zeros(2, 1),
        );
        let mut init = RandomNetInitializer::new_with_seed("identity net");
        net.initialize(2, vec![Layer::Linear(identity)], &mut init).unwrap();
        net
    }

    #[test]
    fn test_builder_defaults() {
        let net = NetworkBuilder::default().build_network().unwrap();
        assert_eq!(net.batch_size(), 8);
        assert_eq!(net.learning_rate_fn(), LearningRateFn::Constant(0.05));
        assert_eq!(net.error_fn(), ErrorFn::SquaredError);
        assert_eq!(net.worker_timeout(), Duration::from_secs(60));
        assert!(net.max_workers() >= 1);
        assert!(!net.is_initialized());
    }

    #[test]
    fn test_builder_validation() {
        match NetworkBuilder::default().batch_size(0).build_network() {
            Err(NetError::InvalidConfig(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(NetworkBuilder::default().max_workers(0).build().is_err());
        assert!(NetworkBuilder::default()
            .learning_rate_fn(LearningRateFn::Constant(-1.0))
            .build()
            .is_err());
    }

    #[test]
    fn test_initialize_twice() {
        let mut net = identity_net();
        let mut init = RandomNetInitializer::new_with_seed("twice");
        match net.initialize(2, vec![Layer::linear(2)], &mut init) {
            Err(NetError::AlreadyInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_initialized() {
        let mut net = NetworkBuilder::default().build_network().unwrap();
        match net.evaluate(&[1.0]) {
            Err(NetError::NotInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
        match net.learn(&[1.0], &[1.0]) {
            Err(NetError::NotInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
        match net.apply_shifts(vec![], 0.1) {
            Err(NetError::NotInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_initialize_propagates_layer_errors() {
        let mut net = NetworkBuilder::default().build_network().unwrap();
        let mut init = RandomNetInitializer::new_with_seed("errors");
        match net.initialize(4, vec![Layer::linear(3), Layer::lstm(2, 2, false)], &mut init) {
            Err(NetError::NotDivisible(..)) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(!net.is_initialized());
    }

    #[test]
    fn test_slot_offsets_follow_layer_order() {
        let mut net = NetworkBuilder::default().build_network().unwrap();
        let mut init = RandomNetInitializer::new_with_seed("slots");
        net.initialize(4, vec![
            Layer::linear(6),
            Layer::relu(),
            Layer::batch_norm(),
            Layer::lstm(2, 3, false),
            Layer::linear(2),
        ], &mut init).unwrap();
        assert_eq!(net.slot_offsets(), &[0, 2, 2, 4, 12]);
        assert_eq!(net.parameter_slot_count(), 14);
        assert_eq!(net.output_size(), 2);
    }

    #[test]
    fn test_evaluate_and_learn() {
        let net = identity_net();
        assert_eq!(net.evaluate(&[3., 4.]).unwrap(), vec![3., 4.]);
        match net.evaluate(&[3.]) {
            Err(NetError::InputSize(2, 1)) => {},
            other => panic!("unexpected {:?}", other),
        }

        let (shifts, loss) = net.learn(&[3., 4.], &[4., 5.]).unwrap();
        assert_eq!(loss, 1.0);
        assert_eq!(shifts.len(), 1);
        match &shifts[0] {
            Shift::Weights { weights, biases } => {
                assert_eq!(weights.as_slice(), &[3., 4., 3., 4.]);
                assert_eq!(biases.as_slice(), &[1., 1.]);
            },
            other => panic!("unexpected {:?}", other),
        }
        match net.learn(&[3., 4.], &[1.]) {
            Err(NetError::TargetSize(2, 1)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_apply_shifts_moves_toward_target() {
        let mut net = identity_net();
        let (shifts, before) = net.learn(&[3., 4.], &[4., 5.]).unwrap();
        net.apply_shifts(shifts, 0.01).unwrap();
        let (_, after) = net.learn(&[3., 4.], &[4., 5.]).unwrap();
        assert!(after < before);
        assert!(net.optimizer().is_initialized());
        assert_eq!(net.optimizer().size(), 2);

        match net.apply_shifts(vec![Shift::Nil, Shift::Nil], 0.01) {
            Err(NetError::ShiftMismatch(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_keeps_layers_it_was_taken_from() {
        let mut net = identity_net();
        let snapshot = net.snapshot().unwrap();
        assert_eq!(snapshot.learn(&[3., 4.], &[4., 5.]).unwrap(), net.learn(&[3., 4.], &[4., 5.]).unwrap());

        let (shifts, _) = net.learn(&[3., 4.], &[4., 5.]).unwrap();
        net.apply_shifts(shifts, 0.01).unwrap();
        let (_, stale_loss) = snapshot.learn(&[3., 4.], &[4., 5.]).unwrap();
        let (_, loss) = net.learn(&[3., 4.], &[4., 5.]).unwrap();
        assert_eq!(stale_loss, 1.0);
        assert!(loss < stale_loss);

        match snapshot.learn(&[3.], &[4., 5.]) {
            Err(NetError::InputSize(2, 1)) => {},
            other => panic!("unexpected {:?}", other),
        }
        match NetworkBuilder::default().build_network().unwrap().snapshot() {
            Err(NetError::NotInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_optimizer_size_mismatch() {
        let mut optimizer = Momentum::new(0.9);
        optimizer.initialize(5);
        let mut net = NetworkBuilder::default()
            .optimizer(Box::new(optimizer))
            .build_network()
            .unwrap();
        let mut init = RandomNetInitializer::new_with_seed("mismatch");
        net.initialize(2, vec![Layer::linear(2)], &mut init).unwrap();
        match net.prepare_optimizer() {
            Err(NetError::InvalidConfig(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_report_and_errors() {
        let net = identity_net();
        let data = vec![
            DataPoint::new(vec![1., 0.], vec![1., 0.]),
            DataPoint::new(vec![0., 2.], vec![0., 1.]),
            DataPoint::new(vec![3., 1.], vec![0., 1.]),
        ];
        let report = net.test_on(&data).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.correct, 2);
        assert!((report.loss - (0.0 + 0.5 + 4.5)).abs() < 1e-12);

        let errors = net.get_errors(&data).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].input, vec![3., 1.]);
    }

    #[test]
    fn test_pretty_print_lists_layers() {
        let text = identity_net().pretty_print();
        assert!(text.starts_with("Network: 2 inputs, 2 outputs"));
        assert!(text.contains("Linear Layer"));
    }

}
