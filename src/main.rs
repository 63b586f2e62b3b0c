use std::env;
use std::error::Error;
use std::time::Duration;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use seqnet::{
    data,
    func::{CompletionFn, LearningRateFn},
    initializer::RandomNetInitializer,
    optimizer::Adam,
    save,
    Layer,
    NetworkBuilder,
};

/// Trains a small classifier on three interleaved spirals. An optional argument names a
/// file to save the trained network to.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut rng = XorShiftRng::seed_from_u64(0x5eed);
    let mut training = data::spiral(200, 3, &mut rng);
    data::normalize_inputs(&mut training);
    let validation = training.iter().step_by(5).cloned().collect::<Vec<_>>();

    let mut net = NetworkBuilder::default()
        .batch_size(16)
        .learning_rate_fn(LearningRateFn::Constant(0.01))
        .optimizer(Box::new(Adam::default()))
        .build_network()?;

    let mut initializer = RandomNetInitializer::new_with_seed("spiral");
    net.initialize(2, vec![
        Layer::linear(32),
        Layer::relu(),
        Layer::linear(32),
        Layer::tanh(),
        Layer::linear(3),
        Layer::softmax(),
    ], &mut initializer)?;

    let completion = CompletionFn::stop_after_duration(Duration::from_secs(15))
        .with_max_batches(20_000);
    let result = net.train(&training, &validation, completion, &mut rng)?;

    println!("initial: {}", result.initial);
    println!("final:   {}", result.final_report);
    println!("{} batches, {} epochs, {} samples in {:.2}s",
             result.batches, result.epochs, result.samples, result.duration.as_secs_f64());

    if let Some(path) = env::args().nth(1) {
        save::save(&net, &path)?;
        println!("saved to {}", path);
    }

    Ok(())
}
