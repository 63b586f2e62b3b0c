use std::time::{Duration, Instant};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{
    data::DataPoint,
    error::{NetError, NetResult},
    func::CompletionFn,
    net::Network,
    stats::{LossReport, Stats},
    train::{compute_error_stats, BatchExecutor},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingResult {
    pub initial: LossReport,
    pub final_report: LossReport,
    pub batches: usize,
    pub epochs: usize,
    pub samples: usize,
    pub duration: Duration,
}

/// Walks the data set in a shuffled order, reshuffling whenever an epoch completes.
struct EpochCursor {
    order: Vec<usize>,
    position: usize,
    epochs: usize,
}

impl EpochCursor {

    fn new<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(rng);
        EpochCursor { order, position: 0, epochs: 0 }
    }

    fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        if self.position == self.order.len() {
            self.position = 0;
            self.epochs += 1;
            self.order.shuffle(rng);
        }
        let index = self.order[self.position];
        self.position += 1;
        index
    }

}

impl Network {

    /// Mini-batch training until `completion` says stop. The batch in flight when the
    /// completion condition is reached always finishes first.
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        dataset: &[DataPoint],
        validation: &[DataPoint],
        completion: CompletionFn,
        rng: &mut R,
    ) -> NetResult<TrainingResult> {
        if !self.is_initialized() {
            return Err(NetError::NotInitialized);
        }
        if dataset.is_empty() {
            return Err(NetError::EmptyDataSet);
        }
        self.check_data(dataset)?;
        self.check_data(validation)?;
        self.prepare_optimizer()?;

        let initial = self.test_on(validation)?;
        info!("training on {} samples, batch size {}; validation: {}",
              dataset.len(), self.batch_size(), initial);

        let executor = BatchExecutor::for_network(self);
        let mut cursor = EpochCursor::new(dataset.len(), rng);
        let mut batch_errors = Stats::new();
        let mut batches = 0;
        let mut samples = 0;
        let mut next_report = 0.1;
        let start = Instant::now();

        while !completion.should_stop_training(batches, start, &batch_errors) {
            let batch: Vec<&DataPoint> = (0..self.batch_size())
                .map(|_| &dataset[cursor.next(rng)])
                .collect();
            let outcome = executor.run(self, &batch)?;
            let learning_rate = self.learning_rate_fn().get_learning_rate(batches);
            self.apply_shifts(outcome.shifts, learning_rate)?;

            batches += 1;
            samples += batch.len();
            batch_errors = outcome.errors;

            let progress = completion.progress(batches, start);
            if progress >= next_report {
                let validation_errors = compute_error_stats(self, validation)?;
                debug!("{:.0}% done: batch {}, epoch {}, batch loss {:.5}, validation loss {:.5}",
                       progress * 100.0, batches, cursor.epochs, batch_errors.mean(),
                       validation_errors.mean());
                while next_report <= progress {
                    next_report += 0.1;
                }
            }
        }

        let final_report = self.test_on(validation)?;
        let duration = start.elapsed();
        info!("trained {} batches ({} epochs) in {:?}; validation: {}",
              batches, cursor.epochs, duration, final_report);

        Ok(TrainingResult {
            initial,
            final_report,
            batches,
            epochs: cursor.epochs,
            samples,
            duration,
        })
    }

}
