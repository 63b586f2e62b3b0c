use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use crossbeam::channel::{self, RecvTimeoutError};

use crate::{
    data::DataPoint,
    error::{NetError, NetResult},
    layer::Shift,
    net::{NetSnapshot, Network},
    stats::Stats,
};

/// Combined result of one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// One averaged shift per layer.
    pub shifts: Vec<Shift>,
    /// Per-sample losses.
    pub errors: Stats,
}

type SampleResult = (usize, NetResult<(Vec<Shift>, f64)>);

/// Fans the samples of a batch out over worker threads and reduces their shifts.
///
/// Workers own a snapshot of the network's layers and their share of the batch, so `run`
/// can give up on them at the deadline instead of waiting for the sample in flight.
/// Abandoned workers stop before their next sample and their results are dropped.
/// Results are reduced in sample order, so the combined shift does not depend on
/// thread scheduling.
#[derive(Clone, Copy, Debug)]
pub struct BatchExecutor {
    max_workers: usize,
    timeout: Duration,
}

impl BatchExecutor {

    pub fn new(max_workers: usize, timeout: Duration) -> Self {
        BatchExecutor {
            max_workers: max_workers.max(1),
            timeout,
        }
    }

    pub fn for_network(net: &Network) -> Self {
        BatchExecutor::new(net.max_workers(), net.worker_timeout())
    }

    pub fn run(&self, net: &Network, batch: &[&DataPoint]) -> NetResult<BatchOutcome> {
        let n = batch.len();
        if n == 0 {
            return Err(NetError::EmptyDataSet);
        }
        let snapshot = net.snapshot()?;
        let samples: Arc<Vec<DataPoint>> = Arc::new(batch.iter().map(|&point| point.clone()).collect());
        let workers = self.max_workers.min(n);
        let deadline = Instant::now() + self.timeout;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = channel::unbounded::<SampleResult>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let snapshot = snapshot.clone();
            let samples = Arc::clone(&samples);
            let worker_cancelled = Arc::clone(&cancelled);
            let sender = sender.clone();
            let spawned = thread::Builder::new()
                .name(format!("seqnet-worker-{}", worker))
                .spawn(move || work(worker, workers, &snapshot, &samples, &worker_cancelled, &sender));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(err.into());
                },
            }
        }
        drop(sender);
        drop(snapshot);

        let collected = collect(&receiver, n, deadline);
        if collected.is_err() {
            // workers notice before their next sample; nobody waits for them
            cancelled.store(true, Ordering::Relaxed);
        } else {
            // every result is in, so the workers are only releasing their snapshots
            for handle in handles {
                if let Err(panic) = handle.join() {
                    return Err(NetError::WorkerFailed(panic_message(panic)));
                }
            }
        }
        reduce(collected?)
    }

}

fn work(
    worker: usize,
    workers: usize,
    snapshot: &NetSnapshot,
    samples: &[DataPoint],
    cancelled: &AtomicBool,
    sender: &channel::Sender<SampleResult>,
) {
    for index in (worker..samples.len()).step_by(workers) {
        if cancelled.load(Ordering::Relaxed) {
            trace!("worker {} cancelled before sample {}", worker, index);
            return;
        }
        let point = &samples[index];
        let result = panic::catch_unwind(AssertUnwindSafe(|| snapshot.learn(&point.input, &point.output)))
            .unwrap_or_else(|panic| Err(NetError::WorkerFailed(panic_message(panic))));
        if sender.send((index, result)).is_err() {
            return;
        }
    }
}

fn collect(
    receiver: &channel::Receiver<SampleResult>,
    n: usize,
    deadline: Instant,
) -> NetResult<Vec<Option<(Vec<Shift>, f64)>>> {
    let mut results: Vec<Option<(Vec<Shift>, f64)>> = (0..n).map(|_| None).collect();
    let mut received = 0;
    while received < n {
        let now = Instant::now();
        if now >= deadline {
            warn!("batch timed out with {} of {} samples pending", n - received, n);
            return Err(NetError::WorkerTimeout(n - received));
        }
        match receiver.recv_timeout(deadline - now) {
            Ok((index, Ok(result))) => {
                results[index] = Some(result);
                received += 1;
            },
            Ok((index, Err(err))) => {
                debug!("sample {} failed: {}", index, err);
                return Err(err);
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!("batch timed out with {} of {} samples pending", n - received, n);
                return Err(NetError::WorkerTimeout(n - received));
            },
            Err(RecvTimeoutError::Disconnected) => {
                return Err(NetError::WorkerFailed(format!(
                    "workers stopped with {} samples pending", n - received
                )));
            },
        }
    }
    Ok(results)
}

fn reduce(results: Vec<Option<(Vec<Shift>, f64)>>) -> NetResult<BatchOutcome> {
    let n = results.len();
    let mut shifts: Vec<Shift> = Vec::new();
    let mut errors = Stats::new();
    for (index, result) in results.into_iter().enumerate() {
        let (sample_shifts, loss) = result.ok_or_else(|| NetError::WorkerFailed(
            format!("sample {} produced no result", index)
        ))?;
        if shifts.is_empty() {
            shifts = sample_shifts;
        } else {
            for (acc, shift) in shifts.iter_mut().zip(sample_shifts.into_iter()) {
                *acc = mem::replace(acc, Shift::Nil).combine(shift)?;
            }
        }
        errors.report(loss);
    }
    let factor = 1.0 / n as f64;
    for shift in shifts.iter_mut() {
        shift.scale(factor);
    }
    Ok(BatchOutcome { shifts, errors })
}

fn panic_message(panic: Box<dyn Any + Send + 'static>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
