//! Flywheel: continues recent audio past a starvation point
//!
//! Each channel of the training audio is fitted with a Burg linear
//! predictor and run forward. The prediction is only ever played under a
//! fade to silence, so it needs to be plausible rather than exact. Jobs run
//! on a worker thread and are submitted while audio is still playing; the
//! real-time side only ever takes a result that is already there.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Burg's method: prediction coefficients for `order` taps
///
/// `x[t]` is predicted as `sum(coeffs[k] * x[t - 1 - k])`. Returns fewer
/// taps than asked for when the input is too short, and all zeros for a
/// silent input.
pub fn burg_coefficients(samples: &[f64], order: usize) -> Vec<f64> {
    let n = samples.len();
    let order = order.min(n.saturating_sub(1));
    let mut coeffs = vec![0.0; order];
    if order == 0 {
        return coeffs;
    }

    let mut forward: Vec<f64> = samples[..n - 1].to_vec();
    let mut backward: Vec<f64> = samples[1..].to_vec();
    let mut previous = vec![0.0; order];

    for k in 0..order {
        let len = n - k - 1;
        let mut num = 0.0;
        let mut den = 0.0;
        for j in 0..len {
            num += forward[j] * backward[j];
            den += forward[j] * forward[j] + backward[j] * backward[j];
        }
        if den <= f64::EPSILON {
            break;
        }
        coeffs[k] = 2.0 * num / den;
        for i in 0..k {
            coeffs[i] = previous[i] - coeffs[k] * previous[k - 1 - i];
        }
        if k + 1 == order {
            break;
        }
        previous[..=k].copy_from_slice(&coeffs[..=k]);
        for j in 0..len - 1 {
            forward[j] -= previous[k] * backward[j];
            backward[j] = backward[j + 1] - previous[k] * forward[j + 1];
        }
    }
    coeffs
}

/// Run the predictor forward `count` samples past the end of `history`
pub fn extrapolate(history: &[f64], coeffs: &[f64], count: usize) -> Vec<f64> {
    let mut window: Vec<f64> = history.to_vec();
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let predicted: f64 = coeffs
            .iter()
            .enumerate()
            .map(|(k, c)| {
                window
                    .len()
                    .checked_sub(k + 1)
                    .map(|i| c * window[i])
                    .unwrap_or(0.0)
            })
            .sum::<f64>()
            .clamp(-1.0, 1.0);
        window.push(predicted);
        out.push(predicted);
    }
    out
}

/// Continue interleaved `training` audio by `frames` frames
pub fn generate(training: &[f32], channels: usize, order: usize, frames: usize) -> Vec<f32> {
    if channels == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0f32; frames * channels];
    for channel in 0..channels {
        let history: Vec<f64> = training
            .iter()
            .skip(channel)
            .step_by(channels)
            .map(|&s| s as f64)
            .collect();
        let coeffs = burg_coefficients(&history, order);
        let predicted = extrapolate(&history, &coeffs, frames);
        for (frame, value) in predicted.into_iter().enumerate() {
            out[frame * channels + channel] = value as f32;
        }
    }
    out
}

pub(crate) struct FlywheelJob {
    pub generation: u64,
    pub training: Vec<f32>,
    pub channels: usize,
    pub frames: usize,
}

struct FlywheelOutput {
    generation: u64,
    samples: Vec<f32>,
}

pub(crate) struct FlywheelWorker {
    jobs: Option<Sender<FlywheelJob>>,
    results: Receiver<FlywheelOutput>,
    ready: Option<FlywheelOutput>,
    thread: Option<JoinHandle<()>>,
}

impl FlywheelWorker {
    pub(crate) fn spawn(order: usize) -> io::Result<Self> {
        let (job_tx, job_rx) = bounded::<FlywheelJob>(2);
        let (result_tx, result_rx) = bounded::<FlywheelOutput>(2);
        let thread = thread::Builder::new()
            .name("flywheel".to_string())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    // only the newest queued job still matches the audio
                    let job = job_rx.try_iter().last().unwrap_or(job);
                    let started = Instant::now();
                    let samples = generate(&job.training, job.channels, order, job.frames);
                    trace!(
                        "Flywheel: job {} produced {} frames in {:?}",
                        job.generation,
                        job.frames,
                        started.elapsed()
                    );
                    let output = FlywheelOutput {
                        generation: job.generation,
                        samples,
                    };
                    if let Err(TrySendError::Full(output)) = result_tx.try_send(output) {
                        debug!("Flywheel: result {} dropped, nobody collecting", output.generation);
                    }
                }
                debug!("Flywheel: worker exiting");
            })?;
        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            ready: None,
            thread: Some(thread),
        })
    }

    /// Queue a job without blocking; `false` if the worker is backed up
    pub(crate) fn submit(&mut self, job: FlywheelJob) -> bool {
        // results of earlier jobs are stale by now
        self.ready = None;
        while self.results.try_recv().is_ok() {}
        match &self.jobs {
            Some(jobs) => match jobs.try_send(job) {
                Ok(()) => true,
                Err(TrySendError::Full(job)) => {
                    trace!("Flywheel: worker busy, job {} not queued", job.generation);
                    false
                }
                Err(TrySendError::Disconnected(job)) => {
                    warn!("Flywheel: worker gone, job {} not queued", job.generation);
                    false
                }
            },
            None => false,
        }
    }

    fn poll(&mut self) {
        while let Ok(output) = self.results.try_recv() {
            if let Some(ready) = &self.ready {
                if ready.generation > output.generation {
                    continue;
                }
            }
            self.ready = Some(output);
        }
    }

    /// Whether the result of `generation` has arrived
    pub(crate) fn is_ready(&mut self, generation: u64) -> bool {
        self.poll();
        matches!(&self.ready, Some(ready) if ready.generation == generation)
    }

    /// Take the result of `generation` if the worker has finished it
    pub(crate) fn try_take(&mut self, generation: u64) -> Option<Vec<f32>> {
        if !self.is_ready(generation) {
            if let Some(ready) = &self.ready {
                trace!("Flywheel: ignoring stale result {}", ready.generation);
            }
            return None;
        }
        self.ready.take().map(|output| output.samples)
    }
}

impl Drop for FlywheelWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
