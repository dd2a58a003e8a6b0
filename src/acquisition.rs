//! External acquisition collaborator.
//!
//! The bench can record a second data source (thermocouple DAQ, flow counter)
//! while each brew runs. That source is opaque here: it only has to run until
//! its [`StopSignal`] is raised. It runs on a blocking worker thread next to the
//! async brew session and is joined with a bounded wait.

use crate::error::{AppResult, BenchError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cooperative stop flag shared between the runner and one worker
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// A lowered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to finish
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the worker has been asked to finish
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Data source recorded alongside each brew.
///
/// `run` is called on a blocking thread and must return soon after `stop` is raised.
pub trait Acquisition: Send + 'static {
    /// Short name used in log fields
    fn name(&self) -> &str;

    /// Re-zero a counter-based source
    fn zero(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Record until `stop` is raised
    fn run(&mut self, stop: &StopSignal) -> AppResult<()>;
}

type WorkerResult = (Box<dyn Acquisition>, AppResult<()>);

/// A running acquisition
pub struct AcquisitionWorker {
    name: String,
    stop: StopSignal,
    handle: JoinHandle<WorkerResult>,
}

impl AcquisitionWorker {
    /// Start `acquisition` on a blocking worker with a fresh stop signal
    pub fn start(mut acquisition: Box<dyn Acquisition>) -> Self {
        let name = acquisition.name().to_string();
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        debug!(acquisition = %name, "Starting acquisition worker");
        let handle = tokio::task::spawn_blocking(move || {
            let result = acquisition.run(&worker_stop);
            (acquisition, result)
        });
        Self { name, stop, handle }
    }

    /// Handle on the worker's stop signal
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Raise the stop signal and wait up to `timeout` for the worker.
    ///
    /// Returns the acquisition for reuse. A worker that does not finish in time
    /// is left detached and reported as [`BenchError::AcquisitionStalled`].
    pub async fn stop_and_join(self, timeout: Duration) -> AppResult<Box<dyn Acquisition>> {
        self.stop.raise();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok((acquisition, result))) => {
                if let Err(err) = result {
                    warn!(acquisition = %self.name, error = %err, "Acquisition reported an error");
                }
                info!(acquisition = %self.name, "Acquisition stopped");
                Ok(acquisition)
            }
            Ok(Err(join_err)) => Err(BenchError::Acquisition(format!(
                "{} worker failed: {}",
                self.name, join_err
            ))),
            Err(_) => {
                warn!(acquisition = %self.name, ?timeout, "Acquisition ignored stop signal");
                Err(BenchError::AcquisitionStalled(timeout))
            }
        }
    }
}
