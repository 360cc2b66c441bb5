use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::StreamError;
use crate::request::Waker;
use crate::telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
use crate::types::{Result, duration_to_us};

/// Unit of work executed on a pool thread.
pub trait WorkerTask: Send + 'static {
    type Output: Send + 'static;

    /// Task kind reported to worker telemetry.
    const KIND: &'static str;

    /// Identifies the task in the output produced if `run` panics.
    fn token(&self) -> usize;

    fn run(self, worker_id: usize) -> Self::Output;

    /// Output reported in place of a task that panicked.
    fn panicked(token: usize) -> Self::Output;

    fn succeeded(output: &Self::Output) -> bool;
}

struct WorkerPoolState {
    telemetry: Arc<dyn WorkerTelemetry>,
    started_at: Instant,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    task_counts: Vec<AtomicUsize>,
    worker_started_offsets_us: Vec<AtomicU64>,
    worker_stopped_offsets_us: Vec<AtomicU64>,
    worker_busy_us: Vec<AtomicU64>,
}

impl WorkerPoolState {
    fn new(telemetry: Arc<dyn WorkerTelemetry>, num_workers: usize) -> Self {
        Self {
            telemetry,
            started_at: Instant::now(),
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            task_counts: (0..num_workers).map(|_| AtomicUsize::new(0)).collect(),
            worker_started_offsets_us: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
            worker_stopped_offsets_us: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
            worker_busy_us: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn offset_us(&self) -> u64 {
        duration_to_us(self.started_at.elapsed())
    }
}

/// Per-worker runtime metrics captured by the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerRuntimeSnapshot {
    pub worker_id: usize,
    pub tasks_completed: usize,
    pub uptime: Duration,
    pub busy: Duration,
    pub idle: Duration,
    pub utilization: f64,
}

/// Runtime metrics snapshot for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolRuntimeSnapshot {
    pub elapsed: Duration,
    pub submitted: usize,
    pub completed: usize,
    pub pending: usize,
    pub workers: Vec<WorkerRuntimeSnapshot>,
}

/// Fixed set of threads running [`WorkerTask`]s.
///
/// Results come back through a channel drained with [`WorkerPool::try_recv`];
/// every result is followed by a wake of the scheduling thread. Dropping the
/// pool closes the task queue, lets queued tasks finish and joins the threads.
pub struct WorkerPool<T: WorkerTask> {
    state: Arc<WorkerPoolState>,
    tasks_tx: Option<Sender<T>>,
    results_rx: Receiver<T::Output>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl<T: WorkerTask> WorkerPool<T> {
    /// Spawns `num_workers` threads using the default worker telemetry.
    pub fn spawn(num_workers: usize, waker: Waker) -> Result<Self> {
        Self::with_telemetry(num_workers, waker, Arc::new(DefaultWorkerTelemetry))
    }

    pub fn with_telemetry(
        num_workers: usize,
        waker: Waker,
        telemetry: Arc<dyn WorkerTelemetry>,
    ) -> Result<Self> {
        let workers = num_workers.max(1);
        let (tasks_tx, tasks_rx) = unbounded::<T>();
        let (results_tx, results_rx) = unbounded();
        let state = Arc::new(WorkerPoolState::new(telemetry, workers));

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let worker_state = Arc::clone(&state);
            let worker_tasks = tasks_rx.clone();
            let worker_results = results_tx.clone();
            let worker_waker = waker.clone();
            let handle = thread::Builder::new()
                .name(format!("pakstream-{}-{worker_id}", T::KIND))
                .spawn(move || {
                    run_worker_loop(
                        worker_id,
                        worker_state,
                        worker_tasks,
                        worker_results,
                        worker_waker,
                    );
                })
                .map_err(|err| StreamError::from(err).with_context("spawning worker thread"))?;
            worker_handles.push(handle);
        }

        Ok(Self {
            state,
            tasks_tx: Some(tasks_tx),
            results_rx,
            worker_handles,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.state.task_counts.len()
    }

    pub fn submit(&self, task: T) -> Result<()> {
        let sender = self.tasks_tx.as_ref().ok_or(StreamError::InvalidConfig(
            "worker pool is shutting down; no new work accepted",
        ))?;
        self.state.submitted.fetch_add(1, Ordering::AcqRel);
        sender.send(task).map_err(|_| {
            self.state.submitted.fetch_sub(1, Ordering::AcqRel);
            StreamError::InvalidConfig("worker pool has no live workers")
        })
    }

    /// Returns one finished task output, if any is ready.
    pub fn try_recv(&self) -> Option<T::Output> {
        match self.results_rx.try_recv() {
            Ok(output) => Some(output),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.state.submitted.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.submitted_count()
            .saturating_sub(self.completed_count())
    }

    /// Per-worker processed task counts.
    pub fn worker_task_counts(&self) -> Vec<usize> {
        self.state
            .task_counts
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect()
    }

    pub fn runtime_snapshot(&self) -> PoolRuntimeSnapshot {
        let elapsed = self.state.started_at.elapsed();
        let elapsed_us = duration_to_us(elapsed);
        let submitted = self.submitted_count();
        let completed = self.completed_count();

        let workers = (0..self.num_workers())
            .map(|worker_id| {
                let started_raw =
                    self.state.worker_started_offsets_us[worker_id].load(Ordering::Acquire);
                let stopped_raw =
                    self.state.worker_stopped_offsets_us[worker_id].load(Ordering::Acquire);
                let busy_us_raw = self.state.worker_busy_us[worker_id].load(Ordering::Acquire);

                // Offsets are stored +1 so zero means "not yet".
                let start_us = started_raw.saturating_sub(1);
                let stop_us = if stopped_raw == 0 {
                    elapsed_us
                } else {
                    stopped_raw.saturating_sub(1)
                };
                let uptime_us = if started_raw == 0 {
                    0
                } else {
                    stop_us.saturating_sub(start_us)
                };
                let busy_us = busy_us_raw.min(uptime_us);
                let utilization = if uptime_us == 0 {
                    0.0
                } else {
                    busy_us as f64 / uptime_us as f64
                };

                WorkerRuntimeSnapshot {
                    worker_id,
                    tasks_completed: self.state.task_counts[worker_id].load(Ordering::Acquire),
                    uptime: Duration::from_micros(uptime_us),
                    busy: Duration::from_micros(busy_us),
                    idle: Duration::from_micros(uptime_us.saturating_sub(busy_us)),
                    utilization,
                }
            })
            .collect();

        PoolRuntimeSnapshot {
            elapsed,
            submitted,
            completed,
            pending: submitted.saturating_sub(completed),
            workers,
        }
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub fn shutdown(&mut self) {
        self.tasks_tx = None;
    }

    fn join_workers(&mut self) -> std::result::Result<(), String> {
        let mut first_error = None;
        for handle in self.worker_handles.drain(..) {
            if let Err(payload) = handle.join() {
                let details = if let Some(message) = payload.downcast_ref::<&str>() {
                    (*message).to_string()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                first_error.get_or_insert(format!("worker thread panicked: {details}"));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<T: WorkerTask> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
        if let Err(error) = self.join_workers() {
            tracing::error!(target: crate::telemetry::tags::PROFILE_WORKER, %error, "worker pool shut down uncleanly");
        }
    }
}

fn run_worker_loop<T: WorkerTask>(
    worker_id: usize,
    state: Arc<WorkerPoolState>,
    tasks_rx: Receiver<T>,
    results_tx: Sender<T::Output>,
    waker: Waker,
) {
    state.worker_started_offsets_us[worker_id]
        .store(state.offset_us().saturating_add(1), Ordering::Release);

    // Ends once every sender is gone and the queue is drained.
    while let Ok(task) = tasks_rx.recv() {
        state.telemetry.on_task_started(worker_id, T::KIND);
        let token = task.token();
        let started_at = Instant::now();

        let output = match catch_unwind(AssertUnwindSafe(|| task.run(worker_id))) {
            Ok(output) => output,
            Err(_) => {
                tracing::error!(
                    target: crate::telemetry::tags::PROFILE_WORKER,
                    worker_id,
                    token,
                    "worker task panicked"
                );
                T::panicked(token)
            }
        };

        let elapsed = started_at.elapsed();
        state.worker_busy_us[worker_id].fetch_add(duration_to_us(elapsed), Ordering::AcqRel);
        if T::succeeded(&output) {
            state.telemetry.on_task_finished(worker_id, T::KIND, elapsed);
        } else {
            state.telemetry.on_task_failed(worker_id, T::KIND, elapsed);
        }
        state.completed.fetch_add(1, Ordering::AcqRel);
        state.task_counts[worker_id].fetch_add(1, Ordering::AcqRel);

        if results_tx.send(output).is_err() {
            break;
        }
        waker.wake();
    }

    state.worker_stopped_offsets_us[worker_id]
        .store(state.offset_us().saturating_add(1), Ordering::Release);
}
