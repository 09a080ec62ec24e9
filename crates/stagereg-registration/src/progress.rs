//! Progress tracking and callbacks for registration stages.
//!
//! Every optimizing stage reports through a [`ProgressTracker`]; callers attach
//! callbacks to log, record or inspect the optimizer trajectory.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Progress information for one optimizer iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage the iteration belongs to.
    pub stage: String,
    /// Current iteration number.
    pub iteration: usize,
    /// Iteration cap (if known).
    pub total_iterations: Option<usize>,
    /// Metric value at the current parameters.
    pub value: f64,
    /// Time elapsed since the stage started.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Current optimizer step length.
    pub step_length: f64,
}

impl ProgressInfo {
    pub fn new(
        stage: impl Into<String>,
        iteration: usize,
        total_iterations: Option<usize>,
        value: f64,
        elapsed: Duration,
        step_length: f64,
    ) -> Self {
        Self {
            stage: stage.into(),
            iteration,
            total_iterations,
            value,
            elapsed,
            estimated_remaining: None,
            step_length,
        }
    }

    /// Calculate progress percentage.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_iterations
            .filter(|&total| total > 0)
            .map(|total| (self.iteration as f64 / total as f64) * 100.0)
    }

    /// Estimate remaining time from the mean iteration time so far.
    pub fn calculate_remaining(&mut self) {
        if let Some(total) = self.total_iterations {
            if self.iteration > 0 {
                let avg_time_per_iter = self.elapsed.as_secs_f64() / self.iteration as f64;
                let remaining_iters = total.saturating_sub(self.iteration);
                self.estimated_remaining = Some(Duration::from_secs_f64(avg_time_per_iter * remaining_iters as f64));
            }
        }
    }
}

/// Progress callback trait for monitoring registration stages.
pub trait ProgressCallback: Send + Sync {
    /// Called at each iteration with progress information.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when a stage starts.
    fn on_start(&self, _stage: &str) {}

    /// Called when a stage finishes.
    fn on_complete(&self, _info: &ProgressInfo) {}

    /// Called when a stage fails.
    fn on_error(&self, _error: &str) {}
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log interval (iterations).
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 50 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "{} iter {}/{} ({:.1}%) | metric: {:.6} | step: {:.2e} | elapsed: {:.2}s | ETA: {}",
                info.stage,
                info.iteration,
                info.total_iterations.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
                info.progress_percent().unwrap_or(0.0),
                info.value,
                info.step_length,
                info.elapsed.as_secs_f64(),
                remaining
            );
        }
    }

    fn on_start(&self, stage: &str) {
        tracing::info!("{} optimization started", stage);
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "{} optimization finished in {:.2}s with metric {:.6}",
            info.stage,
            info.elapsed.as_secs_f64(),
            info.value
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration stage failed: {}", error);
    }
}

/// Records every iteration it sees.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }

    /// Iterations recorded for one stage.
    pub fn stage_history(&self, stage: &str) -> Vec<ProgressInfo> {
        lock(&self.history).iter().filter(|i| i.stage == stage).cloned().collect()
    }

    /// Reported stage failures.
    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }

    pub fn clear(&self) {
        lock(&self.history).clear();
        lock(&self.errors).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }

    fn on_error(&self, error: &str) {
        lock(&self.errors).push(error.to_string());
    }
}

/// Progress tracker that fans out to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    state: Arc<Mutex<Option<(String, Instant)>>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    /// Builder form of [`ProgressTracker::add_callback`].
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.add_callback(callback);
        self
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn current(&self) -> (String, Duration) {
        match lock(&self.state).as_ref() {
            Some((stage, started)) => (stage.clone(), started.elapsed()),
            None => (String::new(), Duration::ZERO),
        }
    }

    /// Start tracking a stage.
    pub fn start(&self, stage: &str) {
        *lock(&self.state) = Some((stage.to_string(), Instant::now()));
        for callback in &self.callbacks {
            callback.on_start(stage);
        }
    }

    /// Report one iteration.
    pub fn update(&self, iteration: usize, total_iterations: Option<usize>, value: f64, step_length: f64) {
        if self.callbacks.is_empty() {
            return;
        }
        let (stage, elapsed) = self.current();
        let mut info = ProgressInfo::new(stage, iteration, total_iterations, value, elapsed, step_length);
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Report the end of the current stage.
    pub fn complete(&self, final_value: f64, step_length: f64) {
        let (stage, elapsed) = self.current();
        let info = ProgressInfo::new(stage, 0, None, final_value, elapsed, step_length);
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    /// Report a stage failure.
    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}
