//! Progress tracking and callback system for UI integration

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::model::ExportProgress;

/// Progress callback trait for UI integration
pub trait ProgressCallback: Send + Sync {
    /// Called when an export starts
    fn on_start(&self, operation: &str);

    /// Called whenever the percentage or the current task changes
    fn on_progress(&self, progress: &ExportProgress);

    /// Called when the export completes successfully
    fn on_complete(&self, message: Option<String>);

    /// Called when the export fails
    fn on_error(&self, error: &str);

    /// Called when the export is cancelled
    fn on_cancel(&self);

    /// Check if the export should be cancelled
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Snapshot of the tracker, including timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub progress: ExportProgress,
    pub phase: ProgressPhase,
    /// Time elapsed since start
    pub elapsed: Duration,
    /// Estimated time remaining, from the percentage rate so far
    pub eta: Option<Duration>,
}

/// Progress phases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProgressPhase {
    Idle,
    Running,
    Complete,
    Failed,
    Cancelled,
}

/// Progress tracker with thread-safe updates.
///
/// Percentages never decrease between `start` calls; lower reports are
/// clamped to the highest value seen so far.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ProgressTrackerInner>>,
    callbacks: Arc<Mutex<Vec<Arc<dyn ProgressCallback>>>>,
}

struct ProgressTrackerInner {
    progress: ExportProgress,
    phase: ProgressPhase,
    start_time: Instant,
    cancelled: bool,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let inner = ProgressTrackerInner {
            progress: ExportProgress::default(),
            phase: ProgressPhase::Idle,
            start_time: Instant::now(),
            cancelled: false,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a progress callback
    pub fn add_callback(&self, callback: Arc<dyn ProgressCallback>) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// Reset to 0% for a new export
    pub fn start(&self, operation: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.progress = ExportProgress {
                percent: 0,
                current_task: operation.to_string(),
                error: None,
            };
            inner.phase = ProgressPhase::Running;
            inner.start_time = Instant::now();
            inner.cancelled = false;
        }

        self.notify_callbacks(|cb| cb.on_start(operation));
    }

    /// Report a percentage for the current task.
    ///
    /// Observers are only notified when the clamped value or the task label changes.
    pub fn update(&self, percent: u8, task: &str) {
        let snapshot = match self.inner.lock() {
            Ok(mut inner) => {
                let clamped = percent.min(100).max(inner.progress.percent);
                if clamped == inner.progress.percent && inner.progress.current_task == task {
                    None
                } else {
                    inner.progress.percent = clamped;
                    inner.progress.current_task = task.to_string();
                    Some(inner.progress.clone())
                }
            }
            Err(_) => None,
        };

        if let Some(progress) = snapshot {
            self.notify_callbacks(|cb| cb.on_progress(&progress));
        }
    }

    /// Complete the export at 100%
    pub fn complete(&self, message: Option<String>) {
        let snapshot = match self.inner.lock() {
            Ok(mut inner) => {
                let reached = inner.progress.percent == 100;
                inner.progress.percent = 100;
                inner.progress.current_task = "Done".to_string();
                inner.phase = ProgressPhase::Complete;
                (!reached).then(|| inner.progress.clone())
            }
            Err(_) => None,
        };

        if let Some(progress) = snapshot {
            self.notify_callbacks(|cb| cb.on_progress(&progress));
        }
        self.notify_callbacks(|cb| cb.on_complete(message.clone()));
    }

    /// Mark the export as failed, keeping the percentage reached
    pub fn error(&self, error: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.phase = ProgressPhase::Failed;
            inner.progress.error = Some(error.to_string());
        }

        self.notify_callbacks(|cb| cb.on_error(error));
    }

    /// Request cancellation; the export stops at its next suspension point
    pub fn cancel(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.cancelled = true;
        }
    }

    /// Record that the export actually stopped because of a cancellation
    pub fn mark_cancelled(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.phase = ProgressPhase::Cancelled;
            inner.progress.error = Some("Export cancelled".to_string());
        }

        self.notify_callbacks(|cb| cb.on_cancel());
    }

    /// Check if the export should be cancelled
    pub fn is_cancelled(&self) -> bool {
        if let Ok(inner) = self.inner.lock() {
            if inner.cancelled {
                return true;
            }
        }

        if let Ok(callbacks) = self.callbacks.lock() {
            for callback in callbacks.iter() {
                if callback.should_cancel() {
                    return true;
                }
            }
        }

        false
    }

    /// Current progress
    pub fn snapshot(&self) -> ExportProgress {
        self.inner
            .lock()
            .map(|inner| inner.progress.clone())
            .unwrap_or_default()
    }

    /// Current progress with timing information
    pub fn get_info(&self) -> Option<ProgressInfo> {
        self.inner.lock().ok().map(|inner| {
            let elapsed = inner.start_time.elapsed();
            let percent = inner.progress.percent;
            let eta = if percent > 0 && percent < 100 {
                let per_percent = elapsed.as_secs_f64() / percent as f64;
                Some(Duration::from_secs_f64(per_percent * (100 - percent) as f64))
            } else {
                None
            };
            ProgressInfo {
                progress: inner.progress.clone(),
                phase: inner.phase,
                elapsed,
                eta,
            }
        })
    }

    /// Notify all callbacks
    fn notify_callbacks<F>(&self, f: F)
    where
        F: Fn(&dyn ProgressCallback),
    {
        // Clone the list so callbacks may re-enter the tracker
        let callbacks = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => return,
        };
        for callback in callbacks.iter() {
            f(callback.as_ref());
        }
    }
}

/// Adapter turning a plain `Fn(percent)` into a callback
pub struct FnProgressCallback<F>
where
    F: Fn(u8) + Send + Sync,
{
    on_percent: F,
}

impl<F> FnProgressCallback<F>
where
    F: Fn(u8) + Send + Sync,
{
    pub fn new(on_percent: F) -> Self {
        Self { on_percent }
    }
}

impl<F> ProgressCallback for FnProgressCallback<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn on_start(&self, _operation: &str) {
        (self.on_percent)(0);
    }

    fn on_progress(&self, progress: &ExportProgress) {
        (self.on_percent)(progress.percent);
    }

    fn on_complete(&self, _message: Option<String>) {}

    fn on_error(&self, _error: &str) {}

    fn on_cancel(&self) {}
}

/// JSON-lines progress callback for structured output
pub struct JsonProgressCallback {
    writer: Mutex<Box<dyn Write + Send>>,
    output_progress_events: bool,
}

impl JsonProgressCallback {
    /// Events go to stdout
    pub fn new(output_progress_events: bool) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), output_progress_events)
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, output_progress_events: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            output_progress_events,
        }
    }

    fn emit(&self, event: serde_json::Value) {
        if let Ok(mut writer) = self.writer.lock() {
            if let Err(e) = writeln!(writer, "{}", event) {
                tracing::debug!("Dropping progress event: {}", e);
            }
        }
    }
}

impl ProgressCallback for JsonProgressCallback {
    fn on_start(&self, operation: &str) {
        if self.output_progress_events {
            self.emit(serde_json::json!({
                "event": "start",
                "operation": operation,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }));
        }
    }

    fn on_progress(&self, progress: &ExportProgress) {
        if self.output_progress_events {
            self.emit(serde_json::json!({
                "event": "progress",
                "percent": progress.percent,
                "task": progress.current_task,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }));
        }
    }

    fn on_complete(&self, message: Option<String>) {
        self.emit(serde_json::json!({
            "event": "complete",
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_error(&self, error: &str) {
        self.emit(serde_json::json!({
            "event": "error",
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_cancel(&self) {
        self.emit(serde_json::json!({
            "event": "cancel",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }
}

/// No-op progress callback for when progress tracking is disabled
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_start(&self, _operation: &str) {}
    fn on_progress(&self, _progress: &ExportProgress) {}
    fn on_complete(&self, _message: Option<String>) {}
    fn on_error(&self, _error: &str) {}
    fn on_cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestCallback {
        started: AtomicBool,
        percents: Mutex<Vec<u8>>,
        completed: AtomicBool,
        error_called: AtomicBool,
        cancelled: AtomicBool,
        should_cancel_flag: AtomicBool,
    }

    impl TestCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicBool::new(false),
                percents: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
                error_called: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                should_cancel_flag: AtomicBool::new(false),
            })
        }

        fn percents(&self) -> Vec<u8> {
            self.percents.lock().unwrap().clone()
        }
    }

    impl ProgressCallback for TestCallback {
        fn on_start(&self, _operation: &str) {
            self.started.store(true, Ordering::Relaxed);
        }

        fn on_progress(&self, progress: &ExportProgress) {
            self.percents.lock().unwrap().push(progress.percent);
        }

        fn on_complete(&self, _message: Option<String>) {
            self.completed.store(true, Ordering::Relaxed);
        }

        fn on_error(&self, _error: &str) {
            self.error_called.store(true, Ordering::Relaxed);
        }

        fn on_cancel(&self) {
            self.cancelled.store(true, Ordering::Relaxed);
        }

        fn should_cancel(&self) -> bool {
            self.should_cancel_flag.load(Ordering::Relaxed)
        }
    }

    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_progress_tracker_basic_workflow() {
        let tracker = ProgressTracker::new();
        let callback = TestCallback::new();
        tracker.add_callback(callback.clone());

        tracker.start("export");
        assert!(callback.started.load(Ordering::Relaxed));

        tracker.update(40, "Encoding video");
        tracker.complete(Some("success".to_string()));
        assert!(callback.completed.load(Ordering::Relaxed));
        assert_eq!(callback.percents(), vec![40, 100]);

        let info = tracker.get_info().unwrap();
        assert_eq!(info.phase, ProgressPhase::Complete);
        assert_eq!(info.progress.percent, 100);
    }

    #[test]
    fn test_progress_never_decreases() {
        let tracker = ProgressTracker::new();
        let callback = TestCallback::new();
        tracker.add_callback(callback.clone());

        tracker.start("export");
        tracker.update(50, "Encoding video");
        tracker.update(30, "Encoding video");
        tracker.update(50, "Encoding video");
        tracker.update(250, "Encoding video");

        assert_eq!(callback.percents(), vec![50, 100]);
        assert_eq!(tracker.snapshot().percent, 100);
    }

    #[test]
    fn test_start_resets_percentage() {
        let tracker = ProgressTracker::new();
        tracker.start("first");
        tracker.update(90, "Processing audio");
        tracker.start("second");
        assert_eq!(tracker.snapshot().percent, 0);
        assert!(!tracker.is_cancelled());
    }

    #[test]
    fn test_task_change_notifies_without_percent_change() {
        let tracker = ProgressTracker::new();
        let callback = TestCallback::new();
        tracker.add_callback(callback.clone());

        tracker.start("export");
        tracker.update(80, "Encoding video");
        tracker.update(80, "Processing audio");
        assert_eq!(callback.percents(), vec![80, 80]);
        assert_eq!(tracker.snapshot().current_task, "Processing audio");
    }

    #[test]
    fn test_progress_tracker_cancellation() {
        let tracker = ProgressTracker::new();
        let callback = TestCallback::new();
        tracker.add_callback(callback.clone());

        tracker.start("export");
        assert!(!tracker.is_cancelled());

        callback.should_cancel_flag.store(true, Ordering::Relaxed);
        assert!(tracker.is_cancelled());

        tracker.mark_cancelled();
        assert!(callback.cancelled.load(Ordering::Relaxed));
        assert_eq!(tracker.get_info().unwrap().phase, ProgressPhase::Cancelled);
    }

    #[test]
    fn test_cancel_from_clone() {
        let tracker = ProgressTracker::new();
        let handle = tracker.clone();
        handle.cancel();
        assert!(tracker.is_cancelled());
    }

    #[test]
    fn test_progress_tracker_error_handling() {
        let tracker = ProgressTracker::new();
        let callback = TestCallback::new();
        tracker.add_callback(callback.clone());

        tracker.start("export");
        tracker.update(20, "Encoding video");
        tracker.error("something went wrong");

        assert!(callback.error_called.load(Ordering::Relaxed));
        let info = tracker.get_info().unwrap();
        assert_eq!(info.phase, ProgressPhase::Failed);
        assert_eq!(info.progress.percent, 20);
        assert_eq!(info.progress.error.as_deref(), Some("something went wrong"));
    }

    #[test]
    fn test_fn_callback_receives_percentages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new();
        tracker.add_callback(Arc::new(FnProgressCallback::new(move |p| {
            sink.lock().unwrap().push(p)
        })));

        tracker.start("export");
        tracker.update(10, "Encoding video");
        tracker.complete(None);
        assert_eq!(*seen.lock().unwrap(), vec![0, 10, 100]);
    }

    #[test]
    fn test_json_callback_writes_lines() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let callback = JsonProgressCallback::with_writer(Box::new(SharedBuffer(buffer.clone())), true);
        let tracker = ProgressTracker::new();
        tracker.add_callback(Arc::new(callback));

        tracker.start("export");
        tracker.update(42, "Encoding video");

        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let events: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "start");
        assert_eq!(events[1]["percent"], 42);
        assert_eq!(events[1]["task"], "Encoding video");
    }
}
