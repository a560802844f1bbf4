//! Background scan worker.
//!
//! A scan is a [`ScanProcedure`] run on its own tokio task by [`ScanWorker`].
//! The procedure takes ownership of the instrument sessions it needs for the
//! duration of the scan; [`ScanHandle::join`] hands it (and the sessions) back.
//!
//! The worker talks to the controller only through [`ScanEvent`]s on an
//! unbounded channel, in the order they are produced. The controller talks to
//! the worker only through the [`StopFlag`], which the procedure polls once per
//! scan element. Stopping is therefore never observed mid-command.
//!
//! Whatever way the run ends (completed, stopped, or aborted by a transport
//! error), the worker emits the procedure's accumulated [`Series`] before the
//! task finishes.
//!
//! ```text
//! Idle --spawn--> Running --plan exhausted--> Completed
//!                    |----stop observed-----> Stopped
//!                    '----transport error---> Failed
//! ```

pub mod analyzer;
pub mod compression;
pub mod hires;
pub mod pa;
pub mod peak_search;
pub mod plan;
pub mod reference_level;
pub mod spectrum;

pub use compression::{find_op1db, CompressionPoint, CompressionSearch, OutputPowerProbe};
pub use hires::HiResSnapshot;
pub use pa::{PaCharacterization, PaRecord};
pub use peak_search::PeakSearch;
pub use plan::ScanPlan;
pub use reference_level::{adapt_reference_level, desired_reference_level};
pub use spectrum::SpectrumSweep;

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// One plottable series of accumulated results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    /// Independent variable (frequency, span, power ...)
    pub x: Vec<f64>,
    /// Measured values
    pub y: Vec<f64>,
    /// Consumer should clear previously drawn series before this one
    pub clear: bool,
    /// Legend label
    pub label: Option<String>,
    /// Drawing style hint (color letter)
    pub style: Option<String>,
}

impl Series {
    /// Unlabelled series that replaces whatever was shown before.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            x,
            y,
            clear: true,
            label: None,
            style: None,
        }
    }

    /// Set the legend label and style hint.
    pub fn labelled(mut self, label: impl Into<String>, style: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self.style = Some(style.into());
        self
    }

    /// Draw on top of earlier series instead of replacing them.
    pub fn overlay(mut self) -> Self {
        self.clear = false;
        self
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// True if there are no points.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Notification from a running scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Percent complete, 0 to 100
    Progress(u8),
    /// Accumulated results so far
    Data(Series),
    /// Human-readable status line
    Log(String),
    /// Latest value of a named scalar (gain, OP1dB ...), for readouts
    Metric {
        /// Readout name
        name: String,
        /// Value
        value: f64,
    },
}

/// Lifecycle of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// Not started
    Idle,
    /// Executing the plan
    Running,
    /// Stop was observed before the plan was exhausted
    Stopped,
    /// Plan exhausted
    Completed,
    /// Aborted by an unrecoverable error
    Failed,
}

impl ScanState {
    /// True once the worker has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanState::Stopped | ScanState::Completed | ScanState::Failed
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::Stopped => "stopped",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag.
///
/// The controller calls [`StopFlag::request`]; the worker only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// New, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop after the current element.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Worker-side view of a running scan, handed to [`ScanProcedure::run`].
pub struct ScanContext {
    events: mpsc::UnboundedSender<ScanEvent>,
    stop: StopFlag,
    stop_observed: bool,
    last_progress: Option<u8>,
}

impl ScanContext {
    /// Context emitting into `events` and polling `stop`.
    pub fn new(events: mpsc::UnboundedSender<ScanEvent>, stop: StopFlag) -> Self {
        Self {
            events,
            stop,
            stop_observed: false,
            last_progress: None,
        }
    }

    fn emit(&self, event: ScanEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.events.send(event);
    }

    /// Report `done` of `total` elements complete.
    pub fn progress(&mut self, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            (100 * done.min(total) / total) as u8
        };
        self.last_progress = Some(percent);
        self.emit(ScanEvent::Progress(percent));
    }

    /// Last progress value reported.
    pub fn last_progress(&self) -> Option<u8> {
        self.last_progress
    }

    /// Emit a log line (also written to the tracing log).
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(ScanEvent::Log(message));
    }

    /// Emit accumulated results.
    pub fn data(&self, series: Series) {
        self.emit(ScanEvent::Data(series));
    }

    /// Publish the latest value of a named readout.
    pub fn metric(&self, name: &str, value: f64) {
        self.emit(ScanEvent::Metric {
            name: name.to_string(),
            value,
        });
    }

    /// Poll the stop flag. Call once per scan element.
    pub fn should_stop(&mut self) -> bool {
        if self.stop.is_requested() {
            self.stop_observed = true;
        }
        self.stop_observed
    }

    /// True if [`ScanContext::should_stop`] ever returned `true`.
    pub fn stop_observed(&self) -> bool {
        self.stop_observed
    }

    /// Absorb a non-transport failure of one scan element.
    ///
    /// The failure is logged as `"<what>: <error>"` and `Ok(None)` comes back
    /// so the caller can move on. Transport failures pass through.
    pub fn recover<T>(
        &self,
        result: AppResult<T>,
        what: impl FnOnce() -> String,
    ) -> AppResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if !e.is_transport() => {
                self.log(format!("{}: {}", what(), e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// A measurement sequence run by the [`ScanWorker`].
#[async_trait]
pub trait ScanProcedure: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Execute the scan.
    ///
    /// Poll [`ScanContext::should_stop`] once per element and return `Ok(())`
    /// when it is set. Return `Err` only for unrecoverable failures; the
    /// worker still emits [`ScanProcedure::results`] afterwards.
    async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()>;

    /// Accumulated results, emitted by the worker when the run ends.
    fn results(&self) -> Vec<Series>;

    /// Restore instrument state after the run, whatever its outcome.
    async fn cleanup(&mut self, _ctx: &mut ScanContext) -> AppResult<()> {
        Ok(())
    }
}

/// What a finished worker hands back.
#[derive(Debug)]
pub struct ScanOutcome<P> {
    /// The procedure, including any sessions it owns
    pub procedure: P,
    /// Terminal state
    pub state: ScanState,
    /// The error that aborted the run, for [`ScanState::Failed`]
    pub error: Option<DaqError>,
}

/// Runs a [`ScanProcedure`] on a background task.
pub struct ScanWorker<P> {
    procedure: P,
    stop: StopFlag,
    state: watch::Sender<ScanState>,
}

impl<P: ScanProcedure> ScanWorker<P> {
    /// Prepare a worker; nothing runs until [`ScanWorker::spawn`].
    pub fn new(procedure: P) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            procedure,
            stop: StopFlag::new(),
            state,
        }
    }

    /// Use an externally owned stop flag (e.g. one shared with a Ctrl-C handler).
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Current state (always [`ScanState::Idle`] before spawning).
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Start the scan. Returns the controller handle and the event stream.
    pub fn spawn(self) -> (ScanHandle<P>, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ScanWorker {
            mut procedure,
            stop,
            state,
        } = self;
        let state_rx = state.subscribe();
        state.send_replace(ScanState::Running);

        let mut ctx = ScanContext::new(tx, stop.clone());
        let task = tokio::spawn(async move {
            let name = procedure.name().to_string();
            info!("Scan '{}' started", name);

            let result = procedure.run(&mut ctx).await;
            if let Err(e) = procedure.cleanup(&mut ctx).await {
                error!("Scan '{}' cleanup failed: {}", name, e);
            }
            for series in procedure.results() {
                ctx.data(series);
            }

            let final_state = match &result {
                Err(e) => {
                    ctx.log(format!("{} aborted: {}", name, e));
                    ScanState::Failed
                }
                Ok(()) if ctx.stop_observed() => {
                    ctx.log(format!("{} stopped", name));
                    ScanState::Stopped
                }
                Ok(()) => ScanState::Completed,
            };
            info!("Scan '{}' {}", name, final_state);
            state.send_replace(final_state);

            ScanOutcome {
                procedure,
                state: final_state,
                error: result.err(),
            }
        });

        (
            ScanHandle {
                stop,
                state: state_rx,
                task,
            },
            rx,
        )
    }
}

/// Controller side of a running scan.
pub struct ScanHandle<P> {
    stop: StopFlag,
    state: watch::Receiver<ScanState>,
    task: JoinHandle<ScanOutcome<P>>,
}

impl<P> ScanHandle<P> {
    /// Request cooperative cancellation. Does not block.
    pub fn stop(&self) {
        self.stop.request();
    }

    /// A clone of the worker's stop flag.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Current worker state.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.clone()
    }

    /// True once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit and take back the procedure.
    pub async fn join(self) -> AppResult<ScanOutcome<P>> {
        self.task
            .await
            .map_err(|e| DaqError::Worker(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Counts to `total`, optionally failing at some element.
    struct Counter {
        total: usize,
        fail_at: Option<usize>,
        stop_at: Option<(usize, StopFlag)>,
        xs: Vec<f64>,
    }

    impl Counter {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at: None,
                stop_at: None,
                xs: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ScanProcedure for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()> {
            for i in 0..self.total {
                if self.fail_at == Some(i) {
                    return Err(DaqError::ConnectionClosed("mock".into()));
                }
                self.xs.push(i as f64);
                ctx.progress(i + 1, self.total);
                if let Some((k, flag)) = &self.stop_at {
                    if *k == i + 1 {
                        flag.request();
                    }
                }
                if ctx.should_stop() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            Ok(())
        }

        fn results(&self) -> Vec<Series> {
            vec![Series::new(self.xs.clone(), self.xs.clone())]
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn last_data(events: &[ScanEvent]) -> Option<&Series> {
        events.iter().rev().find_map(|e| match e {
            ScanEvent::Data(s) => Some(s),
            _ => None,
        })
    }

    #[test]
    fn test_progress_scaling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = ScanContext::new(tx, StopFlag::new());
        ctx.progress(1, 3);
        ctx.progress(3, 3);
        ctx.progress(0, 0);
        assert_eq!(rx.try_recv().unwrap(), ScanEvent::Progress(33));
        assert_eq!(rx.try_recv().unwrap(), ScanEvent::Progress(100));
        assert_eq!(rx.try_recv().unwrap(), ScanEvent::Progress(100));
    }

    #[test]
    fn test_recover_absorbs_only_non_transport_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ScanContext::new(tx, StopFlag::new());

        assert_eq!(ctx.recover(Ok(1.5), || "unused".into()).unwrap(), Some(1.5));
        assert!(rx.try_recv().is_err());

        let malformed: AppResult<f64> = Err(DaqError::parse("X?", "junk", "not a number"));
        assert_eq!(ctx.recover(malformed, || "Point 7 skipped".into()).unwrap(), None);
        match rx.try_recv().unwrap() {
            ScanEvent::Log(line) => assert!(line.starts_with("Point 7 skipped: "), "{}", line),
            other => panic!("expected a log line, got {:?}", other),
        }

        let dropped: AppResult<f64> = Err(DaqError::ConnectionClosed("mock".into()));
        assert!(ctx.recover(dropped, || "unused".into()).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completed_scan_emits_final_results() {
        let worker = ScanWorker::new(Counter::new(4));
        assert_eq!(worker.state(), ScanState::Idle);
        let (handle, rx) = worker.spawn();

        let outcome = handle.join().await.unwrap();
        let events = drain(rx).await;

        assert_eq!(outcome.state, ScanState::Completed);
        assert!(outcome.error.is_none());
        assert_eq!(last_data(&events).unwrap().len(), 4);
        assert!(events.contains(&ScanEvent::Progress(100)));
    }

    #[tokio::test]
    async fn test_stop_after_k_elements() {
        let stop = StopFlag::new();
        let mut counter = Counter::new(10);
        counter.stop_at = Some((3, stop.clone()));
        let (handle, rx) = ScanWorker::new(counter).with_stop_flag(stop).spawn();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
        let events = drain(rx).await;

        assert_eq!(outcome.state, ScanState::Stopped);
        assert_eq!(last_data(&events).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_still_emits_partial_results() {
        let mut counter = Counter::new(10);
        counter.fail_at = Some(5);
        let (handle, rx) = ScanWorker::new(counter).spawn();
        let mut state = handle.subscribe();

        let outcome = handle.join().await.unwrap();
        let events = drain(rx).await;

        assert_eq!(outcome.state, ScanState::Failed);
        assert!(matches!(outcome.error, Some(DaqError::ConnectionClosed(_))));
        assert_eq!(last_data(&events).unwrap().len(), 5);
        assert_eq!(*state.borrow_and_update(), ScanState::Failed);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::Log(l) if l.contains("counter aborted"))));
    }
}
