//! Run controller - the top-level coordinator of a share download run
//!
//! This owns the only shared mutable state of the engine:
//! - the current run and its counters
//! - the request registry
//! - the run's timers
//!
//! Everything lives behind one mutex that is never held across an await.
//! Requests are spawned and registered while it is held, so a response
//! handler always finds its own registration unless it was cancelled.

use crate::engine::poller::PollContext;
use crate::engine::registry::{RequestId, RequestRegistry, Selector};
use crate::engine::timers::TimerService;
use crate::error::ShareError;
use crate::transport::{Transport, TransportResponse};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use shareget_types::{Endpoint, RunEvent, RunSnapshot, RunStatus, Settings};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called once with the run directory when every expected file has arrived
pub type CompletionHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Timing and retry knobs of a run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub idle_abort: Duration,
    pub tick_interval: Duration,
    /// Retries allowed per file after its first attempt
    pub max_retries: u32,
    /// Largest manifest `total` a run will fan out
    pub max_files: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            idle_abort: Duration::from_secs(4),
            tick_interval: Duration::from_secs(1),
            max_retries: 4,
            max_files: 10_000,
        }
    }
}

impl From<&Settings> for RunConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            idle_abort: Duration::from_secs(settings.idle_abort_secs),
            tick_interval: Duration::from_millis(settings.tick_interval_ms.max(1)),
            max_retries: settings.max_retries,
            max_files: settings.max_files.max(1),
        }
    }
}

/// Terminal result of one file index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileOutcome {
    Saved,
    Abandoned,
    Failed,
}

/// One execution of the orchestrator
#[derive(Debug)]
pub(crate) struct Run {
    pub(crate) id: Uuid,
    pub(crate) directory: PathBuf,
    pub(crate) status: RunStatus,
    pub(crate) endpoint: Option<Endpoint>,
    pub(crate) expected: Option<u32>,
    pub(crate) received: u32,
    pub(crate) abandoned: u32,
    pub(crate) failed: u32,
    started_at: DateTime<Utc>,
}

impl Run {
    fn new(directory: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            directory,
            status: RunStatus::Discovering,
            endpoint: None,
            expected: None,
            received: 0,
            abandoned: 0,
            failed: 0,
            started_at: Utc::now(),
        }
    }

    /// Whether the run with `id` is the live one
    pub(crate) fn is_live(&self, id: Uuid) -> bool {
        self.id == id && self.status.is_active()
    }

    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            directory: self.directory.clone(),
            status: self.status,
            endpoint: self.endpoint.clone(),
            expected: self.expected,
            received: self.received,
            abandoned: self.abandoned,
            failed: self.failed,
            started_at: self.started_at,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub(crate) run: Option<Run>,
    pub(crate) registry: RequestRegistry,
    pub(crate) timers: TimerService,
    endpoints: Vec<Endpoint>,
    next_request: RequestId,
}

impl RunState {
    /// Cancel all requests and stop both timers
    pub(crate) fn shut_down(&mut self) {
        let cancelled = self.registry.cancel(&Selector::All, false);
        if cancelled > 0 {
            debug!("Cancelled {} in-flight request(s)", cancelled);
        }
        self.timers.stop_all();
    }
}

/// State shared between the controller handle and every request task
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: RunConfig,
    pub(crate) state: Mutex<RunState>,
    event_tx: broadcast::Sender<RunEvent>,
    completion_hook: RwLock<Option<CompletionHook>>,
}

impl Shared {
    pub(crate) fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Spawn a GET for `url` owned by `endpoint` and register it.
    ///
    /// Must be called with the state lock held (`state` is the guarded value);
    /// the handler runs after the lock is released.
    pub(crate) fn issue<F, Fut>(
        self: &Arc<Self>,
        state: &mut RunState,
        endpoint: &Endpoint,
        url: &str,
        on_response: F,
    ) -> RequestId
    where
        F: FnOnce(Arc<Shared>, RequestId, Result<TransportResponse, ShareError>) -> Fut
            + Send
            + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        state.next_request += 1;
        let id = state.next_request;

        let request = self.transport.get(url);
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = request.await;
            on_response(shared, id, result).await;
        });

        state.registry.register(endpoint, id, task.abort_handle());
        id
    }

    /// Account for a terminal file outcome of run `run_id`.
    ///
    /// Returns the run directory when this outcome completed the run, so the
    /// caller can invoke the completion hook after releasing the lock.
    pub(crate) fn record_outcome(
        &self,
        state: &mut RunState,
        run_id: Uuid,
        outcome: FileOutcome,
    ) -> Option<PathBuf> {
        let run = state.run.as_mut().filter(|run| run.is_live(run_id))?;
        let expected = run.expected?;

        match outcome {
            FileOutcome::Saved if run.received < expected => run.received += 1,
            FileOutcome::Saved => {}
            FileOutcome::Abandoned => run.abandoned += 1,
            FileOutcome::Failed => run.failed += 1,
        }

        if run.received == expected {
            run.status = RunStatus::Completed;
            let directory = run.directory.clone();
            info!(
                "Run {} complete: {}/{} file(s) in {}",
                run.id,
                run.received,
                expected,
                directory.display()
            );
            self.emit(RunEvent::Completed {
                run_id: run.id,
                directory: directory.clone(),
                received: run.received,
            });
            state.shut_down();
            return Some(directory);
        }

        if run.received + run.abandoned + run.failed >= expected {
            run.status = RunStatus::Incomplete;
            warn!(
                "Run {} finished short: {}/{} file(s) ({} abandoned, {} failed)",
                run.id, run.received, expected, run.abandoned, run.failed
            );
            self.emit(RunEvent::Incomplete {
                run_id: run.id,
                directory: run.directory.clone(),
                received: run.received,
                expected,
            });
            state.shut_down();
            return None;
        }

        if outcome == FileOutcome::Saved {
            self.emit(RunEvent::Progress {
                received: run.received,
                expected,
            });
        }
        None
    }

    pub(crate) fn notify_completion(&self, directory: &Path) {
        let hook = self.completion_hook.read().clone();
        if let Some(hook) = hook {
            hook(directory);
        }
    }

    fn on_idle_abort(&self, run_id: Uuid, token: &CancellationToken) {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        let Some(run) = state.run.as_mut().filter(|run| run.is_live(run_id)) else {
            return;
        };

        run.status = RunStatus::TimedOut;
        warn!(
            "Run {} aborted: no manifest within {:?}",
            run_id, self.config.idle_abort
        );
        state.shut_down();
        self.emit(RunEvent::TimedOut { run_id });
    }

    fn on_tick(&self, run_id: Uuid, elapsed_secs: u64, token: &CancellationToken) {
        let state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        if state.run.as_ref().is_some_and(|run| run.is_live(run_id)) {
            self.emit(RunEvent::Tick { elapsed_secs });
        }
    }
}

/// Handle to the run orchestrator. Cloning shares the same state.
#[derive(Clone)]
pub struct RunController {
    shared: Arc<Shared>,
}

impl RunController {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: RunConfig,
        event_tx: broadcast::Sender<RunEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state: Mutex::new(RunState::default()),
                event_tx,
                completion_hook: RwLock::new(None),
            }),
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn set_completion_hook(&self, hook: CompletionHook) {
        *self.shared.completion_hook.write() = Some(hook);
    }

    /// Replace the candidate endpoints used by the next run
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        self.shared.state.lock().endpoints = endpoints;
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.state.lock().endpoints.clone()
    }

    /// Start a new run writing into `directory`.
    ///
    /// Any previous run is cancelled first. Fails without touching the
    /// previous run when no endpoint is configured or the directory cannot
    /// be created.
    pub async fn start_run(&self, directory: impl AsRef<Path>) -> Result<Uuid, ShareError> {
        if self.shared.state.lock().endpoints.is_empty() {
            return Err(ShareError::NoEndpoints);
        }

        let directory = prepare_directory(directory.as_ref()).await?;

        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.endpoints.is_empty() {
            return Err(ShareError::NoEndpoints);
        }

        self.cancel_locked(&mut state);

        let run = Run::new(directory.clone());
        let run_id = run.id;
        state.run = Some(run);
        info!(
            "Starting run {} into {} with {} endpoint(s)",
            run_id,
            directory.display(),
            state.endpoints.len()
        );

        let weak: Weak<Shared> = Arc::downgrade(shared);
        state.timers.arm_idle(shared.config.idle_abort, move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.on_idle_abort(run_id, token);
            }
        });

        let weak: Weak<Shared> = Arc::downgrade(shared);
        state
            .timers
            .start_tick(shared.config.tick_interval, move |elapsed, token| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tick(run_id, elapsed, token);
                }
            });

        let endpoints = state.endpoints.clone();
        shared.emit(RunEvent::RunStarted {
            run_id,
            directory: directory.clone(),
            endpoints: endpoints.clone(),
        });

        for endpoint in endpoints {
            shared.poll(
                &mut state,
                PollContext {
                    run_id,
                    endpoint,
                    directory: directory.clone(),
                },
            );
        }

        Ok(run_id)
    }

    /// Cancel the current run. Safe to call at any time, any number of times.
    pub fn cancel_run(&self) {
        let mut state = self.shared.state.lock();
        self.cancel_locked(&mut state);
    }

    fn cancel_locked(&self, state: &mut RunState) {
        state.shut_down();
        if let Some(run) = state.run.as_mut().filter(|run| run.status.is_active()) {
            run.status = RunStatus::Cancelled;
            info!("Run {} cancelled", run.id);
            self.shared.emit(RunEvent::Cancelled { run_id: run.id });
        }
    }

    /// State of the current (or last) run
    pub fn snapshot(&self) -> Option<RunSnapshot> {
        self.shared.state.lock().run.as_ref().map(Run::snapshot)
    }

    /// Number of registered in-flight requests
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().registry.in_flight()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

async fn prepare_directory(directory: &Path) -> Result<PathBuf, ShareError> {
    let wrap = |source| ShareError::Directory {
        path: directory.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(directory).await.map_err(wrap)?;
    tokio::fs::canonicalize(directory).await.map_err(wrap)
}
