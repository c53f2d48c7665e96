//! Carries out a reviewed [`RemovalPlan`].
//!
//! One action runs at a time, in plan order. Each action either runs in this
//! process through [`LocalWorker`] or, when its target is not writable here,
//! is forwarded to an elevated [`Worker`] (normally the `slimmac helper`
//! child process). Failures are recorded per action and the run continues;
//! only problems establishing the run are fatal.

pub mod helper;
pub mod progress;
pub mod report;
pub mod thin;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::config::{Config, DeleteMode};
use crate::common::errors::FatalSetupError;
use crate::common::{permissions, safety};
use crate::planner::{RemovalAction, RemovalPlan};
use crate::scanner::targets::CandidateKind;

pub use helper::HelperProcess;
pub use progress::{CancelToken, NoProgress, ProgressEvent, ProgressSink};
pub use report::RunLog;
pub use worker::{LocalWorker, TrashTarget, Worker, WorkerError, WorkerErrorCode, WorkerOp};

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// The run could not be established; no action was attempted
    Failed,
}

/// What happened to one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded { bytes: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

impl ActionOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        ActionOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// A skipped or failed item, listed in the summary with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDetail {
    pub path: PathBuf,
    pub kind: CandidateKind,
    pub tags: String,
    pub outcome: ActionOutcome,
}

/// Totals of one execution. Plan vetoes are counted as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub bytes_reclaimed: u64,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Actions never attempted because the run was cancelled
    pub not_started: usize,
    pub details: Vec<SummaryDetail>,
}

impl ExecutionSummary {
    fn new(plan: &RemovalPlan) -> Self {
        let details: Vec<SummaryDetail> = plan
            .vetoes
            .iter()
            .map(|veto| SummaryDetail {
                path: veto.path.clone(),
                kind: veto.kind,
                tags: veto.tag.clone(),
                outcome: ActionOutcome::skipped(veto.reason.to_string()),
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Idle,
            bytes_reclaimed: 0,
            succeeded: 0,
            skipped: details.len(),
            failed: 0,
            not_started: 0,
            details,
        }
    }

    fn record(&mut self, action: &RemovalAction, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Succeeded { bytes } => {
                self.succeeded += 1;
                self.bytes_reclaimed += bytes;
                return;
            }
            ActionOutcome::Skipped { .. } => self.skipped += 1,
            ActionOutcome::Failed { .. } => self.failed += 1,
        }
        self.details.push(SummaryDetail {
            path: action.path().to_path_buf(),
            kind: action.kind(),
            tags: action.tags(),
            outcome: outcome.clone(),
        });
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// How destructive actions are carried out
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub delete_mode: DeleteMode,
    pub trash_dir: PathBuf,
    /// argv of the elevated helper; `None` means never elevate
    pub helper_command: Option<Vec<String>>,
    /// Strip debug symbols from every binary after thinning it
    pub strip: bool,
    /// Strip tool used by this process; the helper always uses its own default
    pub strip_command: Vec<String>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            delete_mode: DeleteMode::Delete,
            trash_dir: Config::trash_dir(),
            helper_command: None,
            strip: false,
            strip_command: thin::default_strip_command(),
        }
    }
}

impl ExecutorOptions {
    /// `elevate` enables the helper, using the configured command or the default one
    pub fn from_config(config: &Config, elevate: bool) -> Self {
        Self {
            delete_mode: config.delete_mode,
            trash_dir: Config::trash_dir(),
            helper_command: elevate.then(|| {
                config
                    .helper_command
                    .clone()
                    .unwrap_or_else(helper::default_command)
            }),
            strip: config.strip_debug_symbols,
            strip_command: thin::default_strip_command(),
        }
    }
}

pub struct Executor {
    options: ExecutorOptions,
    state: RunState,
    local: LocalWorker,
    elevated: Option<Box<dyn Worker>>,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        let local = LocalWorker::with_strip_command(options.strip_command.clone());
        Self {
            options,
            state: RunState::Idle,
            local,
            elevated: None,
        }
    }

    /// Use `worker` for targets this process cannot write, instead of
    /// launching the helper command
    pub fn with_elevated_worker(mut self, worker: Box<dyn Worker>) -> Self {
        self.elevated = Some(worker);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Establish the elevated worker if any action of `plan` needs it, and
    /// create the Trash when the run moves things there.
    ///
    /// Nothing destructive happens here; an error means the whole run must
    /// be abandoned.
    pub fn prepare(&mut self, plan: &RemovalPlan) -> Result<(), FatalSetupError> {
        if self.options.delete_mode == DeleteMode::Trash && !self.options.trash_dir.exists() {
            // Created as the invoking user; workers only ever accept an existing one
            if let Err(e) = std::fs::create_dir_all(&self.options.trash_dir) {
                warn!(path = %self.options.trash_dir.display(), error = %e, "could not create trash directory");
            }
        }

        if self.elevated.is_some() {
            return Ok(());
        }
        let Some(command) = self.options.helper_command.as_ref() else {
            return Ok(());
        };
        if !plan.actions.iter().any(|a| !permissions::can_write(a.path())) {
            return Ok(());
        }

        info!(command = %command.join(" "), "starting privileged helper");
        match HelperProcess::spawn(command) {
            Ok(helper) => {
                self.elevated = Some(Box::new(helper));
                Ok(())
            }
            Err(e) => {
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    /// Establish the run, then execute every action of `plan`
    pub fn run(
        &mut self,
        plan: &RemovalPlan,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ExecutionSummary, FatalSetupError> {
        self.prepare(plan)?;
        Ok(self.execute(plan, sink, cancel))
    }

    /// Execute every action of `plan` in order, reporting each outcome to `sink`.
    ///
    /// The cancel token is checked before each action; once it is set the
    /// remaining actions are counted as not started.
    pub fn execute(
        &mut self,
        plan: &RemovalPlan,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary::new(plan);
        let total = plan.actions.len();
        self.state = RunState::Running;
        info!(run_id = %summary.run_id, actions = total, mode = %self.options.delete_mode, "run started");

        for (index, action) in plan.actions.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.not_started = total - index;
                self.state = RunState::Cancelled;
                break;
            }

            let outcome = self.perform(action);
            match &outcome {
                ActionOutcome::Succeeded { bytes } => {
                    debug!(path = %action.path().display(), bytes, "action succeeded")
                }
                ActionOutcome::Skipped { reason } => {
                    debug!(path = %action.path().display(), %reason, "action skipped")
                }
                ActionOutcome::Failed { reason } => {
                    warn!(path = %action.path().display(), %reason, "action failed")
                }
            }

            summary.record(action, &outcome);
            sink.emit(ProgressEvent {
                action_index: index,
                total,
                path: action.path().to_path_buf(),
                outcome,
            });
        }

        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }
        summary.state = self.state;
        info!(
            run_id = %summary.run_id,
            state = ?summary.state,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            not_started = summary.not_started,
            bytes = summary.bytes_reclaimed,
            "run finished"
        );
        summary
    }

    fn perform(&mut self, action: &RemovalAction) -> ActionOutcome {
        let path = action.path();
        if safety::is_protected(path) {
            return ActionOutcome::skipped("protected path");
        }
        match std::fs::symlink_metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ActionOutcome::skipped("no longer exists")
            }
            Err(e) => {
                return ActionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }

        let op = self.op_for(action);
        let result = if permissions::can_write(path) {
            debug!(path = %path.display(), "dispatching locally");
            match self.local.perform(&op) {
                Err(e) if e.code == WorkerErrorCode::PermissionDenied && self.elevated.is_some() => {
                    debug!(path = %path.display(), "retrying through privileged helper");
                    self.perform_elevated(&op, path)
                }
                other => other,
            }
        } else {
            debug!(path = %path.display(), "dispatching to privileged helper");
            self.perform_elevated(&op, path)
        };

        match result {
            Ok(bytes) => ActionOutcome::Succeeded { bytes },
            Err(e) if e.code.is_skip() => ActionOutcome::skipped(e.to_string()),
            Err(e) => ActionOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    fn perform_elevated(&mut self, op: &WorkerOp, path: &std::path::Path) -> Result<u64, WorkerError> {
        match self.elevated.as_mut() {
            Some(worker) => worker.perform(op),
            None => Err(WorkerError::new(
                WorkerErrorCode::PermissionDenied,
                permissions::permission_hint(path),
            )),
        }
    }

    fn op_for(&self, action: &RemovalAction) -> WorkerOp {
        match action {
            RemovalAction::DeleteDirectory { candidate } => WorkerOp::Delete {
                path: candidate.path.clone(),
                trash: match self.options.delete_mode {
                    DeleteMode::Trash => {
                        Some(TrashTarget::for_current_user(self.options.trash_dir.clone()))
                    }
                    DeleteMode::Delete => None,
                },
            },
            RemovalAction::ThinBinary { binary, remove, .. } => WorkerOp::Thin {
                path: binary.clone(),
                slices: remove.iter().filter_map(|c| c.slice).collect(),
                strip: self.options.strip,
            },
        }
    }
}

/// A plan executing on its own thread
pub struct ExecutionHandle {
    pub events: crossbeam_channel::Receiver<ProgressEvent>,
    pub cancel: CancelToken,
    pub join: JoinHandle<Result<ExecutionSummary, FatalSetupError>>,
}

impl ExecutionHandle {
    /// Ask the run to stop before its next action
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish. A panic on the executor thread resumes
    /// on the caller's.
    pub fn wait(self) -> Result<ExecutionSummary, FatalSetupError> {
        match self.join.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Run `plan` with `executor` on a background thread
pub fn spawn(mut executor: Executor, plan: RemovalPlan) -> ExecutionHandle {
    let (tx, events) = progress::channel();
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let join = std::thread::spawn(move || executor.run(&plan, &tx, &token));
    ExecutionHandle {
        events,
        cancel,
        join,
    }
}
