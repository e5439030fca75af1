use std::fmt;
use std::sync::Arc;
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::display::compression_ratio;
use crate::engine::{Plan, ProgressListener, TranscodeEngine};
use crate::error::ConvertError;
use crate::media::{MediaProbe, SourceFile};
use crate::settings::{ConversionSettings, EngineOptions, OutputFormat};

/// Output of a successful conversion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    #[serde(skip)]
    pub buffer: Bytes,
    pub original_size: u64,
    pub converted_size: u64,
    pub filename: String,
}

impl ConversionResult {
    /// Size saved relative to the source, in percent (negative when larger)
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.original_size, self.converted_size)
    }
}

/// Lifecycle of the single-file job slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running { job_id: Uuid },
    Completed,
    Failed { message: String },
    Cancelled,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => f.write_str("idle"),
            JobState::Running { job_id } => write!(f, "running ({})", job_id),
            JobState::Completed => f.write_str("completed"),
            JobState::Failed { message } => write!(f, "failed: {}", message),
            JobState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Exactly one of these ends every call to [`ConversionJobController::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(ConversionResult),
    Cancelled,
    Failed(ConvertError),
}

/// Handle for the conversion currently owning the engine. Set at run start,
/// cleared at every conclusion.
pub(crate) struct ActiveJob {
    pub id: Uuid,
    pub cancel: CancellationToken,
    pub plan: Option<Plan>,
}

impl ActiveJob {
    pub fn new(id: Uuid, cancel: CancellationToken) -> Self {
        Self { id, cancel, plan: None }
    }

    fn is_live(&self, job_id: Uuid) -> bool {
        self.id == job_id && !self.cancel.is_cancelled()
    }
}

/// Record the plan on the handle so a later cancel can reach the engine.
/// Returns false when the slot no longer belongs to `job_id`.
pub(crate) fn attach_plan(slot: &Mutex<Option<ActiveJob>>, job_id: Uuid, plan: &Plan) -> bool {
    match slot.lock().as_mut() {
        Some(active) if active.id == job_id => {
            active.plan = Some(plan.clone());
            true
        }
        _ => false,
    }
}

/// Run `f` only while `job_id` still owns the slot and has not been
/// cancelled. The slot lock is held for the duration of `f`.
pub(crate) fn while_live(slot: &Mutex<Option<ActiveJob>>, job_id: Uuid, f: impl FnOnce()) {
    let guard = slot.lock();
    if guard.as_ref().is_some_and(|active| active.is_live(job_id)) {
        f();
    }
}

/// Fraction in `[0, 1]` to a whole percentage
pub(crate) fn to_percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Ask the engine for a plan and refuse to go further if nothing survives
pub(crate) async fn prepare_plan(
    engine: &dyn TranscodeEngine,
    source: &SourceFile,
    format: OutputFormat,
    options: &EngineOptions,
) -> Result<Plan, ConvertError> {
    let plan = engine
        .build_plan(source, format, options)
        .await
        .map_err(|e| ConvertError::Execution(format!("{:#}", e)))?;

    if !plan.is_valid() {
        return Err(ConvertError::PlanInvalid(plan.describe_discarded()));
    }

    if !plan.discarded.is_empty() {
        warn!("⚠️  {}: dropping {}", source.name, plan.describe_discarded());
    }

    Ok(plan)
}

/// Run a validated plan and package the output
pub(crate) async fn execute_plan(
    engine: &dyn TranscodeEngine,
    plan: &Plan,
    on_progress: ProgressListener<'_>,
) -> Result<ConversionResult, ConvertError> {
    let buffer = engine
        .run(plan, on_progress)
        .await
        .map_err(|e| ConvertError::Execution(format!("{:#}", e)))?;

    Ok(ConversionResult {
        original_size: plan.source.size,
        converted_size: buffer.len() as u64,
        buffer: Bytes::from(buffer),
        filename: plan.format.output_filename(&plan.source.name),
    })
}

/// Releases the job slot when a run future is dropped before it concludes
struct RunGuard<'a> {
    controller: &'a ConversionJobController,
    job_id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.controller.abandon(self.job_id);
    }
}

/// Drives one full conversion at a time, with progress and cancellation
pub struct ConversionJobController {
    engine: Arc<dyn TranscodeEngine>,
    bitrate_ceiling: u64,
    active: Mutex<Option<ActiveJob>>,
    state: watch::Sender<JobState>,
    progress: watch::Sender<u8>,
}

impl ConversionJobController {
    pub fn new(engine: Arc<dyn TranscodeEngine>, bitrate_ceiling: u64) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        let (progress, _) = watch::channel(0);
        Self {
            engine,
            bitrate_ceiling,
            active: Mutex::new(None),
            state,
            progress,
        }
    }

    /// Convert `source` with `settings`. Settings are taken as already
    /// normalized against `probe`.
    pub async fn run(
        &self,
        source: &SourceFile,
        probe: &MediaProbe,
        settings: &ConversionSettings,
    ) -> JobOutcome {
        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut slot = self.active.lock();
            if slot.is_some() {
                return JobOutcome::Failed(ConvertError::Busy);
            }
            *slot = Some(ActiveJob::new(job_id, cancel.clone()));
        }
        let _guard = RunGuard { controller: self, job_id };

        self.progress.send_replace(0);
        self.state.send_replace(JobState::Running { job_id });
        info!("🎬 Job {} started: {} → {} (quality {})",
              job_id, source.name, settings.format, settings.quality);

        let options = settings.engine_options(probe.duration_secs, self.bitrate_ceiling);
        let work = async {
            let plan = prepare_plan(self.engine.as_ref(), source, settings.format, &options).await?;
            if !attach_plan(&self.active, job_id, &plan) {
                self.engine.cancel(&plan);
            }
            debug!("Job {} running plan {}", job_id, plan.id);

            let on_progress = |fraction: f64| self.report_progress(job_id, fraction);
            execute_plan(self.engine.as_ref(), &plan, &on_progress).await
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = work => Some(result),
        };

        self.finish(job_id, result)
    }

    fn finish(
        &self,
        job_id: Uuid,
        result: Option<Result<ConversionResult, ConvertError>>,
    ) -> JobOutcome {
        let owned = {
            let mut slot = self.active.lock();
            if slot.as_ref().is_some_and(|active| active.id == job_id) {
                *slot = None;
                true
            } else {
                false
            }
        };

        // cancel() already released the slot and published the state
        let result = match result {
            Some(result) if owned => result,
            _ => return JobOutcome::Cancelled,
        };

        match result {
            Ok(result) => {
                self.progress.send_replace(100);
                self.state.send_replace(JobState::Completed);
                info!("✅ Job {} completed: {} ({} → {} bytes)",
                      job_id, result.filename, result.original_size, result.converted_size);
                JobOutcome::Completed(result)
            }
            Err(e) => {
                warn!("❌ Job {} failed: {}", job_id, e);
                self.state.send_replace(JobState::Failed { message: e.to_string() });
                JobOutcome::Failed(e)
            }
        }
    }

    /// Clean up after a run that was dropped mid-flight. No-op once the run
    /// has concluded or been cancelled.
    fn abandon(&self, job_id: Uuid) {
        let taken = {
            let mut slot = self.active.lock();
            if slot.as_ref().is_some_and(|active| active.id == job_id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(active) = taken else {
            return;
        };

        active.cancel.cancel();
        self.progress.send_replace(0);
        self.state.send_replace(JobState::Cancelled);
        warn!("⏹️  Job {} dropped before it finished", job_id);
    }

    /// Progress updates only move forward and are dropped once the job is
    /// no longer the live one.
    fn report_progress(&self, job_id: Uuid, fraction: f64) {
        let percent = to_percent(fraction);
        while_live(&self.active, job_id, || {
            self.progress.send_if_modified(|current| {
                if percent > *current {
                    *current = percent;
                    true
                } else {
                    false
                }
            });
        });
    }

    /// Stop the running job. Idempotent, and a no-op when idle.
    pub fn cancel(&self) {
        let Some(active) = self.active.lock().take() else {
            debug!("Cancel requested with no job running");
            return;
        };

        active.cancel.cancel();
        if let Some(plan) = &active.plan {
            self.engine.cancel(plan);
        }
        self.progress.send_replace(0);
        self.state.send_replace(JobState::Cancelled);
        info!("⏹️  Job {} cancelled", active.id);
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }
}
