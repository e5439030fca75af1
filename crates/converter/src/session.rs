use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::info;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use crate::batch::{BatchFileStatus, BatchJobCoordinator};
use crate::compat::{CompatibilityChecker, ServiceCompatibility};
use crate::config::ConverterConfig;
use crate::engine::TranscodeEngine;
use crate::error::ConvertError;
use crate::job::{ConversionJobController, ConversionResult, JobOutcome, JobState};
use crate::media::{MediaProbe, SourceFile};
use crate::output::DirectoryPicker;
use crate::preview::{EstimateRequest, EstimatorConfig, PreviewEstimate, PreviewEstimator};
use crate::settings::ConversionSettings;

/// The file currently loaded for single-file work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedSource {
    pub file: SourceFile,
    pub probe: MediaProbe,
}

#[derive(Default)]
struct SessionState {
    source: Option<LoadedSource>,
    settings: ConversionSettings,
    last_result: Option<ConversionResult>,
    last_error: Option<String>,
}

/// Hold on the engine shared by single-file and batch work, released on drop
struct EngineClaim<'a>(&'a AtomicBool);

impl<'a> EngineClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for EngineClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One user's workspace: a loaded source, its settings, a live size
/// estimate, and the single-file and batch job slots.
pub struct Session {
    engine: Arc<dyn TranscodeEngine>,
    config: ConverterConfig,
    state: Mutex<SessionState>,
    estimator: PreviewEstimator,
    controller: ConversionJobController,
    batch: BatchJobCoordinator,
    engine_busy: AtomicBool,
    checker: CompatibilityChecker,
}

impl Session {
    pub fn new(engine: Arc<dyn TranscodeEngine>, config: ConverterConfig) -> Self {
        let estimator = PreviewEstimator::new(engine.clone(), EstimatorConfig::from(&config));
        let controller = ConversionJobController::new(engine.clone(), config.bitrate_ceiling);
        let batch = BatchJobCoordinator::new(engine.clone(), config.bitrate_ceiling);
        let checker = CompatibilityChecker::new(config.services.clone());

        Self {
            engine,
            config,
            state: Mutex::new(SessionState::default()),
            estimator,
            controller,
            batch,
            engine_busy: AtomicBool::new(false),
            checker,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Accept a new source. The trim window resets to the whole file and any
    /// previous result or error is dropped. On failure nothing stays loaded.
    pub async fn load_file(&self, path: &Path) -> Result<LoadedSource, ConvertError> {
        let probed = async {
            let file = SourceFile::open(path).await?;
            let probe = self.engine.probe(&file).await?;
            anyhow::Ok(LoadedSource { file, probe })
        }
        .await;

        let loaded = match probed {
            Ok(loaded) => loaded,
            Err(e) => {
                self.state.lock().source = None;
                self.estimator.clear();
                return Err(ConvertError::Probe(format!("{:#}", e)));
            }
        };

        info!("📂 Loaded {} ({} bytes, {:.2}s, {})",
              loaded.file.name,
              loaded.file.size,
              loaded.probe.duration_secs,
              loaded.probe.resolution().unwrap_or_else(|| "audio only".to_string()));

        {
            let mut state = self.state.lock();
            state.settings = ConversionSettings {
                start_time: Some(0.0),
                end_time: Some(loaded.probe.duration_secs),
                ..state.settings.clone()
            };
            state.source = Some(loaded.clone());
            state.last_result = None;
            state.last_error = None;
        }

        self.refresh_preview();
        Ok(loaded)
    }

    /// Store a new settings snapshot, clamped to the loaded source, and
    /// schedule a fresh estimate. Returns the snapshot as stored.
    pub fn update_settings(&self, settings: ConversionSettings) -> ConversionSettings {
        let stored = {
            let mut state = self.state.lock();
            let duration = state
                .source
                .as_ref()
                .map(|s| s.probe.duration_secs)
                .unwrap_or(f64::INFINITY);
            state.settings = settings.normalized(duration);
            state.settings.clone()
        };

        self.refresh_preview();
        stored
    }

    /// Back to defaults, keeping the trim window at the full source
    pub fn reset_settings(&self) -> ConversionSettings {
        let duration = self.source().map(|s| s.probe.duration_secs);
        self.update_settings(ConversionSettings {
            start_time: duration.map(|_| 0.0),
            end_time: duration,
            ..Default::default()
        })
    }

    pub fn settings(&self) -> ConversionSettings {
        self.state.lock().settings.clone()
    }

    pub fn source(&self) -> Option<LoadedSource> {
        self.state.lock().source.clone()
    }

    fn estimate_request(&self) -> Option<EstimateRequest> {
        let state = self.state.lock();
        state.source.as_ref().map(|loaded| EstimateRequest {
            source: loaded.file.clone(),
            probe: loaded.probe.clone(),
            settings: state.settings.clone(),
        })
    }

    fn refresh_preview(&self) {
        if !self.config.live_preview {
            return;
        }
        if let Some(request) = self.estimate_request() {
            self.estimator.trigger(request);
        }
    }

    /// Estimate right away instead of waiting for the debounce
    pub async fn estimate_now(&self) -> Result<PreviewEstimate, ConvertError> {
        let request = self.estimate_request().ok_or(ConvertError::NoSource)?;
        Ok(self.estimator.estimate_now(request).await)
    }

    /// Convert the loaded source with the current settings. The outcome is
    /// also kept in the job slot; a cancellation clears nothing and stores
    /// nothing.
    pub async fn start_conversion(&self) -> JobOutcome {
        let Some(_claim) = EngineClaim::acquire(&self.engine_busy) else {
            return JobOutcome::Failed(ConvertError::Busy);
        };

        let (loaded, settings) = {
            let mut state = self.state.lock();
            let Some(loaded) = state.source.clone() else {
                return JobOutcome::Failed(ConvertError::NoSource);
            };
            state.last_result = None;
            state.last_error = None;
            (loaded, state.settings.clone())
        };

        let outcome = self.controller.run(&loaded.file, &loaded.probe, &settings).await;

        let mut state = self.state.lock();
        match &outcome {
            JobOutcome::Completed(result) => state.last_result = Some(result.clone()),
            JobOutcome::Failed(e) => state.last_error = Some(e.to_string()),
            JobOutcome::Cancelled => {}
        }
        outcome
    }

    pub fn cancel_conversion(&self) {
        self.controller.cancel();
    }

    /// Convert `files` with the current settings into a directory obtained
    /// from `picker`. A trim window still spanning the whole loaded source is
    /// not carried over, so each file converts in full.
    pub async fn start_batch(
        &self,
        files: Vec<SourceFile>,
        picker: &dyn DirectoryPicker,
    ) -> Result<Vec<BatchFileStatus>, ConvertError> {
        let Some(_claim) = EngineClaim::acquire(&self.engine_busy) else {
            return Err(ConvertError::Busy);
        };

        let settings = {
            let state = self.state.lock();
            match &state.source {
                Some(loaded) => state.settings.without_full_trim(loaded.probe.duration_secs),
                None => state.settings.clone(),
            }
        };
        self.batch.run(files, &settings, picker).await
    }

    pub fn cancel_batch(&self) {
        self.batch.cancel();
    }

    pub fn preview(&self) -> PreviewEstimate {
        self.estimator.current()
    }

    pub fn subscribe_preview(&self) -> watch::Receiver<PreviewEstimate> {
        self.estimator.subscribe()
    }

    pub fn progress(&self) -> u8 {
        self.controller.progress()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.controller.subscribe_progress()
    }

    pub fn job_state(&self) -> JobState {
        self.controller.state()
    }

    pub fn subscribe_job_state(&self) -> watch::Receiver<JobState> {
        self.controller.subscribe_state()
    }

    pub fn batch_status(&self) -> Vec<BatchFileStatus> {
        self.batch.statuses()
    }

    pub fn subscribe_batch_status(&self) -> watch::Receiver<Vec<BatchFileStatus>> {
        self.batch.subscribe()
    }

    pub fn last_result(&self) -> Option<ConversionResult> {
        self.state.lock().last_result.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Service verdicts for the current estimate over the effective trim.
    /// Empty while no estimate is known.
    pub fn compatibility(&self) -> Vec<ServiceCompatibility> {
        let estimate = self.preview();
        if !estimate.is_known() {
            return Vec::new();
        }

        let state = self.state.lock();
        let Some(loaded) = &state.source else {
            return Vec::new();
        };
        let duration = state.settings.trim_duration(loaded.probe.duration_secs);
        self.checker.check(estimate.estimated_size, duration)
    }

    pub fn checker(&self) -> &CompatibilityChecker {
        &self.checker
    }
}
