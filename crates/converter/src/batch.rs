use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::engine::TranscodeEngine;
use crate::error::ConvertError;
use crate::job::{attach_plan, execute_plan, prepare_plan, to_percent, while_live, ActiveJob, ConversionResult};
use crate::media::SourceFile;
use crate::output::{DirectoryPicker, OutputDirectory};
use crate::settings::ConversionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Converting,
    Completed,
    Error,
}

/// Per-file entry of a batch. Starts pending, ends completed or error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileStatus {
    pub file: SourceFile,
    pub status: BatchStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConversionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchFileStatus {
    fn pending(file: SourceFile) -> Self {
        Self {
            file,
            status: BatchStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, BatchStatus::Completed | BatchStatus::Error)
    }
}

/// Clears the batch and file slots when a run ends, including when its
/// future is dropped mid-file. A file caught converting ends in error.
struct BatchRun<'a> {
    coordinator: &'a BatchJobCoordinator,
}

impl Drop for BatchRun<'_> {
    fn drop(&mut self) {
        let coordinator = self.coordinator;
        coordinator.active.lock().take();
        coordinator.running.lock().take();

        let abandoned = coordinator.statuses.send_if_modified(|list| {
            let mut changed = false;
            for entry in list.iter_mut().filter(|e| e.status == BatchStatus::Converting) {
                entry.status = BatchStatus::Error;
                entry.error = Some(ConvertError::Cancelled.to_string());
                entry.finished_at = Some(Utc::now());
                changed = true;
            }
            changed
        });
        if abandoned {
            warn!("⏹️  Batch dropped before it finished");
        }
    }
}

/// Converts a list of files one after another into a single output
/// directory. A failing file never stops the ones after it.
pub struct BatchJobCoordinator {
    engine: Arc<dyn TranscodeEngine>,
    bitrate_ceiling: u64,
    running: Mutex<Option<CancellationToken>>,
    active: Mutex<Option<ActiveJob>>,
    statuses: watch::Sender<Vec<BatchFileStatus>>,
}

impl BatchJobCoordinator {
    pub fn new(engine: Arc<dyn TranscodeEngine>, bitrate_ceiling: u64) -> Self {
        let (statuses, _) = watch::channel(Vec::new());
        Self {
            engine,
            bitrate_ceiling,
            running: Mutex::new(None),
            active: Mutex::new(None),
            statuses,
        }
    }

    /// Run a batch to completion and return the final status list.
    ///
    /// Errors only when the batch could not start at all (busy, or no
    /// writable directory); in that case every entry is left pending.
    pub async fn run(
        &self,
        files: Vec<SourceFile>,
        settings: &ConversionSettings,
        picker: &dyn DirectoryPicker,
    ) -> Result<Vec<BatchFileStatus>, ConvertError> {
        let batch_token = {
            let mut running = self.running.lock();
            if running.is_some() {
                return Err(ConvertError::Busy);
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };
        let _run = BatchRun { coordinator: self };

        self.run_batch(files, settings, picker, &batch_token).await
    }

    async fn run_batch(
        &self,
        files: Vec<SourceFile>,
        settings: &ConversionSettings,
        picker: &dyn DirectoryPicker,
        batch_token: &CancellationToken,
    ) -> Result<Vec<BatchFileStatus>, ConvertError> {
        self.statuses
            .send_replace(files.iter().cloned().map(BatchFileStatus::pending).collect());
        info!("📦 Batch of {} files, format {}, quality {}",
              files.len(), settings.format, settings.quality);

        let granted = tokio::select! {
            biased;
            _ = batch_token.cancelled() => Err(ConvertError::SelectionCancelled),
            granted = picker.request_writable_directory() => granted.map_err(ConvertError::from),
        };
        let directory = granted.map_err(|e| {
            warn!("❌ Batch not started: {}", e);
            e
        })?;

        for (index, file) in files.iter().enumerate() {
            if batch_token.is_cancelled() {
                info!("⏹️  Batch cancelled, {} files left pending", files.len() - index);
                break;
            }

            self.update(index, |entry| {
                entry.status = BatchStatus::Converting;
                entry.progress = 0;
                entry.started_at = Some(Utc::now());
            });

            let job_id = Uuid::new_v4();
            let file_token = batch_token.child_token();
            *self.active.lock() = Some(ActiveJob::new(job_id, file_token.clone()));
            debug!("Batch item {}/{} ({}) as job {}", index + 1, files.len(), file.name, job_id);

            let attempt = tokio::select! {
                biased;
                _ = file_token.cancelled() => Err(ConvertError::Cancelled),
                result = self.convert_one(index, job_id, file, settings, directory.as_ref()) => result,
            };
            *self.active.lock() = None;

            match attempt {
                Ok(result) => {
                    info!("✅ [{}/{}] {} → {}", index + 1, files.len(), file.name, result.filename);
                    self.update(index, |entry| {
                        entry.status = BatchStatus::Completed;
                        entry.progress = 100;
                        entry.result = Some(result);
                        entry.finished_at = Some(Utc::now());
                    });
                }
                Err(e) => {
                    warn!("❌ [{}/{}] {}: {}", index + 1, files.len(), file.name, e);
                    self.update(index, |entry| {
                        entry.status = BatchStatus::Error;
                        entry.error = Some(e.to_string());
                        entry.finished_at = Some(Utc::now());
                    });
                }
            }
        }

        let statuses = self.statuses.borrow().clone();
        let completed = statuses.iter().filter(|s| s.status == BatchStatus::Completed).count();
        let errors = statuses.iter().filter(|s| s.status == BatchStatus::Error).count();
        info!("📊 Batch finished: {}/{} completed, {} errors", completed, statuses.len(), errors);

        Ok(statuses)
    }

    async fn convert_one(
        &self,
        index: usize,
        job_id: Uuid,
        file: &SourceFile,
        settings: &ConversionSettings,
        directory: &dyn OutputDirectory,
    ) -> Result<ConversionResult, ConvertError> {
        let probe = self
            .engine
            .probe(file)
            .await
            .map_err(|e| ConvertError::Probe(format!("{:#}", e)))?;

        // The shared trim window is clamped to each file's own length
        let settings = settings.normalized(probe.duration_secs);
        let options = settings.engine_options(probe.duration_secs, self.bitrate_ceiling);

        let plan = prepare_plan(self.engine.as_ref(), file, settings.format, &options).await?;
        if !attach_plan(&self.active, job_id, &plan) {
            self.engine.cancel(&plan);
        }

        let on_progress = |fraction: f64| self.report_progress(index, job_id, fraction);
        let result = execute_plan(self.engine.as_ref(), &plan, &on_progress).await?;

        directory
            .write_file(&result.filename, &result.buffer)
            .await
            .map_err(|e| ConvertError::Persist(format!("{:#}", e)))?;

        Ok(result)
    }

    fn report_progress(&self, index: usize, job_id: Uuid, fraction: f64) {
        let percent = to_percent(fraction);
        while_live(&self.active, job_id, || {
            self.statuses.send_if_modified(|list| match list.get_mut(index) {
                Some(entry) if entry.status == BatchStatus::Converting && percent > entry.progress => {
                    entry.progress = percent;
                    true
                }
                _ => false,
            });
        });
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut BatchFileStatus)) {
        self.statuses.send_modify(|list| {
            if let Some(entry) = list.get_mut(index) {
                f(entry);
            }
        });
    }

    /// Stop the batch: the current file ends in error, the rest stay
    /// pending. No-op when no batch is running.
    pub fn cancel(&self) {
        let Some(token) = self.running.lock().clone() else {
            debug!("Cancel requested with no batch running");
            return;
        };

        token.cancel();
        if let Some(plan) = self.active.lock().as_ref().and_then(|a| a.plan.as_ref()) {
            self.engine.cancel(plan);
        }
        info!("⏹️  Batch cancel requested");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn statuses(&self) -> Vec<BatchFileStatus> {
        self.statuses.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<BatchFileStatus>> {
        self.statuses.subscribe()
    }
}
