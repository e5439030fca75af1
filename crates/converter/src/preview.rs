use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;
use tokio::sync::watch;
use crate::config::ConverterConfig;
use crate::engine::TranscodeEngine;
use crate::media::{MediaProbe, SourceFile};
use crate::settings::ConversionSettings;

/// Latest size estimate; `estimated_size == 0` means unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEstimate {
    pub estimated_size: u64,
    pub is_estimating: bool,
}

impl PreviewEstimate {
    pub fn is_known(&self) -> bool {
        self.estimated_size > 0
    }
}

/// Everything a sample run needs, captured at trigger time
#[derive(Debug, Clone)]
pub struct EstimateRequest {
    pub source: SourceFile,
    pub probe: MediaProbe,
    pub settings: ConversionSettings,
}

#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub debounce: Duration,
    pub sample_secs: f64,
    pub bitrate_ceiling: u64,
}

impl From<&ConverterConfig> for EstimatorConfig {
    fn from(config: &ConverterConfig) -> Self {
        Self {
            debounce: config.debounce(),
            sample_secs: config.preview_sample_secs,
            bitrate_ceiling: config.bitrate_ceiling,
        }
    }
}

/// Scale a sample's size up to the full trimmed duration.
///
/// Linear in time, so it is an approximation: encoders spend bits unevenly
/// across a clip.
pub fn extrapolate_size(sample_bytes: u64, sample_secs: f64, full_secs: f64) -> u64 {
    if sample_secs.is_nan() || sample_secs <= 0.0 || full_secs <= 0.0 || !full_secs.is_finite() {
        return 0;
    }
    (sample_bytes as f64 / sample_secs * full_secs).round() as u64
}

/// Debounced sample conversions extrapolated to a full-size estimate.
///
/// Every trigger takes a new request id. A timer or run that finds a newer
/// id when it wakes or finishes drops its work, so only the most recent
/// trigger can commit.
#[derive(Clone)]
pub struct PreviewEstimator {
    inner: Arc<EstimatorInner>,
}

struct EstimatorInner {
    engine: Arc<dyn TranscodeEngine>,
    config: EstimatorConfig,
    latest: AtomicU64,
    estimate: watch::Sender<PreviewEstimate>,
}

impl PreviewEstimator {
    pub fn new(engine: Arc<dyn TranscodeEngine>, config: EstimatorConfig) -> Self {
        let (estimate, _) = watch::channel(PreviewEstimate::default());
        Self {
            inner: Arc::new(EstimatorInner {
                engine,
                config,
                latest: AtomicU64::new(0),
                estimate,
            }),
        }
    }

    /// Schedule an estimate once the debounce delay passes without another
    /// trigger. Must be called from within a tokio runtime.
    pub fn trigger(&self, request: EstimateRequest) {
        let id = self.inner.next_id();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(inner.config.debounce).await;
            if !inner.is_latest(id) {
                debug!("Preview request {} superseded during debounce", id);
                return;
            }
            inner.estimate(id, request).await;
        });
    }

    /// Estimate immediately, skipping the debounce. Subject to the same
    /// freshness rule as [`trigger`](Self::trigger).
    pub async fn estimate_now(&self, request: EstimateRequest) -> PreviewEstimate {
        let id = self.inner.next_id();
        self.inner.estimate(id, request).await;
        self.current()
    }

    /// Forget the current estimate and discard anything in flight
    pub fn clear(&self) {
        self.inner.next_id();
        self.inner.estimate.send_replace(PreviewEstimate::default());
    }

    pub fn current(&self) -> PreviewEstimate {
        *self.inner.estimate.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewEstimate> {
        self.inner.estimate.subscribe()
    }
}

impl EstimatorInner {
    fn next_id(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, id: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == id
    }

    async fn estimate(&self, id: u64, request: EstimateRequest) {
        self.estimate.send_modify(|e| e.is_estimating = true);

        let estimated_size = match self.sample(&request).await {
            Ok(size) => size,
            Err(e) => {
                debug!("Preview estimate for {} failed: {:#}", request.source.name, e);
                0
            }
        };

        if !self.is_latest(id) {
            debug!("Discarding stale preview result for request {}", id);
            return;
        }

        self.estimate.send_replace(PreviewEstimate {
            estimated_size,
            is_estimating: false,
        });
        debug!("Preview estimate for {}: {} bytes", request.source.name, estimated_size);
    }

    async fn sample(&self, request: &EstimateRequest) -> Result<u64> {
        let total = request.probe.duration_secs;
        let Some(options) = request.settings.sample_options(
            total,
            self.config.bitrate_ceiling,
            self.config.sample_secs,
        ) else {
            bail!("nothing to sample past {:.3}s", request.settings.start_time.unwrap_or(0.0));
        };
        let sample_secs = options.trim.map(|t| t.duration()).unwrap_or(0.0);

        let plan = self
            .engine
            .build_plan(&request.source, request.settings.format, &options)
            .await?;
        if !plan.is_valid() {
            bail!("sample plan is invalid: {}", plan.describe_discarded());
        }

        let sample = self.engine.run(&plan, &|_| {}).await?;
        Ok(extrapolate_size(
            sample.len() as u64,
            sample_secs,
            request.settings.trim_duration(total),
        ))
    }
}
