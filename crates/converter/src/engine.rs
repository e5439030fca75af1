use std::fmt;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::media::{MediaProbe, SourceFile};
use crate::settings::{EngineOptions, OutputFormat};

/// Kind of track an engine can keep or drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// A track the engine refused to carry into the output, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedTrack {
    pub kind: TrackKind,
    pub codec: Option<String>,
    pub reason: String,
}

impl fmt::Display for DiscardedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.codec {
            Some(codec) => write!(f, "{} track ({}): {}", self.kind, codec, self.reason),
            None => write!(f, "{} track: {}", self.kind, self.reason),
        }
    }
}

/// A validated description of one conversion, built by the engine from raw
/// options. Carries the stop signal used for cooperative cancellation.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    pub source: SourceFile,
    pub format: OutputFormat,
    pub options: EngineOptions,
    /// Expected length of the output in seconds, used for progress
    pub output_duration: f64,
    pub kept: Vec<TrackKind>,
    pub discarded: Vec<DiscardedTrack>,
    stop: CancellationToken,
}

impl Plan {
    pub fn new(source: SourceFile, format: OutputFormat, options: EngineOptions, output_duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            format,
            options,
            output_duration,
            kept: Vec::new(),
            discarded: Vec::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn keep(&mut self, kind: TrackKind) {
        self.kept.push(kind);
    }

    pub fn discard(&mut self, kind: TrackKind, codec: Option<String>, reason: impl Into<String>) {
        self.discarded.push(DiscardedTrack {
            kind,
            codec,
            reason: reason.into(),
        });
    }

    /// A plan is runnable only if at least one track survives
    pub fn is_valid(&self) -> bool {
        !self.kept.is_empty()
    }

    /// Human-readable list of discarded tracks and reasons
    pub fn describe_discarded(&self) -> String {
        if self.discarded.is_empty() {
            return "no tracks to convert".to_string();
        }
        self.discarded
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Token the engine watches while running this plan
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Progress listener invoked by the engine with a fraction in `[0, 1]`
pub type ProgressListener<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// The narrow surface required of the external transcoding engine.
///
/// Engines are shared behind an `Arc` between the preview estimator, the job
/// controller and the batch coordinator, one conversion at a time.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Short identifier used in logs (e.g. `"ffmpeg"`)
    fn name(&self) -> &'static str;

    /// Read duration, tracks and tags of a source
    async fn probe(&self, source: &SourceFile) -> Result<MediaProbe>;

    /// Turn raw options into a plan. An unsatisfiable request is reported
    /// through [`Plan::is_valid`], not as an error.
    async fn build_plan(
        &self,
        source: &SourceFile,
        format: OutputFormat,
        options: &EngineOptions,
    ) -> Result<Plan>;

    /// Execute a plan and return the complete output buffer. Must stop at the
    /// next safe point once the plan's stop token fires.
    async fn run(&self, plan: &Plan, on_progress: ProgressListener<'_>) -> Result<Vec<u8>>;

    /// Best-effort cooperative stop
    fn cancel(&self, plan: &Plan) {
        plan.stop_token().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/tmp/clip.mov"),
            name: "clip.mov".to_string(),
            size: 1024,
        }
    }

    fn options() -> EngineOptions {
        EngineOptions {
            target_width: None,
            target_height: None,
            bitrate: 1_000_000,
            trim: None,
        }
    }

    #[test]
    fn test_plan_without_tracks_is_invalid() {
        let mut plan = Plan::new(source(), OutputFormat::Mp4, options(), 10.0);
        assert!(!plan.is_valid());

        plan.discard(TrackKind::Video, Some("prores".into()), "no encoder available");
        plan.discard(TrackKind::Audio, None, "trim window is outside the media");
        assert!(!plan.is_valid());
        assert_eq!(
            plan.describe_discarded(),
            "video track (prores): no encoder available; audio track: trim window is outside the media"
        );

        plan.keep(TrackKind::Audio);
        assert!(plan.is_valid());
    }

    struct NullEngine;

    #[async_trait]
    impl TranscodeEngine for NullEngine {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn probe(&self, _source: &SourceFile) -> Result<MediaProbe> {
            anyhow::bail!("not supported")
        }

        async fn build_plan(&self, source: &SourceFile, format: OutputFormat, options: &EngineOptions) -> Result<Plan> {
            Ok(Plan::new(source.clone(), format, options.clone(), 0.0))
        }

        async fn run(&self, _plan: &Plan, _on_progress: ProgressListener<'_>) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_default_cancel_fires_stop_token() {
        let engine = NullEngine;
        let plan = engine.build_plan(&source(), OutputFormat::Webm, &options()).await.unwrap();
        let clone = plan.clone();
        assert!(!plan.is_stopped());

        engine.cancel(&plan);
        assert!(plan.is_stopped());
        // Clones share the same stop signal
        assert!(clone.is_stopped());
    }
}
