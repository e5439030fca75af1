//! In-memory engine and output doubles for orchestration tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use crate::engine::{Plan, ProgressListener, TrackKind, TranscodeEngine};
use crate::media::{AudioTrack, MediaProbe, SourceFile, VideoTrack};
use crate::output::{DirectoryGrantError, DirectoryPicker, OutputDirectory};
use crate::settings::{EngineOptions, OutputFormat};

pub fn source_named(name: &str, size: u64) -> SourceFile {
    SourceFile {
        path: PathBuf::from("/media/in").join(name),
        name: name.to_string(),
        size,
    }
}

pub fn probe_secs(duration_secs: f64) -> MediaProbe {
    MediaProbe {
        duration_secs,
        video: Some(VideoTrack {
            display_width: 1920,
            display_height: 1080,
            codec: Some("h264".to_string()),
        }),
        audio: Some(AudioTrack {
            codec: Some("aac".to_string()),
        }),
        tags: None,
    }
}

/// Engine whose output is exactly `bitrate / 8` bytes per second of output
pub struct ScriptedEngine {
    probe: MediaProbe,
    durations: HashMap<String, f64>,
    invalid: HashSet<String>,
    failing: HashSet<String>,
    unreadable: HashSet<String>,
    steps: usize,
    step_delay: Duration,
    hang: bool,
    run_delays: Mutex<VecDeque<Duration>>,
    runs: Mutex<Vec<EngineOptions>>,
    stopped: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            probe: probe_secs(duration_secs),
            durations: HashMap::new(),
            invalid: HashSet::new(),
            failing: HashSet::new(),
            unreadable: HashSet::new(),
            steps: 0,
            step_delay: Duration::ZERO,
            hang: false,
            run_delays: Mutex::new(VecDeque::new()),
            runs: Mutex::new(Vec::new()),
            stopped: AtomicUsize::new(0),
        }
    }

    /// Probing this source reports its own duration
    pub fn with_duration(mut self, name: &str, duration_secs: f64) -> Self {
        self.durations.insert(name.to_string(), duration_secs);
        self
    }

    /// Plans for this source keep no tracks
    pub fn with_invalid(mut self, name: &str) -> Self {
        self.invalid.insert(name.to_string());
        self
    }

    /// Runs for this source fail mid-encode
    pub fn with_failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Probing this source fails
    pub fn with_unreadable(mut self, name: &str) -> Self {
        self.unreadable.insert(name.to_string());
        self
    }

    /// Report progress in `steps` equal increments, `delay` apart
    pub fn with_steps(mut self, steps: usize, delay: Duration) -> Self {
        self.steps = steps;
        self.step_delay = delay;
        self
    }

    /// Extra latency for successive runs, consumed in order
    pub fn with_run_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.run_delays.lock().extend(delays);
        self
    }

    /// Runs never finish on their own
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn runs(&self) -> Vec<EngineOptions> {
        self.runs.lock().clone()
    }

    pub fn stopped_plans(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn sleep_unless_stopped(plan: &Plan, delay: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = plan.stop_token().cancelled() => bail!("stopped"),
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn probe(&self, source: &SourceFile) -> Result<MediaProbe> {
        if self.unreadable.contains(&source.name) {
            bail!("unreadable header in {}", source.name);
        }
        Ok(match self.durations.get(&source.name) {
            Some(duration) => probe_secs(*duration),
            None => self.probe.clone(),
        })
    }

    async fn build_plan(
        &self,
        source: &SourceFile,
        format: OutputFormat,
        options: &EngineOptions,
    ) -> Result<Plan> {
        let probe = self.probe(source).await?;
        let output_duration = options
            .trim
            .map(|t| t.duration())
            .unwrap_or(probe.duration_secs);

        let mut plan = Plan::new(source.clone(), format, options.clone(), output_duration);
        if self.invalid.contains(&source.name) {
            plan.discard(TrackKind::Video, Some("h264".to_string()), "rejected by scripted engine");
        } else {
            plan.keep(TrackKind::Video);
            plan.keep(TrackKind::Audio);
        }
        Ok(plan)
    }

    async fn run(&self, plan: &Plan, on_progress: ProgressListener<'_>) -> Result<Vec<u8>> {
        self.runs.lock().push(plan.options.clone());

        let delay = self.run_delays.lock().pop_front();
        if let Some(delay) = delay {
            sleep_unless_stopped(plan, delay).await?;
        }

        if self.hang {
            plan.stop_token().cancelled().await;
            bail!("stopped");
        }

        for step in 1..=self.steps {
            sleep_unless_stopped(plan, self.step_delay).await?;
            on_progress(step as f64 / self.steps as f64);
        }

        if self.failing.contains(&plan.source.name) {
            bail!("encoder crashed on {}", plan.source.name);
        }

        let bytes = (plan.options.bitrate as f64 / 8.0 * plan.output_duration).round() as usize;
        Ok(vec![0u8; bytes])
    }

    fn cancel(&self, plan: &Plan) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        plan.stop_token().cancel();
    }
}

/// Output directory that records writes in memory
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    files: Arc<Mutex<Vec<(String, usize)>>>,
    reject: Option<String>,
}

impl MemoryDirectory {
    /// Writes of `name` fail
    pub fn rejecting(name: &str) -> Self {
        Self {
            reject: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn written(&self) -> Vec<(String, usize)> {
        self.files.lock().clone()
    }
}

#[async_trait]
impl OutputDirectory for MemoryDirectory {
    fn location(&self) -> String {
        "memory://".to_string()
    }

    async fn write_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        if self.reject.as_deref() == Some(name) {
            bail!("disk full while writing {}", name);
        }
        let mut files = self.files.lock();
        files.retain(|(existing, _)| existing != name);
        files.push((name.to_string(), contents.len()));
        Ok(())
    }
}

/// Picker with a fixed answer
pub struct ScriptedPicker(pub Result<MemoryDirectory, DirectoryGrantError>);

#[async_trait]
impl DirectoryPicker for ScriptedPicker {
    async fn request_writable_directory(&self) -> Result<Box<dyn OutputDirectory>, DirectoryGrantError> {
        self.0
            .clone()
            .map(|dir| Box::new(dir) as Box<dyn OutputDirectory>)
    }
}
