use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use crate::config::ConverterConfig;
use crate::engine::{Plan, ProgressListener, TrackKind, TranscodeEngine};
use crate::ffprobe::FFProbeData;
use crate::media::{MediaProbe, SourceFile};
use crate::settings::{EngineOptions, OutputFormat, TrimWindow};

/// Largest frame edge the bundled encoders accept
pub const MAX_DIMENSION: u32 = 16_384;

/// Audio bitrate used for every re-encoded audio track
const AUDIO_BITRATE: &str = "128k";

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// `-progress` with `out_time_us` needs FFmpeg 4.0 or later
    pub fn meets_requirement(&self) -> bool {
        self.major >= 4
    }

    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Distribution builds append suffixes like "6.1.1-3ubuntu5"
        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();

        if parts.is_empty() {
            return Err(anyhow!("Invalid version format: {}", version_str));
        }

        let component = |idx: usize| -> Result<u32> {
            match parts.get(idx) {
                Some(p) => p
                    .parse::<u32>()
                    .with_context(|| format!("Failed to parse version component from: {}", p)),
                None => Ok(0),
            }
        };

        Ok(FFmpegVersion {
            major: component(0)?,
            minor: component(1)?,
            patch: component(2)?,
        })
    }
}

/// Transcoding engine backed by the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    temp_dir: PathBuf,
}

impl FfmpegEngine {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Build the engine and verify the ffmpeg binary is usable
    pub async fn detect(config: &ConverterConfig) -> Result<Self> {
        let engine = Self::new(config);
        let version = engine.detect_version().await?;

        if !version.meets_requirement() {
            return Err(anyhow!(
                "FFmpeg version {}.{}.{} does not meet requirement (>= 4.0). \
                 Please install FFmpeg 4.0 or later.",
                version.major, version.minor, version.patch
            ));
        }

        info!("🎬 Using FFmpeg {}.{}.{} at {}",
              version.major, version.minor, version.patch, engine.ffmpeg_bin.display());
        Ok(engine)
    }

    async fn detect_version(&self) -> Result<FFmpegVersion> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        FFmpegVersion::parse(first_line)
    }

    /// Run ffprobe and parse the JSON output
    async fn execute_ffprobe(&self, file_path: &Path) -> Result<FFProbeData> {
        if !file_path.exists() {
            return Err(anyhow!("File does not exist: {}", file_path.display()));
        }

        debug!("Executing FFprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFprobe for: {}. Ensure FFprobe is installed and accessible at: {}",
                file_path.display(),
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);

            return Err(anyhow!(
                "FFprobe failed (exit code {}) for {}: {}",
                exit_code,
                file_path.display(),
                stderr.trim()
            ));
        }

        let json_str = String::from_utf8(output.stdout)
            .context("FFprobe output is not valid UTF-8")?;

        FFProbeData::from_json(&json_str)
            .with_context(|| format!("Unreadable ffprobe output for: {}", file_path.display()))
    }

    fn temp_output_path(&self, plan: &Plan) -> PathBuf {
        self.temp_dir
            .join(format!("vconv-{}.{}", plan.id, plan.format.extension()))
    }
}

/// FFmpeg's temp output, removed when dropped. Covers every way a run can
/// end, including the run future being dropped mid-encode.
struct TempOutput(PathBuf);

impl TempOutput {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove temp output {}: {}", self.0.display(), e);
            }
        }
    }
}

/// Decide which tracks survive the requested transform
pub fn plan_for(
    source: &SourceFile,
    probe: &MediaProbe,
    format: OutputFormat,
    options: &EngineOptions,
) -> Plan {
    let window = options.trim.unwrap_or(TrimWindow {
        start: 0.0,
        end: probe.duration_secs,
    });
    let output_duration = (window.end.min(probe.duration_secs) - window.start).max(0.0);
    let outside_media = window.start >= probe.duration_secs || output_duration <= 0.0;

    let mut plan = Plan::new(source.clone(), format, options.clone(), output_duration);

    if let Some(video) = &probe.video {
        let oversized = [options.target_width, options.target_height]
            .into_iter()
            .flatten()
            .any(|d| d > MAX_DIMENSION);

        if outside_media {
            plan.discard(TrackKind::Video, video.codec.clone(), "trim window is outside the media");
        } else if oversized {
            plan.discard(
                TrackKind::Video,
                video.codec.clone(),
                format!("target size exceeds the {}px encoder limit", MAX_DIMENSION),
            );
        } else {
            plan.keep(TrackKind::Video);
        }
    }

    if let Some(audio) = &probe.audio {
        if outside_media {
            plan.discard(TrackKind::Audio, audio.codec.clone(), "trim window is outside the media");
        } else {
            plan.keep(TrackKind::Audio);
        }
    }

    plan
}

/// Map an ffmpeg `-progress` line onto a fraction of `duration`
pub fn parse_progress_line(line: &str, duration: f64) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" => {
            if duration <= 0.0 {
                return None;
            }
            let micros: f64 = value.trim().parse().ok()?;
            Some((micros / 1_000_000.0 / duration).clamp(0.0, 1.0))
        }
        "progress" if value.trim() == "end" => Some(1.0),
        _ => None,
    }
}

/// Command builder for generating FFmpeg command lines
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Scale filter for the requested box. With both edges set the frame is
    /// fitted inside and padded (letterbox/pillarbox) instead of stretched.
    pub fn scale_filter(width: Option<u32>, height: Option<u32>) -> Option<String> {
        // yuv420p needs even dimensions
        let even = |d: u32| (d - d % 2).max(2);
        match (width, height) {
            (Some(w), Some(h)) => {
                let (w, h) = (even(w), even(h));
                Some(format!(
                    "scale={w}:{h}:force_original_aspect_ratio=decrease,\
                     pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
                ))
            }
            (Some(w), None) => Some(format!("scale={}:-2", even(w))),
            (None, Some(h)) => Some(format!("scale=-2:{}", even(h))),
            (None, None) => None,
        }
    }

    /// Build the conversion command for a plan
    ///
    /// - Seek before the input, duration after it
    /// - Map only the tracks the plan kept
    /// - H.264/AAC for MP4, VP9/Opus for WebM
    /// - Machine-readable progress on stdout
    pub fn build_convert_command(&self, plan: &Plan, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let Some(trim) = plan.options.trim {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", trim.start));
        }

        args.push("-i".to_string());
        args.push(plan.source.path.to_string_lossy().to_string());

        if plan.options.trim.is_some() {
            args.push("-t".to_string());
            args.push(format!("{:.3}", plan.output_duration));
        }

        let keep_video = plan.kept.contains(&TrackKind::Video);
        let keep_audio = plan.kept.contains(&TrackKind::Audio);

        if keep_video {
            // Capital V skips attached cover art
            args.push("-map".to_string());
            args.push("0:V:0".to_string());
        }
        if keep_audio {
            args.push("-map".to_string());
            args.push("0:a:0".to_string());
        }

        if keep_video {
            if let Some(filter) = Self::scale_filter(plan.options.target_width, plan.options.target_height) {
                args.push("-vf".to_string());
                args.push(filter);
            }

            args.push("-c:v".to_string());
            match plan.format {
                OutputFormat::Mp4 => {
                    args.push("libx264".to_string());
                    args.push("-pix_fmt".to_string());
                    args.push("yuv420p".to_string());
                }
                OutputFormat::Webm => {
                    args.push("libvpx-vp9".to_string());
                    args.push("-row-mt".to_string());
                    args.push("1".to_string());
                }
            }
            args.push("-b:v".to_string());
            args.push(plan.options.bitrate.to_string());
        } else {
            args.push("-vn".to_string());
        }

        if keep_audio {
            args.push("-c:a".to_string());
            args.push(match plan.format {
                OutputFormat::Mp4 => "aac".to_string(),
                OutputFormat::Webm => "libopus".to_string(),
            });
            args.push("-b:a".to_string());
            args.push(AUDIO_BITRATE.to_string());
        } else {
            args.push("-an".to_string());
        }

        args.push("-map_metadata".to_string());
        args.push("0".to_string());

        if plan.format == OutputFormat::Mp4 {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push("-nostats".to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(&self, source: &SourceFile) -> Result<MediaProbe> {
        let data = self.execute_ffprobe(&source.path).await?;
        data.into_media_probe()
            .with_context(|| format!("Failed to read media information for: {}", source.name))
    }

    async fn build_plan(
        &self,
        source: &SourceFile,
        format: OutputFormat,
        options: &EngineOptions,
    ) -> Result<Plan> {
        let probe = self.probe(source).await?;
        let plan = plan_for(source, &probe, format, options);
        debug!("Plan {} for {}: kept {:?}, discarded {}",
               plan.id, source.name, plan.kept, plan.discarded.len());
        Ok(plan)
    }

    async fn run(&self, plan: &Plan, on_progress: ProgressListener<'_>) -> Result<Vec<u8>> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .with_context(|| format!("Failed to create temp directory: {}", self.temp_dir.display()))?;

        // Declared before the child so the process is killed before the file goes
        let output = TempOutput(self.temp_output_path(plan));
        let args = CommandBuilder::new().build_convert_command(plan, output.path());
        let cmd_str = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing FFmpeg: {}", cmd_str);

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stdout"))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let stderr_handle = tokio::spawn(async move {
            let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut progress_lines = BufReader::new(stdout).lines();
        let stop = plan.stop_token();

        let status = loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    child.kill().await.context("Failed to kill FFmpeg process")?;
                    return Err(anyhow!("FFmpeg run stopped on request"));
                }
                line = progress_lines.next_line() => {
                    match line.context("Failed to read FFmpeg progress")? {
                        Some(line) => {
                            if let Some(fraction) = parse_progress_line(&line, plan.output_duration) {
                                on_progress(fraction);
                            }
                        }
                        None => break child.wait().await.context("Failed to wait for FFmpeg process")?,
                    }
                }
            }
        };

        let stderr = stderr_handle.await
            .context("Failed to read FFmpeg stderr")?;

        if !status.success() {
            return Err(anyhow!(
                "FFmpeg exited with code {}:\n{}",
                status.code().unwrap_or(-1),
                stderr
            ));
        }

        let bytes = tokio::fs::read(output.path())
            .await
            .with_context(|| format!("Failed to read FFmpeg output: {}", output.path().display()))?;

        info!("FFmpeg produced {} bytes for {}", bytes.len(), plan.source.name);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioTrack, VideoTrack};
    use proptest::prelude::*;

    fn source() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/media/in/clip.mov"),
            name: "clip.mov".to_string(),
            size: 10_000,
        }
    }

    fn probe(video: bool, audio: bool) -> MediaProbe {
        MediaProbe {
            duration_secs: 30.0,
            video: video.then(|| VideoTrack {
                display_width: 1920,
                display_height: 1080,
                codec: Some("h264".to_string()),
            }),
            audio: audio.then(|| AudioTrack {
                codec: Some("aac".to_string()),
            }),
            tags: None,
        }
    }

    fn options(trim: Option<TrimWindow>) -> EngineOptions {
        EngineOptions {
            target_width: None,
            target_height: None,
            bitrate: 4_000_000,
            trim,
        }
    }

    #[test]
    fn test_version_parsing() {
        let v = FFmpegVersion::parse("ffmpeg version 8.0.1 Copyright (c) 2000-2025").unwrap();
        assert_eq!(v, FFmpegVersion { major: 8, minor: 0, patch: 1 });

        let v = FFmpegVersion::parse("ffmpeg version 6.1.1-3ubuntu5 Copyright").unwrap();
        assert_eq!(v, FFmpegVersion { major: 6, minor: 1, patch: 1 });

        let v = FFmpegVersion::parse("ffmpeg version 4.4").unwrap();
        assert_eq!(v, FFmpegVersion { major: 4, minor: 4, patch: 0 });

        assert!(FFmpegVersion::parse("ffmpeg version N/A").is_err());
    }

    #[test]
    fn test_version_requirement() {
        assert!(FFmpegVersion { major: 4, minor: 0, patch: 0 }.meets_requirement());
        assert!(FFmpegVersion { major: 7, minor: 1, patch: 0 }.meets_requirement());
        assert!(!FFmpegVersion { major: 3, minor: 4, patch: 8 }.meets_requirement());
    }

    #[test]
    fn test_plan_keeps_present_tracks() {
        let plan = plan_for(&source(), &probe(true, true), OutputFormat::Mp4, &options(None));
        assert!(plan.is_valid());
        assert_eq!(plan.kept, vec![TrackKind::Video, TrackKind::Audio]);
        assert!((plan.output_duration - 30.0).abs() < 1e-9);

        let plan = plan_for(&source(), &probe(false, true), OutputFormat::Webm, &options(None));
        assert_eq!(plan.kept, vec![TrackKind::Audio]);
    }

    #[test]
    fn test_plan_invalid_when_trim_outside_media() {
        let trim = Some(TrimWindow { start: 45.0, end: 50.0 });
        let plan = plan_for(&source(), &probe(true, true), OutputFormat::Mp4, &options(trim));
        assert!(!plan.is_valid());
        assert_eq!(plan.discarded.len(), 2);
        assert!(plan.describe_discarded().contains("video track (h264): trim window is outside the media"));
    }

    #[test]
    fn test_plan_without_tracks_is_invalid() {
        let plan = plan_for(&source(), &probe(false, false), OutputFormat::Mp4, &options(None));
        assert!(!plan.is_valid());
        assert_eq!(plan.describe_discarded(), "no tracks to convert");
    }

    #[test]
    fn test_plan_rejects_oversized_target() {
        let mut opts = options(None);
        opts.target_width = Some(MAX_DIMENSION + 2);
        let plan = plan_for(&source(), &probe(true, true), OutputFormat::Mp4, &opts);
        // Audio still survives, so the plan stays runnable
        assert!(plan.is_valid());
        assert_eq!(plan.kept, vec![TrackKind::Audio]);
        assert_eq!(plan.discarded[0].kind, TrackKind::Video);
    }

    #[test]
    fn test_scale_filter_contains_instead_of_stretching() {
        assert_eq!(CommandBuilder::scale_filter(None, None), None);
        assert_eq!(CommandBuilder::scale_filter(Some(1280), None).unwrap(), "scale=1280:-2");
        assert_eq!(CommandBuilder::scale_filter(None, Some(721)).unwrap(), "scale=-2:720");

        let both = CommandBuilder::scale_filter(Some(640), Some(640)).unwrap();
        assert!(both.contains("force_original_aspect_ratio=decrease"));
        assert!(both.contains("pad=640:640"));
    }

    #[test]
    fn test_convert_command_for_trimmed_webm() {
        let trim = Some(TrimWindow { start: 2.0, end: 7.5 });
        let mut opts = options(trim);
        opts.target_width = Some(854);
        opts.target_height = Some(480);
        let plan = plan_for(&source(), &probe(true, true), OutputFormat::Webm, &opts);

        let args = CommandBuilder::new().build_convert_command(&plan, Path::new("/tmp/out.webm"));
        let joined = args.join(" ");

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert!(ss < input && input < t, "seek must precede the input, duration follow it");
        assert_eq!(args[t + 1], "5.500");

        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-b:v 4000000"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-progress pipe:1"));
        assert!(!joined.contains("+faststart"));
        assert_eq!(args.last().unwrap(), "/tmp/out.webm");
    }

    #[test]
    fn test_convert_command_drops_missing_audio() {
        let plan = plan_for(&source(), &probe(true, false), OutputFormat::Mp4, &options(None));
        let args = CommandBuilder::new().build_convert_command(&plan, Path::new("/tmp/out.mp4"));

        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_progress_line_parsing() {
        assert_eq!(parse_progress_line("out_time_us=5000000", 10.0), Some(0.5));
        assert_eq!(parse_progress_line("out_time_us=N/A", 10.0), None);
        assert_eq!(parse_progress_line("out_time_us=99000000", 10.0), Some(1.0));
        assert_eq!(parse_progress_line("progress=end", 10.0), Some(1.0));
        assert_eq!(parse_progress_line("progress=continue", 10.0), None);
        assert_eq!(parse_progress_line("frame=120", 10.0), None);
        assert_eq!(parse_progress_line("out_time_us=100", 0.0), None);
    }

    #[cfg(unix)]
    const FFPROBE_STUB: &str = r#"#!/bin/sh
cat <<'JSON'
{"streams":[{"index":0,"codec_type":"video","codec_name":"h264","width":640,"height":360}],
 "format":{"format_name":"mov,mp4","duration":"10.000000"}}
JSON
"#;

    /// Writes part of the output, reports 1 s of progress, then stalls
    #[cfg(unix)]
    const FFMPEG_STUB: &str = r#"#!/bin/sh
for last; do :; done
echo partial > "$last"
echo out_time_us=1000000
echo progress=continue
exec sleep 30
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_leaves_no_temp_output() {
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;
        use crate::job::{ConversionJobController, JobOutcome};
        use crate::settings::ConversionSettings;

        let tmp = tempfile::tempdir().unwrap();
        let install = |name: &str, body: &str| {
            let path = tmp.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        let config = ConverterConfig {
            ffmpeg_bin: install("ffmpeg", FFMPEG_STUB),
            ffprobe_bin: install("ffprobe", FFPROBE_STUB),
            temp_dir: tmp.path().join("work"),
            ..ConverterConfig::default_config()
        };
        let input = tmp.path().join("clip.mov");
        std::fs::write(&input, b"not much of a movie").unwrap();

        let engine = Arc::new(FfmpegEngine::new(&config));
        let source = SourceFile::open(&input).await.unwrap();
        let probe = engine.probe(&source).await.unwrap();
        assert_eq!(probe.duration_secs, 10.0);

        let controller = Arc::new(ConversionJobController::new(engine, config.bitrate_ceiling));
        let mut progress = controller.subscribe_progress();
        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller.run(&source, &probe, &ConversionSettings::default()).await
            })
        };

        progress.wait_for(|p| *p > 0).await.unwrap();
        let temp_files = || std::fs::read_dir(&config.temp_dir).unwrap().count();
        assert_eq!(temp_files(), 1);

        controller.cancel();
        assert_eq!(task.await.unwrap(), JobOutcome::Cancelled);
        assert_eq!(temp_files(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Progress fractions stay inside [0, 1] whatever ffmpeg prints
        #[test]
        fn test_progress_fraction_bounded(micros in 0i64..i64::MAX / 2, duration in 0.001f64..100_000.0) {
            let line = format!("out_time_us={}", micros);
            let fraction = parse_progress_line(&line, duration).unwrap();
            prop_assert!((0.0..=1.0).contains(&fraction));
        }

        /// Letterboxing keeps the requested box even-sized
        #[test]
        fn test_scale_filter_even(w in 1u32..8000, h in 1u32..8000) {
            let filter = CommandBuilder::scale_filter(Some(w), Some(h)).unwrap();
            let w_even = (w - w % 2).max(2);
            let h_even = (h - h % 2).max(2);
            let expected = format!("scale={}:{}:", w_even, h_even);
            prop_assert!(filter.starts_with(&expected));
        }
    }
}
