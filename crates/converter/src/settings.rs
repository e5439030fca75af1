use std::fmt;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Bitrate reached at quality 100, in bits per second
pub const BITRATE_CEILING: u64 = 5_000_000;

/// Quality used for fresh settings
pub const DEFAULT_QUALITY: u8 = 80;

/// Output container requested by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
}

impl OutputFormat {
    /// Canonical file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    /// Derive the output file name: the input's extension is replaced,
    /// or appended when the input has none.
    pub fn output_filename(&self, input_name: &str) -> String {
        Path::new(input_name)
            .with_extension(self.extension())
            .to_string_lossy()
            .into_owned()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            other => Err(format!("unsupported output format '{}' (expected mp4 or webm)", other)),
        }
    }
}

/// `[start, end]` range of source time selected for conversion, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Options handed to the engine when building a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    /// Target video bitrate in bits per second
    pub bitrate: u64,
    pub trim: Option<TrimWindow>,
}

/// A requested conversion. Each edit produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSettings {
    pub format: OutputFormat,
    /// 1..=100, mapped linearly onto the bitrate ceiling
    pub quality: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp4,
            quality: DEFAULT_QUALITY,
            width: None,
            height: None,
            start_time: None,
            end_time: None,
        }
    }
}

/// Map quality (1..=100) onto a bitrate: `round(quality / 100 * ceiling)`
pub fn bitrate_for_quality(quality: u8, ceiling: u64) -> u64 {
    ((quality as f64 / 100.0) * ceiling as f64).round() as u64
}

impl ConversionSettings {
    /// Effective trim window: `[start_time ?? 0, end_time ?? total_duration]`
    pub fn trim_window(&self, total_duration: f64) -> TrimWindow {
        TrimWindow {
            start: self.start_time.unwrap_or(0.0),
            end: self.end_time.unwrap_or(total_duration),
        }
    }

    /// Length of the effective trim window in seconds
    pub fn trim_duration(&self, total_duration: f64) -> f64 {
        self.trim_window(total_duration).duration()
    }

    pub fn has_trim(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    pub fn bitrate(&self, ceiling: u64) -> u64 {
        bitrate_for_quality(self.quality, ceiling)
    }

    /// Clamp the snapshot into its invariants for a source of `total_duration`
    /// seconds: quality into 1..=100, trim bounds into `[0, total_duration]`
    /// with `start <= end`, and zero dimensions dropped.
    pub fn normalized(&self, total_duration: f64) -> Self {
        let total = total_duration.max(0.0);
        let clamp_time = |t: f64| if t.is_finite() { t.clamp(0.0, total) } else { 0.0 };

        let end_time = self.end_time.map(clamp_time);
        let start_time = self.start_time.map(clamp_time).map(|start| match end_time {
            Some(end) => start.min(end),
            None => start,
        });

        Self {
            format: self.format,
            quality: self.quality.clamp(1, 100),
            width: self.width.filter(|w| *w > 0),
            height: self.height.filter(|h| *h > 0),
            start_time,
            end_time,
        }
    }

    /// Drop a trim window that still covers all of `total_duration`, leaving
    /// settings that apply to a file of any length
    pub fn without_full_trim(&self, total_duration: f64) -> Self {
        let full = self.start_time.unwrap_or(0.0) <= 0.0
            && self.end_time.map_or(true, |end| end >= total_duration);
        if !full {
            return self.clone();
        }
        Self {
            start_time: None,
            end_time: None,
            ..self.clone()
        }
    }

    /// Engine options for a full conversion. The trim is omitted when neither
    /// bound is set.
    pub fn engine_options(&self, total_duration: f64, ceiling: u64) -> EngineOptions {
        EngineOptions {
            target_width: self.width,
            target_height: self.height,
            bitrate: self.bitrate(ceiling),
            trim: self.has_trim().then(|| self.trim_window(total_duration)),
        }
    }

    /// Engine options for a short sample starting at the effective trim start.
    /// The user's end time is ignored; the window is cut at the end of the
    /// source. Returns `None` when nothing is left to sample.
    pub fn sample_options(
        &self,
        total_duration: f64,
        ceiling: u64,
        sample_secs: f64,
    ) -> Option<EngineOptions> {
        let start = self.start_time.unwrap_or(0.0);
        let end = (start + sample_secs).min(total_duration);
        if end <= start {
            return None;
        }

        Some(EngineOptions {
            target_width: self.width,
            target_height: self.height,
            bitrate: self.bitrate(ceiling),
            trim: Some(TrimWindow { start, end }),
        })
    }
}
