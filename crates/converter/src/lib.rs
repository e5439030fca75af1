pub mod batch;
pub mod compat;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod ffprobe;
pub mod job;
pub mod media;
pub mod output;
pub mod preview;
pub mod scan;
pub mod session;
pub mod settings;

#[cfg(test)]
mod testing;

pub use batch::{BatchFileStatus, BatchJobCoordinator, BatchStatus};
pub use compat::{CompatibilityChecker, ServiceCompatibility, ServiceLimit, ServiceTier};
pub use config::ConverterConfig;
pub use engine::{Plan, TranscodeEngine};
pub use error::ConvertError;
pub use ffmpeg::FfmpegEngine;
pub use job::{ConversionJobController, ConversionResult, JobOutcome, JobState};
pub use media::{MediaProbe, SourceFile};
pub use output::{DirectoryPicker, FsDirectoryPicker, OutputDirectory};
pub use preview::{PreviewEstimate, PreviewEstimator};
pub use session::{LoadedSource, Session};
pub use settings::{ConversionSettings, OutputFormat};
