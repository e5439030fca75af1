use thiserror::Error;

/// Message shown when a job ends because the user cancelled it
pub const CANCELLED_MESSAGE: &str = "Conversion cancelled";

/// Failures surfaced at the boundary of a single job or a whole batch.
///
/// Everything the engine or the filesystem reports is flattened into one of
/// these, with the full context chain kept in the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// Source unreadable or unparseable
    #[error("Failed to read media information: {0}")]
    Probe(String),

    /// The requested transform leaves nothing to convert
    #[error("Conversion is invalid: {0}")]
    PlanInvalid(String),

    /// Decode/encode failure mid-run
    #[error("Conversion failed: {0}")]
    Execution(String),

    /// The finished buffer could not be written out
    #[error("Failed to save converted file: {0}")]
    Persist(String),

    /// Only used for batch items; single jobs report cancellation as an outcome
    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    #[error("No source file loaded")]
    NoSource,

    #[error("Another conversion is already running")]
    Busy,

    /// The host cannot hand out a writable directory at all
    #[error("Cannot pick an output directory: {0}")]
    CapabilityMissing(String),

    #[error("Permission to write to the output directory was denied: {0}")]
    PermissionDenied(String),

    #[error("Output directory selection was cancelled")]
    SelectionCancelled,
}

impl ConvertError {
    /// Errors that stop a whole batch before any file is touched
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::CapabilityMissing(_)
                | ConvertError::PermissionDenied(_)
                | ConvertError::SelectionCancelled
                | ConvertError::Busy
        )
    }
}
