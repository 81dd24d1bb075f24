//! Error types shared by the jobs, the execution seam and the linker.

use thiserror::Error;

use crate::metadata::UploadKey;
use crate::workload::JobType;

/// A single input record (or reduce value) that cannot be interpreted.
///
/// Map and reduce functions surface this per record; the execution
/// engine skips the record, counts it, and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    #[error("record has {found} fields, at least {required} required: {record:?}")]
    MissingFields {
        required: usize,
        found: usize,
        record: String,
    },
    #[error("field {field} is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },
    #[error("record is not valid UTF-8")]
    Encoding,
}

/// A stage the execution service could not complete.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("input {locator} is unreadable: {reason}")]
    UnreadableInput { locator: String, reason: String },
    #[error("input {0} holds no objects")]
    EmptyInput(String),
    #[error("output {destination} is unwritable: {reason}")]
    UnwritableOutput { destination: String, reason: String },
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The upload metadata record referenced at link time does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upload record {0} not found")]
pub struct RecordNotFoundError(pub UploadKey);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    RecordNotFound(#[from] RecordNotFoundError),
    #[error("job {0} finished without output locators")]
    NoOutputs(JobType),
    #[error("metadata store failure: {0}")]
    Store(String),
}

/// Failures of the upload metadata store.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    NotFound(#[from] RecordNotFoundError),
    #[error("upload record {0} already exists")]
    Duplicate(UploadKey),
    #[error("metadata file {path}: {reason}")]
    Persist { path: String, reason: String },
}

impl From<MetadataError> for LinkError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(missing) => LinkError::RecordNotFound(missing),
            other => LinkError::Store(other.to_string()),
        }
    }
}

/// Failures of an object store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("`{0}` is not a /<bucket>/<key> locator")]
    InvalidLocator(String),
    #[error("locator {locator} is outside bucket {bucket}")]
    ForeignLocator { locator: String, bucket: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown job type `{0}`")]
    UnknownJob(String),
    #[error("shard count for {0} must be positive")]
    ZeroShards(String),
    #[error("max_output_slots must be between 1 and {max}, got {found}")]
    SlotCap { found: usize, max: usize },
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a job run ended in the failed state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("illegal run transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload {0} contains no files")]
    Empty(String),
    #[error("cannot unpack {name}: {reason}")]
    Archive { name: String, reason: String },
    #[error("more than one member file is named {0}")]
    DuplicateMember(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}
