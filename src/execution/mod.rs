//! The seam between report pipelines and whatever runs MapReduce stages.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::storage::Locator;
use crate::workload::JobSpec;

pub mod engine;

pub use engine::LocalExecutor;

/// What a stage reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputDescriptor {
    /// Every object under the prefix an upload was unpacked to.
    ArchiveOfTextFiles { archive: Locator },
    /// An explicit list of objects, usually the outputs of an earlier stage.
    ObjectPathSet { objects: Vec<Locator> },
}

impl InputDescriptor {
    /// Input of a stage that consumes everything `outputs` names.
    pub fn from_outputs(outputs: &[Locator]) -> Self {
        InputDescriptor::ObjectPathSet {
            objects: outputs.to_vec(),
        }
    }
}

/// Where a stage writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Prefix the shard objects are written under.
    pub destination: Locator,
    pub content_type: &'static str,
}

#[derive(Clone, Debug)]
pub struct Submission {
    pub spec: JobSpec,
    pub input: InputDescriptor,
    pub output: OutputDescriptor,
}

/// Outcome of a finished stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Output shards in shard order.
    pub outputs: Vec<Locator>,
    /// Records skipped because they could not be parsed.
    pub malformed_records: u64,
}

/// Runs one stage to completion.
///
/// An `Ok` report means every output object has been written in full.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn submit(&self, submission: Submission) -> Result<ExecutionReport, ExecutionError>;
}
