//! Drives one report from its first stage to linked output.
//!
//! A run moves `Pending -> Stage1Running [-> Stage2Running] -> Linking
//! -> Done`; any running state may fall to `Failed`, after which nothing
//! is linked.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{MetadataError, PipelineError, RecordNotFoundError};
use crate::execution::{ExecutionService, InputDescriptor, OutputDescriptor, Submission};
use crate::linker::{LinkReport, ResultLinker};
use crate::metadata::{MetadataStore, UploadKey};
use crate::storage::Locator;
use crate::workload::{Catalog, JobType};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Pending,
    Stage1Running,
    Stage2Running,
    Linking,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    fn running(stage: usize) -> Option<RunState> {
        match stage {
            0 => Some(RunState::Stage1Running),
            1 => Some(RunState::Stage2Running),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one finished stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub name: &'static str,
    pub outputs: Vec<Locator>,
    pub malformed_records: u64,
}

/// One execution of a report for one upload.
#[derive(Clone, Debug, Serialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_type: JobType,
    pub upload: UploadKey,
    state: RunState,
    history: Vec<(RunState, DateTime<Utc>)>,
    pub stages: Vec<StageReport>,
    pub link: Option<LinkReport>,
}

impl JobRun {
    pub fn new(job_type: JobType, upload: UploadKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            upload,
            state: RunState::Pending,
            history: vec![(RunState::Pending, Utc::now())],
            stages: Vec::new(),
            link: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, with the time it was entered.
    pub fn history(&self) -> &[(RunState, DateTime<Utc>)] {
        &self.history
    }

    pub fn malformed_records(&self) -> u64 {
        self.stages.iter().map(|s| s.malformed_records).sum()
    }

    fn can_enter(&self, to: RunState) -> bool {
        use RunState::*;
        match (self.state, to) {
            (Pending, Stage1Running) => true,
            (Stage1Running, Stage2Running) => self.job_type.is_two_stage(),
            (Stage1Running, Linking) => !self.job_type.is_two_stage(),
            (Stage2Running, Linking) => true,
            (Linking, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(&mut self, to: RunState) -> Result<(), PipelineError> {
        if !self.can_enter(to) {
            return Err(PipelineError::IllegalTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        info!(run = %self.id, job = %self.job_type, from = %self.state, %to, "run transition");
        self.state = to;
        self.history.push((to, Utc::now()));
        Ok(())
    }
}

/// Runs report pipelines against one execution service and one
/// metadata store. Runs share nothing but those two, so any number may
/// be in flight at once.
pub struct Orchestrator {
    catalog: Catalog,
    executor: Arc<dyn ExecutionService>,
    metadata: Arc<dyn MetadataStore>,
    linker: ResultLinker,
    bucket: String,
}

impl Orchestrator {
    pub fn new(
        catalog: Catalog,
        executor: Arc<dyn ExecutionService>,
        metadata: Arc<dyn MetadataStore>,
        max_output_slots: usize,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            linker: ResultLinker::new(metadata.clone(), max_output_slots),
            executor,
            metadata,
            bucket: bucket.into(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs `job` over the upload `upload` and links its output.
    pub async fn run(&self, job: JobType, upload: &UploadKey) -> Result<JobRun, PipelineError> {
        let mut run = JobRun::new(job, upload.clone());
        self.drive(&mut run).await?;
        Ok(run)
    }

    /// Advances a pending run to `Done`, or to `Failed` on the first
    /// error, which is returned.
    pub async fn drive(&self, run: &mut JobRun) -> Result<(), PipelineError> {
        match self.try_drive(run).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(run = %run.id, job = %run.job_type, "run failed: {}", e);
                if !run.state.is_terminal() {
                    run.transition(RunState::Failed)?;
                }
                Err(e)
            }
        }
    }

    async fn try_drive(&self, run: &mut JobRun) -> Result<(), PipelineError> {
        let record = self
            .metadata
            .get(&run.upload)?
            .ok_or_else(|| MetadataError::NotFound(RecordNotFoundError(run.upload.clone())))?;

        let pipeline = self.catalog.pipeline(run.job_type);
        let mut input = InputDescriptor::ArchiveOfTextFiles {
            archive: record.input,
        };

        for (index, spec) in pipeline.stages.iter().enumerate() {
            let state = RunState::running(index).ok_or_else(|| PipelineError::IllegalTransition {
                from: run.state.to_string(),
                to: format!("stage {}", index + 1),
            })?;
            run.transition(state)?;

            let output = OutputDescriptor {
                destination: Locator::new(&self.bucket, &format!("{}/{}/", spec.name, run.id)),
                content_type: spec.content_type(),
            };
            let report = self
                .executor
                .submit(Submission {
                    spec: spec.clone(),
                    input,
                    output,
                })
                .await?;

            if report.malformed_records > 0 {
                warn!(
                    run = %run.id,
                    stage = spec.name,
                    malformed = report.malformed_records,
                    "stage skipped malformed records"
                );
            }
            input = InputDescriptor::from_outputs(&report.outputs);
            run.stages.push(StageReport {
                name: spec.name,
                outputs: report.outputs,
                malformed_records: report.malformed_records,
            });
        }

        run.transition(RunState::Linking)?;
        let outputs = run
            .stages
            .last()
            .map(|stage| stage.outputs.as_slice())
            .unwrap_or_default();
        let link = self.linker.link_outputs(run.job_type, &run.upload, outputs)?;
        run.link = Some(link);
        run.transition(RunState::Done)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::Config;
    use crate::error::ExecutionError;
    use crate::execution::ExecutionReport;
    use crate::metadata::{InMemoryMetadataStore, UploadRecord};

    /// Answers every submission with a fixed number of outputs, or fails
    /// the stage with the given name.
    struct Scripted {
        outputs: usize,
        fail_stage: Option<&'static str>,
        seen: Mutex<Vec<(&'static str, InputDescriptor)>>,
    }

    #[async_trait]
    impl ExecutionService for Scripted {
        async fn submit(&self, submission: Submission) -> Result<ExecutionReport, ExecutionError> {
            let name = submission.spec.name;
            self.seen
                .lock()
                .unwrap()
                .push((name, submission.input.clone()));
            if self.fail_stage == Some(name) {
                return Err(ExecutionError::Stage {
                    stage: name.to_owned(),
                    source: anyhow::anyhow!("scripted failure"),
                });
            }
            let dest = submission.output.destination;
            Ok(ExecutionReport {
                outputs: (0..self.outputs)
                    .map(|i| Locator::new(dest.bucket(), &format!("{}output-{}", dest.object_key(), i)))
                    .collect(),
                malformed_records: 1,
            })
        }
    }

    fn orchestrator(exec: Arc<Scripted>) -> (Orchestrator, Arc<InMemoryMetadataStore>, UploadKey) {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let key = UploadKey::new("ann@example.com", Utc::now(), "blob");
        metadata
            .insert(UploadRecord {
                key: key.clone(),
                owner: "ann@example.com".to_owned(),
                filename: "logs.zip".to_owned(),
                uploaded_on: Utc::now(),
                source: "uploaded by user".to_owned(),
                blob_key: "blob".to_owned(),
                input: Locator::new("b", "uploads/blob/"),
                outputs: Default::default(),
            })
            .unwrap();
        let orchestrator = Orchestrator::new(
            Catalog::new(&Config::default()),
            exec,
            metadata.clone(),
            4,
            "b",
        );
        (orchestrator, metadata, key)
    }

    fn scripted(outputs: usize, fail_stage: Option<&'static str>) -> Arc<Scripted> {
        Arc::new(Scripted {
            outputs,
            fail_stage,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn states(run: &JobRun) -> Vec<RunState> {
        run.history().iter().map(|(s, _)| *s).collect()
    }

    #[tokio::test]
    async fn single_stage_run() {
        let exec = scripted(2, None);
        let (orchestrator, metadata, key) = orchestrator(exec.clone());

        let run = orchestrator.run(JobType::DollarArtist, &key).await.unwrap();
        use RunState::*;
        assert_eq!(states(&run), vec![Pending, Stage1Running, Linking, Done]);
        assert_eq!(run.malformed_records(), 1);

        let record = metadata.get(&key).unwrap().unwrap();
        assert_eq!(record.outputs_for(JobType::DollarArtist), run.stages[0].outputs.as_slice());
        let seen = exec.seen.lock().unwrap();
        assert_eq!(
            seen[0].1,
            InputDescriptor::ArchiveOfTextFiles {
                archive: Locator::new("b", "uploads/blob/")
            }
        );
    }

    #[tokio::test]
    async fn two_stage_run_chains_outputs() {
        let exec = scripted(3, None);
        let (orchestrator, metadata, key) = orchestrator(exec.clone());

        let run = orchestrator.run(JobType::MostBoughtTogether, &key).await.unwrap();
        use RunState::*;
        assert_eq!(
            states(&run),
            vec![Pending, Stage1Running, Stage2Running, Linking, Done]
        );
        assert_eq!(run.malformed_records(), 2);

        let seen = exec.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "most-bought-together");
        assert_eq!(seen[1].1, InputDescriptor::from_outputs(&run.stages[0].outputs));

        let linked = metadata.get(&key).unwrap().unwrap();
        assert_eq!(
            linked.outputs_for(JobType::MostBoughtTogether),
            run.stages[1].outputs.as_slice()
        );
    }

    #[tokio::test]
    async fn failed_stage_links_nothing() {
        let exec = scripted(3, Some("most-bought-together"));
        let (orchestrator, metadata, key) = orchestrator(exec);

        let mut run = JobRun::new(JobType::MostBoughtTogether, key.clone());
        let result = orchestrator.drive(&mut run).await;
        assert!(matches!(result, Err(PipelineError::Execution(_))));
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.link.is_none());
        assert!(metadata
            .get(&key)
            .unwrap()
            .unwrap()
            .outputs_for(JobType::MostBoughtTogether)
            .is_empty());
    }

    #[tokio::test]
    async fn overflow_reaches_the_run() {
        let exec = scripted(5, None);
        let (orchestrator, _, key) = orchestrator(exec);
        let run = orchestrator.run(JobType::SongSoldNum, &key).await.unwrap();
        let link = run.link.unwrap();
        assert_eq!(link.linked.len(), 4);
        assert_eq!(link.dropped.len(), 1);
    }

    #[tokio::test]
    async fn unknown_upload_fails() {
        let (orchestrator, _, _) = orchestrator(scripted(1, None));
        let missing = UploadKey::from("nobody..x..y");
        let mut run = JobRun::new(JobType::WordCount, missing);
        let result = orchestrator.drive(&mut run).await;
        assert!(matches!(result, Err(PipelineError::Metadata(_))));
        assert_eq!(run.state(), RunState::Failed);
    }

    #[test]
    fn illegal_transitions() {
        let mut run = JobRun::new(JobType::SongSoldNum, UploadKey::from("a..b..c"));
        assert!(run.transition(RunState::Linking).is_err());
        run.transition(RunState::Stage1Running).unwrap();
        assert!(run.transition(RunState::Stage2Running).is_err());
        run.transition(RunState::Linking).unwrap();
        run.transition(RunState::Done).unwrap();
        assert!(run.transition(RunState::Failed).is_err());
    }
}
