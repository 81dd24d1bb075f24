//! An in-process execution service over an [`ObjectStore`].
//!
//! Map output is partitioned by `ihash(key) % shards`; each shard is
//! sorted, grouped by key and reduced on the blocking pool, then written
//! as `<destination>output-<shard>`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use itertools::Itertools;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ExecutionReport, ExecutionService, InputDescriptor, Submission};
use crate::error::{ExecutionError, MalformedRecordError};
use crate::storage::{Locator, ObjectStore};
use crate::*;

// types related to this engine
type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

/// Runs every input object through the map function and partitions the
/// pairs into `num_shards` buckets.
///
/// Returns the buckets and the number of malformed records skipped.
pub fn perform_map(
    engine: &Workload,
    inputs: Vec<KeyValue>,
    serialized_args: &Bytes,
    num_shards: u32,
) -> Result<(Buckets, u64)> {
    let buckets: Buckets = Buckets::new();
    let mut malformed = 0;
    let map_func = engine.map_fn;

    for input_kv in inputs {
        let object = String::from_utf8_lossy(&input_kv.key).into_owned();
        for item in map_func(input_kv, serialized_args.clone())? {
            let KeyValue { key, value } = match item {
                Ok(kv) => kv,
                Err(e) => match e.downcast_ref::<MalformedRecordError>() {
                    Some(bad) => {
                        debug!(%object, "skipping record: {}", bad);
                        malformed += 1;
                        continue;
                    }
                    None => return Err(e),
                },
            };
            let bucket_no = ihash(&key) % num_shards;

            #[allow(clippy::unwrap_or_default)]
            buckets
                .entry(bucket_no)
                .or_insert(Vec::new())
                .push(KeyValue { key, value });
        }
    }

    Ok((buckets, malformed))
}

/// Reduces one bucket: keys in ascending order, one reduce call per key.
pub fn perform_reduce(
    engine: &Workload,
    serialized_args: &Bytes,
    mut bkt: Vec<KeyValue>,
) -> Result<Reduction> {
    let reduce_func = engine.reduce_fn;
    let mut writer = BytesMut::new();
    let mut malformed = 0;

    bkt.sort_unstable_by_key(KeyValue::key);
    for (key, value_group) in &bkt.into_iter().chunk_by(KeyValue::key) {
        let iter = value_group.map(KeyValue::into_value);
        let out = reduce_func(key.clone(), Box::new(iter), serialized_args.clone())?;
        writer.put(out.output);
        malformed += out.malformed;
    }

    Ok(Reduction {
        output: writer.freeze(),
        malformed,
    })
}

/// Runs stages inside this process, reading and writing `store`.
#[derive(Clone)]
pub struct LocalExecutor {
    store: Arc<dyn ObjectStore>,
}

impl LocalExecutor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Keys of every object the stage reads.
    async fn resolve(&self, input: &InputDescriptor) -> Result<Vec<String>, ExecutionError> {
        match input {
            InputDescriptor::ArchiveOfTextFiles { archive } => {
                let prefix = self.store.key_of(archive).map_err(|e| unreadable(archive, e))?;
                let keys = self
                    .store
                    .list(prefix)
                    .await
                    .map_err(|e| unreadable(archive, e))?;
                if keys.is_empty() {
                    return Err(ExecutionError::EmptyInput(archive.to_string()));
                }
                Ok(keys)
            }
            InputDescriptor::ObjectPathSet { objects } => {
                if objects.is_empty() {
                    return Err(ExecutionError::EmptyInput("empty object set".to_owned()));
                }
                objects
                    .iter()
                    .map(|locator| {
                        self.store
                            .key_of(locator)
                            .map(str::to_owned)
                            .map_err(|e| unreadable(locator, e))
                    })
                    .collect()
            }
        }
    }
}

fn unreadable(locator: &Locator, reason: impl ToString) -> ExecutionError {
    ExecutionError::UnreadableInput {
        locator: locator.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ExecutionService for LocalExecutor {
    async fn submit(&self, submission: Submission) -> Result<ExecutionReport, ExecutionError> {
        let Submission {
            spec,
            input,
            output,
        } = submission;
        let stage = spec.name;
        let failed = |source: anyhow::Error| ExecutionError::Stage {
            stage: stage.to_owned(),
            source,
        };

        let mut inputs = Vec::new();
        for key in self.resolve(&input).await? {
            let body = self
                .store
                .get(&key)
                .await
                .map_err(|e| unreadable(&self.store.locator(&key), e))?;
            inputs.push(KeyValue::new(Bytes::from(key), body));
        }
        info!(stage, objects = inputs.len(), shards = spec.shards, "map started");

        let aux = spec.aux().map_err(failed)?;
        let workload = spec.workload;
        let shards = spec.shards.max(1);

        let map_args = aux.clone();
        let (buckets, mut malformed) =
            tokio::task::spawn_blocking(move || perform_map(&workload, inputs, &map_args, shards))
                .await
                .map_err(|e| failed(e.into()))?
                .map_err(failed)?;

        let mut tasks = JoinSet::new();
        for (shard, bkt) in buckets {
            let aux = aux.clone();
            tasks.spawn_blocking(move || (shard, perform_reduce(&workload, &aux, bkt)));
        }
        let mut reduced = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (shard, reduction) = joined.map_err(|e| failed(e.into()))?;
            let reduction = reduction.map_err(failed)?;
            malformed += reduction.malformed;
            reduced.push((shard, reduction.output));
        }
        reduced.sort_unstable_by_key(|(shard, _)| *shard);
        // A stage whose map emitted nothing still yields one (empty) report.
        if reduced.is_empty() {
            reduced.push((0, Bytes::new()));
        }

        let prefix = self
            .store
            .key_of(&output.destination)
            .map_err(|e| ExecutionError::UnwritableOutput {
                destination: output.destination.to_string(),
                reason: e.to_string(),
            })?;
        let prefix = if prefix.ends_with('/') {
            prefix.to_owned()
        } else {
            format!("{}/", prefix)
        };

        let mut outputs = Vec::with_capacity(reduced.len());
        for (shard, body) in reduced {
            let key = format!("{}output-{}", prefix, shard);
            self.store
                .put(&key, body, output.content_type)
                .await
                .map_err(|e| ExecutionError::UnwritableOutput {
                    destination: key.clone(),
                    reason: e.to_string(),
                })?;
            outputs.push(self.store.locator(&key));
        }

        if malformed > 0 {
            warn!(stage, malformed, "skipped malformed records");
        }
        info!(stage, outputs = outputs.len(), "stage finished");
        Ok(ExecutionReport {
            outputs,
            malformed_records: malformed,
        })
    }
}
