//! Records where a finished report was written.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::MAX_OUTPUT_SLOTS;
use crate::error::LinkError;
use crate::metadata::{MetadataStore, UploadKey, UploadRecord};
use crate::storage::Locator;
use crate::workload::JobType;

/// What [`ResultLinker::link_outputs`] stored, and what did not fit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub job_type: JobType,
    pub linked: Vec<Locator>,
    /// Locators past the slot cap, in shard order.
    pub dropped: Vec<Locator>,
}

impl LinkReport {
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

pub struct ResultLinker {
    metadata: Arc<dyn MetadataStore>,
    max_slots: usize,
}

impl ResultLinker {
    pub fn new(metadata: Arc<dyn MetadataStore>, max_slots: usize) -> Self {
        Self {
            metadata,
            max_slots: max_slots.clamp(1, MAX_OUTPUT_SLOTS),
        }
    }

    /// Replaces the output slots of `job` on the record `key` with the
    /// first locators of `outputs`.
    ///
    /// Slots of other job types are left alone. Locators beyond the cap
    /// are not stored; they are returned in [`LinkReport::dropped`].
    pub fn link_outputs(
        &self,
        job: JobType,
        key: &UploadKey,
        outputs: &[Locator],
    ) -> Result<LinkReport, LinkError> {
        if outputs.is_empty() {
            return Err(LinkError::NoOutputs(job));
        }

        let (linked, dropped) = outputs.split_at(outputs.len().min(self.max_slots));
        self.metadata.update(key, &mut |record: &mut UploadRecord| {
            record.set_outputs(job, linked.to_vec())
        })?;

        if !dropped.is_empty() {
            warn!(
                %job,
                record = %key,
                linked = linked.len(),
                dropped = dropped.len(),
                "more output shards than slots, extra shards not linked"
            );
        }
        info!(%job, record = %key, slots = linked.len(), "linked outputs");

        Ok(LinkReport {
            job_type: job,
            linked: linked.to_vec(),
            dropped: dropped.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::error::RecordNotFoundError;
    use crate::metadata::InMemoryMetadataStore;

    fn setup() -> (Arc<InMemoryMetadataStore>, UploadKey) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let key = UploadKey::new("ann@example.com", Utc::now(), "blob");
        store
            .insert(UploadRecord {
                key: key.clone(),
                owner: "ann@example.com".to_owned(),
                filename: "logs.zip".to_owned(),
                uploaded_on: Utc::now(),
                source: "uploaded by user".to_owned(),
                blob_key: "blob".to_owned(),
                input: Locator::new("b", "uploads/blob/"),
                outputs: BTreeMap::new(),
            })
            .unwrap();
        (store, key)
    }

    fn shards(stage: &str, n: usize) -> Vec<Locator> {
        (0..n)
            .map(|i| Locator::new("b", &format!("{stage}/run/output-{i}")))
            .collect()
    }

    #[test]
    fn fills_slots_in_order() {
        let (store, key) = setup();
        let linker = ResultLinker::new(store.clone(), 4);
        let outputs = shards("song-sold-num", 3);

        let report = linker.link_outputs(JobType::SongSoldNum, &key, &outputs).unwrap();
        assert!(report.is_complete());
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.outputs_for(JobType::SongSoldNum), outputs.as_slice());
    }

    #[test]
    fn overflow_is_reported() {
        let (store, key) = setup();
        let linker = ResultLinker::new(store.clone(), 4);
        let outputs = shards("dollar-song", 5);

        let report = linker.link_outputs(JobType::DollarSong, &key, &outputs).unwrap();
        assert_eq!(report.linked, outputs[..4]);
        assert_eq!(report.dropped, outputs[4..]);
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.outputs_for(JobType::DollarSong).len(), 4);
    }

    #[test]
    fn relinking_replaces_only_that_job() {
        let (store, key) = setup();
        let linker = ResultLinker::new(store.clone(), 4);
        let artist = shards("song-artist", 2);
        linker.link_outputs(JobType::SongArtist, &key, &artist).unwrap();
        linker
            .link_outputs(JobType::SongSoldNum, &key, &shards("song-sold-num", 3))
            .unwrap();
        let fresh = shards("song-sold-num-again", 1);
        linker.link_outputs(JobType::SongSoldNum, &key, &fresh).unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.outputs_for(JobType::SongSoldNum), fresh.as_slice());
        assert_eq!(record.outputs_for(JobType::SongArtist), artist.as_slice());
    }

    #[test]
    fn linking_is_idempotent() {
        let (store, key) = setup();
        let linker = ResultLinker::new(store.clone(), 4);
        let outputs = shards("word-count", 2);
        linker.link_outputs(JobType::WordCount, &key, &outputs).unwrap();
        let once = store.get(&key).unwrap();
        linker.link_outputs(JobType::WordCount, &key, &outputs).unwrap();
        assert_eq!(store.get(&key).unwrap(), once);
    }

    #[test]
    fn errors() {
        let (store, key) = setup();
        let linker = ResultLinker::new(store, 4);
        assert!(matches!(
            linker.link_outputs(JobType::WordCount, &key, &[]),
            Err(LinkError::NoOutputs(JobType::WordCount))
        ));

        let missing = UploadKey::from("bob@example.com..x..y");
        match linker.link_outputs(JobType::WordCount, &missing, &shards("word-count", 1)) {
            Err(LinkError::RecordNotFound(RecordNotFoundError(k))) => assert_eq!(k, missing),
            other => panic!("unexpected {:?}", other),
        }
    }
}
