//! Upload metadata: who uploaded which bundle, and where each report of
//! that bundle was written.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::info;
use uuid::Uuid;

use crate::error::{MetadataError, RecordNotFoundError, UploadError};
use crate::storage::{Locator, ObjectStore};
use crate::workload::{JobType, TEXT_PLAIN};

/// Separates owner, upload time and blob key inside an [`UploadKey`].
/// Owners are e-mail addresses, which cannot contain it.
const SEP: &str = "..";
/// Sorts directly after every `<owner>..` key.
const NEXT: &str = "./";

/// Records shown per listing page unless asked otherwise.
pub const DEFAULT_PAGE: usize = 10;

pub const UPLOADED_BY_USER: &str = "uploaded by user";

/// `<owner>..<uploaded-on>..<blob-key>`; keys of one owner sort by
/// upload time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadKey(String);

impl UploadKey {
    pub fn new(owner: &str, uploaded_on: DateTime<Utc>, blob_key: &str) -> Self {
        UploadKey(format!(
            "{owner}{SEP}{}{SEP}{blob_key}",
            uploaded_on.format("%Y-%m-%dT%H:%M:%S%.6fZ")
        ))
    }

    /// Lower bound of every key `owner` could hold.
    pub fn first_for_owner(owner: &str) -> Self {
        UploadKey(format!("{owner}{SEP}"))
    }

    /// Upper bound of every key `owner` could hold.
    pub fn last_for_owner(owner: &str) -> Self {
        UploadKey(format!("{owner}{NEXT}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.0.split(SEP).next().unwrap_or_default()
    }

    fn belongs_to(&self, owner: &str) -> bool {
        *self > Self::first_for_owner(owner) && *self < Self::last_for_owner(owner)
    }
}

impl From<String> for UploadKey {
    fn from(s: String) -> Self {
        UploadKey(s)
    }
}

impl From<&str> for UploadKey {
    fn from(s: &str) -> Self {
        UploadKey(s.to_owned())
    }
}

impl fmt::Display for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub key: UploadKey,
    pub owner: String,
    pub filename: String,
    pub uploaded_on: DateTime<Utc>,
    pub source: String,
    pub blob_key: String,
    /// Prefix holding the plaintext member files of the bundle.
    pub input: Locator,
    /// Output locators per report, at most the configured slot count.
    #[serde(default)]
    pub outputs: BTreeMap<JobType, Vec<Locator>>,
}

impl UploadRecord {
    pub fn outputs_for(&self, job: JobType) -> &[Locator] {
        self.outputs.get(&job).map(Vec::as_slice).unwrap_or_default()
    }

    /// Replaces the whole slot set of `job`.
    pub fn set_outputs(&mut self, job: JobType, outputs: Vec<Locator>) {
        self.outputs.insert(job, outputs);
    }
}

/// Keyed storage of [`UploadRecord`]s.
///
/// `update` runs `apply` and stores its result as one step: concurrent
/// updates of the same record never interleave.
pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &UploadKey) -> Result<Option<UploadRecord>, MetadataError>;

    fn insert(&self, record: UploadRecord) -> Result<(), MetadataError>;

    fn update(
        &self,
        key: &UploadKey,
        apply: &mut dyn FnMut(&mut UploadRecord),
    ) -> Result<UploadRecord, MetadataError>;

    /// Up to `limit` records of `owner`, oldest first.
    fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<UploadRecord>, MetadataError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: DashMap<UploadKey, UploadRecord>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &UploadKey) -> Result<Option<UploadRecord>, MetadataError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn insert(&self, record: UploadRecord) -> Result<(), MetadataError> {
        match self.records.entry(record.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MetadataError::Duplicate(record.key)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn update(
        &self,
        key: &UploadKey,
        apply: &mut dyn FnMut(&mut UploadRecord),
    ) -> Result<UploadRecord, MetadataError> {
        // The entry guard holds the shard lock until `apply` is done.
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| RecordNotFoundError(key.clone()))?;
        apply(record.value_mut());
        Ok(record.value().clone())
    }

    fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<UploadRecord>, MetadataError> {
        let mut records: Vec<UploadRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().belongs_to(owner))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records.truncate(limit);
        Ok(records)
    }
}

/// Records kept in memory and rewritten to a JSON file on every change.
#[derive(Debug)]
pub struct JsonFileMetadataStore {
    path: PathBuf,
    records: Mutex<BTreeMap<UploadKey, UploadRecord>>,
}

impl JsonFileMetadataStore {
    /// Loads `path`, or starts empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let list: Vec<UploadRecord> =
                    serde_json::from_str(&text).map_err(|e| persist_error(&path, e))?;
                list.into_iter().map(|r| (r.key.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(persist_error(&path, e)),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &BTreeMap<UploadKey, UploadRecord>) -> Result<(), MetadataError> {
        let list: Vec<&UploadRecord> = records.values().collect();
        let text = serde_json::to_string_pretty(&list).map_err(|e| persist_error(&self.path, e))?;
        blocking(|| {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let staging = self.path.with_extension("json.partial");
            std::fs::write(&staging, text)?;
            std::fs::rename(&staging, &self.path)
        })
        .map_err(|e| persist_error(&self.path, e))
    }
}

/// Runs blocking file I/O. On a multi-threaded runtime the worker hands
/// its other tasks off first; a current-thread runtime cannot do that.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn persist_error(path: &Path, e: impl fmt::Display) -> MetadataError {
    MetadataError::Persist {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl MetadataStore for JsonFileMetadataStore {
    fn get(&self, key: &UploadKey) -> Result<Option<UploadRecord>, MetadataError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn insert(&self, record: UploadRecord) -> Result<(), MetadataError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.key) {
            return Err(MetadataError::Duplicate(record.key));
        }
        let key = record.key.clone();
        records.insert(key.clone(), record);
        if let Err(e) = self.persist(&records) {
            records.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    fn update(
        &self,
        key: &UploadKey,
        apply: &mut dyn FnMut(&mut UploadRecord),
    ) -> Result<UploadRecord, MetadataError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = records
            .get(key)
            .cloned()
            .ok_or_else(|| RecordNotFoundError(key.clone()))?;

        let mut updated = previous.clone();
        apply(&mut updated);
        records.insert(key.clone(), updated.clone());
        if let Err(e) = self.persist(&records) {
            records.insert(key.clone(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<UploadRecord>, MetadataError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let range = UploadKey::first_for_owner(owner)..UploadKey::last_for_owner(owner);
        Ok(records
            .range(range)
            .map(|(_, record)| record.clone())
            .take(limit)
            .collect())
    }
}

/// Replaces every `.zip` member with the files inside it, keyed by their
/// path within the archive. Directories are skipped.
pub fn unpack_members(files: Vec<(String, Bytes)>) -> Result<Vec<(String, Bytes)>, UploadError> {
    let mut members = Vec::with_capacity(files.len());
    for (name, body) in files {
        if !name.to_ascii_lowercase().ends_with(".zip") {
            members.push((name, body));
            continue;
        }

        let archive_error = |reason: String| UploadError::Archive {
            name: name.clone(),
            reason,
        };
        let mut archive =
            zip::ZipArchive::new(Cursor::new(body)).map_err(|e| archive_error(e.to_string()))?;
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| archive_error(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let path = file
                .enclosed_name()
                .ok_or_else(|| archive_error(format!("unsafe member path `{}`", file.name())))?;
            let member = path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| archive_error(e.to_string()))?;
            members.push((member, Bytes::from(buf)));
        }
    }
    Ok(members)
}

/// Stores the member files of an uploaded bundle under
/// `uploads/<blob-key>/` and records the upload. Zip archives among the
/// members are unpacked first, see [`unpack_members`].
pub async fn register_upload(
    store: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    owner: &str,
    filename: &str,
    files: Vec<(String, Bytes)>,
) -> Result<UploadRecord, UploadError> {
    let files = unpack_members(files)?;
    if files.is_empty() {
        return Err(UploadError::Empty(filename.to_owned()));
    }
    let mut names = BTreeSet::new();
    for (name, _) in &files {
        if !names.insert(name.as_str()) {
            return Err(UploadError::DuplicateMember(name.clone()));
        }
    }

    let blob_key = Uuid::new_v4().simple().to_string();
    let prefix = format!("uploads/{}/", blob_key);
    for (name, body) in files {
        store
            .put(&format!("{}{}", prefix, name), body, TEXT_PLAIN)
            .await?;
    }

    let uploaded_on = Utc::now();
    let record = UploadRecord {
        key: UploadKey::new(owner, uploaded_on, &blob_key),
        owner: owner.to_owned(),
        filename: filename.to_owned(),
        uploaded_on,
        source: UPLOADED_BY_USER.to_owned(),
        blob_key,
        input: store.locator(&prefix),
        outputs: BTreeMap::new(),
    };
    metadata.insert(record.clone())?;
    info!(key = %record.key, input = %record.input, "registered upload");
    Ok(record)
}
