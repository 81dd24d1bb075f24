//! Process-wide settings, read once at start-up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::workload::JobType;

/// Upper bound on output locators linked per job type.
pub const MAX_OUTPUT_SLOTS: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bucket that every locator is rooted in.
    pub bucket: String,
    /// Shards for reports that read the uploaded logs once.
    pub single_stage_shards: u32,
    /// Shards for each stage of the most-bought-together report.
    pub co_purchase_shards: u32,
    /// Per-job shard counts, keyed by job tag.
    pub shard_overrides: BTreeMap<JobType, u32>,
    pub max_output_slots: usize,
    pub storage: StorageConfig,
    /// Backing file of the upload metadata store.
    pub metadata_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum StorageConfig {
    /// Objects live under a local directory, one subdirectory per bucket.
    Local { root: PathBuf },
    /// An S3-compatible service such as MinIO.
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        #[serde(default = "default_region")]
        region: String,
    },
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: "salesmr".to_owned(),
            single_stage_shards: 16,
            co_purchase_shards: 4,
            shard_overrides: BTreeMap::new(),
            max_output_slots: MAX_OUTPUT_SLOTS,
            storage: StorageConfig::Local {
                root: PathBuf::from("./data"),
            },
            metadata_path: PathBuf::from("./data/metadata.json"),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.single_stage_shards == 0 {
            return Err(ConfigError::ZeroShards("single_stage_shards".to_owned()));
        }
        if self.co_purchase_shards == 0 {
            return Err(ConfigError::ZeroShards("co_purchase_shards".to_owned()));
        }
        if let Some((job, _)) = self.shard_overrides.iter().find(|(_, &n)| n == 0) {
            return Err(ConfigError::ZeroShards(job.to_string()));
        }
        if !(1..=MAX_OUTPUT_SLOTS).contains(&self.max_output_slots) {
            return Err(ConfigError::SlotCap {
                found: self.max_output_slots,
                max: MAX_OUTPUT_SLOTS,
            });
        }
        Ok(())
    }

    /// Shard count used for every stage of `job`.
    pub fn shards_for(&self, job: JobType) -> u32 {
        if let Some(&shards) = self.shard_overrides.get(&job) {
            return shards;
        }
        if job.is_two_stage() {
            self.co_purchase_shards
        } else {
            self.single_stage_shards
        }
    }
}
