//! Command-line surface and service wiring of the `salesmr` binary.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use glob::glob;

use crate::config::{Config, StorageConfig};
use crate::execution::LocalExecutor;
use crate::metadata::{JsonFileMetadataStore, MetadataStore, DEFAULT_PAGE};
use crate::pipeline::Orchestrator;
use crate::storage::{LocalObjectStore, ObjectStore, S3ObjectStore};
use crate::workload::{Catalog, JobType};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Bucket every locator is rooted in
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Keep objects and metadata under this directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a bundle of transaction logs for later reports
    Upload {
        /// Glob spec for the member files of the bundle
        #[arg(short, long)]
        input: String,

        /// E-mail address of the uploading user
        #[arg(short, long)]
        owner: String,

        /// Display name of the bundle
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Run a report over an uploaded bundle and link its output
    Run {
        /// Key of the upload record
        #[arg(short, long)]
        upload: String,

        /// Report to run
        #[arg(short, long)]
        job: JobType,
    },
    /// List the uploads of one user, oldest first
    List {
        #[arg(short, long)]
        owner: String,

        #[arg(short, long, default_value_t = DEFAULT_PAGE)]
        limit: usize,
    },
    /// Print the linked output of a finished report
    Show {
        #[arg(short, long)]
        upload: String,

        #[arg(short, long)]
        job: JobType,
    },
    /// List the available reports and their stages
    Jobs,
}

impl Args {
    /// The configuration file, if any, with command-line overrides
    /// applied.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.storage = StorageConfig::Local { root: dir.clone() };
            config.metadata_path = dir.join("metadata.json");
        }
        config.validate()?;
        Ok(config)
    }
}

/// Reads every file matched by `pattern` as `(member name, contents)`.
///
/// A member is named by its path below the pattern's literal directory
/// prefix, so `logs/*/week.tsv` yields `a/week.tsv` and `b/week.tsv`.
pub fn read_bundle(pattern: &str) -> Result<Vec<(String, Bytes)>> {
    let base = literal_base(pattern);
    let mut files = Vec::new();
    for pathspec in glob(pattern)?.flatten() {
        if !pathspec.is_file() {
            continue;
        }
        let name = member_name(&base, &pathspec)
            .with_context(|| format!("no file name in {}", pathspec.display()))?;
        let body = std::fs::read(&pathspec)
            .with_context(|| format!("failed to read {}", pathspec.display()))?;
        files.push((name, Bytes::from(body)));
    }
    Ok(files)
}

/// The leading directories of `pattern` that hold no glob
/// metacharacters. `.` components are left out, as glob drops them.
fn literal_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let mut components = Path::new(pattern).components().peekable();
    while let Some(component) = components.next() {
        // The last component names files, never the base.
        if components.peek().is_none()
            || component.as_os_str().to_string_lossy().contains(['*', '?', '['])
        {
            break;
        }
        if component != Component::CurDir {
            base.push(component);
        }
    }
    base
}

fn member_name(base: &Path, path: &Path) -> Option<String> {
    let path: PathBuf = path
        .components()
        .filter(|c| *c != Component::CurDir)
        .collect();
    let relative = path.strip_prefix(base).ok()?;
    let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!name.is_empty()).then_some(name)
}

/// Everything a command needs, built from one [`Config`].
pub struct Services {
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub orchestrator: Orchestrator,
}

impl Services {
    pub async fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &config.storage {
            StorageConfig::Local { root } => {
                Arc::new(LocalObjectStore::new(root.clone(), config.bucket.clone()))
            }
            StorageConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                region,
            } => {
                let s3 =
                    S3ObjectStore::connect(endpoint, access_key, secret_key, region, &config.bucket)
                        .await;
                s3.ensure_bucket().await?;
                Arc::new(s3)
            }
        };
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(JsonFileMetadataStore::open(config.metadata_path.clone())?);

        let orchestrator = Orchestrator::new(
            Catalog::new(&config),
            Arc::new(LocalExecutor::new(store.clone())),
            metadata.clone(),
            config.max_output_slots,
            config.bucket.clone(),
        );

        Ok(Self {
            config,
            store,
            metadata,
            orchestrator,
        })
    }

    /// Explains what `show` leaves out when `job` writes more output
    /// shards than an upload has slots for.
    pub fn coverage_note(&self, job: JobType) -> Option<String> {
        let shards = self.orchestrator.catalog().pipeline(job).stages.last()?.shards as usize;
        let slots = self.config.max_output_slots;
        (shards > slots).then(|| {
            format!(
                "{} writes up to {} output shards and only {} are linked; keys hashed to the others are not shown",
                job, shards, slots
            )
        })
    }
}
