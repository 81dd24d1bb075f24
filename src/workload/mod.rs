//! The report catalog: which MapReduce stages produce which report.
//!
//! # Example
//!
//! ```
//! # use anyhow::Result;
//! use salesmr::config::Config;
//! use salesmr::workload::{Catalog, JobType};
//! # fn main() -> Result<()> {
//! let catalog = Catalog::new(&Config::default());
//! let pipeline = catalog.pipeline(JobType::MostBoughtTogether);
//! assert_eq!(pipeline.stages.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ConfigError;
use crate::Workload;

pub mod co_purchase;
pub mod count;
pub mod revenue;
pub mod transactions;
pub mod wc;

pub const JAZZ: &str = "Jazz";
pub const TEXT_PLAIN: &str = "text/plain";

/// Every report a user can ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    SongSoldNum,
    DollarSong,
    SongArtist,
    DollarArtist,
    JazzSongSoldNum,
    JazzDollarSong,
    JazzSongArtist,
    JazzDollarArtist,
    MostBoughtTogether,
    WordCount,
}

impl JobType {
    pub const ALL: [JobType; 10] = [
        JobType::SongSoldNum,
        JobType::DollarSong,
        JobType::SongArtist,
        JobType::DollarArtist,
        JobType::JazzSongSoldNum,
        JobType::JazzDollarSong,
        JobType::JazzSongArtist,
        JobType::JazzDollarArtist,
        JobType::MostBoughtTogether,
        JobType::WordCount,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            JobType::SongSoldNum => "song-sold-num",
            JobType::DollarSong => "dollar-song",
            JobType::SongArtist => "song-artist",
            JobType::DollarArtist => "dollar-artist",
            JobType::JazzSongSoldNum => "jazz-song-sold-num",
            JobType::JazzDollarSong => "jazz-dollar-song",
            JobType::JazzSongArtist => "jazz-song-artist",
            JobType::JazzDollarArtist => "jazz-dollar-artist",
            JobType::MostBoughtTogether => "most-bought-together",
            JobType::WordCount => "word-count",
        }
    }

    pub fn try_named(name: &str) -> Option<JobType> {
        JobType::ALL.into_iter().find(|job| job.tag() == name)
    }

    pub fn is_two_stage(self) -> bool {
        matches!(self, JobType::MostBoughtTogether)
    }

    /// Genre the report is restricted to, if any.
    pub fn genre(self) -> Option<&'static str> {
        match self {
            JobType::JazzSongSoldNum
            | JobType::JazzDollarSong
            | JobType::JazzSongArtist
            | JobType::JazzDollarArtist => Some(JAZZ),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JobType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::try_named(s).ok_or_else(|| ConfigError::UnknownJob(s.to_owned()))
    }
}

/// Where a stage reads from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// The plaintext member files of an uploaded bundle.
    ArchiveOfTextFiles,
    /// Objects already written by an earlier stage.
    ObjectPathSet,
}

/// Where a stage writes to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputKind {
    ObjectStorage { content_type: &'static str },
}

/// One MapReduce stage, as handed to the execution service.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub name: &'static str,
    pub workload: Workload,
    pub input: InputKind,
    pub output: OutputKind,
    pub shards: u32,
    /// Auxiliary arguments for the map and reduce functions.
    pub args: Vec<String>,
}

impl JobSpec {
    fn new(name: &'static str, workload: Workload, input: InputKind, shards: u32) -> Self {
        Self {
            name,
            workload,
            input,
            output: OutputKind::ObjectStorage {
                content_type: TEXT_PLAIN,
            },
            shards,
            args: Vec::new(),
        }
    }

    fn with_genre(mut self, genre: Option<&str>) -> Self {
        if let Some(genre) = genre {
            self.args = vec!["--genre".to_owned(), genre.to_owned()];
        }
        self
    }

    /// The arguments in the JSON form map and reduce functions receive.
    pub fn aux(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_string(&self.args)?))
    }

    pub fn content_type(&self) -> &'static str {
        match self.output {
            OutputKind::ObjectStorage { content_type } => content_type,
        }
    }
}

/// The ordered stages of one report. A later stage reads the complete
/// output of the stage before it.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub job_type: JobType,
    pub stages: Vec<JobSpec>,
}

/// All reports, built once at start-up and never changed afterwards.
#[derive(Clone, Debug)]
pub struct Catalog {
    pipelines: BTreeMap<JobType, Pipeline>,
}

impl Catalog {
    pub fn new(config: &Config) -> Self {
        let pipelines = JobType::ALL
            .into_iter()
            .map(|job| (job, build_pipeline(job, config.shards_for(job))))
            .collect();
        Self { pipelines }
    }

    pub fn pipeline(&self, job: JobType) -> &Pipeline {
        // Every JobType is inserted by `new`.
        &self.pipelines[&job]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }
}

fn build_pipeline(job: JobType, shards: u32) -> Pipeline {
    use InputKind::*;

    let plan = match job {
        JobType::SongSoldNum | JobType::JazzSongSoldNum => {
            vec![(job.tag(), SONG_COUNT, ArchiveOfTextFiles)]
        }
        JobType::SongArtist | JobType::JazzSongArtist => {
            vec![(job.tag(), ARTIST_COUNT, ArchiveOfTextFiles)]
        }
        JobType::DollarSong | JobType::JazzDollarSong => {
            vec![(job.tag(), SONG_REVENUE, ArchiveOfTextFiles)]
        }
        JobType::DollarArtist | JobType::JazzDollarArtist => {
            vec![(job.tag(), ARTIST_REVENUE, ArchiveOfTextFiles)]
        }
        JobType::WordCount => vec![(job.tag(), WORD_COUNT, ArchiveOfTextFiles)],
        JobType::MostBoughtTogether => vec![
            ("songs-same-time", SONGS_SAME_TIME, ArchiveOfTextFiles),
            ("most-bought-together", MOST_BOUGHT_TOGETHER, ObjectPathSet),
        ],
    };

    let stages = plan
        .into_iter()
        .map(|(name, workload, input)| {
            JobSpec::new(name, workload, input, shards).with_genre(job.genre())
        })
        .collect();
    Pipeline { job_type: job, stages }
}

const SONG_COUNT: Workload = Workload {
    map_fn: count::map_song,
    reduce_fn: count::reduce_song,
};
const ARTIST_COUNT: Workload = Workload {
    map_fn: count::map_artist,
    reduce_fn: count::reduce_artist,
};
const SONG_REVENUE: Workload = Workload {
    map_fn: revenue::map_song,
    reduce_fn: revenue::reduce_song,
};
const ARTIST_REVENUE: Workload = Workload {
    map_fn: revenue::map_artist,
    reduce_fn: revenue::reduce_artist,
};
const SONGS_SAME_TIME: Workload = Workload {
    map_fn: co_purchase::map_stage_one,
    reduce_fn: co_purchase::reduce_stage_one,
};
const MOST_BOUGHT_TOGETHER: Workload = Workload {
    map_fn: co_purchase::map_stage_two,
    reduce_fn: co_purchase::reduce_stage_two,
};
const WORD_COUNT: Workload = Workload {
    map_fn: wc::map,
    reduce_fn: wc::reduce,
};

/// Gets the [`Workload`] of the stage named `name`.
///
/// Genre-restricted reports share the workload of their unrestricted
/// counterpart.
///
/// Returns [`None`] if no stage with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "song-sold-num" | "jazz-song-sold-num" => Some(SONG_COUNT),
        "song-artist" | "jazz-song-artist" => Some(ARTIST_COUNT),
        "dollar-song" | "jazz-dollar-song" => Some(SONG_REVENUE),
        "dollar-artist" | "jazz-dollar-artist" => Some(ARTIST_REVENUE),
        "songs-same-time" => Some(SONGS_SAME_TIME),
        "most-bought-together" => Some(MOST_BOUGHT_TOGETHER),
        "word-count" => Some(WORD_COUNT),
        _ => None,
    }
}

/// Gets the [`Workload`] of the stage named `name`.
///
/// Returns an [`anyhow::Error`] if no stage with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No stage named `{}` found.", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for job in JobType::ALL {
            assert_eq!(job.tag().parse::<JobType>().unwrap(), job);
            assert_eq!(
                serde_json::to_string(&job).unwrap(),
                format!("\"{}\"", job.tag())
            );
        }
        assert!("grep".parse::<JobType>().is_err());
    }

    #[test]
    fn every_job_has_stages() {
        let catalog = Catalog::new(&Config::default());
        for job in JobType::ALL {
            let pipeline = catalog.pipeline(job);
            let expected = if job.is_two_stage() { 2 } else { 1 };
            assert_eq!(pipeline.stages.len(), expected, "{job}");
        }
    }

    #[test]
    fn co_purchase_chains_stage_output() {
        let catalog = Catalog::new(&Config::default());
        let stages = &catalog.pipeline(JobType::MostBoughtTogether).stages;
        assert_eq!(stages[0].input, InputKind::ArchiveOfTextFiles);
        assert_eq!(stages[1].input, InputKind::ObjectPathSet);
        assert!(stages.iter().all(|s| s.shards == 4));
    }

    #[test]
    fn jazz_variants_carry_genre_args() {
        let catalog = Catalog::new(&Config::default());
        let spec = &catalog.pipeline(JobType::JazzDollarArtist).stages[0];
        assert_eq!(spec.args, vec!["--genre", "Jazz"]);
        assert_eq!(spec.shards, 16);
        assert_eq!(spec.content_type(), TEXT_PLAIN);
        assert!(catalog.pipeline(JobType::DollarArtist).stages[0].args.is_empty());
    }

    #[test]
    fn unknown_stage() {
        assert!(try_named("mm-one").is_none());
        assert!(named("mm-one").is_err());
    }
}
