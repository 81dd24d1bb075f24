//! Batch sales analytics over tab-separated transaction logs.
//!
//! Users upload bundles of transaction logs and pick a report: sales
//! counts and revenue per song or artist (optionally for one genre),
//! the song most often bought together with each song, or a plain
//! word count. Each report is a pipeline of one or two MapReduce
//! stages handed to an [`execution::ExecutionService`]; once the last
//! stage finishes, the [`linker`] records where its output shards live
//! on the upload's metadata record.

use bytes::Bytes;
use std::hash::Hasher;

pub mod config;
pub mod error;
pub mod execution;
pub mod linker;
pub mod metadata;
pub mod pipeline;
pub mod record;
pub mod standalone;
pub mod storage;
pub mod utils;
pub mod workload;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors on individual records; an inner
/// [`error::MalformedRecordError`] is skipped and counted by the engine,
/// anything else fails the stage.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes a key-value pair (object name, object contents)
/// and auxiliary arguments.
///
/// It returns an iterator that yields new key-value pairs.
pub type MapFn = fn(kv: KeyValue, aux: Bytes) -> MapOutput;

/// A reduce function takes in a key, an iterator over every value emitted
/// for that key, and an auxiliary argument. It returns the report lines
/// for the key.
pub type ReduceFn = fn(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    aux: Bytes,
) -> anyhow::Result<Reduction>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload").finish_non_exhaustive()
    }
}

/// The result of one reduce invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reduction {
    /// Report lines, each terminated by `\n`.
    pub output: Bytes,
    /// Values that could not be interpreted and were left out.
    pub malformed: u64,
}

impl Reduction {
    pub fn new(output: Bytes) -> Self {
        Self {
            output,
            malformed: 0,
        }
    }

    /// Report lines without their terminators.
    pub fn lines(&self) -> Result<std::str::Lines<'_>, error::MalformedRecordError> {
        std::str::from_utf8(&self.output)
            .map(str::lines)
            .map_err(|_| error::MalformedRecordError::Encoding)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value.
    pub value: Bytes,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Construct a pair from anything string-like.
    pub fn from_strings(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Bytes::from(key.into()),
            value: Bytes::from(value.into()),
        }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Get the value of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> Bytes {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Hashes an intermediate key. Compute a shard for a given key
/// by calculating `ihash(key) % shards`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    // Masked to 31 bits, so the conversion is lossless.
    (hasher.finish() & 0x7fffffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_stable_and_non_negative() {
        let a = ihash(b"SongX-ArtistY-AlbumZ");
        let b = ihash(b"SongX-ArtistY-AlbumZ");
        assert_eq!(a, b);
        assert!(a <= 0x7fffffff);
        assert_ne!(ihash(b"a"), ihash(b"b"));
    }

    #[test]
    fn undecodable_reduction_is_an_error() {
        let reduction = Reduction::new(Bytes::from_static(b"a: 1\n\xff\n"));
        assert!(reduction.lines().is_err());
    }

    #[test]
    fn reduction_lines_strip_terminators() {
        let reduction = Reduction::new(Bytes::from_static(b"a: 1\nb: 2\n"));
        assert_eq!(reduction.lines().unwrap().collect::<Vec<_>>(), vec!["a: 1", "b: 2"]);
    }
}
