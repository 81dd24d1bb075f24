//! Object storage behind uploads and job outputs.
//!
//! Objects are addressed by [`Locator`]s of the form `/<bucket>/<key>`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub mod local;
pub mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

/// Bucket-qualified path of one stored object, or of a key prefix when
/// it ends in `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator(String);

impl Locator {
    pub fn new(bucket: &str, key: &str) -> Self {
        Locator(format!("/{}/{}", bucket, key.trim_start_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bucket(&self) -> &str {
        self.0.splitn(3, '/').nth(1).unwrap_or_default()
    }

    /// The path inside the bucket.
    pub fn object_key(&self) -> &str {
        self.0.splitn(3, '/').nth(2).unwrap_or_default()
    }

    pub fn is_prefix(&self) -> bool {
        self.0.ends_with('/')
    }
}

impl FromStr for Locator {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(""), Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Locator(s.to_owned()))
            }
            _ => Err(StorageError::InvalidLocator(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Locator {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> String {
        locator.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A flat key space inside one bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn locator(&self, key: &str) -> Locator {
        Locator::new(self.bucket(), key)
    }

    /// The key a locator names, provided it points into this bucket.
    fn key_of<'a>(&self, locator: &'a Locator) -> Result<&'a str, StorageError> {
        if locator.bucket() != self.bucket() {
            return Err(StorageError::ForeignLocator {
                locator: locator.to_string(),
                bucket: self.bucket().to_owned(),
            });
        }
        Ok(locator.object_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_parts() {
        let locator = Locator::new("salesmr", "songs-same-time/run/output-3");
        assert_eq!(locator.as_str(), "/salesmr/songs-same-time/run/output-3");
        assert_eq!(locator.bucket(), "salesmr");
        assert_eq!(locator.object_key(), "songs-same-time/run/output-3");
        assert!(!locator.is_prefix());
        assert!(Locator::new("b", "uploads/x/").is_prefix());
    }

    #[test]
    fn parse_rejects_bucketless_paths() {
        assert!("/b/k".parse::<Locator>().is_ok());
        assert!("b/k".parse::<Locator>().is_err());
        assert!("/b".parse::<Locator>().is_err());
        assert!("//k".parse::<Locator>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let locator = Locator::new("b", "k");
        assert_eq!(serde_json::to_string(&locator).unwrap(), "\"/b/k\"");
        assert!(serde_json::from_str::<Locator>("\"nope\"").is_err());
    }
}
