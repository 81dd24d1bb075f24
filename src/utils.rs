//! Utility functions shared by the jobs and the binaries.
//!

use anyhow::Result;
use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use crate::error::MalformedRecordError;

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Returns an error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    Ok(String::from_utf8(buf.as_ref().into())?)
}

/// Borrow a reduce value as text, treating invalid UTF-8 as a malformed
/// value rather than a failed stage.
pub fn value_str(buf: &Bytes) -> Result<&str, MalformedRecordError> {
    std::str::from_utf8(buf).map_err(|_| MalformedRecordError::Encoding)
}

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
