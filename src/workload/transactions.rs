//! Shared plumbing for jobs that read transaction logs.
//!
//! Genre-restricted reports reuse the unrestricted map functions and
//! receive the restriction as auxiliary arguments, e.g. `["--genre", "Jazz"]`.

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::MalformedRecordError;
use crate::record::{records, TransactionRecord};
use crate::{KeyValue, MapOutput};

#[derive(Parser, Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[clap(no_binary_name = true)]
pub struct RecordFilter {
    /// Keep only records whose genre field equals this value.
    #[clap(long, value_parser)]
    pub genre: Option<String>,
}

impl RecordFilter {
    /// Parses the JSON-encoded argument list handed to every map call.
    /// Empty auxiliary data means no filter.
    pub fn from_aux(aux: &Bytes) -> Result<Self> {
        if aux.is_empty() {
            return Ok(Self::default());
        }
        let args = serde_json::from_slice::<Vec<String>>(aux)?;
        Ok(Self::try_parse_from(args)?)
    }

    pub fn admits(&self, record: &TransactionRecord<'_>) -> Result<bool, MalformedRecordError> {
        match &self.genre {
            Some(genre) => Ok(record.genre()? == genre),
            None => Ok(true),
        }
    }
}

/// Runs `emit` over every record of the object in `kv` that passes the
/// filter in `aux`.
///
/// A record `emit` cannot handle becomes an inner error in the output,
/// so the engine can count it without losing the rest of the object.
pub fn map_transactions<F>(kv: KeyValue, aux: &Bytes, emit: F) -> MapOutput
where
    F: Fn(&TransactionRecord<'_>) -> Result<(String, String), MalformedRecordError>,
{
    let filter = RecordFilter::from_aux(aux)?;
    let mut map_output = Vec::new();
    for record in records(&kv.value) {
        let emitted = record.and_then(|record| {
            filter
                .admits(&record)
                .and_then(|admitted| admitted.then(|| emit(&record)).transpose())
        });
        match emitted {
            Ok(Some((key, value))) => map_output.push(Ok(KeyValue::from_strings(key, value))),
            Ok(None) => {}
            Err(e) => map_output.push(Err(e.into())),
        }
    }

    Ok(Box::new(map_output.into_iter()))
}
