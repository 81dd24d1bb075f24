//! Units sold per song and per artist.
//!
//! Only the number of values under a key matters, never their content.

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

use crate::record::key_base;
use crate::utils::string_from_bytes;
use crate::workload::transactions::map_transactions;
use crate::*;

pub fn map_song(kv: KeyValue, aux: Bytes) -> MapOutput {
    map_transactions(kv, &aux, |record| Ok((record.song_key()?, String::new())))
}

pub fn map_artist(kv: KeyValue, aux: Bytes) -> MapOutput {
    map_transactions(kv, &aux, |record| {
        Ok((record.artist()?.to_owned(), String::new()))
    })
}

/// Reports the song title (first part of the `song-artist-album` key).
pub fn reduce_song(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let key = string_from_bytes(key)?;
    Ok(count_line(key_base(&key), values.count()))
}

pub fn reduce_artist(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let key = string_from_bytes(key)?;
    Ok(count_line(&key, values.count()))
}

pub(crate) fn count_line(label: &str, count: usize) -> Reduction {
    let mut writer = BytesMut::with_capacity(label.len() + 8);
    writer.put(format!("{}: {}\n", label, count).as_bytes());
    Reduction::new(writer.freeze())
}
