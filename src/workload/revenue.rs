//! Dollar totals per song and per artist.

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

use crate::record::{key_base, parse_price};
use crate::utils::{string_from_bytes, value_str};
use crate::workload::transactions::map_transactions;
use crate::*;

pub fn map_song(kv: KeyValue, aux: Bytes) -> MapOutput {
    map_transactions(kv, &aux, |record| {
        Ok((record.song_key()?, record.price()?.to_owned()))
    })
}

pub fn map_artist(kv: KeyValue, aux: Bytes) -> MapOutput {
    map_transactions(kv, &aux, |record| {
        Ok((record.artist()?.to_owned(), record.price()?.to_owned()))
    })
}

pub fn reduce_song(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let key = string_from_bytes(key)?;
    Ok(total_line(key_base(&key), values))
}

pub fn reduce_artist(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let key = string_from_bytes(key)?;
    Ok(total_line(&key, values))
}

/// Sums the parseable prices and counts the rest.
///
/// Prices are added in ascending order, so the total is the same however
/// the values were shuffled.
pub fn sum_prices(values: impl Iterator<Item = Bytes>) -> (f64, u64) {
    let mut malformed = 0;
    let mut prices = Vec::new();
    for value in values {
        match value_str(&value).and_then(parse_price) {
            Ok(price) => prices.push(price),
            Err(e) => {
                tracing::debug!("skipping price: {e}");
                malformed += 1;
            }
        }
    }
    prices.sort_by(f64::total_cmp);
    (prices.into_iter().sum(), malformed)
}

fn total_line(label: &str, values: impl Iterator<Item = Bytes>) -> Reduction {
    let values: Vec<Bytes> = values.collect();
    let count = values.len() as u64;
    let (total, malformed) = sum_prices(values.into_iter());

    // Nothing to report when every price was unreadable.
    if malformed == count {
        return Reduction {
            output: Bytes::new(),
            malformed,
        };
    }

    let mut writer = BytesMut::with_capacity(label.len() + 16);
    writer.put(format!("{}: {:.2}\n", label, total).as_bytes());
    Reduction {
        output: writer.freeze(),
        malformed,
    }
}
