//! "Frequently bought together", as two chained stages.
//!
//! Stage one groups the songs of each purchase and writes every ordered
//! pair of different songs as a `songA\tsongB` line. Stage two reads
//! those lines back, tallies the partners of each song and reports the
//! most frequent one.

use std::collections::BTreeMap;

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MalformedRecordError;
use crate::record::{key_base, records, TransactionRecord, FIELD_SEPARATOR};
use crate::utils::{string_from_bytes, value_str};
use crate::workload::transactions::map_transactions;
use crate::*;

/// Stage one map: `(transaction key, song key)` per log line.
pub fn map_stage_one(kv: KeyValue, aux: Bytes) -> MapOutput {
    map_transactions(kv, &aux, |record| {
        Ok((record.transaction_key()?, record.song_key()?))
    })
}

/// Stage one reduce: the cross product of a purchase's songs, minus
/// pairs of equal songs.
///
/// A song bought twice in one purchase still pairs with every other
/// song twice.
pub fn reduce_stage_one(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let values: Vec<Bytes> = values.collect();
    let mut malformed = 0;
    let mut songs = Vec::with_capacity(values.len());
    for value in &values {
        match value_str(value) {
            Ok(song) => songs.push(song),
            Err(_) => malformed += 1,
        }
    }

    let mut output = BytesMut::new();
    for song in &songs {
        for other in &songs {
            if song != other {
                output.put(format!("{}{}{}\n", song, FIELD_SEPARATOR, other).as_bytes());
            }
        }
    }

    Ok(Reduction {
        output: output.freeze(),
        malformed,
    })
}

/// Stage two map: one `(songA, songB)` per stage one line.
pub fn map_stage_two(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let mut map_output = Vec::new();

    for line in records(&kv.value) {
        match line.and_then(|line| pair(&line)) {
            Ok((song, other)) => map_output.push(Ok(KeyValue::from_strings(song, other))),
            Err(e) => map_output.push(Err(e.into())),
        }
    }

    Ok(Box::new(map_output.into_iter()))
}

/// Stage two reduce: `"<song>, <partner>, <times>"` for the partner seen
/// most often. Ties go to the lexicographically smallest partner key.
pub fn reduce_stage_two(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let key = string_from_bytes(key)?;
    let (counts, malformed) = tally(values);

    let Some((partner, times)) = most_frequent(&counts) else {
        return Ok(Reduction {
            output: Bytes::new(),
            malformed,
        });
    };

    let mut writer = BytesMut::new();
    writer.put(format!("{}, {}, {}\n", key_base(&key), key_base(partner), times).as_bytes());
    Ok(Reduction {
        output: writer.freeze(),
        malformed,
    })
}

fn pair<'a>(line: &TransactionRecord<'a>) -> Result<(&'a str, &'a str), MalformedRecordError> {
    Ok((line.field(0)?, line.field(1)?))
}

fn tally(values: impl Iterator<Item = Bytes>) -> (BTreeMap<String, u64>, u64) {
    let mut counts = BTreeMap::new();
    let mut malformed = 0;
    for value in values {
        match value_str(&value) {
            Ok(song) => *counts.entry(song.to_owned()).or_insert(0) += 1,
            Err(_) => malformed += 1,
        }
    }
    (counts, malformed)
}

/// Highest count wins; iterating in key order and only replacing on a
/// strictly higher count keeps the smallest key among equals.
pub fn most_frequent(counts: &BTreeMap<String, u64>) -> Option<(&str, u64)> {
    let mut best: Option<(&str, u64)> = None;
    for (song, &count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((song.as_str(), count));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn values(items: &[&str]) -> Box<dyn Iterator<Item = Bytes>> {
        let items: Vec<Bytes> = items.iter().map(|v| Bytes::from(v.to_string())).collect();
        Box::new(items.into_iter())
    }

    #[test]
    fn stage_one_map_groups_by_transaction() {
        let kv = KeyValue::from_strings(
            "log.tsv",
            "t1\t2024-01-01\tA\tX\tL\tPop\tUS\t1.00\nt1\t2024-01-01\tB\tY\tM\tPop\tUS\t1.00\n",
        );
        let pairs: Vec<KeyValue> = map_stage_one(kv, Bytes::new())
            .unwrap()
            .map(|kv| kv.unwrap())
            .collect();
        assert_eq!(
            pairs,
            vec![
                KeyValue::from_strings("t1-2024-01-01", "A-X-L"),
                KeyValue::from_strings("t1-2024-01-01", "B-Y-M"),
            ]
        );
    }

    #[test]
    fn stage_one_emits_all_ordered_pairs() {
        let out = reduce_stage_one(Bytes::from("t1"), values(&["A", "B", "C"]), Bytes::new()).unwrap();
        let lines: Vec<&str> = out.lines().unwrap().collect();
        assert_eq!(lines.len(), 6);
        let lines: HashSet<&str> = lines.into_iter().collect();
        let expected: HashSet<&str> = ["A\tB", "B\tA", "A\tC", "C\tA", "B\tC", "C\tB"]
            .into_iter()
            .collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn stage_one_keeps_duplicate_fan_out() {
        let out = reduce_stage_one(Bytes::from("t1"), values(&["A", "A", "B"]), Bytes::new()).unwrap();
        let mut lines: Vec<&str> = out.lines().unwrap().collect();
        lines.sort();
        assert_eq!(lines, vec!["A\tB", "A\tB", "B\tA", "B\tA"]);
    }

    #[test]
    fn single_song_purchase_has_no_pairs() {
        let out = reduce_stage_one(Bytes::from("t1"), values(&["A"]), Bytes::new()).unwrap();
        assert!(out.output.is_empty());
    }

    #[test]
    fn stage_two_map_reads_pair_lines() {
        let kv = KeyValue::from_strings("output-0", "A-X-L\tB-Y-M\nbroken\n");
        let out: Vec<_> = map_stage_two(kv, Bytes::new()).unwrap().collect();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &KeyValue::from_strings("A-X-L", "B-Y-M")
        );
        assert!(out[1].is_err());
    }

    #[test]
    fn stage_two_reports_most_frequent_partner_base() {
        let out = reduce_stage_two(
            Bytes::from("A-X-L"),
            values(&["B-Y-M", "C-Z-N", "B-Y-M"]),
            Bytes::new(),
        )
        .unwrap();
        assert_eq!(out.lines().unwrap().collect::<Vec<_>>(), vec!["A, B, 2"]);
    }

    #[test]
    fn stage_two_ties_go_to_smallest_key() {
        let out = reduce_stage_two(
            Bytes::from("A-X-L"),
            values(&["D-Y-M", "C-Z-N", "D-Y-M", "C-Z-N"]),
            Bytes::new(),
        )
        .unwrap();
        assert_eq!(out.lines().unwrap().collect::<Vec<_>>(), vec!["A, C, 2"]);
    }
}
