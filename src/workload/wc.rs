//! A MapReduce-compatible implementation of word count.
//!

use anyhow::Result;
use bytes::{Bytes, BytesMut, BufMut};

use crate::record::{decode_lines, split_into_sentences, split_into_words};
use crate::utils::string_from_bytes;
use crate::*;

/// Emits one pair per word. A line that is not valid UTF-8 becomes a
/// single malformed entry; the rest of the object is still counted.
pub fn map(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let mut key_buf = BytesMut::new();
    let mut map_output = Vec::new();

    for line in decode_lines(&kv.value) {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                map_output.push(Err(e.into()));
                continue;
            }
        };
        for sentence in split_into_sentences(line) {
            for word in split_into_words(&sentence) {
                key_buf.put_slice(word.as_bytes());
                map_output.push(Ok(KeyValue {
                    key: key_buf.split().freeze(),
                    value: Bytes::new(),
                }));
            }
        }
    }

    Ok(Box::new(map_output.into_iter()))
}

pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Reduction> {
    let count = values.count();

    let mut writer = BytesMut::with_capacity(key.len() + 8);
    let key = string_from_bytes(key)?;
    writer.put(format!("{}: {}\n", key, count).as_bytes());

    Ok(Reduction::new(writer.freeze()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::MalformedRecordError;

    #[test]
    fn hello_world() {
        let kv = KeyValue::from_strings("doc.txt", "Hello world. Hello!");
        let mut groups: BTreeMap<Bytes, Vec<Bytes>> = BTreeMap::new();
        for pair in map(kv, Bytes::new()).unwrap() {
            let pair = pair.unwrap();
            groups.entry(pair.key).or_default().push(pair.value);
        }

        let lines: Vec<String> = groups
            .into_iter()
            .map(|(key, values)| {
                let out = reduce(key, Box::new(values.into_iter()), Bytes::new()).unwrap();
                out.lines().unwrap().collect::<String>()
            })
            .collect();
        assert_eq!(lines, vec!["hello: 2", "world: 1"]);
    }

    #[test]
    fn numbers_are_not_counted() {
        let kv = KeyValue::from_strings("doc.txt", "42 songs, 7 albums_2024");
        let words: Vec<Bytes> = map(kv, Bytes::new())
            .unwrap()
            .map(|kv| kv.unwrap().key)
            .collect();
        assert_eq!(words, vec!["songs", "albums"]);
    }

    #[test]
    fn undecodable_line_is_reported_not_fatal() {
        let kv = KeyValue::new(
            Bytes::from("doc.txt"),
            Bytes::from_static(b"one song\nbad \xff line\nanother song\n"),
        );
        let pairs: Vec<_> = map(kv, Bytes::new()).unwrap().collect();
        let words: Vec<Bytes> = pairs
            .iter()
            .filter_map(|kv| kv.as_ref().ok().map(|kv| kv.key.clone()))
            .collect();
        assert_eq!(words, vec!["one", "song", "another", "song"]);

        let malformed: Vec<_> = pairs.iter().filter_map(|kv| kv.as_ref().err()).collect();
        assert_eq!(malformed.len(), 1);
        assert!(malformed[0].downcast_ref::<MalformedRecordError>().is_some());
    }
}
