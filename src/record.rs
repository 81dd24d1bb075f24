//! Splitting uploaded text into transaction records and fields, plus the
//! sentence/word tokenizer used by word count.
//!
//! A transaction log line looks like
//!
//! ```text
//! t1	2024-01-01	SongX	ArtistY	AlbumZ	Pop	US	9.99
//! ```
//!
//! Fields are addressed by position; see the `*_FIELD` constants.

use itertools::Itertools;

use crate::error::MalformedRecordError;

pub const RECORD_SEPARATOR: char = '\n';
pub const FIELD_SEPARATOR: char = '\t';
/// Joins the parts of a composite key.
pub const KEY_SEPARATOR: &str = "-";

pub const TRANSACTION_FIELDS: std::ops::Range<usize> = 0..2;
pub const SONG_FIELDS: std::ops::Range<usize> = 2..5;
pub const ARTIST_FIELD: usize = 3;
pub const GENRE_FIELD: usize = 5;
pub const PRICE_FIELD: usize = 7;

/// Splits one record on tabs.
pub fn split_into_fields(record: &str) -> Vec<&str> {
    record.split(FIELD_SEPARATOR).collect()
}

/// Splits raw object bytes into lines and decodes each line on its own,
/// so an invalid byte only costs the line it sits in.
///
/// Empty lines carry no fields at all (the tail after a final newline,
/// blank lines) and are dropped here rather than reported as malformed.
pub fn decode_lines(buf: &[u8]) -> impl Iterator<Item = Result<&str, MalformedRecordError>> {
    buf.split(|&b| b == RECORD_SEPARATOR as u8)
        .filter(|line| !line.is_empty())
        .map(|line| std::str::from_utf8(line).map_err(|_| MalformedRecordError::Encoding))
}

/// Iterates the non-empty records of an object.
pub fn records(
    buf: &[u8],
) -> impl Iterator<Item = Result<TransactionRecord<'_>, MalformedRecordError>> {
    decode_lines(buf).map(|line| line.map(TransactionRecord::parse))
}

/// One line of a transaction log, split into fields.
///
/// Accessors check the field count and fail with
/// [`MalformedRecordError::MissingFields`] instead of panicking, so each
/// job only requires the fields it actually reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord<'a> {
    raw: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> TransactionRecord<'a> {
    pub fn parse(raw: &'a str) -> Self {
        Self {
            raw,
            fields: split_into_fields(raw),
        }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn require(&self, required: usize) -> Result<(), MalformedRecordError> {
        if self.fields.len() < required {
            return Err(MalformedRecordError::MissingFields {
                required,
                found: self.fields.len(),
                record: self.raw.to_owned(),
            });
        }
        Ok(())
    }

    pub fn field(&self, index: usize) -> Result<&'a str, MalformedRecordError> {
        self.require(index + 1)?;
        Ok(self.fields[index])
    }

    fn join(&self, range: std::ops::Range<usize>) -> Result<String, MalformedRecordError> {
        self.require(range.end)?;
        Ok(self.fields[range].join(KEY_SEPARATOR))
    }

    /// `id-date`, shared by every line of one purchase.
    pub fn transaction_key(&self) -> Result<String, MalformedRecordError> {
        self.join(TRANSACTION_FIELDS)
    }

    /// `song-artist-album`.
    pub fn song_key(&self) -> Result<String, MalformedRecordError> {
        self.join(SONG_FIELDS)
    }

    pub fn artist(&self) -> Result<&'a str, MalformedRecordError> {
        self.field(ARTIST_FIELD)
    }

    pub fn genre(&self) -> Result<&'a str, MalformedRecordError> {
        self.field(GENRE_FIELD)
    }

    /// The price exactly as written; parsing happens in reduce.
    pub fn price(&self) -> Result<&'a str, MalformedRecordError> {
        self.field(PRICE_FIELD)
    }
}

/// The first component of a composite key, e.g. the song title of a
/// `song-artist-album` key.
pub fn key_base(key: &str) -> &str {
    key.split(KEY_SEPARATOR).next().unwrap_or(key)
}

/// Parses a price value, naming the field in the error.
pub fn parse_price(value: &str) -> Result<f64, MalformedRecordError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite())
        .ok_or_else(|| MalformedRecordError::NotANumber {
            field: "price",
            value: value.to_owned(),
        })
}

/// Lower-cases `text`, collapses whitespace runs into single spaces and
/// breaks it into sentence-like units on `.`, `!` and `?`.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let collapsed = text.to_lowercase().split_whitespace().join(" ");
    collapsed
        .split(['.', '!', '?'])
        .map(str::to_owned)
        .collect()
}

/// Splits a sentence into words. Anything that is not a letter separates
/// words, so digits and underscores never survive as tokens.
pub fn split_into_words(sentence: &str) -> Vec<&str> {
    sentence
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "t1\t2024-01-01\tSongX\tArtistY\tAlbumZ\tPop\tUS\t9.99";

    #[test]
    fn empty_lines_are_dropped() {
        let lines: Vec<_> = decode_lines(b"a\n\nb\n").collect();
        assert_eq!(lines, vec![Ok("a"), Ok("b")]);
        assert_eq!(decode_lines(b"a\nb").count(), 2);
        assert_eq!(decode_lines(b"").count(), 0);
    }

    #[test]
    fn records_skip_empty_lines() {
        let text = format!("{LINE}\n\n{LINE}\n");
        assert_eq!(records(text.as_bytes()).count(), 2);
    }

    #[test]
    fn bad_bytes_only_cost_their_line() {
        let mut buf = format!("{LINE}\n").into_bytes();
        buf.extend_from_slice(b"t2\t2024-01-02\tSong\xff\n");
        buf.extend_from_slice(format!("{LINE}\n").as_bytes());

        let parsed: Vec<_> = records(&buf).collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].as_ref().unwrap().raw(), LINE);
        assert_eq!(parsed[1], Err(MalformedRecordError::Encoding));
        assert_eq!(parsed[2].as_ref().unwrap().raw(), LINE);
    }

    #[test]
    fn composite_keys() {
        let record = TransactionRecord::parse(LINE);
        assert_eq!(record.len(), 8);
        assert_eq!(record.transaction_key().unwrap(), "t1-2024-01-01");
        assert_eq!(record.song_key().unwrap(), "SongX-ArtistY-AlbumZ");
        assert_eq!(record.artist().unwrap(), "ArtistY");
        assert_eq!(record.genre().unwrap(), "Pop");
        assert_eq!(record.price().unwrap(), "9.99");
    }

    #[test]
    fn short_record_is_malformed_not_a_panic() {
        let record = TransactionRecord::parse("t1\t2024-01-01\tSongX");
        assert_eq!(
            record.song_key(),
            Err(MalformedRecordError::MissingFields {
                required: 5,
                found: 3,
                record: "t1\t2024-01-01\tSongX".to_owned(),
            })
        );
        assert!(record.transaction_key().is_ok());
        assert!(record.price().is_err());
    }

    #[test]
    fn key_base_takes_first_component() {
        assert_eq!(key_base("SongX-ArtistY-AlbumZ"), "SongX");
        assert_eq!(key_base("Solo"), "Solo");
    }

    #[test]
    fn prices() {
        assert_eq!(parse_price("9.99").unwrap(), 9.99);
        assert_eq!(parse_price(" 1 ").unwrap(), 1.0);
        assert!(parse_price("free").is_err());
        assert!(parse_price("NaN").is_err());
    }

    #[test]
    fn sentences_and_words() {
        let sentences = split_into_sentences("Hello   world. Hello!");
        assert_eq!(sentences, vec!["hello world", " hello", ""]);

        let words: Vec<&str> = sentences
            .iter()
            .flat_map(|s| split_into_words(s))
            .collect();
        assert_eq!(words, vec!["hello", "world", "hello"]);
    }

    #[test]
    fn digits_and_underscores_are_not_words() {
        assert_eq!(
            split_into_words("route_66 is 2 cool4u"),
            vec!["route", "is", "cool", "u"]
        );
    }
}
