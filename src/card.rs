//! Header cards and the ordered keyword store.
//!
//! A [`Card`] is one 80-byte keyword record; a [`CardDeck`] is the ordered
//! sequence of cards belonging to one HDU, with first-match keyword lookup.
//! The deck never holds an END card: the reader consumes it and the writer
//! appends it.

use crate::block::CARD_SIZE;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::value::{format_value, parse_value, Value};

// ── Card ──

/// A parsed FITS header card.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword name, at most 8 characters, uppercase on disk.
    pub key: String,
    /// The card's value; [`Value::Undefined`] when the card has none.
    pub value: Value,
    /// Optional comment text.
    pub comment: Option<String>,
}

impl Card {
    /// Create a card with a value and no comment.
    pub fn new(key: &str, value: Value) -> Self {
        Card {
            key: key.to_string(),
            value,
            comment: None,
        }
    }

    /// Create a card with a value and a comment.
    pub fn with_comment(key: &str, value: Value, comment: &str) -> Self {
        Card {
            key: key.to_string(),
            value,
            comment: Some(comment.to_string()),
        }
    }

    /// Returns `true` if this card is the END keyword.
    pub fn is_end(&self) -> bool {
        self.key == "END"
    }

    /// Returns `true` if this is a blank card (empty keyword).
    pub fn is_blank(&self) -> bool {
        self.key.is_empty()
    }

    /// Returns `true` for commentary keywords (COMMENT, HISTORY, or blank).
    pub fn is_commentary(&self) -> bool {
        self.key == "COMMENT" || self.key == "HISTORY" || self.is_blank()
    }

    /// Parse a single 80-byte card image.
    pub fn parse(image: &[u8; CARD_SIZE]) -> Result<Card> {
        for &b in &image[..8] {
            match b {
                b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_' => {}
                _ => {
                    return Err(Error::InvalidCard(format!(
                        "invalid keyword byte 0x{:02X}",
                        b
                    )))
                }
            }
        }
        let key = std::str::from_utf8(&image[..8])
            .map_err(|_| Error::InvalidCard(String::from("non-ASCII keyword")))?
            .trim_end()
            .to_string();

        if key == "END" {
            return Ok(Card {
                key,
                value: Value::Undefined,
                comment: None,
            });
        }

        if key == "COMMENT" || key == "HISTORY" || key.is_empty() {
            let text = std::str::from_utf8(&image[8..])
                .map_err(|_| Error::InvalidCard(String::from("non-ASCII commentary")))?
                .trim_end();
            return Ok(Card {
                key,
                value: Value::Undefined,
                comment: if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                },
            });
        }

        // CONTINUE cards carry a string piece without a value indicator.
        if (image[8] == b'=' && image[9] == b' ') || key == "CONTINUE" {
            let (value, comment) = parse_value(&image[10..]);
            Ok(Card {
                key,
                value,
                comment,
            })
        } else {
            // No value indicator: bytes 8..80 are free-form text.
            let text = std::str::from_utf8(&image[8..])
                .map_err(|_| Error::InvalidCard(String::from("non-ASCII card text")))?
                .trim_end();
            Ok(Card {
                key,
                value: Value::Undefined,
                comment: if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                },
            })
        }
    }

    /// Render this card to one or more 80-byte images.
    ///
    /// String values that do not fit a single card produce CONTINUE cards
    /// when `opts.append` is set, are cut to fit when `opts.truncate` is
    /// set, and are an error otherwise.
    pub fn render(&self, opts: &Options) -> Result<Vec<[u8; CARD_SIZE]>> {
        if self.is_commentary() {
            let mut buf = [b' '; CARD_SIZE];
            write_key(&mut buf, &self.key);
            if let Some(ref text) = self.comment {
                let bytes = text.as_bytes();
                let len = bytes.len().min(CARD_SIZE - 8);
                buf[8..8 + len].copy_from_slice(&bytes[..len]);
            }
            return Ok(vec![buf]);
        }

        if let Value::String(ref s) = self.value {
            let quoted = format_value(&self.value, opts.fixed);
            if quoted.len() > CARD_SIZE - 10 {
                if opts.append {
                    return self.render_continued(s, opts);
                }
                if !opts.truncate {
                    return Err(Error::InvalidCard(format!(
                        "string value of {} does not fit one card",
                        self.key
                    )));
                }
            }
        }

        let mut buf = [b' '; CARD_SIZE];
        write_key(&mut buf, &self.key);
        buf[8] = b'=';
        buf[9] = b' ';

        let value_field = format_value(&self.value, opts.fixed);
        let value_len = value_field.len().min(CARD_SIZE - 10);
        buf[10..10 + value_len].copy_from_slice(&value_field[..value_len]);

        if let Some(ref comment) = self.comment {
            place_comment(&mut buf, 10 + value_len, comment, opts);
        }

        Ok(vec![buf])
    }

    /// Render an overlong string value as a chain of CONTINUE cards.
    fn render_continued(&self, s: &str, opts: &Options) -> Result<Vec<[u8; CARD_SIZE]>> {
        // Each card holds at most 67 content characters plus the trailing
        // ampersand inside the quotes; quote doubling can shorten a chunk.
        let chars: Vec<char> = s.chars().collect();
        let mut chunks: Vec<String> = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let mut end = start;
            let mut quoted_len = 2; // the surrounding quotes
            while end < chars.len() {
                let extra = if chars[end] == '\'' { 2 } else { 1 };
                if quoted_len + extra + 1 > CARD_SIZE - 10 {
                    break;
                }
                quoted_len += extra;
                end += 1;
            }
            chunks.push(chars[start..end].iter().collect());
            start = end;
        }

        let mut images = Vec::with_capacity(chunks.len());
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut text = chunk.clone();
            if i != last {
                text.push('&');
            }
            let mut buf = [b' '; CARD_SIZE];
            if i == 0 {
                write_key(&mut buf, &self.key);
                buf[8] = b'=';
                buf[9] = b' ';
            } else {
                write_key(&mut buf, "CONTINUE");
            }
            let field = format_value(&Value::String(text), false);
            let len = field.len().min(CARD_SIZE - 10);
            buf[10..10 + len].copy_from_slice(&field[..len]);
            if i == last {
                if let Some(ref comment) = self.comment {
                    place_comment(&mut buf, 10 + len, comment, opts);
                }
            }
            images.push(buf);
        }
        Ok(images)
    }
}

/// Left-justify a keyword into the first 8 bytes of a card image.
fn write_key(buf: &mut [u8; CARD_SIZE], key: &str) {
    let bytes = key.as_bytes();
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// Place ` / comment` after the value field, honoring the layout options.
fn place_comment(buf: &mut [u8; CARD_SIZE], value_end: usize, comment: &str, opts: &Options) {
    let sep = (value_end + opts.lpad).max(opts.slash.saturating_sub(1));
    if sep >= CARD_SIZE {
        return;
    }
    buf[sep] = b'/';
    let text_start = sep + 1 + opts.rpad;
    if text_start >= CARD_SIZE {
        return;
    }
    let bytes = comment.as_bytes();
    let len = bytes.len().min(CARD_SIZE - text_start);
    buf[text_start..text_start + len].copy_from_slice(&bytes[..len]);
}

// ── Card deck ──

/// Ordered sequence of cards with keyword-indexed lookup.
///
/// Lookup is O(n) first-match; keywords are compared case-normalized but
/// stored keys are never mutated. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardDeck {
    cards: Vec<Card>,
}

impl CardDeck {
    /// Create an empty deck.
    pub fn new() -> Self {
        CardDeck::default()
    }

    /// Build a deck from a card sequence.
    pub fn from_cards(cards: Vec<Card>) -> Self {
        CardDeck { cards }
    }

    /// Returns `true` iff some card's keyword equals `uppercase(key)`.
    pub fn has(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// The zero-based position of the first match, or `None`.
    pub fn find(&self, key: &str) -> Option<usize> {
        let want = key.to_ascii_uppercase();
        self.cards
            .iter()
            .position(|c| c.key.eq_ignore_ascii_case(&want))
    }

    /// The first matching card's value.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.find(key)
            .map(|i| &self.cards[i].value)
            .ok_or_else(|| Error::KeyNotFound(key.to_ascii_uppercase()))
    }

    /// The first matching card's value, or `default` when absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.find(key)
            .map(|i| self.cards[i].value.clone())
            .unwrap_or(default)
    }

    /// Parallel lookup: one value per `(key, default)` pair, in order.
    pub fn get_many(&self, pairs: &[(&str, Value)]) -> Vec<Value> {
        pairs
            .iter()
            .map(|(key, default)| self.get_or(key, default.clone()))
            .collect()
    }

    /// Replace the value of the first matching card in place.
    ///
    /// The stored keyword spelling and the comment are preserved.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        match self.find(key) {
            Some(i) => {
                self.cards[i].value = value;
                Ok(())
            }
            None => Err(Error::KeyNotFound(key.to_ascii_uppercase())),
        }
    }

    /// Remove and return the first matching card, or `None` when absent.
    pub fn pop(&mut self, key: &str) -> Option<Card> {
        self.find(key).map(|i| self.cards.remove(i))
    }

    /// Append a card.
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Insert a card at the given position.
    pub fn insert(&mut self, index: usize, card: Card) {
        self.cards.insert(index, card);
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Returns `true` if the deck holds no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Iterate over the cards in order.
    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    /// Borrow the first matching card.
    pub fn card(&self, key: &str) -> Option<&Card> {
        self.find(key).map(|i| &self.cards[i])
    }

    // ── Typed getters ──

    /// Integer value of `key`, if present and integral.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.find(key).and_then(|i| self.cards[i].value.as_int())
    }

    /// Integer value of `key`, or `default`.
    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    /// Float value of `key` (integers accepted), if present.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.find(key).and_then(|i| self.cards[i].value.as_float())
    }

    /// Logical value of `key`, if present and logical.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.find(key).and_then(|i| self.cards[i].value.as_bool())
    }

    /// Right-trimmed string value of `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.find(key)
            .and_then(|i| self.cards[i].value.as_str())
            .map(|s| s.trim_end().to_string())
    }
}

impl IntoIterator for CardDeck {
    type Item = Card;
    type IntoIter = std::vec::IntoIter<Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.into_iter()
    }
}
