//! Composite path keys: ordering, prefix relation and on-page encodings.
//!
//! A key is an ordered sequence of 64-bit integers. Keys compare element by
//! element from the left; when one key is a strict prefix of the other the
//! shorter one sorts first. Both on-page encodings decode to the same
//! sequence before any comparison takes place.
//!
//! Encodings:
//! - Fixed width: every key in the tree has exactly `width` words, stored
//!   back to back with no separator.
//! - Variable width: each key is its words followed by the terminator `-1`.
//!   The terminator cannot appear inside a variable-width key.

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;

use crate::storage::Page;

/// A composite key.
pub type Key = Vec<i64>;

/// Terminates every variable-width key on a page.
pub const KEY_TERMINATOR: i64 = -1;

/// Size of one key word in bytes.
pub const WORD_SIZE: usize = 8;

/// Total order over keys.
#[must_use]
pub fn compare(a: &[i64], b: &[i64]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// True iff `prefix` is a prefix of `key` (a key is a prefix of itself).
#[must_use]
pub fn valid_prefix(prefix: &[i64], key: &[i64]) -> bool {
    prefix.len() <= key.len() && key[..prefix.len()] == *prefix
}

/// Encode/decode keys inside a page, and splice encoded keys in and out of
/// a node's key region.
///
/// `used_end` is always the first byte past the node's used region.
pub trait KeyEncoding {
    /// Bytes `key` occupies on a page.
    fn encoded_len(&self, key: &[i64]) -> usize;

    /// Bytes of the encoded key that starts at `offset`.
    fn span_at(&self, page: &Page, offset: usize) -> usize;

    /// Decode the key that starts at `offset`.
    fn read_key(&self, page: &Page, offset: usize) -> Key;

    /// Encode `key` at `offset`. Returns the bytes written.
    fn write_key(&self, page: &mut Page, offset: usize, key: &[i64]) -> usize;

    /// Insert `key` at `offset`, shifting the tail right.
    fn splice_in(&self, page: &mut Page, offset: usize, used_end: usize, key: &[i64]) -> usize {
        let len = self.encoded_len(key);
        page.open_gap(offset, len, used_end);
        self.write_key(page, offset, key)
    }

    /// Remove the key at `offset`, shifting the tail left. Returns the bytes
    /// removed.
    fn splice_out(&self, page: &mut Page, offset: usize, used_end: usize) -> usize {
        let len = self.span_at(page, offset);
        page.close_gap(offset, len, used_end);
        len
    }
}

/// Fixed-width encoding: `words` words per key, no terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidth {
    pub words: usize,
}

impl KeyEncoding for FixedWidth {
    fn encoded_len(&self, _key: &[i64]) -> usize {
        self.words * WORD_SIZE
    }

    fn span_at(&self, _page: &Page, _offset: usize) -> usize {
        self.words * WORD_SIZE
    }

    fn read_key(&self, page: &Page, offset: usize) -> Key {
        (0..self.words)
            .map(|i| page.read_i64(offset + i * WORD_SIZE))
            .collect()
    }

    fn write_key(&self, page: &mut Page, offset: usize, key: &[i64]) -> usize {
        for (i, word) in key.iter().enumerate() {
            page.write_i64(offset + i * WORD_SIZE, *word);
        }
        self.words * WORD_SIZE
    }
}

/// Variable-width encoding: words followed by `KEY_TERMINATOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableWidth;

impl KeyEncoding for VariableWidth {
    fn encoded_len(&self, key: &[i64]) -> usize {
        (key.len() + 1) * WORD_SIZE
    }

    fn span_at(&self, page: &Page, offset: usize) -> usize {
        let mut end = offset;
        while end + WORD_SIZE <= page.len() {
            end += WORD_SIZE;
            if page.read_i64(end - WORD_SIZE) == KEY_TERMINATOR {
                break;
            }
        }
        end - offset
    }

    fn read_key(&self, page: &Page, offset: usize) -> Key {
        let mut key = Vec::new();
        let mut at = offset;
        while at + WORD_SIZE <= page.len() {
            let word = page.read_i64(at);
            if word == KEY_TERMINATOR {
                break;
            }
            key.push(word);
            at += WORD_SIZE;
        }
        key
    }

    fn write_key(&self, page: &mut Page, offset: usize, key: &[i64]) -> usize {
        for (i, word) in key.iter().enumerate() {
            page.write_i64(offset + i * WORD_SIZE, *word);
        }
        page.write_i64(offset + key.len() * WORD_SIZE, KEY_TERMINATOR);
        (key.len() + 1) * WORD_SIZE
    }
}

/// Key format of a tree, chosen at creation time and recorded in the
/// key-length field of every node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// Every key has exactly this many words.
    Fixed(u32),
    /// Keys of any length, terminated on the page.
    Variable,
}

impl KeyFormat {
    /// Value stored in the header key-length field (0 = variable).
    #[must_use]
    pub const fn key_length_field(self) -> u32 {
        match self {
            Self::Fixed(words) => words,
            Self::Variable => 0,
        }
    }

    /// Inverse of `key_length_field`.
    #[must_use]
    pub const fn from_key_length_field(value: u32) -> Self {
        if value == 0 {
            Self::Variable
        } else {
            Self::Fixed(value)
        }
    }

    /// Fixed stride of one key in bytes, if any.
    #[must_use]
    pub const fn stride(self) -> Option<usize> {
        match self {
            Self::Fixed(words) => Some(words as usize * WORD_SIZE),
            Self::Variable => None,
        }
    }

    /// Check that `key` can be stored in a tree of this format whose keys
    /// are at most `max_words` long.
    pub fn validate(self, key: &[i64], max_words: usize) -> Result<(), KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        match self {
            Self::Fixed(words) => {
                if key.len() != words as usize {
                    return Err(KeyError::WrongWidth {
                        expected: words as usize,
                        actual: key.len(),
                    });
                }
            }
            Self::Variable => {
                if key.contains(&KEY_TERMINATOR) {
                    return Err(KeyError::ContainsTerminator);
                }
            }
        }
        if key.len() > max_words {
            return Err(KeyError::TooLarge {
                words: key.len(),
                max_words,
            });
        }
        Ok(())
    }
}

impl KeyEncoding for KeyFormat {
    fn encoded_len(&self, key: &[i64]) -> usize {
        match *self {
            Self::Fixed(words) => FixedWidth {
                words: words as usize,
            }
            .encoded_len(key),
            Self::Variable => VariableWidth.encoded_len(key),
        }
    }

    fn span_at(&self, page: &Page, offset: usize) -> usize {
        match *self {
            Self::Fixed(words) => FixedWidth {
                words: words as usize,
            }
            .span_at(page, offset),
            Self::Variable => VariableWidth.span_at(page, offset),
        }
    }

    fn read_key(&self, page: &Page, offset: usize) -> Key {
        match *self {
            Self::Fixed(words) => FixedWidth {
                words: words as usize,
            }
            .read_key(page, offset),
            Self::Variable => VariableWidth.read_key(page, offset),
        }
    }

    fn write_key(&self, page: &mut Page, offset: usize, key: &[i64]) -> usize {
        match *self {
            Self::Fixed(words) => FixedWidth {
                words: words as usize,
            }
            .write_key(page, offset, key),
            Self::Variable => VariableWidth.write_key(page, offset, key),
        }
    }
}

/// Errors for keys rejected before they reach a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Keys must have at least one word.
    Empty,
    /// Key does not match the tree's fixed width.
    WrongWidth { expected: usize, actual: usize },
    /// Variable-width key contains the terminator value.
    ContainsTerminator,
    /// Key cannot fit into a node alongside two others.
    TooLarge { words: usize, max_words: usize },
    /// Bulk input was not strictly ascending.
    NotAscending { previous: Key, next: Key },
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "key is empty"),
            Self::WrongWidth { expected, actual } => {
                write!(f, "key has {actual} words, tree keys have {expected}")
            }
            Self::ContainsTerminator => {
                write!(f, "variable-width key contains the terminator {KEY_TERMINATOR}")
            }
            Self::TooLarge { words, max_words } => {
                write!(f, "key has {words} words, at most {max_words} fit")
            }
            Self::NotAscending { previous, next } => {
                write!(f, "key {next:?} does not sort after {previous:?}")
            }
        }
    }
}

impl std::error::Error for KeyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_shorter_prefix_first() {
        assert_eq!(compare(&[1, 1, 1], &[1, 1, 1, 1]), Ordering::Less);
        assert_eq!(compare(&[1, 1, 1, 1], &[1, 1, 1]), Ordering::Greater);
        assert_eq!(compare(&[1, 1, 1, 1], &[2, 2, 2, 2]), Ordering::Less);
        assert_eq!(compare(&[2, 2, 2, 2], &[1, 1, 1, 1]), Ordering::Greater);
        assert_eq!(compare(&[3, 1], &[3, 1]), Ordering::Equal);
    }

    #[test]
    fn test_compare_first_difference_wins() {
        assert_eq!(compare(&[1, 9, 9], &[2]), Ordering::Less);
        assert_eq!(compare(&[-5, 0], &[-4]), Ordering::Less);
        assert_eq!(compare(&[7, 3], &[7, 2, 100]), Ordering::Greater);
    }

    #[test]
    fn test_compare_matches_slice_order() {
        let keys: Vec<Key> = vec![
            vec![1],
            vec![1, 1],
            vec![1, 2],
            vec![1, 1, 1],
            vec![0, 5, 5],
            vec![2],
            vec![i64::MIN],
            vec![i64::MAX, 0],
        ];
        for a in &keys {
            for b in &keys {
                assert_eq!(compare(a, b), a.as_slice().cmp(b.as_slice()));
                assert_eq!(compare(a, b), compare(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_valid_prefix() {
        assert!(valid_prefix(&[2, 3, 4, 5], &[2, 3, 4, 5, 6, 7]));
        assert!(valid_prefix(&[2, 3, 4, 5, 6, 7], &[2, 3, 4, 5, 6, 7]));
        assert!(!valid_prefix(&[2, 3, 4, 5, 6, 7, 8], &[2, 3, 4, 5, 6, 7]));
        assert!(!valid_prefix(&[2, 3, 5], &[2, 3, 4, 5]));
        assert!(valid_prefix(&[], &[1]));
    }

    #[test]
    fn test_variable_width_encoding() {
        let mut page = Page::new(128);
        let enc = VariableWidth;
        assert_eq!(enc.write_key(&mut page, 8, &[4, 5, 6]), 32);
        assert_eq!(page.read_i64(32), KEY_TERMINATOR);
        assert_eq!(enc.span_at(&page, 8), 32);
        assert_eq!(enc.read_key(&page, 8), vec![4, 5, 6]);
    }

    #[test]
    fn test_fixed_width_encoding() {
        let mut page = Page::new(128);
        let enc = FixedWidth { words: 2 };
        assert_eq!(enc.write_key(&mut page, 0, &[-1, 9]), 16);
        assert_eq!(enc.read_key(&page, 0), vec![-1, 9]);
        assert_eq!(enc.span_at(&page, 0), 16);
    }

    #[test]
    fn test_splice_in_and_out_variable() {
        let mut page = Page::new(128);
        let fmt = KeyFormat::Variable;
        let mut end = 0;
        end += fmt.write_key(&mut page, end, &[1]);
        end += fmt.write_key(&mut page, end, &[3, 3]);

        end += fmt.splice_in(&mut page, 16, end, &[2, 2, 2]);
        assert_eq!(end, 16 + 32 + 24);
        assert_eq!(fmt.read_key(&page, 0), vec![1]);
        assert_eq!(fmt.read_key(&page, 16), vec![2, 2, 2]);
        assert_eq!(fmt.read_key(&page, 48), vec![3, 3]);

        end -= fmt.splice_out(&mut page, 0, end);
        assert_eq!(end, 56);
        assert_eq!(fmt.read_key(&page, 0), vec![2, 2, 2]);
        assert_eq!(fmt.read_key(&page, 32), vec![3, 3]);
        assert!(page.read_bytes(end, 16).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_splice_out_fixed() {
        let mut page = Page::new(128);
        let fmt = KeyFormat::Fixed(2);
        let mut end = 0;
        for key in [[1, 1], [2, 2], [3, 3]] {
            end += fmt.write_key(&mut page, end, &key);
        }
        end -= fmt.splice_out(&mut page, 16, end);
        assert_eq!(end, 32);
        assert_eq!(fmt.read_key(&page, 16), vec![3, 3]);
    }

    #[test]
    fn test_validate_keys() {
        let fixed = KeyFormat::Fixed(3);
        assert!(fixed.validate(&[1, 2, 3], 10).is_ok());
        assert_eq!(
            fixed.validate(&[1, 2], 10),
            Err(KeyError::WrongWidth {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(fixed.validate(&[], 10), Err(KeyError::Empty));

        let variable = KeyFormat::Variable;
        assert!(variable.validate(&[1], 4).is_ok());
        assert_eq!(
            variable.validate(&[1, -1], 4),
            Err(KeyError::ContainsTerminator)
        );
        assert_eq!(
            variable.validate(&[1, 2, 3, 4, 5], 4),
            Err(KeyError::TooLarge {
                words: 5,
                max_words: 4
            })
        );
    }

    #[test]
    fn test_key_length_field() {
        assert_eq!(KeyFormat::Fixed(4).key_length_field(), 4);
        assert_eq!(KeyFormat::Variable.key_length_field(), 0);
        assert_eq!(KeyFormat::from_key_length_field(0), KeyFormat::Variable);
        assert_eq!(KeyFormat::from_key_length_field(2), KeyFormat::Fixed(2));
    }
}
