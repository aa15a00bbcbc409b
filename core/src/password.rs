//! Human-speakable transfer passwords.
//!
//! A password is `{id}-{w1}-{w2}-{w3}`: the numeric ID the rendezvous bound
//! for the sender, followed by three distinct words from an embedded list.
//! Only the SHA-256 hex digest ever reaches the rendezvous server.

use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const WORDLIST: &str = include_str!("wordlist.txt");

/// Number of words after the numeric prefix.
pub const WORD_COUNT: usize = 3;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("expected <id>-<word>-<word>-<word>")]
    Format,
    #[error("mailbox id must be a positive integer")]
    InvalidId,
}

fn words() -> impl Iterator<Item = &'static str> {
    WORDLIST.lines().map(str::trim).filter(|w| !w.is_empty())
}

/// A parsed or freshly generated transfer password.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    id: u64,
    words: [String; WORD_COUNT],
}

impl Password {
    /// Pick three distinct words for the rendezvous-assigned `id`.
    pub fn generate(id: u64) -> Self {
        let list: Vec<&str> = words().collect();
        let mut rng = rand::rngs::OsRng;
        let picked: Vec<&str> = list.choose_multiple(&mut rng, WORD_COUNT).copied().collect();

        Self {
            id,
            words: [
                picked[0].to_string(),
                picked[1].to_string(),
                picked[2].to_string(),
            ],
        }
    }

    /// Validate `^\d+-[a-z]+-[a-z]+-[a-z]+$` with a non-zero id.
    pub fn parse(s: &str) -> Result<Self, PasswordError> {
        let mut parts = s.split('-');
        let id_part = parts.next().ok_or(PasswordError::Format)?;
        if id_part.is_empty() || !id_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PasswordError::Format);
        }

        let mut words: [String; WORD_COUNT] = Default::default();
        for slot in words.iter_mut() {
            let word = parts.next().ok_or(PasswordError::Format)?;
            if word.is_empty() || !word.bytes().all(|b| b.is_ascii_lowercase()) {
                return Err(PasswordError::Format);
            }
            *slot = word.to_string();
        }
        if parts.next().is_some() {
            return Err(PasswordError::Format);
        }

        // All-digit strings only fail to parse on overflow
        let id: u64 = id_part.parse().map_err(|_| PasswordError::InvalidId)?;
        if id == 0 {
            return Err(PasswordError::InvalidId);
        }

        Ok(Self { id, words })
    }

    /// The mailbox id prefix.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lowercase hex SHA-256 of the full password string.
    pub fn hash(&self) -> String {
        hash_password(&self.to_string())
    }
}

/// Lowercase hex SHA-256 of a UTF-8 password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// First eight hex characters of a password hash, for logs.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        for word in &self.words {
            write!(f, "-{}", word)?;
        }
        Ok(())
    }
}

// Never print the words in debug output
impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl FromStr for Password {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Password::parse(s)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_wordlist_is_clean() {
        let all: Vec<&str> = words().collect();
        assert!(all.len() >= 256);
        let unique: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all
            .iter()
            .all(|w| w.bytes().all(|b| b.is_ascii_lowercase())));
    }

    #[test]
    fn test_generate_has_distinct_words() {
        for id in 1..50 {
            let pw = Password::generate(id);
            assert_eq!(pw.id(), id);
            let unique: HashSet<&String> = pw.words.iter().collect();
            assert_eq!(unique.len(), WORD_COUNT);
        }
    }

    #[test]
    fn test_generated_password_parses_back() {
        let pw = Password::generate(42);
        let text = pw.to_string();
        assert!(text.starts_with("42-"));
        assert_eq!(Password::parse(&text).unwrap(), pw);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in [
            "",
            "1",
            "1-alpha-bravo",
            "1-alpha-bravo-charlie-delta",
            "x-alpha-bravo-charlie",
            "1-Alpha-bravo-charlie",
            "1-alpha--charlie",
            "-alpha-bravo-charlie",
            "1-alpha-bravo-charlie ",
            "1-alpha-br4vo-charlie",
        ] {
            assert_eq!(Password::parse(bad), Err(PasswordError::Format), "{bad:?}");
        }
    }

    #[test]
    fn test_parse_rejects_zero_id() {
        assert_eq!(
            Password::parse("0-alpha-bravo-charlie"),
            Err(PasswordError::InvalidId)
        );
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        // sha256("abc")
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let pw = Password::parse("1-alpha-bravo-charlie").unwrap();
        assert_eq!(pw.hash(), hash_password("1-alpha-bravo-charlie"));
        assert_eq!(pw.hash().len(), 64);
    }

    #[test]
    fn test_debug_hides_words() {
        let pw = Password::parse("5-secret-words-here").unwrap();
        let dbg = format!("{:?}", pw);
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }
}
