//! Content-derived cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lookup key for one embedded text: the first 8 bytes of the text's
/// SHA-256 digest as 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of the hex representation.
    pub const LEN: usize = 16;

    /// Derive the key for `text`. Same text, same key, across processes.
    #[must_use]
    pub fn for_text(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let hex: String = digest[..Self::LEN / 2]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Self(hex)
    }

    /// Accept an existing key string if it is well formed.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == Self::LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid cache key '{value}'"))
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::for_text("fn main() {}");
        let b = CacheKey::for_text("fn main() {}");
        assert_eq!(a, b);

        // Pinned value: keys must stay stable across releases or every
        // persisted cache goes cold.
        assert_eq!(CacheKey::for_text("").as_str(), "e3b0c44298fc1c14");
    }

    #[test]
    fn test_key_shape() {
        for text in ["", "a", "Hello, World!", "fn parse() -> Result<(), Error>"] {
            let key = CacheKey::for_text(text);
            assert_eq!(key.as_str().len(), CacheKey::LEN);
            assert!(
                key.as_str()
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            );
        }
    }

    #[test]
    fn test_different_texts_differ() {
        let keys: std::collections::HashSet<_> = (0..1000)
            .map(|i| CacheKey::for_text(&format!("chunk number {i}")))
            .collect();
        assert_eq!(keys.len(), 1000);
        assert_ne!(
            CacheKey::for_text("Hello, World!"),
            CacheKey::for_text("Hello, world!")
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(CacheKey::parse("0123456789abcdef").is_some());
        assert!(CacheKey::parse("0123456789ABCDEF").is_none());
        assert!(CacheKey::parse("0123").is_none());
        assert!(CacheKey::parse("0123456789abcdeg").is_none());
    }

    #[test]
    fn test_serde_round_trip_as_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(CacheKey::for_text("x"), 1u32);
        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::BTreeMap<CacheKey, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);

        let bad: Result<std::collections::BTreeMap<CacheKey, u32>, _> =
            serde_json::from_str(r#"{"nothex":1}"#);
        assert!(bad.is_err());
    }
}
