//! Partition keys: the top-level category units are numbered under

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Storage code used when the partition key is empty ("all categories").
pub const ALL_SENTINEL: &str = "ALL";

/// Opaque identifier of a work category (e.g. a court level code).
///
/// The empty key means "every category" and is written as [`ALL_SENTINEL`]
/// in storage paths. Keys are restricted to ASCII alphanumerics and `-` so
/// the `checkpoint_{key}_{unit}.json` naming stays collision-free.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

/// Rejected partition key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPartitionKey {
    pub key: String,
    pub reason: &'static str,
}

impl fmt::Display for InvalidPartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid partition key {:?}: {}", self.key, self.reason)
    }
}

impl std::error::Error for InvalidPartitionKey {}

impl PartitionKey {
    /// Validate and wrap a partition key.
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidPartitionKey> {
        let key = key.into();
        let reason = if key == ALL_SENTINEL {
            Some("reserved for the empty key")
        } else if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            Some("only ASCII letters, digits and '-' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidPartitionKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// The empty key covering every category
    pub fn all() -> Self {
        Self(String::new())
    }

    /// Inverse of [`file_code`](Self::file_code)
    pub fn from_file_code(code: &str) -> Result<Self, InvalidPartitionKey> {
        if code == ALL_SENTINEL {
            Ok(Self::all())
        } else if code.is_empty() {
            Err(InvalidPartitionKey {
                key: String::new(),
                reason: "empty file code",
            })
        } else {
            Self::new(code)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Code used in file names: the key itself, or `ALL` for the empty key
    pub fn file_code(&self) -> &str {
        if self.is_all() {
            ALL_SENTINEL
        } else {
            &self.0
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_code())
    }
}

impl FromStr for PartitionKey {
    type Err = InvalidPartitionKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = InvalidPartitionKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_codes() {
        assert_eq!(PartitionKey::new("T").unwrap().as_str(), "T");
        assert_eq!(PartitionKey::new("CW").unwrap().file_code(), "CW");
        assert!(PartitionKey::new("level-2").is_ok());
    }

    #[test]
    fn empty_key_maps_to_sentinel() {
        let key = PartitionKey::new("").unwrap();
        assert!(key.is_all());
        assert_eq!(key.file_code(), "ALL");
        assert_eq!(key.to_string(), "ALL");
        assert_eq!(PartitionKey::from_file_code("ALL").unwrap(), key);
    }

    #[test]
    fn rejects_reserved_and_separators() {
        assert!(PartitionKey::new("ALL").is_err());
        assert!(PartitionKey::new("T_1").is_err());
        assert!(PartitionKey::new("a/b").is_err());
        assert!(PartitionKey::new("tòa").is_err());
        assert!(PartitionKey::from_file_code("").is_err());
    }

    #[test]
    fn serde_validates() {
        let key: PartitionKey = serde_json::from_str("\"H\"").unwrap();
        assert_eq!(key.as_str(), "H");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"H\"");
        assert!(serde_json::from_str::<PartitionKey>("\"x_y\"").is_err());
    }

    #[test]
    fn ordering_puts_empty_first() {
        let mut keys = vec![
            PartitionKey::new("T").unwrap(),
            PartitionKey::all(),
            PartitionKey::new("CW").unwrap(),
        ];
        keys.sort();
        assert_eq!(keys[0], PartitionKey::all());
        assert_eq!(keys[1].as_str(), "CW");
    }
}
