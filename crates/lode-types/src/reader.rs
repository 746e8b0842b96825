use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of one worker instance.
///
/// Unless one is configured, a fresh id is generated every time a worker
/// starts, so a restarted process never inherits the claims of its previous
/// incarnation. Ids read back from the registry document go through the
/// same blank check as [`ReaderId::new`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReaderId(String);

impl ReaderId {
    /// Generate a new, time-ordered reader id (UUID v7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Wrap an existing id. Empty or whitespace-only ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypeError::InvalidReaderId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines (first 8 characters).
    pub fn short_id(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl FromStr for ReaderId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ReaderId {
    type Error = TypeError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<ReaderId> for String {
    fn from(id: ReaderId) -> Self {
        id.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReaderId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ReaderId::generate();
        let b = ReaderId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn blank_id_rejected() {
        assert!(ReaderId::new("").is_err());
        assert!(ReaderId::new("   ").is_err());
        assert!("worker-1".parse::<ReaderId>().is_ok());
    }

    #[test]
    fn short_id_truncates() {
        let id = ReaderId::new("0123456789abcdef").unwrap();
        assert_eq!(id.short_id(), "01234567");
        let short = ReaderId::new("abc").unwrap();
        assert_eq!(short.short_id(), "abc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ReaderId::new("w-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"w-1\"");
        assert_eq!(serde_json::from_str::<ReaderId>("\"w-1\"").unwrap(), id);
    }

    #[test]
    fn blank_id_fails_to_deserialize() {
        assert!(serde_json::from_str::<ReaderId>("\"\"").is_err());
        assert!(serde_json::from_str::<ReaderId>("\"  \"").is_err());
    }
}
