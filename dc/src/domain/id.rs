//! Resource and context identifiers
//!
//! Context IDs use the format: `{role}-{8-char-hex}`
//! Example: `candidate-01943a7c`

use serde::{Deserialize, Serialize};

/// Name of a shared resource, e.g. a database filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the name (used for lock files and db files)
    ///
    /// ASCII alphanumerics, `.` and `-` pass through; every other byte,
    /// including `_`, becomes `_XX` in hex. Distinct names never share a file.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("_{:02X}", byte));
            }
        }
        stem
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a context, unique for the lifetime of the process
///
/// Not stable across restarts: a restarted context generates a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a new ID for a context playing `role`
    pub fn generate(role: &str) -> Self {
        let uuid = uuid::Uuid::now_v7().simple().to_string();
        // v7 leads with the timestamp; take the random tail so ids minted in
        // the same millisecond still differ
        let suffix = &uuid[uuid.len() - 8..];
        Self(format!("{}-{}", role, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Role portion of the ID (before the first hyphen)
    pub fn role(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
