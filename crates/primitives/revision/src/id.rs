use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from a fresh uuid when generating an id.
const GENERATED_ID_LEN: usize = 12;

/// Words with a meaning of their own in a migration target, they can never be used as an id.
pub const RESERVED_IDS: &[&str] = &["head", "heads", "latest", "base", "earliest", "current"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RevisionIdError {
    #[error("Revision id cannot be empty")]
    Empty,
    #[error("Revision id `{0}` must start with an ascii letter or digit and only contain letters, digits, `_` and `-`")]
    InvalidCharacters(String),
    #[error("Revision id `{0}` is a reserved word")]
    Reserved(String),
}

/// Opaque identifier of a revision.
///
/// Ids are assigned once when the revision is authored and never change afterwards. Generated ids are the last 12
/// hex characters of a v4 uuid, but hand-written ids are accepted as long as they stay within `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Result<Self, RevisionIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RevisionIdError::Empty);
        }
        // A leading `-` would read as a relative target.
        if !id.starts_with(|c: char| c.is_ascii_alphanumeric())
            || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(RevisionIdError::InvalidCharacters(id));
        }
        if RESERVED_IDS.contains(&id.as_str()) {
            return Err(RevisionIdError::Reserved(id));
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(uuid[uuid.len() - GENERATED_ID_LEN..].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RevisionId {
    type Err = RevisionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = RevisionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RevisionId> for String {
    fn from(value: RevisionId) -> Self {
        value.0
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
