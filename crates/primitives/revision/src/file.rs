use crate::{RevisionId, SchemaOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::IgnoredAny;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum RevisionFileError {
    #[error("Unsupported revision file extension: {0:?}")]
    UnsupportedFormat(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Revision {id} lists itself as a {relation}")]
    SelfReference { id: RevisionId, relation: &'static str },
    #[error("Revision {id} lists parent {parent} more than once")]
    DuplicateParent { id: RevisionId, parent: RevisionId },
    #[error("Revision {id} has an invalid branch label `{label}`")]
    InvalidBranchLabel { id: RevisionId, label: String },
    #[error("Unknown field `{0}`, expected one of: {fields}", fields = RevisionFile::FIELDS.join(", "))]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    /// Format of a revision file, or `None` when the file is not a revision file at all.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Yaml => "yaml",
            FileFormat::Json => "json",
        }
    }
}

/// `parent_id` is written as `null`, a single id or a list of ids for merge revisions.
mod parents {
    use super::RevisionId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(RevisionId),
        Many(Vec<RevisionId>),
    }

    pub fn serialize<S: Serializer>(parents: &[RevisionId], serializer: S) -> Result<S::Ok, S::Error> {
        match parents {
            [] => serializer.serialize_none(),
            [one] => one.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<RevisionId>, D::Error> {
        Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
            None => vec![],
            Some(OneOrMany::One(id)) => vec![id],
            Some(OneOrMany::Many(ids)) => ids,
        })
    }
}

/// Identity and position of a revision in the history graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHeader {
    pub id: RevisionId,
    #[serde(rename = "parent_id", default, with = "parents")]
    pub parents: Vec<RevisionId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub branch_labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<RevisionId>,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl RevisionHeader {
    pub fn new(id: RevisionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            parents: vec![],
            branch_labels: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            message: String::new(),
            created_at,
        }
    }

    pub fn with_parent(mut self, parent: RevisionId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_labels.insert(label.into());
        self
    }

    pub fn with_dependency(mut self, dependency: RevisionId) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Checks that only involve the revision itself. Checks across revisions are done when building the graph.
    pub fn validate(&self) -> Result<(), RevisionFileError> {
        if self.parents.contains(&self.id) {
            return Err(RevisionFileError::SelfReference { id: self.id.clone(), relation: "parent" });
        }
        if self.depends_on.contains(&self.id) {
            return Err(RevisionFileError::SelfReference { id: self.id.clone(), relation: "dependency" });
        }
        for (i, parent) in self.parents.iter().enumerate() {
            if self.parents[..i].contains(parent) {
                return Err(RevisionFileError::DuplicateParent { id: self.id.clone(), parent: parent.clone() });
            }
        }
        for label in &self.branch_labels {
            if label.is_empty() || label.contains('@') || label.chars().any(char::is_whitespace) {
                return Err(RevisionFileError::InvalidBranchLabel { id: self.id.clone(), label: label.clone() });
            }
        }
        Ok(())
    }
}

/// On-disk shape of a revision: its header plus the declarative forward and inverse operations.
///
/// A missing or `null` `revert` marks the revision as irreversible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionFile {
    #[serde(flatten)]
    pub header: RevisionHeader,
    #[serde(default)]
    pub apply: Vec<SchemaOp>,
    #[serde(default)]
    pub revert: Option<Vec<SchemaOp>>,
}

impl RevisionFile {
    /// Top-level keys of a revision file. The flattened header cannot deny unknown fields itself.
    pub const FIELDS: &'static [&'static str] =
        &["id", "parent_id", "branch_labels", "depends_on", "message", "created_at", "apply", "revert"];

    pub fn parse(content: &str, format: FileFormat) -> Result<Self, RevisionFileError> {
        let (file, keys): (Self, BTreeMap<String, IgnoredAny>) = match format {
            FileFormat::Yaml => (serde_yaml::from_str(content)?, serde_yaml::from_str(content)?),
            FileFormat::Json => (serde_json::from_str(content)?, serde_json::from_str(content)?),
        };
        if let Some(key) = keys.into_keys().find(|key| !Self::FIELDS.contains(&key.as_str())) {
            return Err(RevisionFileError::UnknownField(key));
        }
        file.header.validate()?;
        Ok(file)
    }

    pub fn read(path: &Path) -> Result<Self, RevisionFileError> {
        let format = FileFormat::from_path(path)
            .ok_or_else(|| RevisionFileError::UnsupportedFormat(path.display().to_string()))?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    pub fn render(&self, format: FileFormat) -> Result<String, RevisionFileError> {
        Ok(match format {
            FileFormat::Yaml => serde_yaml::to_string(self)?,
            FileFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }
}
