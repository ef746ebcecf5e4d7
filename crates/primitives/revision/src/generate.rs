//! Authoring-time generation of revision files.

use crate::{FileFormat, RevisionFile, RevisionHeader, RevisionId, SchemaOp};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Longest message prefix kept in a revision file name.
const SLUG_MAX_LEN: usize = 40;

/// Everything an author decides about a new revision. The id and the creation time are filled in by [`generate`]
/// unless given explicitly.
#[derive(Debug, Clone, Default)]
pub struct RevisionDescriptor {
    pub id: Option<RevisionId>,
    pub message: String,
    pub parents: Vec<RevisionId>,
    pub branch_labels: BTreeSet<String>,
    pub depends_on: BTreeSet<RevisionId>,
    pub apply: Vec<SchemaOp>,
    /// `None` produces an irreversible revision.
    pub revert: Option<Vec<SchemaOp>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RevisionDescriptor {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), revert: Some(vec![]), ..Default::default() }
    }
}

pub fn generate(descriptor: RevisionDescriptor) -> RevisionFile {
    let RevisionDescriptor { id, message, parents, branch_labels, depends_on, apply, revert, created_at } = descriptor;
    let header = RevisionHeader {
        id: id.unwrap_or_else(RevisionId::generate),
        parents,
        branch_labels,
        depends_on,
        message,
        created_at: created_at.unwrap_or_else(Utc::now),
    };
    RevisionFile { header, apply, revert }
}

/// `<id>_<slug>.<ext>`, the slug being the lowercased message with everything but ascii alphanumerics collapsed
/// into `_`.
pub fn file_name(header: &RevisionHeader, format: FileFormat) -> String {
    let mut slug = String::with_capacity(header.message.len());
    for c in header.message.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('_');

    if slug.is_empty() {
        format!("{}.{}", header.id, format.extension())
    } else {
        format!("{}_{}.{}", header.id, slug, format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fills_id_and_time() {
        let parent = RevisionId::new("fc362fcdb5aa").unwrap();
        let mut descriptor = RevisionDescriptor::new("Add is_admin to User model");
        descriptor.parents = vec![parent.clone()];

        let file = generate(descriptor);
        assert_eq!(file.header.parents, vec![parent]);
        assert_eq!(file.header.message, "Add is_admin to User model");
        assert_eq!(file.revert, Some(vec![]));
        assert!(file.header.created_at <= Utc::now());
        assert_eq!(file.header.id.as_str().len(), 12);
    }

    #[test]
    fn test_file_name() {
        let mut header = RevisionHeader::new(RevisionId::new("212ebd3c6140").unwrap(), Utc::now());
        header.message = "Add is_admin to User model!".into();
        assert_eq!(file_name(&header, FileFormat::Yaml), "212ebd3c6140_add_is_admin_to_user_model.yaml");

        header.message = "  ".into();
        assert_eq!(file_name(&header, FileFormat::Json), "212ebd3c6140.json");
    }
}
