//! The script directory: revision files on disk, and authoring of new ones.

use crate::graph::RevisionGraph;
use crate::{LedgerError, Revision};
use itertools::Itertools;
use sp_revision::generate::file_name;
use sp_revision::{generate, FileFormat, RevisionDescriptor, RevisionFile};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sub-directory of the script location holding the revision files.
pub const VERSIONS_DIR: &str = "versions";

/// Where the parents of a new revision come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentSelection {
    /// The single head of the script graph, or none when the directory is empty.
    CurrentHead,
    /// A new root. Needs a branch label once the history has a root.
    Root,
    /// Revision specs, resolved against the script graph.
    Explicit(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    root: PathBuf,
}

impl ScriptDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory layout. Existing revision files are left alone.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = Self::new(root);
        fs::create_dir_all(dir.versions_dir())?;
        tracing::info!("📁 Initialized script directory at {:?}", dir.root.display());
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    /// Reads every revision file, in file name order. Files with another extension are ignored.
    pub fn load(&self) -> Result<Vec<Revision>, LedgerError> {
        let versions = self.versions_dir();
        if !versions.is_dir() {
            return Err(LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("script directory {:?} has no `{VERSIONS_DIR}` directory, run `migrate init` first", self.root),
            )));
        }

        let paths = fs::read_dir(&versions)?
            .map(|entry| entry.map(|e| e.path()))
            .filter_ok(|path| path.is_file() && FileFormat::from_path(path).is_some())
            .collect::<Result<Vec<_>, _>>()?;

        let revisions = paths
            .into_iter()
            .sorted()
            .map(|path| {
                let file = RevisionFile::read(&path)
                    .map_err(|source| LedgerError::InvalidRevisionFile { path: path.clone(), source })?;
                Ok(Revision::from_file(file, &path))
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        tracing::debug!("Loaded {} revision(s) from {:?}", revisions.len(), versions.display());
        Ok(revisions)
    }

    pub fn graph(&self) -> Result<RevisionGraph, LedgerError> {
        RevisionGraph::build(self.load()?)
    }

    /// Writes a revision file. Never overwrites an existing file.
    pub fn write(&self, file: &RevisionFile, format: FileFormat) -> Result<PathBuf, LedgerError> {
        let path = self.versions_dir().join(file_name(&file.header, format));
        let content =
            file.render(format).map_err(|source| LedgerError::InvalidRevisionFile { path: path.clone(), source })?;

        let mut out = OpenOptions::new().write(true).create_new(true).open(&path)?;
        out.write_all(content.as_bytes())?;
        out.sync_all()?;
        Ok(path)
    }

    /// Generates a revision from `descriptor`, checks it fits in the existing history and writes it.
    pub fn author(
        &self,
        mut descriptor: RevisionDescriptor,
        parents: ParentSelection,
        format: FileFormat,
    ) -> Result<(PathBuf, RevisionFile), LedgerError> {
        let existing = self.load()?;
        let graph = RevisionGraph::build(existing.iter().cloned())?;

        descriptor.parents = match parents {
            ParentSelection::CurrentHead => match graph.heads().as_slice() {
                [] => vec![],
                [head] => vec![head.id().clone()],
                heads => return Err(LedgerError::Conflict { heads: heads.iter().map(|r| r.id().clone()).collect() }),
            },
            ParentSelection::Root => vec![],
            ParentSelection::Explicit(specs) => {
                specs.iter().map(|spec| graph.resolve(spec).map(|r| r.id().clone())).collect::<Result<_, _>>()?
            }
        };
        descriptor.depends_on = descriptor
            .depends_on
            .iter()
            .map(|dep| graph.resolve(dep.as_str()).map(|r| r.id().clone()))
            .collect::<Result<_, _>>()?;

        let file = generate(descriptor);
        file.header.validate().map_err(|source| LedgerError::InvalidRevisionFile {
            path: self.versions_dir().join(file_name(&file.header, format)),
            source,
        })?;

        // The new revision must keep the history valid: unique labels, labeled roots.
        let candidate = Revision::script(file.header.clone(), file.apply.clone(), file.revert.clone());
        RevisionGraph::build(existing.into_iter().chain([candidate]))?;

        let path = self.write(&file, format)?;
        tracing::info!("📝 Generated revision {} at {:?}", file.header.id, path.display());
        Ok((path, file))
    }

    /// Writes a revision joining several heads. Its apply and revert are empty.
    pub fn merge(
        &self,
        heads: Vec<String>,
        message: impl Into<String>,
        format: FileFormat,
    ) -> Result<(PathBuf, RevisionFile), LedgerError> {
        if heads.len() < 2 {
            return Err(LedgerError::InvalidTarget("a merge needs at least two revisions".into()));
        }
        self.author(RevisionDescriptor::new(message), ParentSelection::Explicit(heads), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::{fixture, rstest};
    use sp_revision::schema::{ColumnDef, ColumnType};
    use sp_revision::SchemaOp;
    use tempfile::TempDir;

    #[fixture]
    fn scripts() -> (TempDir, ScriptDirectory) {
        let dir = TempDir::new().unwrap();
        let scripts = ScriptDirectory::init(dir.path()).unwrap();
        (dir, scripts)
    }

    fn create_user() -> RevisionDescriptor {
        let mut descriptor = RevisionDescriptor::new("Create user table");
        descriptor.apply = vec![SchemaOp::CreateTable {
            name: "user".into(),
            columns: vec![ColumnDef::new("id", ColumnType::Integer).primary_key()],
        }];
        descriptor.revert = Some(vec![SchemaOp::DropTable { name: "user".into() }]);
        descriptor
    }

    #[rstest]
    fn test_author_chain_and_reload(scripts: (TempDir, ScriptDirectory)) {
        let (_dir, scripts) = scripts;
        let (path, first) = scripts.author(create_user(), ParentSelection::CurrentHead, FileFormat::Yaml).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_create_user_table.yaml"));
        assert!(first.header.is_root());

        let (_, second) =
            scripts.author(RevisionDescriptor::new("Second"), ParentSelection::CurrentHead, FileFormat::Json).unwrap();
        assert_eq!(second.header.parents, vec![first.header.id.clone()]);

        let graph = scripts.graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.heads()[0].id(), &second.header.id);
        assert_eq!(graph.get(&first.header.id).unwrap().source.as_deref(), Some(path.as_path()));
    }

    #[rstest]
    fn test_author_conflict_and_merge(scripts: (TempDir, ScriptDirectory)) {
        let (_dir, scripts) = scripts;
        let (_, root) = scripts.author(create_user(), ParentSelection::CurrentHead, FileFormat::Yaml).unwrap();
        let at_root = || ParentSelection::Explicit(vec![root.header.id.to_string()]);
        let (_, left) = scripts.author(RevisionDescriptor::new("Left"), at_root(), FileFormat::Yaml).unwrap();
        let (_, right) = scripts.author(RevisionDescriptor::new("Right"), at_root(), FileFormat::Yaml).unwrap();

        assert_matches!(
            scripts.author(RevisionDescriptor::new("Third"), ParentSelection::CurrentHead, FileFormat::Yaml),
            Err(LedgerError::Conflict { heads }) if heads.len() == 2
        );

        let (_, merge) = scripts
            .merge(vec![left.header.id.to_string(), right.header.id.to_string()], "Merge", FileFormat::Yaml)
            .unwrap();
        assert!(merge.header.is_merge());
        assert_eq!(scripts.graph().unwrap().heads().len(), 1);
    }

    #[rstest]
    fn test_second_root_needs_label(scripts: (TempDir, ScriptDirectory)) {
        let (_dir, scripts) = scripts;
        scripts.author(create_user(), ParentSelection::CurrentHead, FileFormat::Yaml).unwrap();
        assert_matches!(
            scripts.author(RevisionDescriptor::new("Other"), ParentSelection::Root, FileFormat::Yaml),
            Err(LedgerError::UnlabeledRoot(_))
        );

        let mut labeled = RevisionDescriptor::new("Other");
        labeled.branch_labels.insert("reporting".into());
        scripts.author(labeled, ParentSelection::Root, FileFormat::Yaml).unwrap();
        assert_eq!(scripts.load().unwrap().len(), 2);
    }

    #[rstest]
    fn test_invalid_file_fails_loading(scripts: (TempDir, ScriptDirectory)) {
        let (_dir, scripts) = scripts;
        fs::write(scripts.versions_dir().join("README.md"), "not a revision").unwrap();
        assert!(scripts.load().unwrap().is_empty());

        fs::write(scripts.versions_dir().join("broken.yaml"), "id: [").unwrap();
        assert_matches!(scripts.load(), Err(LedgerError::InvalidRevisionFile { .. }));
    }
}
