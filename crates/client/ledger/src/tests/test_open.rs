use super::common::*;
use crate::{Ledger, LedgerError, ParentSelection, ScriptDirectory, Target, EXIT_LOCK_CONTENTION};
use assert_matches::assert_matches;
use rstest::rstest;
use sp_revision::{FileFormat, RevisionDescriptor, SchemaOp};

#[rstest]
fn test_second_open_is_lock_contention(user_chain: TestLedger) {
    let err = Ledger::open_with(&user_chain.config(), [rev("aaaa", &[])]).unwrap_err();
    assert_matches!(err, LedgerError::LockContention { .. });
    assert_eq!(err.exit_code(), EXIT_LOCK_CONTENTION);
}

#[test]
fn test_marker_survives_reopen() {
    let revisions = || [create_table("aaaa", &[], "user"), add_is_admin("bbbb", &["aaaa"])];
    let TestLedger { ledger, dir } = open_ledger(revisions());
    ledger.upgrade(&Target::Relative(1)).unwrap();
    drop(ledger);

    let config = crate::LedgerConfig::new(dir.path().join("db"));
    let ledger = Ledger::open_with(&config, revisions()).unwrap();
    assert_eq!(ledger.current().unwrap(), Some(id("aaaa")));
    assert!(ledger.schema().unwrap().tables.contains_key("user"));
}

#[test]
fn test_invalid_graph_is_rejected_before_locking() {
    let test = open_ledger([rev("aaaa", &[])]);
    let err = Ledger::open_with(&test.config(), [rev("aaaa", &[]), rev("bbbb", &["zzzz"])]).unwrap_err();
    assert_matches!(err, LedgerError::MissingReference { .. });
}

#[test]
fn test_open_from_script_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let scripts = ScriptDirectory::init(dir.path().join("migrations")).unwrap();

    let mut descriptor = RevisionDescriptor::new("Seed site settings");
    descriptor.apply = vec![SchemaOp::Put { key: "settings/site_name".into(), value: "Academy".into() }];
    descriptor.revert = Some(vec![SchemaOp::Delete { key: "settings/site_name".into() }]);
    let (_, file) = scripts.author(descriptor, ParentSelection::CurrentHead, FileFormat::Yaml).unwrap();

    let ledger = Ledger::open(&crate::LedgerConfig::new(dir.path().join("db")), &scripts).unwrap();
    ledger.upgrade(&Target::Head).unwrap();
    assert_eq!(ledger.current().unwrap(), Some(file.header.id.clone()));
    assert_eq!(ledger.show(&file.header.id.as_str()[..6]).unwrap().header.message, "Seed site settings");
    assert_eq!(ledger.schema().unwrap().data["settings/site_name"], "Academy");
}
