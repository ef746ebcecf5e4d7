use crate::{Ledger, LedgerConfig, Revision};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::fixture;
use sp_revision::schema::{ColumnDef, ColumnType};
use sp_revision::{RevisionHeader, RevisionId, SchemaOp};
use tempfile::TempDir;

pub fn id(s: &str) -> RevisionId {
    RevisionId::new(s).unwrap()
}

pub fn ids(revisions: Vec<&Revision>) -> Vec<String> {
    revisions.into_iter().map(|r| r.id().to_string()).collect()
}

pub fn created_at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 8, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn header(rev: &str, parents: &[&str], minutes: i64) -> RevisionHeader {
    parents.iter().fold(RevisionHeader::new(id(rev), created_at(minutes)), |header, p| header.with_parent(id(p)))
}

/// A reversible revision writing the seed-data key `rev/<id>`.
pub fn rev_at(rev: &str, parents: &[&str], minutes: i64) -> Revision {
    let key = format!("rev/{rev}");
    Revision::script(
        header(rev, parents, minutes),
        vec![SchemaOp::Put { key: key.clone(), value: rev.into() }],
        Some(vec![SchemaOp::Delete { key }]),
    )
}

pub fn rev(rev: &str, parents: &[&str]) -> Revision {
    rev_at(rev, parents, 0)
}

/// A reversible revision creating table `table` with an integer primary key.
pub fn create_table(rev: &str, parents: &[&str], table: &str) -> Revision {
    Revision::script(
        header(rev, parents, 0).with_message(format!("Create {table} table")),
        vec![SchemaOp::CreateTable {
            name: table.into(),
            columns: vec![ColumnDef::new("id", ColumnType::Integer).primary_key()],
        }],
        Some(vec![SchemaOp::DropTable { name: table.into() }]),
    )
}

/// Adds `user.is_admin` with a server default, then drops the default once existing rows are filled in.
pub fn add_is_admin(rev: &str, parents: &[&str]) -> Revision {
    Revision::script(
        header(rev, parents, 0).with_message("Add is_admin to User model"),
        vec![
            SchemaOp::AddColumn {
                table: "user".into(),
                column: ColumnDef::new("is_admin", ColumnType::Boolean).not_null().server_default("false"),
            },
            SchemaOp::DropDefault { table: "user".into(), column: "is_admin".into() },
        ],
        Some(vec![SchemaOp::DropColumn { table: "user".into(), column: "is_admin".into() }]),
    )
}

pub struct TestLedger {
    pub ledger: Ledger,
    pub dir: TempDir,
}

impl TestLedger {
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig::new(self.dir.path().join("db"))
    }
}

pub fn open_ledger(revisions: impl IntoIterator<Item = Revision>) -> TestLedger {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::open_with(&LedgerConfig::new(dir.path().join("db")), revisions).unwrap();
    TestLedger { ledger, dir }
}

/// `user` table, then `is_admin` on it.
#[fixture]
pub fn user_chain() -> TestLedger {
    open_ledger([create_table("aaaa", &[], "user"), add_is_admin("bbbb", &["aaaa"])])
}
