use super::common::*;
use crate::{Revision, SchemaSnapshot, Target};
use proptest::prelude::*;
use sp_revision::schema::{ColumnDef, ColumnType};
use sp_revision::SchemaOp;

/// Revision `i` of a chain: a table referencing the previous one, an index on it, and a seed row.
fn chain_link(i: usize) -> Revision {
    let table = format!("t{i}");
    let mut columns = vec![ColumnDef::new("id", ColumnType::Integer).primary_key()];
    if i > 0 {
        let parent = ColumnDef::new("parent_id", ColumnType::Integer).not_null().references(format!("t{}", i - 1), "id");
        columns.push(parent);
    }
    let parents = if i == 0 { vec![] } else { vec![format!("r{:03}", i - 1)] };
    let parents = parents.iter().map(String::as_str).collect::<Vec<_>>();

    Revision::script(
        header(&format!("r{i:03}"), &parents, i as i64),
        vec![
            SchemaOp::CreateTable { name: table.clone(), columns },
            SchemaOp::CreateIndex {
                table: table.clone(),
                name: format!("ix_{table}_id"),
                columns: vec!["id".into()],
                unique: true,
            },
            SchemaOp::Put { key: format!("seed/{table}"), value: i.to_string() },
        ],
        Some(vec![
            SchemaOp::Delete { key: format!("seed/{table}") },
            SchemaOp::DropIndex { table: table.clone(), name: format!("ix_{table}_id") },
            SchemaOp::DropTable { name: table },
        ]),
    )
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, ..Default::default() })]

    #[test]
    fn test_upgrade_then_downgrade_restores_schema(len in 1usize..8, partial in 0usize..8) {
        let test = open_ledger((0..len).map(chain_link));
        let ledger = &test.ledger;

        // Start from an arbitrary point of the chain.
        let start = partial.min(len);
        ledger.upgrade(&Target::Relative(start as i64)).unwrap();
        let before = ledger.schema().unwrap();

        ledger.upgrade(&Target::Head).unwrap();
        prop_assert_eq!(ledger.history().unwrap().len(), len);
        prop_assert_eq!(ledger.schema().unwrap().tables.len(), len);

        ledger.downgrade(&Target::Relative(-((len - start) as i64))).unwrap();
        prop_assert_eq!(ledger.schema().unwrap(), before);

        ledger.downgrade(&Target::Base).unwrap();
        prop_assert_eq!(ledger.current().unwrap(), None);
        prop_assert_eq!(ledger.schema().unwrap(), SchemaSnapshot::default());
    }
}
