//! Schema reader/validator: rebuilds a [`MetaSnapshot`] from durable catalog
//! rows and cross-checks it against the introspected physical schema. Any
//! disagreement fails the load with a structured description of both sides,
//! so startup refuses to run against a divergent schema.

use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::Itertools;

use crate::model::{
    FieldType, IndexOrdering, MetaCollection, MetaDatabase, MetaDocPart,
    MetaDocPartIndex, MetaField, MetaIndex, MetaIndexField, MetaScalar, MetaSnapshot,
    TableRef, INTERNAL_COLUMNS,
};
use crate::repository::interface::{
    CollectionRow, DatabaseRow, DocPartIndexColumnRow, DocPartIndexRow, DocPartRow,
    FieldRow, IndexFieldRow, IndexRow, ScalarRow,
};

/// Suffix of the internal per-table lookup index on `did`.
pub const INTERNAL_INDEX_SUFFIX: &str = "_did_idx";

/// All catalog rows, as loaded in one pass by `read_metadata`.
#[derive(Debug, Default)]
pub struct CatalogRows {
    pub databases: Vec<DatabaseRow>,
    pub collections: Vec<CollectionRow>,
    pub doc_parts: Vec<DocPartRow>,
    pub fields: Vec<FieldRow>,
    pub scalars: Vec<ScalarRow>,
    pub indexes: Vec<IndexRow>,
    pub index_fields: Vec<IndexFieldRow>,
    pub doc_part_indexes: Vec<DocPartIndexRow>,
    pub doc_part_index_columns: Vec<DocPartIndexColumnRow>,
}

/// Normalized physical schema as introspected by a backend: tables with typed
/// columns and indexes, grouped under the database identifier that claims
/// them. `unclaimed_tables` are physical tables no catalogued database
/// accounts for.
#[derive(Debug, Default)]
pub struct PhysicalSchema {
    pub databases: BTreeMap<String, BTreeMap<String, PhysicalTable>>,
    pub unclaimed_tables: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PhysicalTable {
    /// Column name to introspected type.
    pub columns: BTreeMap<String, String>,
    pub indexes: Vec<PhysicalIndex>,
}

#[derive(Debug)]
pub struct PhysicalIndex {
    pub name: String,
    pub unique: bool,
    /// (column name, descending) in index order.
    pub columns: Vec<(String, bool)>,
}

/// One catalog/physical disagreement, naming both sides.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Divergence {
    #[error("catalogued table {database}.{collection} {table_ref} (physical {identifier:?}) has no physical table")]
    MissingTable {
        database: String,
        collection: String,
        table_ref: String,
        identifier: String,
    },

    #[error("physical table {identifier:?} in database {database:?} has no catalog counterpart")]
    UnknownTable { database: String, identifier: String },

    #[error("catalogued column {column:?} of table {table:?} ({expected_type}) is missing physically")]
    MissingColumn {
        table: String,
        column: String,
        expected_type: String,
    },

    #[error("column {column:?} of table {table:?} is {actual:?} physically but {expected:?} in the catalog")]
    ColumnTypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },

    #[error("physical column {column:?} ({actual_type}) of table {table:?} has no catalog counterpart")]
    UnknownColumn {
        table: String,
        column: String,
        actual_type: String,
    },

    #[error("catalogued index {identifier:?} on table {table:?} has no physical index")]
    MissingIndex { table: String, identifier: String },

    #[error("index {identifier:?} on table {table:?} diverges: {reason}")]
    IndexMismatch {
        table: String,
        identifier: String,
        reason: String,
    },

    #[error("physical index {identifier:?} on table {table:?} has no catalog counterpart")]
    UnknownIndex { table: String, identifier: String },
}

/// Rebuild the in-memory tree from catalog rows. Row ordering does not
/// matter; every child row must resolve to its parent.
pub fn build_snapshot(rows: CatalogRows) -> Result<MetaSnapshot, String> {
    let mut snapshot = MetaSnapshot::default();

    for row in rows.databases {
        snapshot.databases.insert(
            row.name.clone(),
            MetaDatabase {
                name: row.name,
                identifier: row.identifier,
                import_mode: row.import_mode,
                collections: BTreeMap::new(),
            },
        );
    }

    for row in rows.collections {
        let database = snapshot
            .databases
            .get_mut(&row.database)
            .ok_or_else(|| format!("collection row {:?} has no database", row.name))?;
        database.collections.insert(
            row.name.clone(),
            MetaCollection::new(row.name, row.identifier),
        );
    }

    for row in rows.doc_parts {
        let table_ref = TableRef::from_catalog(&row.table_ref)
            .map_err(|e| format!("bad table_ref {:?}: {e}", row.table_ref))?;
        let col = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .ok_or_else(|| {
                format!(
                    "doc part row references unknown collection {}.{}",
                    row.database, row.collection
                )
            })?;
        let mut doc_part = MetaDocPart::new(table_ref.clone(), row.identifier);
        doc_part.next_rid = row.next_rid;
        col.doc_parts.insert(table_ref, doc_part);
    }

    for row in rows.fields {
        let table_ref = TableRef::from_catalog(&row.table_ref)
            .map_err(|e| format!("bad table_ref {:?}: {e}", row.table_ref))?;
        let field_type = FieldType::from_str(&row.r#type)
            .map_err(|_| format!("unknown field type {:?}", row.r#type))?;
        let doc_part = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .and_then(|col| col.doc_parts.get_mut(&table_ref))
            .ok_or_else(|| format!("field row references unknown doc part {table_ref}"))?;
        doc_part.fields.insert(
            (row.name.clone(), field_type),
            MetaField {
                name: row.name,
                identifier: row.identifier,
                field_type,
            },
        );
    }

    for row in rows.scalars {
        let table_ref = TableRef::from_catalog(&row.table_ref)
            .map_err(|e| format!("bad table_ref {:?}: {e}", row.table_ref))?;
        let field_type = FieldType::from_str(&row.r#type)
            .map_err(|_| format!("unknown field type {:?}", row.r#type))?;
        let doc_part = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .and_then(|col| col.doc_parts.get_mut(&table_ref))
            .ok_or_else(|| format!("scalar row references unknown doc part {table_ref}"))?;
        doc_part.scalars.insert(
            field_type,
            MetaScalar {
                identifier: row.identifier,
                field_type,
            },
        );
    }

    for row in rows.indexes {
        let col = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .ok_or_else(|| {
                format!(
                    "index row references unknown collection {}.{}",
                    row.database, row.collection
                )
            })?;
        col.indexes.insert(
            row.name.clone(),
            MetaIndex {
                name: row.name,
                unique: row.unique,
                fields: Vec::new(),
            },
        );
    }

    for row in rows.index_fields.into_iter().sorted_by_key(|r| {
        (r.database.clone(), r.collection.clone(), r.index.clone(), r.position)
    }) {
        let table_ref = TableRef::from_catalog(&row.table_ref)
            .map_err(|e| format!("bad table_ref {:?}: {e}", row.table_ref))?;
        let ordering = IndexOrdering::from_str(&row.ordering)
            .map_err(|_| format!("unknown ordering {:?}", row.ordering))?;
        let index = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .and_then(|col| col.indexes.get_mut(&row.index))
            .ok_or_else(|| format!("index field row references unknown index {:?}", row.index))?;
        index.fields.push(MetaIndexField {
            table_ref,
            name: row.name,
            ordering,
        });
    }

    let mut dp_index_columns: BTreeMap<(String, String, String), Vec<DocPartIndexColumnRow>> =
        BTreeMap::new();
    for row in rows.doc_part_index_columns {
        dp_index_columns
            .entry((
                row.database.clone(),
                row.collection.clone(),
                row.index_identifier.clone(),
            ))
            .or_default()
            .push(row);
    }

    for row in rows.doc_part_indexes {
        let table_ref = TableRef::from_catalog(&row.table_ref)
            .map_err(|e| format!("bad table_ref {:?}: {e}", row.table_ref))?;
        let mut columns = Vec::new();
        if let Some(column_rows) = dp_index_columns.remove(&(
            row.database.clone(),
            row.collection.clone(),
            row.identifier.clone(),
        )) {
            for column_row in column_rows.into_iter().sorted_by_key(|r| r.position) {
                let ordering = IndexOrdering::from_str(&column_row.ordering)
                    .map_err(|_| format!("unknown ordering {:?}", column_row.ordering))?;
                columns.push((column_row.identifier, ordering));
            }
        }
        let doc_part = snapshot
            .databases
            .get_mut(&row.database)
            .and_then(|db| db.collections.get_mut(&row.collection))
            .and_then(|col| col.doc_parts.get_mut(&table_ref))
            .ok_or_else(|| {
                format!("doc part index row references unknown doc part {table_ref}")
            })?;
        doc_part.indexes.push(MetaDocPartIndex {
            identifier: row.identifier,
            unique: row.unique,
            columns,
        });
    }

    if let Some(((database, collection, identifier), _)) =
        dp_index_columns.into_iter().next()
    {
        return Err(format!(
            "doc part index column rows for unknown index {identifier:?} in {database}.{collection}"
        ));
    }

    Ok(snapshot)
}

/// Cross-check the catalogued tree against the physical schema.
/// `expected_type` maps a field type onto the backend's introspected column
/// type. Index checks are skipped for databases in import mode (their
/// physical indexes are deliberately deferred).
pub fn cross_check(
    snapshot: &MetaSnapshot,
    physical: &PhysicalSchema,
    expected_type: fn(FieldType) -> &'static str,
) -> Vec<Divergence> {
    let mut divergences = Vec::new();

    for identifier in &physical.unclaimed_tables {
        divergences.push(Divergence::UnknownTable {
            database: "<none>".to_string(),
            identifier: identifier.clone(),
        });
    }

    for database in snapshot.databases.values() {
        let empty = BTreeMap::new();
        let physical_tables = physical
            .databases
            .get(&database.identifier)
            .unwrap_or(&empty);

        let mut claimed = Vec::new();

        for collection in database.collections.values() {
            for doc_part in collection.doc_parts.values() {
                claimed.push(doc_part.identifier.as_str());
                let Some(table) = physical_tables.get(&doc_part.identifier) else {
                    divergences.push(Divergence::MissingTable {
                        database: database.name.clone(),
                        collection: collection.name.clone(),
                        table_ref: doc_part.table_ref.to_string(),
                        identifier: doc_part.identifier.clone(),
                    });
                    continue;
                };

                check_columns(doc_part, table, expected_type, &mut divergences);
                if !database.import_mode {
                    check_indexes(doc_part, table, &mut divergences);
                }
            }
        }

        for identifier in physical_tables.keys() {
            if !claimed.contains(&identifier.as_str()) {
                divergences.push(Divergence::UnknownTable {
                    database: database.identifier.clone(),
                    identifier: identifier.clone(),
                });
            }
        }
    }

    divergences
}

fn check_columns(
    doc_part: &MetaDocPart,
    table: &PhysicalTable,
    expected_type: fn(FieldType) -> &'static str,
    divergences: &mut Vec<Divergence>,
) {
    let mut expected: BTreeMap<&str, FieldType> = BTreeMap::new();
    for field in doc_part.fields.values() {
        expected.insert(&field.identifier, field.field_type);
    }
    for scalar in doc_part.scalars.values() {
        expected.insert(&scalar.identifier, scalar.field_type);
    }

    for (column, field_type) in &expected {
        match table.columns.get(*column) {
            None => divergences.push(Divergence::MissingColumn {
                table: doc_part.identifier.clone(),
                column: column.to_string(),
                expected_type: expected_type(*field_type).to_string(),
            }),
            Some(actual) => {
                let wanted = expected_type(*field_type);
                if !actual.eq_ignore_ascii_case(wanted) {
                    divergences.push(Divergence::ColumnTypeMismatch {
                        table: doc_part.identifier.clone(),
                        column: column.to_string(),
                        expected: wanted.to_string(),
                        actual: actual.clone(),
                    });
                }
            }
        }
    }

    for (column, actual_type) in &table.columns {
        if INTERNAL_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        if !expected.contains_key(column.as_str()) {
            divergences.push(Divergence::UnknownColumn {
                table: doc_part.identifier.clone(),
                column: column.clone(),
                actual_type: actual_type.clone(),
            });
        }
    }
}

fn check_indexes(
    doc_part: &MetaDocPart,
    table: &PhysicalTable,
    divergences: &mut Vec<Divergence>,
) {
    for dp_index in &doc_part.indexes {
        let Some(physical) = table
            .indexes
            .iter()
            .find(|i| i.name.ends_with(&dp_index.identifier))
        else {
            divergences.push(Divergence::MissingIndex {
                table: doc_part.identifier.clone(),
                identifier: dp_index.identifier.clone(),
            });
            continue;
        };

        if physical.unique != dp_index.unique {
            divergences.push(Divergence::IndexMismatch {
                table: doc_part.identifier.clone(),
                identifier: dp_index.identifier.clone(),
                reason: format!(
                    "uniqueness is {} physically, {} in the catalog",
                    physical.unique, dp_index.unique
                ),
            });
            continue;
        }

        let catalog_columns: Vec<(String, bool)> = dp_index
            .columns
            .iter()
            .map(|(id, ordering)| (id.clone(), *ordering == IndexOrdering::Desc))
            .collect();
        if physical.columns != catalog_columns {
            divergences.push(Divergence::IndexMismatch {
                table: doc_part.identifier.clone(),
                identifier: dp_index.identifier.clone(),
                reason: format!(
                    "columns are {:?} physically, {:?} in the catalog",
                    physical.columns, catalog_columns
                ),
            });
        }
    }

    for physical in &table.indexes {
        if physical.name.ends_with(INTERNAL_INDEX_SUFFIX) {
            continue;
        }
        if !doc_part
            .indexes
            .iter()
            .any(|i| physical.name.ends_with(&i.identifier))
        {
            divergences.push(Divergence::UnknownIndex {
                table: doc_part.identifier.clone(),
                identifier: physical.name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_orders() -> MetaSnapshot {
        build_snapshot(CatalogRows {
            databases: vec![DatabaseRow {
                name: "shop".to_string(),
                identifier: "shop".to_string(),
                import_mode: false,
            }],
            collections: vec![CollectionRow {
                database: "shop".to_string(),
                name: "orders".to_string(),
                identifier: "orders".to_string(),
            }],
            doc_parts: vec![DocPartRow {
                database: "shop".to_string(),
                collection: "orders".to_string(),
                table_ref: TableRef::root().to_catalog(),
                identifier: "orders".to_string(),
                next_rid: 7,
            }],
            fields: vec![FieldRow {
                database: "shop".to_string(),
                collection: "orders".to_string(),
                table_ref: TableRef::root().to_catalog(),
                name: "qty".to_string(),
                identifier: "qty_i".to_string(),
                r#type: "INTEGER".to_string(),
            }],
            ..Default::default()
        })
        .unwrap()
    }

    fn sqlite_type(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Integer => "INTEGER",
            _ => "TEXT",
        }
    }

    fn physical_with(columns: &[(&str, &str)]) -> PhysicalSchema {
        let mut table = PhysicalTable::default();
        for (name, ty) in columns {
            table.columns.insert(name.to_string(), ty.to_string());
        }
        let mut tables = BTreeMap::new();
        tables.insert("orders".to_string(), table);
        let mut databases = BTreeMap::new();
        databases.insert("shop".to_string(), tables);
        PhysicalSchema {
            databases,
            unclaimed_tables: vec![],
        }
    }

    #[test]
    fn test_build_snapshot_round_trip() {
        let snapshot = snapshot_with_orders();
        let doc_part = snapshot
            .collection("shop", "orders")
            .unwrap()
            .doc_part(&TableRef::root())
            .unwrap();
        assert_eq!(doc_part.next_rid, 7);
        assert!(doc_part.field("qty", FieldType::Integer).is_some());
    }

    #[test]
    fn test_build_snapshot_rejects_orphan_rows() {
        let err = build_snapshot(CatalogRows {
            collections: vec![CollectionRow {
                database: "ghost".to_string(),
                name: "orders".to_string(),
                identifier: "orders".to_string(),
            }],
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.contains("no database"));
    }

    #[test]
    fn test_cross_check_agreement() {
        let snapshot = snapshot_with_orders();
        let physical = physical_with(&[("did", "BIGINT"), ("qty_i", "INTEGER")]);
        assert!(cross_check(&snapshot, &physical, sqlite_type).is_empty());
    }

    #[test]
    fn test_cross_check_missing_column() {
        let snapshot = snapshot_with_orders();
        let physical = physical_with(&[("did", "BIGINT")]);
        let divergences = cross_check(&snapshot, &physical, sqlite_type);
        assert!(matches!(
            divergences.as_slice(),
            [Divergence::MissingColumn { column, .. }] if column == "qty_i"
        ));
    }

    #[test]
    fn test_cross_check_type_mismatch_and_stray_column() {
        let snapshot = snapshot_with_orders();
        let physical =
            physical_with(&[("qty_i", "TEXT"), ("mystery", "BLOB"), ("did", "BIGINT")]);
        let divergences = cross_check(&snapshot, &physical, sqlite_type);
        assert_eq!(divergences.len(), 2);
        assert!(divergences
            .iter()
            .any(|d| matches!(d, Divergence::ColumnTypeMismatch { column, .. } if column == "qty_i")));
        assert!(divergences
            .iter()
            .any(|d| matches!(d, Divergence::UnknownColumn { column, .. } if column == "mystery")));
    }

    #[test]
    fn test_cross_check_missing_table_and_unknown_table() {
        let snapshot = snapshot_with_orders();
        let mut physical = PhysicalSchema::default();
        physical
            .databases
            .insert("shop".to_string(), BTreeMap::new());
        physical
            .databases
            .get_mut("shop")
            .unwrap()
            .insert("stray".to_string(), PhysicalTable::default());

        let divergences = cross_check(&snapshot, &physical, sqlite_type);
        assert!(divergences
            .iter()
            .any(|d| matches!(d, Divergence::MissingTable { identifier, .. } if identifier == "orders")));
        assert!(divergences
            .iter()
            .any(|d| matches!(d, Divergence::UnknownTable { identifier, .. } if identifier == "stray")));
    }

    #[test]
    fn test_cross_check_import_mode_skips_indexes() {
        let mut snapshot = snapshot_with_orders();
        {
            let database = snapshot.databases.get_mut("shop").unwrap();
            database.import_mode = true;
            let doc_part = database
                .collections
                .get_mut("orders")
                .unwrap()
                .doc_parts
                .get_mut(&TableRef::root())
                .unwrap();
            doc_part.indexes.push(MetaDocPartIndex {
                identifier: "idx_feedfeedfeedfeed".to_string(),
                unique: false,
                columns: vec![("qty_i".to_string(), IndexOrdering::Asc)],
            });
        }
        // No physical index present, but import mode defers them.
        let physical = physical_with(&[("did", "BIGINT"), ("qty_i", "INTEGER")]);
        assert!(cross_check(&snapshot, &physical, sqlite_type).is_empty());

        snapshot.databases.get_mut("shop").unwrap().import_mode = false;
        let divergences = cross_check(&snapshot, &physical, sqlite_type);
        assert!(matches!(
            divergences.as_slice(),
            [Divergence::MissingIndex { .. }]
        ));
    }
}
