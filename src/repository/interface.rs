use std::fmt::Debug;

use async_trait::async_trait;

use crate::model::{
    IndexOrdering, MetaDocPart, MetaField, MetaIndex, MetaScalar, MetaSnapshot, TableRef,
};
use crate::validator::Divergence;

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct DatabaseRow {
    pub name: String,
    pub identifier: String,
    pub import_mode: bool,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct CollectionRow {
    pub database: String,
    pub name: String,
    pub identifier: String,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct DocPartRow {
    pub database: String,
    pub collection: String,
    pub table_ref: String,
    pub identifier: String,
    pub next_rid: i64,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct FieldRow {
    pub database: String,
    pub collection: String,
    pub table_ref: String,
    pub name: String,
    pub identifier: String,
    pub r#type: String,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct ScalarRow {
    pub database: String,
    pub collection: String,
    pub table_ref: String,
    pub r#type: String,
    pub identifier: String,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct IndexRow {
    pub database: String,
    pub collection: String,
    pub name: String,
    pub unique: bool,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct IndexFieldRow {
    pub database: String,
    pub collection: String,
    pub index: String,
    pub position: i32,
    pub table_ref: String,
    pub name: String,
    pub ordering: String,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct DocPartIndexRow {
    pub database: String,
    pub collection: String,
    pub table_ref: String,
    pub identifier: String,
    pub unique: bool,
}

#[derive(sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct DocPartIndexColumnRow {
    pub database: String,
    pub collection: String,
    pub index_identifier: String,
    pub table_ref: String,
    pub position: i32,
    pub identifier: String,
    pub ordering: String,
}

/// A genuinely new physical index to create alongside a logical index.
#[derive(Debug, Clone)]
pub struct NewDocPartIndex {
    pub table_ref: TableRef,
    pub table_identifier: String,
    pub identifier: String,
    pub unique: bool,
    pub columns: Vec<(String, IndexOrdering)>,
}

/// A physical index whose last referencing logical index went away.
#[derive(Debug, Clone)]
pub struct OrphanedDocPartIndex {
    pub table_ref: TableRef,
    pub identifier: String,
}

#[derive(Debug, Clone)]
pub struct IndexRename {
    pub from_identifier: String,
    pub to_identifier: String,
    pub unique: bool,
    pub columns: Vec<(String, IndexOrdering)>,
}

#[derive(Debug, Clone)]
pub struct DocPartRename {
    pub table_ref: TableRef,
    pub from_identifier: String,
    pub to_identifier: String,
    pub index_renames: Vec<IndexRename>,
}

#[derive(Debug, Clone)]
pub struct RenameCollectionRequest {
    pub from_database: String,
    pub from_database_identifier: String,
    pub from_collection: String,
    pub to_database: String,
    pub to_database_identifier: String,
    pub to_collection: String,
    pub to_collection_identifier: String,
    pub doc_parts: Vec<DocPartRename>,
}

/// Wrapper for conversion of database-specific error codes into actual errors,
/// plus the load-time failure modes of the catalog reader.
#[derive(Debug)]
pub enum Error {
    UniqueConstraintViolation(sqlx::Error),
    FKConstraintViolation(sqlx::Error),

    /// The catalog and the physical schema disagree; refusing to run.
    Divergent(Vec<Divergence>),

    /// A catalog row failed to parse (unknown type name, bad table_ref).
    CorruptCatalog(String),

    // All other errors
    SqlxError(sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The DDL executor and durable metadata catalog. Every mutating call runs
/// one physical transaction covering both the DDL and the catalog rows, so a
/// crash leaves a schema change either fully applied or fully absent.
#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn setup(&self);

    async fn add_database(&self, name: &str, identifier: &str) -> Result<()>;

    /// Drops every physical table of the database along with all its catalog
    /// rows.
    async fn drop_database(&self, name: &str, identifier: &str) -> Result<()>;

    async fn add_collection(
        &self,
        database: &str,
        name: &str,
        identifier: &str,
    ) -> Result<()>;

    async fn drop_collection(
        &self,
        database: &str,
        database_identifier: &str,
        name: &str,
    ) -> Result<()>;

    /// Creates the doc part table (internal columns plus any declared
    /// fields/scalars), its internal did lookup index, and the catalog rows.
    /// With `deferred` set the did index is skipped; the import mode rebuild
    /// creates it later.
    async fn add_doc_part(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        doc_part: &MetaDocPart,
        deferred: bool,
    ) -> Result<()>;

    async fn add_columns(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        table_ref: &TableRef,
        doc_part_identifier: &str,
        fields: &[MetaField],
        scalars: &[MetaScalar],
    ) -> Result<()>;

    /// Physical index creation is skipped when `deferred` (data import mode);
    /// the catalog rows are written either way.
    async fn create_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        index: &MetaIndex,
        new_doc_part_indexes: &[NewDocPartIndex],
        deferred: bool,
    ) -> Result<()>;

    async fn drop_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        name: &str,
        orphaned: &[OrphanedDocPartIndex],
    ) -> Result<()>;

    /// Fit analysis can reshape the physical index backing a logical index
    /// (a new typed column appears for an indexed key); these two apply such
    /// doc-part-index deltas outside any logical index change.
    async fn add_doc_part_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        dp_index: &NewDocPartIndex,
        deferred: bool,
    ) -> Result<()>;

    async fn drop_doc_part_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        orphaned: &OrphanedDocPartIndex,
    ) -> Result<()>;

    async fn rename_collection(&self, request: &RenameCollectionRequest) -> Result<()>;

    async fn set_import_mode(&self, database: &str, enabled: bool) -> Result<()>;

    async fn drop_physical_index(
        &self,
        database_identifier: &str,
        index_identifier: &str,
    ) -> Result<()>;

    async fn create_physical_index(
        &self,
        database_identifier: &str,
        table_identifier: &str,
        index_identifier: &str,
        unique: bool,
        columns: &[(String, IndexOrdering)],
    ) -> Result<()>;

    /// Reserve `count` row ids on a doc part; returns the first reserved rid.
    async fn consume_rids(
        &self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        count: i64,
    ) -> Result<i64>;

    /// Reconstruct the full metadata snapshot from the catalog, cross-checked
    /// against the physical schema. Fails fast on any divergence.
    async fn read_metadata(&self) -> Result<MetaSnapshot>;
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{FieldType, MetaIndexField};

    fn orders_doc_part() -> MetaDocPart {
        let mut doc_part = MetaDocPart::new(TableRef::root(), "orders".to_string());
        for (name, identifier, field_type) in [
            ("item", "item_s", FieldType::String),
            ("qty", "qty_i", FieldType::Integer),
        ] {
            doc_part.fields.insert(
                (name.to_string(), field_type),
                MetaField {
                    name: name.to_string(),
                    identifier: identifier.to_string(),
                    field_type,
                },
            );
        }
        doc_part
    }

    fn lines_doc_part() -> MetaDocPart {
        let mut doc_part = MetaDocPart::new(
            TableRef::from_segments(["lines"]),
            "orders_lines".to_string(),
        );
        doc_part.scalars.insert(
            FieldType::String,
            MetaScalar {
                identifier: "v_s".to_string(),
                field_type: FieldType::String,
            },
        );
        doc_part
    }

    pub async fn run_generic_repository_tests(repository: Arc<dyn Repository>) {
        test_empty_catalog(repository.clone()).await;
        test_create_database_collection_doc_part(repository.clone()).await;
        test_add_columns(repository.clone()).await;
        test_index_lifecycle(repository.clone()).await;
        test_consume_rids(repository.clone()).await;
        test_rename_collection(repository.clone()).await;
        test_cascade_drop(repository.clone()).await;
        test_import_mode_defers_internal_index(repository.clone()).await;
        test_error_propagation(repository).await;
    }

    async fn test_empty_catalog(repository: Arc<dyn Repository>) {
        let snapshot = repository.read_metadata().await.expect("empty catalog loads");
        assert!(snapshot.databases.is_empty());
    }

    async fn test_create_database_collection_doc_part(repository: Arc<dyn Repository>) {
        repository.add_database("shop", "shop").await.unwrap();
        repository
            .add_collection("shop", "orders", "orders")
            .await
            .unwrap();
        repository
            .add_doc_part("shop", "shop", "orders", &orders_doc_part(), false)
            .await
            .unwrap();
        repository
            .add_doc_part("shop", "shop", "orders", &lines_doc_part(), false)
            .await
            .unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        let col = snapshot.collection("shop", "orders").expect("collection loads");
        assert_eq!(col.identifier, "orders");
        assert_eq!(col.doc_parts.len(), 2);
        let root = col.doc_part(&TableRef::root()).unwrap();
        assert!(root.field("item", FieldType::String).is_some());
        assert!(root.field("qty", FieldType::Integer).is_some());
        let lines = col.doc_part(&TableRef::from_segments(["lines"])).unwrap();
        assert!(lines.scalar(FieldType::String).is_some());
    }

    async fn test_add_columns(repository: Arc<dyn Repository>) {
        repository
            .add_columns(
                "shop",
                "shop",
                "orders",
                &TableRef::root(),
                "orders",
                &[MetaField {
                    name: "qty".to_string(),
                    identifier: "qty_s".to_string(),
                    field_type: FieldType::String,
                }],
                &[],
            )
            .await
            .unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        let root = snapshot
            .collection("shop", "orders")
            .unwrap()
            .doc_part(&TableRef::root())
            .unwrap();
        assert!(root.field("qty", FieldType::String).is_some());
        assert!(root.field("qty", FieldType::Integer).is_some());
    }

    async fn test_index_lifecycle(repository: Arc<dyn Repository>) {
        let index = MetaIndex {
            name: "qty_idx".to_string(),
            unique: false,
            fields: vec![MetaIndexField {
                table_ref: TableRef::root(),
                name: "qty".to_string(),
                ordering: IndexOrdering::Asc,
            }],
        };
        let dp_index = NewDocPartIndex {
            table_ref: TableRef::root(),
            table_identifier: "orders".to_string(),
            identifier: "idx_0123456789abcdef".to_string(),
            unique: false,
            columns: vec![
                ("qty_s".to_string(), IndexOrdering::Asc),
                ("qty_i".to_string(), IndexOrdering::Asc),
            ],
        };
        repository
            .create_index("shop", "shop", "orders", &index, &[dp_index.clone()], false)
            .await
            .unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        let col = snapshot.collection("shop", "orders").unwrap();
        assert!(col.indexes.contains_key("qty_idx"));
        let root = col.doc_part(&TableRef::root()).unwrap();
        assert_eq!(root.indexes.len(), 1);
        assert_eq!(root.indexes[0].columns.len(), 2);

        repository
            .drop_index(
                "shop",
                "shop",
                "orders",
                "qty_idx",
                &[OrphanedDocPartIndex {
                    table_ref: TableRef::root(),
                    identifier: dp_index.identifier.clone(),
                }],
            )
            .await
            .unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        let col = snapshot.collection("shop", "orders").unwrap();
        assert!(col.indexes.is_empty());
        assert!(col.doc_part(&TableRef::root()).unwrap().indexes.is_empty());
    }

    async fn test_consume_rids(repository: Arc<dyn Repository>) {
        let first = repository
            .consume_rids("shop", "orders", &TableRef::root(), 10)
            .await
            .unwrap();
        assert_eq!(first, 0);
        let second = repository
            .consume_rids("shop", "orders", &TableRef::root(), 5)
            .await
            .unwrap();
        assert_eq!(second, 10);
    }

    async fn test_rename_collection(repository: Arc<dyn Repository>) {
        repository.add_database("archive", "archive").await.unwrap();
        let request = RenameCollectionRequest {
            from_database: "shop".to_string(),
            from_database_identifier: "shop".to_string(),
            from_collection: "orders".to_string(),
            to_database: "archive".to_string(),
            to_database_identifier: "archive".to_string(),
            to_collection: "orders_2023".to_string(),
            to_collection_identifier: "orders_2023".to_string(),
            doc_parts: vec![
                DocPartRename {
                    table_ref: TableRef::root(),
                    from_identifier: "orders".to_string(),
                    to_identifier: "orders_2023".to_string(),
                    index_renames: vec![],
                },
                DocPartRename {
                    table_ref: TableRef::from_segments(["lines"]),
                    from_identifier: "orders_lines".to_string(),
                    to_identifier: "orders_2023_lines".to_string(),
                    index_renames: vec![],
                },
            ],
        };
        repository.rename_collection(&request).await.unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        assert!(snapshot.collection("shop", "orders").is_none());
        let col = snapshot.collection("archive", "orders_2023").unwrap();
        assert_eq!(col.identifier, "orders_2023");
        let root = col.doc_part(&TableRef::root()).unwrap();
        assert_eq!(root.identifier, "orders_2023");
        // The row-id generator position survives the move.
        assert_eq!(root.next_rid, 15);

        // Move it back for the remaining tests.
        let back = RenameCollectionRequest {
            from_database: "archive".to_string(),
            from_database_identifier: "archive".to_string(),
            from_collection: "orders_2023".to_string(),
            to_database: "shop".to_string(),
            to_database_identifier: "shop".to_string(),
            to_collection: "orders".to_string(),
            to_collection_identifier: "orders".to_string(),
            doc_parts: vec![
                DocPartRename {
                    table_ref: TableRef::root(),
                    from_identifier: "orders_2023".to_string(),
                    to_identifier: "orders".to_string(),
                    index_renames: vec![],
                },
                DocPartRename {
                    table_ref: TableRef::from_segments(["lines"]),
                    from_identifier: "orders_2023_lines".to_string(),
                    to_identifier: "orders_lines".to_string(),
                    index_renames: vec![],
                },
            ],
        };
        repository.rename_collection(&back).await.unwrap();
        let snapshot = repository.read_metadata().await.unwrap();
        let root = snapshot
            .collection("shop", "orders")
            .unwrap()
            .doc_part(&TableRef::root())
            .unwrap();
        assert_eq!(root.next_rid, 15);
    }

    async fn test_cascade_drop(repository: Arc<dyn Repository>) {
        repository
            .drop_collection("shop", "shop", "orders")
            .await
            .unwrap();
        let snapshot = repository.read_metadata().await.unwrap();
        assert!(snapshot.collection("shop", "orders").is_none());
        assert!(snapshot.database("shop").is_some());

        repository.drop_database("shop", "shop").await.unwrap();
        repository.drop_database("archive", "archive").await.unwrap();
        let snapshot = repository.read_metadata().await.unwrap();
        assert!(snapshot.databases.is_empty());
    }

    async fn test_import_mode_defers_internal_index(repository: Arc<dyn Repository>) {
        repository.add_database("bulk", "bulk").await.unwrap();
        repository
            .add_collection("bulk", "events", "events")
            .await
            .unwrap();
        repository.set_import_mode("bulk", true).await.unwrap();

        let doc_part = MetaDocPart::new(TableRef::root(), "events".to_string());
        repository
            .add_doc_part("bulk", "bulk", "events", &doc_part, true)
            .await
            .unwrap();
        let snapshot = repository.read_metadata().await.unwrap();
        assert!(snapshot.database("bulk").unwrap().import_mode);

        // The did index must not exist yet: this create has no preceding
        // drop, so it only succeeds if add_doc_part really skipped it.
        let internal = crate::repository::default::internal_index_name("events");
        repository
            .create_physical_index(
                "bulk",
                "events",
                &internal,
                false,
                &[("did".to_string(), IndexOrdering::Asc)],
            )
            .await
            .unwrap();
        repository.set_import_mode("bulk", false).await.unwrap();

        let snapshot = repository.read_metadata().await.unwrap();
        assert!(!snapshot.database("bulk").unwrap().import_mode);

        repository.drop_database("bulk", "bulk").await.unwrap();
    }

    async fn test_error_propagation(repository: Arc<dyn Repository>) {
        repository.add_database("dupdb", "dupdb").await.unwrap();
        assert!(matches!(
            repository
                .add_database("dupdb", "dupdb_other")
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        // A collection without its database violates the FK chain.
        assert!(matches!(
            repository
                .add_collection("nosuchdb", "c", "c")
                .await
                .unwrap_err(),
            Error::FKConstraintViolation(_)
        ));

        // Dropping something that isn't there surfaces as RowNotFound.
        assert!(matches!(
            repository
                .drop_database("nosuchdb", "nosuchdb")
                .await
                .unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));

        repository.drop_database("dupdb", "dupdb").await.unwrap();
    }
}
