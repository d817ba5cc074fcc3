use std::sync::Arc;

use assert_unordered::assert_eq_unordered;
use futures::future::join_all;
use rstest::rstest;
use serde_json::json;
use sqlx::sqlite::SqliteJournalMode;
use tempfile::TempDir;

use dunlin::config::load_config_from_string;
use dunlin::document::DocValue;
use dunlin::fit::FitOutcome;
use dunlin::manager::{SchemaError, SchemaManager};
use dunlin::model::{IndexOrdering, MetaIndexField, TableRef};
use dunlin::repository::interface::Repository;
use dunlin::repository::sqlite::SqliteRepository;

async fn make_repository() -> Arc<SqliteRepository> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Arc::new(
        SqliteRepository::try_new("sqlite::memory:".to_string(), SqliteJournalMode::Wal)
            .await
            .expect("Error setting up the database"),
    )
}

async fn make_manager() -> (SchemaManager, Arc<SqliteRepository>) {
    let repository = make_repository().await;
    let manager = SchemaManager::start(repository.clone())
        .await
        .expect("Error starting the schema manager");
    (manager, repository)
}

fn docs(values: &[serde_json::Value]) -> Vec<DocValue> {
    values.iter().cloned().map(DocValue::from).collect()
}

fn asc(table_ref: TableRef, name: &str) -> MetaIndexField {
    MetaIndexField {
        table_ref,
        name: name.to_string(),
        ordering: IndexOrdering::Asc,
    }
}

#[tokio::test]
async fn test_prepare_schema_is_idempotent() {
    let (manager, _repository) = make_manager().await;
    let batch = docs(&[json!({"name": "alice", "qty": 3})]);

    assert_eq!(
        manager
            .check_fit("shop", "orders", &batch)
            .await
            .unwrap(),
        FitOutcome::UnknownCollection
    );

    assert!(manager
        .prepare_schema("shop", "orders", batch.clone())
        .await
        .unwrap());
    assert_eq!(
        manager
            .check_fit("shop", "orders", &batch)
            .await
            .unwrap(),
        FitOutcome::Fits
    );

    // A second round with the same shapes changes nothing.
    assert!(!manager
        .prepare_schema("shop", "orders", batch)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_polymorphic_key_grows_new_column() {
    let (manager, _repository) = make_manager().await;

    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": 3})]))
        .await
        .unwrap();
    let batch = docs(&[json!({"qty": "three"})]);
    assert_eq!(
        manager.check_fit("shop", "orders", &batch).await.unwrap(),
        FitOutcome::NeedsSchemaChanges
    );
    assert!(manager
        .prepare_schema("shop", "orders", batch)
        .await
        .unwrap());

    let snapshot = manager.snapshot().await.unwrap();
    let root = snapshot
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    let names: Vec<_> = root
        .fields_by_name("qty")
        .map(|f| f.identifier.clone())
        .collect();
    assert_eq_unordered!(names, vec!["qty_i".to_string(), "qty_s".to_string()]);
}

#[tokio::test]
async fn test_nested_documents_create_child_doc_parts() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({
                "customer": {"name": "alice"},
                "lines": [{"sku": "a-1", "qty": 2}],
                "matrix": [[1, 2], [3, 4]]
            })]),
        )
        .await
        .unwrap();

    let snapshot = manager.snapshot().await.unwrap();
    let col = snapshot.collection("shop", "orders").unwrap();
    let refs: Vec<_> = col.doc_parts.keys().cloned().collect();
    assert_eq_unordered!(
        refs,
        vec![
            TableRef::root(),
            TableRef::from_segments(["customer"]),
            TableRef::from_segments(["lines"]),
            TableRef::from_segments(["matrix"]),
            TableRef::from_segments(["matrix", "$"]),
        ]
    );

    // Every doc part got a physical table; a reload sees no divergence.
    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());
}

#[tokio::test]
async fn test_doc_part_tables_do_not_collide_across_collections() {
    let (manager, repository) = make_manager().await;

    assert!(manager
        .prepare_schema("shop", "a_b", docs(&[json!({"x": 1})]))
        .await
        .unwrap());
    // Collection "a" nests a doc part at ["b"], whose physical table would
    // be named like "a_b"'s root; the allocator suffixes it instead.
    assert!(manager
        .prepare_schema("shop", "a", docs(&[json!({"b": {"y": 1}})]))
        .await
        .unwrap());
    assert!(!manager
        .prepare_schema("shop", "a", docs(&[json!({"b": {"y": 1}})]))
        .await
        .unwrap());

    let snapshot = manager.snapshot().await.unwrap();
    let other_root = snapshot
        .collection("shop", "a_b")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    let nested = snapshot
        .collection("shop", "a")
        .unwrap()
        .doc_part(&TableRef::from_segments(["b"]))
        .unwrap();
    assert_eq!(other_root.identifier, "a_b");
    assert_eq!(nested.identifier, "a_b_2");

    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());
}

#[tokio::test]
async fn test_create_database_and_collection_get_or_create() {
    let (manager, _repository) = make_manager().await;

    assert!(manager.create_database("shop").await.unwrap());
    assert!(!manager.create_database("shop").await.unwrap());
    assert!(manager.create_collection("shop", "orders").await.unwrap());
    assert!(!manager.create_collection("shop", "orders").await.unwrap());
    assert!(manager.create_database("crm").await.unwrap());

    assert_eq_unordered!(
        manager.database_names().await.unwrap(),
        vec!["shop".to_string(), "crm".to_string()]
    );

    assert!(matches!(
        manager.create_collection("nope", "orders").await,
        Err(SchemaError::UnexistentDatabase { name }) if name == "nope"
    ));
    assert!(matches!(
        manager.drop_database("nope").await,
        Err(SchemaError::UnexistentDatabase { .. })
    ));
    assert!(matches!(
        manager.drop_collection("shop", "nope").await,
        Err(SchemaError::UnexistentCollection { .. })
    ));
}

#[tokio::test]
async fn test_drop_collection_and_database_cascade() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({"lines": [{"sku": "a"}]})]),
        )
        .await
        .unwrap();
    manager
        .prepare_schema("shop", "customers", docs(&[json!({"name": "bob"})]))
        .await
        .unwrap();

    manager.drop_collection("shop", "orders").await.unwrap();
    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.collection("shop", "orders").is_none());
    assert!(snapshot.collection("shop", "customers").is_some());

    manager.drop_database("shop").await.unwrap();
    assert!(manager.database_names().await.unwrap().is_empty());

    // Physical tables went with their metadata.
    let reloaded = repository.read_metadata().await.unwrap();
    assert!(reloaded.databases.is_empty());
}

#[tokio::test]
async fn test_index_lifecycle_with_doc_part_index_reuse() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({"qty": 1, "items": [{"sku": "a"}]})]),
        )
        .await
        .unwrap();
    let items = TableRef::from_segments(["items"]);

    assert!(manager
        .create_index(
            "shop",
            "orders",
            "items_sku",
            vec![asc(items.clone(), "sku")],
            false,
        )
        .await
        .unwrap());
    // Same name is a no-op, whatever the declared shape.
    assert!(!manager
        .create_index("shop", "orders", "items_sku", vec![], true)
        .await
        .unwrap());

    // Spans two doc parts; its items leg has the same shape as items_sku, so
    // that physical index is shared.
    assert!(manager
        .create_index(
            "shop",
            "orders",
            "qty_and_sku",
            vec![asc(TableRef::root(), "qty"), asc(items.clone(), "sku")],
            false,
        )
        .await
        .unwrap());

    let snapshot = manager.snapshot().await.unwrap();
    let col = snapshot.collection("shop", "orders").unwrap();
    assert_eq!(col.doc_part(&items).unwrap().indexes.len(), 1);
    assert_eq!(col.doc_part(&TableRef::root()).unwrap().indexes.len(), 1);

    let info = manager.get_indexes_info("shop", "orders").await.unwrap();
    assert_eq_unordered!(
        info.iter().map(|i| i.name.clone()).collect::<Vec<_>>(),
        vec!["items_sku".to_string(), "qty_and_sku".to_string()]
    );

    // Dropping one sharer keeps the shared physical index alive.
    assert!(manager.drop_index("shop", "orders", "items_sku").await.unwrap());
    let snapshot = manager.snapshot().await.unwrap();
    let col = snapshot.collection("shop", "orders").unwrap();
    assert_eq!(col.doc_part(&items).unwrap().indexes.len(), 1);

    assert!(manager.drop_index("shop", "orders", "qty_and_sku").await.unwrap());
    assert!(!manager.drop_index("shop", "orders", "qty_and_sku").await.unwrap());
    let snapshot = manager.snapshot().await.unwrap();
    let col = snapshot.collection("shop", "orders").unwrap();
    assert!(col.doc_part(&items).unwrap().indexes.is_empty());
    assert!(col.doc_part(&TableRef::root()).unwrap().indexes.is_empty());

    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());
}

#[tokio::test]
async fn test_index_follows_new_polymorphic_column() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": 1})]))
        .await
        .unwrap();
    manager
        .create_index(
            "shop",
            "orders",
            "qty_idx",
            vec![asc(TableRef::root(), "qty")],
            false,
        )
        .await
        .unwrap();

    // The indexed key gains a second typed column; the backing physical
    // index is rebuilt to cover both.
    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": "three"})]))
        .await
        .unwrap();

    let snapshot = manager.snapshot().await.unwrap();
    let root = snapshot
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    assert_eq!(root.indexes.len(), 1);
    let columns: Vec<_> = root.indexes[0]
        .columns
        .iter()
        .map(|(identifier, _)| identifier.clone())
        .collect();
    assert_eq!(columns, vec!["qty_s".to_string(), "qty_i".to_string()]);

    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());
}

#[tokio::test]
async fn test_unsupported_indexes_are_rejected() {
    let (manager, _repository) = make_manager().await;
    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({"qty": 1, "items": [{"sku": "a"}]})]),
        )
        .await
        .unwrap();

    assert!(matches!(
        manager
            .create_index("shop", "orders", "empty", vec![], false)
            .await,
        Err(SchemaError::UnsupportedIndex { .. })
    ));
    assert!(matches!(
        manager
            .create_index(
                "shop",
                "orders",
                "unique_span",
                vec![
                    asc(TableRef::root(), "qty"),
                    asc(TableRef::from_segments(["items"]), "sku"),
                ],
                true,
            )
            .await,
        Err(SchemaError::UnsupportedIndex { .. })
    ));
}

#[tokio::test]
async fn test_unique_index_coexists_with_plain_index_on_same_columns() {
    let (manager, repository) = make_manager().await;
    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": 1})]))
        .await
        .unwrap();

    assert!(manager
        .create_index(
            "shop",
            "orders",
            "qty_plain",
            vec![asc(TableRef::root(), "qty")],
            false,
        )
        .await
        .unwrap());
    // Same columns but unique: a different shape, so a second physical
    // index rather than a reuse of the first.
    assert!(manager
        .create_index(
            "shop",
            "orders",
            "qty_unique",
            vec![asc(TableRef::root(), "qty")],
            true,
        )
        .await
        .unwrap());

    let snapshot = manager.snapshot().await.unwrap();
    let root = snapshot
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    assert_eq!(root.indexes.len(), 2);
    let (unique, plain): (Vec<_>, Vec<_>) =
        root.indexes.iter().partition(|index| index.unique);
    assert_eq!(unique.len(), 1);
    assert_eq!(plain.len(), 1);
    assert_ne!(unique[0].identifier, plain[0].identifier);
    assert_eq!(unique[0].columns, plain[0].columns);

    // The unique flag survives the catalog and physical introspection.
    let reloaded = repository.read_metadata().await.unwrap();
    let reloaded_root = reloaded
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    assert_eq_unordered!(reloaded_root.indexes.clone(), root.indexes.clone());

    // The worker stays healthy after the pair.
    assert!(manager.drop_index("shop", "orders", "qty_plain").await.unwrap());
    assert!(manager.drop_index("shop", "orders", "qty_unique").await.unwrap());
}

#[tokio::test]
async fn test_rename_collection_round_trip() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({"qty": 1, "lines": [{"sku": "a"}]})]),
        )
        .await
        .unwrap();
    manager
        .create_index(
            "shop",
            "orders",
            "qty_idx",
            vec![asc(TableRef::root(), "qty")],
            false,
        )
        .await
        .unwrap();

    // Row ids handed out on the data path survive the move.
    assert_eq!(
        repository
            .consume_rids("shop", "orders", &TableRef::root(), 7)
            .await
            .unwrap(),
        0
    );
    manager.refresh_metadata().await.unwrap();

    manager
        .rename_collection("shop", "orders", "archive", "orders_2023")
        .await
        .unwrap();
    assert!(matches!(
        manager
            .rename_collection("shop", "orders", "archive", "again")
            .await,
        Err(SchemaError::UnexistentCollection { .. })
    ));

    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.collection("shop", "orders").is_none());
    let moved = snapshot.collection("archive", "orders_2023").unwrap();
    assert_eq!(moved.doc_parts.len(), 2);
    assert_eq!(moved.doc_part(&TableRef::root()).unwrap().next_rid, 7);
    assert!(moved.indexes.contains_key("qty_idx"));

    // Rename back into the original scope.
    manager
        .rename_collection("archive", "orders_2023", "shop", "orders")
        .await
        .unwrap();
    let snapshot = manager.snapshot().await.unwrap();
    let back = snapshot.collection("shop", "orders").unwrap();
    assert_eq!(back.doc_part(&TableRef::root()).unwrap().next_rid, 7);
    assert_eq!(
        repository
            .consume_rids("shop", "orders", &TableRef::root(), 1)
            .await
            .unwrap(),
        7
    );

    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(
        reloaded.collection("shop", "orders").unwrap(),
        snapshot.collection("shop", "orders").unwrap()
    );
}

#[tokio::test]
async fn test_rename_onto_existing_collection_is_rejected() {
    let (manager, _repository) = make_manager().await;
    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": 1})]))
        .await
        .unwrap();
    manager
        .prepare_schema("shop", "customers", docs(&[json!({"name": "bob"})]))
        .await
        .unwrap();

    assert!(matches!(
        manager
            .rename_collection("shop", "orders", "shop", "customers")
            .await,
        Err(SchemaError::AlreadyExistentCollection { .. })
    ));
}

#[rstest]
#[case::integer(DocValue::Integer(5))]
#[case::string(DocValue::String("not a document".to_string()))]
#[case::array(DocValue::Array(vec![]))]
#[tokio::test]
async fn test_non_document_roots_are_rejected(#[case] root: DocValue) {
    let (manager, _repository) = make_manager().await;

    assert!(matches!(
        manager.prepare_schema("shop", "orders", vec![root]).await,
        Err(SchemaError::InvalidDocumentType { .. })
    ));
}

#[tokio::test]
async fn test_data_import_mode_defers_and_rebuilds_indexes() {
    let (manager, repository) = make_manager().await;

    manager
        .prepare_schema(
            "shop",
            "orders",
            docs(&[json!({"qty": 1, "lines": [{"sku": "a"}]})]),
        )
        .await
        .unwrap();
    manager
        .create_index(
            "shop",
            "orders",
            "qty_idx",
            vec![asc(TableRef::root(), "qty")],
            false,
        )
        .await
        .unwrap();

    manager.enable_data_import_mode("shop").await.unwrap();
    // Enabling twice is a no-op.
    manager.enable_data_import_mode("shop").await.unwrap();
    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.database("shop").unwrap().import_mode);

    // Index creation while importing records metadata but defers the
    // physical index.
    assert!(manager
        .create_index(
            "shop",
            "orders",
            "sku_idx",
            vec![asc(TableRef::from_segments(["lines"]), "sku")],
            false,
        )
        .await
        .unwrap());

    // The dropped/deferred physical indexes are tolerated while the flag is
    // on.
    let reloaded = repository.read_metadata().await.unwrap();
    assert!(reloaded.database("shop").unwrap().import_mode);

    manager.disable_data_import_mode("shop").await.unwrap();
    manager.disable_data_import_mode("shop").await.unwrap();
    let snapshot = manager.snapshot().await.unwrap();
    assert!(!snapshot.database("shop").unwrap().import_mode);

    // Off again: a reload now physically verifies every index is back.
    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());

    assert!(matches!(
        manager.enable_data_import_mode("nope").await,
        Err(SchemaError::UnexistentDatabase { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let (manager, repository) = make_manager().await;

    let results = join_all((0..8).map(|n| {
        let manager = manager.clone();
        async move {
            manager
                .prepare_schema(
                    "shop",
                    "orders",
                    docs(&[json!({(format!("field_{n}")): n, "shared": "x"})]),
                )
                .await
        }
    }))
    .await;
    for result in results {
        result.unwrap();
    }

    let snapshot = manager.snapshot().await.unwrap();
    let root = snapshot
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    // 8 distinct fields plus the shared one, each exactly once.
    assert_eq!(root.fields.len(), 9);

    let reloaded = repository.read_metadata().await.unwrap();
    assert_eq!(&reloaded, snapshot.as_ref());
}

#[tokio::test]
async fn test_snapshot_is_a_stable_point_in_time_view() {
    let (manager, _repository) = make_manager().await;

    manager
        .prepare_schema("shop", "orders", docs(&[json!({"qty": 1})]))
        .await
        .unwrap();
    let before = manager.snapshot().await.unwrap();

    manager
        .prepare_schema("shop", "orders", docs(&[json!({"note": "hi"})]))
        .await
        .unwrap();
    let after = manager.snapshot().await.unwrap();

    let field_names = |snapshot: &dunlin::model::MetaSnapshot| {
        snapshot
            .collection("shop", "orders")
            .unwrap()
            .doc_part(&TableRef::root())
            .unwrap()
            .fields
            .keys()
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(field_names(&before), vec!["qty".to_string()]);
    assert_eq_unordered!(
        field_names(&after),
        vec!["note".to_string(), "qty".to_string()]
    );
}

#[tokio::test]
async fn test_catalog_survives_restart() {
    let data_dir = TempDir::new().unwrap();
    let dsn = data_dir.path().join("catalog.sqlite");
    let config = load_config_from_string(
        &format!(
            r#"
[catalog]
type = "sqlite"
dsn = "{}"
"#,
            dsn.display()
        ),
        false,
    )
    .unwrap();

    {
        let repository = dunlin::config::build_repository(&config).await.unwrap();
        let manager = SchemaManager::start(repository).await.unwrap();
        manager
            .prepare_schema("shop", "orders", docs(&[json!({"qty": 1})]))
            .await
            .unwrap();
    }

    let repository = dunlin::config::build_repository(&config).await.unwrap();
    let manager = SchemaManager::start(repository).await.unwrap();
    let snapshot = manager.snapshot().await.unwrap();
    let root = snapshot
        .collection("shop", "orders")
        .unwrap()
        .doc_part(&TableRef::root())
        .unwrap();
    assert!(root.field("qty", dunlin::model::FieldType::Integer).is_some());
}
