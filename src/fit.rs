//! Schema-fit analysis: given a collection's current doc-part/field/scalar
//! set and a batch of documents, compute (in an overlay, without touching
//! physical storage) exactly the entities missing to store every document
//! unchanged. Purely additive over fields and scalars.

use crate::document::DocValue;
use crate::ids;
use crate::manager::SchemaError;
use crate::model::overlay::{Overlay, SnapshotHolder};
use crate::model::{
    derive_doc_part_columns, FieldType, MetaDocPart, MetaDocPartIndex, MetaField,
    MetaScalar, MetaSnapshot, TableRef, ARRAY_DIMENSION_SEGMENT,
};

/// Read-only fit check against a stable snapshot. This is the explicit retry
/// signal for the write layer: a batch that `NeedsSchemaChanges` gets a
/// `prepare_schema` round-trip before the write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    Fits,
    NeedsSchemaChanges,
    UnknownCollection,
}

pub fn check_fit(
    snapshot: &MetaSnapshot,
    database: &str,
    collection: &str,
    docs: &[DocValue],
) -> Result<FitOutcome, SchemaError> {
    if snapshot.collection(database, collection).is_none() {
        return Ok(FitOutcome::UnknownCollection);
    }
    let mut holder = SnapshotHolder::new(snapshot.clone());
    let mut overlay = holder.open();
    fit_documents(&mut overlay, database, collection, docs)?;
    if overlay.has_changed() {
        Ok(FitOutcome::NeedsSchemaChanges)
    } else {
        Ok(FitOutcome::Fits)
    }
}

/// Walk every document, creating missing doc parts, fields and scalars in the
/// overlay. The overlay's change log afterwards is the DDL delta required
/// before the batch can be stored unmodified.
pub fn fit_documents(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    docs: &[DocValue],
) -> Result<(), SchemaError> {
    for doc in docs {
        match doc {
            DocValue::Document(entries) => {
                fit_entries(overlay, database, collection, &TableRef::root(), entries)?;
            }
            other => {
                return Err(SchemaError::InvalidDocumentType {
                    reason: format!(
                        "document root must be an object, got {:?}",
                        other.field_type()
                    ),
                })
            }
        }
    }
    align_doc_part_indexes(overlay, database, collection);
    Ok(())
}

/// Object keys at one nesting level. Objects that are array elements store
/// their keys in the array's own doc part, so this is shared by both cases.
fn fit_entries(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    table_ref: &TableRef,
    entries: &[(String, DocValue)],
) -> Result<(), SchemaError> {
    ensure_doc_part(overlay, database, collection, table_ref);
    for (key, value) in entries {
        ensure_field(overlay, database, collection, table_ref, key, value.field_type());
        match value {
            DocValue::Document(child_entries) => {
                let child = table_ref.child(key);
                fit_entries(overlay, database, collection, &child, child_entries)?;
            }
            DocValue::Array(items) => {
                let child = table_ref.child(key);
                fit_array(overlay, database, collection, &child, items)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn fit_array(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    table_ref: &TableRef,
    items: &[DocValue],
) -> Result<(), SchemaError> {
    ensure_doc_part(overlay, database, collection, table_ref);
    for item in items {
        match item {
            DocValue::Document(entries) => {
                // Object elements are rows of the array's table.
                fit_entries(overlay, database, collection, table_ref, entries)?;
            }
            DocValue::Array(inner) => {
                ensure_scalar(overlay, database, collection, table_ref, FieldType::Child);
                let child = table_ref.child(ARRAY_DIMENSION_SEGMENT);
                fit_array(overlay, database, collection, &child, inner)?;
            }
            scalar => {
                ensure_scalar(
                    overlay,
                    database,
                    collection,
                    table_ref,
                    scalar.field_type(),
                );
            }
        }
    }
    Ok(())
}

fn ensure_doc_part(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    table_ref: &TableRef,
) {
    let db = overlay
        .snapshot()
        .database(database)
        .expect("fit on a database missing from the overlay");
    let col = db
        .collection(collection)
        .expect("fit on a collection missing from the overlay");
    if col.doc_part(table_ref).is_some() {
        return;
    }
    let identifier = ids::doc_part_identifier(db, col, table_ref);
    overlay.add_doc_part(
        database,
        collection,
        MetaDocPart::new(table_ref.clone(), identifier),
    );
}

fn ensure_field(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    table_ref: &TableRef,
    name: &str,
    field_type: FieldType,
) {
    let doc_part = overlay
        .snapshot()
        .collection(database, collection)
        .and_then(|col| col.doc_part(table_ref))
        .expect("doc part ensured before its fields");
    if doc_part.field(name, field_type).is_some() {
        return;
    }
    let identifier = ids::field_identifier(doc_part, name, field_type);
    overlay.add_field(
        database,
        collection,
        table_ref,
        MetaField {
            name: name.to_string(),
            identifier,
            field_type,
        },
    );
}

fn ensure_scalar(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
    table_ref: &TableRef,
    field_type: FieldType,
) {
    let doc_part = overlay
        .snapshot()
        .collection(database, collection)
        .and_then(|col| col.doc_part(table_ref))
        .expect("doc part ensured before its scalars");
    if doc_part.scalar(field_type).is_some() {
        return;
    }
    let identifier = ids::scalar_identifier(doc_part, field_type);
    overlay.add_scalar(
        database,
        collection,
        table_ref,
        MetaScalar {
            identifier,
            field_type,
        },
    );
}

/// Re-derive the physical per-table indexes from the collection's logical
/// indexes: create every (doc part, column set, ordering, uniqueness)
/// combination some logical index requires and no existing doc part index
/// covers, and remove every doc part index no logical index requires any
/// more. Doc part indexes are reused across logical indexes by shape, so
/// this never creates duplicates.
pub fn align_doc_part_indexes(
    overlay: &mut Overlay<'_>,
    database: &str,
    collection: &str,
) {
    let col = overlay
        .snapshot()
        .collection(database, collection)
        .expect("aligning indexes of a collection missing from the overlay");

    let mut to_add: Vec<(TableRef, MetaDocPartIndex)> = Vec::new();
    let mut to_remove: Vec<(TableRef, String)> = Vec::new();

    for doc_part in col.doc_parts.values() {
        let mut required: Vec<(bool, Vec<_>)> = Vec::new();
        for index in col.indexes.values() {
            if let Some(columns) = derive_doc_part_columns(index, doc_part) {
                if !required
                    .iter()
                    .any(|(u, c)| *u == index.unique && *c == columns)
                {
                    required.push((index.unique, columns));
                }
            }
        }

        for (unique, columns) in &required {
            if !doc_part
                .indexes
                .iter()
                .any(|existing| existing.same_shape(*unique, columns))
            {
                let identifier =
                    ids::doc_part_index_identifier(&doc_part.identifier, *unique, columns);
                to_add.push((
                    doc_part.table_ref.clone(),
                    MetaDocPartIndex {
                        identifier,
                        unique: *unique,
                        columns: columns.clone(),
                    },
                ));
            }
        }

        for existing in &doc_part.indexes {
            if !required
                .iter()
                .any(|(unique, columns)| existing.same_shape(*unique, columns))
            {
                to_remove.push((doc_part.table_ref.clone(), existing.identifier.clone()));
            }
        }
    }

    for (table_ref, identifier) in to_remove {
        overlay.remove_doc_part_index(database, collection, &table_ref, &identifier);
    }
    for (table_ref, dp_index) in to_add {
        overlay.add_doc_part_index(database, collection, &table_ref, dp_index);
    }
}
