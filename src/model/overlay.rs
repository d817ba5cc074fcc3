use std::sync::Arc;

use crate::model::{
    FieldType, MetaCollection, MetaDatabase, MetaDocPart, MetaDocPartIndex, MetaField,
    MetaIndex, MetaScalar, MetaSnapshot, TableRef,
};

/// One recorded structural mutation. The change log of a committed overlay is
/// exactly the delta the DDL executor has to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddedDatabase {
        database: String,
    },
    AddedCollection {
        database: String,
        collection: String,
    },
    AddedDocPart {
        database: String,
        collection: String,
        table_ref: TableRef,
    },
    AddedField {
        database: String,
        collection: String,
        table_ref: TableRef,
        name: String,
        field_type: FieldType,
    },
    AddedScalar {
        database: String,
        collection: String,
        table_ref: TableRef,
        field_type: FieldType,
    },
    AddedIndex {
        database: String,
        collection: String,
        index: String,
    },
    AddedDocPartIndex {
        database: String,
        collection: String,
        table_ref: TableRef,
        identifier: String,
    },
    RemovedDatabase {
        database: String,
    },
    RemovedCollection {
        database: String,
        collection: String,
    },
    RemovedIndex {
        database: String,
        collection: String,
        index: String,
    },
    RemovedDocPartIndex {
        database: String,
        collection: String,
        table_ref: TableRef,
        identifier: String,
    },
    MovedCollection {
        from_database: String,
        from_collection: String,
        to_database: String,
        to_collection: String,
    },
    SetImportMode {
        database: String,
        enabled: bool,
    },
}

/// Owns the current immutable snapshot and hands out transactional overlays.
/// Readers get `Arc` clones; replacing the snapshot is a single pointer swap.
#[derive(Debug)]
pub struct SnapshotHolder {
    current: Arc<MetaSnapshot>,
    overlay_open: bool,
}

impl SnapshotHolder {
    pub fn new(initial: MetaSnapshot) -> Self {
        SnapshotHolder {
            current: Arc::new(initial),
            overlay_open: false,
        }
    }

    pub fn current(&self) -> Arc<MetaSnapshot> {
        self.current.clone()
    }

    /// Replace the snapshot wholesale (metadata refresh after a reload from
    /// the durable catalog).
    pub fn replace(&mut self, snapshot: MetaSnapshot) {
        assert!(!self.overlay_open, "refresh with an open overlay");
        self.current = Arc::new(snapshot);
    }

    /// Open a transactional overlay against the current snapshot. At most one
    /// overlay may be open at a time; a second open is a programming fault.
    pub fn open(&mut self) -> Overlay<'_> {
        assert!(!self.overlay_open, "a metadata overlay is already open");
        self.overlay_open = true;
        let tree = (*self.current).clone();
        Overlay {
            holder: self,
            tree: Some(tree),
            changes: Vec::new(),
        }
    }
}

/// A mutable view over one snapshot. Add/remove operations record `Change`s;
/// `commit` produces the successor snapshot, dropping without commit discards
/// every pending change.
#[derive(Debug)]
pub struct Overlay<'a> {
    holder: &'a mut SnapshotHolder,
    tree: Option<MetaSnapshot>,
    changes: Vec<Change>,
}

impl Drop for Overlay<'_> {
    fn drop(&mut self) {
        self.holder.overlay_open = false;
    }
}

impl Overlay<'_> {
    pub fn snapshot(&self) -> &MetaSnapshot {
        self.tree.as_ref().expect("overlay already committed")
    }

    fn tree_mut(&mut self) -> &mut MetaSnapshot {
        self.tree.as_mut().expect("overlay already committed")
    }

    pub fn has_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Atomically supersede the holder's snapshot with this overlay's tree.
    pub fn commit(mut self) {
        let tree = self.tree.take().expect("overlay already committed");
        self.holder.current = Arc::new(tree);
    }

    fn database_mut(&mut self, database: &str) -> &mut MetaDatabase {
        self.tree_mut()
            .databases
            .get_mut(database)
            .expect("database missing from overlay")
    }

    fn collection_mut(&mut self, database: &str, collection: &str) -> &mut MetaCollection {
        self.database_mut(database)
            .collections
            .get_mut(collection)
            .expect("collection missing from overlay")
    }

    fn doc_part_mut(
        &mut self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
    ) -> &mut MetaDocPart {
        self.collection_mut(database, collection)
            .doc_parts
            .get_mut(table_ref)
            .expect("doc part missing from overlay")
    }

    pub fn add_database(&mut self, name: &str, identifier: String) {
        let inserted = self
            .tree_mut()
            .databases
            .insert(
                name.to_string(),
                MetaDatabase::new(name.to_string(), identifier),
            )
            .is_none();
        assert!(inserted, "database {name} already exists");
        self.changes.push(Change::AddedDatabase {
            database: name.to_string(),
        });
    }

    pub fn add_collection(&mut self, database: &str, name: &str, identifier: String) {
        let inserted = self
            .database_mut(database)
            .collections
            .insert(
                name.to_string(),
                MetaCollection::new(name.to_string(), identifier),
            )
            .is_none();
        assert!(inserted, "collection {database}.{name} already exists");
        self.changes.push(Change::AddedCollection {
            database: database.to_string(),
            collection: name.to_string(),
        });
    }

    pub fn add_doc_part(
        &mut self,
        database: &str,
        collection: &str,
        doc_part: MetaDocPart,
    ) {
        let table_ref = doc_part.table_ref.clone();
        let inserted = self
            .collection_mut(database, collection)
            .doc_parts
            .insert(table_ref.clone(), doc_part)
            .is_none();
        assert!(inserted, "doc part {table_ref} already exists");
        self.changes.push(Change::AddedDocPart {
            database: database.to_string(),
            collection: collection.to_string(),
            table_ref,
        });
    }

    pub fn add_field(
        &mut self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        field: MetaField,
    ) {
        let name = field.name.clone();
        let field_type = field.field_type;
        let inserted = self
            .doc_part_mut(database, collection, table_ref)
            .fields
            .insert((name.clone(), field_type), field)
            .is_none();
        assert!(inserted, "field {name}:{field_type} already exists");
        self.changes.push(Change::AddedField {
            database: database.to_string(),
            collection: collection.to_string(),
            table_ref: table_ref.clone(),
            name,
            field_type,
        });
    }

    pub fn add_scalar(
        &mut self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        scalar: MetaScalar,
    ) {
        let field_type = scalar.field_type;
        let inserted = self
            .doc_part_mut(database, collection, table_ref)
            .scalars
            .insert(field_type, scalar)
            .is_none();
        assert!(inserted, "scalar {field_type} already exists");
        self.changes.push(Change::AddedScalar {
            database: database.to_string(),
            collection: collection.to_string(),
            table_ref: table_ref.clone(),
            field_type,
        });
    }

    pub fn add_index(&mut self, database: &str, collection: &str, index: MetaIndex) {
        let name = index.name.clone();
        let inserted = self
            .collection_mut(database, collection)
            .indexes
            .insert(name.clone(), index)
            .is_none();
        assert!(inserted, "index {name} already exists");
        self.changes.push(Change::AddedIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            index: name,
        });
    }

    pub fn add_doc_part_index(
        &mut self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        dp_index: MetaDocPartIndex,
    ) {
        let identifier = dp_index.identifier.clone();
        let doc_part = self.doc_part_mut(database, collection, table_ref);
        assert!(
            doc_part.doc_part_index(&identifier).is_none(),
            "doc part index {identifier} already exists"
        );
        doc_part.indexes.push(dp_index);
        self.changes.push(Change::AddedDocPartIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            table_ref: table_ref.clone(),
            identifier,
        });
    }

    pub fn remove_database(&mut self, database: &str) {
        let removed = self.tree_mut().databases.remove(database).is_some();
        assert!(removed, "database {database} not present");
        self.changes.push(Change::RemovedDatabase {
            database: database.to_string(),
        });
    }

    pub fn remove_collection(&mut self, database: &str, collection: &str) {
        let removed = self
            .database_mut(database)
            .collections
            .remove(collection)
            .is_some();
        assert!(removed, "collection {database}.{collection} not present");
        self.changes.push(Change::RemovedCollection {
            database: database.to_string(),
            collection: collection.to_string(),
        });
    }

    pub fn remove_index(&mut self, database: &str, collection: &str, index: &str) {
        let removed = self
            .collection_mut(database, collection)
            .indexes
            .remove(index)
            .is_some();
        assert!(removed, "index {index} not present");
        self.changes.push(Change::RemovedIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            index: index.to_string(),
        });
    }

    pub fn remove_doc_part_index(
        &mut self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        identifier: &str,
    ) {
        let doc_part = self.doc_part_mut(database, collection, table_ref);
        let before = doc_part.indexes.len();
        doc_part.indexes.retain(|i| i.identifier != identifier);
        assert_eq!(before, doc_part.indexes.len() + 1, "doc part index not present");
        self.changes.push(Change::RemovedDocPartIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            table_ref: table_ref.clone(),
            identifier: identifier.to_string(),
        });
    }

    pub fn set_import_mode(&mut self, database: &str, enabled: bool) {
        self.database_mut(database).import_mode = enabled;
        self.changes.push(Change::SetImportMode {
            database: database.to_string(),
            enabled,
        });
    }

    /// Move a fully re-identified collection to its target scope and drop the
    /// source. The caller has already re-allocated doc part and doc part
    /// index identifiers under the target's naming scope.
    pub fn move_collection(
        &mut self,
        from_database: &str,
        from_collection: &str,
        to_database: &str,
        to_collection: MetaCollection,
    ) {
        let to_name = to_collection.name.clone();
        let removed = self
            .database_mut(from_database)
            .collections
            .remove(from_collection)
            .is_some();
        assert!(removed, "collection {from_database}.{from_collection} not present");
        let inserted = self
            .database_mut(to_database)
            .collections
            .insert(to_name.clone(), to_collection)
            .is_none();
        assert!(inserted, "collection {to_database}.{to_name} already exists");
        self.changes.push(Change::MovedCollection {
            from_database: from_database.to_string(),
            from_collection: from_collection.to_string(),
            to_database: to_database.to_string(),
            to_collection: to_name,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_supersedes_snapshot() {
        let mut holder = SnapshotHolder::new(MetaSnapshot::default());
        let before = holder.current();

        let mut overlay = holder.open();
        assert!(!overlay.has_changed());
        overlay.add_database("shop", "shop".to_string());
        assert!(overlay.has_changed());
        overlay.commit();

        let after = holder.current();
        assert!(before.database("shop").is_none());
        assert!(after.database("shop").is_some());
    }

    #[test]
    fn test_drop_discards_changes() {
        let mut holder = SnapshotHolder::new(MetaSnapshot::default());
        {
            let mut overlay = holder.open();
            overlay.add_database("shop", "shop".to_string());
        }
        assert!(holder.current().database("shop").is_none());

        // The overlay slot is free again after the discard.
        let overlay = holder.open();
        assert!(!overlay.has_changed());
    }

    #[test]
    fn test_change_log_is_the_delta() {
        let mut holder = SnapshotHolder::new(MetaSnapshot::default());
        let mut overlay = holder.open();
        overlay.add_database("shop", "shop".to_string());
        overlay.add_collection("shop", "orders", "orders".to_string());
        overlay.add_doc_part(
            "shop",
            "orders",
            MetaDocPart::new(TableRef::root(), "orders".to_string()),
        );
        overlay.add_field(
            "shop",
            "orders",
            &TableRef::root(),
            MetaField {
                name: "qty".to_string(),
                identifier: "qty_i".to_string(),
                field_type: FieldType::Integer,
            },
        );

        assert_eq!(overlay.changes().len(), 4);
        assert_eq!(
            overlay.changes()[3],
            Change::AddedField {
                database: "shop".to_string(),
                collection: "orders".to_string(),
                table_ref: TableRef::root(),
                name: "qty".to_string(),
                field_type: FieldType::Integer,
            }
        );
    }
}
