//! The worker task behind [`SchemaManager`](super::SchemaManager). It owns
//! the snapshot holder and processes commands strictly in submission order,
//! so one structural operation's DDL round-trip finishes before the next
//! begins.
//!
//! Every structural operation follows the same shape: validate against the
//! current snapshot, stage the change in an overlay, apply it durably through
//! the repository, then commit the overlay. A durable apply that fails midway
//! is recovered by reloading the snapshot from the catalog; if even that
//! fails the worker enters the failed state and refuses further work.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::fit::{align_doc_part_indexes, fit_documents};
use crate::ids;
use crate::model::overlay::{Change, Overlay, SnapshotHolder};
use crate::model::{
    IndexOrdering, MetaCollection, MetaField, MetaIndex, MetaIndexField, MetaScalar,
    MetaSnapshot, TableRef,
};
use crate::repository::default::internal_index_name;
use crate::repository::interface::{
    DocPartRename, IndexRename, NewDocPartIndex, OrphanedDocPartIndex,
    RenameCollectionRequest, Repository,
};

use super::{import, Command, FaultHandler, IndexInfo, SchemaError};

pub const COMMAND_QUEUE_DEPTH: usize = 64;

enum State {
    Healthy,
    Failed(String),
}

pub(crate) struct Worker {
    repository: Arc<dyn Repository>,
    holder: SnapshotHolder,
    fault_handler: Arc<dyn FaultHandler>,
    retry_policy: import::RetryPolicy,
    state: State,
}

impl Worker {
    pub(crate) fn new(
        repository: Arc<dyn Repository>,
        snapshot: MetaSnapshot,
        fault_handler: Arc<dyn FaultHandler>,
    ) -> Self {
        Worker {
            repository,
            holder: SnapshotHolder::new(snapshot),
            fault_handler,
            retry_policy: import::RetryPolicy::default(),
            state: State::Healthy,
        }
    }

    pub(crate) async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            if let State::Failed(reason) = &self.state {
                refuse(command, reason.clone());
                continue;
            }
            self.dispatch(command).await;
        }
        debug!("schema manager worker stopping, all handles dropped");
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::RefreshMetadata { reply } => {
                let _ = reply.send(self.refresh_metadata().await);
            }
            Command::PrepareSchema {
                database,
                collection,
                docs,
                reply,
            } => {
                let _ = reply.send(self.prepare_schema(&database, &collection, &docs).await);
            }
            Command::CreateDatabase { name, reply } => {
                let _ = reply.send(self.create_database(&name).await);
            }
            Command::CreateCollection {
                database,
                name,
                reply,
            } => {
                let _ = reply.send(self.create_collection(&database, &name).await);
            }
            Command::DropDatabase { name, reply } => {
                let _ = reply.send(self.drop_database(&name).await);
            }
            Command::DropCollection {
                database,
                name,
                reply,
            } => {
                let _ = reply.send(self.drop_collection(&database, &name).await);
            }
            Command::RenameCollection {
                from_database,
                from_collection,
                to_database,
                to_collection,
                reply,
            } => {
                let _ = reply.send(
                    self.rename_collection(
                        &from_database,
                        &from_collection,
                        &to_database,
                        &to_collection,
                    )
                    .await,
                );
            }
            Command::CreateIndex {
                database,
                collection,
                name,
                fields,
                unique,
                reply,
            } => {
                let _ = reply.send(
                    self.create_index(&database, &collection, &name, fields, unique)
                        .await,
                );
            }
            Command::DropIndex {
                database,
                collection,
                name,
                reply,
            } => {
                let _ = reply.send(self.drop_index(&database, &collection, &name).await);
            }
            Command::GetIndexesInfo {
                database,
                collection,
                reply,
            } => {
                let _ = reply.send(self.get_indexes_info(&database, &collection));
            }
            Command::DatabaseNames { reply } => {
                let _ = reply.send(Ok(self.holder.current().database_names()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.holder.current()));
            }
            Command::EnableDataImportMode { database, reply } => {
                let _ = reply.send(self.enable_data_import_mode(&database).await);
            }
            Command::DisableDataImportMode { database, reply } => {
                let _ = reply.send(self.disable_data_import_mode(&database).await);
            }
        }
    }

    fn fail(&mut self, error: &SchemaError) {
        self.fault_handler.on_fatal(error);
        self.state = State::Failed(error.to_string());
    }

    /// Reload the snapshot after a partially-applied durable change. The
    /// catalog is the source of truth, so a successful reload fully
    /// re-synchronizes; a failed one leaves us with state we cannot trust.
    async fn resynchronize(&mut self) {
        match self.repository.read_metadata().await {
            Ok(snapshot) => self.holder.replace(snapshot),
            Err(error) => self.fail(&SchemaError::from(error)),
        }
    }

    async fn refresh_metadata(&mut self) -> Result<(), SchemaError> {
        let snapshot = self.repository.read_metadata().await?;
        self.holder.replace(snapshot);
        Ok(())
    }

    async fn create_database(&mut self, name: &str) -> Result<bool, SchemaError> {
        if self.holder.current().database(name).is_some() {
            return Ok(false);
        }
        let snapshot = self.holder.current();
        let identifier = ids::database_identifier(&snapshot, name);
        drop(snapshot);
        info!(%name, %identifier, "creating database");
        self.repository.add_database(name, &identifier).await?;

        let mut overlay = self.holder.open();
        overlay.add_database(name, identifier);
        overlay.commit();
        Ok(true)
    }

    async fn create_collection(
        &mut self,
        database: &str,
        name: &str,
    ) -> Result<bool, SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        if db.collection(name).is_some() {
            return Ok(false);
        }
        let identifier = ids::collection_identifier(db, name);
        drop(snapshot);
        info!(%database, %name, %identifier, "creating collection");
        self.repository
            .add_collection(database, name, &identifier)
            .await?;

        let mut overlay = self.holder.open();
        overlay.add_collection(database, name, identifier);
        overlay.commit();
        Ok(true)
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(name)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: name.to_string(),
            })?;
        let identifier = db.identifier.clone();
        drop(snapshot);
        info!(%name, "dropping database");
        self.repository.drop_database(name, &identifier).await?;

        let mut overlay = self.holder.open();
        overlay.remove_database(name);
        overlay.commit();
        Ok(())
    }

    async fn drop_collection(
        &mut self,
        database: &str,
        name: &str,
    ) -> Result<(), SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        if db.collection(name).is_none() {
            return Err(SchemaError::UnexistentCollection {
                database: database.to_string(),
                name: name.to_string(),
            });
        }
        let identifier = db.identifier.clone();
        drop(snapshot);
        info!(%database, %name, "dropping collection");
        self.repository
            .drop_collection(database, &identifier, name)
            .await?;

        let mut overlay = self.holder.open();
        overlay.remove_collection(database, name);
        overlay.commit();
        Ok(())
    }

    async fn prepare_schema(
        &mut self,
        database: &str,
        collection: &str,
        docs: &[crate::document::DocValue],
    ) -> Result<bool, SchemaError> {
        let mut changed = self.create_database(database).await?;
        changed |= self.create_collection(database, collection).await?;

        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .expect("database ensured above");
        let database_identifier = db.identifier.clone();
        let deferred = db.import_mode;
        drop(snapshot);

        let repository = self.repository.clone();
        let mut overlay = self.holder.open();
        fit_documents(&mut overlay, database, collection, docs)?;
        if !overlay.has_changed() {
            return Ok(changed);
        }
        debug!(
            %database,
            %collection,
            changes = overlay.changes().len(),
            "applying schema changes for document batch"
        );

        match apply_fit_changes(
            &repository,
            &overlay,
            database,
            &database_identifier,
            collection,
            deferred,
        )
        .await
        {
            Ok(()) => {
                overlay.commit();
                Ok(true)
            }
            Err(error) => {
                drop(overlay);
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }

    async fn create_index(
        &mut self,
        database: &str,
        collection: &str,
        name: &str,
        fields: Vec<MetaIndexField>,
        unique: bool,
    ) -> Result<bool, SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        let col = db
            .collection(collection)
            .ok_or_else(|| SchemaError::UnexistentCollection {
                database: database.to_string(),
                name: collection.to_string(),
            })?;

        if col.indexes.contains_key(name) {
            return Ok(false);
        }
        if col
            .indexes
            .values()
            .any(|index| index.unique == unique && index.fields == fields)
        {
            return Ok(false);
        }
        if fields.is_empty() {
            return Err(SchemaError::UnsupportedIndex {
                reason: "an index needs at least one field".to_string(),
            });
        }
        if unique {
            let spanned: BTreeSet<&TableRef> =
                fields.iter().map(|field| &field.table_ref).collect();
            if spanned.len() > 1 {
                return Err(SchemaError::UnsupportedIndex {
                    reason: "a unique index cannot span subdocuments at different paths"
                        .to_string(),
                });
            }
        }

        let database_identifier = db.identifier.clone();
        let deferred = db.import_mode;
        drop(snapshot);
        info!(%database, %collection, index = %name, unique, "creating index");

        let repository = self.repository.clone();
        let mut overlay = self.holder.open();
        overlay.add_index(
            database,
            collection,
            MetaIndex {
                name: name.to_string(),
                unique,
                fields,
            },
        );
        align_doc_part_indexes(&mut overlay, database, collection);

        let (index, new_doc_part_indexes) = {
            let col = overlay
                .snapshot()
                .collection(database, collection)
                .expect("collection checked above");
            let new_doc_part_indexes: Vec<NewDocPartIndex> = overlay
                .changes()
                .iter()
                .filter_map(|change| match change {
                    Change::AddedDocPartIndex {
                        table_ref,
                        identifier,
                        ..
                    } => {
                        let doc_part =
                            col.doc_part(table_ref).expect("doc part in overlay");
                        let dp_index = doc_part
                            .doc_part_index(identifier)
                            .expect("doc part index in overlay");
                        Some(NewDocPartIndex {
                            table_ref: table_ref.clone(),
                            table_identifier: doc_part.identifier.clone(),
                            identifier: dp_index.identifier.clone(),
                            unique: dp_index.unique,
                            columns: dp_index.columns.clone(),
                        })
                    }
                    _ => None,
                })
                .collect();
            (
                col.indexes.get(name).expect("index just added").clone(),
                new_doc_part_indexes,
            )
        };

        match repository
            .create_index(
                database,
                &database_identifier,
                collection,
                &index,
                &new_doc_part_indexes,
                deferred,
            )
            .await
        {
            Ok(()) => {
                overlay.commit();
                Ok(true)
            }
            Err(error) => {
                drop(overlay);
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }

    async fn drop_index(
        &mut self,
        database: &str,
        collection: &str,
        name: &str,
    ) -> Result<bool, SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        let col = db
            .collection(collection)
            .ok_or_else(|| SchemaError::UnexistentCollection {
                database: database.to_string(),
                name: collection.to_string(),
            })?;
        if !col.indexes.contains_key(name) {
            return Ok(false);
        }
        let database_identifier = db.identifier.clone();
        drop(snapshot);
        info!(%database, %collection, index = %name, "dropping index");

        let repository = self.repository.clone();
        let mut overlay = self.holder.open();
        overlay.remove_index(database, collection, name);
        align_doc_part_indexes(&mut overlay, database, collection);

        let orphaned: Vec<OrphanedDocPartIndex> = overlay
            .changes()
            .iter()
            .filter_map(|change| match change {
                Change::RemovedDocPartIndex {
                    table_ref,
                    identifier,
                    ..
                } => Some(OrphanedDocPartIndex {
                    table_ref: table_ref.clone(),
                    identifier: identifier.clone(),
                }),
                _ => None,
            })
            .collect();

        match repository
            .drop_index(database, &database_identifier, collection, name, &orphaned)
            .await
        {
            Ok(()) => {
                overlay.commit();
                Ok(true)
            }
            Err(error) => {
                drop(overlay);
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }

    async fn rename_collection(
        &mut self,
        from_database: &str,
        from_collection: &str,
        to_database: &str,
        to_collection: &str,
    ) -> Result<(), SchemaError> {
        {
            let snapshot = self.holder.current();
            let from_db = snapshot.database(from_database).ok_or_else(|| {
                SchemaError::UnexistentDatabase {
                    name: from_database.to_string(),
                }
            })?;
            if from_db.collection(from_collection).is_none() {
                return Err(SchemaError::UnexistentCollection {
                    database: from_database.to_string(),
                    name: from_collection.to_string(),
                });
            }
            if let Some(to_db) = snapshot.database(to_database) {
                if to_db.collection(to_collection).is_some() {
                    return Err(SchemaError::AlreadyExistentCollection {
                        database: to_database.to_string(),
                        name: to_collection.to_string(),
                    });
                }
            }
        }
        self.create_database(to_database).await?;
        info!(
            from = %format!("{from_database}.{from_collection}"),
            to = %format!("{to_database}.{to_collection}"),
            "renaming collection"
        );

        let snapshot = self.holder.current();
        let from_db = snapshot
            .database(from_database)
            .expect("checked above");
        let to_db = snapshot.database(to_database).expect("ensured above");
        let source = from_db
            .collection(from_collection)
            .expect("checked above");

        // Rebuild the collection under the target scope: fresh doc part
        // identifiers (they embed the collection identifier), fresh doc part
        // index identifiers (they hash the table identifier). Everything
        // else, including next_rid, moves verbatim.
        let to_collection_identifier = ids::collection_identifier(to_db, to_collection);
        let mut target = MetaCollection::new(
            to_collection.to_string(),
            to_collection_identifier.clone(),
        );
        target.indexes = source.indexes.clone();

        let mut doc_part_renames = Vec::new();
        for (table_ref, doc_part) in &source.doc_parts {
            let to_identifier = ids::doc_part_identifier(to_db, &target, table_ref);
            let mut moved = doc_part.clone();
            moved.identifier = to_identifier.clone();

            let mut index_renames = Vec::new();
            for dp_index in &mut moved.indexes {
                let renamed = ids::doc_part_index_identifier(
                    &to_identifier,
                    dp_index.unique,
                    &dp_index.columns,
                );
                index_renames.push(IndexRename {
                    from_identifier: dp_index.identifier.clone(),
                    to_identifier: renamed.clone(),
                    unique: dp_index.unique,
                    columns: dp_index.columns.clone(),
                });
                dp_index.identifier = renamed;
            }

            doc_part_renames.push(DocPartRename {
                table_ref: table_ref.clone(),
                from_identifier: doc_part.identifier.clone(),
                to_identifier,
                index_renames,
            });
            target.doc_parts.insert(table_ref.clone(), moved);
        }

        let request = RenameCollectionRequest {
            from_database: from_database.to_string(),
            from_database_identifier: from_db.identifier.clone(),
            from_collection: from_collection.to_string(),
            to_database: to_database.to_string(),
            to_database_identifier: to_db.identifier.clone(),
            to_collection: to_collection.to_string(),
            to_collection_identifier,
            doc_parts: doc_part_renames,
        };
        drop(snapshot);

        match self.repository.rename_collection(&request).await {
            Ok(()) => {
                let mut overlay = self.holder.open();
                overlay.move_collection(
                    from_database,
                    from_collection,
                    to_database,
                    target,
                );
                overlay.commit();
                Ok(())
            }
            Err(error) => {
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }

    fn get_indexes_info(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, SchemaError> {
        let snapshot = self.holder.current();
        let col = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?
            .collection(collection)
            .ok_or_else(|| SchemaError::UnexistentCollection {
                database: database.to_string(),
                name: collection.to_string(),
            })?;
        Ok(col
            .indexes
            .values()
            .map(|index| IndexInfo {
                name: index.name.clone(),
                unique: index.unique,
                fields: index.fields.clone(),
            })
            .collect())
    }

    async fn enable_data_import_mode(&mut self, database: &str) -> Result<(), SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        if db.import_mode {
            return Ok(());
        }
        info!(%database, "enabling data import mode");

        // Flag first: once it's durable, a crash anywhere below leaves a
        // state the validator accepts (import mode tolerates missing
        // indexes).
        self.repository.set_import_mode(database, true).await?;

        let mut result = Ok(());
        'drop_all: for col in db.collections.values() {
            for doc_part in col.doc_parts.values() {
                let mut identifiers =
                    vec![internal_index_name(&doc_part.identifier)];
                identifiers.extend(
                    doc_part.indexes.iter().map(|i| i.identifier.clone()),
                );
                for identifier in identifiers {
                    if let Err(error) = self
                        .repository
                        .drop_physical_index(&db.identifier, &identifier)
                        .await
                    {
                        result = Err(error);
                        break 'drop_all;
                    }
                }
            }
        }
        drop(snapshot);

        match result {
            Ok(()) => {
                let mut overlay = self.holder.open();
                overlay.set_import_mode(database, true);
                overlay.commit();
                Ok(())
            }
            Err(error) => {
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }

    async fn disable_data_import_mode(
        &mut self,
        database: &str,
    ) -> Result<(), SchemaError> {
        let snapshot = self.holder.current();
        let db = snapshot
            .database(database)
            .ok_or_else(|| SchemaError::UnexistentDatabase {
                name: database.to_string(),
            })?;
        if !db.import_mode {
            return Ok(());
        }
        info!(%database, "disabling data import mode, rebuilding indexes");

        let mut jobs = Vec::new();
        for col in db.collections.values() {
            for doc_part in col.doc_parts.values() {
                jobs.push(import::IndexRebuild {
                    database_identifier: db.identifier.clone(),
                    table_identifier: doc_part.identifier.clone(),
                    index_identifier: internal_index_name(&doc_part.identifier),
                    unique: false,
                    columns: vec![("did".to_string(), IndexOrdering::Asc)],
                });
                for dp_index in &doc_part.indexes {
                    jobs.push(import::IndexRebuild {
                        database_identifier: db.identifier.clone(),
                        table_identifier: doc_part.identifier.clone(),
                        index_identifier: dp_index.identifier.clone(),
                        unique: dp_index.unique,
                        columns: dp_index.columns.clone(),
                    });
                }
            }
        }
        drop(snapshot);

        // The import flag stays durably set until every index is back, so an
        // interrupted rebuild can simply be retried.
        import::rebuild_indexes(self.repository.clone(), &self.retry_policy, jobs)
            .await?;

        match self.repository.set_import_mode(database, false).await {
            Ok(()) => {
                let mut overlay = self.holder.open();
                overlay.set_import_mode(database, false);
                overlay.commit();
                Ok(())
            }
            Err(error) => {
                self.resynchronize().await;
                Err(error.into())
            }
        }
    }
}

/// Apply a fit overlay's change log durably, in dependency order: new doc
/// part tables (parents first, with their initial columns), new columns on
/// pre-existing tables, then doc part index reshapes.
async fn apply_fit_changes(
    repository: &Arc<dyn Repository>,
    overlay: &Overlay<'_>,
    database: &str,
    database_identifier: &str,
    collection: &str,
    deferred: bool,
) -> Result<(), crate::repository::interface::Error> {
    let col = overlay
        .snapshot()
        .collection(database, collection)
        .expect("fit ran against this collection");

    let new_doc_parts: Vec<&TableRef> = overlay
        .changes()
        .iter()
        .filter_map(|change| match change {
            Change::AddedDocPart { table_ref, .. } => Some(table_ref),
            _ => None,
        })
        .collect();

    for table_ref in &new_doc_parts {
        let doc_part = col.doc_part(table_ref).expect("doc part in overlay");
        repository
            .add_doc_part(database, database_identifier, collection, doc_part, deferred)
            .await?;
    }

    let mut new_columns: BTreeMap<&TableRef, (Vec<MetaField>, Vec<MetaScalar>)> =
        BTreeMap::new();
    for change in overlay.changes() {
        match change {
            Change::AddedField {
                table_ref,
                name,
                field_type,
                ..
            } if !new_doc_parts.contains(&table_ref) => {
                let field = col
                    .doc_part(table_ref)
                    .and_then(|dp| dp.field(name, *field_type))
                    .expect("field in overlay")
                    .clone();
                new_columns.entry(table_ref).or_default().0.push(field);
            }
            Change::AddedScalar {
                table_ref,
                field_type,
                ..
            } if !new_doc_parts.contains(&table_ref) => {
                let scalar = col
                    .doc_part(table_ref)
                    .and_then(|dp| dp.scalar(*field_type))
                    .expect("scalar in overlay")
                    .clone();
                new_columns.entry(table_ref).or_default().1.push(scalar);
            }
            _ => {}
        }
    }
    for (table_ref, (fields, scalars)) in &new_columns {
        let doc_part = col.doc_part(table_ref).expect("doc part in overlay");
        repository
            .add_columns(
                database,
                database_identifier,
                collection,
                table_ref,
                &doc_part.identifier,
                fields,
                scalars,
            )
            .await?;
    }

    for change in overlay.changes() {
        if let Change::RemovedDocPartIndex {
            table_ref,
            identifier,
            ..
        } = change
        {
            repository
                .drop_doc_part_index(
                    database,
                    database_identifier,
                    collection,
                    &OrphanedDocPartIndex {
                        table_ref: table_ref.clone(),
                        identifier: identifier.clone(),
                    },
                )
                .await?;
        }
    }
    for change in overlay.changes() {
        if let Change::AddedDocPartIndex {
            table_ref,
            identifier,
            ..
        } = change
        {
            let doc_part = col.doc_part(table_ref).expect("doc part in overlay");
            let dp_index = doc_part
                .doc_part_index(identifier)
                .expect("doc part index in overlay");
            repository
                .add_doc_part_index(
                    database,
                    database_identifier,
                    collection,
                    &NewDocPartIndex {
                        table_ref: table_ref.clone(),
                        table_identifier: doc_part.identifier.clone(),
                        identifier: dp_index.identifier.clone(),
                        unique: dp_index.unique,
                        columns: dp_index.columns.clone(),
                    },
                    deferred,
                )
                .await?;
        }
    }

    Ok(())
}

/// Refuse a command while in the failed state, still delivering a reply so
/// the caller doesn't hang.
fn refuse(command: Command, reason: String) {
    let error = || SchemaError::Failed {
        reason: reason.clone(),
    };
    match command {
        Command::RefreshMetadata { reply } => {
            let _ = reply.send(Err(error()));
        }
        Command::PrepareSchema { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::CreateDatabase { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::CreateCollection { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::DropDatabase { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::DropCollection { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::RenameCollection { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::CreateIndex { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::DropIndex { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::GetIndexesInfo { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::DatabaseNames { reply } => {
            let _ = reply.send(Err(error()));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(Err(error()));
        }
        Command::EnableDataImportMode { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
        Command::DisableDataImportMode { reply, .. } => {
            let _ = reply.send(Err(error()));
        }
    }
}
