//! The schema manager: a single-actor front over the metadata snapshot and
//! the DDL executor. All structural operations funnel through one worker
//! task, so at most one schema change is in flight at any time and every
//! caller observes operations in submission order.

pub mod import;
mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::document::DocValue;
use crate::fit::{self, FitOutcome};
use crate::model::{MetaIndexField, MetaSnapshot};
use crate::repository::interface::{self, Repository};
use crate::validator::Divergence;

pub use worker::COMMAND_QUEUE_DEPTH;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("database {name:?} doesn't exist")]
    UnexistentDatabase { name: String },

    #[error("collection {database:?}.{name:?} doesn't exist")]
    UnexistentCollection { database: String, name: String },

    #[error("collection {database:?}.{name:?} already exists")]
    AlreadyExistentCollection { database: String, name: String },

    #[error("unsupported index: {reason}")]
    UnsupportedIndex { reason: String },

    #[error("invalid document: {reason}")]
    InvalidDocumentType { reason: String },

    #[error("catalog and physical schema diverge: {divergences:?}")]
    Divergent { divergences: Vec<Divergence> },

    /// The worker hit an unrecoverable fault and refuses further work.
    #[error("schema manager is in a failed state: {reason}")]
    Failed { reason: String },

    #[error("schema manager stopped")]
    ManagerStopped,

    #[error("catalog error: {0:?}")]
    Repository(interface::Error),
}

impl From<interface::Error> for SchemaError {
    fn from(error: interface::Error) -> Self {
        match error {
            interface::Error::Divergent(divergences) => {
                SchemaError::Divergent { divergences }
            }
            other => SchemaError::Repository(other),
        }
    }
}

/// A logical index as reported to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub fields: Vec<MetaIndexField>,
}

/// Notified exactly once when the worker transitions to the failed state.
/// The default implementation logs; embedders wanting to halt or restart the
/// process hook in here.
pub trait FaultHandler: Send + Sync {
    fn on_fatal(&self, error: &SchemaError);
}

#[derive(Debug, Default)]
pub struct LoggingFaultHandler;

impl FaultHandler for LoggingFaultHandler {
    fn on_fatal(&self, error: &SchemaError) {
        error!("fatal schema manager error, refusing further operations: {error}");
    }
}

type Reply<T> = oneshot::Sender<Result<T, SchemaError>>;

#[derive(Debug)]
pub(crate) enum Command {
    RefreshMetadata {
        reply: Reply<()>,
    },
    PrepareSchema {
        database: String,
        collection: String,
        docs: Vec<DocValue>,
        reply: Reply<bool>,
    },
    CreateDatabase {
        name: String,
        reply: Reply<bool>,
    },
    CreateCollection {
        database: String,
        name: String,
        reply: Reply<bool>,
    },
    DropDatabase {
        name: String,
        reply: Reply<()>,
    },
    DropCollection {
        database: String,
        name: String,
        reply: Reply<()>,
    },
    RenameCollection {
        from_database: String,
        from_collection: String,
        to_database: String,
        to_collection: String,
        reply: Reply<()>,
    },
    CreateIndex {
        database: String,
        collection: String,
        name: String,
        fields: Vec<MetaIndexField>,
        unique: bool,
        reply: Reply<bool>,
    },
    DropIndex {
        database: String,
        collection: String,
        name: String,
        reply: Reply<bool>,
    },
    GetIndexesInfo {
        database: String,
        collection: String,
        reply: Reply<Vec<IndexInfo>>,
    },
    DatabaseNames {
        reply: Reply<Vec<String>>,
    },
    Snapshot {
        reply: Reply<Arc<MetaSnapshot>>,
    },
    EnableDataImportMode {
        database: String,
        reply: Reply<()>,
    },
    DisableDataImportMode {
        database: String,
        reply: Reply<()>,
    },
}

/// Cloneable handle; all methods are `async` round-trips through the worker
/// queue, except the local fit check which runs against a snapshot already
/// fetched.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    sender: mpsc::Sender<Command>,
}

impl SchemaManager {
    /// Load the snapshot from the catalog and spawn the worker task.
    pub async fn start(repository: Arc<dyn Repository>) -> Result<Self, SchemaError> {
        Self::start_with(repository, Arc::new(LoggingFaultHandler)).await
    }

    pub async fn start_with(
        repository: Arc<dyn Repository>,
        fault_handler: Arc<dyn FaultHandler>,
    ) -> Result<Self, SchemaError> {
        let snapshot = repository.read_metadata().await?;
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = worker::Worker::new(repository, snapshot, fault_handler);
        tokio::spawn(worker.run(receiver));
        Ok(SchemaManager { sender })
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchemaError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| SchemaError::ManagerStopped)?;
        rx.await.map_err(|_| SchemaError::ManagerStopped)?
    }

    /// Replace the in-memory snapshot with a fresh load from the catalog.
    pub async fn refresh_metadata(&self) -> Result<(), SchemaError> {
        self.call(|reply| Command::RefreshMetadata { reply }).await
    }

    /// Make the schema fit the documents: get-or-create the database and
    /// collection, then apply whatever doc parts and columns the batch needs.
    /// Returns whether anything changed.
    pub async fn prepare_schema(
        &self,
        database: &str,
        collection: &str,
        docs: Vec<DocValue>,
    ) -> Result<bool, SchemaError> {
        self.call(|reply| Command::PrepareSchema {
            database: database.to_string(),
            collection: collection.to_string(),
            docs,
            reply,
        })
        .await
    }

    /// Returns false when the database already existed.
    pub async fn create_database(&self, name: &str) -> Result<bool, SchemaError> {
        self.call(|reply| Command::CreateDatabase {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Returns false when the collection already existed.
    pub async fn create_collection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<bool, SchemaError> {
        self.call(|reply| Command::CreateCollection {
            database: database.to_string(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn drop_database(&self, name: &str) -> Result<(), SchemaError> {
        self.call(|reply| Command::DropDatabase {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn drop_collection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<(), SchemaError> {
        self.call(|reply| Command::DropCollection {
            database: database.to_string(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Move/rename a collection, potentially across databases (the target
    /// database is created when absent). Doc part contents, logical indexes
    /// and row-id generator positions all survive the move.
    pub async fn rename_collection(
        &self,
        from_database: &str,
        from_collection: &str,
        to_database: &str,
        to_collection: &str,
    ) -> Result<(), SchemaError> {
        self.call(|reply| Command::RenameCollection {
            from_database: from_database.to_string(),
            from_collection: from_collection.to_string(),
            to_database: to_database.to_string(),
            to_collection: to_collection.to_string(),
            reply,
        })
        .await
    }

    /// Returns false when an equivalent index (same name, or same fields and
    /// uniqueness) already exists.
    pub async fn create_index(
        &self,
        database: &str,
        collection: &str,
        name: &str,
        fields: Vec<MetaIndexField>,
        unique: bool,
    ) -> Result<bool, SchemaError> {
        self.call(|reply| Command::CreateIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            name: name.to_string(),
            fields,
            unique,
            reply,
        })
        .await
    }

    /// Returns false when there was no index with this name.
    pub async fn drop_index(
        &self,
        database: &str,
        collection: &str,
        name: &str,
    ) -> Result<bool, SchemaError> {
        self.call(|reply| Command::DropIndex {
            database: database.to_string(),
            collection: collection.to_string(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_indexes_info(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, SchemaError> {
        self.call(|reply| Command::GetIndexesInfo {
            database: database.to_string(),
            collection: collection.to_string(),
            reply,
        })
        .await
    }

    pub async fn database_names(&self) -> Result<Vec<String>, SchemaError> {
        self.call(|reply| Command::DatabaseNames { reply }).await
    }

    /// The current committed snapshot; readers keep the `Arc` for a stable
    /// point-in-time view.
    pub async fn snapshot(&self) -> Result<Arc<MetaSnapshot>, SchemaError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Check whether a batch would store unchanged under the current schema.
    /// `NeedsSchemaChanges` is the signal to call [`Self::prepare_schema`] and
    /// retry.
    pub async fn check_fit(
        &self,
        database: &str,
        collection: &str,
        docs: &[DocValue],
    ) -> Result<FitOutcome, SchemaError> {
        let snapshot = self.snapshot().await?;
        fit::check_fit(&snapshot, database, collection, docs)
    }

    /// Flag the database for bulk loading: existing secondary indexes are
    /// dropped physically (their metadata is kept) and new ones are deferred.
    pub async fn enable_data_import_mode(&self, database: &str) -> Result<(), SchemaError> {
        self.call(|reply| Command::EnableDataImportMode {
            database: database.to_string(),
            reply,
        })
        .await
    }

    /// Clear the bulk-loading flag and rebuild every deferred index. The
    /// rebuilds run as concurrent per-index jobs; the worker accepts no other
    /// structural request until all of them finish.
    pub async fn disable_data_import_mode(
        &self,
        database: &str,
    ) -> Result<(), SchemaError> {
        self.call(|reply| Command::DisableDataImportMode {
            database: database.to_string(),
            reply,
        })
        .await
    }
}
