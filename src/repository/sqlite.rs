use std::collections::BTreeMap;
use std::{fmt::Debug, str::FromStr};

use async_trait::async_trait;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row, Sqlite, Transaction,
};

use crate::implement_repository;
use crate::model::{
    FieldType, IndexOrdering, MetaDocPart, MetaField, MetaIndex, MetaScalar,
    MetaSnapshot, TableRef,
};
use crate::validator::{CatalogRows, PhysicalIndex, PhysicalSchema, PhysicalTable};

use super::interface::{
    Error, IndexRename, NewDocPartIndex, OrphanedDocPartIndex, RenameCollectionRequest,
    Repository, Result,
};

/// SQLite has a single flat namespace, so both tables and indexes carry the
/// database identifier as a `__`-separated prefix.
#[derive(Debug)]
pub struct SqliteRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");

    pub async fn try_new(
        dsn: String,
        journal_mode: SqliteJournalMode,
    ) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&dsn)?
            .create_if_missing(true)
            .journal_mode(journal_mode)
            // The cascading composite FKs in the catalog do real work here.
            .foreign_keys(true);

        // A single connection: DDL and catalog writes always go together, and
        // an in-memory database exists per connection anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let repo = Self { executor: pool };
        repo.setup().await;
        Ok(repo)
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            let message = d.message();

            // For some reason, sqlx doesn't return the proper errcode for FK violations,
            // even though it's calling sqlite3_extended_errcode which is meant to return full codes.
            // Unique constraint violations do return the correct code though.
            if message.contains("FOREIGN KEY constraint failed") {
                return Error::FKConstraintViolation(error);
            }
            if message.contains("UNIQUE constraint failed") {
                return Error::UniqueConstraintViolation(error);
            }
        }
        Error::SqlxError(error)
    }

    pub fn table_sql(database_identifier: &str, table_identifier: &str) -> String {
        format!("\"{database_identifier}__{table_identifier}\"")
    }

    pub fn index_name(database_identifier: &str, index_identifier: &str) -> String {
        format!("{database_identifier}__{index_identifier}")
    }

    pub fn index_sql(database_identifier: &str, index_identifier: &str) -> String {
        format!("\"{database_identifier}__{index_identifier}\"")
    }

    pub fn column_type(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::String => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Long => "BIGINT",
            FieldType::Double => "REAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Instant => "TIMESTAMP",
            FieldType::Binary => "BLOB",
            FieldType::Decimal128 => "NUMERIC",
            // Presence markers: the column records that the value was of this
            // kind, the kind itself carries no payload.
            FieldType::Null => "BOOLEAN",
            FieldType::Child => "BOOLEAN",
            FieldType::MinKey => "BOOLEAN",
            FieldType::MaxKey => "BOOLEAN",
            FieldType::ObjectId => "BLOB",
            FieldType::DbTimestamp => "BIGINT",
            FieldType::Javascript => "TEXT",
            FieldType::Regex => "TEXT",
        }
    }

    /// SQLite reports back exactly the declared type.
    pub fn introspected_type(field_type: FieldType) -> &'static str {
        Self::column_type(field_type)
    }

    async fn create_namespace(
        &self,
        _tx: &mut Transaction<'_, Sqlite>,
        _identifier: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn drop_namespace(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        identifier: &str,
    ) -> Result<()> {
        let pattern = format!("{}\\_\\_%", identifier.replace('_', "\\_"));
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE $1 ESCAPE '\\'",
        )
        .bind(pattern)
        .fetch_all(&mut **tx)
        .await
        .map_err(Self::interpret_error)?;

        for (table,) in tables {
            sqlx::query(&format!("DROP TABLE \"{table}\""))
                .execute(&mut **tx)
                .await
                .map_err(Self::interpret_error)?;
        }
        Ok(())
    }

    async fn rename_physical_table(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        from_database_identifier: &str,
        from_table_identifier: &str,
        to_database_identifier: &str,
        to_table_identifier: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO \"{}__{}\"",
            Self::table_sql(from_database_identifier, from_table_identifier),
            to_database_identifier,
            to_table_identifier
        ))
        .execute(&mut **tx)
        .await
        .map_err(Self::interpret_error)?;
        Ok(())
    }

    /// Renaming an index means recreating it under the new name. When the
    /// physical index is absent (deferred by import mode) there is nothing to
    /// do; the catalog row already carries the new identifier.
    async fn rename_physical_index(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        from_database_identifier: &str,
        to_database_identifier: &str,
        to_table_identifier: &str,
        rename: &IndexRename,
    ) -> Result<()> {
        let old_name = Self::index_name(from_database_identifier, &rename.from_identifier);
        let (exists,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = $1",
        )
        .bind(&old_name)
        .fetch_one(&mut **tx)
        .await
        .map_err(Self::interpret_error)?;
        if exists == 0 {
            return Ok(());
        }

        sqlx::query(&format!("DROP INDEX \"{old_name}\""))
            .execute(&mut **tx)
            .await
            .map_err(Self::interpret_error)?;

        let columns = rename
            .columns
            .iter()
            .map(|(column, ordering)| format!("\"{column}\" {ordering}"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE {}INDEX \"{}\" ON {} ({})",
            if rename.unique { "UNIQUE " } else { "" },
            Self::index_name(to_database_identifier, &rename.to_identifier),
            Self::table_sql(to_database_identifier, to_table_identifier),
            columns
        ))
        .execute(&mut **tx)
        .await
        .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn physical_schema(&self, snapshot: &MetaSnapshot) -> Result<PhysicalSchema> {
        // Longest identifier first, so "a_b__t" resolves to database "a_b"
        // and not to "a" with table "b__t".
        let mut identifiers: Vec<&str> = snapshot
            .databases
            .values()
            .map(|db| db.identifier.as_str())
            .collect();
        identifiers.sort_by_key(|id| std::cmp::Reverse(id.len()));

        let mut schema = PhysicalSchema::default();
        for identifier in &identifiers {
            schema.databases.insert(identifier.to_string(), BTreeMap::new());
        }

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'meta\\_%' ESCAPE '\\' \
             AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             AND name NOT LIKE '\\_sqlx%' ESCAPE '\\'",
        )
        .fetch_all(&self.executor)
        .await
        .map_err(Self::interpret_error)?;

        for (name,) in tables {
            let Some((database_identifier, table_identifier)) = identifiers
                .iter()
                .find_map(|id| {
                    name.strip_prefix(&format!("{id}__"))
                        .map(|table| (id.to_string(), table.to_string()))
                })
            else {
                schema.unclaimed_tables.push(name);
                continue;
            };

            let mut table = PhysicalTable::default();

            let columns: Vec<(String, String)> =
                sqlx::query_as("SELECT name, type FROM pragma_table_info($1)")
                    .bind(&name)
                    .fetch_all(&self.executor)
                    .await
                    .map_err(Self::interpret_error)?;
            for (column, column_type) in columns {
                table.columns.insert(column, column_type);
            }

            // origin = 'c': only indexes from CREATE INDEX, not the implicit
            // ones backing UNIQUE/PK constraints.
            let indexes: Vec<(String, bool, String)> = sqlx::query_as(
                "SELECT name, \"unique\", origin FROM pragma_index_list($1)",
            )
            .bind(&name)
            .fetch_all(&self.executor)
            .await
            .map_err(Self::interpret_error)?;

            for (index_name, unique, origin) in indexes {
                if origin != "c" {
                    continue;
                }
                let index_columns: Vec<(String, bool)> = sqlx::query_as(
                    "SELECT name, \"desc\" FROM pragma_index_xinfo($1) \
                     WHERE key = 1 ORDER BY seqno",
                )
                .bind(&index_name)
                .fetch_all(&self.executor)
                .await
                .map_err(Self::interpret_error)?;
                table.indexes.push(PhysicalIndex {
                    name: index_name,
                    unique,
                    columns: index_columns,
                });
            }

            match schema.databases.get_mut(&database_identifier) {
                Some(tables) => {
                    tables.insert(table_identifier, table);
                }
                None => schema.unclaimed_tables.push(name),
            }
        }

        Ok(schema)
    }
}

implement_repository!(SqliteRepository);
