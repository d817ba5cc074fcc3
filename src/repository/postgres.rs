use std::collections::BTreeMap;
use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    postgres::PgPoolOptions,
    Executor, PgPool, Postgres, QueryBuilder, Row, Transaction,
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

/// The catalog lives in its own schema (`schema_name`, on the search path);
/// every logical database gets a schema of its own, so tables and indexes
/// are schema-qualified by the database identifier.
#[derive(Debug)]
pub struct PostgresRepository {
    pub executor: PgPool,
    pub schema_name: String,
}

impl PostgresRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");

    pub async fn try_new(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !Postgres::database_exists(&dsn).await? {
            let _ = Postgres::create_database(&dsn).await;
        }

        let repo = PostgresRepository::connect(dsn, schema_name.clone()).await?;

        repo.executor
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {schema_name};").as_str())
            .await?;

        // Setup the catalog schema
        repo.setup().await;
        Ok(repo)
    }

    pub async fn connect(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        let schema_name_2 = schema_name.clone();

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(16)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .after_connect(move |c, _m| {
                let schema_name = schema_name.to_owned();
                Box::pin(async move {
                    let query = format!("SET search_path TO {schema_name},public;");
                    c.execute(sqlx::query(&query)).await?;
                    Ok(())
                })
            })
            .connect(&dsn)
            .await?;

        Ok(Self {
            executor: pool,
            schema_name: schema_name_2,
        })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                if code == "23505" {
                    return Error::UniqueConstraintViolation(error);
                } else if code == "23503" {
                    return Error::FKConstraintViolation(error);
                }
            }
        }
        Error::SqlxError(error)
    }

    pub fn table_sql(database_identifier: &str, table_identifier: &str) -> String {
        format!("\"{database_identifier}\".\"{table_identifier}\"")
    }

    /// CREATE INDEX takes an unqualified name; the index lands in the
    /// table's schema.
    pub fn index_name(_database_identifier: &str, index_identifier: &str) -> String {
        index_identifier.to_string()
    }

    pub fn index_sql(database_identifier: &str, index_identifier: &str) -> String {
        format!("\"{database_identifier}\".\"{index_identifier}\"")
    }

    pub fn column_type(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::String => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Long => "BIGINT",
            FieldType::Double => "DOUBLE PRECISION",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Instant => "TIMESTAMPTZ",
            FieldType::Binary => "BYTEA",
            FieldType::Decimal128 => "NUMERIC",
            // Presence markers: the column records that the value was of this
            // kind, the kind itself carries no payload.
            FieldType::Null => "BOOLEAN",
            FieldType::Child => "BOOLEAN",
            FieldType::MinKey => "BOOLEAN",
            FieldType::MaxKey => "BOOLEAN",
            FieldType::ObjectId => "BYTEA",
            FieldType::DbTimestamp => "BIGINT",
            FieldType::Javascript => "TEXT",
            FieldType::Regex => "TEXT",
        }
    }

    /// What information_schema reports for the declared types above.
    pub fn introspected_type(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::String | FieldType::Javascript | FieldType::Regex => "text",
            FieldType::Integer => "integer",
            FieldType::Long | FieldType::DbTimestamp => "bigint",
            FieldType::Double => "double precision",
            FieldType::Boolean
            | FieldType::Null
            | FieldType::Child
            | FieldType::MinKey
            | FieldType::MaxKey => "boolean",
            FieldType::Date => "date",
            FieldType::Time => "time without time zone",
            FieldType::Instant => "timestamp with time zone",
            FieldType::Binary | FieldType::ObjectId => "bytea",
            FieldType::Decimal128 => "numeric",
        }
    }

    async fn create_namespace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        identifier: &str,
    ) -> Result<()> {
        sqlx::query(&format!("CREATE SCHEMA \"{identifier}\""))
            .execute(&mut **tx)
            .await
            .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn drop_namespace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        identifier: &str,
    ) -> Result<()> {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{identifier}\" CASCADE"))
            .execute(&mut **tx)
            .await
            .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn rename_physical_table(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        from_database_identifier: &str,
        from_table_identifier: &str,
        to_database_identifier: &str,
        to_table_identifier: &str,
    ) -> Result<()> {
        if from_table_identifier != to_table_identifier {
            sqlx::query(&format!(
                "ALTER TABLE {} RENAME TO \"{}\"",
                Self::table_sql(from_database_identifier, from_table_identifier),
                to_table_identifier
            ))
            .execute(&mut **tx)
            .await
            .map_err(Self::interpret_error)?;
        }
        if from_database_identifier != to_database_identifier {
            sqlx::query(&format!(
                "ALTER TABLE {} SET SCHEMA \"{}\"",
                Self::table_sql(from_database_identifier, to_table_identifier),
                to_database_identifier
            ))
            .execute(&mut **tx)
            .await
            .map_err(Self::interpret_error)?;
        }
        Ok(())
    }

    /// Indexes move schemas together with their table, so only the name
    /// needs changing by the time this runs. IF EXISTS covers indexes
    /// deferred by import mode.
    async fn rename_physical_index(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        _from_database_identifier: &str,
        to_database_identifier: &str,
        _to_table_identifier: &str,
        rename: &IndexRename,
    ) -> Result<()> {
        if rename.from_identifier == rename.to_identifier {
            return Ok(());
        }
        sqlx::query(&format!(
            "ALTER INDEX IF EXISTS {} RENAME TO \"{}\"",
            Self::index_sql(to_database_identifier, &rename.from_identifier),
            rename.to_identifier
        ))
        .execute(&mut **tx)
        .await
        .map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn physical_schema(&self, snapshot: &MetaSnapshot) -> Result<PhysicalSchema> {
        let identifiers: Vec<String> = snapshot
            .databases
            .values()
            .map(|db| db.identifier.clone())
            .collect();

        let mut schema = PhysicalSchema::default();
        for identifier in &identifiers {
            schema.databases.insert(identifier.clone(), BTreeMap::new());
        }
        if identifiers.is_empty() {
            return Ok(schema);
        }

        let columns: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT table_schema, table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = ANY($1) \
             ORDER BY table_schema, table_name, ordinal_position",
        )
        .bind(&identifiers)
        .fetch_all(&self.executor)
        .await
        .map_err(Self::interpret_error)?;

        for (table_schema, table_name, column_name, data_type) in columns {
            let Some(tables) = schema.databases.get_mut(&table_schema) else {
                continue;
            };
            tables
                .entry(table_name)
                .or_default()
                .columns
                .insert(column_name, data_type);
        }

        let index_columns: Vec<(String, String, String, bool, String, bool)> =
            sqlx::query_as(
                "SELECT n.nspname, t.relname, i.relname, ix.indisunique, \
                        a.attname, (ix.indoption[ord.n - 1] & 1) = 1 \
                 FROM pg_index ix \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_class t ON t.oid = ix.indrelid \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS ord(attnum, n) \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ord.attnum \
                 WHERE n.nspname = ANY($1) \
                 ORDER BY n.nspname, t.relname, i.relname, ord.n",
            )
            .bind(&identifiers)
            .fetch_all(&self.executor)
            .await
            .map_err(Self::interpret_error)?;

        for (table_schema, table_name, index_name, unique, column, descending) in
            index_columns
        {
            let Some(table) = schema
                .databases
                .get_mut(&table_schema)
                .and_then(|tables| tables.get_mut(&table_name))
            else {
                continue;
            };
            match table.indexes.iter_mut().find(|i| i.name == index_name) {
                Some(index) => index.columns.push((column, descending)),
                None => table.indexes.push(PhysicalIndex {
                    name: index_name,
                    unique,
                    columns: vec![(column, descending)],
                }),
            }
        }

        Ok(schema)
    }
}

implement_repository!(PostgresRepository);

pub mod testutils {
    use rand::Rng;

    use super::PostgresRepository;

    pub fn get_random_schema() -> String {
        // Generate a random schema (taken from IOx)
        let mut rng = rand::thread_rng();
        (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|c| c.is_ascii_alphabetic())
            .take(20)
            .map(char::from)
            .collect::<String>()
    }

    pub async fn make_repository(dsn: &str) -> PostgresRepository {
        let schema_name = get_random_schema();

        PostgresRepository::try_new(dsn.to_string(), schema_name)
            .await
            .expect("Error setting up the database")
    }
}
