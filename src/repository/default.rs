/// Default implementation for a Repository that factors out common
/// query patterns / SQL queries between Postgres and SQLite.
///
/// Usage:
///
/// The struct has to have certain fields and inherent items, since this macro
/// relies on them:
///
/// ```ignore
/// pub struct MyRepository {
///     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>
/// }
///
/// impl MyRepository {
///     pub const MIGRATOR: sqlx::Migrator = sqlx::migrate!("my/migrations");
///
///     pub fn interpret_error(error: sqlx::Error) -> Error {
///         // Interpret the database-specific error code and turn some sqlx errors
///         // into the Error enum values like UniqueConstraintViolation/FKConstraintViolation
///         // ...
///     }
///
///     // Physical naming: a quoted, executable table reference and the bare /
///     // qualified physical index names (SQLite prefixes both with the
///     // database identifier, Postgres schema-qualifies).
///     pub fn table_sql(database_identifier: &str, table_identifier: &str) -> String { ... }
///     pub fn index_name(database_identifier: &str, index_identifier: &str) -> String { ... }
///     pub fn index_sql(database_identifier: &str, index_identifier: &str) -> String { ... }
///
///     // Declared DDL type and the type introspection reports back for it.
///     pub fn column_type(field_type: FieldType) -> &'static str { ... }
///     pub fn introspected_type(field_type: FieldType) -> &'static str { ... }
///
///     // Namespace and rename hooks (no-ops where the backend has no notion
///     // of them), plus full physical-schema introspection.
///     async fn create_namespace(&self, tx: &mut Transaction<'_, DB>, identifier: &str) -> Result<(), Error> { ... }
///     async fn drop_namespace(&self, tx: &mut Transaction<'_, DB>, identifier: &str) -> Result<(), Error> { ... }
///     async fn rename_physical_table(&self, tx, from_db, from_table, to_db, to_table) -> Result<(), Error> { ... }
///     async fn rename_physical_index(&self, tx, from_db, to_db, to_table, rename: &IndexRename) -> Result<(), Error> { ... }
///     async fn physical_schema(&self, snapshot: &MetaSnapshot) -> Result<PhysicalSchema, Error> { ... }
/// }
///
/// implement_repository!(SqliteRepository)
/// ```
///
/// Gigajank alert: why are we doing this? The code between PG and SQLite is extremely similar.
/// But, I couldn't find a better way to factor it out in order to reduce duplication.
/// Here's what I tried:
///
///   - Use a generic `Pool<Any>`. This causes a weird borrow checker error when using a
///     `QueryBuilder` (https://github.com/launchbadge/sqlx/issues/1978)
///   - Make the implementation generic over any DB (that implements sqlx::Database). In that
///     case, we need to add a bunch of `where` clauses to the implementation giving constraints
///     on the argument, the query and the result types (see https://stackoverflow.com/a/70573732).
///     And, when we do that, we hit the borrow checker error again from #1.
///   - Add macros with default implementations for everything in the Repository trait and use them
///     instead of putting the whole implementation in a macro. This conflicts with the #[async_trait]
///     macro and breaks it (see https://stackoverflow.com/q/68573578).
///
/// In any case, this means we have to remove compile-time query checking (even if we duplicate the code
/// completely), see https://github.com/launchbadge/sqlx/issues/121 and
/// https://github.com/launchbadge/sqlx/issues/916.

/// Name of the internal lookup index on a doc part table's `did` column,
/// derived from the physical table identifier. Capped so the backend prefix
/// plus the suffix stays inside identifier length limits.
pub fn internal_index_name(table_identifier: &str) -> String {
    let head = &table_identifier[..table_identifier.len().min(55)];
    format!("{head}_did_idx")
}

#[macro_export]
macro_rules! implement_repository {
    ($repo: ident) => {
#[async_trait]
impl Repository for $repo {
    async fn setup(&self) {
        $repo::MIGRATOR
            .run(&self.executor)
            .await
            .expect("error running migrations");
    }

    async fn add_database(&self, name: &str, identifier: &str) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "INSERT INTO meta_database (name, identifier, import_mode) VALUES ($1, $2, $3)",
        )
        .bind(name)
        .bind(identifier)
        .bind(false)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        self.create_namespace(&mut tx, identifier).await?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn drop_database(&self, name: &str, identifier: &str) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        // Do RETURNING (name) and fetch_one() to force a row not found error
        // if the database doesn't exist; the catalog rows of every child
        // object go away through the FK cascade.
        sqlx::query("DELETE FROM meta_database WHERE name = $1 RETURNING name")
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        self.drop_namespace(&mut tx, identifier).await?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn add_collection(
        &self,
        database: &str,
        name: &str,
        identifier: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO meta_collection (database, name, identifier) VALUES ($1, $2, $3)",
        )
        .bind(database)
        .bind(name)
        .bind(identifier)
        .execute(&self.executor)
        .await
        .map_err($repo::interpret_error)?;

        Ok(())
    }

    async fn drop_collection(
        &self,
        database: &str,
        database_identifier: &str,
        name: &str,
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT identifier FROM meta_doc_part WHERE database = $1 AND collection = $2",
        )
        .bind(database)
        .bind(name)
        .fetch_all(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        sqlx::query("DELETE FROM meta_collection WHERE database = $1 AND name = $2 RETURNING name")
            .bind(database)
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        // Dropping the table takes its indexes with it on both backends.
        for (table_identifier,) in tables {
            sqlx::query(&format!(
                "DROP TABLE {}",
                $repo::table_sql(database_identifier, &table_identifier)
            ))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn add_doc_part(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        doc_part: &MetaDocPart,
        deferred: bool,
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let mut columns: Vec<String> = if doc_part.table_ref.is_root() {
            vec!["\"did\" BIGINT NOT NULL".to_string()]
        } else {
            vec![
                "\"did\" BIGINT NOT NULL".to_string(),
                "\"rid\" BIGINT NOT NULL".to_string(),
                "\"pid\" BIGINT NOT NULL".to_string(),
                "\"seq\" INTEGER".to_string(),
            ]
        };
        for field in doc_part.fields.values() {
            columns.push(format!(
                "\"{}\" {}",
                field.identifier,
                $repo::column_type(field.field_type)
            ));
        }
        for scalar in doc_part.scalars.values() {
            columns.push(format!(
                "\"{}\" {}",
                scalar.identifier,
                $repo::column_type(scalar.field_type)
            ));
        }

        let table_sql = $repo::table_sql(database_identifier, &doc_part.identifier);
        sqlx::query(&format!("CREATE TABLE {} ({})", table_sql, columns.join(", ")))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

        if !deferred {
            sqlx::query(&format!(
                "CREATE INDEX \"{}\" ON {} (\"did\")",
                $repo::index_name(
                    database_identifier,
                    &$crate::repository::default::internal_index_name(&doc_part.identifier)
                ),
                table_sql
            ))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        sqlx::query(
            "INSERT INTO meta_doc_part (database, collection, table_ref, identifier, next_rid) \
             VALUES ($1, $2, $3, $4, 0)",
        )
        .bind(database)
        .bind(collection)
        .bind(doc_part.table_ref.to_catalog())
        .bind(&doc_part.identifier)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        if !doc_part.fields.is_empty() {
            let mut builder: QueryBuilder<_> = QueryBuilder::new(
                "INSERT INTO meta_field (database, collection, table_ref, name, identifier, type) ",
            );
            builder.push_values(doc_part.fields.values(), |mut b, field| {
                b.push_bind(database)
                    .push_bind(collection)
                    .push_bind(doc_part.table_ref.to_catalog())
                    .push_bind(&field.name)
                    .push_bind(&field.identifier)
                    .push_bind(field.field_type.to_string());
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
        }

        if !doc_part.scalars.is_empty() {
            let mut builder: QueryBuilder<_> = QueryBuilder::new(
                "INSERT INTO meta_scalar (database, collection, table_ref, type, identifier) ",
            );
            builder.push_values(doc_part.scalars.values(), |mut b, scalar| {
                b.push_bind(database)
                    .push_bind(collection)
                    .push_bind(doc_part.table_ref.to_catalog())
                    .push_bind(scalar.field_type.to_string())
                    .push_bind(&scalar.identifier);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn add_columns(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        table_ref: &TableRef,
        doc_part_identifier: &str,
        fields: &[MetaField],
        scalars: &[MetaScalar],
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let table_sql = $repo::table_sql(database_identifier, doc_part_identifier);

        // SQLite only takes one ADD COLUMN per statement, so loop for both.
        for (identifier, field_type) in fields
            .iter()
            .map(|f| (&f.identifier, f.field_type))
            .chain(scalars.iter().map(|s| (&s.identifier, s.field_type)))
        {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN \"{}\" {}",
                table_sql,
                identifier,
                $repo::column_type(field_type)
            ))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        for field in fields {
            sqlx::query(
                "INSERT INTO meta_field (database, collection, table_ref, name, identifier, type) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(database)
            .bind(collection)
            .bind(table_ref.to_catalog())
            .bind(&field.name)
            .bind(&field.identifier)
            .bind(field.field_type.to_string())
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        for scalar in scalars {
            sqlx::query(
                "INSERT INTO meta_scalar (database, collection, table_ref, type, identifier) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(database)
            .bind(collection)
            .bind(table_ref.to_catalog())
            .bind(scalar.field_type.to_string())
            .bind(&scalar.identifier)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn create_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        index: &MetaIndex,
        new_doc_part_indexes: &[NewDocPartIndex],
        deferred: bool,
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "INSERT INTO meta_index (database, collection, name, \"unique\") VALUES ($1, $2, $3, $4)",
        )
        .bind(database)
        .bind(collection)
        .bind(&index.name)
        .bind(index.unique)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for (position, field) in index.fields.iter().enumerate() {
            sqlx::query(
                "INSERT INTO meta_index_field \
                 (database, collection, \"index\", position, table_ref, name, ordering) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(database)
            .bind(collection)
            .bind(&index.name)
            .bind(position as i32)
            .bind(field.table_ref.to_catalog())
            .bind(&field.name)
            .bind(field.ordering.to_string())
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        for dp_index in new_doc_part_indexes {
            sqlx::query(
                "INSERT INTO meta_doc_part_index \
                 (database, collection, table_ref, identifier, \"unique\") \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(database)
            .bind(collection)
            .bind(dp_index.table_ref.to_catalog())
            .bind(&dp_index.identifier)
            .bind(dp_index.unique)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

            for (position, (column, ordering)) in dp_index.columns.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO meta_doc_part_index_column \
                     (database, collection, index_identifier, position, table_ref, identifier, ordering) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(database)
                .bind(collection)
                .bind(&dp_index.identifier)
                .bind(position as i32)
                .bind(dp_index.table_ref.to_catalog())
                .bind(column)
                .bind(ordering.to_string())
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
            }

            if !deferred {
                let columns = dp_index
                    .columns
                    .iter()
                    .map(|(column, ordering)| format!("\"{column}\" {ordering}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                sqlx::query(&format!(
                    "CREATE {}INDEX \"{}\" ON {} ({})",
                    if dp_index.unique { "UNIQUE " } else { "" },
                    $repo::index_name(database_identifier, &dp_index.identifier),
                    $repo::table_sql(database_identifier, &dp_index.table_identifier),
                    columns
                ))
                .execute(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;
            }
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn drop_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        name: &str,
        orphaned: &[OrphanedDocPartIndex],
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "DELETE FROM meta_index WHERE database = $1 AND collection = $2 AND name = $3 \
             RETURNING name",
        )
        .bind(database)
        .bind(collection)
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for dp_index in orphaned {
            sqlx::query(
                "DELETE FROM meta_doc_part_index \
                 WHERE database = $1 AND collection = $2 AND identifier = $3",
            )
            .bind(database)
            .bind(collection)
            .bind(&dp_index.identifier)
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

            // IF EXISTS: the physical index is absent when it was deferred by
            // import mode.
            sqlx::query(&format!(
                "DROP INDEX IF EXISTS {}",
                $repo::index_sql(database_identifier, &dp_index.identifier)
            ))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn add_doc_part_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        dp_index: &NewDocPartIndex,
        deferred: bool,
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "INSERT INTO meta_doc_part_index \
             (database, collection, table_ref, identifier, \"unique\") \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(database)
        .bind(collection)
        .bind(dp_index.table_ref.to_catalog())
        .bind(&dp_index.identifier)
        .bind(dp_index.unique)
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for (position, (column, ordering)) in dp_index.columns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO meta_doc_part_index_column \
                 (database, collection, index_identifier, position, table_ref, identifier, ordering) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(database)
            .bind(collection)
            .bind(&dp_index.identifier)
            .bind(position as i32)
            .bind(dp_index.table_ref.to_catalog())
            .bind(column)
            .bind(ordering.to_string())
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        if !deferred {
            let columns = dp_index
                .columns
                .iter()
                .map(|(column, ordering)| format!("\"{column}\" {ordering}"))
                .collect::<Vec<_>>()
                .join(", ");
            sqlx::query(&format!(
                "CREATE {}INDEX \"{}\" ON {} ({})",
                if dp_index.unique { "UNIQUE " } else { "" },
                $repo::index_name(database_identifier, &dp_index.identifier),
                $repo::table_sql(database_identifier, &dp_index.table_identifier),
                columns
            ))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn drop_doc_part_index(
        &self,
        database: &str,
        database_identifier: &str,
        collection: &str,
        orphaned: &OrphanedDocPartIndex,
    ) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        sqlx::query(
            "DELETE FROM meta_doc_part_index \
             WHERE database = $1 AND collection = $2 AND identifier = $3 RETURNING identifier",
        )
        .bind(database)
        .bind(collection)
        .bind(&orphaned.identifier)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        sqlx::query(&format!(
            "DROP INDEX IF EXISTS {}",
            $repo::index_sql(database_identifier, &orphaned.identifier)
        ))
        .execute(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn rename_collection(&self, request: &RenameCollectionRequest) -> Result<(), Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        // The child rows (doc parts, fields, indexes) follow through the
        // ON UPDATE CASCADE on their composite FKs.
        sqlx::query(
            "UPDATE meta_collection SET database = $1, name = $2, identifier = $3 \
             WHERE database = $4 AND name = $5 RETURNING name",
        )
        .bind(&request.to_database)
        .bind(&request.to_collection)
        .bind(&request.to_collection_identifier)
        .bind(&request.from_database)
        .bind(&request.from_collection)
        .fetch_one(&mut *tx)
        .await
        .map_err($repo::interpret_error)?;

        for doc_part in &request.doc_parts {
            sqlx::query(
                "UPDATE meta_doc_part SET identifier = $1 \
                 WHERE database = $2 AND collection = $3 AND table_ref = $4 RETURNING identifier",
            )
            .bind(&doc_part.to_identifier)
            .bind(&request.to_database)
            .bind(&request.to_collection)
            .bind(doc_part.table_ref.to_catalog())
            .fetch_one(&mut *tx)
            .await
            .map_err($repo::interpret_error)?;

            self.rename_physical_table(
                &mut tx,
                &request.from_database_identifier,
                &doc_part.from_identifier,
                &request.to_database_identifier,
                &doc_part.to_identifier,
            )
            .await?;

            for rename in &doc_part.index_renames {
                sqlx::query(
                    "UPDATE meta_doc_part_index SET identifier = $1 \
                     WHERE database = $2 AND collection = $3 AND identifier = $4 RETURNING identifier",
                )
                .bind(&rename.to_identifier)
                .bind(&request.to_database)
                .bind(&request.to_collection)
                .bind(&rename.from_identifier)
                .fetch_one(&mut *tx)
                .await
                .map_err($repo::interpret_error)?;

                self.rename_physical_index(
                    &mut tx,
                    &request.from_database_identifier,
                    &request.to_database_identifier,
                    &doc_part.to_identifier,
                    rename,
                )
                .await?;
            }
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn set_import_mode(&self, database: &str, enabled: bool) -> Result<(), Error> {
        sqlx::query("UPDATE meta_database SET import_mode = $1 WHERE name = $2 RETURNING name")
            .bind(enabled)
            .bind(database)
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn drop_physical_index(
        &self,
        database_identifier: &str,
        index_identifier: &str,
    ) -> Result<(), Error> {
        sqlx::query(&format!(
            "DROP INDEX IF EXISTS {}",
            $repo::index_sql(database_identifier, index_identifier)
        ))
        .execute(&self.executor)
        .await
        .map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn create_physical_index(
        &self,
        database_identifier: &str,
        table_identifier: &str,
        index_identifier: &str,
        unique: bool,
        columns: &[(String, IndexOrdering)],
    ) -> Result<(), Error> {
        let columns = columns
            .iter()
            .map(|(column, ordering)| format!("\"{column}\" {ordering}"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE {}INDEX \"{}\" ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            $repo::index_name(database_identifier, index_identifier),
            $repo::table_sql(database_identifier, table_identifier),
            columns
        ))
        .execute(&self.executor)
        .await
        .map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn consume_rids(
        &self,
        database: &str,
        collection: &str,
        table_ref: &TableRef,
        count: i64,
    ) -> Result<i64, Error> {
        let next_rid: i64 = sqlx::query(
            "UPDATE meta_doc_part SET next_rid = next_rid + $1 \
             WHERE database = $2 AND collection = $3 AND table_ref = $4 RETURNING next_rid",
        )
        .bind(count)
        .bind(database)
        .bind(collection)
        .bind(table_ref.to_catalog())
        .fetch_one(&self.executor)
        .await
        .map_err($repo::interpret_error)?
        .try_get("next_rid")
        .map_err($repo::interpret_error)?;

        Ok(next_rid - count)
    }

    async fn read_metadata(&self) -> Result<MetaSnapshot, Error> {
        let rows = CatalogRows {
            databases: sqlx::query_as(
                "SELECT name, identifier, import_mode FROM meta_database",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            collections: sqlx::query_as(
                "SELECT database, name, identifier FROM meta_collection",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            doc_parts: sqlx::query_as(
                "SELECT database, collection, table_ref, identifier, next_rid FROM meta_doc_part",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            fields: sqlx::query_as(
                "SELECT database, collection, table_ref, name, identifier, type FROM meta_field",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            scalars: sqlx::query_as(
                "SELECT database, collection, table_ref, type, identifier FROM meta_scalar",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            indexes: sqlx::query_as(
                "SELECT database, collection, name, \"unique\" FROM meta_index",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            index_fields: sqlx::query_as(
                "SELECT database, collection, \"index\", position, table_ref, name, ordering \
                 FROM meta_index_field",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            doc_part_indexes: sqlx::query_as(
                "SELECT database, collection, table_ref, identifier, \"unique\" \
                 FROM meta_doc_part_index",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
            doc_part_index_columns: sqlx::query_as(
                "SELECT database, collection, index_identifier, position, table_ref, identifier, ordering \
                 FROM meta_doc_part_index_column",
            )
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?,
        };

        let snapshot =
            $crate::validator::build_snapshot(rows).map_err(Error::CorruptCatalog)?;

        let physical = self.physical_schema(&snapshot).await?;
        let divergences =
            $crate::validator::cross_check(&snapshot, &physical, $repo::introspected_type);
        if !divergences.is_empty() {
            return Err(Error::Divergent(divergences));
        }

        Ok(snapshot)
    }
}
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_index_name_caps_long_identifiers() {
        assert_eq!(internal_index_name("orders"), "orders_did_idx");
        let long = "x".repeat(80);
        let name = internal_index_name(&long);
        assert_eq!(name.len(), 55 + "_did_idx".len());
        assert!(name.ends_with("_did_idx"));
    }
}
