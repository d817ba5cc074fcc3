//! Identifier allocation: turning logical names and paths into short,
//! backend-legal, collision-free physical identifiers.

use sha2::{Digest, Sha256};

use crate::model::{
    FieldType, IndexOrdering, MetaCollection, MetaDatabase, MetaDocPart, MetaSnapshot,
    TableRef, INTERNAL_COLUMNS,
};

/// The strictest backend limit we target (PostgreSQL's NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Lowercase, `[a-z0-9_]` only, never starting with a digit, never empty.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'a'..='z' | '0'..='9' | '_' => out.push(c),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            _ => out.push('_'),
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn truncate(mut ident: String, max: usize) -> String {
    if ident.len() > max {
        ident.truncate(max);
    }
    ident
}

/// Resolve collisions within the enclosing scope by appending `_2`, `_3`, …
/// to the (possibly truncated) base.
fn allocate(base: &str, in_use: impl Fn(&str) -> bool) -> String {
    let candidate = truncate(base.to_string(), MAX_IDENTIFIER_LEN);
    if !in_use(&candidate) {
        return candidate;
    }
    for n in 2.. {
        let suffix = format!("_{n}");
        let candidate = format!(
            "{}{suffix}",
            truncate(base.to_string(), MAX_IDENTIFIER_LEN - suffix.len())
        );
        if !in_use(&candidate) {
            return candidate;
        }
    }
    unreachable!("collision suffixes are unbounded")
}

pub fn database_identifier(snapshot: &MetaSnapshot, name: &str) -> String {
    allocate(&sanitize(name), |candidate| {
        snapshot.database_by_identifier(candidate).is_some()
    })
}

pub fn collection_identifier(database: &MetaDatabase, name: &str) -> String {
    allocate(&sanitize(name), |candidate| {
        database.collection_by_identifier(candidate).is_some()
    })
}

/// The physical table name for one nesting level: the collection identifier
/// for the root, the collection identifier plus the sanitized path below it.
/// Doc part tables of every collection share one physical namespace per
/// database, so collisions are checked database-wide (collection `a` with a
/// nested part `b` and collection `a_b` both produce the base `a_b`).
pub fn doc_part_identifier(
    database: &MetaDatabase,
    collection: &MetaCollection,
    table_ref: &TableRef,
) -> String {
    let base = if table_ref.is_root() {
        collection.identifier.clone()
    } else {
        let mut base = collection.identifier.clone();
        for segment in table_ref.segments() {
            base.push('_');
            base.push_str(&sanitize(segment));
        }
        base
    };
    allocate(&base, |candidate| {
        collection.doc_part_by_identifier(candidate).is_some()
            || database
                .collections
                .values()
                .any(|col| col.doc_part_by_identifier(candidate).is_some())
    })
}

/// Column name for a field: sanitized key name plus a one-letter type suffix
/// so polymorphic keys land in distinct columns. Internal column names are
/// reserved.
pub fn field_identifier(
    doc_part: &MetaDocPart,
    name: &str,
    field_type: FieldType,
) -> String {
    let base = format!("{}_{}", sanitize(name), field_type.identifier_suffix());
    allocate(&base, |candidate| {
        INTERNAL_COLUMNS.contains(&candidate)
            || doc_part.column_identifiers().any(|id| id == candidate)
    })
}

/// Column name for a directly-stored array element, keyed by type only.
pub fn scalar_identifier(doc_part: &MetaDocPart, field_type: FieldType) -> String {
    let base = format!("v_{}", field_type.identifier_suffix());
    allocate(&base, |candidate| {
        INTERNAL_COLUMNS.contains(&candidate)
            || doc_part.column_identifiers().any(|id| id == candidate)
    })
}

/// Deterministic physical index name: two index definitions with identical
/// physical shape on the same table always resolve to the same identifier.
/// Uniqueness is part of the shape, so a unique and a non-unique index over
/// the same columns get distinct names.
pub fn doc_part_index_identifier(
    table_identifier: &str,
    unique: bool,
    columns: &[(String, IndexOrdering)],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(table_identifier.as_bytes());
    hasher.update([unique as u8]);
    for (identifier, ordering) in columns {
        hasher.update([0]);
        hasher.update(identifier.as_bytes());
        hasher.update([0]);
        hasher.update(ordering.as_ref().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("idx_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetaField;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Orders"), "orders");
        assert_eq!(sanitize("weird key!"), "weird_key_");
        assert_eq!(sanitize("1st"), "_1st");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_database_identifier_collision() {
        let mut snapshot = MetaSnapshot::default();
        snapshot.databases.insert(
            "Shop".to_string(),
            MetaDatabase::new("Shop".to_string(), "shop".to_string()),
        );

        // A different logical name sanitizing to the same identifier gets a
        // collision suffix.
        assert_eq!(database_identifier(&snapshot, "shop"), "shop_2");
        assert_eq!(database_identifier(&snapshot, "stock"), "stock");
    }

    #[test]
    fn test_truncation_leaves_room_for_suffix() {
        let long = "x".repeat(80);
        let mut snapshot = MetaSnapshot::default();
        let first = database_identifier(&snapshot, &long);
        assert_eq!(first.len(), MAX_IDENTIFIER_LEN);

        snapshot.databases.insert(
            long.clone(),
            MetaDatabase::new(long.clone(), first.clone()),
        );
        let second = database_identifier(&snapshot, &long);
        assert_ne!(second, first);
        assert!(second.len() <= MAX_IDENTIFIER_LEN);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn test_doc_part_identifier_paths() {
        let database = MetaDatabase::new("shop".to_string(), "shop".to_string());
        let collection = MetaCollection::new("orders".to_string(), "orders".to_string());
        assert_eq!(
            doc_part_identifier(&database, &collection, &TableRef::root()),
            "orders"
        );
        assert_eq!(
            doc_part_identifier(
                &database,
                &collection,
                &TableRef::from_segments(["lines", "$"])
            ),
            "orders_lines__"
        );
    }

    #[test]
    fn test_doc_part_identifier_collides_across_collections() {
        // Collection "a" with nested part ["b"] and collection "a_b" both
        // want the physical table "a_b".
        let mut database = MetaDatabase::new("shop".to_string(), "shop".to_string());
        let mut other = MetaCollection::new("a_b".to_string(), "a_b".to_string());
        other.doc_parts.insert(
            TableRef::root(),
            MetaDocPart::new(TableRef::root(), "a_b".to_string()),
        );
        database.collections.insert("a_b".to_string(), other);

        let collection = MetaCollection::new("a".to_string(), "a".to_string());
        assert_eq!(
            doc_part_identifier(
                &database,
                &collection,
                &TableRef::from_segments(["b"])
            ),
            "a_b_2"
        );
    }

    #[test]
    fn test_field_identifier_reserves_internal_columns() {
        let mut doc_part = MetaDocPart::new(TableRef::root(), "orders".to_string());
        assert_eq!(
            field_identifier(&doc_part, "qty", FieldType::Integer),
            "qty_i"
        );

        doc_part.fields.insert(
            ("qty".to_string(), FieldType::Integer),
            MetaField {
                name: "qty".to_string(),
                identifier: "qty_i".to_string(),
                field_type: FieldType::Integer,
            },
        );
        // Same sanitized base from another logical name collides with the
        // existing column.
        assert_eq!(
            field_identifier(&doc_part, "QTY", FieldType::Integer),
            "qty_i_2"
        );
        // The type suffix keeps field columns clear of the internal names.
        assert_eq!(field_identifier(&doc_part, "did", FieldType::Double), "did_d");
    }

    #[test]
    fn test_index_identifier_deterministic() {
        let columns = vec![
            ("qty_i".to_string(), IndexOrdering::Asc),
            ("item_s".to_string(), IndexOrdering::Desc),
        ];
        let a = doc_part_index_identifier("orders", false, &columns);
        let b = doc_part_index_identifier("orders", false, &columns);
        assert_eq!(a, b);
        assert!(a.starts_with("idx_"));
        assert_eq!(a.len(), 4 + 16);

        let other_table = doc_part_index_identifier("orders_lines", false, &columns);
        assert_ne!(a, other_table);

        // A unique index over the same columns is a distinct physical index.
        assert_ne!(a, doc_part_index_identifier("orders", true, &columns));

        let reversed = vec![
            ("item_s".to_string(), IndexOrdering::Desc),
            ("qty_i".to_string(), IndexOrdering::Asc),
        ];
        assert_ne!(a, doc_part_index_identifier("orders", false, &reversed));
    }
}
