use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub mod overlay;

/// Names of the backend-internal columns every doc part table carries. These
/// never appear in the metadata catalog and are excluded from validation.
pub const INTERNAL_COLUMNS: [&str; 4] = ["did", "rid", "pid", "seq"];

/// The table_ref segment used for arrays nested directly inside arrays
/// (they have no object key of their own).
pub const ARRAY_DIMENSION_SEGMENT: &str = "$";

/// The closed set of column value kinds. The last few are compatibility kinds
/// carried for wire formats that predate the current type system.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    Date,
    Time,
    Instant,
    Binary,
    Decimal128,
    Null,
    /// Marker column recording whether a key holds a subdocument (true) or an
    /// array (false) in a given row.
    Child,
    ObjectId,
    DbTimestamp,
    Javascript,
    Regex,
    MinKey,
    MaxKey,
}

impl FieldType {
    /// Short suffix distinguishing polymorphic columns that share a key name.
    pub fn identifier_suffix(&self) -> &'static str {
        match self {
            FieldType::String => "s",
            FieldType::Integer => "i",
            FieldType::Long => "l",
            FieldType::Double => "d",
            FieldType::Boolean => "b",
            FieldType::Date => "c",
            FieldType::Time => "t",
            FieldType::Instant => "g",
            FieldType::Binary => "r",
            FieldType::Decimal128 => "q",
            FieldType::Null => "n",
            FieldType::Child => "e",
            FieldType::ObjectId => "x",
            FieldType::DbTimestamp => "y",
            FieldType::Javascript => "j",
            FieldType::Regex => "p",
            FieldType::MinKey => "m",
            FieldType::MaxKey => "k",
        }
    }
}

/// Path of object/array keys from the document root identifying one nesting
/// level. The empty path is the root. Ordered so that parents sort before
/// their children, which lets callers create tables parents-first by plain
/// iteration order.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TableRef(Vec<String>);

impl TableRef {
    pub const ROOT: TableRef = TableRef(Vec::new());

    pub fn root() -> Self {
        TableRef(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableRef(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut path = self.0.clone();
        path.push(segment.to_string());
        TableRef(path)
    }

    /// The parent path; `None` only for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(TableRef(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Canonical catalog representation (a JSON array of segments, so that
    /// segments containing dots round-trip).
    pub fn to_catalog(&self) -> String {
        serde_json::to_string(&self.0).expect("string vectors always serialize")
    }

    pub fn from_catalog(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(TableRef(serde_json::from_str(raw)?))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", self.0.join("."))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum IndexOrdering {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaField {
    pub name: String,
    pub identifier: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaScalar {
    pub identifier: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaIndexField {
    pub table_ref: TableRef,
    pub name: String,
    pub ordering: IndexOrdering,
}

/// A user-declared (logical) index; may span several doc parts when its key
/// paths cross nesting levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaIndex {
    pub name: String,
    pub unique: bool,
    pub fields: Vec<MetaIndexField>,
}

/// A physical single-table index backing one or more logical indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaDocPartIndex {
    pub identifier: String,
    pub unique: bool,
    /// Ordered (column identifier, ordering) pairs.
    pub columns: Vec<(String, IndexOrdering)>,
}

impl MetaDocPartIndex {
    /// Two doc part indexes are interchangeable when uniqueness and the
    /// ordered column list agree.
    pub fn same_shape(&self, unique: bool, columns: &[(String, IndexOrdering)]) -> bool {
        self.unique == unique && self.columns == columns
    }
}

/// The table for one nesting level of the documents of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDocPart {
    pub table_ref: TableRef,
    pub identifier: String,
    /// Row-id generator state: the next rid this doc part will hand out.
    pub next_rid: i64,
    pub fields: BTreeMap<(String, FieldType), MetaField>,
    pub scalars: BTreeMap<FieldType, MetaScalar>,
    pub indexes: Vec<MetaDocPartIndex>,
}

impl MetaDocPart {
    pub fn new(table_ref: TableRef, identifier: String) -> Self {
        MetaDocPart {
            table_ref,
            identifier,
            next_rid: 0,
            fields: BTreeMap::new(),
            scalars: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    pub fn field(&self, name: &str, field_type: FieldType) -> Option<&MetaField> {
        self.fields.get(&(name.to_string(), field_type))
    }

    /// All typed columns sharing a key name, in type order.
    pub fn fields_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a MetaField> {
        self.fields
            .values()
            .filter(move |field| field.name == name)
    }

    pub fn scalar(&self, field_type: FieldType) -> Option<&MetaScalar> {
        self.scalars.get(&field_type)
    }

    /// Column identifiers in use on this doc part (fields and scalars).
    pub fn column_identifiers(&self) -> impl Iterator<Item = &str> {
        self.fields
            .values()
            .map(|f| f.identifier.as_str())
            .chain(self.scalars.values().map(|s| s.identifier.as_str()))
    }

    pub fn doc_part_index(&self, identifier: &str) -> Option<&MetaDocPartIndex> {
        self.indexes.iter().find(|i| i.identifier == identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaCollection {
    pub name: String,
    pub identifier: String,
    pub doc_parts: BTreeMap<TableRef, MetaDocPart>,
    pub indexes: BTreeMap<String, MetaIndex>,
}

impl MetaCollection {
    pub fn new(name: String, identifier: String) -> Self {
        MetaCollection {
            name,
            identifier,
            ..Default::default()
        }
    }

    pub fn doc_part(&self, table_ref: &TableRef) -> Option<&MetaDocPart> {
        self.doc_parts.get(table_ref)
    }

    pub fn doc_part_by_identifier(&self, identifier: &str) -> Option<&MetaDocPart> {
        self.doc_parts.values().find(|dp| dp.identifier == identifier)
    }

    /// Whether any logical index other than `except` needs a doc part index
    /// of exactly this shape on this doc part.
    pub fn doc_part_index_required(
        &self,
        doc_part: &MetaDocPart,
        dp_index: &MetaDocPartIndex,
        except: &str,
    ) -> bool {
        self.indexes
            .values()
            .filter(|index| index.name != except)
            .any(|index| {
                derive_doc_part_columns(index, doc_part)
                    .is_some_and(|cols| dp_index.same_shape(index.unique, &cols))
            })
    }
}

/// The ordered column list a logical index requires on one doc part, or
/// `None` when the index has no resolvable fields there.
pub fn derive_doc_part_columns(
    index: &MetaIndex,
    doc_part: &MetaDocPart,
) -> Option<Vec<(String, IndexOrdering)>> {
    let mut columns = Vec::new();
    for index_field in &index.fields {
        if index_field.table_ref != doc_part.table_ref {
            continue;
        }
        for field in doc_part.fields_by_name(&index_field.name) {
            columns.push((field.identifier.clone(), index_field.ordering));
        }
    }
    if columns.is_empty() {
        None
    } else {
        Some(columns)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaDatabase {
    pub name: String,
    pub identifier: String,
    pub import_mode: bool,
    pub collections: BTreeMap<String, MetaCollection>,
}

impl MetaDatabase {
    pub fn new(name: String, identifier: String) -> Self {
        MetaDatabase {
            name,
            identifier,
            ..Default::default()
        }
    }

    pub fn collection(&self, name: &str) -> Option<&MetaCollection> {
        self.collections.get(name)
    }

    pub fn collection_by_identifier(&self, identifier: &str) -> Option<&MetaCollection> {
        self.collections.values().find(|c| c.identifier == identifier)
    }
}

/// An immutable, versioned view of all schema metadata. Superseded, never
/// mutated: readers hold an `Arc` to the snapshot current at the time of
/// their request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaSnapshot {
    pub databases: BTreeMap<String, MetaDatabase>,
}

impl MetaSnapshot {
    pub fn database(&self, name: &str) -> Option<&MetaDatabase> {
        self.databases.get(name)
    }

    pub fn database_by_identifier(&self, identifier: &str) -> Option<&MetaDatabase> {
        self.databases.values().find(|d| d.identifier == identifier)
    }

    pub fn collection(&self, database: &str, collection: &str) -> Option<&MetaCollection> {
        self.database(database)?.collection(collection)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }
}
