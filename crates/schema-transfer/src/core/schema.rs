//! Schema object and dependency edge types.
//!
//! These types are the engine-neutral form every metadata collaborator emits.
//! They are immutable once loaded from a snapshot; the graph layers annotate
//! around them rather than mutating them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema-level object.
///
/// Variant order is the creation precedence used for deterministic in-level
/// ordering: sequences before the tables that default from them, tables
/// before views, indexes and procedural objects last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Sequence,
    Table,
    View,
    Index,
    Procedure,
    Trigger,
}

impl ObjectKind {
    /// Short lowercase name, as used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Sequence => "sequence",
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Trigger => "trigger",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object identity: (schema, name, kind).
///
/// Two objects with the same schema and name but different kinds (a table and
/// an index, say) are distinct. Ordering is lexicographic on
/// (schema, name, kind) and is used for deterministic tie-breaks.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId {
    pub schema: String,
    pub name: String,
    pub kind: ObjectKind,
}

impl ObjectId {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
        }
    }

    /// Get the fully qualified name without the kind.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.schema, self.name, self.kind)
    }
}

/// Column definition for tables and views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Engine-neutral data type string.
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Default value expression, if any.
    #[serde(default)]
    pub default: Option<String>,

    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default: None,
            primary_key: false,
        }
    }
}

/// Trigger firing timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

/// Trigger firing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

/// Kind-specific attributes of a schema object.
///
/// The variant determines the object kind, so an object can never carry
/// attributes inconsistent with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectAttrs {
    Table {
        columns: Vec<Column>,
        /// Primary key column names, in key order.
        primary_key: Vec<String>,
        /// Approximate row count from the source catalog.
        row_count: i64,
    },
    View {
        definition: String,
        columns: Vec<Column>,
    },
    Sequence {
        start: i64,
        increment: i64,
        min_value: Option<i64>,
        max_value: Option<i64>,
        cycle: bool,
    },
    Procedure {
        definition: String,
        /// Parameter names with their data types.
        parameters: Vec<(String, String)>,
        language: String,
    },
    Trigger {
        /// Name of the table the trigger fires on.
        table: String,
        timing: TriggerTiming,
        event: TriggerEvent,
    },
    Index {
        /// Name of the indexed table.
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
}

impl ObjectAttrs {
    /// The object kind implied by these attributes.
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectAttrs::Table { .. } => ObjectKind::Table,
            ObjectAttrs::View { .. } => ObjectKind::View,
            ObjectAttrs::Sequence { .. } => ObjectKind::Sequence,
            ObjectAttrs::Procedure { .. } => ObjectKind::Procedure,
            ObjectAttrs::Trigger { .. } => ObjectKind::Trigger,
            ObjectAttrs::Index { .. } => ObjectKind::Index,
        }
    }
}

/// A schema-level object as delivered by the metadata collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaObject {
    /// Schema the object lives in.
    pub schema: String,

    /// Object name within the schema.
    pub name: String,

    /// Kind-specific attributes.
    #[serde(flatten)]
    pub attrs: ObjectAttrs,
}

impl SchemaObject {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        attrs: ObjectAttrs,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            attrs,
        }
    }

    /// The object's identity.
    pub fn id(&self) -> ObjectId {
        ObjectId {
            schema: self.schema.clone(),
            name: self.name.clone(),
            kind: self.attrs.kind(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.attrs.kind()
    }

    /// Whether this object carries row data to move.
    pub fn has_data(&self) -> bool {
        self.kind() == ObjectKind::Table
    }

    /// Source row count for tables, 0 for everything else.
    pub fn row_count(&self) -> i64 {
        match &self.attrs {
            ObjectAttrs::Table { row_count, .. } => *row_count,
            _ => 0,
        }
    }

    /// Look up a table/view column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        match &self.attrs {
            ObjectAttrs::Table { columns, .. } | ObjectAttrs::View { columns, .. } => {
                columns.iter().find(|c| c.name == name)
            }
            _ => None,
        }
    }
}

/// Kind of dependency between two objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Referential constraint; the only kind that may be breakable.
    ForeignKey,
    /// A view selects from a table or another view.
    ViewReference,
    /// A procedure body references another object.
    ProcedureReference,
    /// A trigger fires on (or references) another object.
    TriggerReference,
    /// A column default draws from a sequence.
    SequenceDefault,
}

/// A directed "must exist before" relationship.
///
/// `from` must exist before `to` is created or populated. For foreign keys,
/// `to` is the referencing table and `from` the referenced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: ObjectId,
    pub to: ObjectId,
    pub kind: EdgeKind,

    /// True only for foreign-key edges whose referencing column set is
    /// nullable, which allows the row data to be deferred and fixed up later.
    #[serde(default)]
    pub breakable: bool,

    /// Referencing column names on `to` (foreign-key edges only). Needed to
    /// build the second-pass update when the edge is suspended.
    #[serde(default)]
    pub columns: Vec<String>,
}

impl DependencyEdge {
    pub fn new(from: ObjectId, to: ObjectId, kind: EdgeKind) -> Self {
        Self {
            from,
            to,
            kind,
            breakable: false,
            columns: Vec::new(),
        }
    }

    /// Mark a foreign-key edge as breakable, recording its referencing columns.
    pub fn breakable(mut self, columns: Vec<String>) -> Self {
        self.breakable = true;
        self.columns = columns;
        self
    }

    /// Attach referencing columns without marking the edge breakable.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Input contract from the metadata collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub objects: Vec<SchemaObject>,
    pub edges: Vec<DependencyEdge>,
}
