//! Request and response model
//!
//! These are transient, per-request structures built from live catalog and
//! result-set data. Nothing here is cached between calls.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Modifier key carrying a record's declared type
pub const EXTRA_TYPE: &str = "Type";
/// Modifier key marking a field as part of the primary key
pub const EXTRA_PRIMARY: &str = "Primary";
/// Modifier key marking a field as nullable
pub const EXTRA_NULLABLE: &str = "Nullable";
/// Modifier key marking a record's value as NULL
pub const EXTRA_IS_NULL: &str = "IsNull";

/// A column/value pair with side-channel modifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Record {
    /// Create a record with no modifiers
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            extra: HashMap::new(),
        }
    }

    /// Attach a modifier
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Declared type, if any
    pub fn declared_type(&self) -> Option<&str> {
        self.extra
            .get(EXTRA_TYPE)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Read a modifier as a boolean (`true`, `1`, `yes`, any case)
    pub fn extra_flag(&self, key: &str) -> bool {
        self.extra
            .get(key)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    /// Whether the value is an explicit NULL
    pub fn is_null(&self) -> bool {
        self.extra.get(EXTRA_IS_NULL).map(String::as_str) == Some("true")
    }
}

/// A table, view, collection or key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub name: String,
    /// Ordered summary facts such as type, size and row count
    pub attributes: Vec<Record>,
}

impl StorageUnit {
    /// Look up an attribute by key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.value.as_str())
    }
}

/// An introspected column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Canonical uppercase type, parameters only where meaningful
    pub type_name: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_primary: bool,
    pub is_foreign_key: bool,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
    pub is_auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }
}

/// A single column/operator/value comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicCondition {
    pub key: String,
    pub operator: String,
    pub value: String,
    /// Type the caller believes the column has; the live catalog wins when known
    pub column_type: String,
}

impl AtomicCondition {
    pub fn new(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
            column_type: column_type.into(),
        }
    }
}

/// Recursive filter tree. Empty `And`/`Or` nodes match everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereCondition {
    Atomic(AtomicCondition),
    And(Vec<WhereCondition>),
    Or(Vec<WhereCondition>),
}

impl WhereCondition {
    /// Shorthand for an atomic leaf
    pub fn atomic(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        WhereCondition::Atomic(AtomicCondition::new(key, operator, value, column_type))
    }

    /// Whether the tree filters nothing.
    ///
    /// An `Or` with any unconstrained branch matches every row.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            WhereCondition::Atomic(_) => false,
            WhereCondition::And(children) => children.iter().all(WhereCondition::is_unconstrained),
            WhereCondition::Or(children) => {
                children.is_empty() || children.iter().any(WhereCondition::is_unconstrained)
            }
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// One ORDER BY term; lists apply in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCondition {
    pub column: String,
    pub direction: SortDirection,
}

impl SortCondition {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A page of rows rendered to display strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetRowsResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
    /// Omitted when the count query failed
    pub total_count: Option<u64>,
    /// Set when rows cannot be edited in place (for example Redis sets)
    pub disable_update: bool,
}

/// How two storage units relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    Unknown,
}

impl RelationshipType {
    /// Parse the relation label emitted by catalog graph queries
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "OneToOne" => RelationshipType::OneToOne,
            "OneToMany" => RelationshipType::OneToMany,
            "ManyToOne" => RelationshipType::ManyToOne,
            "ManyToMany" => RelationshipType::ManyToMany,
            _ => RelationshipType::Unknown,
        }
    }
}

/// Edge from one storage unit to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUnitRelationship {
    pub name: String,
    pub relationship_type: RelationshipType,
}

/// A storage unit with its outgoing relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUnit {
    pub unit: StorageUnit,
    pub relations: Vec<GraphUnitRelationship>,
}

/// A column referencing another table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRelationship {
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Constraint facts for one column.
///
/// Every field is optional; a fact the dialect cannot report is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnConstraints {
    pub nullable: Option<bool>,
    pub unique: Option<bool>,
    pub primary: Option<bool>,
    pub auto_increment: Option<bool>,
    pub type_name: Option<String>,
    pub default: Option<String>,
    pub comment: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub check_min: Option<f64>,
    pub check_max: Option<f64>,
    pub check_values: Option<Vec<String>>,
}

impl ColumnConstraints {
    /// Whether no fact is known
    pub fn is_empty(&self) -> bool {
        *self == ColumnConstraints::default()
    }
}

/// Column definition for CREATE TABLE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
    pub primary: bool,
    pub nullable: bool,
}

/// Import behaviour for existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImportMode {
    #[default]
    Append,
    /// Clear the table before importing
    Overwrite,
}

/// Options for streamed imports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// Skip rows that fail instead of aborting
    pub skip_errors: bool,
}

/// Outcome of a streamed import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: u64,
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_modifiers() {
        let r = Record::new("id", "1")
            .with_extra(EXTRA_TYPE, "INTEGER")
            .with_extra(EXTRA_PRIMARY, "TRUE");
        assert_eq!(r.declared_type(), Some("INTEGER"));
        assert!(r.extra_flag(EXTRA_PRIMARY));
        assert!(!r.extra_flag(EXTRA_NULLABLE));
        assert!(!r.is_null());

        let r = Record::new("name", "").with_extra(EXTRA_IS_NULL, "true");
        assert!(r.is_null());
    }

    #[test]
    fn test_where_unconstrained() {
        assert!(WhereCondition::And(vec![]).is_unconstrained());
        assert!(WhereCondition::Or(vec![WhereCondition::And(vec![])]).is_unconstrained());
        assert!(!WhereCondition::atomic("a", "=", "1", "INTEGER").is_unconstrained());
        assert!(WhereCondition::Or(vec![
            WhereCondition::atomic("a", "=", "1", "INTEGER"),
            WhereCondition::And(vec![]),
        ])
        .is_unconstrained());
        assert!(!WhereCondition::And(vec![
            WhereCondition::atomic("a", "=", "1", "INTEGER"),
            WhereCondition::Or(vec![]),
        ])
        .is_unconstrained());
    }

    #[test]
    fn test_relationship_labels() {
        assert_eq!(
            RelationshipType::from_label("OneToMany"),
            RelationshipType::OneToMany
        );
        assert_eq!(
            RelationshipType::from_label("sideways"),
            RelationshipType::Unknown
        );
    }

    #[test]
    fn test_storage_unit_attribute_lookup() {
        let unit = StorageUnit {
            name: "users".into(),
            attributes: vec![Record::new("Type", "table"), Record::new("Count", "3")],
        };
        assert_eq!(unit.attribute("Count"), Some("3"));
        assert_eq!(unit.attribute("Size"), None);
    }
}
