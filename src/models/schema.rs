//! Schema-related data models.
//!
//! These are the normalized, connection-independent records produced by
//! schema reflection. They carry native type names only; semantic types are
//! resolved later by the type registry.

use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "view" => Self::View,
            _ => Self::Table,
        }
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
        }
    }
}

/// One column as reported by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    /// Formatted type name, e.g. `character varying` (`USER-DEFINED` for composites)
    pub data_type: String,
    /// Underlying type name, e.g. `varchar`, or the composite type's name
    pub udt_name: String,
    /// 1-based position within the table
    pub ordinal_position: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    pub nullable: bool,
    pub updatable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    pub is_primary_key: bool,
}

impl CatalogColumn {
    /// Create a new nullable, updatable column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: i32) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            udt_name: data_type.clone(),
            data_type,
            ordinal_position,
            default_expression: None,
            nullable: true,
            updatable: true,
            max_length: None,
            is_primary_key: false,
        }
    }

    pub fn with_udt_name(mut self, udt_name: impl Into<String>) -> Self {
        self.udt_name = udt_name.into();
        self
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_expression = Some(expression.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }
}

/// Forward foreign-key edge: `column` of the owning table references
/// `referenced_table.referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKeyEdge {
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Reverse edge: `referencing_table.referencing_column` points at
/// `target_column` of the owning table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEdge {
    pub referencing_table: String,
    pub referencing_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub table_type: TableType,
    pub columns: Vec<CatalogColumn>,
    pub foreign_keys: Vec<ForeignKeyEdge>,
    pub referenced_by: Vec<ReverseEdge>,
}

impl TableDescription {
    /// Create a new table description.
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            table_type,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            referenced_by: Vec::new(),
        }
    }

    /// Add a column definition.
    pub fn with_column(mut self, column: CatalogColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_foreign_key(mut self, edge: ForeignKeyEdge) -> Self {
        self.foreign_keys.push(edge);
        self
    }

    /// Primary-key column names in ordinal order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeAttribute {
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeTypeDescription {
    pub name: String,
    pub attributes: Vec<CompositeAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Function,
    Procedure,
}

impl RoutineKind {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("procedure") {
            Self::Procedure
        } else {
            Self::Function
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineParam {
    /// Unnamed parameters can only be passed positionally
    pub name: Option<String>,
    pub data_type: String,
    pub udt_name: String,
}

/// How a routine's result is handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// No value
    Void,
    /// Rows of records (table-returning routines, INOUT/OUT parameters)
    Records,
    /// A bare scalar
    Scalar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineDescription {
    pub name: String,
    pub kind: RoutineKind,
    pub in_params: Vec<RoutineParam>,
    pub out_params: Vec<RoutineParam>,
    /// Declared return type name; `None` for procedures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl RoutineDescription {
    /// Classify the declared return.
    pub fn return_kind(&self) -> ReturnKind {
        if !self.out_params.is_empty() {
            return ReturnKind::Records;
        }
        match self.return_type.as_deref() {
            None => ReturnKind::Void,
            Some(t) if t.eq_ignore_ascii_case("void") => ReturnKind::Void,
            Some(t) if t.eq_ignore_ascii_case("record") => ReturnKind::Records,
            Some(_) => ReturnKind::Scalar,
        }
    }
}

/// Everything reflected from one catalog schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub backend: DatabaseType,
    pub schema: String,
    pub tables: Vec<TableDescription>,
    pub composites: Vec<CompositeTypeDescription>,
    pub routines: Vec<RoutineDescription>,
}

impl SchemaDescription {
    pub fn new(backend: DatabaseType, schema: impl Into<String>) -> Self {
        Self {
            backend,
            schema: schema.into(),
            tables: Vec::new(),
            composites: Vec::new(),
            routines: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDescription> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Fill every table's `referenced_by` list from the forward edges of all
    /// tables. Existing reverse edges are replaced.
    pub fn link_reverse_edges(&mut self) {
        let edges: Vec<(String, ForeignKeyEdge)> = self
            .tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter().map(|fk| (t.name.clone(), fk.clone())))
            .collect();
        for table in &mut self.tables {
            table.referenced_by = edges
                .iter()
                .filter(|(_, fk)| fk.referenced_table == table.name)
                .map(|(owner, fk)| ReverseEdge {
                    referencing_table: owner.clone(),
                    referencing_column: fk.column.clone(),
                    target_column: fk.referenced_column.clone(),
                })
                .collect();
        }
    }
}
