//! Schema-related data models.
//!
//! Declarative table specifications (column mapping plus indices) and the
//! live column metadata they are reconciled against.

use serde::Serialize;

/// SQL column types a table specification can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Real,
    Double,
    Decimal,
    Char,
    Varchar,
    Text,
    Date,
    Time,
    Timestamp,
    Blob,
}

/// Compatibility family of a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeFamily {
    Integer,
    Numeric,
    String,
    Date,
    Binary,
    Other,
}

impl SqlType {
    /// Classify a vendor type name, e.g. `VARCHAR(255)`, `int4`, `double precision`.
    pub fn parse(type_name: &str) -> Option<Self> {
        let lower = type_name.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();
        let base = base.trim_end_matches(" unsigned");

        let ty = match base {
            "tinyint" | "int1" => Self::TinyInt,
            "smallint" | "int2" | "smallserial" => Self::SmallInt,
            "int" | "integer" | "int4" | "mediumint" | "serial" => Self::Integer,
            "bigint" | "int8" | "bigserial" => Self::BigInt,
            "bool" | "boolean" | "bit" => Self::Boolean,
            "real" | "float" | "float4" => Self::Real,
            "double" | "double precision" | "float8" => Self::Double,
            "decimal" | "numeric" => Self::Decimal,
            "char" | "character" | "bpchar" | "nchar" => Self::Char,
            "varchar" | "character varying" | "nvarchar" | "varchar2" => Self::Varchar,
            "text" | "tinytext" | "mediumtext" | "longtext" | "clob" | "string" => Self::Text,
            "date" => Self::Date,
            "time" | "time without time zone" | "time with time zone" | "timetz" => Self::Time,
            "timestamp"
            | "timestamptz"
            | "datetime"
            | "timestamp without time zone"
            | "timestamp with time zone" => Self::Timestamp,
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" | "binary"
            | "varbinary" => Self::Blob,
            _ => return None,
        };
        Some(ty)
    }

    /// Size embedded in a vendor type name, e.g. `255` for `VARCHAR(255)`.
    pub fn parse_size(type_name: &str) -> Option<u32> {
        let open = type_name.find('(')?;
        let close = type_name[open..].find(')')? + open;
        type_name[open + 1..close]
            .split(',')
            .next()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt | Self::Boolean => {
                TypeFamily::Integer
            }
            Self::Real | Self::Double | Self::Decimal => TypeFamily::Numeric,
            Self::Char | Self::Varchar | Self::Text => TypeFamily::String,
            Self::Date | Self::Time | Self::Timestamp => TypeFamily::Date,
            Self::Blob => TypeFamily::Binary,
        }
    }

    /// Whether a declared size is meaningful for this type.
    pub fn is_sized(&self) -> bool {
        matches!(self, Self::Char | Self::Varchar | Self::Decimal)
    }
}

/// Family of an arbitrary vendor type name.
pub fn type_family(type_name: &str) -> TypeFamily {
    SqlType::parse(type_name).map_or(TypeFamily::Other, |t| t.family())
}

/// Declared type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnType {
    pub sql_type: SqlType,
    pub size: Option<u32>,
    /// Auto-increment primary key marker.
    pub primary_key: bool,
}

impl ColumnType {
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            size: None,
            primary_key: false,
        }
    }

    pub fn sized(sql_type: SqlType, size: u32) -> Self {
        Self {
            sql_type,
            size: Some(size),
            primary_key: false,
        }
    }

    /// Auto-increment primary key column.
    pub fn primary_key(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            size: None,
            primary_key: true,
        }
    }

    /// Whether a live column of `live_type` with `live_size` conforms to this declaration.
    ///
    /// Families must agree; sizes are only compared for sized string types when
    /// both sides report one. A size declared on `TEXT` is never rendered, so
    /// it is not compared either.
    pub fn is_compatible(&self, live_type: &str, live_size: Option<u32>) -> bool {
        if type_family(live_type) != self.sql_type.family() {
            return false;
        }
        if self.sql_type.family() != TypeFamily::String || !self.sql_type.is_sized() {
            return true;
        }
        match (self.size, live_size) {
            (Some(declared), Some(live)) => declared == live,
            _ => true,
        }
    }
}

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexColumn {
    pub name: String,
    pub unique: bool,
    /// Prefix length (MySQL only).
    pub length: Option<u32>,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: false,
            length: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }
}

/// Ordered index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub columns: Vec<IndexColumn>,
}

impl IndexSpec {
    pub fn new(columns: Vec<IndexColumn>) -> Self {
        Self { columns }
    }

    /// A single-column, non-unique index.
    pub fn on(column: impl Into<String>) -> Self {
        Self::new(vec![IndexColumn::new(column)])
    }

    pub fn is_unique(&self) -> bool {
        self.columns.iter().any(|c| c.unique)
    }
}

/// Declarative specification of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<(String, ColumnType)>,
    pub indices: Vec<IndexSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Add a column; a later column with the same name replaces the earlier one.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        self.columns.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.columns.push((name, column_type));
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indices.push(index);
        self
    }

    pub fn column_type(&self, name: &str) -> Option<&ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| t)
    }

    /// Name of the primary key column, if any.
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, t)| t.primary_key)
            .map(|(n, _)| n.as_str())
    }

    /// Check the structural rules of the specification itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("table name cannot be empty".to_string());
        }
        if self.columns.is_empty() {
            return Err(format!("table '{}' declares no columns", self.name));
        }
        let keys = self.columns.iter().filter(|(_, t)| t.primary_key).count();
        if keys > 1 {
            return Err(format!(
                "table '{}' declares {} primary key columns, at most one is allowed",
                self.name, keys
            ));
        }
        if let Some((name, _)) = self
            .columns
            .iter()
            .find(|(_, t)| t.primary_key && t.sql_type.family() != TypeFamily::Integer)
        {
            return Err(format!(
                "primary key column '{}' of table '{}' must be an integer type",
                name, self.name
            ));
        }
        for index in &self.indices {
            if index.columns.is_empty() {
                return Err(format!("table '{}' declares an empty index", self.name));
            }
            if let Some(col) = index
                .columns
                .iter()
                .find(|c| self.column_type(&c.name).is_none())
            {
                return Err(format!(
                    "index column '{}' is not a column of table '{}'",
                    col.name, self.name
                ));
            }
        }
        Ok(())
    }
}

/// Column metadata read from the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveColumn {
    pub name: String,
    pub type_name: String,
    pub size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vendor_types() {
        assert_eq!(SqlType::parse("VARCHAR(255)"), Some(SqlType::Varchar));
        assert_eq!(SqlType::parse("int4"), Some(SqlType::Integer));
        assert_eq!(SqlType::parse("double precision"), Some(SqlType::Double));
        assert_eq!(SqlType::parse("character varying"), Some(SqlType::Varchar));
        assert_eq!(SqlType::parse("int(10) unsigned"), Some(SqlType::Integer));
        assert_eq!(SqlType::parse("geometry"), None);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(SqlType::parse_size("VARCHAR(255)"), Some(255));
        assert_eq!(SqlType::parse_size("DECIMAL(10,2)"), Some(10));
        assert_eq!(SqlType::parse_size("TEXT"), None);
    }

    #[test]
    fn test_families() {
        assert_eq!(type_family("bigint"), TypeFamily::Integer);
        assert_eq!(type_family("NUMERIC"), TypeFamily::Numeric);
        assert_eq!(type_family("datetime"), TypeFamily::Date);
        assert_eq!(type_family("clob"), TypeFamily::String);
        assert_eq!(type_family("geometry"), TypeFamily::Other);
    }

    #[test]
    fn test_compatible_across_vendor_names() {
        let declared = ColumnType::sized(SqlType::Varchar, 64);
        assert!(declared.is_compatible("character varying", Some(64)));
        assert!(declared.is_compatible("VARCHAR(64)", Some(64)));
        assert!(!declared.is_compatible("VARCHAR(32)", Some(32)));
        assert!(!declared.is_compatible("integer", None));

        let declared = ColumnType::new(SqlType::Integer);
        assert!(declared.is_compatible("bigint", None));
        assert!(declared.is_compatible("int4", None));
        assert!(!declared.is_compatible("real", None));
    }

    #[test]
    fn test_text_without_size_matches_any_size() {
        let declared = ColumnType::new(SqlType::Text);
        assert!(declared.is_compatible("text", Some(65535)));

        // declared size on TEXT is dropped from the DDL
        let declared = ColumnType::sized(SqlType::Text, 100);
        assert!(declared.is_compatible("TEXT", Some(65535)));
        assert!(declared.is_compatible("text", None));

        let declared = ColumnType::sized(SqlType::Char, 8);
        assert!(!declared.is_compatible("char", Some(16)));
    }

    #[test]
    fn test_validate_rejects_two_primary_keys() {
        let spec = TableSpec::new("t")
            .column("a", ColumnType::primary_key(SqlType::Integer))
            .column("b", ColumnType::primary_key(SqlType::Integer));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_text_primary_key() {
        let spec = TableSpec::new("t").column("a", ColumnType::primary_key(SqlType::Text));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_index_column() {
        let spec = TableSpec::new("t")
            .column("a", ColumnType::new(SqlType::Integer))
            .index(IndexSpec::on("b"));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_column_replaces_same_name() {
        let spec = TableSpec::new("t")
            .column("a", ColumnType::new(SqlType::Integer))
            .column("A", ColumnType::new(SqlType::Text));
        assert_eq!(spec.columns.len(), 1);
        assert_eq!(spec.primary_key(), None);
    }
}
