//! Per-database SQL rendering for DDL and maintenance statements.

use crate::models::{ColumnType, DatabaseType, IndexSpec, SqlType, TableSpec};

/// Vendor type name for a declared column type (primary keys excluded).
pub fn column_type_sql(db: DatabaseType, column: &ColumnType) -> String {
    let size = column.size;
    match column.sql_type {
        SqlType::TinyInt => match db {
            DatabaseType::PostgreSQL => "SMALLINT".to_string(),
            _ => "TINYINT".to_string(),
        },
        SqlType::SmallInt => "SMALLINT".to_string(),
        SqlType::Integer => match db {
            DatabaseType::MySQL => "INT".to_string(),
            _ => "INTEGER".to_string(),
        },
        SqlType::BigInt => "BIGINT".to_string(),
        SqlType::Boolean => "BOOLEAN".to_string(),
        SqlType::Real => match db {
            DatabaseType::MySQL => "FLOAT".to_string(),
            _ => "REAL".to_string(),
        },
        SqlType::Double => match db {
            DatabaseType::PostgreSQL => "DOUBLE PRECISION".to_string(),
            _ => "DOUBLE".to_string(),
        },
        SqlType::Decimal => match size {
            Some(precision) => format!("DECIMAL({})", precision),
            None => "DECIMAL".to_string(),
        },
        SqlType::Char => format!("CHAR({})", size.unwrap_or(1)),
        SqlType::Varchar => format!("VARCHAR({})", size.unwrap_or(255)),
        SqlType::Text => "TEXT".to_string(),
        SqlType::Date => "DATE".to_string(),
        SqlType::Time => "TIME".to_string(),
        SqlType::Timestamp => match db {
            DatabaseType::PostgreSQL => "TIMESTAMP".to_string(),
            _ => "DATETIME".to_string(),
        },
        SqlType::Blob => match db {
            DatabaseType::PostgreSQL => "BYTEA".to_string(),
            DatabaseType::MySQL => "LONGBLOB".to_string(),
            DatabaseType::SQLite => "BLOB".to_string(),
        },
    }
}

/// Column definition of an auto-increment primary key.
fn primary_key_sql(db: DatabaseType, name: &str, column: &ColumnType) -> String {
    let big = column.sql_type == SqlType::BigInt;
    match db {
        DatabaseType::SQLite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
        DatabaseType::MySQL => format!(
            "{} {} NOT NULL AUTO_INCREMENT",
            name,
            if big { "BIGINT" } else { "INT" }
        ),
        DatabaseType::PostgreSQL => {
            format!("{} {}", name, if big { "BIGSERIAL" } else { "SERIAL" })
        }
    }
}

/// `CREATE TABLE` for a specification, columns in declared order.
pub fn create_table_sql(db: DatabaseType, spec: &TableSpec) -> String {
    let mut parts: Vec<String> = spec
        .columns
        .iter()
        .map(|(name, column)| {
            if column.primary_key {
                primary_key_sql(db, name, column)
            } else {
                format!("{} {}", name, column_type_sql(db, column))
            }
        })
        .collect();

    // SQLite declares the key inline
    if db != DatabaseType::SQLite {
        if let Some(key) = spec.primary_key() {
            parts.push(format!("PRIMARY KEY ({})", key));
        }
    }

    format!("CREATE TABLE {} ({})", spec.name, parts.join(", "))
}

/// `CREATE [UNIQUE] INDEX` for the `n`th index of a table.
pub fn create_index_sql(db: DatabaseType, table: &str, n: usize, index: &IndexSpec) -> String {
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| match (db, c.length) {
            (DatabaseType::MySQL, Some(length)) => format!("{}({})", c.name, length),
            _ => c.name.clone(),
        })
        .collect();
    format!(
        "CREATE {}INDEX {}_idx{} ON {} ({})",
        if index.is_unique() { "UNIQUE " } else { "" },
        table,
        n,
        table,
        columns.join(", ")
    )
}

/// `ALTER TABLE ... ADD COLUMN` for a missing column.
pub fn add_column_sql(db: DatabaseType, table: &str, name: &str, column: &ColumnType) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table,
        name,
        column_type_sql(db, column)
    )
}

/// Statement removing all rows of a table.
pub fn truncate_sql(db: DatabaseType, table: &str) -> String {
    match db {
        DatabaseType::SQLite => format!("DELETE FROM {}", table),
        _ => format!("TRUNCATE TABLE {}", table),
    }
}

/// `SELECT [DISTINCT] columns FROM tables [WHERE condition]`.
pub fn select_sql(distinct: bool, columns: &str, tables: &str, condition: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT {}{} FROM {}",
        if distinct { "DISTINCT " } else { "" },
        columns,
        tables
    );
    if let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) {
        let upper = condition.to_uppercase();
        if upper.starts_with("LIMIT") || upper.starts_with("ORDER") {
            sql.push(' ');
        } else {
            sql.push_str(" WHERE ");
        }
        sql.push_str(condition);
    }
    sql
}
