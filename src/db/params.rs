//! Positional parameter binding for prepared statements.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Generates a binder that attaches every parameter in order.
///
/// NULL is bound as a nullable text value; all three backends coerce it to
/// the column type.
macro_rules! binder {
    ($name:ident, $lt:lifetime, $db:ty, $args:ty) => {
        pub(crate) fn $name<$lt>(
            mut query: Query<$lt, $db, $args>,
            params: &$lt [QueryParam],
        ) -> Query<$lt, $db, $args> {
            for param in params {
                query = match param {
                    QueryParam::Null => query.bind(Option::<&str>::None),
                    QueryParam::Bool(v) => query.bind(*v),
                    QueryParam::Int(v) => query.bind(*v),
                    QueryParam::Float(v) => query.bind(*v),
                    QueryParam::String(v) => query.bind(v.as_str()),
                    QueryParam::Bytes(v) => query.bind(v.as_slice()),
                };
            }
            query
        }
    };
}

binder!(bind_mysql, 'q, MySql, MySqlArguments);
binder!(bind_postgres, 'q, Postgres, PgArguments);
binder!(bind_sqlite, 'q, Sqlite, SqliteArguments<'q>);
