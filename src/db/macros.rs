//! Database dispatch macros for reducing code duplication.
//!
//! The physical handle is an enum over the three sqlx connection types; these
//! macros generate the per-variant match arms so call sites stay linear.

/// Macro for generating dispatch match arms over a `DbHandle`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(handle, {
///     MySql(c) => mysql::run(c, sql).await,
///     Postgres(c) => postgres::run(c, sql).await,
///     SQLite(c) => sqlite::run(c, sql).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($handle:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $handle {
            $(
                $crate::db::driver::DbHandle::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
