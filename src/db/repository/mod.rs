//! Repository layer: entity-scoped database operations on a borrowed connection.

mod retraining;
mod scan;

use chrono::{DateTime, Utc};

use super::DatabaseError;

pub use retraining::*;
pub use scan::*;

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::ConstraintViolation(format!("{field} is not RFC 3339: {raw}")))
}

/// Map UNIQUE/CHECK failures to a conflict the caller can retry or report.
pub(crate) fn map_constraint(e: rusqlite::Error, what: &str) -> DatabaseError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DatabaseError::Conflict(what.to_string())
        }
        other => DatabaseError::Sqlite(other),
    }
}
