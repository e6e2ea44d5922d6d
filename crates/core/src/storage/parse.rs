//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{ParticipantRole, RoomStatus};

fn conversion_error<E>(column: usize, e: E) -> SqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

/// Invalid enum tag found in a text column
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownValue {
    kind: &'static str,
    value: String,
}

/// Parse a UUID from a database string column
pub fn parse_uuid(column: usize, s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| conversion_error(column, e))
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(column: usize, s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

/// Parse an optional DateTime from an RFC3339 string
pub fn parse_datetime_opt(
    column: usize,
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(column, &s)).transpose()
}

pub fn parse_status(column: usize, s: &str) -> Result<RoomStatus, SqlError> {
    match s {
        "active" => Ok(RoomStatus::Active),
        "inactive" => Ok(RoomStatus::Inactive),
        other => Err(conversion_error(
            column,
            UnknownValue {
                kind: "room status",
                value: other.to_string(),
            },
        )),
    }
}

pub fn parse_role(column: usize, s: &str) -> Result<ParticipantRole, SqlError> {
    match s {
        "host" => Ok(ParticipantRole::Host),
        "participant" => Ok(ParticipantRole::Participant),
        other => Err(conversion_error(
            column,
            UnknownValue {
                kind: "participant role",
                value: other.to_string(),
            },
        )),
    }
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
