//! Database value parsing utilities
//!
//! Error-safe parsing of stored values. Failures surface as rusqlite
//! conversion errors so row mappers can use `?`.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Decode a JSON text column
pub fn parse_json<T: DeserializeOwned>(s: &str) -> Result<T, SqlError> {
    serde_json::from_str(s).map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap(), id);
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_parse_datetime() {
        let now = Utc::now();
        let parsed = parse_datetime(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_parse_json() {
        let list: Vec<String> = parse_json(r#"["alice","bob"]"#).unwrap();
        assert_eq!(list, vec!["alice", "bob"]);
        assert!(parse_json::<Vec<String>>("{").is_err());
    }
}
