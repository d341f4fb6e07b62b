//! Opaque synchronization cursors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExchangeError;

/// Opaque synchronization progress token.
///
/// Only the peer that issued a cursor interprets its bytes; everyone else
/// stores and returns it unchanged. Serialized as a hex string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        hex::encode(cursor.0)
    }
}

impl TryFrom<String> for Cursor {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        hex::decode(value).map(Cursor)
    }
}

/// High-water mark of commit timestamps, carried as CBOR inside a
/// [`Cursor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampCursor {
    pub timestamp: DateTime<Utc>,
}

impl TimestampCursor {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp }
    }

    pub fn encode(&self) -> Result<Cursor, ExchangeError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))?;
        Ok(Cursor(bytes))
    }

    pub fn decode(cursor: &Cursor) -> Result<Self, ExchangeError> {
        ciborium::from_reader(cursor.as_bytes())
            .map_err(|e| ExchangeError::InvalidCursor(format!("{}: {}", cursor, e)))
    }
}
