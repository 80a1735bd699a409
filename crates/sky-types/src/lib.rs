//! Shared types for the Sky event database.
//!
//! This crate holds the value model every other crate agrees on: the
//! registry of property data types, the dynamically typed [`Value`] stored in
//! events, and the registry of aggregation kinds understood by the query
//! compiler. It has no storage or runtime dependencies so that the catalog,
//! event log and query crates can all depend on it without cycles.

mod value;

pub use value::Value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a property within its table.
///
/// Permanent properties are numbered upwards from `1`, transient properties
/// downwards from `-1`. Zero is never assigned.
pub type PropertyId = i16;

/// Event timestamp. Timestamps are opaque signed integers chosen by clients.
pub type Timestamp = i64;

/// Name reserved for the event key when events are rendered as JSON.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Maximum length, in bytes, of table and property names.
pub const MAX_NAME_LEN: usize = 256;

/// Data types a property can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Free-form UTF-8 text.
    String,
    /// Categorical text drawn from a small set of distinct values.
    Factor,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point number.
    Float,
    /// `true` or `false`.
    Boolean,
}

impl DataType {
    /// Every supported data type, in declaration order.
    pub const ALL: [DataType; 5] = [
        Self::String,
        Self::Factor,
        Self::Integer,
        Self::Float,
        Self::Boolean,
    ];

    /// Returns the canonical name used in requests and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Factor => "factor",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    /// Returns `true` for types that support arithmetic aggregation.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Returns `true` for types whose values are text.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String | Self::Factor)
    }

    /// Returns `true` for types with a meaningful ordering.
    pub fn is_ordered(self) -> bool {
        self != Self::Boolean
    }

    /// Converts a JSON value into a [`Value`] of this type.
    ///
    /// Returns `None` when the JSON value has the wrong shape. Integers are
    /// accepted where a float is declared; the reverse is not.
    pub fn coerce(self, json: &serde_json::Value) -> Option<Value> {
        match (self, json) {
            (Self::String | Self::Factor, serde_json::Value::String(s)) => {
                Some(Value::String(s.clone()))
            }
            (Self::Integer, serde_json::Value::Number(n)) => n.as_i64().map(Value::Integer),
            (Self::Float, serde_json::Value::Number(n)) => n.as_f64().map(Value::Float),
            (Self::Boolean, serde_json::Value::Bool(b)) => Some(Value::Boolean(*b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseDataTypeError(s.to_string()))
    }
}

/// Error returned when parsing an unsupported data type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported data type: {0}")]
pub struct ParseDataTypeError(pub String);

/// Aggregation functions the query compiler can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    /// Number of matching events.
    Count,
    /// Sum of a numeric property.
    Sum,
    /// Smallest value of an ordered property.
    Min,
    /// Largest value of an ordered property.
    Max,
    /// Arithmetic mean of a numeric property.
    Avg,
    /// Value at the earliest matching event.
    First,
    /// Value at the latest matching event.
    Last,
}

impl AggregateKind {
    /// Every supported aggregation, in declaration order.
    pub const ALL: [AggregateKind; 7] = [
        Self::Count,
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Avg,
        Self::First,
        Self::Last,
    ];

    /// Returns the canonical name used in query specifications.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Returns `true` when this aggregation reads a property value.
    pub fn needs_property(self) -> bool {
        self != Self::Count
    }

    /// Returns `true` when this aggregation can be applied to `data_type`.
    pub fn accepts(self, data_type: DataType) -> bool {
        match self {
            Self::Count | Self::First | Self::Last => true,
            Self::Sum | Self::Avg => data_type.is_numeric(),
            Self::Min | Self::Max => data_type.is_ordered(),
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateKind {
    type Err = ParseAggregateKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseAggregateKindError(s.to_string()))
    }
}

/// Error returned when parsing an unsupported aggregation name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported aggregate: {0}")]
pub struct ParseAggregateKindError(pub String);

/// Validates a table or property name.
///
/// Names must be non-empty, at most [`MAX_NAME_LEN`] bytes, and free of `/`
/// so they can appear as a single URL path segment.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name exceeds {MAX_NAME_LEN} bytes"));
    }
    if name.contains('/') {
        return Err(format!("name must not contain '/': {name}"));
    }
    Ok(())
}
