//! The declarative query specification accepted over HTTP.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sky_types::{AggregateKind, Timestamp, Value};

use crate::error::QueryError;

/// A query against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuerySpec {
    /// Output fields. Must be non-empty with unique names.
    pub fields: Vec<FieldSpec>,
    /// Predicates that must all hold for an event to be counted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,
    /// Property whose value keys the results. Object ids are used otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    /// Inclusive lower timestamp bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Inclusive upper timestamp bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default = "default_aggregate")]
    pub aggregate: AggregateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

fn default_aggregate() -> AggregateKind {
    AggregateKind::Last
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterSpec {
    pub property: String,
    pub op: CompareOp,
    pub value: serde_json::Value,
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
        }
    }

    /// Returns `true` for operators that need an ordered type.
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    /// Returns `true` for operators that only apply to text.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith)
    }

    /// Applies the operator with `value` on the left and `literal` on the
    /// right. Incomparable operands never match.
    pub fn evaluate(self, value: &Value, literal: &Value) -> bool {
        match self {
            Self::Contains => matches!(
                (value.as_str(), literal.as_str()),
                (Some(v), Some(l)) if v.contains(l)
            ),
            Self::StartsWith => matches!(
                (value.as_str(), literal.as_str()),
                (Some(v), Some(l)) if v.starts_with(l)
            ),
            op => match value.compare(literal) {
                Some(ordering) => match op {
                    Self::Eq => ordering == Ordering::Equal,
                    Self::Ne => ordering != Ordering::Equal,
                    Self::Gt => ordering == Ordering::Greater,
                    Self::Gte => ordering != Ordering::Less,
                    Self::Lt => ordering == Ordering::Less,
                    Self::Lte => ordering != Ordering::Greater,
                    Self::Contains | Self::StartsWith => false,
                },
                None => false,
            },
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl QuerySpec {
    /// Parses a specification from JSON.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidArgument` for malformed input, including
    /// unknown keys, unknown aggregates and unknown operators.
    pub fn parse(value: serde_json::Value) -> Result<Self, QueryError> {
        serde_json::from_value(value)
            .map_err(|e| QueryError::InvalidArgument(format!("invalid query: {e}")))
    }

    /// Returns the hex SHA-256 of the canonical JSON form.
    ///
    /// Defaults are filled in and keys are emitted in a fixed order, so
    /// specifications that differ only in spelling share a signature.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidArgument` if the specification cannot be
    /// serialized.
    pub fn signature(&self) -> Result<String, QueryError> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| QueryError::InvalidArgument(format!("invalid query: {e}")))?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}
