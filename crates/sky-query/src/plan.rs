//! Compiled query plans.
//!
//! A plan is a flat list of instructions over numbered registers and
//! accumulator slots:
//!
//! ```text
//! load  r0, channel        ; bind r0 to a property
//! test  r0, eq, "web"      ; drop the event unless the test holds
//! group r0                 ; key results by r0
//! count a0                 ; count matching events into a0
//! fold  a1, sum, r1        ; fold r1 into a1
//! ```
//!
//! Loads come first, then tests, the optional group, and one accumulator
//! instruction per output field in declaration order.

use std::fmt;

use serde::Serialize;
use sky_catalog::TableSchema;
use sky_events::TimeRange;
use sky_types::{AggregateKind, DataType, PropertyId, Value};

use crate::error::QueryError;
use crate::spec::CompareOp;

/// Register index.
pub type Register = usize;

/// Accumulator slot index. Slot `n` produces output field `n`.
pub type Slot = usize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Instruction {
    /// Binds a register to a property.
    Load {
        register: Register,
        property: PropertyId,
        name: String,
        data_type: DataType,
        transient: bool,
    },
    /// Skips the event unless `register <compare> literal` holds.
    Test {
        register: Register,
        compare: CompareOp,
        literal: Value,
    },
    /// Keys results by the register's value.
    Group { register: Register },
    /// Counts matching events.
    Count { slot: Slot },
    /// Folds the register's value into an accumulator.
    Fold {
        slot: Slot,
        aggregate: AggregateKind,
        register: Register,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load {
                register,
                property,
                name,
                data_type,
                transient,
            } => {
                write!(f, "load  r{register}, {name}  ; #{property} {data_type}")?;
                if *transient {
                    f.write_str(" transient")?;
                }
                Ok(())
            }
            Self::Test {
                register,
                compare,
                literal,
            } => write!(f, "test  r{register}, {compare}, {}", literal.to_json()),
            Self::Group { register } => write!(f, "group r{register}"),
            Self::Count { slot } => write!(f, "count a{slot}"),
            Self::Fold {
                slot,
                aggregate,
                register,
            } => write!(f, "fold  a{slot}, {aggregate}, r{register}"),
        }
    }
}

/// Renders instructions as a listing, one per line.
pub fn listing(instructions: &[Instruction]) -> String {
    let mut source = String::new();
    for instruction in instructions {
        source.push_str(&instruction.to_string());
        source.push('\n');
    }
    source
}

/// An immutable, schema-version-tagged query plan.
///
/// Serializes as the codegen artifact: table, schema version, signature,
/// source listing and the instruction list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    pub table: String,
    #[serde(skip)]
    pub table_id: i64,
    pub schema_version: u64,
    pub signature: String,
    pub source: String,
    pub instructions: Vec<Instruction>,
    /// Output field names by slot.
    #[serde(skip)]
    pub fields: Vec<String>,
    #[serde(skip)]
    pub range: TimeRange,
}

impl CompiledQuery {
    /// Verifies that the plan still matches `schema`.
    ///
    /// A plan stays valid across unrelated property additions. It goes stale
    /// when the table was dropped and recreated, or when a property it loads
    /// no longer resolves to the same id and data type.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::SchemaStale` describing the first mismatch.
    pub fn check(&self, schema: &TableSchema) -> Result<(), QueryError> {
        if schema.id != self.table_id {
            return Err(QueryError::SchemaStale(format!(
                "table {} was recreated since the query was compiled",
                self.table
            )));
        }
        for instruction in &self.instructions {
            let Instruction::Load {
                property,
                name,
                data_type,
                ..
            } = instruction
            else {
                continue;
            };
            let current = schema.property(name);
            if !matches!(current, Some(p) if p.id == *property && p.data_type == *data_type) {
                return Err(QueryError::SchemaStale(format!(
                    "property {}.{name} changed since the query was compiled at version {}",
                    self.table, self.schema_version
                )));
            }
        }
        Ok(())
    }
}
