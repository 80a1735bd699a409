//! Query compiler and executor for the Sky event database.
//!
//! A [`QuerySpec`] is compiled once per distinct shape into a
//! [`CompiledQuery`]: a flat instruction list over numbered registers,
//! tagged with the table's schema version. The plan is then run over every
//! targeted object's event stream on a shared thread pool, and per-object partial
//! results are merged deterministically.
//!
//! [`QueryEngine`] ties the pieces together and caches compiled plans by
//! table and specification signature.

mod cache;
mod compiler;
mod engine;
mod error;
mod executor;
mod plan;
mod spec;

pub use compiler::compile;
pub use engine::{thread_count, EngineSettings, QueryEngine, OBJECT_IDS_FIELD};
pub use error::QueryError;
pub use executor::{execute, QueryResult};
pub use plan::{listing, CompiledQuery, Instruction, Register, Slot};
pub use spec::{CompareOp, FieldSpec, FilterSpec, QuerySpec};

#[cfg(test)]
mod tests;
