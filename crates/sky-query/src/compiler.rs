//! Compiles a [`QuerySpec`] against a table schema into a [`CompiledQuery`].
//!
//! Compilation is pure: the same specification against the same schema
//! snapshot always yields an identical plan.

use std::collections::{HashMap, HashSet};

use sky_catalog::{Property, TableSchema};
use sky_events::TimeRange;
use sky_types::{validate_name, AggregateKind, DataType, Value};

use crate::error::QueryError;
use crate::plan::{listing, CompiledQuery, Instruction, Register};
use crate::spec::{FilterSpec, QuerySpec};

/// Assigns registers in order of first reference.
struct Registers<'a> {
    schema: &'a TableSchema,
    by_name: HashMap<&'a str, Register>,
    loads: Vec<Instruction>,
}

impl<'a> Registers<'a> {
    fn new(schema: &'a TableSchema) -> Self {
        Self {
            schema,
            by_name: HashMap::new(),
            loads: Vec::new(),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<(Register, &'a Property), QueryError> {
        let schema: &'a TableSchema = self.schema;
        let property = schema.property(name).ok_or_else(|| {
            QueryError::UnknownProperty(format!("unknown property: {}.{name}", schema.name))
        })?;
        if let Some(register) = self.by_name.get(property.name.as_str()) {
            return Ok((*register, property));
        }
        let register = self.loads.len();
        self.by_name.insert(property.name.as_str(), register);
        self.loads.push(Instruction::Load {
            register,
            property: property.id,
            name: property.name.clone(),
            data_type: property.data_type,
            transient: property.transient,
        });
        Ok((register, property))
    }
}

/// Compiles `spec` against `schema`.
///
/// # Errors
///
/// `UnknownProperty` for an unresolved property, `TypeMismatch` for a filter
/// literal of the wrong type, `InvalidArgument` for an aggregate or operator
/// applied to an incompatible type and for structural problems such as
/// missing or duplicate fields.
pub fn compile(schema: &TableSchema, spec: &QuerySpec) -> Result<CompiledQuery, QueryError> {
    if spec.fields.is_empty() {
        return Err(QueryError::InvalidArgument(
            "query must select at least one field".into(),
        ));
    }
    let range = TimeRange::new(spec.from, spec.to);
    if range.is_empty() {
        return Err(QueryError::InvalidArgument(format!(
            "invalid range: from {:?} is after to {:?}",
            spec.from, spec.to
        )));
    }

    let mut registers = Registers::new(schema);

    let mut tests = Vec::with_capacity(spec.filters.len());
    for filter in &spec.filters {
        let (register, property) = registers.resolve(&filter.property)?;
        let literal = filter_literal(property, filter)?;
        tests.push(Instruction::Test {
            register,
            compare: filter.op,
            literal,
        });
    }

    let group = match &spec.group_by {
        Some(name) => {
            let (register, _) = registers.resolve(name)?;
            Some(Instruction::Group { register })
        }
        None => None,
    };

    let mut seen = HashSet::new();
    let mut accumulators = Vec::with_capacity(spec.fields.len());
    let mut fields = Vec::with_capacity(spec.fields.len());
    for (slot, field) in spec.fields.iter().enumerate() {
        validate_name(&field.name)
            .map_err(|e| QueryError::InvalidArgument(format!("field name {:?}: {e}", field.name)))?;
        if !seen.insert(field.name.as_str()) {
            return Err(QueryError::InvalidArgument(format!(
                "duplicate field name: {}",
                field.name
            )));
        }

        let instruction = match (&field.property, field.aggregate) {
            (None, AggregateKind::Count) => Instruction::Count { slot },
            (None, aggregate) => {
                return Err(QueryError::InvalidArgument(format!(
                    "field {}: {aggregate} requires a property",
                    field.name
                )));
            }
            (Some(name), aggregate) => {
                let (register, property) = registers.resolve(name)?;
                if !aggregate.accepts(property.data_type) {
                    return Err(QueryError::InvalidArgument(format!(
                        "field {}: {aggregate} cannot be applied to {} property {name}",
                        field.name, property.data_type
                    )));
                }
                Instruction::Fold {
                    slot,
                    aggregate,
                    register,
                }
            }
        };
        accumulators.push(instruction);
        fields.push(field.name.clone());
    }

    let mut instructions = registers.loads;
    instructions.extend(tests);
    instructions.extend(group);
    instructions.extend(accumulators);

    Ok(CompiledQuery {
        table: schema.name.clone(),
        table_id: schema.id,
        schema_version: schema.version,
        signature: spec.signature()?,
        source: listing(&instructions),
        instructions,
        fields,
        range,
    })
}

/// Checks the operator against the property type and converts the literal.
fn filter_literal(property: &Property, filter: &FilterSpec) -> Result<Value, QueryError> {
    let data_type = property.data_type;
    if filter.op.is_ordering() && !data_type.is_ordered() {
        return Err(QueryError::InvalidArgument(format!(
            "operator {} cannot be applied to {data_type} property {}",
            filter.op, property.name
        )));
    }
    if filter.op.is_textual() && !data_type.is_textual() {
        return Err(QueryError::InvalidArgument(format!(
            "operator {} requires a string or factor property, {} is {data_type}",
            filter.op, property.name
        )));
    }
    data_type.coerce(&filter.value).ok_or_else(|| {
        QueryError::TypeMismatch(format!(
            "filter on {} expects {}, got {}",
            property.name,
            expected_literal(data_type),
            filter.value
        ))
    })
}

fn expected_literal(data_type: DataType) -> &'static str {
    match data_type {
        DataType::String | DataType::Factor => "a string",
        DataType::Integer => "an integer",
        DataType::Float => "a number",
        DataType::Boolean => "a boolean",
    }
}
