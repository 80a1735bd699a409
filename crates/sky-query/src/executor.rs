//! Runs compiled plans over object event streams.
//!
//! Objects are scanned independently on the engine's rayon pool. Each
//! object produces its own partial result, and partials are merged in
//! ascending object-id order once every scan has finished, so the output
//! does not depend on scheduling.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use sky_events::{ObjectStream, TimeRange};
use sky_types::{AggregateKind, PropertyId, Timestamp, Value};

use crate::error::QueryError;
use crate::plan::{CompiledQuery, Instruction, Register};
use crate::spec::CompareOp;

/// The output of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Output rows by group key, or by object id when ungrouped.
    pub results: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
    /// Objects scanned.
    pub objects: usize,
    /// Events that passed every filter.
    pub events: u64,
}

/// Executes `query` over `streams`, which must be sorted by object id.
///
/// Objects are scanned on `pool`. `cancel` is checked before each object is
/// started; once raised, no new objects are scanned and the call returns
/// `Cancelled` without a result.
///
/// # Errors
///
/// Returns `QueryError::Cancelled` when `cancel` was raised.
pub fn execute(
    query: &CompiledQuery,
    streams: &[(String, Arc<ObjectStream>)],
    pool: &ThreadPool,
    cancel: &AtomicBool,
) -> Result<QueryResult, QueryError> {
    let program = Program::new(query);

    let partials: Vec<Option<Partial>> = pool.install(|| {
        streams
            .par_iter()
            .map(|(object_id, stream)| {
                if cancel.load(AtomicOrdering::Relaxed) {
                    return None;
                }
                Some(program.scan(object_id, stream))
            })
            .collect()
    });

    if cancel.load(AtomicOrdering::Relaxed) {
        return Err(QueryError::Cancelled);
    }

    let mut total = Partial::default();
    for partial in partials.into_iter().flatten() {
        total.merge(partial);
    }

    let events = total.events;
    Ok(QueryResult {
        results: total.render(&query.fields),
        objects: streams.len(),
        events,
    })
}

struct Load {
    property: PropertyId,
    transient: bool,
}

struct Test<'q> {
    register: Register,
    compare: CompareOp,
    literal: &'q Value,
}

struct Fold {
    aggregate: AggregateKind,
    register: Option<Register>,
}

/// The instruction list unpacked into per-phase tables.
struct Program<'q> {
    loads: Vec<Load>,
    tests: Vec<Test<'q>>,
    group: Option<Register>,
    folds: Vec<Fold>,
    range: TimeRange,
}

impl<'q> Program<'q> {
    fn new(query: &'q CompiledQuery) -> Self {
        let mut program = Program {
            loads: Vec::new(),
            tests: Vec::new(),
            group: None,
            folds: Vec::new(),
            range: query.range,
        };
        for instruction in &query.instructions {
            match instruction {
                Instruction::Load {
                    property,
                    transient,
                    ..
                } => program.loads.push(Load {
                    property: *property,
                    transient: *transient,
                }),
                Instruction::Test {
                    register,
                    compare,
                    literal,
                } => program.tests.push(Test {
                    register: *register,
                    compare: *compare,
                    literal,
                }),
                Instruction::Group { register } => program.group = Some(*register),
                Instruction::Count { .. } => program.folds.push(Fold {
                    aggregate: AggregateKind::Count,
                    register: None,
                }),
                Instruction::Fold {
                    aggregate,
                    register,
                    ..
                } => program.folds.push(Fold {
                    aggregate: *aggregate,
                    register: Some(*register),
                }),
            }
        }
        program
    }

    /// Scans one object's stream.
    ///
    /// Permanent properties carry forward from earlier events; transient
    /// ones are only visible on the event that carries them. The scan starts
    /// at the beginning of the stream so that carried values set before
    /// `from` are known when the range begins.
    fn scan(&self, object_id: &str, stream: &Arc<ObjectStream>) -> Partial {
        let object: Arc<str> = Arc::from(object_id);
        let mut partial = Partial::default();
        let mut registers: Vec<Option<Value>> = vec![None; self.loads.len()];

        for event in stream.cursor(TimeRange::new(None, self.range.to)) {
            for (slot, load) in registers.iter_mut().zip(&self.loads) {
                match event.get(load.property) {
                    Some(value) => *slot = Some(value.clone()),
                    None if load.transient => *slot = None,
                    None => {}
                }
            }

            let timestamp = event.timestamp();
            if !self.range.contains(timestamp) {
                continue;
            }
            let matched = self.tests.iter().all(|test| {
                registers[test.register]
                    .as_ref()
                    .is_some_and(|value| test.compare.evaluate(value, test.literal))
            });
            if !matched {
                continue;
            }

            let key = match self.group {
                Some(register) => registers[register]
                    .as_ref()
                    .map(Value::to_key)
                    .unwrap_or_default(),
                None => object_id.to_string(),
            };
            let accumulators = partial.groups.entry(key).or_insert_with(|| {
                self.folds
                    .iter()
                    .map(|f| Accumulator::new(f.aggregate))
                    .collect()
            });
            for (accumulator, fold) in accumulators.iter_mut().zip(&self.folds) {
                match fold.register {
                    None => accumulator.count(),
                    Some(register) => {
                        if let Some(value) = &registers[register] {
                            accumulator.add(value, timestamp, &object);
                        }
                    }
                }
            }
            partial.events += 1;
        }
        partial
    }
}

#[derive(Default)]
struct Partial {
    groups: BTreeMap<String, Vec<Accumulator>>,
    events: u64,
}

impl Partial {
    fn merge(&mut self, other: Partial) {
        self.events += other.events;
        for (key, accumulators) in other.groups {
            match self.groups.get_mut(&key) {
                Some(existing) => {
                    for (a, b) in existing.iter_mut().zip(accumulators) {
                        a.merge(b);
                    }
                }
                None => {
                    self.groups.insert(key, accumulators);
                }
            }
        }
    }

    fn render(
        self,
        fields: &[String],
    ) -> BTreeMap<String, serde_json::Map<String, serde_json::Value>> {
        self.groups
            .into_iter()
            .map(|(key, accumulators)| {
                let row = fields
                    .iter()
                    .cloned()
                    .zip(accumulators.iter().map(Accumulator::finish))
                    .collect();
                (key, row)
            })
            .collect()
    }
}

/// A value together with the `(timestamp, object id)` position it was seen
/// at. Positions totally order picks across objects.
struct Pick {
    timestamp: Timestamp,
    object: Arc<str>,
    value: Value,
}

impl Pick {
    fn position(&self) -> (Timestamp, &str) {
        (self.timestamp, &*self.object)
    }
}

#[derive(Clone, Copy)]
enum Sum {
    Empty,
    Integer(i64),
    Float(f64),
}

impl Sum {
    /// Integer sums stay integral until a float is seen or they overflow.
    fn combine(self, other: Sum) -> Sum {
        match (self, other) {
            (Sum::Empty, x) | (x, Sum::Empty) => x,
            (Sum::Integer(a), Sum::Integer(b)) => a
                .checked_add(b)
                .map_or(Sum::Float(a as f64 + b as f64), Sum::Integer),
            (a, b) => Sum::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Sum::Empty => 0.0,
            Sum::Integer(i) => i as f64,
            Sum::Float(f) => f,
        }
    }

    fn of(value: &Value) -> Sum {
        match value {
            Value::Integer(i) => Sum::Integer(*i),
            Value::Float(f) => Sum::Float(*f),
            _ => Sum::Empty,
        }
    }
}

enum Accumulator {
    Count(u64),
    Sum(Sum),
    Avg { total: f64, n: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Pick>),
    Last(Option<Pick>),
}

impl Accumulator {
    fn new(aggregate: AggregateKind) -> Self {
        match aggregate {
            AggregateKind::Count => Self::Count(0),
            AggregateKind::Sum => Self::Sum(Sum::Empty),
            AggregateKind::Avg => Self::Avg { total: 0.0, n: 0 },
            AggregateKind::Min => Self::Min(None),
            AggregateKind::Max => Self::Max(None),
            AggregateKind::First => Self::First(None),
            AggregateKind::Last => Self::Last(None),
        }
    }

    /// Counts an event for a property-less `count`.
    fn count(&mut self) {
        if let Self::Count(n) = self {
            *n += 1;
        }
    }

    fn add(&mut self, value: &Value, timestamp: Timestamp, object: &Arc<str>) {
        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(sum) => *sum = sum.combine(Sum::of(value)),
            Self::Avg { total, n } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *n += 1;
                }
            }
            Self::Min(current) => keep_extreme(current, value, Ordering::Less),
            Self::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Self::First(current) => {
                if current.is_none() {
                    *current = Some(Pick {
                        timestamp,
                        object: Arc::clone(object),
                        value: value.clone(),
                    });
                }
            }
            Self::Last(current) => {
                *current = Some(Pick {
                    timestamp,
                    object: Arc::clone(object),
                    value: value.clone(),
                });
            }
        }
    }

    fn merge(&mut self, other: Accumulator) {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Sum(a), Self::Sum(b)) => *a = a.combine(b),
            (Self::Avg { total, n }, Self::Avg { total: t, n: m }) => {
                *total += t;
                *n += m;
            }
            (Self::Min(a), Self::Min(Some(b))) => keep_extreme(a, &b, Ordering::Less),
            (Self::Max(a), Self::Max(Some(b))) => keep_extreme(a, &b, Ordering::Greater),
            (Self::First(a), Self::First(Some(b))) => {
                if a.as_ref().map_or(true, |a| b.position() < a.position()) {
                    *a = Some(b);
                }
            }
            (Self::Last(a), Self::Last(Some(b))) => {
                if a.as_ref().map_or(true, |a| b.position() > a.position()) {
                    *a = Some(b);
                }
            }
            _ => {}
        }
    }

    fn finish(&self) -> serde_json::Value {
        match self {
            Self::Count(n) => serde_json::Value::from(*n),
            Self::Sum(Sum::Empty) => serde_json::Value::Null,
            Self::Sum(Sum::Integer(i)) => serde_json::Value::from(*i),
            Self::Sum(Sum::Float(f)) => Value::Float(*f).to_json(),
            Self::Avg { n: 0, .. } => serde_json::Value::Null,
            Self::Avg { total, n } => Value::Float(*total / *n as f64).to_json(),
            Self::Min(v) | Self::Max(v) => {
                v.as_ref().map_or(serde_json::Value::Null, Value::to_json)
            }
            Self::First(p) | Self::Last(p) => p
                .as_ref()
                .map_or(serde_json::Value::Null, |p| p.value.to_json()),
        }
    }
}

/// Replaces `current` when `candidate` compares as `wanted` against it.
fn keep_extreme(current: &mut Option<Value>, candidate: &Value, wanted: Ordering) {
    let replace = match current {
        None => true,
        Some(existing) => candidate.compare(existing) == Some(wanted),
    };
    if replace {
        *current = Some(candidate.clone());
    }
}
