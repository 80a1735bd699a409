//! Query engine: compiled-query cache in front of the compiler and executor.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};
use sky_events::EventLog;

use crate::cache::LruCache;
use crate::compiler;
use crate::error::QueryError;
use crate::executor::{self, QueryResult};
use crate::plan::CompiledQuery;
use crate::spec::QuerySpec;

/// Request body key naming the objects to scan.
pub const OBJECT_IDS_FIELD: &str = "objectIds";

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Threads in the engine's scan pool, shared by every execution.
    pub workers: usize,
    /// Compiled queries kept in the cache. Zero disables caching.
    pub cache_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: thread_count(),
            cache_capacity: 256,
        }
    }
}

/// Returns the available parallelism, or 1 if it cannot be determined.
pub fn thread_count() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

type CacheKey = (String, String);

/// Compiles, caches and executes queries against an [`EventLog`].
///
/// Executions share one bounded rayon pool, so concurrent queries queue for
/// the same `workers` threads instead of each starting their own.
pub struct QueryEngine {
    log: Arc<EventLog>,
    pool: ThreadPool,
    cache: Mutex<LruCache<CacheKey, Arc<CompiledQuery>>>,
}

impl QueryEngine {
    /// Creates an engine and starts its scan pool.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::ThreadPool` if the pool threads cannot be spawned.
    pub fn new(log: Arc<EventLog>, settings: EngineSettings) -> Result<Self, QueryError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.workers.max(1))
            .thread_name(|i| format!("sky-query-{i}"))
            .build()?;
        Ok(Self {
            log,
            pool,
            cache: Mutex::new(LruCache::new(settings.cache_capacity)),
        })
    }

    /// Number of threads scanning objects.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Compiles `spec` against the table's current schema.
    ///
    /// A cached plan with the same signature is reused unless it is stale.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist, plus every compilation error.
    pub fn compile(
        &self,
        table: &str,
        spec: &QuerySpec,
    ) -> Result<Arc<CompiledQuery>, QueryError> {
        let schema = self.log.catalog().get_table(table)?;
        let key = (table.to_string(), spec.signature()?);

        if let Some(query) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            if query.check(&schema).is_ok() {
                tracing::debug!(table, signature = %key.1, "query cache hit");
                return Ok(Arc::clone(query));
            }
        }

        let query = Arc::new(compiler::compile(&schema, spec)?);
        tracing::info!(
            table,
            signature = %query.signature,
            schema_version = query.schema_version,
            instructions = query.instructions.len(),
            "compiled query"
        );

        let evicted = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, Arc::clone(&query));
        if let Some((table, signature)) = evicted {
            tracing::debug!(table = %table, signature = %signature, "evicted cached query");
        }
        Ok(query)
    }

    /// Executes a compiled query.
    ///
    /// With `object_ids`, only those objects are scanned; otherwise every
    /// object of the table is.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table no longer exists, `SchemaStale` if the plan no
    /// longer matches the table, `Cancelled` if `cancel` was raised.
    pub fn execute(
        &self,
        query: &CompiledQuery,
        object_ids: Option<&[String]>,
        cancel: &AtomicBool,
    ) -> Result<QueryResult, QueryError> {
        let schema = self.log.catalog().get_table(&query.table)?;
        if let Err(e) = query.check(&schema) {
            tracing::warn!(
                table = %query.table,
                signature = %query.signature,
                error = %e,
                "rejected stale query"
            );
            return Err(e);
        }

        let started = Instant::now();
        let streams = self.log.streams(schema.id, object_ids);
        let result = executor::execute(query, &streams, &self.pool, cancel);

        match &result {
            Ok(result) => tracing::info!(
                table = %query.table,
                objects = result.objects,
                events = result.events,
                groups = result.results.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "executed query"
            ),
            Err(QueryError::Cancelled) => tracing::info!(
                table = %query.table,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query cancelled"
            ),
            Err(_) => {}
        }
        result
    }

    /// Parses a request body, compiles it and executes it.
    ///
    /// The body is a query specification that may also carry an
    /// `objectIds` array restricting the scan.
    ///
    /// # Errors
    ///
    /// Every parse, compile and execution error.
    pub fn run(
        &self,
        table: &str,
        body: serde_json::Value,
        cancel: &AtomicBool,
    ) -> Result<QueryResult, QueryError> {
        let (spec, object_ids) = split_object_ids(body)?;
        let spec = QuerySpec::parse(spec)?;
        let query = self.compile(table, &spec)?;
        self.execute(&query, object_ids.as_deref(), cancel)
    }

    /// Number of cached plans.
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Removes `objectIds` from a request body.
fn split_object_ids(
    mut body: serde_json::Value,
) -> Result<(serde_json::Value, Option<Vec<String>>), QueryError> {
    let Some(map) = body.as_object_mut() else {
        return Ok((body, None));
    };
    let Some(raw) = map.remove(OBJECT_IDS_FIELD) else {
        return Ok((body, None));
    };
    let ids: Vec<String> = serde_json::from_value(raw).map_err(|e| {
        QueryError::InvalidArgument(format!(
            "{OBJECT_IDS_FIELD} must be an array of strings: {e}"
        ))
    })?;
    Ok((body, Some(ids)))
}
