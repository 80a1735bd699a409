//! Unit tests for compilation, caching and execution.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde_json::{json, Value as Json};
use sky_catalog::Catalog;
use sky_db::{create_pool, run_migrations, DbRuntimeSettings};
use sky_events::EventLog;
use tempfile::TempDir;

use crate::{compile, EngineSettings, QueryEngine, QueryError, QuerySpec};

/// Table `t`: channel (factor, #1), amount (integer, #2), price (float, #3),
/// action (transient string, #-1), active (boolean, #4).
fn setup_engine(workers: usize) -> (TempDir, QueryEngine) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("sky.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("should create pool");
    {
        let conn = pool.get().expect("should get connection");
        run_migrations(&conn).expect("migrations should succeed");
    }
    let catalog = Arc::new(Catalog::open(pool).expect("should open catalog"));
    catalog.create_table("t").expect("create should succeed");
    for (name, data_type, transient) in [
        ("channel", "factor", false),
        ("amount", "integer", false),
        ("price", "float", false),
        ("action", "string", true),
        ("active", "boolean", false),
    ] {
        catalog
            .add_property("t", name, data_type, transient)
            .expect("add should succeed");
    }
    let log = Arc::new(EventLog::open(catalog).expect("should open log"));
    let engine = QueryEngine::new(
        log,
        EngineSettings {
            workers,
            cache_capacity: 8,
        },
    )
    .expect("should start engine");
    (dir, engine)
}

fn put(engine: &QueryEngine, object_id: &str, timestamp: i64, values: Json) {
    let Json::Object(values) = values else {
        panic!("expected object");
    };
    engine
        .log()
        .put_event("t", object_id, timestamp, &values)
        .expect("put should succeed");
}

/// o1: web@10 (view), amount 3@20, mobile@30 (buy). o2: web@15, price@25.
fn seed(engine: &QueryEngine) {
    put(engine, "o1", 10, json!({"channel": "web", "amount": 5, "action": "view"}));
    put(engine, "o1", 20, json!({"amount": 3}));
    put(engine, "o1", 30, json!({"channel": "mobile", "amount": 1, "action": "buy"}));
    put(engine, "o2", 15, json!({"channel": "web", "amount": 10}));
    put(engine, "o2", 25, json!({"price": 2.5}));
}

fn run(engine: &QueryEngine, body: Json) -> Result<Json, QueryError> {
    let result = engine.run("t", body, &AtomicBool::new(false))?;
    Ok(serde_json::to_value(result).expect("should serialize"))
}

fn spec(value: Json) -> QuerySpec {
    QuerySpec::parse(value).expect("spec should parse")
}

// ── compilation ──────────────────────────────────────────────────────

#[test]
fn compile_emits_register_listing() {
    let (_dir, engine) = setup_engine(1);
    let schema = engine.log().catalog().get_table("t").expect("should exist");
    let query = compile(
        &schema,
        &spec(json!({
            "fields": [
                {"name": "events", "aggregate": "count"},
                {"name": "total", "aggregate": "sum", "property": "amount"}
            ],
            "filters": [{"property": "channel", "op": "eq", "value": "web"}],
            "groupBy": "channel"
        })),
    )
    .expect("should compile");

    assert_eq!(
        query.source,
        "load  r0, channel  ; #1 factor\n\
         load  r1, amount  ; #2 integer\n\
         test  r0, eq, \"web\"\n\
         group r0\n\
         count a0\n\
         fold  a1, sum, r1\n"
    );
    assert_eq!(query.schema_version, 5);
    assert_eq!(query.fields, vec!["events", "total"]);

    let artifact = serde_json::to_value(&query).expect("should serialize");
    assert_eq!(artifact["table"], "t");
    assert_eq!(artifact["schemaVersion"], 5);
    assert_eq!(
        artifact["instructions"][0],
        json!({"op": "load", "register": 0, "property": 1, "name": "channel", "dataType": "factor", "transient": false})
    );
    assert_eq!(
        artifact["instructions"][5],
        json!({"op": "fold", "slot": 1, "aggregate": "sum", "register": 1})
    );
}

#[test]
fn compile_is_deterministic() {
    let (_dir, engine) = setup_engine(1);
    let schema = engine.log().catalog().get_table("t").expect("should exist");
    let body = json!({
        "fields": [{"name": "a", "aggregate": "max", "property": "price"}],
        "filters": [{"property": "action", "op": "startsWith", "value": "b"}]
    });

    let first = compile(&schema, &spec(body.clone())).expect("should compile");
    let second = compile(&schema, &spec(body)).expect("should compile");
    assert_eq!(first, second);
}

#[test]
fn compile_rejects_invalid_queries() {
    let (_dir, engine) = setup_engine(1);
    let schema = engine.log().catalog().get_table("t").expect("should exist");
    let compile_err = |body: Json| compile(&schema, &spec(body)).expect_err("should fail");

    assert!(matches!(
        compile_err(json!({"fields": [{"name": "x", "property": "bogus"}]})),
        QueryError::UnknownProperty(_)
    ));
    assert!(matches!(
        compile_err(json!({"fields": [{"name": "x"}], "groupBy": "bogus"})),
        QueryError::InvalidArgument(_) | QueryError::UnknownProperty(_)
    ));
    for body in [
        json!({"fields": []}),
        json!({"fields": [{"name": "x", "aggregate": "sum", "property": "action"}]}),
        json!({"fields": [{"name": "x", "aggregate": "min", "property": "active"}]}),
        json!({"fields": [{"name": "x", "aggregate": "sum"}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}, {"name": "x", "aggregate": "count"}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}],
               "filters": [{"property": "active", "op": "gt", "value": true}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}],
               "filters": [{"property": "amount", "op": "contains", "value": "1"}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}], "from": 10, "to": 5}),
    ] {
        assert!(
            matches!(compile(&schema, &spec(body.clone())), Err(QueryError::InvalidArgument(_))),
            "{body} should be an invalid argument"
        );
    }
    for body in [
        json!({"fields": [{"name": "x", "aggregate": "count"}],
               "filters": [{"property": "amount", "op": "eq", "value": "5"}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}],
               "filters": [{"property": "amount", "op": "eq", "value": 1.5}]}),
        json!({"fields": [{"name": "x", "aggregate": "count"}],
               "filters": [{"property": "channel", "op": "eq", "value": null}]}),
    ] {
        assert!(
            matches!(compile(&schema, &spec(body.clone())), Err(QueryError::TypeMismatch(_))),
            "{body} should be a type mismatch"
        );
    }

    compile(
        &schema,
        &spec(json!({"fields": [{"name": "x", "aggregate": "count"}],
                     "filters": [{"property": "price", "op": "gte", "value": 2}]})),
    )
    .expect("integer literal is accepted for a float property");
}

// ── caching and staleness ────────────────────────────────────────────

#[test]
fn engine_caches_by_signature() {
    let (_dir, engine) = setup_engine(1);
    let a = engine
        .compile("t", &spec(json!({"fields": [{"name": "n", "property": "amount"}]})))
        .expect("should compile");
    let b = engine
        .compile(
            "t",
            &spec(json!({"fields": [{"property": "amount", "name": "n", "aggregate": "last"}]})),
        )
        .expect("should compile");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(engine.cached(), 1);

    assert!(matches!(
        engine.compile("missing", &spec(json!({"fields": [{"name": "n", "aggregate": "count"}]}))),
        Err(QueryError::NotFound(_))
    ));
}

#[test]
fn engine_cache_evicts_least_recently_used_plan() {
    let (_dir, engine) = setup_engine(1);
    let count = |i: usize| spec(json!({"fields": [{"name": format!("n{i}"), "aggregate": "count"}]}));

    let first = engine.compile("t", &count(0)).expect("should compile");
    let mut last = Arc::clone(&first);
    for i in 1..10 {
        last = engine.compile("t", &count(i)).expect("should compile");
    }
    assert_eq!(engine.cached(), 8);

    let hit = engine.compile("t", &count(9)).expect("should compile");
    assert!(Arc::ptr_eq(&last, &hit));
    let recompiled = engine.compile("t", &count(0)).expect("should compile");
    assert!(!Arc::ptr_eq(&first, &recompiled));
    assert_eq!(engine.cached(), 8);
}

#[test]
fn unrelated_property_addition_keeps_query_valid() {
    let (_dir, engine) = setup_engine(1);
    seed(&engine);
    let query = engine
        .compile("t", &spec(json!({"fields": [{"name": "total", "aggregate": "sum", "property": "amount"}]})))
        .expect("should compile");

    engine
        .log()
        .catalog()
        .add_property("t", "extra", "string", false)
        .expect("add should succeed");

    let result = engine
        .execute(&query, None, &AtomicBool::new(false))
        .expect("query should still run");
    assert_eq!(result.objects, 2);

    let again = engine
        .compile("t", &spec(json!({"fields": [{"name": "total", "aggregate": "sum", "property": "amount"}]})))
        .expect("should compile");
    assert!(Arc::ptr_eq(&query, &again), "cached plan is still valid");
}

#[test]
fn recreated_table_makes_query_stale() {
    let (_dir, engine) = setup_engine(1);
    let body = json!({"fields": [{"name": "n", "aggregate": "count"}]});
    let query = engine.compile("t", &spec(body.clone())).expect("should compile");

    engine.log().drop_table("t").expect("drop should succeed");
    engine.log().catalog().create_table("t").expect("recreate should succeed");

    let err = engine
        .execute(&query, None, &AtomicBool::new(false))
        .expect_err("plan should be stale");
    assert!(matches!(err, QueryError::SchemaStale(_)), "got {err:?}");

    let fresh = engine.compile("t", &spec(body)).expect("should recompile");
    assert!(!Arc::ptr_eq(&query, &fresh));
    engine
        .execute(&fresh, None, &AtomicBool::new(false))
        .expect("fresh plan should run");
}

// ── execution ────────────────────────────────────────────────────────

#[test]
fn ungrouped_results_are_keyed_by_object() {
    let (_dir, engine) = setup_engine(2);
    seed(&engine);

    // o2's event at 25 carries amount 10 forward from 15.
    let result = run(
        &engine,
        json!({"fields": [
            {"name": "events", "aggregate": "count"},
            {"name": "total", "aggregate": "sum", "property": "amount"},
            {"name": "channel", "property": "channel"}
        ]}),
    )
    .expect("query should run");

    assert_eq!(
        result,
        json!({
            "results": {
                "o1": {"events": 3, "total": 9, "channel": "mobile"},
                "o2": {"events": 2, "total": 20, "channel": "web"}
            },
            "objects": 2,
            "events": 5
        })
    );
}

#[test]
fn grouped_results_use_carried_values() {
    let (_dir, engine) = setup_engine(2);
    seed(&engine);

    let result = run(
        &engine,
        json!({"fields": [{"name": "n", "aggregate": "count"}], "groupBy": "channel"}),
    )
    .expect("query should run");
    assert_eq!(result["results"], json!({"mobile": {"n": 1}, "web": {"n": 4}}));
}

#[test]
fn transient_values_are_not_carried() {
    let (_dir, engine) = setup_engine(1);
    seed(&engine);

    let result = run(
        &engine,
        json!({"fields": [{"name": "a", "aggregate": "count", "property": "action"}]}),
    )
    .expect("query should run");
    assert_eq!(result["results"], json!({"o1": {"a": 2}, "o2": {"a": 0}}));

    let result = run(
        &engine,
        json!({
            "fields": [{"name": "n", "aggregate": "count"}],
            "filters": [{"property": "action", "op": "eq", "value": "view"}]
        }),
    )
    .expect("query should run");
    assert_eq!(result["results"], json!({"o1": {"n": 1}}));
    assert_eq!(result["events"], 1);
}

#[test]
fn range_bounds_keep_earlier_state() {
    let (_dir, engine) = setup_engine(1);
    seed(&engine);

    let result = run(
        &engine,
        json!({
            "fields": [{"name": "n", "aggregate": "count"}],
            "filters": [{"property": "channel", "op": "eq", "value": "web"}],
            "from": 20,
            "to": 29
        }),
    )
    .expect("query should run");
    assert_eq!(result["results"], json!({"o1": {"n": 1}, "o2": {"n": 1}}));
}

#[test]
fn aggregates_combine_across_objects() {
    let (_dir, engine) = setup_engine(3);
    seed(&engine);

    let result = run(
        &engine,
        json!({
            "fields": [
                {"name": "sum", "aggregate": "sum", "property": "amount"},
                {"name": "min", "aggregate": "min", "property": "amount"},
                {"name": "max", "aggregate": "max", "property": "amount"},
                {"name": "avg", "aggregate": "avg", "property": "amount"},
                {"name": "first", "aggregate": "first", "property": "amount"},
                {"name": "last", "aggregate": "last", "property": "amount"},
                {"name": "price", "aggregate": "sum", "property": "price"},
                {"name": "flag", "aggregate": "last", "property": "active"}
            ],
            "filters": [{"property": "channel", "op": "eq", "value": "web"}],
            "groupBy": "channel"
        }),
    )
    .expect("query should run");

    // web events: o1@10 (5), o1@20 (3), o2@15 (10), o2@25 (10, price 2.5).
    assert_eq!(
        result["results"]["web"],
        json!({
            "sum": 28,
            "min": 3,
            "max": 10,
            "avg": 7.0,
            "first": 5,
            "last": 10,
            "price": 2.5,
            "flag": null
        })
    );
}

#[test]
fn first_and_last_ties_break_on_object_id() {
    let (_dir, engine) = setup_engine(2);
    put(&engine, "b", 5, json!({"channel": "x", "amount": 2}));
    put(&engine, "a", 5, json!({"channel": "x", "amount": 1}));

    let result = run(
        &engine,
        json!({
            "fields": [
                {"name": "first", "aggregate": "first", "property": "amount"},
                {"name": "last", "aggregate": "last", "property": "amount"}
            ],
            "groupBy": "channel"
        }),
    )
    .expect("query should run");
    assert_eq!(result["results"]["x"], json!({"first": 1, "last": 2}));
}

#[test]
fn missing_group_value_groups_under_empty_key() {
    let (_dir, engine) = setup_engine(1);
    put(&engine, "o1", 1, json!({"amount": 1}));
    put(&engine, "o1", 2, json!({"channel": "web"}));

    let result = run(
        &engine,
        json!({"fields": [{"name": "n", "aggregate": "count"}], "groupBy": "channel"}),
    )
    .expect("query should run");
    assert_eq!(result["results"], json!({"": {"n": 1}, "web": {"n": 1}}));
}

#[test]
fn object_ids_restrict_the_scan() {
    let (_dir, engine) = setup_engine(1);
    seed(&engine);

    let result = run(
        &engine,
        json!({
            "fields": [{"name": "n", "aggregate": "count"}],
            "objectIds": ["o2", "missing"]
        }),
    )
    .expect("query should run");
    assert_eq!(
        result,
        json!({"results": {"o2": {"n": 2}}, "objects": 1, "events": 2})
    );

    assert!(matches!(
        run(&engine, json!({"fields": [{"name": "n", "aggregate": "count"}], "objectIds": "o2"})),
        Err(QueryError::InvalidArgument(_))
    ));
}

#[test]
fn cancelled_execution_returns_no_result() {
    let (_dir, engine) = setup_engine(2);
    seed(&engine);

    let err = engine
        .run(
            "t",
            json!({"fields": [{"name": "n", "aggregate": "count"}]}),
            &AtomicBool::new(true),
        )
        .expect_err("should be cancelled");
    assert!(matches!(err, QueryError::Cancelled));
}

#[test]
fn parallel_execution_matches_serial() {
    let (_dir, serial) = setup_engine(1);
    let (_dir2, parallel) = setup_engine(4);
    for engine in [&serial, &parallel] {
        for i in 0..40 {
            let object_id = format!("obj{i:02}");
            for ts in 0..5 {
                put(
                    engine,
                    &object_id,
                    ts * 10 + i,
                    json!({"channel": if i % 3 == 0 { "a" } else { "b" }, "price": (i * ts) as f64 / 4.0}),
                );
            }
        }
    }

    let body = json!({
        "fields": [
            {"name": "n", "aggregate": "count"},
            {"name": "total", "aggregate": "sum", "property": "price"},
            {"name": "first", "aggregate": "first", "property": "price"},
            {"name": "last", "aggregate": "last", "property": "price"}
        ],
        "groupBy": "channel"
    });
    let a = run(&serial, body.clone()).expect("serial should run");
    let b = run(&parallel, body).expect("parallel should run");
    assert_eq!(a, b);
    assert_eq!(a["objects"], 40);
    assert_eq!(a["events"], 200);
}

#[test]
fn concurrent_runs_share_one_bounded_pool() {
    let (_dir, engine) = setup_engine(3);
    assert_eq!(engine.workers(), 3);
    seed(&engine);

    let body = json!({"fields": [{"name": "total", "aggregate": "sum", "property": "amount"}]});
    let expected = run(&engine, body.clone()).expect("should run");

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| run(&engine, body.clone()).expect("should run")))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("runner should not panic"), expected);
        }
    });
    assert_eq!(engine.workers(), 3);
}
