use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sky_query::EngineSettings;
use sky_server::{app, AppState};
use tempfile::TempDir;
use tower::ServiceExt; // for oneshot

async fn setup_app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sky.db");
    let pool = sky_db::create_pool(path.to_str().unwrap(), Default::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        sky_db::run_migrations(&conn).unwrap();
    }
    let settings = EngineSettings {
        workers: 2,
        cache_capacity: 16,
    };
    let state = AppState::open(pool, settings).unwrap();
    (dir, app(state))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let (_dir, app) = setup_app().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn create_and_get_table() {
    let (_dir, app) = setup_app().await;

    let (status, body) = send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"name": "t", "version": 0, "properties": []}));

    let (status, body) = send(&app, "GET", "/tables/t", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "t");

    let (status, body) = send(&app, "GET", "/tables", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_table_is_conflict() {
    let (_dir, app) = setup_app().await;

    send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;
    let (status, body) = send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn invalid_table_name_is_bad_request() {
    let (_dir, app) = setup_app().await;

    let (status, body) = send(&app, "POST", "/tables", Some(json!({"name": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn missing_table_is_not_found() {
    let (_dir, app) = setup_app().await;

    let (status, body) = send(&app, "GET", "/tables/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/tables/nope/properties",
        Some(json!({"name": "count", "transient": false, "dataType": "integer"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn add_and_list_properties() {
    let (_dir, app) = setup_app().await;
    send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;

    let (status, body) = send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "count", "transient": false, "dataType": "integer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"id": 1, "name": "count", "transient": false, "dataType": "integer"})
    );

    let (status, body) = send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "action", "transient": true, "dataType": "factor"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], -1);

    let (status, body) = send(&app, "GET", "/tables/t/properties", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["count", "action"]);

    let (status, body) = send(&app, "GET", "/tables/t/properties/action", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transient"], true);

    let (status, _) = send(&app, "GET", "/tables/t/properties/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/tables/t", None).await;
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn property_errors() {
    let (_dir, app) = setup_app().await;
    send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;
    send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "count", "transient": false, "dataType": "integer"})),
    )
    .await;

    let (status, _) = send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "count", "transient": true, "dataType": "string"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "size", "transient": false, "dataType": "decimal"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("decimal"));

    let (status, _) = send(
        &app,
        "POST",
        "/tables/t/properties",
        Some(json!({"name": "timestamp", "transient": false, "dataType": "integer"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let (_dir, app) = setup_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/tables")
        .header("content-type", "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn delete_table_removes_it() {
    let (_dir, app) = setup_app().await;
    send(&app, "POST", "/tables", Some(json!({"name": "t"}))).await;

    let (status, body) = send(&app, "DELETE", "/tables/t", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app, "GET", "/tables/t", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", "/tables/t", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
