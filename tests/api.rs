use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use r2d2::Pool;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use nl_analytics::classify::providers::DisabledClassifier;
use nl_analytics::config::AppConfig;
use nl_analytics::db::bootstrap::ensure_sales_table;
use nl_analytics::db::db_pool::{DuckDBConnectionManager, IN_MEMORY};
use nl_analytics::db::executor::DuckDbEngine;
use nl_analytics::db::schema_manager::SchemaManager;
use nl_analytics::llm::models::ChatMessage;
use nl_analytics::llm::{CompletionProvider, LlmError};
use nl_analytics::pipeline::QueryPipeline;
use nl_analytics::web::build_router;
use nl_analytics::web::state::AppState;

/// Always answers with the same SQL.
struct FixedSql(&'static str);

#[async_trait]
impl CompletionProvider for FixedSql {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Ok(format!("```sql\n{}\n```", self.0))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

async fn create_test_app(config: AppConfig, sql: &'static str) -> Router {
    let manager = DuckDBConnectionManager::new(IN_MEMORY.to_string(), false).unwrap();
    let pool = Pool::builder().max_size(2).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        ensure_sales_table(&conn, None).unwrap();
        conn.execute_batch(
            "INSERT INTO sales
             SELECT range + 1, DATE '2024-01-01' + CAST(range AS INTEGER),
                    concat('Product ', range % 5), concat('Category ', range % 3),
                    10.0 * (range + 1), 20 + CAST(range % 40 AS INTEGER)
             FROM range(25);",
        )
        .unwrap();
    }

    let schema = Arc::new(SchemaManager::new(pool.clone()));
    schema.refresh_cache().await.unwrap();

    let pipeline = QueryPipeline::new(
        &config,
        Arc::new(FixedSql(sql)),
        Arc::new(DisabledClassifier),
        Arc::new(DuckDbEngine::new(pool)),
        schema,
    );
    build_router(Arc::new(AppState::new(config, pipeline)))
}

fn post_query(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/query")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "198.51.100.4")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn query_returns_requested_page() {
    let app = create_test_app(AppConfig::default(), "SELECT id, amount FROM sales ORDER BY id").await;

    let response = app
        .oneshot(post_query(json!({
            "prompt": "Show sales trend by month",
            "page": 3,
            "page_size": 10
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total_count"], 25);
    assert_eq!(json["total_pages"], 3);
    assert_eq!(json["page"], 3);
    assert_eq!(json["data"].as_array().unwrap().len(), 5);
    assert_eq!(json["visualization_type"], "line");
    assert_eq!(json["title"], "Show sales trend by month");
    assert_eq!(json["sql_query"], "SELECT id, amount FROM sales ORDER BY id");
    assert_eq!(json["columns"], json!(["id", "amount"]));
    assert!(json["execution_time"].is_f64());
}

#[tokio::test]
async fn invalid_prompt_is_bad_request() {
    let app = create_test_app(AppConfig::default(), "SELECT id FROM sales").await;

    let response = app
        .oneshot(post_query(json!({ "prompt": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["code"], "INVALID_INPUT");
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = create_test_app(AppConfig::default(), "SELECT id FROM sales").await;

    let response = app
        .oneshot(post_query(json!({ "prompt": "Show all sales", "page": -1 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn unsafe_sql_is_server_error() {
    let app = create_test_app(AppConfig::default(), "DELETE FROM sales").await;

    let response = app
        .oneshot(post_query(json!({ "prompt": "Clean up the sales table" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "UNSAFE_QUERY");
}

#[tokio::test]
async fn rate_limit_returns_429() {
    let mut config = AppConfig::default();
    config.pipeline.rate_limit_requests = 2;
    let app = create_test_app(config, "SELECT id FROM sales").await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_query(json!({ "prompt": "List every sale" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(post_query(json!({ "prompt": "List every sale" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(response).await["code"], "RATE_LIMITED");
}

/// A query from peer `192.0.2.50` claiming to forward for `forwarded_for`.
fn post_query_via(forwarded_for: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/query")
        .header("content-type", "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(json!({ "prompt": "List every sale" }).to_string()))
        .unwrap();
    let peer: SocketAddr = "192.0.2.50:40000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn rotating_forwarded_header_is_still_limited() {
    let mut config = AppConfig::default();
    config.pipeline.rate_limit_requests = 2;
    let app = create_test_app(config, "SELECT id FROM sales").await;

    let mut statuses = Vec::new();
    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(post_query_via(&format!("10.9.9.{i}")))
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn trusted_proxy_limits_each_forwarded_client() {
    let mut config = AppConfig::default();
    config.pipeline.rate_limit_requests = 2;
    config.web.trust_forwarded_for = true;
    let app = create_test_app(config, "SELECT id FROM sales").await;

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(post_query_via(&format!("10.9.9.{i}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    for expected in [StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
        let response = app
            .clone()
            .oneshot(post_query_via("10.9.9.0"))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn health_reports_database_and_model() {
    let app = create_test_app(AppConfig::default(), "SELECT id FROM sales").await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database_status"], "healthy");
    assert_eq!(json["ai_service_status"], "available");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn history_lists_newest_first() {
    let app = create_test_app(AppConfig::default(), "SELECT id FROM sales").await;

    for prompt in ["List every sale", "Show all sales records"] {
        let response = app
            .clone()
            .oneshot(post_query(json!({ "prompt": prompt })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = json_body(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["question"], "Show all sales records");
    assert_eq!(entries[0]["row_count"], 25);
    assert_eq!(entries[0]["visualization_type"], "bar");
}

#[tokio::test]
async fn examples_are_grouped_by_category() {
    let app = create_test_app(AppConfig::default(), "SELECT id FROM sales").await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/examples")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let categories: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["category"].as_str().unwrap())
        .collect();
    assert_eq!(
        categories,
        vec!["Time analysis", "Distribution", "Comparison", "Proportion"]
    );
}
