//! Request orchestration: prompt in, paginated rows plus a chart type out.

pub mod history;
pub mod rate_limit;
pub mod sanitizer;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classify::providers::TextClassifier;
use crate::classify::{VisualizationClassifier, VisualizationLabel};
use crate::config::AppConfig;
use crate::db::executor::{PaginatedExecutor, Pagination, QueryEngine, Row};
use crate::db::schema_manager::SchemaManager;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::llm::CompletionProvider;
use crate::llm::generator::SqlQueryGenerator;
use crate::util::logging::redact;
use history::{QueryHistory, QueryHistoryItem};
use rate_limit::RateLimiter;
use sanitizer::{MAX_PROMPT_CHARS, MIN_PROMPT_CHARS, sanitize};
use validator::SqlSafetyValidator;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
const MIN_PROMPT_WORDS: usize = 2;

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub prompt: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let prompt = self.prompt.trim();
        let length = prompt.chars().count();
        if !(MIN_PROMPT_CHARS..=MAX_PROMPT_CHARS).contains(&length) {
            return Err(PipelineError::InvalidInput(format!(
                "prompt must be between {} and {} characters",
                MIN_PROMPT_CHARS, MAX_PROMPT_CHARS
            )));
        }
        if prompt.split_whitespace().count() < MIN_PROMPT_WORDS {
            return Err(PipelineError::InvalidInput(format!(
                "prompt must contain at least {} words",
                MIN_PROMPT_WORDS
            )));
        }
        if self.page < 1 {
            return Err(PipelineError::InvalidInput("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(PipelineError::InvalidInput(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub data: Vec<Row>,
    pub columns: Vec<String>,
    pub visualization_type: VisualizationLabel,
    pub title: String,
    pub sql_query: String,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    /// Wall-clock seconds for the whole pipeline
    pub execution_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Sanitized,
    Generated,
    Validated,
    Executed,
    Classified,
    Completed,
    Failed(ErrorKind),
}

fn enter(stage: PipelineStage) {
    debug!("Pipeline stage: {:?}", stage);
}

/// Everything a request needs, built once at startup and shared by all
/// request tasks.
pub struct QueryPipeline {
    rate_limiter: RateLimiter,
    generator: SqlQueryGenerator,
    validator: SqlSafetyValidator,
    executor: PaginatedExecutor,
    classifier: VisualizationClassifier,
    schema: Arc<SchemaManager>,
    history: QueryHistory,
    reprompt_on_unsafe: bool,
    secrets: Vec<String>,
}

impl QueryPipeline {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn CompletionProvider>,
        text_classifier: Arc<dyn TextClassifier>,
        engine: Arc<dyn QueryEngine>,
        schema: Arc<SchemaManager>,
    ) -> Self {
        let cache_size =
            NonZeroUsize::new(config.classifier.cache_size).unwrap_or(NonZeroUsize::MIN);

        Self {
            rate_limiter: RateLimiter::new(
                config.pipeline.rate_limit_requests,
                config.pipeline.rate_limit_window(),
            ),
            generator: SqlQueryGenerator::new(provider, config.llm.timeout()),
            validator: SqlSafetyValidator::new(),
            executor: PaginatedExecutor::new(engine, config.database.query_timeout()),
            classifier: VisualizationClassifier::new(
                text_classifier,
                cache_size,
                config.classifier.timeout(),
            ),
            schema,
            history: QueryHistory::new(config.pipeline.history_size),
            reprompt_on_unsafe: config.pipeline.reprompt_on_unsafe,
            secrets: config.secrets(),
        }
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    pub fn generator(&self) -> &SqlQueryGenerator {
        &self.generator
    }

    pub fn executor(&self) -> &PaginatedExecutor {
        &self.executor
    }

    /// Runs one request end to end. Failures are logged here once and
    /// returned typed; nothing below this point maps errors to responses.
    pub async fn handle(
        &self,
        client_id: &str,
        request: &AnalysisRequest,
    ) -> PipelineResult<AnalysisResponse> {
        let result = self.run(client_id, request).await;

        if let Err(e) = &result {
            enter(PipelineStage::Failed(e.kind()));
            let prompt = redact(&request.prompt, &self.secrets);
            let message = redact(&e.to_string(), &self.secrets);
            match e.kind() {
                ErrorKind::InvalidInput | ErrorKind::RateLimited | ErrorKind::UnsafeQuery => {
                    warn!("Request from {} failed for prompt {:?}: {}", client_id, prompt, message)
                }
                ErrorKind::GenerationError | ErrorKind::ExecutionError => {
                    error!("Request from {} failed for prompt {:?}: {}", client_id, prompt, message)
                }
            }
        }

        result
    }

    async fn run(
        &self,
        client_id: &str,
        request: &AnalysisRequest,
    ) -> PipelineResult<AnalysisResponse> {
        let started = Instant::now();
        enter(PipelineStage::Received);

        if !self.rate_limiter.allow(client_id, started) {
            return Err(PipelineError::RateLimited(client_id.to_string()));
        }
        request.validate()?;

        let prompt = sanitize(&request.prompt)?;
        enter(PipelineStage::Sanitized);

        let schema = self.schema.ddl().await;
        let candidate = self.generator.generate(&prompt, &schema).await?;
        enter(PipelineStage::Generated);

        let sql = match self.validator.validate(&candidate) {
            Ok(sql) => sql,
            Err(PipelineError::UnsafeQuery(reason)) if self.reprompt_on_unsafe => {
                info!("Generated query rejected ({}), asking once more", reason);
                let retry = self
                    .generator
                    .regenerate(&prompt, &schema, &candidate, &reason)
                    .await?;
                self.validator.validate(&retry)?
            }
            Err(e) => return Err(e),
        };
        enter(PipelineStage::Validated);

        let pagination = Pagination::new(request.page, request.page_size);
        let result = self.executor.execute(&sql, pagination).await?;
        enter(PipelineStage::Executed);

        let visualization_type = self.classifier.classify(&prompt).await;
        enter(PipelineStage::Classified);

        let elapsed = started.elapsed();
        self.history.record(QueryHistoryItem {
            question: request.prompt.clone(),
            sql: sql.to_string(),
            execution_time_ms: elapsed.as_millis() as u64,
            row_count: result.total_count,
            visualization_type,
            timestamp: chrono::Utc::now(),
        });

        info!(
            "Answered prompt with {} of {} rows in {:.3}s",
            result.rows.len(),
            result.total_count,
            elapsed.as_secs_f64()
        );
        enter(PipelineStage::Completed);

        Ok(AnalysisResponse {
            data: result.rows,
            columns: result.columns,
            visualization_type,
            title: request.prompt.clone(),
            sql_query: sql.to_string(),
            total_count: result.total_count,
            page: result.page,
            page_size: result.page_size,
            total_pages: result.total_pages,
            execution_time: elapsed.as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::providers::DisabledClassifier;
    use crate::db::bootstrap::ensure_sales_table;
    use crate::db::db_pool::{DuckDBConnectionManager, IN_MEMORY};
    use crate::db::executor::DuckDbEngine;
    use crate::llm::LlmError;
    use crate::llm::models::ChatMessage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use r2d2::Pool;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with the queued answers in order.
    struct QueuedProvider {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl QueuedProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for QueuedProvider {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| LlmError::ResponseError("no reply queued".to_string()))
        }

        fn name(&self) -> &str {
            "queued"
        }
    }

    async fn pipeline_with(config: &AppConfig, provider: Arc<QueuedProvider>) -> QueryPipeline {
        let manager = DuckDBConnectionManager::new(IN_MEMORY.to_string(), false).unwrap();
        let pool = Pool::builder().max_size(2).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            ensure_sales_table(&conn, None).unwrap();
            conn.execute_batch(
                "INSERT INTO sales VALUES
                    (1, DATE '2024-01-05', 'Laptop', 'Electronics', 1200.0, 34),
                    (2, DATE '2024-01-19', 'Phone', 'Electronics', 800.0, 27),
                    (3, DATE '2024-02-02', 'Desk', 'Furniture', 300.0, 45);",
            )
            .unwrap();
        }

        let schema = Arc::new(SchemaManager::new(pool.clone()));
        schema.refresh_cache().await.unwrap();

        QueryPipeline::new(
            config,
            provider,
            Arc::new(DisabledClassifier),
            Arc::new(DuckDbEngine::new(pool)),
            schema,
        )
    }

    const TOTALS_BY_CATEGORY: &str = "```sql\nSELECT category, SUM(amount) AS total FROM sales \
        GROUP BY category ORDER BY total DESC\n```";

    #[tokio::test]
    async fn answers_prompt_with_rows_and_label() {
        let provider = QueuedProvider::new(&[TOTALS_BY_CATEGORY]);
        let pipeline = pipeline_with(&AppConfig::default(), provider.clone()).await;

        let response = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("Show total sales by category"))
            .await
            .unwrap();

        assert_eq!(response.total_count, 2);
        assert_eq!(response.total_pages, 1);
        assert_eq!(response.page, 1);
        assert_eq!(response.columns, vec!["category".to_string(), "total".to_string()]);
        let electronics = response
            .data
            .iter()
            .find(|row| row["category"] == "Electronics")
            .unwrap();
        assert_eq!(electronics["total"], 2000.0);
        assert_eq!(response.visualization_type, VisualizationLabel::Bar);
        assert_eq!(response.title, "Show total sales by category");
        assert!(response.sql_query.starts_with("SELECT category"));

        let history = pipeline.history().recent();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].row_count, 2);
    }

    #[tokio::test]
    async fn trend_prompt_is_labelled_line() {
        let provider = QueuedProvider::new(&["SELECT product, amount FROM sales"]);
        let pipeline = pipeline_with(&AppConfig::default(), provider).await;

        let response = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("Show sales trend by month"))
            .await
            .unwrap();
        assert_eq!(response.visualization_type, VisualizationLabel::Line);
        assert_eq!(response.total_count, 3);
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_the_model() {
        let provider = QueuedProvider::new(&[TOTALS_BY_CATEGORY]);
        let pipeline = pipeline_with(&AppConfig::default(), provider.clone()).await;

        for prompt in ["hi", "   ", "Revenue"] {
            let err = pipeline
                .handle("10.0.0.1", &AnalysisRequest::new(prompt))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "prompt {:?}", prompt);
        }

        let mut request = AnalysisRequest::new("Show total sales by category");
        request.page_size = 0;
        let err = pipeline.handle("10.0.0.1", &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn rate_limit_is_checked_first() {
        let mut config = AppConfig::default();
        config.pipeline.rate_limit_requests = 1;
        let provider = QueuedProvider::new(&[TOTALS_BY_CATEGORY, TOTALS_BY_CATEGORY]);
        let pipeline = pipeline_with(&config, provider.clone()).await;
        let request = AnalysisRequest::new("Show total sales by category");

        pipeline.handle("10.0.0.1", &request).await.unwrap();
        let err = pipeline.handle("10.0.0.1", &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(provider.calls(), 1);

        // other clients keep their own budget
        pipeline.handle("10.0.0.2", &request).await.unwrap();
    }

    #[tokio::test]
    async fn unsafe_query_is_rejected_without_reprompt() {
        let provider = QueuedProvider::new(&["DROP TABLE sales", TOTALS_BY_CATEGORY]);
        let pipeline = pipeline_with(&AppConfig::default(), provider.clone()).await;

        let err = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("Remove every sales record"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeQuery);
        assert_eq!(provider.calls(), 1);

        // table untouched
        let response = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("Show total sales by category"))
            .await
            .unwrap();
        assert_eq!(response.total_count, 2);
    }

    #[tokio::test]
    async fn reprompt_recovers_once() {
        let mut config = AppConfig::default();
        config.pipeline.reprompt_on_unsafe = true;
        let provider = QueuedProvider::new(&[
            "SELECT DISTINCT category FROM sales",
            "SELECT category FROM sales GROUP BY category",
        ]);
        let pipeline = pipeline_with(&config, provider.clone()).await;

        let response = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("List the sales categories"))
            .await
            .unwrap();
        assert_eq!(response.total_count, 2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn reprompt_fails_on_second_rejection() {
        let mut config = AppConfig::default();
        config.pipeline.reprompt_on_unsafe = true;
        let provider = QueuedProvider::new(&[
            "SELECT DISTINCT category FROM sales",
            "SELECT category FROM sales UNION SELECT product FROM sales",
            TOTALS_BY_CATEGORY,
        ]);
        let pipeline = pipeline_with(&config, provider.clone()).await;

        let err = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("List the sales categories"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeQuery);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn generation_failure_is_reported() {
        let provider = QueuedProvider::new(&[]);
        let pipeline = pipeline_with(&AppConfig::default(), provider).await;

        let err = pipeline
            .handle("10.0.0.1", &AnalysisRequest::new("Show total sales by category"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerationError);
        assert!(pipeline.history().recent().is_empty());
    }

    #[test]
    fn request_defaults_apply_when_fields_are_missing() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"prompt":"Show total sales"}"#).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 10);
        assert!(request.validate().is_ok());
    }
}
