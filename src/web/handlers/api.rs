use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::history::QueryHistoryItem;
use crate::pipeline::{AnalysisRequest, AnalysisResponse};
use crate::web::client::ClientId;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database_status: &'static str,
    pub ai_service_status: &'static str,
    /// Seconds since startup
    pub uptime: i64,
}

#[derive(Debug, Serialize)]
pub struct ExampleCategory {
    pub category: &'static str,
    pub prompts: &'static [&'static str],
}

const EXAMPLE_PROMPTS: &[ExampleCategory] = &[
    ExampleCategory {
        category: "Time analysis",
        prompts: &[
            "Show the evolution of sales by month",
            "Analyze the price trend over the last 6 months",
        ],
    },
    ExampleCategory {
        category: "Distribution",
        prompts: &[
            "Distribution of customer ages",
            "Frequency of sales amounts by category",
        ],
    },
    ExampleCategory {
        category: "Comparison",
        prompts: &[
            "Compare the performance of the different products",
            "Compare total sales by category",
        ],
    },
    ExampleCategory {
        category: "Proportion",
        prompts: &[
            "Percentage of revenue per category",
            "Share of sales by product",
        ],
    },
];

// POST /api/query
pub async fn query(
    State(state): State<Arc<AppState>>,
    ClientId(client_id): ClientId,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, PipelineError> {
    let Json(request) =
        payload.map_err(|rejection| PipelineError::InvalidInput(rejection.body_text()))?;

    info!("Processing query from {}", client_id);
    let response = state.pipeline.handle(&client_id, &request).await?;
    Ok(Json(response))
}

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database_ok = match state.pipeline.executor().ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Database health check failed: {}", e);
            false
        }
    };

    let ai_service_ok = match state.pipeline.generator().health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Language model {} health check failed: {}",
                state.pipeline.generator().provider_name(),
                e
            );
            false
        }
    };

    Json(HealthResponse {
        status: if database_ok { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database_status: if database_ok { "healthy" } else { "unhealthy" },
        ai_service_status: if ai_service_ok { "available" } else { "unavailable" },
        uptime: state.uptime_seconds(),
    })
}

// GET /api/examples
pub async fn examples() -> Json<&'static [ExampleCategory]> {
    Json(EXAMPLE_PROMPTS)
}

// GET /api/history
pub async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<QueryHistoryItem>> {
    Json(state.pipeline.history().recent())
}
