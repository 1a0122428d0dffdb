//! Report API
//!
//! Read-side HTTP surface for the dashboard: latest grade reports per
//! exercise, plus the cached statement bundle. The DELETE route is the
//! explicit reset action for one exercise's report.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

use crate::grader::{GradeReport, ReportStore};
use crate::store::{StatementCache, StoreClient};

#[derive(Clone)]
pub struct ApiState {
    pub reports: Arc<ReportStore>,
    pub store: StoreClient,
    pub statements: Arc<StatementCache>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/reports", get(list_reports))
        .route(
            "/reports/{exercise_id}",
            get(get_report).delete(reset_report),
        )
        .route("/statements", get(get_statements))
        .with_state(state)
}

async fn list_reports(State(state): State<ApiState>) -> Json<HashMap<String, GradeReport>> {
    Json(state.reports.snapshot())
}

async fn get_report(
    State(state): State<ApiState>,
    Path(exercise_id): Path<String>,
) -> Result<Json<GradeReport>, StatusCode> {
    state
        .reports
        .get(&exercise_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn reset_report(
    State(state): State<ApiState>,
    Path(exercise_id): Path<String>,
) -> StatusCode {
    if state.reports.reset(&exercise_id) {
        info!("Reset grade report for {}", exercise_id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_statements(
    State(state): State<ApiState>,
) -> Result<Json<HashMap<String, String>>, (StatusCode, String)> {
    state
        .statements
        .get(&state.store)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("{:#}", e)))
}
