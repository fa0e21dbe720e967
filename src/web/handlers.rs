//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, LatencySummary, ProbeOutcome, Store, UptimeStat};
use crate::probe::AgentKind;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ============================================================================
// Templates
// ============================================================================

const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

/// Shown instead of storage errors.
const NO_RECORDS: &str = "no records found";

// ============================================================================
// Errors
// ============================================================================

/// Handler errors. Storage failures are logged and never shown verbatim.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Storage(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": NO_RECORDS }))).into_response()
            }
            ApiError::Storage(msg) => {
                tracing::error!("Storage error while serving request: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": NO_RECORDS }))).into_response()
            }
        }
    }
}

/// Run a store operation off the async runtime.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Store) -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ApiError::Storage(e.to_string()))?
        .map_err(|e| ApiError::Storage(e.to_string()))
}

fn parse_since(since: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    since
        .filter(|s| !s.is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ApiError::BadRequest(format!("invalid since {:?}: {}", s, e)))
        })
        .transpose()
}

fn parse_agent(agent: Option<&str>) -> Result<Option<AgentKind>, ApiError> {
    agent
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<AgentKind>().map_err(|e| ApiError::BadRequest(e.to_string())))
        .transpose()
}

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard() -> impl IntoResponse {
    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", "Service Monitoring Dashboard")
        .replace("{{content}}", DASHBOARD_TEMPLATE);

    Html(page)
}

// ============================================================================
// API: Status and history
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> Result<Json<Vec<ProbeOutcome>>, ApiError> {
    let latest = with_store(&state, |store| store.latest_status()).await?;
    Ok(Json(latest))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
}

pub async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ProbeOutcome>>, ApiError> {
    let agent = parse_agent(query.agent.as_deref())?;
    let since = parse_since(query.since.as_deref())?;

    let rows = with_store(&state, move |store| store.history(agent, since)).await?;
    Ok(Json(rows))
}

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: Option<String>,
}

pub async fn handle_service_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<ProbeOutcome>>, ApiError> {
    let since = parse_since(query.since.as_deref())?;

    let rows = with_store(&state, move |store| store.service_history(&name, since)).await?;
    Ok(Json(rows))
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<UptimeStat>>, ApiError> {
    let since = parse_since(query.since.as_deref())?;

    let stats = with_store(&state, move |store| store.uptime(since)).await?;
    Ok(Json(stats))
}

pub async fn handle_latency(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<LatencySummary>, ApiError> {
    let since = parse_since(query.since.as_deref())?;

    with_store(&state, move |store| store.latency_summary(&name, since))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ============================================================================
// API: Delete
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub service: String,
    pub deleted: usize,
}

pub async fn handle_delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let service = name.clone();
    let deleted = with_store(&state, move |store| store.delete_all_for_service(&service)).await?;

    tracing::info!("Deleted {} records for service {}", deleted, name);
    Ok(Json(DeleteResponse { service: name, deleted }))
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e8b57"/>
        <path d="M15 55 L35 55 L45 30 L58 75 L68 50 L85 50" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    (
        [(axum::http::header::CONTENT_TYPE, "image/svg+xml")],
        svg
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("monitoring.db")).unwrap());
        (dir, AppState { store })
    }

    fn record(state: &AppState, name: &str, agent: AgentKind, at: DateTime<Utc>, latency: Option<f64>) {
        state
            .store
            .append(&ProbeOutcome {
                id: 0,
                service_name: name.to_string(),
                agent_type: agent,
                target: "10.0.0.1".to_string(),
                timestamp: at,
                success: latency.is_some(),
                response_time: latency,
            })
            .unwrap();
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_returns_latest_per_service() {
        let (_dir, state) = state();
        let t0 = Utc::now();
        record(&state, "a", AgentKind::Ping, t0, Some(1.0));
        record(&state, "a", AgentKind::Ping, t0 + ChronoDuration::seconds(1), None);
        record(&state, "b", AgentKind::Dns, t0, Some(2.0));

        let Json(rows) = handle_status(State(state)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].service_name, "a");
        assert!(!rows[0].success);
    }

    #[tokio::test]
    async fn test_history_filters_by_agent_and_since() {
        let (_dir, state) = state();
        let t0 = Utc::now() - ChronoDuration::hours(2);
        record(&state, "p", AgentKind::Ping, t0, Some(1.0));
        record(&state, "d", AgentKind::Dns, t0 + ChronoDuration::hours(1), Some(1.0));

        let query = HistoryQuery {
            agent: Some("dns".to_string()),
            since: None,
        };
        let Json(rows) = handle_history(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agent_type, AgentKind::Dns);

        let since = (t0 + ChronoDuration::minutes(30)).to_rfc3339();
        let query = HistoryQuery {
            agent: None,
            since: Some(since),
        };
        let Json(rows) = handle_history(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_name, "d");

        let Json(all) = handle_history(State(state), Query(HistoryQuery::default())).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_query_parameters() {
        let (_dir, state) = state();

        let query = HistoryQuery {
            agent: Some("smtp".to_string()),
            since: None,
        };
        let resp = handle_history(State(state.clone()), Query(query)).await.unwrap_err().into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let query = SinceQuery {
            since: Some("last tuesday".to_string()),
        };
        let resp = handle_uptime(State(state), Query(query)).await.unwrap_err().into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_confirms_and_is_idempotent() {
        let (_dir, state) = state();
        let t0 = Utc::now();
        record(&state, "x", AgentKind::Http, t0, Some(3.0));
        record(&state, "x", AgentKind::Http, t0 + ChronoDuration::seconds(1), Some(4.0));

        let Json(resp) = handle_delete_service(State(state.clone()), Path("x".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.service, "x");
        assert_eq!(resp.deleted, 2);

        let Json(again) = handle_delete_service(State(state.clone()), Path("x".to_string()))
            .await
            .unwrap();
        assert_eq!(again.deleted, 0);

        let Json(latest) = handle_status(State(state)).await.unwrap();
        assert!(latest.is_empty());
    }

    #[tokio::test]
    async fn test_latency_and_uptime() {
        let (_dir, state) = state();
        let t0 = Utc::now();
        record(&state, "h", AgentKind::Http, t0, Some(10.0));
        record(&state, "h", AgentKind::Http, t0 + ChronoDuration::seconds(1), None);

        let Json(summary) = handle_latency(
            State(state.clone()),
            Path("h".to_string()),
            Query(SinceQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(summary.samples, 1);

        let missing = handle_latency(
            State(state.clone()),
            Path("nope".to_string()),
            Query(SinceQuery::default()),
        )
        .await
        .unwrap_err()
        .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await["error"], NO_RECORDS);

        let Json(uptime) = handle_uptime(State(state), Query(SinceQuery::default())).await.unwrap();
        assert_eq!(uptime.len(), 1);
        assert!((uptime[0].uptime_percent - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_storage_errors_are_hidden() {
        let resp = ApiError::Storage("disk I/O error".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["error"], NO_RECORDS);
    }

    #[tokio::test]
    async fn test_dashboard_renders() {
        let resp = handle_dashboard().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("Service Monitoring Dashboard"));
        assert!(!html.contains("{{content}}"));

        // Trend charts read the history endpoints
        for id in ["trend-ping", "trend-dns", "trend-http", "trend-service"] {
            assert!(html.contains(id), "missing chart {}", id);
        }
        assert!(html.contains("/api/history?agent="));
        assert!(html.contains("/history'"));
    }
}
