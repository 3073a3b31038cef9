//! Web router using Axum

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rolecall_core::models::{
    ConfigPatch, EnterpriseOrg, EntitlementSnapshot, GlobalConfig, NewUsageSession, OrgPatch,
    UserPatch, UserView,
};
use rolecall_core::{
    HealthStatus, MeterService, RenewalInfo, SessionHistory, SessionReceipt, UpdateResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiResult;

type AppState = Arc<MeterService>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatesQuery {
    user_id: String,
    #[serde(default)]
    cursor: u64,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TimezoneRequest {
    timezone: String,
}

/// Create the web router
pub fn create_router(service: Arc<MeterService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/entitlements", get(entitlements_handler))
        .route("/updates", get(updates_handler))
        .route("/usage/sessions", post(record_session_handler))
        .route("/usage/history", get(history_handler))
        .route("/renewal", get(renewal_handler))
        .route("/users/{id}/timezone", post(timezone_handler))
        .route("/admin/orgs/{id}", patch(update_org_handler))
        .route("/admin/users/{id}", patch(update_user_handler))
        .route("/admin/config", put(update_config_handler))
        .route("/api/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

async fn entitlements_handler(
    State(service): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> ApiResult<Json<EntitlementSnapshot>> {
    let Query(query) = query?;
    Ok(Json(service.entitlements(&query.user_id, Utc::now()).await?))
}

/// Long-poll; the waiter is cancelled if the client goes away
async fn updates_handler(
    State(service): State<AppState>,
    query: Result<Query<UpdatesQuery>, QueryRejection>,
) -> ApiResult<Json<UpdateResponse>> {
    let Query(query) = query?;
    let response = service
        .poll_updates(&query.user_id, query.cursor, query.timeout_ms, Utc::now())
        .await?;
    Ok(Json(response))
}

async fn record_session_handler(
    State(service): State<AppState>,
    body: Result<Json<NewUsageSession>, JsonRejection>,
) -> ApiResult<Json<SessionReceipt>> {
    let Json(session) = body?;
    Ok(Json(service.record_session(session, Utc::now()).await?))
}

async fn history_handler(
    State(service): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> ApiResult<Json<SessionHistory>> {
    let Query(query) = query?;
    Ok(Json(service.usage_history(&query.user_id)?))
}

async fn renewal_handler(
    State(service): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> ApiResult<Json<RenewalInfo>> {
    let Query(query) = query?;
    Ok(Json(service.renewal(&query.user_id, Utc::now())?))
}

async fn timezone_handler(
    State(service): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<TimezoneRequest>, JsonRejection>,
) -> ApiResult<Json<UserView>> {
    let Path(user_id) = path?;
    let Json(request) = body?;
    let user = service
        .request_timezone_change(&user_id, &request.timezone, Utc::now())
        .await?;
    Ok(Json(UserView::from(&user)))
}

async fn update_org_handler(
    State(service): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<OrgPatch>, JsonRejection>,
) -> ApiResult<Json<EnterpriseOrg>> {
    let Path(org_id) = path?;
    let Json(patch) = body?;
    Ok(Json(service.update_org(&org_id, patch, Utc::now()).await?))
}

async fn update_user_handler(
    State(service): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<UserPatch>, JsonRejection>,
) -> ApiResult<Json<UserView>> {
    let Path(user_id) = path?;
    let Json(patch) = body?;
    let user = service.update_user(&user_id, patch, Utc::now()).await?;
    Ok(Json(UserView::from(&user)))
}

async fn update_config_handler(
    State(service): State<AppState>,
    body: Result<Json<ConfigPatch>, JsonRejection>,
) -> ApiResult<Json<GlobalConfig>> {
    let Json(patch) = body?;
    Ok(Json(service.update_config(patch, Utc::now()).await?))
}

async fn health_handler(State(service): State<AppState>) -> Json<HealthStatus> {
    Json(service.health())
}
