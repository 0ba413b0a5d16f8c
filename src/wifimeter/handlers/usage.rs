use super::{bad_request, principal, ErrorBody};
use crate::{
    auth::AuthProtocol,
    ledger::{PlanPurchase, UsagePoint, UsageRecord},
    metering::{require_user, Metering},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct PurchaseRequest {
    plan_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct UsageRequest {
    usage_mb: f64,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ProviderUsageRequest {
    username: String,
    usage_mb: f64,
}

#[utoipa::path(
    post,
    path= "/purchase-plan",
    request_body = PurchaseRequest,
    responses (
        (status = 201, description = "Plan purchased; metering started", body = PlanPurchase),
        (status = 404, description = "No such plan", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "usage"
)]
#[instrument(skip(auth, metering, headers, payload))]
pub async fn purchase_plan(
    auth: Extension<Arc<AuthProtocol>>,
    metering: Extension<Arc<Metering>>,
    headers: HeaderMap,
    payload: Option<Json<PurchaseRequest>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match metering.purchase_plan(&caller, request.plan_id).await {
        Ok(purchase) => (StatusCode::CREATED, Json(purchase)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path= "/data-usage",
    responses (
        (status = 200, description = "Caller's usage records, oldest first", body = [UsageRecord]),
    ),
    security(("bearer" = [])),
    tag= "usage"
)]
pub async fn usage_history(
    auth: Extension<Arc<AuthProtocol>>,
    metering: Extension<Arc<Metering>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match metering.usage_history(&caller).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/data-usage",
    request_body = UsageRequest,
    responses (
        (status = 201, description = "Usage recorded", body = UsageRecord),
        (status = 404, description = "No active plan", body = ErrorBody),
        (status = 422, description = "Quota exceeded", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "usage"
)]
#[instrument(skip(auth, metering, headers, payload))]
pub async fn log_usage(
    auth: Extension<Arc<AuthProtocol>>,
    metering: Extension<Arc<Metering>>,
    headers: HeaderMap,
    payload: Option<Json<UsageRequest>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = require_user(&caller) {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match metering.log_usage(caller.identity_id, request.usage_mb).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path= "/isp/data-usage",
    responses (
        (status = 200, description = "Usage of all identities summed per second", body = [UsagePoint]),
        (status = 403, description = "Caller is not a provider", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "usage"
)]
pub async fn usage_timeline(
    auth: Extension<Arc<AuthProtocol>>,
    metering: Extension<Arc<Metering>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match metering.usage_timeline(&caller).await {
        Ok(points) => Json(points).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/isp/log-data-usage",
    request_body = ProviderUsageRequest,
    responses (
        (status = 201, description = "Usage recorded for the user", body = UsageRecord),
        (status = 404, description = "No such user or no active plan", body = ErrorBody),
        (status = 422, description = "Quota exceeded", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "usage"
)]
#[instrument(skip(auth, metering, headers, payload))]
pub async fn log_usage_for(
    auth: Extension<Arc<AuthProtocol>>,
    metering: Extension<Arc<Metering>>,
    headers: HeaderMap,
    payload: Option<Json<ProviderUsageRequest>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match metering
        .log_usage_for(&caller, &request.username, request.usage_mb)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => err.into_response(),
    }
}
