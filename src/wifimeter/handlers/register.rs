use super::{bad_request, principal, ErrorBody};
use crate::{
    auth::AuthProtocol,
    ledger::{Identity, PendingRegistration, Role},
    registration::{Registration, Registrations},
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
    email: String,
    wallet_address: Option<String>,
    /// `user` (default) or `wifi_provider`.
    role: Option<String>,
}

/// Identity as returned to clients. Never carries the password hash.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IdentityView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            email: identity.email,
            role: identity.role,
            wallet_address: identity.wallet_address,
            created_at: identity.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PendingView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PendingRegistration> for PendingView {
    fn from(pending: PendingRegistration) -> Self {
        Self {
            id: pending.id,
            username: pending.username,
            email: pending.email,
            role: pending.role,
            wallet_address: pending.wallet_address,
            created_at: pending.created_at,
        }
    }
}

#[utoipa::path(
    post,
    path= "/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Registration queued for approval", body = PendingView),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Already registered or pending approval", body = ErrorBody),
    ),
    tag= "register"
)]
#[instrument(skip(registrations, payload))]
pub async fn register(
    registrations: Extension<Arc<Registrations>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    let role = match request.role.as_deref() {
        None => Role::User,
        Some(value) => match Role::parse(value) {
            Some(role) => role,
            None => return bad_request("Invalid role"),
        },
    };

    match registrations
        .register(Registration {
            username: request.username,
            password: request.password,
            email: request.email,
            wallet_address: request.wallet_address,
            role,
        })
        .await
    {
        Ok(pending) => (StatusCode::CREATED, Json(PendingView::from(pending))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path= "/isp/registrations",
    responses (
        (status = 200, description = "Registrations awaiting approval", body = [PendingView]),
        (status = 403, description = "Caller is not a provider", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "register"
)]
pub async fn list_pending(
    auth: Extension<Arc<AuthProtocol>>,
    registrations: Extension<Arc<Registrations>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match registrations.list_pending(&caller).await {
        Ok(pending) => Json(
            pending
                .into_iter()
                .map(PendingView::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/isp/registrations/{id}/approve",
    params(("id" = Uuid, Path, description = "Pending registration id")),
    responses (
        (status = 200, description = "Registration approved", body = IdentityView),
        (status = 404, description = "No such pending registration", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "register"
)]
#[instrument(skip(auth, registrations, headers))]
pub async fn approve(
    auth: Extension<Arc<AuthProtocol>>,
    registrations: Extension<Arc<Registrations>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match registrations.approve(&caller, id).await {
        Ok(identity) => Json(IdentityView::from(identity)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path= "/isp/registrations/{id}",
    params(("id" = Uuid, Path, description = "Pending registration id")),
    responses (
        (status = 204, description = "Registration rejected"),
        (status = 404, description = "No such pending registration", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "register"
)]
#[instrument(skip(auth, registrations, headers))]
pub async fn reject(
    auth: Extension<Arc<AuthProtocol>>,
    registrations: Extension<Arc<Registrations>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match registrations.reject(&caller, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
