use super::{bad_request, bearer, ErrorBody};
use crate::auth::{AuthProtocol, LoginChallenge, Principal, Session};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
    email: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    temporary_token: String,
    otp: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct VerifyTokenRequest {
    token: String,
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Passcode sent; temporary token issued", body = LoginChallenge),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 502, description = "Passcode delivery failed", body = ErrorBody),
    ),
    tag= "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login(
    auth: Extension<Arc<AuthProtocol>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match auth
        .login(&request.username, &request.password, &request.email)
        .await
    {
        Ok(challenge) => (StatusCode::OK, Json(challenge)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/verify-otp",
    request_body = VerifyOtpRequest,
    responses (
        (status = 200, description = "Session established", body = Session),
        (status = 401, description = "Invalid token or passcode", body = ErrorBody),
    ),
    tag= "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn verify_otp(
    auth: Extension<Arc<AuthProtocol>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match auth
        .verify_otp(&request.temporary_token, request.otp.trim())
        .await
    {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/verify-token",
    request_body = VerifyTokenRequest,
    responses (
        (status = 200, description = "Token is valid", body = Principal),
        (status = 401, description = "Token is invalid or expired", body = ErrorBody),
    ),
    tag= "auth"
)]
pub async fn verify_token(
    auth: Extension<Arc<AuthProtocol>>,
    payload: Option<Json<VerifyTokenRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match auth.verify_token(&request.token) {
        Ok(principal) => (StatusCode::OK, Json(principal)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/logout",
    responses (
        (status = 204, description = "Metering stopped for the caller"),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip(auth, headers))]
pub async fn logout(auth: Extension<Arc<AuthProtocol>>, headers: HeaderMap) -> impl IntoResponse {
    let token = match bearer(&headers) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };
    match auth.logout(token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
