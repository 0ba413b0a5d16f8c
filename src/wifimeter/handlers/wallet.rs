use super::{bad_request, principal, register::IdentityView, ErrorBody};
use crate::{auth::AuthProtocol, registration::Registrations};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct WalletRequest {
    wallet_address: String,
}

#[utoipa::path(
    post,
    path= "/update-wallet",
    request_body = WalletRequest,
    responses (
        (status = 200, description = "Wallet attached", body = IdentityView),
        (status = 409, description = "Wallet already set or owned by someone else", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "wallet"
)]
#[instrument(skip(auth, registrations, headers, payload))]
pub async fn update_wallet(
    auth: Extension<Arc<AuthProtocol>>,
    registrations: Extension<Arc<Registrations>>,
    headers: HeaderMap,
    payload: Option<Json<WalletRequest>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    let Some(Json(request)) = payload else {
        return bad_request("Missing payload");
    };
    match registrations
        .update_wallet(&caller, &request.wallet_address)
        .await
    {
        Ok(identity) => Json(IdentityView::from(identity)).into_response(),
        Err(err) => err.into_response(),
    }
}
