use super::{bad_request, principal, ErrorBody};
use crate::{
    auth::AuthProtocol,
    catalog::PlanCatalog,
    ledger::{Plan, PlanDraft, PlanId},
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[utoipa::path(
    get,
    path= "/wifi-plans",
    responses (
        (status = 200, description = "All plans on offer", body = [Plan]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "plans"
)]
pub async fn list_plans(
    auth: Extension<Arc<AuthProtocol>>,
    catalog: Extension<Arc<PlanCatalog>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(err) = principal(&headers, &auth) {
        return err.into_response();
    }
    match catalog.list_plans().await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/wifi-plans",
    request_body = PlanDraft,
    responses (
        (status = 201, description = "Plan created", body = Plan),
        (status = 400, description = "Invalid plan", body = ErrorBody),
        (status = 403, description = "Caller is not a provider", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "plans"
)]
#[instrument(skip(auth, catalog, headers, payload))]
pub async fn create_plan(
    auth: Extension<Arc<AuthProtocol>>,
    catalog: Extension<Arc<PlanCatalog>>,
    headers: HeaderMap,
    payload: Option<Json<PlanDraft>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    let Some(Json(draft)) = payload else {
        return bad_request("Missing payload");
    };
    match catalog.create_plan(&caller, draft).await {
        Ok(plan) => (StatusCode::CREATED, Json(plan)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    put,
    path= "/wifi-plans/{id}",
    params(("id" = Uuid, Path, description = "Plan id")),
    request_body = PlanDraft,
    responses (
        (status = 200, description = "Plan updated", body = Plan),
        (status = 403, description = "Plan belongs to another provider", body = ErrorBody),
        (status = 404, description = "No such plan", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "plans"
)]
#[instrument(skip(auth, catalog, headers, payload))]
pub async fn update_plan(
    auth: Extension<Arc<AuthProtocol>>,
    catalog: Extension<Arc<PlanCatalog>>,
    headers: HeaderMap,
    Path(id): Path<PlanId>,
    payload: Option<Json<PlanDraft>>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    let Some(Json(draft)) = payload else {
        return bad_request("Missing payload");
    };
    match catalog.update_plan(&caller, id, draft).await {
        Ok(plan) => Json(plan).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path= "/wifi-plans/{id}",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses (
        (status = 204, description = "Plan deleted"),
        (status = 404, description = "No such plan", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "plans"
)]
#[instrument(skip(auth, catalog, headers))]
pub async fn delete_plan(
    auth: Extension<Arc<AuthProtocol>>,
    catalog: Extension<Arc<PlanCatalog>>,
    headers: HeaderMap,
    Path(id): Path<PlanId>,
) -> impl IntoResponse {
    let caller = match principal(&headers, &auth) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    match catalog.delete_plan(&caller, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::ledger::Role;
    use crate::wifimeter::handlers::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn provider_manages_own_plans() {
        let app = TestApp::new();
        app.identity("isp", "root", Role::Provider).await;
        let isp = app.session("isp", "root").await;

        let (status, plan) = app
            .send(
                "POST",
                "/wifi-plans",
                Some(&isp),
                Some(json!({ "name": "Basic", "capacity": 1000.0, "price": 5.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/wifi-plans/{}", plan["id"].as_str().unwrap());

        let (status, _) = app.send("GET", "/wifi-plans", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, plans) = app.send("GET", "/wifi-plans", Some(&isp), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plans.as_array().unwrap().len(), 1);

        let (status, updated) = app
            .send(
                "PUT",
                &uri,
                Some(&isp),
                Some(json!({ "name": "Basic+", "capacity": 2000.0, "price": 8.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Basic+");
        assert_eq!(updated["capacity"], 2000.0);

        let (status, _) = app.send("DELETE", &uri, Some(&isp), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.send("DELETE", &uri, Some(&isp), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn users_and_other_providers_cannot_edit() {
        let app = TestApp::new();
        app.identity("isp", "root", Role::Provider).await;
        app.identity("rival", "root2", Role::Provider).await;
        app.identity("alice", "s3cret", Role::User).await;
        let isp = app.session("isp", "root").await;
        let rival = app.session("rival", "root2").await;
        let alice = app.session("alice", "s3cret").await;

        let draft = json!({ "name": "Basic", "capacity": 1000.0, "price": 5.0 });
        let (status, _) = app
            .send("POST", "/wifi-plans", Some(&alice), Some(draft.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, plan) = app
            .send("POST", "/wifi-plans", Some(&isp), Some(draft.clone()))
            .await;
        let uri = format!("/wifi-plans/{}", plan["id"].as_str().unwrap());
        let (status, _) = app.send("PUT", &uri, Some(&rival), Some(draft)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_plan_is_bad_request() {
        let app = TestApp::new();
        app.identity("isp", "root", Role::Provider).await;
        let isp = app.session("isp", "root").await;

        let (status, _) = app
            .send(
                "POST",
                "/wifi-plans",
                Some(&isp),
                Some(json!({ "name": " ", "capacity": 1000.0, "price": 5.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/wifi-plans",
                Some(&isp),
                Some(json!({ "name": "Free", "capacity": 0.0, "price": 0.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
