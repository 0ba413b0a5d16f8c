//! HTTP handlers and the shared error/credential plumbing they use.

pub mod auth;
pub mod health;
pub mod plans;
pub mod register;
pub mod usage;
pub mod wallet;

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::{
    auth::{AuthProtocol, Principal},
    error::{Error, Result},
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl Error {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::OtpNotFound
            | Self::OtpExpired
            | Self::OtpMismatch => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::NoActivePlan => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::PendingApproval => StatusCode::CONFLICT,
            Self::QuotaExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::Notification(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Storage(err) => {
                error!("storage fault: {err}");
                "storage unavailable".to_string()
            }
            Self::Notification(reason) => {
                warn!("notification fault: {reason}");
                "passcode delivery failed".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub(crate) fn bad_request(message: &str) -> Response {
    Error::InvalidInput(message.to_string()).into_response()
}

/// Token from `Authorization: Bearer <token>`.
pub(crate) fn bearer(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Error::InvalidToken)
}

/// Caller behind a full token.
pub(crate) fn principal(headers: &HeaderMap, auth: &AuthProtocol) -> Result<Principal> {
    auth.authorize(bearer(headers)?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::{
        auth::{
            password::tests::cheap, protocol::tests::RecordingNotifier, token::tests::service,
            AuthConfig,
        },
        clock::ManualClock,
        ledger::{Identity, Ledger, MemoryLedger, NewIdentity, Role},
        wifimeter::{router, Services},
    };

    pub(crate) struct TestApp {
        pub(crate) app: Router,
        pub(crate) ledger: Arc<MemoryLedger>,
        pub(crate) notifier: Arc<RecordingNotifier>,
        pub(crate) services: Services,
    }

    impl TestApp {
        pub(crate) fn new() -> Self {
            let ledger = Arc::new(MemoryLedger::new());
            let notifier = Arc::new(RecordingNotifier::default());
            let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
            let services = Services::new(
                ledger.clone(),
                service(),
                AuthConfig::new(),
                notifier.clone(),
                clock,
                cheap(),
            );
            let app = router(&services);
            Self {
                app,
                ledger,
                notifier,
                services,
            }
        }

        pub(crate) async fn identity(&self, username: &str, password: &str, role: Role) -> Identity {
            self.ledger
                .create_identity(NewIdentity {
                    username: username.to_string(),
                    email: format!("{username}@example.com"),
                    role,
                    wallet_address: None,
                    password_hash: cheap().hash(password).unwrap(),
                    created_at: chrono::Utc::now(),
                })
                .await
                .unwrap()
        }

        /// Run login and passcode verification, returning the full token.
        pub(crate) async fn session(&self, username: &str, password: &str) -> String {
            let (status, body) = self
                .send(
                    "POST",
                    "/login",
                    None,
                    Some(serde_json::json!({
                        "username": username,
                        "password": password,
                        "email": format!("{username}@example.com"),
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            let temporary = body["temporary_token"].as_str().unwrap().to_string();
            let code = self.notifier.last_code().unwrap();

            let (status, body) = self
                .send(
                    "POST",
                    "/verify-otp",
                    None,
                    Some(serde_json::json!({ "temporary_token": temporary, "otp": code })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["access_token"].as_str().unwrap().to_string()
        }

        pub(crate) async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header("authorization", format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    request = request.header(CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .app
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }
    }
}
