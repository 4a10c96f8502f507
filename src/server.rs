//! HTTP surface.
//!
//! - `GET /login?email=&password=` opens a session.
//! - `GET /inbox/latest?session_id=` returns the session's latest code.

use crate::error::{Error, ErrorCategory};
use crate::manager::{Lookup, SessionManager};
use crate::provider::MailConnector;
use crate::store::SessionId;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Builds the service router around `manager`.
pub fn router<C: MailConnector>(manager: SessionManager<C>) -> Router {
    Router::new()
        .route("/login", get(login::<C>))
        .route("/inbox/latest", get(latest_code::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginParams {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    session_id: String,
    status: &'static str,
    message: &'static str,
}

async fn login<C: MailConnector>(
    State(manager): State<SessionManager<C>>,
    Query(params): Query<LoginParams>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = required(params.email.as_deref(), "email")?;
    let password = required(params.password.as_deref(), "password")?;

    let id = manager.login(email, password).await?;

    Ok(Json(LoginResponse {
        session_id: id.to_string(),
        status: "ready",
        message: "Login successful",
    }))
}

// ── Latest code ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LatestParams {
    session_id: Option<String>,
}

async fn latest_code<C: MailConnector>(
    State(manager): State<SessionManager<C>>,
    Query(params): Query<LatestParams>,
) -> Result<Response, ApiError> {
    let id = SessionId::from(required(params.session_id.as_deref(), "session_id")?);

    let response = match manager.lookup(&id).await? {
        Lookup::Code(code) => (StatusCode::OK, code).into_response(),
        Lookup::Pending => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "pending" }))).into_response()
        }
    };
    Ok(response)
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, Error> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(Error::MissingParameter { name })
}

// ── Errors ─────────────────────────────────────────────────────────

/// Maps crate errors onto HTTP responses with a JSON `{error, detail}` body.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Authentication => StatusCode::FORBIDDEN,
            ErrorCategory::Session => StatusCode::UNAUTHORIZED,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Aborted => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn summary(&self) -> &'static str {
        match &self.0 {
            Error::MissingParameter { .. } => "Missing parameter",
            Error::Authentication { .. } => "Login failed",
            Error::NoMatchingMessage => "No matching email found",
            Error::NoCode => "No code found in latest email",
            Error::TransportAborted => "Mailbox temporarily unavailable",
            e => match e.category() {
                ErrorCategory::Validation => "Invalid request",
                ErrorCategory::Session => "Invalid or expired session",
                _ => "Internal error",
            },
        }
    }

    fn detail(&self) -> String {
        match &self.0 {
            Error::Authentication { .. } => {
                "Invalid credentials or IMAP access not enabled".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, category = %self.0.category(), "Request failed");
        }

        let body = json!({ "error": self.summary(), "detail": self.detail() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::MissingParameter { name: "email" }, StatusCode::BAD_REQUEST),
            (
                Error::UnsupportedDomain {
                    domain: "nowhere.example".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::SessionNotFound, StatusCode::UNAUTHORIZED),
            (
                Error::SessionUnrecoverable {
                    source: Box::new(Error::TransportAborted),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (Error::NoMatchingMessage, StatusCode::NOT_FOUND),
            (Error::NoCode, StatusCode::NOT_FOUND),
            (Error::TransportAborted, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::InvalidConfig {
                    message: "bad".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }

    #[test]
    fn test_required_rejects_blank() {
        assert_eq!(required(Some("x"), "email").unwrap(), "x");
        assert!(matches!(
            required(Some("  "), "email"),
            Err(Error::MissingParameter { name: "email" })
        ));
        assert!(required(None, "session_id").is_err());
    }
}
