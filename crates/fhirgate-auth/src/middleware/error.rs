//! Error response handling for scope enforcement.
//!
//! `AuthError` renders as a FHIR OperationOutcome. Every outcome gets a fresh
//! id that is logged together with the error, so a client-visible id can be
//! matched to the server log line.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::error::AuthError;

/// FHIR JSON media type.
pub const FHIR_JSON: &str = "application/fhir+json";

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, oauth_error, issue_code) = error_details(&self);
        let message = self.to_string();
        let outcome_id = Uuid::new_v4().to_string();

        tracing::warn!(
            outcome_id = %outcome_id,
            status = status.as_u16(),
            category = %self.category(),
            error = %message,
            "Request rejected by scope enforcement"
        );

        let body = operation_outcome_json(&outcome_id, issue_code, oauth_error, &message);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));

        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(oauth_error, &message);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Extracts error details from an AuthError.
///
/// Returns (HTTP status, OAuth error code, FHIR issue code).
fn error_details(error: &AuthError) -> (StatusCode, &'static str, &'static str) {
    match error {
        AuthError::ResourceNotSupported { .. } | AuthError::OperationNotSupported { .. } => (
            StatusCode::NOT_IMPLEMENTED,
            "invalid_scope",
            "not-supported",
        ),
        AuthError::Security { .. } => (StatusCode::FORBIDDEN, "access_denied", "security"),
        AuthError::Forbidden { .. } => (StatusCode::FORBIDDEN, "insufficient_scope", "forbidden"),
        AuthError::InvalidToken { .. } => (StatusCode::UNAUTHORIZED, "invalid_token", "security"),
        AuthError::Configuration { .. } | AuthError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "exception",
        ),
    }
}

/// Builds the WWW-Authenticate header value for 401 responses.
///
/// Format: `Bearer realm="fhirgate", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(error: &str, description: &str) -> String {
    let escaped_desc = description.replace('\"', "\\\"");
    format!("Bearer realm=\"fhirgate\", error=\"{error}\", error_description=\"{escaped_desc}\"")
}

/// Creates a FHIR OperationOutcome JSON with a single error issue.
#[must_use]
pub fn operation_outcome_json(
    id: &str,
    code: &str,
    oauth_error: &str,
    diagnostics: &str,
) -> serde_json::Value {
    json!({
        "resourceType": "OperationOutcome",
        "id": id,
        "issue": [{
            "severity": "error",
            "code": code,
            "details": {
                "coding": [{
                    "system": "https://tools.ietf.org/html/rfc6749",
                    "code": oauth_error
                }]
            },
            "diagnostics": diagnostics
        }]
    })
}

// =============================================================================
// Tests
// =============================================================================
