//! Typeform webhook endpoint.
//!
//! Extracts the contact identity and hidden UTM fields from the submission,
//! runs the reconciliation and is the only place reconciliation failures are
//! turned into HTTP statuses.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use utmbridge_crm::{AttributionFields, SubmissionIdentity};

use crate::reconcile::ReconcileError;
use crate::server::AppState;

/// Values pulled out of one form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub identity: SubmissionIdentity,
    pub attribution: AttributionFields,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(String),

    #[error("Payload has no form_response")]
    MissingFormResponse,

    #[error("Neither email nor phone found in answers")]
    MissingIdentity,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl WebhookError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            Self::MissingFormResponse => (StatusCode::BAD_REQUEST, "missing_form_response"),
            Self::MissingIdentity => (StatusCode::BAD_REQUEST, "missing_identity"),
            Self::Reconcile(err) => match err {
                ReconcileError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
                ReconcileError::NotFound { .. } => (StatusCode::NOT_FOUND, "lead_not_found"),
                ReconcileError::SearchFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "search_failed")
                }
                ReconcileError::UpdateFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "update_failed")
                }
                ReconcileError::Credentials(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "credentials_unavailable")
                }
                ReconcileError::Crm(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crm_unreachable"),
            },
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(http.status = status.as_u16(), error = code, %message, "Webhook failed");
        } else {
            tracing::warn!(http.status = status.as_u16(), error = code, %message, "Webhook rejected");
        }

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

/// Parses a Typeform webhook body.
///
/// The first `email` answer and the first `phone_number` answer form the
/// identity; at least one must be non-empty. Hidden fields supply the
/// attribution values.
pub fn parse_submission(body: &[u8]) -> Result<Submission, WebhookError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    let form = payload
        .get("form_response")
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        .ok_or(WebhookError::MissingFormResponse)?;

    let answers = form
        .get("answers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let email = first_answer(answers, "email", "email");
    let phone = first_answer(answers, "phone_number", "phone_number");
    let identity = SubmissionIdentity::new(email, phone).ok_or(WebhookError::MissingIdentity)?;

    let hidden = form.get("hidden").and_then(Value::as_object);
    let attribution =
        AttributionFields::from_lookup(|key| hidden.and_then(|h| h.get(key)).map(hidden_value));

    Ok(Submission {
        identity,
        attribution,
    })
}

fn first_answer(answers: &[Value], kind: &str, field: &str) -> Option<String> {
    answers
        .iter()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some(kind))
        .find_map(|a| a.get(field).and_then(Value::as_str))
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

fn hidden_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `POST {webhook_path}`
pub async fn receive(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let submission = parse_submission(&body)?;
    tracing::info!(
        email = submission.identity.email.as_deref(),
        phone = submission.identity.phone.as_deref(),
        utm_source = %submission.attribution.utm_source,
        "Form submission received"
    );

    let reconciled = state
        .engine
        .reconcile(&submission.identity, &submission.attribution)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "updated",
            "leadId": reconciled.lead_id,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use utmbridge_crm::{CredentialError, LeadId};

    fn parse(value: Value) -> Result<Submission, WebhookError> {
        parse_submission(value.to_string().as_bytes())
    }

    #[test]
    fn extracts_identity_and_hidden_fields() {
        let submission = parse(json!({
            "event_type": "form_response",
            "form_response": {
                "hidden": {
                    "utm_source": "facebook",
                    "utm_medium": "cpc",
                    "utm_campaign": null,
                    "utm_content": 17
                },
                "answers": [
                    { "type": "text", "text": "Olena" },
                    { "type": "email", "email": "first@b.com" },
                    { "type": "phone_number", "phone_number": "+380501112233" },
                    { "type": "email", "email": "second@b.com" }
                ]
            }
        }))
        .unwrap();

        assert_eq!(submission.identity.email.as_deref(), Some("first@b.com"));
        assert_eq!(submission.identity.phone.as_deref(), Some("+380501112233"));
        assert_eq!(
            submission.attribution.values(),
            ["facebook", "cpc", "", "17", ""]
        );
    }

    #[test]
    fn phone_alone_is_enough() {
        let submission = parse(json!({
            "form_response": {
                "answers": [{ "type": "phone_number", "phone_number": "+15550100" }]
            }
        }))
        .unwrap();
        assert_eq!(submission.identity.email, None);
        assert_eq!(submission.attribution, AttributionFields::default());
    }

    #[test]
    fn rejects_invalid_json() {
        let err = parse_submission(b"{not json").unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[test]
    fn rejects_missing_or_empty_form_response() {
        for payload in [
            json!({}),
            json!({ "form_response": {} }),
            json!({ "form_response": null }),
            json!([1, 2]),
        ] {
            let err = parse(payload).unwrap_err();
            assert!(matches!(err, WebhookError::MissingFormResponse));
        }
    }

    #[test]
    fn rejects_submission_without_identity() {
        let err = parse(json!({
            "form_response": {
                "hidden": { "utm_source": "google" },
                "answers": [
                    { "type": "email", "email": "" },
                    { "type": "text", "text": "hello" }
                ]
            }
        }))
        .unwrap_err();
        assert!(matches!(err, WebhookError::MissingIdentity));
    }

    #[tokio::test]
    async fn reconcile_failures_map_to_statuses() {
        let cases = [
            (ReconcileError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ReconcileError::NotFound { attempts: 10 }, StatusCode::NOT_FOUND),
            (
                ReconcileError::SearchFailed {
                    status: 502,
                    body: String::new(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ReconcileError::UpdateFailed {
                    lead_id: LeadId::new("1"),
                    status: 400,
                    body: String::new(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ReconcileError::Credentials(CredentialError::MissingAccessToken),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = WebhookError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn error_body_carries_code_and_message() {
        let response = WebhookError::MissingIdentity.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "missing_identity");
        assert_eq!(json["message"], "Neither email nor phone found in answers");
    }
}
