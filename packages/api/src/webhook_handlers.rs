// ABOUTME: Inbound webhook relay from the voice platform to a project's running program
// ABOUTME: Answers with a fallback action whenever the program cannot be reached

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::AppState;

const FALLBACK_MESSAGE: &str =
    "Sorry, this assistant is unavailable right now. Please try again in a moment.";

pub async fn relay_webhook(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Webhook for {} is not JSON: {}", project_id, e);
            return Json(fallback_action(&Value::Null));
        }
    };

    debug!(
        "Webhook for {} ({})",
        project_id,
        event_type(&payload).unwrap_or("unknown")
    );

    match state
        .orchestrator
        .forward_webhook(&project_id, &payload)
        .await
    {
        Ok(answer) => Json(answer),
        Err(e) => {
            warn!("Webhook for {} answered with fallback: {}", project_id, e);
            Json(fallback_action(&payload))
        }
    }
}

fn event_type(payload: &Value) -> Option<&str> {
    payload
        .get("message")
        .unwrap_or(payload)
        .get("type")
        .and_then(Value::as_str)
}

/// Structured answer the voice platform can act on without the program
pub fn fallback_action(payload: &Value) -> Value {
    match event_type(payload) {
        Some("assistant-request") => json!({
            "assistant": { "firstMessage": FALLBACK_MESSAGE },
            "fallback": true,
        }),
        _ => json!({
            "reply": FALLBACK_MESSAGE,
            "endCall": false,
            "fallback": true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_shape_follows_event_type() {
        let request = json!({ "message": { "type": "assistant-request" } });
        let fallback = fallback_action(&request);
        assert_eq!(fallback["assistant"]["firstMessage"], FALLBACK_MESSAGE);
        assert_eq!(fallback["fallback"], true);

        let transcript = json!({ "type": "transcript", "text": "hi" });
        let fallback = fallback_action(&transcript);
        assert_eq!(fallback["reply"], FALLBACK_MESSAGE);
        assert!(fallback.get("assistant").is_none());

        let fallback = fallback_action(&Value::Null);
        assert_eq!(fallback["endCall"], false);
    }
}
