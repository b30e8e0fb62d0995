//! Maps non-success responses onto typed errors
//!
//! The API reports failures with a JSON body most of the time, but not
//! always, so message extraction is best-effort and never fails itself.

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::transport::TransportResponse;

/// Builds a human-readable message from an error response body
///
/// JSON object bodies render as `"{error or reason}: {message}, payload: {payload}, other: {rest}"`
/// with empty sections left out. Anything else renders as `"{reason}: {body}"`,
/// or just the reason when the body is empty.
pub fn error_message(body: &str, reason: &str) -> String {
    if body.trim().is_empty() {
        return reason.to_string();
    }

    let mut fields = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => fields,
        _ => return format!("{}: {}", reason, body.trim()),
    };

    let message = take_non_empty(&mut fields, "message");
    let error = take_non_empty(&mut fields, "error");
    let payload = take_non_empty(&mut fields, "payload");

    let mut out = format!("{}:", error.unwrap_or_else(|| reason.to_string()));
    if let Some(message) = message {
        out.push(' ');
        out.push_str(&message);
    }
    if let Some(payload) = payload {
        out.push_str(", payload: ");
        out.push_str(&payload);
    }
    if !fields.is_empty() {
        out.push_str(", other: ");
        out.push_str(&Value::Object(fields).to_string());
    }
    out
}

/// Removes a field and renders it, treating null and empty values as absent
fn take_non_empty(fields: &mut Map<String, Value>, name: &str) -> Option<String> {
    match fields.remove(name)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Returns the body of a successful response, or the typed error for a failed one
pub fn classify(status: u16, body: String, reason: &str) -> Result<String, ApiError> {
    if (200..300).contains(&status) {
        return Ok(body);
    }

    let message = error_message(&body, reason);
    match status {
        404 => Err(ApiError::NotFound(message)),
        401 => Err(ApiError::Unauthorized(message)),
        _ => Err(ApiError::RequestFailed {
            status: Some(status),
            message,
        }),
    }
}

pub fn classify_response(response: TransportResponse) -> Result<String, ApiError> {
    classify(response.status, response.body, &response.reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_returns_body_unmodified() {
        let body = "{\"nick\": \"someone\"}".to_string();
        assert_eq!(classify(200, body.clone(), "OK").unwrap(), body);
        assert_eq!(classify(204, String::new(), "No Content").unwrap(), "");
    }

    #[test]
    fn test_404_with_json_message_is_not_found() {
        let err = classify(404, r#"{"message":"no such map"}"#.into(), "Not Found").unwrap_err();
        match err {
            ApiError::NotFound(message) => {
                assert!(message.contains("no such map"));
                assert_eq!(message, "Not Found: no such map");
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_401_is_unauthorized() {
        let err = classify(401, r#"{"message":"Unauthorized"}"#.into(), "Unauthorized").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_500_is_request_failed_with_status() {
        let err = classify(500, "{}".into(), "Internal Server Error").unwrap_err();
        match err {
            ApiError::RequestFailed { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "Internal Server Error:");
            }
            other => panic!("expected RequestFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_body_is_kept() {
        let err = classify(503, "Service Unavailable".into(), "Service Unavailable").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Request failed (503): Service Unavailable: Service Unavailable"
        );
    }

    #[test]
    fn test_empty_body_uses_reason() {
        assert_eq!(error_message("", "Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message("   ", "Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_error_field_replaces_reason() {
        let message = error_message(
            r#"{"error":"InvalidToken","message":"token expired","payload":{"id":3},"code":17}"#,
            "Bad Request",
        );
        assert_eq!(
            message,
            r#"InvalidToken: token expired, payload: {"id":3}, other: {"code":17}"#
        );
    }

    #[test]
    fn test_null_and_empty_fields_are_skipped() {
        let message = error_message(r#"{"message":"","error":null,"payload":[]}"#, "Conflict");
        assert_eq!(message, "Conflict:");
    }

    #[test]
    fn test_non_object_json_falls_back_to_text() {
        assert_eq!(error_message("[1,2]", "Bad Request"), "Bad Request: [1,2]");
        assert_eq!(error_message("\"oops\"", "Bad Request"), "Bad Request: \"oops\"");
    }
}
