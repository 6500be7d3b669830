use serde::Deserialize;

use crate::PolicyError;
use crate::response::ResponseData;

const BYTE_ORDER_MARK: char = '\u{feff}';
const INVALID_USER_KEY: &str = "Invalid User Key";
const ILLEGAL_ARGUMENTS: &str = "Illegal arguments";

/// Outer service reply. `data` carries a second, JSON-encoded document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEnvelope {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub request_token: Option<String>,
}

impl ServiceEnvelope {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(clean_response(raw)).map_err(|error| {
            PolicyError::UnreadableServerResponse {
                reason: format!("response envelope is not valid JSON: {error}"),
                message: None,
                data: None,
            }
        })
    }

    /// True when the service refused the request outright (bad key or arguments).
    pub fn is_rejected_request(&self) -> bool {
        matches!(
            self.message.as_deref(),
            Some(INVALID_USER_KEY) | Some(ILLEGAL_ARGUMENTS)
        )
    }

    pub fn decode_data(&self) -> Result<ResponseData, PolicyError> {
        let unreadable = |reason: String| PolicyError::UnreadableServerResponse {
            reason,
            message: self.message.clone(),
            data: self.data.clone(),
        };
        let Some(data) = self.data.as_deref() else {
            return Err(unreadable("response envelope has no data".to_string()));
        };
        serde_json::from_str(clean_response(data))
            .map_err(|error| unreadable(format!("response data is not valid JSON: {error}")))
    }
}

fn clean_response(raw: &str) -> &str {
    raw.trim_start_matches(|ch: char| ch == BYTE_ORDER_MARK || ch.is_whitespace())
        .trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_envelope_with_leading_bom() {
        let envelope = ServiceEnvelope::parse(
            "\u{feff}  {\"message\":\"ok\",\"data\":\"{}\",\"requestToken\":\"abc\"}\n",
        )
        .expect("parse envelope");
        assert_eq!(envelope.message.as_deref(), Some("ok"));
        assert_eq!(envelope.request_token.as_deref(), Some("abc"));
        assert!(!envelope.is_rejected_request());
        assert!(envelope.decode_data().is_ok());
    }

    #[test]
    fn missing_or_undecodable_data_is_unreadable() {
        let envelope = ServiceEnvelope::parse(r#"{"message":"Invalid User Key"}"#)
            .expect("parse envelope");
        assert!(envelope.is_rejected_request());
        match envelope.decode_data() {
            Err(PolicyError::UnreadableServerResponse { message, data, .. }) => {
                assert_eq!(message.as_deref(), Some("Invalid User Key"));
                assert!(data.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let envelope = ServiceEnvelope::parse(r#"{"message":"Illegal arguments","data":"oops"}"#)
            .expect("parse envelope");
        match envelope.decode_data() {
            Err(PolicyError::UnreadableServerResponse { data, .. }) => {
                assert_eq!(data.as_deref(), Some("oops"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn non_json_envelope_is_unreadable() {
        let err = ServiceEnvelope::parse("<html>502</html>").expect_err("not json");
        assert!(matches!(err, PolicyError::UnreadableServerResponse { .. }));
    }
}
