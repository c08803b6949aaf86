//! Response envelope shared by every endpoint.
//!
//! Endpoint-specific responses embed `Envelope` with `#[serde(flatten)]` and
//! implement `ApiResponse` so generic code can reach the status and message.

use serde::{Deserialize, Serialize};

/// The `status` / `msg` pair every API response carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub status: i32,
    #[serde(rename = "msg")]
    pub message: String,
}

/// A deserializable API response with an envelope.
pub trait ApiResponse: serde::de::DeserializeOwned + Send + 'static {
    fn envelope(&self) -> &Envelope;

    fn status(&self) -> i32 {
        self.envelope().status
    }

    fn message(&self) -> &str {
        &self.envelope().message
    }
}

impl ApiResponse for Envelope {
    fn envelope(&self) -> &Envelope {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Login {
        #[serde(flatten)]
        envelope: Envelope,
        token: String,
    }

    impl ApiResponse for Login {
        fn envelope(&self) -> &Envelope {
            &self.envelope
        }
    }

    #[test]
    fn envelope_reads_msg_field() {
        let env: Envelope = serde_json::from_str(r#"{"status":0,"msg":"ok"}"#).unwrap();
        assert_eq!(env.status, 0);
        assert_eq!(env.message, "ok");
    }

    #[test]
    fn missing_fields_default() {
        let env: Envelope = serde_json::from_str("{}").unwrap();
        assert_eq!(env, Envelope::default());
    }

    #[test]
    fn endpoint_response_flattens_envelope() {
        let login: Login =
            serde_json::from_str(r#"{"status":10000,"msg":"","token":"t-1"}"#).unwrap();
        assert_eq!(login.status(), 10000);
        assert_eq!(login.message(), "");
        assert_eq!(login.token, "t-1");
    }

    #[test]
    fn html_is_not_escaped_on_the_way_out() {
        let env = Envelope {
            status: 0,
            message: "<b>&'</b>".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&env).unwrap(),
            r#"{"status":0,"msg":"<b>&'</b>"}"#
        );
    }
}
