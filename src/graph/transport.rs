use crate::credentials::AccountCredentials;
use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value as JsonValue};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Tag header identifying this writer to the graph API.
const REQUESTER_HEADER: &str = "requester";
const REQUESTER_VALUE: &str = "discovery-process";

/// Seam to the graph API. Production uses the signed HTTP transport below;
/// tests swap in an in-memory store.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Executes one named GraphQL operation and returns its `data` field.
    async fn execute(
        &self,
        operation: &str,
        query: &str,
        variables: JsonValue,
    ) -> Result<JsonValue>;
}

/// Signed HTTP transport for the graph API. A connection closed prematurely
/// earns one automatic replay; payload-too-large and resolver-code-size
/// signals bail immediately so the adaptive paginator can react.
pub struct SignedGraphTransport {
    http: reqwest::Client,
    url: String,
    credentials: AccountCredentials,
}

impl SignedGraphTransport {
    pub fn new(url: impl Into<String>, credentials: AccountCredentials) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(60))
                .build()?,
            url: url.into(),
            credentials,
        })
    }

    async fn post_once(
        &self,
        operation: &str,
        query: &str,
        variables: &JsonValue,
    ) -> Result<JsonValue> {
        let body = json!({
            "operationName": operation,
            "query": query,
            "variables": variables,
        });
        let payload = serde_json::to_vec(&body)?;
        let timestamp = Utc::now().to_rfc3339();
        let signature = sign_payload(&self.credentials, &timestamp, &payload);

        let response = self
            .http
            .post(&self.url)
            .header("content-type", "application/json")
            .header(REQUESTER_HEADER, REQUESTER_VALUE)
            .header("x-cartographer-date", &timestamp)
            .header("x-cartographer-signature", signature)
            .body(payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if response.status() == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            return Err(Error::PayloadTooLarge);
        }

        let envelope: JsonValue = response.json().await.map_err(classify_reqwest_error)?;
        if let Some(errors) = envelope.get("errors").and_then(JsonValue::as_array) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("graph store request failed");
                return Err(classify_graph_error(message));
            }
        }

        envelope
            .get("data")
            .and_then(|data| data.get(operation))
            .cloned()
            .ok_or_else(|| crate::err!("graph store response carried no `{operation}` data"))
    }
}

#[async_trait]
impl GraphTransport for SignedGraphTransport {
    async fn execute(
        &self,
        operation: &str,
        query: &str,
        variables: JsonValue,
    ) -> Result<JsonValue> {
        retry_with_backoff(
            BackoffPolicy::single_retry(),
            operation,
            Error::is_connection_closed,
            || self.post_once(operation, query, &variables),
        )
        .await
    }
}

fn sign_payload(credentials: &AccountCredentials, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(credentials.secret_access_key().as_bytes())
        .expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn classify_reqwest_error(err: reqwest::Error) -> Error {
    let rendered = err.to_string();
    if rendered.contains("connection closed before message completed")
        || rendered.contains("premature")
    {
        Error::ConnectionClosedPrematurely
    } else {
        Error::Reqwest(err)
    }
}

/// Maps the graph API's error strings onto the recoverable-error taxonomy.
pub fn classify_graph_error(message: &str) -> Error {
    let lowered = message.to_lowercase();
    if lowered.contains("payload too large") {
        Error::PayloadTooLarge
    } else if lowered.contains("premature") {
        Error::ConnectionClosedPrematurely
    } else if lowered.contains("code size") {
        Error::ResolverCodeSize
    } else {
        Error::Message(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_classification() {
        assert!(matches!(
            classify_graph_error("Payload Too Large: 6MB limit"),
            Error::PayloadTooLarge
        ));
        assert!(matches!(
            classify_graph_error("premature close of connection"),
            Error::ConnectionClosedPrematurely
        ));
        assert!(matches!(
            classify_graph_error("The code size of GraphQL resolver exceeds the limit"),
            Error::ResolverCodeSize
        ));
        assert!(matches!(
            classify_graph_error("something else"),
            Error::Message(_)
        ));
    }
}
