use crate::credentials::AccountCredentials;
use crate::error::{Error, Result};
use crate::provider::{ProviderRequest, ProviderTransport};
use crate::retry::{is_transient, retry_with_backoff, BackoffPolicy};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Services whose API surface is global; calls are pinned to the partition
/// home region regardless of the adapter's region.
const GLOBAL_SERVICES: [&str; 3] = ["iam", "organizations", "sts"];
const PARTITION_HOME_REGION: &str = "us-east-1";

/// Signed HTTP transport for provider calls: JSON protocol, action in the
/// target header, SigV4 authorization derived from the adapter credentials.
pub struct HttpProviderTransport {
    http: reqwest::Client,
    retry: BackoffPolicy,
    endpoint_override: Option<String>,
}

impl HttpProviderTransport {
    pub fn new(custom_user_agent: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(REQUEST_TIMEOUT);
        if let Some(agent) = custom_user_agent {
            builder = builder.user_agent(agent.to_string());
        }
        Ok(Self {
            http: builder.build()?,
            retry: BackoffPolicy::standard(),
            endpoint_override: None,
        })
    }

    /// Routes every call to a fixed endpoint; used by local test rigs.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint_for(&self, service: &str, region: &str) -> String {
        if let Some(endpoint) = &self.endpoint_override {
            return endpoint.clone();
        }
        let region = if GLOBAL_SERVICES.contains(&service) {
            PARTITION_HOME_REGION
        } else {
            region
        };
        format!("https://{service}.{region}.amazonaws.com/")
    }

    async fn dispatch(
        &self,
        credentials: &AccountCredentials,
        request: &ProviderRequest,
    ) -> Result<JsonValue> {
        let endpoint = self.endpoint_for(&request.service, &request.region);
        // The signing scope must match the endpoint region, which differs
        // from the adapter region for global services.
        let signing_region = if GLOBAL_SERVICES.contains(&request.service.as_str()) {
            PARTITION_HOME_REGION
        } else {
            &request.region
        };
        let body = serde_json::to_vec(&request.body)?;
        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let signature = sign_request(
            credentials,
            &request.service,
            signing_region,
            &timestamp,
            &body,
        );

        let response = self
            .http
            .post(&endpoint)
            .header("content-type", "application/x-amz-json-1.1")
            .header(
                "x-amz-target",
                format!("{}.{}", request.service, request.action),
            )
            .header("x-amz-date", &timestamp)
            .header("x-amz-security-token", credentials.session_token())
            .header("authorization", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let payload: JsonValue = if status == reqwest::StatusCode::NO_CONTENT {
            JsonValue::Null
        } else {
            response.json().await.unwrap_or(JsonValue::Null)
        };

        if status.is_success() {
            return Ok(payload);
        }

        let code = payload
            .get("__type")
            .or_else(|| payload.get("code"))
            .and_then(JsonValue::as_str)
            .map(|code| code.rsplit('#').next().unwrap_or(code).to_string())
            .unwrap_or_else(|| status.as_u16().to_string());
        let message = payload
            .get("message")
            .or_else(|| payload.get("Message"))
            .and_then(JsonValue::as_str)
            .unwrap_or("request failed")
            .to_string();

        if status == reqwest::StatusCode::FORBIDDEN
            || code.contains("AccessDenied")
            || code.contains("UnauthorizedOperation")
        {
            return Err(Error::AccessDenied {
                service: request.service.clone(),
                action: request.action.clone(),
                account_id: None,
                region: Some(request.region.clone()),
            });
        }

        Err(Error::ProviderApi {
            service: request.service.clone(),
            action: request.action.clone(),
            code,
            message,
        })
    }
}

#[async_trait]
impl ProviderTransport for HttpProviderTransport {
    async fn call(
        &self,
        credentials: &AccountCredentials,
        request: ProviderRequest,
    ) -> Result<JsonValue> {
        let description = format!("{}:{}", request.service, request.action);
        retry_with_backoff(self.retry, &description, is_transient, || {
            self.dispatch(credentials, &request)
        })
        .await
    }
}

/// SigV4 authorization header for one JSON-protocol POST.
fn sign_request(
    credentials: &AccountCredentials,
    service: &str,
    region: &str,
    timestamp: &str,
    body: &[u8],
) -> String {
    let date = &timestamp[..8];
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let payload_hash = hex_digest(body);

    let canonical_request = format!(
        "POST\n/\n\nhost:{service}.{region}.amazonaws.com\nx-amz-date:{timestamp}\n\nhost;x-amz-date\n{payload_hash}"
    );
    let string_to_sign = format!(
        "{SIGNING_ALGORITHM}\n{timestamp}\n{scope}\n{}",
        hex_digest(canonical_request.as_bytes())
    );

    let secret = format!("AWS4{}", credentials.secret_access_key());
    let date_key = hmac(secret.as_bytes(), date.as_bytes());
    let region_key = hmac(&date_key, region.as_bytes());
    let service_key = hmac(&region_key, service.as_bytes());
    let signing_key = hmac(&service_key, b"aws4_request");
    let signature = hex_encode(&hmac(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{SIGNING_ALGORITHM} Credential={}/{scope}, SignedHeaders=host;x-amz-date, Signature={signature}",
        credentials.access_key_id
    )
}

fn hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn hex_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_fixed_inputs() {
        let credentials = AccountCredentials::new("AKIDEXAMPLE", "secret", "token", None);
        let first = sign_request(&credentials, "ec2", "eu-west-1", "20260801T000000Z", b"{}");
        let second = sign_request(&credentials, "ec2", "eu-west-1", "20260801T000000Z", b"{}");
        assert_eq!(first, second);
        assert!(first.starts_with(SIGNING_ALGORITHM));
        assert!(first.contains("AKIDEXAMPLE/20260801/eu-west-1/ec2/aws4_request"));
    }

    #[test]
    fn global_services_pin_to_partition_home() {
        let transport = HttpProviderTransport::new(None).unwrap();
        assert_eq!(
            transport.endpoint_for("iam", "eu-west-1"),
            "https://iam.us-east-1.amazonaws.com/"
        );
        assert_eq!(
            transport.endpoint_for("ec2", "eu-west-1"),
            "https://ec2.eu-west-1.amazonaws.com/"
        );
    }
}
