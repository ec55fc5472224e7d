pub mod compute;
pub mod identity;
pub mod pagination;
pub mod services;
pub mod transport;

use crate::credentials::AccountCredentials;
use crate::error::Result;
use crate::throttle::{ThrottleLimit, ThrottleRegistry, TokenBucket};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One call against the cloud provider's API surface. The transport signs
/// the request with the supplied credentials and returns the decoded JSON
/// response body.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub service: String,
    pub action: String,
    pub region: String,
    pub body: JsonValue,
}

impl ProviderRequest {
    pub fn new(service: &str, action: &str, region: &str, body: JsonValue) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
            region: region.to_string(),
            body,
        }
    }
}

/// Seam to the provider's signed API surface. Production uses the HTTP
/// transport in [`transport`]; tests substitute in-memory fakes.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn call(
        &self,
        credentials: &AccountCredentials,
        request: ProviderRequest,
    ) -> Result<JsonValue>;
}

/// A provider adapter minted for one `(credentials, region)` pair. All
/// operations go through the shared throttle registry so that adapters
/// created for the same principal share each operation's ceiling.
#[derive(Clone)]
pub struct ProviderClient {
    transport: Arc<dyn ProviderTransport>,
    throttles: Arc<ThrottleRegistry>,
    credentials: AccountCredentials,
    region: String,
}

impl ProviderClient {
    pub fn new(
        transport: Arc<dyn ProviderTransport>,
        throttles: Arc<ThrottleRegistry>,
        credentials: AccountCredentials,
        region: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            throttles,
            credentials,
            region: region.into(),
        }
    }

    /// Re-mints this adapter for another region with the same principal.
    pub fn for_region(&self, region: &str) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            throttles: Arc::clone(&self.throttles),
            credentials: self.credentials.clone(),
            region: region.to_string(),
        }
    }

    /// Re-mints this adapter for another principal, e.g. after assuming an
    /// account's trust role.
    pub fn with_credentials(&self, credentials: AccountCredentials, region: &str) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            throttles: Arc::clone(&self.throttles),
            credentials,
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> &AccountCredentials {
        &self.credentials
    }

    pub(crate) fn bucket(&self, name: &str, limit: ThrottleLimit) -> Arc<TokenBucket> {
        self.throttles
            .bucket(name, self.credentials.principal(), &self.region, limit)
    }

    /// Issues an unthrottled call. Operations with a tabulated ceiling go
    /// through [`ProviderClient::call_throttled`] instead.
    pub(crate) async fn call(
        &self,
        service: &str,
        action: &str,
        body: JsonValue,
    ) -> Result<JsonValue> {
        self.transport
            .call(
                &self.credentials,
                ProviderRequest::new(service, action, &self.region, body),
            )
            .await
    }

    pub(crate) async fn call_throttled(
        &self,
        bucket_name: &str,
        limit: ThrottleLimit,
        service: &str,
        action: &str,
        body: JsonValue,
    ) -> Result<JsonValue> {
        self.bucket(bucket_name, limit).acquire().await;
        self.call(service, action, body).await
    }
}

/// Extracts `field` from a JSON response as an array, tolerating absence.
pub(crate) fn response_items(response: &JsonValue, field: &str) -> Vec<JsonValue> {
    response
        .get(field)
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Extracts a pagination token, treating empty strings as exhaustion.
pub(crate) fn response_token(response: &JsonValue, field: &str) -> Option<String> {
    response
        .get(field)
        .and_then(JsonValue::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
