#![allow(dead_code)]

use async_trait::async_trait;
use cartographer::credentials::AccountCredentials;
use cartographer::domain::Account;
use cartographer::error::{Error, Result};
use cartographer::graph::transport::GraphTransport;
use cartographer::provider::{ProviderRequest, ProviderTransport};
use cartographer::throttle::ThrottleRegistry;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn test_credentials() -> AccountCredentials {
    AccountCredentials::new("AKIDTEST", "test-secret", "test-token", None)
}

pub fn account_with_credentials(account_id: &str, region: &str) -> Account {
    let mut account = Account::new(account_id).with_region(region);
    account.is_iam_role_deployed = Some(true);
    account.credentials = Some(test_credentials());
    account
}

pub fn throttles() -> Arc<ThrottleRegistry> {
    Arc::new(ThrottleRegistry::new())
}

#[derive(Clone)]
enum Scripted {
    Respond(JsonValue),
    AccessDenied,
}

/// Scripted provider transport: responses are keyed by `(service, action)`;
/// unscripted calls return an empty object.
#[derive(Default)]
pub struct FakeProviderTransport {
    scripted: Mutex<HashMap<(String, String), Scripted>>,
    calls: Mutex<Vec<(String, String, JsonValue)>>,
}

impl FakeProviderTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, service: &str, action: &str, response: JsonValue) {
        self.scripted.lock().unwrap().insert(
            (service.to_string(), action.to_string()),
            Scripted::Respond(response),
        );
    }

    pub fn deny(&self, service: &str, action: &str) {
        self.scripted.lock().unwrap().insert(
            (service.to_string(), action.to_string()),
            Scripted::AccessDenied,
        );
    }

    pub fn calls_to(&self, service: &str, action: &str) -> Vec<JsonValue> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called_service, called_action, _)| {
                called_service == service && called_action == action
            })
            .map(|(_, _, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl ProviderTransport for FakeProviderTransport {
    async fn call(
        &self,
        _credentials: &AccountCredentials,
        request: ProviderRequest,
    ) -> Result<JsonValue> {
        self.calls.lock().unwrap().push((
            request.service.clone(),
            request.action.clone(),
            request.body.clone(),
        ));
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get(&(request.service.clone(), request.action.clone()))
            .cloned();
        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::AccessDenied) => Err(Error::AccessDenied {
                service: request.service,
                action: request.action,
                account_id: None,
                region: Some(request.region),
            }),
            None => Ok(json!({})),
        }
    }
}

/// In-memory stand-in for the graph API and the search index behind it.
/// Records read windows and write traffic so tests can assert on the
/// adaptive paginator and the dual-store ordering.
#[derive(Default)]
pub struct InMemoryGraphStore {
    pub resources: Mutex<BTreeMap<String, JsonValue>>,
    pub relationships: Mutex<BTreeMap<String, JsonValue>>,
    pub accounts: Mutex<Vec<JsonValue>>,
    pub reject_index_ids: Mutex<HashSet<String>>,
    pub reject_delete_ids: Mutex<HashSet<String>>,
    pub fail_first_resource_page: AtomicBool,
    pub resource_windows: Mutex<Vec<(u64, u64)>>,
    pub relationship_requests: AtomicUsize,
    pub graph_stored_ids: Mutex<Vec<String>>,
    pub graph_deleted_ids: Mutex<Vec<String>>,
    pub search_accepted_ids: Mutex<Vec<String>>,
    next_edge_id: AtomicU64,
}

impl InMemoryGraphStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_resource(&self, id: &str, label: &str, md5: Option<&str>, properties: JsonValue) {
        self.resources.lock().unwrap().insert(
            id.to_string(),
            json!({
                "id": id,
                "label": label,
                "md5Hash": md5,
                "properties": properties,
            }),
        );
    }

    pub fn seed_relationship(&self, id: &str, source: &str, label: &str, target: &str) {
        self.relationships.lock().unwrap().insert(
            id.to_string(),
            json!({ "id": id, "source": source, "label": label, "target": target }),
        );
    }

    fn window(&self, variables: &JsonValue) -> (u64, u64) {
        let start = variables
            .pointer("/pagination/start")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);
        let end = variables
            .pointer("/pagination/end")
            .and_then(JsonValue::as_u64)
            .unwrap_or(u64::MAX);
        (start, end)
    }

    fn slice(map: &BTreeMap<String, JsonValue>, start: u64, end: u64) -> Vec<JsonValue> {
        map.values()
            .skip(start as usize)
            .take(end.saturating_sub(start) as usize)
            .cloned()
            .collect()
    }

    fn unprocessed(
        rejections: &Mutex<HashSet<String>>,
        requested: impl Iterator<Item = String>,
    ) -> Vec<String> {
        let rejections = rejections.lock().unwrap();
        requested
            .filter(|id| rejections.contains(id))
            .collect()
    }
}

#[async_trait]
impl GraphTransport for InMemoryGraphStore {
    async fn execute(
        &self,
        operation: &str,
        _query: &str,
        variables: JsonValue,
    ) -> Result<JsonValue> {
        match operation {
            "getResources" => {
                let (start, end) = self.window(&variables);
                self.resource_windows.lock().unwrap().push((start, end));
                if self.fail_first_resource_page.swap(false, Ordering::SeqCst) {
                    return Err(Error::PayloadTooLarge);
                }
                let resources = self.resources.lock().unwrap();
                Ok(JsonValue::Array(Self::slice(&resources, start, end)))
            }
            "getRelationships" => {
                self.relationship_requests.fetch_add(1, Ordering::SeqCst);
                let (start, end) = self.window(&variables);
                let relationships = self.relationships.lock().unwrap();
                Ok(JsonValue::Array(Self::slice(&relationships, start, end)))
            }
            "getAccounts" => Ok(self.accounts.lock().unwrap().clone().into()),
            "addResources" | "updateResources" => {
                let mut resources = self.resources.lock().unwrap();
                let mut stored = self.graph_stored_ids.lock().unwrap();
                for resource in variables
                    .get("resources")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                {
                    if let Some(id) = resource.get("id").and_then(JsonValue::as_str) {
                        stored.push(id.to_string());
                        resources.insert(id.to_string(), resource.clone());
                    }
                }
                Ok(json!([]))
            }
            "deleteResources" => {
                let mut resources = self.resources.lock().unwrap();
                let mut deleted = self.graph_deleted_ids.lock().unwrap();
                for id in variables
                    .get("resourceIds")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                {
                    if let Some(id) = id.as_str() {
                        deleted.push(id.to_string());
                        resources.remove(id);
                    }
                }
                Ok(json!(true))
            }
            "addRelationships" => {
                let mut relationships = self.relationships.lock().unwrap();
                for relationship in variables
                    .get("relationships")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                {
                    let id = format!(
                        "edge-{}",
                        self.next_edge_id.fetch_add(1, Ordering::SeqCst)
                    );
                    let mut stored = relationship.clone();
                    stored["id"] = json!(id);
                    relationships.insert(id, stored);
                }
                Ok(json!([]))
            }
            "deleteRelationships" => {
                let mut relationships = self.relationships.lock().unwrap();
                for id in variables
                    .get("relationshipIds")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                {
                    if let Some(id) = id.as_str() {
                        relationships.remove(id);
                    }
                }
                Ok(json!(true))
            }
            "indexResources" | "updateIndexedResources" => {
                let requested: Vec<String> = variables
                    .get("resources")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|resource| resource.get("id").and_then(JsonValue::as_str))
                    .map(str::to_string)
                    .collect();
                let unprocessed =
                    Self::unprocessed(&self.reject_index_ids, requested.iter().cloned());
                let mut accepted = self.search_accepted_ids.lock().unwrap();
                for id in requested {
                    if !unprocessed.contains(&id) {
                        accepted.push(id);
                    }
                }
                Ok(json!({ "unprocessedResources": unprocessed }))
            }
            "deleteIndexedResources" => {
                let requested: Vec<String> = variables
                    .get("resourceIds")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect();
                let unprocessed =
                    Self::unprocessed(&self.reject_delete_ids, requested.into_iter());
                Ok(json!({ "unprocessedResources": unprocessed }))
            }
            "addAccounts" | "deleteAccounts" => Ok(json!({ "unprocessedAccounts": [] })),
            "updateAccount" => {
                self.accounts
                    .lock()
                    .unwrap()
                    .push(variables.get("account").cloned().unwrap_or(JsonValue::Null));
                Ok(json!({ "accountId": "" }))
            }
            other => Err(Error::Message(format!("unscripted operation `{other}`"))),
        }
    }
}
