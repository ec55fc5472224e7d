pub mod paginator;
pub mod search;
pub mod transport;

use crate::domain::{Account, Edge};
use crate::error::{Context, Result};
use crate::graph::paginator::AdaptivePager;
use crate::graph::transport::GraphTransport;
use crate::projection::{ResourceUpdate, StoredResource};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const RESOURCE_PAGE_SIZE: u64 = 1000;
pub const RELATIONSHIP_PAGE_SIZE: u64 = 2500;

/// A resource as the graph store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct DbResource {
    pub id: String,
    pub label: String,
    pub md5_hash: Option<String>,
    pub properties: JsonMap<String, JsonValue>,
}

/// An edge as the graph store holds it; `id` addresses deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRelationship {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
}

const GET_RESOURCES: &str = "query GetResources($pagination: Pagination) { getResources(pagination: $pagination) { id label md5Hash properties } }";
const GET_RELATIONSHIPS: &str = "query GetRelationships($pagination: Pagination) { getRelationships(pagination: $pagination) { id source target label } }";
const GET_ACCOUNTS: &str = "query GetAccounts { getAccounts { accountId organizationId name isManagementAccount isIamRoleDeployed lastCrawled regions { name lastCrawled isConfigEnabled } } }";
const ADD_RESOURCES: &str = "mutation AddResources($resources: [ResourceInput]!) { addResources(resources: $resources) { id } }";
const UPDATE_RESOURCES: &str = "mutation UpdateResources($resources: [ResourceUpdateInput]!) { updateResources(resources: $resources) { id } }";
const DELETE_RESOURCES: &str = "mutation DeleteResources($resourceIds: [String]!) { deleteResources(resourceIds: $resourceIds) }";
const ADD_RELATIONSHIPS: &str = "mutation AddRelationships($relationships: [RelationshipInput]!) { addRelationships(relationships: $relationships) { id } }";
const DELETE_RELATIONSHIPS: &str = "mutation DeleteRelationships($relationshipIds: [String]!) { deleteRelationships(relationshipIds: $relationshipIds) }";
const ADD_ACCOUNTS: &str = "mutation AddAccounts($accounts: [AccountInput]!) { addAccounts(accounts: $accounts) { unprocessedAccounts } }";
const UPDATE_ACCOUNT: &str = "mutation UpdateAccount($account: AccountInput!) { updateAccount(account: $account) { accountId } }";
const DELETE_ACCOUNTS: &str = "mutation DeleteAccounts($accountIds: [String]!) { deleteAccounts(accountIds: $accountIds) { unprocessedAccounts } }";

/// Paged, signed client for the backing graph API.
#[derive(Clone)]
pub struct GraphStoreClient {
    transport: Arc<dyn GraphTransport>,
}

impl GraphStoreClient {
    pub fn new(transport: Arc<dyn GraphTransport>) -> Self {
        Self { transport }
    }

    /// Every stored resource, keyed by id. Pages adapt: a payload-too-large
    /// response halves the window and replays it; a success resets the page
    /// size. Null-valued properties are rejected on read.
    pub async fn get_resources(&self) -> Result<HashMap<String, DbResource>> {
        let mut pager = AdaptivePager::new(RESOURCE_PAGE_SIZE);
        let mut resources = HashMap::new();
        loop {
            let window = pager.window();
            let result = self
                .transport
                .execute(
                    "getResources",
                    GET_RESOURCES,
                    json!({ "pagination": { "start": window.start, "end": window.end } }),
                )
                .await;
            match result {
                Ok(page) => {
                    let items = page.as_array().cloned().unwrap_or_default();
                    if items.is_empty() {
                        return Ok(resources);
                    }
                    for item in items {
                        let resource = parse_db_resource(&item)?;
                        resources.insert(resource.id.clone(), resource);
                    }
                    pager.advance();
                }
                Err(err) if err.is_payload_too_large() => {
                    debug!(
                        start = window.start,
                        page_size = pager.page_size(),
                        "graph store rejected resource page; halving"
                    );
                    pager.halve()?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Every stored relationship. The loop issues one request past the
    /// final non-empty page; the store signals exhaustion with an empty
    /// result rather than a short one.
    pub async fn get_relationships(&self) -> Result<HashMap<String, DbRelationship>> {
        let mut pager = AdaptivePager::new(RELATIONSHIP_PAGE_SIZE);
        let mut relationships = HashMap::new();
        loop {
            let window = pager.window();
            let page = self
                .transport
                .execute(
                    "getRelationships",
                    GET_RELATIONSHIPS,
                    json!({ "pagination": { "start": window.start, "end": window.end } }),
                )
                .await?;
            let items = page.as_array().cloned().unwrap_or_default();
            if items.is_empty() {
                return Ok(relationships);
            }
            for item in items {
                let relationship = parse_db_relationship(&item)?;
                relationships.insert(edge_key_of(&relationship), relationship);
            }
            pager.advance();
        }
    }

    pub async fn get_accounts(&self) -> Result<Vec<Account>> {
        let data = self
            .transport
            .execute("getAccounts", GET_ACCOUNTS, json!({}))
            .await?;
        serde_json::from_value(data).context("failed to decode stored accounts")
    }

    pub async fn add_resources(&self, resources: &[StoredResource]) -> Result<()> {
        let payload: Vec<JsonValue> = resources.iter().map(StoredResource::to_input).collect();
        self.transport
            .execute("addResources", ADD_RESOURCES, json!({ "resources": payload }))
            .await?;
        Ok(())
    }

    pub async fn update_resources(&self, updates: &[ResourceUpdate]) -> Result<()> {
        let payload: Vec<JsonValue> = updates.iter().map(ResourceUpdate::to_input).collect();
        self.transport
            .execute(
                "updateResources",
                UPDATE_RESOURCES,
                json!({ "resources": payload }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_resources(&self, resource_ids: &[String]) -> Result<()> {
        self.transport
            .execute(
                "deleteResources",
                DELETE_RESOURCES,
                json!({ "resourceIds": resource_ids }),
            )
            .await?;
        Ok(())
    }

    pub async fn add_relationships(&self, relationships: &[Edge]) -> Result<()> {
        let payload: Vec<JsonValue> = relationships
            .iter()
            .map(|edge| {
                json!({
                    "source": edge.source,
                    "target": edge.target,
                    "label": edge.label,
                })
            })
            .collect();
        self.transport
            .execute(
                "addRelationships",
                ADD_RELATIONSHIPS,
                json!({ "relationships": payload }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_relationships(&self, relationship_ids: &[String]) -> Result<()> {
        self.transport
            .execute(
                "deleteRelationships",
                DELETE_RELATIONSHIPS,
                json!({ "relationshipIds": relationship_ids }),
            )
            .await?;
        Ok(())
    }

    pub async fn add_accounts(&self, accounts: &[JsonValue]) -> Result<()> {
        self.transport
            .execute("addAccounts", ADD_ACCOUNTS, json!({ "accounts": accounts }))
            .await?;
        Ok(())
    }

    pub async fn update_account(&self, account: JsonValue) -> Result<()> {
        self.transport
            .execute("updateAccount", UPDATE_ACCOUNT, json!({ "account": account }))
            .await?;
        Ok(())
    }

    pub async fn delete_accounts(&self, account_ids: &[String]) -> Result<()> {
        self.transport
            .execute(
                "deleteAccounts",
                DELETE_ACCOUNTS,
                json!({ "accountIds": account_ids }),
            )
            .await?;
        Ok(())
    }
}

/// Key under which a stored edge is diffed: `(source, label, target)`.
pub fn edge_key(source: &str, label: &str, target: &str) -> String {
    format!("{source}|{label}|{target}")
}

pub fn edge_key_of(relationship: &DbRelationship) -> String {
    edge_key(
        &relationship.source,
        &relationship.label,
        &relationship.target,
    )
}

fn parse_db_resource(item: &JsonValue) -> Result<DbResource> {
    let id = item
        .get("id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| crate::err!("stored resource missing id"))?
        .to_string();
    let label = item
        .get("label")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let md5_hash = item
        .get("md5Hash")
        .and_then(JsonValue::as_str)
        .filter(|hash| !hash.is_empty())
        .map(str::to_string);

    let mut properties = JsonMap::new();
    if let Some(raw) = item.get("properties") {
        let decoded = match raw {
            JsonValue::String(encoded) => serde_json::from_str(encoded).unwrap_or(JsonValue::Null),
            other => other.clone(),
        };
        if let JsonValue::Object(map) = decoded {
            for (key, value) in map {
                if !value.is_null() {
                    properties.insert(key, value);
                }
            }
        }
    }

    Ok(DbResource {
        id,
        label,
        md5_hash,
        properties,
    })
}

fn parse_db_relationship(item: &JsonValue) -> Result<DbRelationship> {
    let field = |name: &str| -> Result<String> {
        item.get(name)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::err!("stored relationship missing `{name}`"))
    };
    Ok(DbRelationship {
        id: field("id")?,
        source: field("source")?,
        target: field("target")?,
        label: field("label")?,
    })
}
