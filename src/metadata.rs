use crate::config::DiscoveryConfig;
use crate::domain::{Account, RegionMetadata, ResourceTypeCount, ResourcesRegionMetadata};
use crate::graph::GraphStoreClient;
use crate::pool::settle_all;
use chrono::Utc;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::{info, warn};

const ACCOUNT_MUTATION_CONCURRENCY: usize = 10;

/// The slice of a persisted resource the region rollup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledResource {
    pub id: String,
    pub account_id: String,
    pub region: String,
    pub resource_type: String,
}

impl ReconciledResource {
    pub fn from_properties(id: &str, properties: &JsonMap<String, JsonValue>) -> Option<Self> {
        let field = |key: &str| -> Option<String> {
            properties
                .get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        Some(Self {
            id: id.to_string(),
            account_id: field("accountId")?,
            region: field("awsRegion")?,
            resource_type: field("resourceType")?,
        })
    }
}

/// Rolls the reconciled working set up into per-account, per-region,
/// per-type counts.
pub fn aggregate(reconciled: &[ReconciledResource]) -> BTreeMap<String, ResourcesRegionMetadata> {
    let mut per_account: BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>> =
        BTreeMap::new();
    for resource in reconciled {
        *per_account
            .entry(resource.account_id.clone())
            .or_default()
            .entry(resource.region.clone())
            .or_default()
            .entry(resource.resource_type.clone())
            .or_default() += 1;
    }

    per_account
        .into_iter()
        .map(|(account_id, regions)| {
            let regions: Vec<RegionMetadata> = regions
                .into_iter()
                .map(|(name, types)| {
                    let resource_types: Vec<ResourceTypeCount> = types
                        .into_iter()
                        .map(|(resource_type, count)| ResourceTypeCount {
                            resource_type,
                            count,
                        })
                        .collect();
                    RegionMetadata {
                        count: resource_types.iter().map(|entry| entry.count).sum(),
                        name,
                        resource_types,
                    }
                })
                .collect();
            let metadata = ResourcesRegionMetadata {
                count: regions.iter().map(|region| region.count).sum(),
                regions,
            };
            (account_id, metadata)
        })
        .collect()
}

/// Attaches the rollup to each account and writes the account records back.
/// `lastCrawled` advances only for accounts whose trust role was assumed
/// this crawl; the persisted projection strips credentials and `toDelete`.
pub struct AccountWriter {
    config: DiscoveryConfig,
    graph: GraphStoreClient,
}

impl AccountWriter {
    pub fn new(config: DiscoveryConfig, graph: GraphStoreClient) -> Self {
        Self { config, graph }
    }

    pub async fn write_accounts(
        &self,
        accounts: &mut BTreeMap<String, Account>,
        metadata: BTreeMap<String, ResourcesRegionMetadata>,
    ) {
        let now = Utc::now().to_rfc3339();
        let mut to_add = Vec::new();
        let mut to_update = Vec::new();
        let mut to_delete = Vec::new();

        for account in accounts.values_mut() {
            if account.to_delete {
                to_delete.push(account.account_id.clone());
                continue;
            }
            let never_crawled = account.last_crawled.is_none();
            if let Some(rollup) = metadata.get(&account.account_id) {
                account.resources_region_metadata = Some(rollup.clone());
            }
            if account.is_iam_role_deployed == Some(true) {
                account.last_crawled = Some(now.clone());
                for region in &mut account.regions {
                    region.last_crawled = Some(now.clone());
                }
            }
            if self.config.organizations_mode() && never_crawled {
                to_add.push(account_input(account));
            } else {
                to_update.push(account_input(account));
            }
        }

        if !self.config.organizations_mode() {
            to_delete.clear();
        }

        let graph = &self.graph;
        let add_results = if to_add.is_empty() {
            Vec::new()
        } else {
            settle_all(vec![to_add], 1, |accounts| async move {
                graph.add_accounts(&accounts).await
            })
            .await
        };
        let update_results = settle_all(to_update, ACCOUNT_MUTATION_CONCURRENCY, |account| {
            async move { graph.update_account(account).await }
        })
        .await;
        let delete_results = if to_delete.is_empty() {
            Vec::new()
        } else {
            settle_all(vec![to_delete], 1, |account_ids| async move {
                graph.delete_accounts(&account_ids).await
            })
            .await
        };

        let failures = add_results
            .iter()
            .chain(update_results.iter())
            .chain(delete_results.iter())
            .filter(|result| result.is_err())
            .count();
        if failures > 0 {
            warn!(count = failures, "account mutations failed");
        }
        info!(
            event = "accounts_persisted",
            updated = update_results.len(),
            added = add_results.len(),
            deleted = delete_results.len(),
        );
    }
}

/// The persisted shape of an account: credentials never serialize, and the
/// crawl-internal `toDelete` marker is dropped here.
fn account_input(account: &Account) -> JsonValue {
    let mut value = serde_json::to_value(account).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.remove("toDelete");
    }
    value
}
