pub mod batch;
pub mod first_order;
pub mod second_order;
pub mod tags;

use crate::domain::{Account, Resource, ResourceSet};
use crate::error::Result;
use crate::pool::settle_all;
use crate::provider::ProviderClient;
use std::collections::BTreeMap;
use tracing::{info, warn};

const FIRST_ORDER_CONCURRENCY: usize = 15;
const SECOND_ORDER_CONCURRENCY: usize = 10;

/// The three-tier enrichment pipeline plus tag synthesis. Each tier appends
/// to the working set; later tiers see everything earlier tiers produced.
pub struct EnrichmentPipeline {
    provider: ProviderClient,
}

impl EnrichmentPipeline {
    pub fn new(provider: ProviderClient) -> Self {
        Self { provider }
    }

    pub async fn run(
        &self,
        accounts: &BTreeMap<String, Account>,
        resources: &mut ResourceSet,
    ) -> Result<()> {
        let batch_added = self.run_batch_tier(accounts, resources).await;
        info!(event = "enrichment_batch_complete", added = batch_added);

        let first_order_added = self.run_first_order_tier(accounts, resources).await;
        info!(
            event = "enrichment_first_order_complete",
            added = first_order_added
        );

        let second_order_added = self.run_second_order_tier(accounts, resources).await;
        info!(
            event = "enrichment_second_order_complete",
            added = second_order_added
        );

        let tags_added = tags::synthesize_tags(resources);
        info!(event = "tag_synthesis_complete", added = tags_added);
        Ok(())
    }

    /// Tier A: per-(account, region) batch handlers for entities the
    /// aggregator does not reliably surface.
    async fn run_batch_tier(
        &self,
        accounts: &BTreeMap<String, Account>,
        resources: &mut ResourceSet,
    ) -> usize {
        let mut work = Vec::new();
        let mut managed_policies_assigned = false;
        for account in accounts.values() {
            if !account.is_eligible_for_discovery() {
                continue;
            }
            let Some(credentials) = account.credentials.clone() else {
                continue;
            };
            // The provider-owned policy catalogue is identical from every
            // account; one global pass suffices.
            if !managed_policies_assigned {
                work.push(batch::BatchWorkItem {
                    handler: batch::BatchHandlerKind::ProviderManagedPolicies,
                    account_id: account.account_id.clone(),
                    region: crate::domain::GLOBAL_REGION.to_string(),
                    credentials: credentials.clone(),
                });
                managed_policies_assigned = true;
            }
            for region in &account.regions {
                for handler in batch::REGIONAL_HANDLERS {
                    work.push(batch::BatchWorkItem {
                        handler,
                        account_id: account.account_id.clone(),
                        region: region.name.clone(),
                        credentials: credentials.clone(),
                    });
                }
            }
        }

        let snapshot = resources.clone();
        let outcomes = settle_all(work, batch::BATCH_CONCURRENCY, |item| {
            let client = self
                .provider
                .with_credentials(item.credentials.clone(), &item.region);
            let snapshot = &snapshot;
            async move {
                let produced = item.handler.collect(&client, &item, snapshot).await;
                match produced {
                    Ok(produced) => Ok(produced),
                    Err(err) => Err(crate::error::Error::with_context(
                        format!(
                            "batch handler {} failed for {}/{}",
                            item.handler.name(),
                            item.account_id,
                            item.region
                        ),
                        err,
                    )),
                }
            }
        })
        .await;

        collect_into(resources, outcomes)
    }

    /// Tier B: per-resource handlers keyed by baseline resource type.
    async fn run_first_order_tier(
        &self,
        accounts: &BTreeMap<String, Account>,
        resources: &mut ResourceSet,
    ) -> usize {
        let work = first_order::plan(accounts, resources);
        let outcomes = settle_all(work, FIRST_ORDER_CONCURRENCY, |item| {
            let client = self
                .provider
                .with_credentials(item.credentials.clone(), &item.region);
            async move { first_order::enrich(&client, item).await }
        })
        .await;
        collect_into(resources, outcomes)
    }

    /// Tier C runs only over Tier B output.
    async fn run_second_order_tier(
        &self,
        accounts: &BTreeMap<String, Account>,
        resources: &mut ResourceSet,
    ) -> usize {
        let work = second_order::plan(accounts, resources);
        let outcomes = settle_all(work, SECOND_ORDER_CONCURRENCY, |item| {
            let client = self
                .provider
                .with_credentials(item.credentials.clone(), &item.region);
            async move { second_order::enrich(&client, item).await }
        })
        .await;
        collect_into(resources, outcomes)
    }
}

fn collect_into(resources: &mut ResourceSet, outcomes: Vec<Result<Vec<Resource>>>) -> usize {
    let mut added = 0;
    let mut failures = 0;
    for outcome in outcomes {
        match outcome {
            Ok(produced) => {
                for resource in produced {
                    resources.insert(resource);
                    added += 1;
                }
            }
            Err(err) => {
                failures += 1;
                warn!(error = %err, "enrichment handler failed");
            }
        }
    }
    if failures > 0 {
        warn!(count = failures, "enrichment handlers reported failures");
    }
    added
}
