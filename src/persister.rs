use crate::delta::Delta;
use crate::error::Error;
use crate::graph::{DbResource, GraphStoreClient};
use crate::graph::search::SearchIndexClient;
use crate::metadata::ReconciledResource;
use crate::pool::settle_all;
use crate::projection::StoredResource;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

const DELETE_RESOURCES_CONCURRENCY: usize = 5;
const DELETE_RESOURCES_BATCH: usize = 50;
const UPDATE_RESOURCES_CONCURRENCY: usize = 10;
const UPDATE_RESOURCES_BATCH: usize = 10;
const STORE_RESOURCES_CONCURRENCY: usize = 10;
const STORE_RESOURCES_BATCH: usize = 10;
const DELETE_RELATIONSHIPS_CONCURRENCY: usize = 5;
const DELETE_RELATIONSHIPS_BATCH: usize = 50;
const STORE_RELATIONSHIPS_CONCURRENCY: usize = 10;
const STORE_RELATIONSHIPS_BATCH: usize = 20;

/// The failed subsets collected across batches; feeds reconciliation.
#[derive(Debug, Default)]
pub struct PersistenceOutcome {
    pub failed_stores: HashSet<String>,
    pub failed_deletes: HashSet<String>,
}

/// Dual-store writer. Resource mutations hit the search index first; the
/// graph store only ever receives the subset the index accepted, so the
/// graph can never reference a resource the index does not know.
pub struct Persister {
    graph: GraphStoreClient,
    search: SearchIndexClient,
}

impl Persister {
    pub fn new(graph: GraphStoreClient, search: SearchIndexClient) -> Self {
        Self { graph, search }
    }

    pub async fn persist(&self, delta: &Delta) -> PersistenceOutcome {
        let mut outcome = PersistenceOutcome::default();

        let delete_results = settle_all(
            delta
                .resource_ids_to_delete
                .chunks(DELETE_RESOURCES_BATCH)
                .map(<[String]>::to_vec)
                .collect(),
            DELETE_RESOURCES_CONCURRENCY,
            |batch| async move { self.delete_resource_batch(batch).await },
        )
        .await;
        for result in delete_results.into_iter().flatten() {
            outcome.failed_deletes.extend(result);
        }

        let update_results = settle_all(
            delta
                .resources_to_update
                .chunks(UPDATE_RESOURCES_BATCH)
                .map(<[_]>::to_vec)
                .collect(),
            UPDATE_RESOURCES_CONCURRENCY,
            |batch| async move {
                let accepted = match self.search.update(&batch).await {
                    Ok(()) => batch,
                    Err(Error::UnprocessedSearchIndexResources { ids }) => {
                        let rejected: HashSet<&String> = ids.iter().collect();
                        batch
                            .into_iter()
                            .filter(|update| !rejected.contains(&update.id))
                            .collect()
                    }
                    Err(err) => return Err(err),
                };
                if !accepted.is_empty() {
                    self.graph.update_resources(&accepted).await?;
                }
                Ok(())
            },
        )
        .await;
        log_failures("updateResources", update_results);

        let store_results = settle_all(
            delta
                .resources_to_store
                .chunks(STORE_RESOURCES_BATCH)
                .map(<[_]>::to_vec)
                .collect(),
            STORE_RESOURCES_CONCURRENCY,
            |batch| async move { self.store_resource_batch(batch).await },
        )
        .await;
        for result in store_results.into_iter().flatten() {
            outcome.failed_stores.extend(result);
        }

        let delete_link_results = settle_all(
            delta
                .link_ids_to_delete
                .chunks(DELETE_RELATIONSHIPS_BATCH)
                .map(<[String]>::to_vec)
                .collect(),
            DELETE_RELATIONSHIPS_CONCURRENCY,
            |batch| async move { self.graph.delete_relationships(&batch).await },
        )
        .await;
        log_failures("deleteRelationships", delete_link_results);

        let store_link_results = settle_all(
            delta
                .links_to_add
                .chunks(STORE_RELATIONSHIPS_BATCH)
                .map(<[_]>::to_vec)
                .collect(),
            STORE_RELATIONSHIPS_CONCURRENCY,
            |batch| async move { self.graph.add_relationships(&batch).await },
        )
        .await;
        log_failures("storeRelationships", store_link_results);

        info!(
            event = "persistence_complete",
            failed_stores = outcome.failed_stores.len(),
            failed_deletes = outcome.failed_deletes.len(),
        );
        outcome
    }

    /// Returns the subset of the batch that failed to delete.
    async fn delete_resource_batch(
        &self,
        batch: Vec<String>,
    ) -> crate::error::Result<Vec<String>> {
        match self.search.delete_indexed(&batch).await {
            Ok(()) => match self.graph.delete_resources(&batch).await {
                Ok(()) => Ok(Vec::new()),
                Err(err) => {
                    warn!(error = %err, "graph delete failed; batch remains stored");
                    Ok(batch)
                }
            },
            Err(Error::UnprocessedSearchIndexResources { ids }) => {
                let rejected: HashSet<&String> = ids.iter().collect();
                let accepted: Vec<String> = batch
                    .iter()
                    .filter(|id| !rejected.contains(id))
                    .cloned()
                    .collect();
                if !accepted.is_empty() {
                    if let Err(err) = self.graph.delete_resources(&accepted).await {
                        warn!(error = %err, "graph delete failed; batch remains stored");
                        return Ok(batch);
                    }
                }
                Ok(ids)
            }
            // The whole batch is still in both stores.
            Err(err) => {
                warn!(error = %err, "deleteResources batch failed entirely");
                Ok(batch)
            }
        }
    }

    /// Returns the subset of the batch that failed to store.
    async fn store_resource_batch(
        &self,
        batch: Vec<StoredResource>,
    ) -> crate::error::Result<Vec<String>> {
        match self.search.index(&batch).await {
            Ok(()) => match self.graph.add_resources(&batch).await {
                Ok(()) => Ok(Vec::new()),
                Err(err) => {
                    warn!(error = %err, "graph store failed after index accepted batch");
                    Ok(batch.into_iter().map(|resource| resource.id).collect())
                }
            },
            Err(Error::UnprocessedSearchIndexResources { ids }) => {
                let rejected: HashSet<&String> = ids.iter().collect();
                let accepted: Vec<StoredResource> = batch
                    .iter()
                    .filter(|resource| !rejected.contains(&resource.id))
                    .cloned()
                    .collect();
                if !accepted.is_empty() {
                    if let Err(err) = self.graph.add_resources(&accepted).await {
                        warn!(error = %err, "graph store failed after index accepted batch");
                        return Ok(batch.into_iter().map(|resource| resource.id).collect());
                    }
                }
                Ok(ids)
            }
            // The index never accepted anything, so the graph gets nothing.
            Err(err) => {
                warn!(error = %err, "storeResources batch failed entirely");
                Ok(batch.into_iter().map(|resource| resource.id).collect())
            }
        }
    }
}

fn log_failures(phase: &str, results: Vec<crate::error::Result<()>>) {
    let failures = results.iter().filter(|result| result.is_err()).count();
    if failures > 0 {
        warn!(phase, count = failures, "persistence batches failed");
    }
}

/// Rebuilds the working resource set after persistence: resources whose
/// store failed never landed anywhere and are removed; resources whose
/// delete failed are still in the store and return with their pre-crawl
/// value.
pub fn reconcile(
    projected: &BTreeMap<String, StoredResource>,
    db_resources: &HashMap<String, DbResource>,
    outcome: &PersistenceOutcome,
) -> Vec<ReconciledResource> {
    let mut reconciled = Vec::new();
    for (id, resource) in projected {
        if outcome.failed_stores.contains(id) {
            continue;
        }
        if let Some(entry) = ReconciledResource::from_properties(id, &resource.properties) {
            reconciled.push(entry);
        }
    }
    for id in &outcome.failed_deletes {
        if let Some(db_resource) = db_resources.get(id) {
            if let Some(entry) = ReconciledResource::from_properties(id, &db_resource.properties) {
                reconciled.push(entry);
            }
        }
    }
    reconciled
}

/// Keys a projected working set by resource id for reconciliation.
pub fn projected_by_id(projected: Vec<StoredResource>) -> BTreeMap<String, StoredResource> {
    projected
        .into_iter()
        .map(|resource| (resource.id.clone(), resource))
        .collect()
}
