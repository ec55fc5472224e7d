pub mod batch;
pub mod env_vars;
pub mod lookup;
pub mod normalize;
pub mod paths;
pub mod resource;
pub mod schema;

use crate::domain::{Account, RelationshipDescriptor, ResourceSet};
use crate::error::Result;
use crate::inference::lookup::LookupTables;
use crate::pool::settle_all;
use crate::provider::ProviderClient;
use std::collections::BTreeMap;
use tracing::{info, warn};

const PER_RESOURCE_CONCURRENCY: usize = 30;

/// A deferred mutation produced by an inference step. Handlers compute
/// patches against a read-only snapshot; the scheduler applies them on one
/// thread, so no relationship list is ever written concurrently.
#[derive(Debug, Clone)]
pub enum Patch {
    AddRelationship {
        resource_id: String,
        descriptor: RelationshipDescriptor,
    },
    SetSubnetId {
        resource_id: String,
        subnet_id: String,
    },
    SetPrivate {
        resource_id: String,
        private: bool,
    },
    ReplaceRelationship {
        resource_id: String,
        old: RelationshipDescriptor,
        new: RelationshipDescriptor,
    },
}

pub fn apply_patches(resources: &mut ResourceSet, patches: Vec<Patch>) {
    for patch in patches {
        match patch {
            Patch::AddRelationship {
                resource_id,
                descriptor,
            } => {
                if let Some(resource) = resources.get_mut(&resource_id) {
                    resource.add_relationship(descriptor);
                }
            }
            Patch::SetSubnetId {
                resource_id,
                subnet_id,
            } => {
                if let Some(resource) = resources.get_mut(&resource_id) {
                    resource.subnet_id = Some(subnet_id);
                }
            }
            Patch::SetPrivate {
                resource_id,
                private,
            } => {
                if let Some(resource) = resources.get_mut(&resource_id) {
                    resource.private = Some(private);
                }
            }
            Patch::ReplaceRelationship {
                resource_id,
                old,
                new,
            } => {
                if let Some(resource) = resources.get_mut(&resource_id) {
                    if let Some(slot) = resource
                        .relationships
                        .iter_mut()
                        .find(|candidate| **candidate == old)
                    {
                        *slot = new;
                    }
                }
            }
        }
    }
}

/// Synthesizes the edges the provider never surfaces: environment-variable
/// references, ENI owner inference, tag grouping, endpoint matching, and
/// the rest of the per-type rules.
pub struct RelationshipInferencer {
    provider: ProviderClient,
}

impl RelationshipInferencer {
    pub fn new(provider: ProviderClient) -> Self {
        Self { provider }
    }

    pub async fn run(
        &self,
        accounts: &BTreeMap<String, Account>,
        resources: &mut ResourceSet,
    ) -> Result<LookupTables> {
        let lookups = LookupTables::build(resources);

        let stage_one_patches =
            batch::run_stage_one(&self.provider, accounts, resources, &lookups).await;
        let stage_one_count = stage_one_patches.len();
        apply_patches(resources, stage_one_patches);
        info!(event = "inference_stage_one_complete", patches = stage_one_count);

        let snapshot = resources.clone();
        let work: Vec<_> = snapshot.iter().cloned().collect();
        let outcomes = settle_all(work, PER_RESOURCE_CONCURRENCY, |subject| {
            let client = accounts
                .get(&subject.account_id)
                .and_then(|account| account.credentials.clone())
                .map(|credentials| {
                    let region = if subject.is_global() {
                        self.provider.region().to_string()
                    } else {
                        subject.region.clone()
                    };
                    self.provider.with_credentials(credentials, &region)
                });
            let lookups = &lookups;
            let snapshot = &snapshot;
            async move {
                let mut patches = Vec::new();
                for descriptor in
                    schema::infer_schema_relationships(&subject, client.as_ref()).await?
                {
                    patches.push(Patch::AddRelationship {
                        resource_id: subject.id.clone(),
                        descriptor,
                    });
                }
                patches
                    .extend(resource::infer(&subject, lookups, snapshot, client.as_ref()).await?);
                Ok(patches)
            }
        })
        .await;

        let mut stage_two_patches = Vec::new();
        let mut failures = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(patches) => stage_two_patches.extend(patches),
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, "per-resource inference failed");
                }
            }
        }
        if failures > 0 {
            warn!(count = failures, "per-resource inference reported failures");
        }
        let stage_two_count = stage_two_patches.len();
        apply_patches(resources, stage_two_patches);
        info!(event = "inference_stage_two_complete", patches = stage_two_count);

        normalize::normalize_relationship_names(resources, &lookups);
        normalize::backfill_vpc_info(resources, &lookups);
        info!(event = "inference_post_passes_complete");

        Ok(lookups)
    }
}
