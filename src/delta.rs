use crate::domain::{self, types, Edge, Resource, ResourceSet};
use crate::graph::{edge_key, DbRelationship, DbResource};
use crate::inference::lookup::{project_edges, LookupTables};
use crate::projection::{project, ResourceUpdate, StoredResource};
use serde_json::Map as JsonMap;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// The add/update/delete sets for both nodes and edges of one crawl.
#[derive(Debug, Default)]
pub struct Delta {
    pub resources_to_store: Vec<StoredResource>,
    pub resources_to_update: Vec<ResourceUpdate>,
    pub resource_ids_to_delete: Vec<String>,
    pub links_to_add: Vec<Edge>,
    pub link_ids_to_delete: Vec<String>,
}

/// Diffs the discovered working set against the stored graph. Edges whose
/// target never resolved are excluded from both sides of the diff.
pub fn compute_delta(
    resources: &ResourceSet,
    lookups: &LookupTables,
    db_resources: &HashMap<String, DbResource>,
    db_relationships: &HashMap<String, DbRelationship>,
) -> Delta {
    let mut delta = Delta::default();

    let config_edges = project_edges(resources, lookups);
    let config_edge_keys: HashSet<String> = config_edges
        .iter()
        .map(|edge| edge_key(&edge.source, &edge.label, &edge.target))
        .collect();

    delta.links_to_add = config_edges
        .into_iter()
        .filter(|edge| {
            !db_relationships.contains_key(&edge_key(&edge.source, &edge.label, &edge.target))
        })
        .collect();
    delta.link_ids_to_delete = db_relationships
        .iter()
        .filter(|(key, _)| !config_edge_keys.contains(*key))
        .map(|(_, relationship)| relationship.id.clone())
        .collect();

    let working_ids: HashSet<&str> = resources.ids().collect();
    delta.resource_ids_to_delete = db_resources
        .keys()
        .filter(|id| !working_ids.contains(id.as_str()))
        .cloned()
        .collect();

    for resource in resources.iter() {
        let stored = project(resource);
        match db_resources.get(&resource.id) {
            None => delta.resources_to_store.push(stored),
            Some(db_resource) => {
                if needs_update(resource, &stored, db_resource) {
                    delta
                        .resources_to_update
                        .push(update_payload(&stored, db_resource));
                }
            }
        }
    }

    info!(
        event = "delta_computed",
        stores = delta.resources_to_store.len(),
        updates = delta.resources_to_update.len(),
        deletes = delta.resource_ids_to_delete.len(),
        links_to_add = delta.links_to_add.len(),
        links_to_delete = delta.link_ids_to_delete.len(),
    );
    delta
}

/// The update-decision function: md5 for hash-set types, a one-time
/// backfill when supplementary configuration first appears, capture time
/// for the rest. Tag resources never update by capture time.
fn needs_update(resource: &Resource, stored: &StoredResource, db_resource: &DbResource) -> bool {
    if domain::uses_md5_change_detection(&resource.resource_type) {
        return stored.md5_hash != db_resource.md5_hash;
    }

    let db_supplementary = db_resource.properties.get("supplementaryConfiguration");
    let current_supplementary = stored.properties.get("supplementaryConfiguration");
    if db_supplementary.is_none() && current_supplementary.is_some() {
        return true;
    }

    if resource.resource_type == types::TAG {
        return false;
    }

    stored.properties.get("configurationItemCaptureTime")
        != db_resource.properties.get("configurationItemCaptureTime")
}

/// The update payload carries only the property keys whose values differ
/// from the stored copy.
fn update_payload(stored: &StoredResource, db_resource: &DbResource) -> ResourceUpdate {
    let mut properties = JsonMap::new();
    for (key, value) in &stored.properties {
        if db_resource.properties.get(key) != Some(value) {
            properties.insert(key.clone(), value.clone());
        }
    }
    ResourceUpdate {
        id: stored.id.clone(),
        md5_hash: stored.md5_hash.clone(),
        properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db_resource_for(resource: &Resource) -> DbResource {
        let stored = project(resource);
        DbResource {
            id: stored.id,
            label: stored.label,
            md5_hash: stored.md5_hash,
            properties: stored.properties,
        }
    }

    fn empty_lookups() -> LookupTables {
        LookupTables::build(&ResourceSet::new())
    }

    #[test]
    fn unchanged_resources_produce_no_mutations() {
        let resource = Resource::new(
            "arn:aws:ec2:eu-west-1:111:instance/i-1",
            types::EC2_INSTANCE,
            "111",
            "eu-west-1",
        );
        let mut db = HashMap::new();
        db.insert(resource.id.clone(), db_resource_for(&resource));
        let resources: ResourceSet = [resource].into_iter().collect();
        let lookups = LookupTables::build(&resources);

        let delta = compute_delta(&resources, &lookups, &db, &HashMap::new());
        assert!(delta.resources_to_store.is_empty());
        assert!(delta.resources_to_update.is_empty());
        assert!(delta.resource_ids_to_delete.is_empty());
    }

    #[test]
    fn capture_time_change_produces_minimal_update() {
        let mut resource = Resource::new(
            "arn:aws:ec2:eu-west-1:111:instance/i-1",
            types::EC2_INSTANCE,
            "111",
            "eu-west-1",
        );
        resource.configuration_item_capture_time = Some("2026-01-01T00:00:00Z".to_string());
        let mut db = HashMap::new();
        db.insert(resource.id.clone(), db_resource_for(&resource));

        resource.configuration_item_capture_time = Some("2026-02-01T00:00:00Z".to_string());
        let resources: ResourceSet = [resource].into_iter().collect();
        let lookups = LookupTables::build(&resources);

        let delta = compute_delta(&resources, &lookups, &db, &HashMap::new());
        assert_eq!(delta.resources_to_update.len(), 1);
        let update = &delta.resources_to_update[0];
        assert_eq!(
            update.properties.get("configurationItemCaptureTime"),
            Some(&json!("2026-02-01T00:00:00Z"))
        );
        assert!(!update.properties.contains_key("accountId"));
    }

    #[test]
    fn hash_set_type_updates_only_on_md5_change() {
        let task = Resource::new(
            "arn:aws:ecs:eu-west-1:111:task/c/t1",
            types::ECS_TASK,
            "111",
            "eu-west-1",
        );
        let mut db = HashMap::new();
        db.insert(task.id.clone(), db_resource_for(&task));

        // Capture time alone must not trigger an update for hash-set types.
        let mut changed = task.clone();
        changed.configuration_item_capture_time = Some("2026-02-01T00:00:00Z".to_string());
        let unchanged_md5 = {
            let db_entry = db.get_mut(&task.id).unwrap();
            db_entry.md5_hash = project(&changed).md5_hash.clone();
            db_entry.md5_hash.clone()
        };
        assert!(unchanged_md5.is_some());

        let resources: ResourceSet = [changed].into_iter().collect();
        let delta = compute_delta(&resources, &empty_lookups(), &db, &HashMap::new());
        assert!(delta.resources_to_update.is_empty());

        // A configuration change shifts the hash and forces the update.
        let mut reconfigured = task.clone();
        reconfigured.configuration = json!({ "lastStatus": "STOPPED" });
        let resources: ResourceSet = [reconfigured].into_iter().collect();
        let delta = compute_delta(&resources, &empty_lookups(), &db, &HashMap::new());
        assert_eq!(delta.resources_to_update.len(), 1);
    }

    #[test]
    fn tags_never_update_by_capture_time() {
        let mut tag = Resource::new("arn:aws:tags:::tag/env=prod", types::TAG, "111", "global");
        tag.configuration_item_capture_time = Some("2026-01-01T00:00:00Z".to_string());
        let mut db = HashMap::new();
        db.insert(tag.id.clone(), db_resource_for(&tag));

        tag.configuration_item_capture_time = Some("2026-02-01T00:00:00Z".to_string());
        let resources: ResourceSet = [tag].into_iter().collect();
        let delta = compute_delta(&resources, &empty_lookups(), &db, &HashMap::new());
        assert!(delta.resources_to_update.is_empty());
    }

    #[test]
    fn supplementary_backfill_triggers_update() {
        let resource = Resource::new(
            "arn:aws:ec2:eu-west-1:111:instance/i-1",
            types::EC2_INSTANCE,
            "111",
            "eu-west-1",
        );
        let mut db = HashMap::new();
        db.insert(resource.id.clone(), db_resource_for(&resource));

        let mut enriched = resource.clone();
        enriched.supplementary_configuration = json!({ "extra": true });
        let resources: ResourceSet = [enriched].into_iter().collect();
        let delta = compute_delta(&resources, &empty_lookups(), &db, &HashMap::new());
        assert_eq!(delta.resources_to_update.len(), 1);
    }

    #[test]
    fn vanished_resources_are_deleted() {
        let mut db = HashMap::new();
        let gone = Resource::new(
            "arn:aws:ec2:eu-west-1:111:instance/i-gone",
            types::EC2_INSTANCE,
            "111",
            "eu-west-1",
        );
        db.insert(gone.id.clone(), db_resource_for(&gone));

        let delta = compute_delta(&ResourceSet::new(), &empty_lookups(), &db, &HashMap::new());
        assert_eq!(delta.resource_ids_to_delete, vec![gone.id]);
    }

    #[test]
    fn edge_diff_excludes_unknown_targets() {
        use crate::domain::{rels, RelationshipDescriptor};

        let mut resources = ResourceSet::new();
        resources.insert(
            Resource::new("arn:a", types::EC2_INSTANCE, "111", "eu-west-1")
                .with_relationship(RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, "arn:b"))
                .with_relationship(RelationshipDescriptor::arn(
                    rels::ASSOCIATED_WITH,
                    "arn:not-in-set",
                )),
        );
        resources.insert(Resource::new("arn:b", types::EC2_VOLUME, "111", "eu-west-1"));
        let lookups = LookupTables::build(&resources);

        let delta = compute_delta(&resources, &lookups, &HashMap::new(), &HashMap::new());
        assert_eq!(delta.links_to_add.len(), 1);
        assert!(delta
            .links_to_add
            .iter()
            .all(|edge| edge.target != domain::UNKNOWN_TARGET));
    }

    #[test]
    fn stale_db_edges_are_deleted() {
        let mut db_relationships = HashMap::new();
        db_relationships.insert(
            edge_key("arn:a", "IS_ASSOCIATED_WITH", "arn:b"),
            DbRelationship {
                id: "edge-1".to_string(),
                source: "arn:a".to_string(),
                target: "arn:b".to_string(),
                label: "IS_ASSOCIATED_WITH".to_string(),
            },
        );
        let delta = compute_delta(
            &ResourceSet::new(),
            &empty_lookups(),
            &HashMap::new(),
            &db_relationships,
        );
        assert_eq!(delta.link_ids_to_delete, vec!["edge-1".to_string()]);
    }
}
