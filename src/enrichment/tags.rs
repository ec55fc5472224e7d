use crate::domain::{rels, types, RelationshipDescriptor, Resource, ResourceSet, GLOBAL_REGION};
use std::collections::BTreeMap;

/// Tier D: one global Tag resource per distinct `key=value` across the
/// working set, carrying an edge from the tag to every resource bearing it.
pub fn synthesize_tags(resources: &mut ResourceSet) -> usize {
    let mut carriers: BTreeMap<(String, String), (String, Vec<String>)> = BTreeMap::new();
    for resource in resources.iter() {
        if resource.resource_type == types::TAG {
            continue;
        }
        for tag in &resource.tags {
            carriers
                .entry((tag.key.clone(), tag.value.clone()))
                .or_insert_with(|| (resource.account_id.clone(), Vec::new()))
                .1
                .push(resource.id.clone());
        }
    }

    let added = carriers.len();
    for ((key, value), (account_id, carrier_ids)) in carriers {
        let name = format!("{key}={value}");
        let arn = format!("arn:aws:tags:::tag/{name}");
        let mut tag_resource = Resource::new(arn, types::TAG, account_id, GLOBAL_REGION)
            .with_resource_id(&name)
            .with_resource_name(&name);
        for carrier_id in carrier_ids {
            tag_resource.add_relationship(RelationshipDescriptor::arn(
                rels::ASSOCIATED_WITH,
                carrier_id,
            ));
        }
        resources.insert(tag_resource);
    }
    added
}
