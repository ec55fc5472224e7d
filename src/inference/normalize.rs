use crate::domain::{
    name_qualifier_for, rels, types, RelationshipDescriptor, ResourceSet, NAME_QUALIFIED_TYPES,
};
use crate::inference::lookup::LookupTables;
use crate::inference::{apply_patches, Patch};
use serde_json::Value as JsonValue;

/// Many stored relationship names are unqualified (`Is contained in`). When
/// the target's type is in the normalization set and the name does not
/// already carry a qualifier, the type suffix is appended.
pub fn normalize_relationship_names(resources: &mut ResourceSet, lookups: &LookupTables) {
    for resource in resources.iter_mut() {
        let account_id = resource.account_id.clone();
        let region = resource.region.clone();
        for descriptor in &mut resource.relationships {
            if is_qualified(&descriptor.relationship_name) {
                continue;
            }
            let target_type = match descriptor.resource_type.as_deref() {
                Some(resource_type) => Some(resource_type.to_string()),
                None => {
                    let target = lookups.resolve_target_in(&account_id, &region, descriptor);
                    lookups.type_of(&target).map(str::to_string)
                }
            };
            if let Some(suffix) = target_type.as_deref().and_then(name_qualifier_for) {
                descriptor.relationship_name =
                    rels::qualified(&descriptor.relationship_name, suffix);
            }
        }
    }
}

fn is_qualified(relationship_name: &str) -> bool {
    NAME_QUALIFIED_TYPES
        .iter()
        .any(|(_, suffix)| relationship_name.ends_with(suffix))
}

/// Types that never receive VPC info backfill.
const BACKFILL_EXEMPT: [&str; 3] = [
    types::TAG,
    types::CONFIG_RESOURCE_COMPLIANCE,
    types::CLOUDFORMATION_STACK,
];

/// Derives `vpcId`, `subnetId`, and `availabilityZone` from a resource's
/// VPC and subnet edges; synthesizes a VPC containment edge when the
/// subnets agree on one and none was present.
pub fn backfill_vpc_info(resources: &mut ResourceSet, lookups: &LookupTables) {
    struct Backfill {
        resource_id: String,
        vpc_id: Option<String>,
        subnet_id: Option<String>,
        availability_zone: Option<String>,
        synthesized: Option<RelationshipDescriptor>,
    }

    let mut updates = Vec::new();
    for resource in resources.iter() {
        if BACKFILL_EXEMPT.contains(&resource.resource_type.as_str()) {
            continue;
        }

        let mut vpc_id = None;
        let mut subnet_arns = Vec::new();
        for descriptor in &resource.relationships {
            let target = lookups.resolve_target(resource, descriptor);
            match lookups.type_of(&target) {
                Some(types::EC2_VPC) => {
                    vpc_id = lookups.resource_id_of(&target).map(str::to_string);
                }
                Some(types::EC2_SUBNET)
                    if !descriptor.relationship_name.starts_with(rels::CONTAINS) =>
                {
                    subnet_arns.push(target);
                }
                _ => {}
            }
        }

        if vpc_id.is_none() && subnet_arns.is_empty() {
            continue;
        }

        let mut zones: Vec<String> = Vec::new();
        let mut subnet_vpcs: Vec<String> = Vec::new();
        for subnet_arn in &subnet_arns {
            if let Some(subnet) = resources.get(subnet_arn) {
                if let Some(zone) = subnet
                    .availability_zone
                    .clone()
                    .or_else(|| {
                        subnet
                            .configuration
                            .get("availabilityZone")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string)
                    })
                {
                    zones.push(zone);
                }
                if let Some(subnet_vpc) = subnet
                    .configuration
                    .get("vpcId")
                    .and_then(JsonValue::as_str)
                {
                    subnet_vpcs.push(subnet_vpc.to_string());
                }
            }
        }
        zones.sort();
        zones.dedup();
        subnet_vpcs.sort();
        subnet_vpcs.dedup();

        let synthesized = if vpc_id.is_none() && subnet_vpcs.len() == 1 {
            vpc_id = Some(subnet_vpcs[0].clone());
            Some(RelationshipDescriptor::resource_id(
                rels::qualified(rels::CONTAINED_IN, "Vpc"),
                types::EC2_VPC,
                &subnet_vpcs[0],
            ))
        } else {
            None
        };

        let subnet_id = if subnet_arns.len() == 1 {
            lookups
                .resource_id_of(&subnet_arns[0])
                .map(str::to_string)
        } else {
            None
        };

        updates.push(Backfill {
            resource_id: resource.id.clone(),
            vpc_id,
            subnet_id,
            availability_zone: (!zones.is_empty()).then(|| zones.join(",")),
            synthesized,
        });
    }

    let mut patches = Vec::new();
    for update in updates {
        if let Some(resource) = resources.get_mut(&update.resource_id) {
            if update.vpc_id.is_some() {
                resource.vpc_id = update.vpc_id;
            }
            if update.subnet_id.is_some() {
                resource.subnet_id = update.subnet_id;
            }
            if update.availability_zone.is_some() {
                resource.availability_zone = update.availability_zone;
            }
        }
        if let Some(descriptor) = update.synthesized {
            patches.push(Patch::AddRelationship {
                resource_id: update.resource_id,
                descriptor,
            });
        }
    }
    apply_patches(resources, patches);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resource;
    use serde_json::json;

    fn subnet(arn: &str, subnet_id: &str, az: &str, vpc: &str) -> Resource {
        let mut resource = Resource::new(arn, types::EC2_SUBNET, "111", "eu-west-1")
            .with_configuration(json!({ "vpcId": vpc, "availabilityZone": az }));
        resource.resource_id = subnet_id.to_string();
        resource.availability_zone = Some(az.to_string());
        resource
    }

    #[test]
    fn unqualified_names_gain_target_type_suffix() {
        let mut resources = ResourceSet::new();
        resources.insert(subnet("arn:subnet-1", "subnet-1", "eu-west-1a", "vpc-1"));
        resources.insert(
            Resource::new("arn:lambda", types::LAMBDA_FUNCTION, "111", "eu-west-1")
                .with_relationship(RelationshipDescriptor::resource_id(
                    rels::CONTAINED_IN,
                    types::EC2_SUBNET,
                    "subnet-1",
                )),
        );
        let lookups = LookupTables::build(&resources);
        normalize_relationship_names(&mut resources, &lookups);

        let function = resources.get("arn:lambda").unwrap();
        assert_eq!(
            function.relationships[0].relationship_name,
            "Is contained in Subnet"
        );
    }

    #[test]
    fn already_qualified_names_are_untouched() {
        let mut resources = ResourceSet::new();
        resources.insert(subnet("arn:subnet-1", "subnet-1", "eu-west-1a", "vpc-1"));
        resources.insert(
            Resource::new("arn:lambda", types::LAMBDA_FUNCTION, "111", "eu-west-1")
                .with_relationship(RelationshipDescriptor::resource_id(
                    "Is contained in Subnet",
                    types::EC2_SUBNET,
                    "subnet-1",
                )),
        );
        let lookups = LookupTables::build(&resources);
        normalize_relationship_names(&mut resources, &lookups);
        assert_eq!(
            resources.get("arn:lambda").unwrap().relationships[0].relationship_name,
            "Is contained in Subnet"
        );
    }

    #[test]
    fn subnets_backfill_zone_subnet_and_synthesized_vpc_edge() {
        let mut resources = ResourceSet::new();
        resources.insert(subnet("arn:subnet-1", "subnet-1", "eu-west-1a", "vpc-1"));
        resources.insert(subnet("arn:subnet-2", "subnet-2", "eu-west-1b", "vpc-1"));
        resources.insert(
            Resource::new("arn:lambda", types::LAMBDA_FUNCTION, "111", "eu-west-1")
                .with_relationship(RelationshipDescriptor::resource_id(
                    rels::CONTAINED_IN,
                    types::EC2_SUBNET,
                    "subnet-1",
                ))
                .with_relationship(RelationshipDescriptor::resource_id(
                    rels::CONTAINED_IN,
                    types::EC2_SUBNET,
                    "subnet-2",
                )),
        );
        let lookups = LookupTables::build(&resources);
        backfill_vpc_info(&mut resources, &lookups);

        let function = resources.get("arn:lambda").unwrap();
        assert_eq!(function.vpc_id.as_deref(), Some("vpc-1"));
        assert_eq!(
            function.availability_zone.as_deref(),
            Some("eu-west-1a,eu-west-1b")
        );
        assert_eq!(function.subnet_id, None);
        assert!(function
            .relationships
            .iter()
            .any(|descriptor| descriptor.relationship_name == "Is contained in Vpc"));
    }

    #[test]
    fn single_subnet_sets_subnet_id() {
        let mut resources = ResourceSet::new();
        resources.insert(subnet("arn:subnet-1", "subnet-1", "eu-west-1a", "vpc-1"));
        resources.insert(
            Resource::new("arn:rds", types::RDS_DB_INSTANCE, "111", "eu-west-1")
                .with_relationship(RelationshipDescriptor::resource_id(
                    rels::CONTAINED_IN,
                    types::EC2_SUBNET,
                    "subnet-1",
                )),
        );
        let lookups = LookupTables::build(&resources);
        backfill_vpc_info(&mut resources, &lookups);
        assert_eq!(
            resources.get("arn:rds").unwrap().subnet_id.as_deref(),
            Some("subnet-1")
        );
    }

    #[test]
    fn tags_are_exempt_from_backfill() {
        let mut resources = ResourceSet::new();
        resources.insert(subnet("arn:subnet-1", "subnet-1", "eu-west-1a", "vpc-1"));
        resources.insert(
            Resource::new("arn:tag", types::TAG, "111", "global").with_relationship(
                RelationshipDescriptor::resource_id(
                    rels::ASSOCIATED_WITH,
                    types::EC2_SUBNET,
                    "subnet-1",
                ),
            ),
        );
        let lookups = LookupTables::build(&resources);
        backfill_vpc_info(&mut resources, &lookups);
        assert!(resources.get("arn:tag").unwrap().vpc_id.is_none());
    }
}
