use crate::domain::{
    rels, types, IdentifierType, RelationshipDescriptor, Resource, ResourceSet,
};
use crate::error::Result;
use crate::inference::env_vars::infer_env_var_relationships;
use crate::inference::lookup::LookupTables;
use crate::inference::Patch;
use crate::provider::ProviderClient;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Per-resource hard-coded inference. Dispatches on the subject's type and
/// returns deferred patches against the working set.
pub async fn infer(
    subject: &Resource,
    lookups: &LookupTables,
    snapshot: &ResourceSet,
    client: Option<&ProviderClient>,
) -> Result<Vec<Patch>> {
    let patches = match subject.resource_type.as_str() {
        types::APIGATEWAY_METHOD => gateway_method(subject),
        types::APPREGISTRY_APPLICATION => app_registry_application(subject, snapshot),
        types::CLOUDFRONT_DISTRIBUTION | types::CLOUDFRONT_STREAMING_DISTRIBUTION => {
            distribution(subject, lookups)
        }
        types::EC2_SECURITY_GROUP => security_group(subject),
        types::EC2_SUBNET => subnet(subject, snapshot),
        types::ECS_TASK => container_task(subject, lookups, snapshot),
        types::ECS_TASK_DEFINITION => task_definition(subject, lookups),
        types::EKS_NODEGROUP => nodegroup(subject, lookups),
        types::ELBV2_LISTENER => listener(subject),
        types::ELBV2_TARGET_GROUP => target_group(subject, lookups, client).await?,
        types::EVENTS_EVENT_BUS => event_bus(subject, lookups),
        types::IAM_ROLE | types::IAM_USER => principal_managed_policies(subject),
        types::IAM_INLINE_POLICY => inline_policy(subject, lookups),
        types::EC2_NETWORK_INTERFACE => network_interface(subject, lookups, snapshot),
        types::RDS_DB_INSTANCE => db_instance(subject),
        types::EC2_ROUTE_TABLE => route_table(subject),
        _ => Vec::new(),
    };
    Ok(patches)
}

fn add(subject: &Resource, descriptor: RelationshipDescriptor) -> Patch {
    Patch::AddRelationship {
        resource_id: subject.id.clone(),
        descriptor,
    }
}

/// A method whose integration URI invokes a function links to it.
fn gateway_method(subject: &Resource) -> Vec<Patch> {
    static INVOCATION: OnceLock<Regex> = OnceLock::new();
    let pattern = INVOCATION.get_or_init(|| {
        Regex::new(r"/functions/(?P<arn>arn:[^/]+)/invocations").expect("valid pattern")
    });

    let Some(uri) = subject
        .configuration
        .get("methodIntegration")
        .and_then(|integration| integration.get("uri"))
        .and_then(JsonValue::as_str)
    else {
        return Vec::new();
    };
    pattern
        .captures(uri)
        .and_then(|captures| captures.name("arn"))
        .map(|arn| {
            vec![add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, arn.as_str()),
            )]
        })
        .unwrap_or_default()
}

/// An application declaring an application tag inherits the synthesized
/// tag's relationships, renamed to `Contains`.
fn app_registry_application(subject: &Resource, snapshot: &ResourceSet) -> Vec<Patch> {
    let Some(tag_value) = subject
        .configuration
        .get("applicationTag")
        .and_then(|tag| tag.get("awsApplication"))
        .and_then(JsonValue::as_str)
    else {
        return Vec::new();
    };
    let tag_id = format!("arn:aws:tags:::tag/awsApplication={tag_value}");
    let Some(tag_resource) = snapshot.get(&tag_id) else {
        return Vec::new();
    };
    tag_resource
        .relationships
        .iter()
        .map(|inherited| {
            let mut descriptor = inherited.clone();
            descriptor.relationship_name = rels::CONTAINS.to_string();
            add(subject, descriptor)
        })
        .collect()
}

/// Bucket targets are rewritten to the canonical bucket ARN; origin domains
/// that belong to a known load balancer link the distribution to it.
fn distribution(subject: &Resource, lookups: &LookupTables) -> Vec<Patch> {
    let mut patches = Vec::new();

    for existing in &subject.relationships {
        if existing.resource_type.as_deref() == Some(types::S3_BUCKET)
            && existing.identifier_type != IdentifierType::Arn
        {
            let mut canonical = existing.clone();
            canonical.identifier_type = IdentifierType::Arn;
            canonical.identifier_value = format!("arn:aws:s3:::{}", existing.identifier_value);
            patches.push(Patch::ReplaceRelationship {
                resource_id: subject.id.clone(),
                old: existing.clone(),
                new: canonical,
            });
        }
    }

    let origins = subject
        .configuration
        .pointer("/distributionConfig/origins/items")
        .or_else(|| subject.configuration.pointer("/distributionConfig/origins"))
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    for origin in origins {
        let Some(domain) = origin.get("domainName").and_then(JsonValue::as_str) else {
            continue;
        };
        if let Some(info) = lookups.elb_dns_to_resource.get(domain) {
            patches.push(add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, &info.resource_id),
            ));
        }
    }
    patches
}

/// Every group referenced by an ingress or egress rule, deduped.
fn security_group(subject: &Resource) -> Vec<Patch> {
    let mut referenced = BTreeSet::new();
    for rules_key in ["ipPermissions", "ipPermissionsEgress"] {
        let Some(rules) = subject
            .configuration
            .get(rules_key)
            .and_then(JsonValue::as_array)
        else {
            continue;
        };
        for rule in rules {
            let Some(pairs) = rule.get("userIdGroupPairs").and_then(JsonValue::as_array) else {
                continue;
            };
            for pair in pairs {
                if let Some(group_id) = pair.get("groupId").and_then(JsonValue::as_str) {
                    referenced.insert(group_id.to_string());
                }
            }
        }
    }

    referenced
        .into_iter()
        .map(|group_id| {
            add(
                subject,
                RelationshipDescriptor::resource_id(
                    rels::ASSOCIATED_WITH_SECURITY_GROUP,
                    types::EC2_SECURITY_GROUP,
                    group_id,
                ),
            )
        })
        .collect()
}

/// A subnet is private iff its route table carries no NAT-gateway route.
fn subnet(subject: &Resource, snapshot: &ResourceSet) -> Vec<Patch> {
    let mut patches = vec![Patch::SetSubnetId {
        resource_id: subject.id.clone(),
        subnet_id: subject.resource_id.clone(),
    }];

    let subnet_vpc = subject
        .configuration
        .get("vpcId")
        .and_then(JsonValue::as_str);

    let route_table = snapshot
        .of_type(types::EC2_ROUTE_TABLE)
        .find(|candidate| {
            associations_of(candidate).iter().any(|association| {
                association.get("subnetId").and_then(JsonValue::as_str)
                    == Some(subject.resource_id.as_str())
            })
        })
        .or_else(|| {
            snapshot.of_type(types::EC2_ROUTE_TABLE).find(|candidate| {
                candidate.configuration.get("vpcId").and_then(JsonValue::as_str) == subnet_vpc
                    && associations_of(candidate).iter().any(|association| {
                        association.get("main").and_then(JsonValue::as_bool) == Some(true)
                    })
            })
        });

    if let Some(route_table) = route_table {
        let has_nat_route = routes_of(route_table).iter().any(|route| {
            route
                .get("natGatewayId")
                .or_else(|| route.get("NatGatewayId"))
                .and_then(JsonValue::as_str)
                .is_some_and(|gateway| !gateway.is_empty())
        });
        patches.push(Patch::SetPrivate {
            resource_id: subject.id.clone(),
            private: !has_nat_route,
        });
    }
    patches
}

fn associations_of(route_table: &Resource) -> Vec<JsonValue> {
    route_table
        .configuration
        .get("associations")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

fn routes_of(route_table: &Resource) -> Vec<JsonValue> {
    route_table
        .configuration
        .get("routes")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Cluster membership, execution and task roles (task definition as the
/// fallback), environment variables, file-system volumes, and network
/// interface attachments. The matching interface resource is mutated to
/// carry the reverse edge.
fn container_task(
    subject: &Resource,
    lookups: &LookupTables,
    snapshot: &ResourceSet,
) -> Vec<Patch> {
    let mut patches = Vec::new();
    let configuration = &subject.configuration;

    if let Some(cluster_arn) = configuration.get("clusterArn").and_then(JsonValue::as_str) {
        patches.push(add(
            subject,
            RelationshipDescriptor::arn(rels::CONTAINED_IN, cluster_arn),
        ));
    }

    let task_definition = configuration
        .get("taskDefinitionArn")
        .and_then(JsonValue::as_str)
        .and_then(|arn| snapshot.get(arn));
    let definition_config = task_definition.map(|definition| &definition.configuration);

    for role_key in ["taskRoleArn", "executionRoleArn"] {
        let role_arn = configuration
            .pointer(&format!("/overrides/{role_key}"))
            .and_then(JsonValue::as_str)
            .or_else(|| configuration.get(role_key).and_then(JsonValue::as_str))
            .or_else(|| {
                definition_config
                    .and_then(|definition| definition.get(role_key))
                    .and_then(JsonValue::as_str)
            });
        if let Some(role_arn) = role_arn {
            patches.push(add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, role_arn),
            ));
        }
    }

    let mut env_values: Vec<String> = Vec::new();
    if let Some(container_definitions) = definition_config
        .and_then(|definition| definition.get("containerDefinitions"))
        .and_then(JsonValue::as_array)
    {
        collect_environment_values(container_definitions, &mut env_values);
    }
    if let Some(container_overrides) = configuration
        .pointer("/overrides/containerOverrides")
        .and_then(JsonValue::as_array)
    {
        collect_environment_values(container_overrides, &mut env_values);
    }
    for descriptor in infer_env_var_relationships(
        &subject.id,
        &subject.account_id,
        &subject.region,
        env_values.iter().map(String::as_str),
        lookups,
    ) {
        patches.push(add(subject, descriptor));
    }

    if let Some(volumes) = definition_config
        .and_then(|definition| definition.get("volumes"))
        .and_then(JsonValue::as_array)
    {
        for volume in volumes {
            let Some(efs) = volume.get("efsVolumeConfiguration") else {
                continue;
            };
            let access_point = efs
                .pointer("/authorizationConfig/accessPointId")
                .and_then(JsonValue::as_str);
            if let Some(access_point) = access_point {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::resource_id(
                        rels::ASSOCIATED_WITH,
                        types::EFS_ACCESS_POINT,
                        access_point,
                    ),
                ));
            } else if let Some(file_system) =
                efs.get("fileSystemId").and_then(JsonValue::as_str)
            {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::resource_id(
                        rels::ASSOCIATED_WITH,
                        types::EFS_FILE_SYSTEM,
                        file_system,
                    ),
                ));
            }
        }
    }

    if let Some(attachments) = configuration.get("attachments").and_then(JsonValue::as_array) {
        for attachment in attachments {
            if attachment.get("type").and_then(JsonValue::as_str)
                != Some("ElasticNetworkInterface")
            {
                continue;
            }
            let detail = |name: &str| -> Option<String> {
                attachment
                    .get("details")
                    .and_then(JsonValue::as_array)?
                    .iter()
                    .find(|entry| entry.get("name").and_then(JsonValue::as_str) == Some(name))?
                    .get("value")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
            };

            if let Some(subnet_id) = detail("subnetId") {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::resource_id(
                        rels::CONTAINED_IN,
                        types::EC2_SUBNET,
                        &subnet_id,
                    ),
                ));
                let subnet_arn = lookups.lookup_identifier(
                    types::EC2_SUBNET,
                    &subnet_id,
                    &subject.account_id,
                    &subject.region,
                );
                if let Some(vpc_id) = subnet_arn
                    .and_then(|arn| snapshot.get(arn))
                    .and_then(|subnet| subnet.configuration.get("vpcId"))
                    .and_then(JsonValue::as_str)
                {
                    patches.push(add(
                        subject,
                        RelationshipDescriptor::resource_id(
                            rels::CONTAINED_IN,
                            types::EC2_VPC,
                            vpc_id,
                        ),
                    ));
                }
            }

            if let Some(interface_id) = detail("networkInterfaceId") {
                if let Some(interface_arn) = lookups.lookup_identifier(
                    types::EC2_NETWORK_INTERFACE,
                    &interface_id,
                    &subject.account_id,
                    &subject.region,
                ) {
                    patches.push(Patch::AddRelationship {
                        resource_id: interface_arn.clone(),
                        descriptor: RelationshipDescriptor::arn(rels::ATTACHED_TO, &subject.id),
                    });
                }
            }
        }
    }

    patches
}

fn collect_environment_values(containers: &[JsonValue], out: &mut Vec<String>) {
    for container in containers {
        let Some(environment) = container.get("environment").and_then(JsonValue::as_array) else {
            continue;
        };
        for variable in environment {
            if let Some(value) = variable.get("value").and_then(JsonValue::as_str) {
                out.push(value.to_string());
            }
        }
    }
}

fn task_definition(subject: &Resource, lookups: &LookupTables) -> Vec<Patch> {
    let mut env_values = Vec::new();
    if let Some(containers) = subject
        .configuration
        .get("containerDefinitions")
        .and_then(JsonValue::as_array)
    {
        collect_environment_values(containers, &mut env_values);
    }
    infer_env_var_relationships(
        &subject.id,
        &subject.account_id,
        &subject.region,
        env_values.iter().map(String::as_str),
        lookups,
    )
    .into_iter()
    .map(|descriptor| add(subject, descriptor))
    .collect()
}

fn nodegroup(subject: &Resource, lookups: &LookupTables) -> Vec<Patch> {
    let Some(groups) = subject
        .configuration
        .pointer("/resources/autoScalingGroups")
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };
    groups
        .iter()
        .filter_map(|group| group.get("name").and_then(JsonValue::as_str))
        .filter_map(|name| lookups.asg_name_to_id.get(name))
        .map(|asg_arn| {
            add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, asg_arn),
            )
        })
        .collect()
}

/// Load balancer, forwarded target groups, and the authenticating user
/// pool.
fn listener(subject: &Resource) -> Vec<Patch> {
    let mut patches = Vec::new();
    let configuration = &subject.configuration;

    if let Some(lb_arn) = configuration
        .get("loadBalancerArn")
        .and_then(JsonValue::as_str)
    {
        patches.push(add(
            subject,
            RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, lb_arn),
        ));
    }

    let mut target_groups = BTreeSet::new();
    if let Some(actions) = configuration
        .get("defaultActions")
        .and_then(JsonValue::as_array)
    {
        for action in actions {
            if let Some(arn) = action.get("targetGroupArn").and_then(JsonValue::as_str) {
                target_groups.insert(arn.to_string());
            }
            if let Some(forwarded) = action
                .pointer("/forwardConfig/targetGroups")
                .and_then(JsonValue::as_array)
            {
                for entry in forwarded {
                    if let Some(arn) = entry.get("targetGroupArn").and_then(JsonValue::as_str) {
                        target_groups.insert(arn.to_string());
                    }
                }
            }
            if let Some(user_pool) = action
                .pointer("/authenticateCognitoConfig/userPoolArn")
                .and_then(JsonValue::as_str)
            {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, user_pool),
                ));
            }
        }
    }
    for target_group in target_groups {
        patches.push(add(
            subject,
            RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, target_group),
        ));
    }
    patches
}

/// VPC containment plus live target health. Instance targets owned by the
/// group's auto-scaling group collapse into a single edge to the group.
async fn target_group(
    subject: &Resource,
    lookups: &LookupTables,
    client: Option<&ProviderClient>,
) -> Result<Vec<Patch>> {
    let mut patches = Vec::new();

    if let Some(vpc_id) = subject
        .configuration
        .get("VpcId")
        .or_else(|| subject.configuration.get("vpcId"))
        .and_then(JsonValue::as_str)
    {
        patches.push(add(
            subject,
            RelationshipDescriptor::resource_id(rels::CONTAINED_IN, types::EC2_VPC, vpc_id),
        ));
    }

    let asg_info = lookups.target_group_to_asg.get(&subject.id);
    if let Some(asg_info) = asg_info {
        patches.push(add(
            subject,
            RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, &asg_info.asg_arn),
        ));
    }

    let Some(client) = client else {
        return Ok(patches);
    };
    for description in client.describe_target_health(&subject.id).await? {
        let healthy = description
            .pointer("/TargetHealth/State")
            .and_then(JsonValue::as_str)
            == Some("healthy");
        if !healthy {
            continue;
        }
        let Some(target_id) = description
            .pointer("/Target/Id")
            .and_then(JsonValue::as_str)
        else {
            continue;
        };

        if target_id.starts_with("arn:") {
            patches.push(add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, target_id),
            ));
        } else if target_id.starts_with("i-") {
            let owned_by_asg = asg_info
                .map(|info| info.instance_ids.contains(target_id))
                .unwrap_or(false);
            if !owned_by_asg {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::resource_id(
                        rels::ASSOCIATED_WITH,
                        types::EC2_INSTANCE,
                        target_id,
                    ),
                ));
            }
        } else if let Some(instance_arn) = lookups.private_ip_to_instance.get(target_id) {
            let owned_by_asg = asg_info
                .map(|info| {
                    lookups
                        .resource_id_of(instance_arn)
                        .is_some_and(|id| info.instance_ids.contains(id))
                })
                .unwrap_or(false);
            if !owned_by_asg {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, instance_arn),
                ));
            }
        }
    }
    Ok(patches)
}

/// A bus with no rules is an empty sequence, not a failure.
fn event_bus(subject: &Resource, lookups: &LookupTables) -> Vec<Patch> {
    lookups
        .event_bus_rules
        .get(&subject.id)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|rule_id| {
            add(
                subject,
                RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, rule_id),
            )
        })
        .collect()
}

/// Only provider-partition managed policies materialize as graph nodes;
/// customer policy attachments stay inside the principal's configuration.
fn principal_managed_policies(subject: &Resource) -> Vec<Patch> {
    let Some(attached) = subject
        .configuration
        .get("attachedManagedPolicies")
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };
    attached
        .iter()
        .filter_map(|policy| {
            policy
                .get("policyArn")
                .or_else(|| policy.get("arn"))
                .and_then(JsonValue::as_str)
        })
        .filter(|arn| crate::domain::is_provider_managed_policy_arn(arn))
        .map(|arn| add(subject, RelationshipDescriptor::arn(rels::ATTACHED_TO, arn)))
        .collect()
}

/// Statement resources, with the trailing wildcard segment trimmed, that
/// resolve to known ARNs.
fn inline_policy(subject: &Resource, lookups: &LookupTables) -> Vec<Patch> {
    let statements = match subject.configuration.pointer("/policyDocument/Statement") {
        Some(JsonValue::Array(statements)) => statements.clone(),
        Some(single @ JsonValue::Object(_)) => vec![single.clone()],
        _ => return Vec::new(),
    };

    let mut patches = Vec::new();
    for statement in &statements {
        let resources = match statement.get("Resource") {
            Some(JsonValue::Array(entries)) => entries.clone(),
            Some(single @ JsonValue::String(_)) => vec![single.clone()],
            _ => continue,
        };
        for entry in resources {
            let Some(arn) = entry.as_str() else {
                continue;
            };
            let trimmed = arn.trim_end_matches("/*");
            if lookups.contains_id(trimmed) {
                patches.push(add(
                    subject,
                    RelationshipDescriptor::arn(rels::ATTACHED_TO, trimmed),
                ));
            }
        }
    }
    patches
}

/// Pattern-matches the interface description and type to its owner. An
/// unrecognized description yields nothing; the edge would carry the
/// `unknown` sentinel and be dropped anyway.
fn network_interface(
    subject: &Resource,
    lookups: &LookupTables,
    snapshot: &ResourceSet,
) -> Vec<Patch> {
    static NAT_GATEWAY: OnceLock<Regex> = OnceLock::new();
    static VPC_ENDPOINT: OnceLock<Regex> = OnceLock::new();
    static LAMBDA_ENI: OnceLock<Regex> = OnceLock::new();
    let nat_pattern = NAT_GATEWAY.get_or_init(|| {
        Regex::new(r"Interface for NAT Gateway (?P<id>nat-[0-9a-f]+)").expect("valid pattern")
    });
    let vpce_pattern = VPC_ENDPOINT.get_or_init(|| {
        Regex::new(r"VPC Endpoint Interface (?P<id>vpce-[0-9a-f]+)").expect("valid pattern")
    });
    let lambda_pattern = LAMBDA_ENI.get_or_init(|| {
        Regex::new(
            r"^AWS Lambda VPC ENI-(?P<name>.+)-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
        )
        .expect("valid pattern")
    });

    let description = subject
        .configuration
        .get("description")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let interface_type = subject
        .configuration
        .get("interfaceType")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();

    if interface_type == "nat_gateway" || nat_pattern.is_match(description) {
        if let Some(capture) = nat_pattern.captures(description) {
            return vec![add(
                subject,
                RelationshipDescriptor::resource_id(
                    rels::ATTACHED_TO,
                    types::EC2_NAT_GATEWAY,
                    &capture["id"],
                ),
            )];
        }
        return Vec::new();
    }

    if interface_type == "vpc_endpoint" || vpce_pattern.is_match(description) {
        if let Some(capture) = vpce_pattern.captures(description) {
            return vec![add(
                subject,
                RelationshipDescriptor::resource_id(
                    rels::ATTACHED_TO,
                    types::EC2_VPC_ENDPOINT,
                    &capture["id"],
                ),
            )];
        }
        return Vec::new();
    }

    if let Some(suffix) = description.strip_prefix("ELB ") {
        if let Some(balancer) = snapshot
            .of_type(types::ELBV2_LOAD_BALANCER)
            .find(|candidate| candidate.id.ends_with(suffix))
        {
            return vec![add(
                subject,
                RelationshipDescriptor::arn(rels::ATTACHED_TO, &balancer.id),
            )];
        }
        return Vec::new();
    }

    if let Some(domain_name) = description.strip_prefix("ES ") {
        return lookups
            .lookup_identifier(
                types::OPENSEARCH_DOMAIN,
                domain_name,
                &subject.account_id,
                &subject.region,
            )
            .map(|domain_arn| {
                vec![add(
                    subject,
                    RelationshipDescriptor::arn(rels::ATTACHED_TO, domain_arn),
                )]
            })
            .unwrap_or_default();
    }

    if let Some(capture) = lambda_pattern.captures(description) {
        return lookups
            .lookup_identifier(
                types::LAMBDA_FUNCTION,
                &capture["name"],
                &subject.account_id,
                &subject.region,
            )
            .map(|function_arn| {
                vec![add(
                    subject,
                    RelationshipDescriptor::arn(rels::ATTACHED_TO, function_arn),
                )]
            })
            .unwrap_or_default();
    }

    Vec::new()
}

/// The subnet whose availability zone matches the instance's, out of the
/// instance's subnet group.
fn db_instance(subject: &Resource) -> Vec<Patch> {
    let mut patches = Vec::new();
    let subnet_group = subject.configuration.get("dBSubnetGroup");

    if let Some(vpc_id) = subnet_group
        .and_then(|group| group.get("vpcId"))
        .and_then(JsonValue::as_str)
    {
        patches.push(add(
            subject,
            RelationshipDescriptor::resource_id(rels::CONTAINED_IN, types::EC2_VPC, vpc_id),
        ));
    }

    let Some(subnets) = subnet_group
        .and_then(|group| group.get("subnets"))
        .and_then(JsonValue::as_array)
    else {
        return patches;
    };
    let Some(instance_az) = subject.availability_zone.as_deref() else {
        return patches;
    };
    for subnet in subnets {
        let subnet_az = subnet
            .pointer("/subnetAvailabilityZone/name")
            .and_then(JsonValue::as_str);
        if subnet_az != Some(instance_az) {
            continue;
        }
        if let Some(subnet_id) = subnet.get("subnetIdentifier").and_then(JsonValue::as_str) {
            patches.push(add(
                subject,
                RelationshipDescriptor::resource_id(
                    rels::CONTAINED_IN,
                    types::EC2_SUBNET,
                    subnet_id,
                ),
            ));
        }
    }
    patches
}

/// `contains` edges per route, classified by the gateway id prefix.
fn route_table(subject: &Resource) -> Vec<Patch> {
    let mut patches = Vec::new();
    for route in routes_of(subject) {
        let gateway = route
            .get("natGatewayId")
            .or_else(|| route.get("gatewayId"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let target_type = if gateway.starts_with("nat-") {
            types::EC2_NAT_GATEWAY
        } else if gateway.starts_with("vpce-") {
            types::EC2_VPC_ENDPOINT
        } else if gateway.starts_with("igw-") {
            types::EC2_INTERNET_GATEWAY
        } else {
            continue;
        };
        patches.push(add(
            subject,
            RelationshipDescriptor::resource_id(rels::CONTAINS, target_type, gateway),
        ));
    }
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gateway_method_parses_invocation_uri() {
        let method = Resource::new(
            "arn:method",
            types::APIGATEWAY_METHOD,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({
            "methodIntegration": {
                "uri": "arn:aws:apigateway:eu-west-1:lambda:path/2015-03-31/functions/arn:aws:lambda:eu-west-1:111:function:ingest/invocations",
            }
        }));
        let patches = gateway_method(&method);
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::AddRelationship { descriptor, .. } => {
                assert_eq!(
                    descriptor.identifier_value,
                    "arn:aws:lambda:eu-west-1:111:function:ingest"
                );
            }
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn nat_interface_description_yields_one_edge() {
        let interface = Resource::new(
            "arn:eni",
            types::EC2_NETWORK_INTERFACE,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({ "description": "Interface for NAT Gateway nat-0abc" }));
        let lookups = LookupTables::build(&ResourceSet::new());
        let patches = network_interface(&interface, &lookups, &ResourceSet::new());
        assert_eq!(patches.len(), 1);
    }

    #[test]
    fn unrecognized_interface_description_yields_nothing() {
        let interface = Resource::new(
            "arn:eni",
            types::EC2_NETWORK_INTERFACE,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({ "description": "just some interface" }));
        let lookups = LookupTables::build(&ResourceSet::new());
        assert!(network_interface(&interface, &lookups, &ResourceSet::new()).is_empty());
    }

    #[test]
    fn security_group_references_are_deduped() {
        let group = Resource::new(
            "arn:sg",
            types::EC2_SECURITY_GROUP,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({
            "ipPermissions": [
                { "userIdGroupPairs": [{ "groupId": "sg-2" }, { "groupId": "sg-3" }] },
            ],
            "ipPermissionsEgress": [
                { "userIdGroupPairs": [{ "groupId": "sg-2" }] },
            ],
        }));
        assert_eq!(security_group(&group).len(), 2);
    }

    #[test]
    fn route_table_classifies_gateways() {
        let table = Resource::new(
            "arn:rtb",
            types::EC2_ROUTE_TABLE,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({
            "routes": [
                { "gatewayId": "igw-1" },
                { "natGatewayId": "nat-1" },
                { "gatewayId": "vpce-1" },
                { "gatewayId": "local" },
            ],
        }));
        assert_eq!(route_table(&table).len(), 3);
    }
}
