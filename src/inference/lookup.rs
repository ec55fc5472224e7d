use crate::domain::{
    edge_label, types, Edge, IdentifierType, RelationshipDescriptor, Resource, ResourceSet,
    GLOBAL_REGION, PROVIDER_ACCOUNT_ID, UNKNOWN_TARGET,
};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ElbDnsInfo {
    pub resource_id: String,
    pub resource_type: String,
    pub region: String,
}

#[derive(Debug, Clone, Default)]
pub struct AsgInfo {
    pub asg_arn: String,
    pub instance_ids: HashSet<String>,
}

/// Lookup maps built once over the working set and consulted by every
/// inference stage and by edge projection.
#[derive(Debug, Default)]
pub struct LookupTables {
    resource_identifier_to_id: HashMap<String, String>,
    env_var_identifier_to_id: HashMap<String, String>,
    endpoint_to_id: HashMap<String, String>,
    pub elb_dns_to_resource: HashMap<String, ElbDnsInfo>,
    pub target_group_to_asg: HashMap<String, AsgInfo>,
    pub asg_name_to_id: HashMap<String, String>,
    pub event_bus_rules: HashMap<String, Vec<String>>,
    pub private_ip_to_instance: HashMap<String, String>,
    known_ids: HashSet<String>,
    id_to_type: HashMap<String, String>,
    id_to_resource_id: HashMap<String, String>,
}

fn type_key(resource_type: &str, value: &str, account_id: &str, region: &str) -> String {
    format!("{resource_type}|{value}|{account_id}|{region}")
}

fn scoped_key(value: &str, account_id: &str, region: &str) -> String {
    format!("{value}|{account_id}|{region}")
}

impl LookupTables {
    pub fn build(resources: &ResourceSet) -> Self {
        let mut tables = Self::default();

        for resource in resources.iter() {
            tables.known_ids.insert(resource.id.clone());
            tables
                .id_to_type
                .insert(resource.id.clone(), resource.resource_type.clone());
            tables
                .id_to_resource_id
                .insert(resource.id.clone(), resource.resource_id.clone());

            let mut identifiers = vec![resource.resource_id.clone()];
            if let Some(name) = &resource.resource_name {
                identifiers.push(name.clone());
            }
            for identifier in &identifiers {
                tables.resource_identifier_to_id.insert(
                    type_key(
                        &resource.resource_type,
                        identifier,
                        &resource.account_id,
                        &resource.region,
                    ),
                    resource.id.clone(),
                );
                tables.env_var_identifier_to_id.insert(
                    scoped_key(identifier, &resource.account_id, &resource.region),
                    resource.id.clone(),
                );
            }

            harvest_endpoints(
                &resource.configuration,
                &resource.id,
                &mut tables.endpoint_to_id,
            );

            match resource.resource_type.as_str() {
                types::ELBV2_LOAD_BALANCER | types::ELB_CLASSIC_LOAD_BALANCER => {
                    for key in ["dNSName", "DNSName", "dnsName"] {
                        if let Some(dns) = resource.configuration.get(key).and_then(JsonValue::as_str)
                        {
                            tables.elb_dns_to_resource.insert(
                                dns.to_string(),
                                ElbDnsInfo {
                                    resource_id: resource.id.clone(),
                                    resource_type: resource.resource_type.clone(),
                                    region: resource.region.clone(),
                                },
                            );
                        }
                    }
                }
                types::AUTOSCALING_GROUP => {
                    let name = resource
                        .resource_name
                        .clone()
                        .or_else(|| {
                            resource
                                .configuration
                                .get("autoScalingGroupName")
                                .and_then(JsonValue::as_str)
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| resource.resource_id.clone());
                    tables.asg_name_to_id.insert(name, resource.id.clone());

                    let instance_ids: HashSet<String> = resource
                        .configuration
                        .get("instances")
                        .and_then(JsonValue::as_array)
                        .map(|instances| {
                            instances
                                .iter()
                                .filter_map(|instance| {
                                    instance.get("instanceId").and_then(JsonValue::as_str)
                                })
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    if let Some(target_groups) = resource
                        .configuration
                        .get("targetGroupARNs")
                        .and_then(JsonValue::as_array)
                    {
                        for target_group in target_groups.iter().filter_map(JsonValue::as_str) {
                            tables.target_group_to_asg.insert(
                                target_group.to_string(),
                                AsgInfo {
                                    asg_arn: resource.id.clone(),
                                    instance_ids: instance_ids.clone(),
                                },
                            );
                        }
                    }
                }
                types::EC2_INSTANCE => {
                    if let Some(ip) = resource
                        .configuration
                        .get("privateIpAddress")
                        .and_then(JsonValue::as_str)
                    {
                        tables
                            .private_ip_to_instance
                            .insert(ip.to_string(), resource.id.clone());
                    }
                }
                _ => {}
            }
        }

        // Rules resolve their bus through the identifier map, so they are
        // gathered after the first pass over the set.
        for rule in resources.of_type(types::EVENTS_RULE) {
            let bus_name = rule
                .configuration
                .get("eventBusName")
                .and_then(JsonValue::as_str)
                .unwrap_or("default");
            let bus_id = tables
                .resource_identifier_to_id
                .get(&type_key(
                    types::EVENTS_EVENT_BUS,
                    bus_name,
                    &rule.account_id,
                    &rule.region,
                ))
                .cloned();
            if let Some(bus_id) = bus_id {
                tables
                    .event_bus_rules
                    .entry(bus_id)
                    .or_default()
                    .push(rule.id.clone());
            }
        }

        tables
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.known_ids.contains(id)
    }

    pub fn type_of(&self, id: &str) -> Option<&str> {
        self.id_to_type.get(id).map(String::as_str)
    }

    pub fn resource_id_of(&self, id: &str) -> Option<&str> {
        self.id_to_resource_id.get(id).map(String::as_str)
    }

    pub fn lookup_identifier(
        &self,
        resource_type: &str,
        value: &str,
        account_id: &str,
        region: &str,
    ) -> Option<&String> {
        self.resource_identifier_to_id
            .get(&type_key(resource_type, value, account_id, region))
            .or_else(|| {
                self.resource_identifier_to_id.get(&type_key(
                    resource_type,
                    value,
                    account_id,
                    GLOBAL_REGION,
                ))
            })
            .or_else(|| {
                self.resource_identifier_to_id.get(&type_key(
                    resource_type,
                    value,
                    PROVIDER_ACCOUNT_ID,
                    GLOBAL_REGION,
                ))
            })
    }

    pub fn lookup_env_identifier(
        &self,
        value: &str,
        account_id: &str,
        region: &str,
    ) -> Option<&String> {
        self.env_var_identifier_to_id
            .get(&scoped_key(value, account_id, region))
    }

    pub fn lookup_endpoint(&self, value: &str) -> Option<&String> {
        self.endpoint_to_id
            .get(value)
            .or_else(|| self.endpoint_to_id.get(value.trim_end_matches('/')))
    }

    /// Resolves one descriptor against the maps. Unresolved targets carry
    /// the `unknown` sentinel and are dropped before persistence.
    pub fn resolve_target(&self, owner: &Resource, descriptor: &RelationshipDescriptor) -> String {
        self.resolve_target_in(&owner.account_id, &owner.region, descriptor)
    }

    /// Like [`LookupTables::resolve_target`], with the owner's scope passed
    /// explicitly; used where the owner is already mutably borrowed.
    pub fn resolve_target_in(
        &self,
        owner_account_id: &str,
        owner_region: &str,
        descriptor: &RelationshipDescriptor,
    ) -> String {
        match descriptor.identifier_type {
            IdentifierType::Arn => {
                if self.contains_id(&descriptor.identifier_value) {
                    descriptor.identifier_value.clone()
                } else {
                    UNKNOWN_TARGET.to_string()
                }
            }
            IdentifierType::ResourceId | IdentifierType::ResourceName => {
                let Some(resource_type) = descriptor.resource_type.as_deref() else {
                    return UNKNOWN_TARGET.to_string();
                };
                let account_id = descriptor.account_id.as_deref().unwrap_or(owner_account_id);
                let region = descriptor.region.as_deref().unwrap_or(owner_region);
                self.lookup_identifier(
                    resource_type,
                    &descriptor.identifier_value,
                    account_id,
                    region,
                )
                .cloned()
                .unwrap_or_else(|| UNKNOWN_TARGET.to_string())
            }
            IdentifierType::Endpoint => self
                .lookup_endpoint(&descriptor.identifier_value)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_TARGET.to_string()),
        }
    }

    pub fn resolve_edge(&self, owner: &Resource, descriptor: &RelationshipDescriptor) -> Edge {
        let target = self.resolve_target(owner, descriptor);
        let name = match &descriptor.rel_name_suffix {
            Some(suffix) => format!("{} {suffix}", descriptor.relationship_name),
            None => descriptor.relationship_name.clone(),
        };
        Edge::new(&owner.id, edge_label(&name), target)
    }
}

/// Projects every resource's descriptors to edges, dropping unresolved ones
/// and collapsing duplicates.
pub fn project_edges(resources: &ResourceSet, lookups: &LookupTables) -> Vec<Edge> {
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for resource in resources.iter() {
        for descriptor in &resource.relationships {
            let edge = lookups.resolve_edge(resource, descriptor);
            if !edge.is_resolved() {
                continue;
            }
            let key = format!("{}|{}|{}", edge.source, edge.label, edge.target);
            if seen.insert(key) {
                edges.push(edge);
            }
        }
    }
    edges
}

/// Walks a configuration document for endpoint-bearing keys: a string value
/// is mapped directly; object values contribute their `value`/`address`
/// members and any other string members.
fn harvest_endpoints(value: &JsonValue, resource_id: &str, out: &mut HashMap<String, String>) {
    let JsonValue::Object(map) = value else {
        return;
    };
    for (key, nested) in map {
        if key.to_lowercase().contains("endpoint") {
            match nested {
                JsonValue::String(endpoint) if !endpoint.is_empty() => {
                    out.insert(endpoint.clone(), resource_id.to_string());
                }
                JsonValue::Object(fields) => {
                    for nested_value in fields.values() {
                        if let JsonValue::String(endpoint) = nested_value {
                            if !endpoint.is_empty() {
                                out.insert(endpoint.clone(), resource_id.to_string());
                            }
                        }
                    }
                }
                JsonValue::Array(entries) => {
                    for entry in entries {
                        if let JsonValue::String(endpoint) = entry {
                            if !endpoint.is_empty() {
                                out.insert(endpoint.clone(), resource_id.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        harvest_endpoints(nested, resource_id, out);
    }
}
