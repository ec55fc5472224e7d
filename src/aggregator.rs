use crate::domain::{
    Account, IdentifierType, RelationshipDescriptor, Resource, ResourceSet, Tag, GLOBAL_REGION,
};
use crate::error::Result;
use crate::provider::ProviderClient;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Resource types excluded from the baseline query; high-churn entries that
/// the downstream graph never renders.
const EXCLUDED_TYPES: [&str; 2] = ["AWS::Backup::RecoveryPoint", "AWS::CodeDeploy::DeploymentConfig"];

const RECORDING_SENTINEL: &str = "ResourceNotRecorded";

/// Pulls the baseline resource set for all accounts and regions from the
/// cross-account configuration aggregator.
pub struct AggregatorReader {
    provider: ProviderClient,
    aggregator_name: String,
}

impl AggregatorReader {
    pub fn new(provider: ProviderClient, aggregator_name: impl Into<String>) -> Self {
        Self {
            provider,
            aggregator_name: aggregator_name.into(),
        }
    }

    pub async fn read_baseline(
        &self,
        accounts: &BTreeMap<String, Account>,
    ) -> Result<ResourceSet> {
        let rows = self
            .provider
            .select_aggregate_resource_config(&self.aggregator_name, &advanced_query())
            .await?;

        let mut resources = ResourceSet::new();
        let mut parse_failures = 0usize;
        let mut filtered = 0usize;
        for row in &rows {
            let Some(resource) = parse_aggregate_row(row) else {
                parse_failures += 1;
                continue;
            };
            if !should_discover(&resource, accounts) {
                filtered += 1;
                continue;
            }
            resources.insert(resource);
        }

        if parse_failures > 0 {
            warn!(
                count = parse_failures,
                "aggregator rows failed to parse and were skipped"
            );
        }
        info!(
            event = "baseline_read",
            total = rows.len(),
            kept = resources.len(),
            filtered,
            "aggregator baseline loaded"
        );
        Ok(resources)
    }
}

/// The aggregator's advanced-query dialect. The star projection drops the
/// wide columns, so they are selected explicitly alongside it.
fn advanced_query() -> String {
    let excluded = EXCLUDED_TYPES
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT *, configuration, configurationItemStatus, relationships, \
         supplementaryConfiguration, tags WHERE resourceType NOT IN ({excluded})"
    )
}

/// Baseline filter. Resources from accounts or regions no longer active can
/// linger in the aggregator for days; this guarantees they are not revived.
pub fn should_discover(resource: &Resource, accounts: &BTreeMap<String, Account>) -> bool {
    if resource.configuration_item_status.as_deref() == Some(RECORDING_SENTINEL) {
        return false;
    }
    let Some(account) = accounts.get(&resource.account_id) else {
        return false;
    };
    resource.region == GLOBAL_REGION || account.has_region(&resource.region)
}

/// One aggregator row (JSON text or object) into the working-set shape.
pub fn parse_aggregate_row(row: &JsonValue) -> Option<Resource> {
    let parsed: JsonValue = match row {
        JsonValue::String(text) => serde_json::from_str(text).ok()?,
        other => other.clone(),
    };

    let field = |name: &str| -> Option<String> {
        parsed
            .get(name)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    };

    let arn = field("arn")?;
    let mut resource = Resource::new(
        arn,
        field("resourceType")?,
        field("accountId")?,
        field("awsRegion").unwrap_or_else(|| GLOBAL_REGION.to_string()),
    );
    if let Some(resource_id) = field("resourceId") {
        resource.resource_id = resource_id;
    }
    resource.resource_name = field("resourceName");
    resource.availability_zone = field("availabilityZone");
    resource.configuration_item_capture_time = field("configurationItemCaptureTime");
    resource.configuration_item_status = field("configurationItemStatus");
    resource.configuration = decode_embedded_json(parsed.get("configuration"));
    resource.supplementary_configuration =
        decode_embedded_json(parsed.get("supplementaryConfiguration"));
    resource.tags = parse_tags(parsed.get("tags"));
    resource.relationships = parse_relationships(parsed.get("relationships"));
    Some(resource)
}

/// The aggregator frequently double-encodes the wide columns.
fn decode_embedded_json(raw: Option<&JsonValue>) -> JsonValue {
    match raw {
        Some(JsonValue::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        }
        Some(other) => other.clone(),
        None => JsonValue::Null,
    }
}

fn parse_tags(raw: Option<&JsonValue>) -> Vec<Tag> {
    let Some(entries) = raw.and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let key = entry
                .get("key")
                .or_else(|| entry.get("Key"))
                .and_then(JsonValue::as_str)?;
            let value = entry
                .get("value")
                .or_else(|| entry.get("Value"))
                .and_then(JsonValue::as_str)?;
            Some(Tag::new(key, value))
        })
        .collect()
}

fn parse_relationships(raw: Option<&JsonValue>) -> Vec<RelationshipDescriptor> {
    let Some(entries) = raw.and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let relationship_name = entry
                .get("relationshipName")
                .and_then(JsonValue::as_str)?
                .trim()
                .to_string();
            let resource_type = entry
                .get("resourceType")
                .and_then(JsonValue::as_str)
                .map(str::to_string);

            if let Some(resource_id) = entry.get("resourceId").and_then(JsonValue::as_str) {
                let identifier_type = if resource_id.starts_with("arn:") {
                    IdentifierType::Arn
                } else {
                    IdentifierType::ResourceId
                };
                return Some(RelationshipDescriptor {
                    relationship_name,
                    resource_type,
                    identifier_type,
                    identifier_value: resource_id.to_string(),
                    account_id: None,
                    region: None,
                    rel_name_suffix: None,
                });
            }

            let resource_name = entry.get("resourceName").and_then(JsonValue::as_str)?;
            Some(RelationshipDescriptor {
                relationship_name,
                resource_type,
                identifier_type: IdentifierType::ResourceName,
                identifier_value: resource_name.to_string(),
                account_id: None,
                region: None,
                rel_name_suffix: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types;
    use serde_json::json;

    fn accounts_with_region(account_id: &str, region: &str) -> BTreeMap<String, Account> {
        let account = Account::new(account_id).with_region(region);
        BTreeMap::from([(account_id.to_string(), account)])
    }

    #[test]
    fn rows_arrive_as_json_text() {
        let row = json!({
            "arn": "arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1",
            "resourceType": types::EC2_SUBNET,
            "accountId": "111111111111",
            "awsRegion": "eu-west-1",
            "resourceId": "subnet-1",
            "configuration": "{\"cidrBlock\":\"10.0.0.0/24\"}",
            "tags": [{ "key": "Name", "value": "private-a" }],
            "relationships": [
                { "relationshipName": "Is contained in ", "resourceId": "vpc-1", "resourceType": types::EC2_VPC }
            ],
        });
        let resource = parse_aggregate_row(&json!(row.to_string())).unwrap();
        assert_eq!(resource.resource_id, "subnet-1");
        assert_eq!(resource.configuration["cidrBlock"], "10.0.0.0/24");
        assert_eq!(resource.tags.len(), 1);
        assert_eq!(resource.relationships.len(), 1);
        assert_eq!(
            resource.relationships[0].identifier_type,
            IdentifierType::ResourceId
        );
        assert_eq!(resource.relationships[0].relationship_name, "Is contained in");
    }

    #[test]
    fn unrecorded_resources_are_filtered() {
        let mut resource = Resource::new(
            "arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1",
            types::EC2_SUBNET,
            "111111111111",
            "eu-west-1",
        );
        resource.configuration_item_status = Some(RECORDING_SENTINEL.to_string());
        assert!(!should_discover(
            &resource,
            &accounts_with_region("111111111111", "eu-west-1")
        ));
    }

    #[test]
    fn resources_from_removed_accounts_are_filtered() {
        let resource = Resource::new(
            "arn:aws:ec2:eu-west-1:222222222222:subnet/subnet-9",
            types::EC2_SUBNET,
            "222222222222",
            "eu-west-1",
        );
        assert!(!should_discover(
            &resource,
            &accounts_with_region("111111111111", "eu-west-1")
        ));
    }

    #[test]
    fn global_resources_bypass_region_filter() {
        let resource = Resource::new(
            "arn:aws:iam::111111111111:role/service",
            types::IAM_ROLE,
            "111111111111",
            GLOBAL_REGION,
        );
        assert!(should_discover(
            &resource,
            &accounts_with_region("111111111111", "eu-west-1")
        ));
    }

    #[test]
    fn inactive_regions_are_filtered() {
        let resource = Resource::new(
            "arn:aws:ec2:us-east-2:111111111111:subnet/subnet-1",
            types::EC2_SUBNET,
            "111111111111",
            "us-east-2",
        );
        assert!(!should_discover(
            &resource,
            &accounts_with_region("111111111111", "eu-west-1")
        ));
    }
}
