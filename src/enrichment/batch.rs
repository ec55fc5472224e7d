use crate::credentials::AccountCredentials;
use crate::domain::{
    rels, types, RelationshipDescriptor, Resource, ResourceSet, GLOBAL_REGION, PROVIDER_ACCOUNT_ID,
};
use crate::error::Result;
use crate::provider::ProviderClient;
use serde_json::Value as JsonValue;

pub const BATCH_CONCURRENCY: usize = 10;

/// Tag the compute scheduler stamps on instances launched for a spot fleet.
const SPOT_FLEET_TAG: &str = "aws:ec2spot:fleet-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchHandlerKind {
    AppRegistryApplications,
    MediaFlows,
    ProviderManagedPolicies,
    TargetGroups,
    SpotRequests,
    SearchDomains,
}

pub const REGIONAL_HANDLERS: [BatchHandlerKind; 5] = [
    BatchHandlerKind::AppRegistryApplications,
    BatchHandlerKind::MediaFlows,
    BatchHandlerKind::TargetGroups,
    BatchHandlerKind::SpotRequests,
    BatchHandlerKind::SearchDomains,
];

#[derive(Clone)]
pub struct BatchWorkItem {
    pub handler: BatchHandlerKind,
    pub account_id: String,
    pub region: String,
    pub credentials: AccountCredentials,
}

impl BatchHandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            BatchHandlerKind::AppRegistryApplications => "appRegistryApplications",
            BatchHandlerKind::MediaFlows => "mediaFlows",
            BatchHandlerKind::ProviderManagedPolicies => "providerManagedPolicies",
            BatchHandlerKind::TargetGroups => "targetGroups",
            BatchHandlerKind::SpotRequests => "spotRequests",
            BatchHandlerKind::SearchDomains => "searchDomains",
        }
    }

    pub async fn collect(
        &self,
        client: &ProviderClient,
        item: &BatchWorkItem,
        snapshot: &ResourceSet,
    ) -> Result<Vec<Resource>> {
        match self {
            BatchHandlerKind::AppRegistryApplications => applications(client, item).await,
            BatchHandlerKind::MediaFlows => media_flows(client, item).await,
            BatchHandlerKind::ProviderManagedPolicies => managed_policies(client).await,
            BatchHandlerKind::TargetGroups => target_groups(client, item).await,
            BatchHandlerKind::SpotRequests => spot_requests(client, item, snapshot).await,
            BatchHandlerKind::SearchDomains => search_domains(client, item).await,
        }
    }
}

async fn applications(client: &ProviderClient, item: &BatchWorkItem) -> Result<Vec<Resource>> {
    let applications = client.list_appregistry_applications().await?;
    Ok(applications
        .into_iter()
        .filter_map(|application| {
            let arn = application.get("arn").and_then(JsonValue::as_str)?.to_string();
            let mut resource = Resource::new(
                arn,
                types::APPREGISTRY_APPLICATION,
                &item.account_id,
                &item.region,
            );
            if let Some(id) = application.get("id").and_then(JsonValue::as_str) {
                resource.resource_id = id.to_string();
            }
            resource.resource_name = application
                .get("name")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = application;
            Some(resource)
        })
        .collect())
}

async fn media_flows(client: &ProviderClient, item: &BatchWorkItem) -> Result<Vec<Resource>> {
    let flows = client.list_mediaconnect_flows().await?;
    Ok(flows
        .into_iter()
        .filter_map(|flow| {
            let arn = flow.get("FlowArn").and_then(JsonValue::as_str)?.to_string();
            let mut resource =
                Resource::new(arn, types::MEDIACONNECT_FLOW, &item.account_id, &item.region);
            resource.resource_name = flow
                .get("Name")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.availability_zone = flow
                .get("AvailabilityZone")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = flow;
            Some(resource)
        })
        .collect())
}

/// Provider-owned managed policies are one global catalogue under the
/// provider's own account id.
async fn managed_policies(client: &ProviderClient) -> Result<Vec<Resource>> {
    let policies = client.list_provider_managed_policies().await?;
    Ok(policies
        .into_iter()
        .filter_map(|policy| {
            let arn = policy.get("Arn").and_then(JsonValue::as_str)?.to_string();
            let mut resource = Resource::new(
                arn,
                types::IAM_AWS_MANAGED_POLICY,
                PROVIDER_ACCOUNT_ID,
                GLOBAL_REGION,
            );
            if let Some(id) = policy.get("PolicyId").and_then(JsonValue::as_str) {
                resource.resource_id = id.to_string();
            }
            resource.resource_name = policy
                .get("PolicyName")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = policy;
            Some(resource)
        })
        .collect())
}

async fn target_groups(client: &ProviderClient, item: &BatchWorkItem) -> Result<Vec<Resource>> {
    let target_groups = client.describe_target_groups().await?;
    Ok(target_groups
        .into_iter()
        .filter_map(|target_group| {
            let arn = target_group
                .get("TargetGroupArn")
                .and_then(JsonValue::as_str)?
                .to_string();
            let mut resource = Resource::new(
                arn,
                types::ELBV2_TARGET_GROUP,
                &item.account_id,
                &item.region,
            );
            resource.resource_name = target_group
                .get("TargetGroupName")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = target_group;
            Some(resource)
        })
        .collect())
}

/// Spot instance requests and spot fleets. A fleet carries an edge to each
/// instance launched in its name, identified by the fleet-id tag stamped on
/// the instance.
async fn spot_requests(
    client: &ProviderClient,
    item: &BatchWorkItem,
    snapshot: &ResourceSet,
) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();

    for request in client.describe_spot_instance_requests().await? {
        let Some(request_id) = request
            .get("SpotInstanceRequestId")
            .and_then(JsonValue::as_str)
        else {
            continue;
        };
        let arn = format!(
            "arn:aws:ec2:{}:{}:spot-instances-request/{request_id}",
            item.region, item.account_id
        );
        let mut resource = Resource::new(arn, types::EC2_SPOT, &item.account_id, &item.region)
            .with_resource_id(request_id);
        resource.configuration = request;
        resources.push(resource);
    }

    for fleet in client.describe_spot_fleet_requests().await? {
        let Some(fleet_id) = fleet
            .get("SpotFleetRequestId")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        let arn = format!(
            "arn:aws:ec2:{}:{}:spot-fleet-request/{fleet_id}",
            item.region, item.account_id
        );
        let mut resource =
            Resource::new(arn, types::EC2_SPOT_FLEET, &item.account_id, &item.region)
                .with_resource_id(&fleet_id);
        for instance in snapshot.of_type(types::EC2_INSTANCE) {
            if instance.tag_value(SPOT_FLEET_TAG) == Some(fleet_id.as_str()) {
                resource.add_relationship(RelationshipDescriptor::arn(
                    rels::ASSOCIATED_WITH,
                    &instance.id,
                ));
            }
        }
        resource.configuration = fleet;
        resources.push(resource);
    }

    Ok(resources)
}

async fn search_domains(client: &ProviderClient, item: &BatchWorkItem) -> Result<Vec<Resource>> {
    let domains = client.describe_search_domains().await?;
    Ok(domains
        .into_iter()
        .filter_map(|domain| {
            let arn = domain.get("ARN").and_then(JsonValue::as_str)?.to_string();
            let mut resource =
                Resource::new(arn, types::OPENSEARCH_DOMAIN, &item.account_id, &item.region);
            if let Some(id) = domain.get("DomainId").and_then(JsonValue::as_str) {
                resource.resource_id = id.to_string();
            }
            resource.resource_name = domain
                .get("DomainName")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = domain;
            Some(resource)
        })
        .collect())
}
