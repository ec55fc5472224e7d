#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::credentials::AccountCredentials;

/// Region literal carried by resources that are not regional (identity,
/// managed policies, synthesized tags).
pub const GLOBAL_REGION: &str = "global";
/// Account id carried by provider-owned managed policies.
pub const PROVIDER_ACCOUNT_ID: &str = "aws";
/// Sentinel target for edges whose other end could not be resolved. Edges
/// carrying it are never persisted.
pub const UNKNOWN_TARGET: &str = "unknown";
pub const AZ_NOT_APPLICABLE: &str = "not-applicable";
pub const AZ_MULTIPLE: &str = "multiple";

/// Canonical resource type names, `namespace::service::kind`.
pub mod types {
    pub const APPREGISTRY_APPLICATION: &str = "AWS::ServiceCatalogAppRegistry::Application";
    pub const MEDIACONNECT_FLOW: &str = "AWS::MediaConnect::Flow";
    pub const IAM_AWS_MANAGED_POLICY: &str = "AWS::IAM::AWSManagedPolicy";
    pub const IAM_ROLE: &str = "AWS::IAM::Role";
    pub const IAM_USER: &str = "AWS::IAM::User";
    pub const IAM_POLICY: &str = "AWS::IAM::Policy";
    pub const IAM_INLINE_POLICY: &str = "AWS::IAM::InlinePolicy";
    pub const ELBV2_LOAD_BALANCER: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
    pub const ELBV2_LISTENER: &str = "AWS::ElasticLoadBalancingV2::Listener";
    pub const ELBV2_TARGET_GROUP: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";
    pub const ELB_CLASSIC_LOAD_BALANCER: &str = "AWS::ElasticLoadBalancing::LoadBalancer";
    pub const EC2_SPOT: &str = "AWS::EC2::Spot";
    pub const EC2_SPOT_FLEET: &str = "AWS::EC2::SpotFleet";
    pub const OPENSEARCH_DOMAIN: &str = "AWS::OpenSearch::Domain";
    pub const APIGATEWAY_REST_API: &str = "AWS::ApiGateway::RestApi";
    pub const APIGATEWAY_RESOURCE: &str = "AWS::ApiGateway::Resource";
    pub const APIGATEWAY_METHOD: &str = "AWS::ApiGateway::Method";
    pub const APIGATEWAY_AUTHORIZER: &str = "AWS::ApiGateway::Authorizer";
    pub const APPSYNC_GRAPHQL_API: &str = "AWS::AppSync::GraphQLApi";
    pub const APPSYNC_DATA_SOURCE: &str = "AWS::AppSync::DataSource";
    pub const APPSYNC_RESOLVER: &str = "AWS::AppSync::Resolver";
    pub const DYNAMODB_TABLE: &str = "AWS::DynamoDB::Table";
    pub const DYNAMODB_STREAM: &str = "AWS::DynamoDB::Stream";
    pub const ECS_CLUSTER: &str = "AWS::ECS::Cluster";
    pub const ECS_SERVICE: &str = "AWS::ECS::Service";
    pub const ECS_TASK: &str = "AWS::ECS::Task";
    pub const ECS_TASK_DEFINITION: &str = "AWS::ECS::TaskDefinition";
    pub const EKS_CLUSTER: &str = "AWS::EKS::Cluster";
    pub const EKS_NODEGROUP: &str = "AWS::EKS::Nodegroup";
    pub const LAMBDA_FUNCTION: &str = "AWS::Lambda::Function";
    pub const EC2_INSTANCE: &str = "AWS::EC2::Instance";
    pub const EC2_NETWORK_INTERFACE: &str = "AWS::EC2::NetworkInterface";
    pub const EC2_SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
    pub const EC2_SUBNET: &str = "AWS::EC2::Subnet";
    pub const EC2_VPC: &str = "AWS::EC2::VPC";
    pub const EC2_VOLUME: &str = "AWS::EC2::Volume";
    pub const EC2_ROUTE_TABLE: &str = "AWS::EC2::RouteTable";
    pub const EC2_NAT_GATEWAY: &str = "AWS::EC2::NatGateway";
    pub const EC2_INTERNET_GATEWAY: &str = "AWS::EC2::InternetGateway";
    pub const EC2_VPC_ENDPOINT: &str = "AWS::EC2::VPCEndpoint";
    pub const EC2_TRANSIT_GATEWAY: &str = "AWS::EC2::TransitGateway";
    pub const EC2_TRANSIT_GATEWAY_ATTACHMENT: &str = "AWS::EC2::TransitGatewayAttachment";
    pub const AUTOSCALING_GROUP: &str = "AWS::AutoScaling::AutoScalingGroup";
    pub const S3_BUCKET: &str = "AWS::S3::Bucket";
    pub const S3_ACCOUNT_PUBLIC_ACCESS_BLOCK: &str = "AWS::S3::AccountPublicAccessBlock";
    pub const SNS_TOPIC: &str = "AWS::SNS::Topic";
    pub const SQS_QUEUE: &str = "AWS::SQS::Queue";
    pub const EVENTS_EVENT_BUS: &str = "AWS::Events::EventBus";
    pub const EVENTS_RULE: &str = "AWS::Events::Rule";
    pub const RDS_DB_INSTANCE: &str = "AWS::RDS::DBInstance";
    pub const CLOUDFRONT_DISTRIBUTION: &str = "AWS::CloudFront::Distribution";
    pub const CLOUDFRONT_STREAMING_DISTRIBUTION: &str = "AWS::CloudFront::StreamingDistribution";
    pub const COGNITO_USER_POOL: &str = "AWS::Cognito::UserPool";
    pub const KINESIS_STREAM: &str = "AWS::Kinesis::Stream";
    pub const EFS_FILE_SYSTEM: &str = "AWS::EFS::FileSystem";
    pub const EFS_ACCESS_POINT: &str = "AWS::EFS::AccessPoint";
    pub const TAG: &str = "AWS::Tags::Tag";
    pub const CLOUDFORMATION_STACK: &str = "AWS::CloudFormation::Stack";
    pub const CONFIG_RESOURCE_COMPLIANCE: &str = "AWS::Config::ResourceCompliance";
}

/// Relationship base names. Unqualified names are suffixed with the target
/// type during normalization when the target type is in
/// [`NAME_QUALIFIED_TYPES`].
pub mod rels {
    pub const ASSOCIATED_WITH: &str = "Is associated with";
    pub const CONTAINED_IN: &str = "Is contained in";
    pub const CONTAINS: &str = "Contains";
    pub const ATTACHED_TO: &str = "Is attached to";
    pub const ASSOCIATED_WITH_SECURITY_GROUP: &str = "Is associated with SecurityGroup";

    pub fn qualified(base: &str, suffix: &str) -> String {
        format!("{base} {suffix}")
    }
}

/// Resource types whose change detection uses the projected-property md5
/// hash rather than the configuration capture time.
pub const MD5_HASHED_TYPES: [&str; 13] = [
    types::APIGATEWAY_METHOD,
    types::APIGATEWAY_RESOURCE,
    types::DYNAMODB_STREAM,
    types::ECS_TASK,
    types::ELBV2_LISTENER,
    types::EKS_NODEGROUP,
    types::ELBV2_TARGET_GROUP,
    types::IAM_AWS_MANAGED_POLICY,
    types::EC2_SPOT,
    types::EC2_SPOT_FLEET,
    types::IAM_INLINE_POLICY,
    types::COGNITO_USER_POOL,
    types::OPENSEARCH_DOMAIN,
];

pub fn uses_md5_change_detection(resource_type: &str) -> bool {
    MD5_HASHED_TYPES.contains(&resource_type)
}

/// Target types whose relationship names are qualified with a type suffix,
/// paired with that suffix (`VPC` is special-cased to camel case).
pub const NAME_QUALIFIED_TYPES: [(&str, &str); 7] = [
    (types::EC2_INSTANCE, "Instance"),
    (types::EC2_NETWORK_INTERFACE, "NetworkInterface"),
    (types::EC2_SECURITY_GROUP, "SecurityGroup"),
    (types::EC2_SUBNET, "Subnet"),
    (types::EC2_VOLUME, "Volume"),
    (types::EC2_VPC, "Vpc"),
    (types::IAM_ROLE, "Role"),
];

pub fn name_qualifier_for(resource_type: &str) -> Option<&'static str> {
    NAME_QUALIFIED_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == resource_type)
        .map(|(_, suffix)| *suffix)
}

/// Graph label for a resource type: `AWS::EC2::Subnet` → `AWS_EC2_Subnet`.
pub fn type_label(resource_type: &str) -> String {
    resource_type.replace("::", "_")
}

/// Edge label for a relationship name: uppercase with underscores.
pub fn edge_label(relationship_name: &str) -> String {
    relationship_name
        .trim()
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierType {
    Arn,
    ResourceId,
    ResourceName,
    Endpoint,
}

/// A relationship before target resolution. Descriptors are resolved to
/// [`Edge`]s against the lookup maps once the whole working set is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDescriptor {
    pub relationship_name: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub rel_name_suffix: Option<String>,
}

impl RelationshipDescriptor {
    pub fn arn(relationship_name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            relationship_name: relationship_name.into(),
            resource_type: None,
            identifier_type: IdentifierType::Arn,
            identifier_value: arn.into(),
            account_id: None,
            region: None,
            rel_name_suffix: None,
        }
    }

    pub fn resource_id(
        relationship_name: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_name: relationship_name.into(),
            resource_type: Some(resource_type.into()),
            identifier_type: IdentifierType::ResourceId,
            identifier_value: resource_id.into(),
            account_id: None,
            region: None,
            rel_name_suffix: None,
        }
    }

    pub fn resource_name(
        relationship_name: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            relationship_name: relationship_name.into(),
            resource_type: Some(resource_type.into()),
            identifier_type: IdentifierType::ResourceName,
            identifier_value: resource_name.into(),
            account_id: None,
            region: None,
            rel_name_suffix: None,
        }
    }

    pub fn endpoint(relationship_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            relationship_name: relationship_name.into(),
            resource_type: None,
            identifier_type: IdentifierType::Endpoint,
            identifier_value: endpoint.into(),
            account_id: None,
            region: None,
            rel_name_suffix: None,
        }
    }

    pub fn in_scope(mut self, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self.region = Some(region.into());
        self
    }
}

/// A resolved edge. `(source, label, target)` is unique within a crawl.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub label: String,
    pub target: String,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        label: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            label: label.into(),
            target: target.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.source != UNKNOWN_TARGET && self.target != UNKNOWN_TARGET
    }
}

/// A discovered cloud entity, identified globally by its canonical ARN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub account_id: String,
    pub region: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub configuration: JsonValue,
    #[serde(default)]
    pub supplementary_configuration: JsonValue,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub configuration_item_capture_time: Option<String>,
    #[serde(default)]
    pub configuration_item_status: Option<String>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub private: Option<bool>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            resource_id: id.clone(),
            id,
            account_id: account_id.into(),
            region: region.into(),
            availability_zone: None,
            resource_type: resource_type.into(),
            resource_name: None,
            configuration: JsonValue::Null,
            supplementary_configuration: JsonValue::Null,
            tags: Vec::new(),
            configuration_item_capture_time: None,
            configuration_item_status: None,
            relationships: Vec::new(),
            vpc_id: None,
            subnet_id: None,
            private: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    pub fn with_configuration(mut self, configuration: JsonValue) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_relationship(mut self, descriptor: RelationshipDescriptor) -> Self {
        self.relationships.push(descriptor);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    pub fn add_relationship(&mut self, descriptor: RelationshipDescriptor) {
        if !self.relationships.contains(&descriptor) {
            self.relationships.push(descriptor);
        }
    }

    pub fn is_global(&self) -> bool {
        self.region == GLOBAL_REGION
    }
}

/// The working set of a crawl: resources keyed by ARN, iteration order
/// deterministic. Resource id uniqueness is enforced by construction: a
/// second insert under the same id replaces the first.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    resources: BTreeMap<String, Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Resource> {
        self.resources.remove(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.iter()
            .filter(move |resource| resource.resource_type == resource_type)
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = Self::new();
        for resource in iter {
            set.insert(resource);
        }
        set
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRegion {
    pub name: String,
    #[serde(default)]
    pub last_crawled: Option<String>,
    #[serde(default)]
    pub is_config_enabled: Option<bool>,
}

impl AccountRegion {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_crawled: None,
            is_config_enabled: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeCount {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionMetadata {
    pub name: String,
    pub count: u64,
    pub resource_types: Vec<ResourceTypeCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesRegionMetadata {
    pub count: u64,
    pub regions: Vec<RegionMetadata>,
}

/// A crawled account. `credentials` lives only in process memory; the
/// persistence projection strips it together with `toDelete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_management_account: bool,
    #[serde(default)]
    pub is_iam_role_deployed: Option<bool>,
    #[serde(default)]
    pub last_crawled: Option<String>,
    #[serde(default)]
    pub regions: Vec<AccountRegion>,
    #[serde(default)]
    pub to_delete: bool,
    #[serde(skip)]
    pub credentials: Option<AccountCredentials>,
    #[serde(default)]
    pub resources_region_metadata: Option<ResourcesRegionMetadata>,
}

impl Account {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            organization_id: None,
            name: None,
            is_management_account: false,
            is_iam_role_deployed: None,
            last_crawled: None,
            regions: Vec::new(),
            to_delete: false,
            credentials: None,
            resources_region_metadata: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.regions.push(AccountRegion::named(region));
        self
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.regions.iter().any(|candidate| candidate.name == region)
    }

    pub fn is_eligible_for_discovery(&self) -> bool {
        self.is_iam_role_deployed == Some(true) && !self.to_delete
    }
}

/// Parses the account id and region out of an ARN, when present.
pub fn arn_parts(arn: &str) -> Option<(&str, &str)> {
    let mut segments = arn.splitn(6, ':');
    let prefix = segments.next()?;
    if prefix != "arn" {
        return None;
    }
    let _partition = segments.next()?;
    let _service = segments.next()?;
    let region = segments.next()?;
    let account = segments.next()?;
    Some((account, region))
}

/// True when the ARN belongs to the provider partition (`arn:aws:...`) and
/// the policy is provider-owned (`::aws:policy/`).
pub fn is_provider_managed_policy_arn(arn: &str) -> bool {
    arn.starts_with("arn:aws:iam::aws:policy/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_label_normalizes_case_and_spacing() {
        assert_eq!(edge_label("Is associated with"), "IS_ASSOCIATED_WITH");
        assert_eq!(
            edge_label(&rels::qualified(rels::CONTAINED_IN, "Subnet")),
            "IS_CONTAINED_IN_SUBNET"
        );
    }

    #[test]
    fn type_label_replaces_separators() {
        assert_eq!(type_label(types::EC2_SUBNET), "AWS_EC2_Subnet");
    }

    #[test]
    fn resource_set_replaces_duplicate_ids() {
        let mut set = ResourceSet::new();
        set.insert(Resource::new("arn:1", types::EC2_INSTANCE, "111", "eu-west-1"));
        set.insert(
            Resource::new("arn:1", types::EC2_INSTANCE, "111", "eu-west-1")
                .with_resource_name("replacement"),
        );
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("arn:1").unwrap().resource_name.as_deref(),
            Some("replacement")
        );
    }

    #[test]
    fn add_relationship_dedupes_identical_descriptors() {
        let mut resource = Resource::new("arn:1", types::LAMBDA_FUNCTION, "111", "eu-west-1");
        let descriptor = RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, "arn:2");
        resource.add_relationship(descriptor.clone());
        resource.add_relationship(descriptor);
        assert_eq!(resource.relationships.len(), 1);
    }

    #[test]
    fn provider_managed_policy_detection() {
        assert!(is_provider_managed_policy_arn(
            "arn:aws:iam::aws:policy/AdministratorAccess"
        ));
        assert!(!is_provider_managed_policy_arn(
            "arn:aws:iam::111111111111:policy/team-policy"
        ));
    }

    #[test]
    fn arn_parts_extracts_account_and_region() {
        let (account, region) =
            arn_parts("arn:aws:lambda:eu-west-1:111111111111:function:ingest").unwrap();
        assert_eq!(account, "111111111111");
        assert_eq!(region, "eu-west-1");
        assert!(arn_parts("subnet-1234").is_none());
    }
}
