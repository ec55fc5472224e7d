use crate::domain::{rels, types, IdentifierType, RelationshipDescriptor, Resource};
use crate::error::Result;
use crate::inference::paths::{eval_path, eval_path_strings};
use crate::provider::ProviderClient;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Declared SDK fetch feeding a descriptor: the request body fields are
/// themselves path expressions over the resource document.
#[derive(Debug, Clone, Copy)]
pub struct SdkCall {
    pub service: &'static str,
    pub action: &'static str,
    pub request_paths: &'static [(&'static str, &'static str)],
}

/// One schema-driven relationship rule for a resource type.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDescriptor {
    pub relationship_name: &'static str,
    pub resource_type: Option<&'static str>,
    pub identifier_type: IdentifierType,
    pub path: &'static str,
    pub root_path: Option<&'static str>,
    pub sdk_call: Option<SdkCall>,
}

const DEFAULT_ROOT_PATH: &str = ".configuration";

const LAMBDA_DESCRIPTORS: [SchemaDescriptor; 3] = [
    SchemaDescriptor {
        relationship_name: rels::ASSOCIATED_WITH,
        resource_type: None,
        identifier_type: IdentifierType::Arn,
        path: ".role",
        root_path: None,
        sdk_call: None,
    },
    SchemaDescriptor {
        relationship_name: rels::CONTAINED_IN,
        resource_type: Some(types::EC2_SUBNET),
        identifier_type: IdentifierType::ResourceId,
        path: ".vpcConfig.subnetIds[]?",
        root_path: None,
        sdk_call: None,
    },
    SchemaDescriptor {
        relationship_name: rels::ASSOCIATED_WITH,
        resource_type: Some(types::EC2_SECURITY_GROUP),
        identifier_type: IdentifierType::ResourceId,
        path: ".vpcConfig.securityGroupIds[]?",
        root_path: None,
        sdk_call: None,
    },
];

const USER_POOL_DESCRIPTORS: [SchemaDescriptor; 1] = [SchemaDescriptor {
    relationship_name: rels::ASSOCIATED_WITH,
    resource_type: None,
    identifier_type: IdentifierType::Arn,
    path: ".lambdaConfig[]?",
    root_path: None,
    sdk_call: None,
}];

const ACCESS_POINT_DESCRIPTORS: [SchemaDescriptor; 1] = [SchemaDescriptor {
    relationship_name: rels::ASSOCIATED_WITH,
    resource_type: Some(types::EFS_FILE_SYSTEM),
    identifier_type: IdentifierType::ResourceId,
    path: ".fileSystemId",
    root_path: None,
    sdk_call: None,
}];

const SEARCH_DOMAIN_DESCRIPTORS: [SchemaDescriptor; 2] = [
    SchemaDescriptor {
        relationship_name: rels::CONTAINED_IN,
        resource_type: Some(types::EC2_SUBNET),
        identifier_type: IdentifierType::ResourceId,
        path: ".VPCOptions.SubnetIds[]?",
        root_path: None,
        sdk_call: None,
    },
    SchemaDescriptor {
        relationship_name: rels::ASSOCIATED_WITH,
        resource_type: Some(types::EC2_SECURITY_GROUP),
        identifier_type: IdentifierType::ResourceId,
        path: ".VPCOptions.SecurityGroupIds[]?",
        root_path: None,
        sdk_call: None,
    },
];

const LOAD_BALANCER_DESCRIPTORS: [SchemaDescriptor; 1] = [SchemaDescriptor {
    relationship_name: rels::CONTAINED_IN,
    resource_type: Some(types::EC2_VPC),
    identifier_type: IdentifierType::ResourceId,
    path: ".vpcId",
    root_path: None,
    sdk_call: None,
}];

/// Rule targets live behind a dedicated list call; the bus and rule names
/// for the request are read off the resource itself.
const EVENT_RULE_DESCRIPTORS: [SchemaDescriptor; 1] = [SchemaDescriptor {
    relationship_name: rels::ASSOCIATED_WITH,
    resource_type: None,
    identifier_type: IdentifierType::Arn,
    path: ".Targets[]?.Arn",
    root_path: Some("."),
    sdk_call: Some(SdkCall {
        service: "events",
        action: "ListTargetsByRule",
        request_paths: &[
            ("Rule", ".configuration.name"),
            ("EventBusName", ".configuration.eventBusName"),
        ],
    }),
}];

pub fn descriptors_for(resource_type: &str) -> &'static [SchemaDescriptor] {
    match resource_type {
        types::LAMBDA_FUNCTION => &LAMBDA_DESCRIPTORS,
        types::COGNITO_USER_POOL => &USER_POOL_DESCRIPTORS,
        types::EFS_ACCESS_POINT => &ACCESS_POINT_DESCRIPTORS,
        types::OPENSEARCH_DOMAIN => &SEARCH_DOMAIN_DESCRIPTORS,
        types::ELBV2_LOAD_BALANCER => &LOAD_BALANCER_DESCRIPTORS,
        types::EVENTS_RULE => &EVENT_RULE_DESCRIPTORS,
        _ => &[],
    }
}

/// Evaluates every descriptor declared for the resource's type. Descriptors
/// with an SDK call are skipped when no client is available (tests, or
/// accounts that lost their credentials mid-crawl).
pub async fn infer_schema_relationships(
    resource: &Resource,
    client: Option<&ProviderClient>,
) -> Result<Vec<RelationshipDescriptor>> {
    let descriptors = descriptors_for(&resource.resource_type);
    if descriptors.is_empty() {
        return Ok(Vec::new());
    }

    let resource_document = serde_json::to_value(resource)?;
    let mut inferred = Vec::new();

    for descriptor in descriptors {
        let document = match &descriptor.sdk_call {
            Some(call) => {
                let Some(client) = client else {
                    continue;
                };
                let mut body = JsonMap::new();
                for (field, path) in call.request_paths {
                    if let Some(value) = eval_path(&resource_document, path).into_iter().next() {
                        body.insert((*field).to_string(), value);
                    }
                }
                client
                    .call(call.service, call.action, JsonValue::Object(body))
                    .await?
            }
            None => resource_document.clone(),
        };

        let root_path = descriptor.root_path.unwrap_or(DEFAULT_ROOT_PATH);
        let scoped = if root_path == "." {
            vec![document]
        } else {
            eval_path(&document, root_path)
        };

        for scope in &scoped {
            for value in eval_path_strings(scope, descriptor.path) {
                inferred.push(RelationshipDescriptor {
                    relationship_name: descriptor.relationship_name.to_string(),
                    resource_type: descriptor.resource_type.map(str::to_string),
                    identifier_type: descriptor.identifier_type,
                    identifier_value: value,
                    account_id: None,
                    region: None,
                    rel_name_suffix: None,
                });
            }
        }
    }

    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lambda_descriptors_read_role_and_vpc_config() {
        let function = Resource::new(
            "arn:aws:lambda:eu-west-1:111:function:ingest",
            types::LAMBDA_FUNCTION,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({
            "role": "arn:aws:iam::111:role/ingest-role",
            "vpcConfig": {
                "subnetIds": ["subnet-1", "subnet-2"],
                "securityGroupIds": ["sg-1"],
            },
        }));

        let inferred = infer_schema_relationships(&function, None).await.unwrap();
        assert_eq!(inferred.len(), 4);
        assert!(inferred.iter().any(|descriptor| {
            descriptor.identifier_value == "arn:aws:iam::111:role/ingest-role"
                && descriptor.identifier_type == IdentifierType::Arn
        }));
        assert!(inferred.iter().any(|descriptor| {
            descriptor.identifier_value == "subnet-2"
                && descriptor.resource_type.as_deref() == Some(types::EC2_SUBNET)
        }));
    }

    #[tokio::test]
    async fn sdk_descriptors_are_skipped_without_a_client() {
        let rule = Resource::new(
            "arn:aws:events:eu-west-1:111:rule/bus/r1",
            types::EVENTS_RULE,
            "111",
            "eu-west-1",
        )
        .with_configuration(json!({ "name": "r1", "eventBusName": "bus" }));
        let inferred = infer_schema_relationships(&rule, None).await.unwrap();
        assert!(inferred.is_empty());
    }
}
