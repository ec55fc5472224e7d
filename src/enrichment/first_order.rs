use crate::credentials::AccountCredentials;
use crate::domain::{
    rels, types, Account, RelationshipDescriptor, Resource, ResourceSet, GLOBAL_REGION,
};
use crate::error::Result;
use crate::provider::ProviderClient;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Baseline types with a first-order enricher.
const HANDLED_TYPES: [&str; 7] = [
    types::APIGATEWAY_REST_API,
    types::APPSYNC_GRAPHQL_API,
    types::DYNAMODB_TABLE,
    types::ECS_SERVICE,
    types::EKS_CLUSTER,
    types::IAM_ROLE,
    types::IAM_USER,
];

#[derive(Clone)]
pub struct FirstOrderItem {
    pub resource: Resource,
    pub credentials: AccountCredentials,
    pub region: String,
}

pub fn plan(accounts: &BTreeMap<String, Account>, resources: &ResourceSet) -> Vec<FirstOrderItem> {
    resources
        .iter()
        .filter(|resource| HANDLED_TYPES.contains(&resource.resource_type.as_str()))
        .filter_map(|resource| {
            let account = accounts.get(&resource.account_id)?;
            let credentials = account.credentials.clone()?;
            let region = if resource.is_global() {
                account
                    .regions
                    .first()
                    .map(|region| region.name.clone())
                    .unwrap_or_else(|| GLOBAL_REGION.to_string())
            } else {
                resource.region.clone()
            };
            Some(FirstOrderItem {
                resource: resource.clone(),
                credentials,
                region,
            })
        })
        .collect()
}

pub async fn enrich(client: &ProviderClient, item: FirstOrderItem) -> Result<Vec<Resource>> {
    let resource = &item.resource;
    match resource.resource_type.as_str() {
        types::APIGATEWAY_REST_API => rest_api(client, resource).await,
        types::APPSYNC_GRAPHQL_API => graphql_api(client, resource).await,
        types::DYNAMODB_TABLE => table_stream(client, resource).await,
        types::ECS_SERVICE => service_tasks(client, resource).await,
        types::EKS_CLUSTER => cluster_nodegroups(client, resource).await,
        types::IAM_ROLE | types::IAM_USER => inline_policies(client, resource).await,
        _ => Ok(Vec::new()),
    }
}

/// Path items and authorizers of a REST API. The parent API id travels in
/// each path item's configuration so the second-order tier can fetch
/// methods.
async fn rest_api(client: &ProviderClient, api: &Resource) -> Result<Vec<Resource>> {
    let api_id = api
        .configuration
        .get("id")
        .and_then(JsonValue::as_str)
        .unwrap_or(&api.resource_id)
        .to_string();
    let mut produced = Vec::new();

    for path_item in client.get_rest_api_resources(&api_id).await? {
        let Some(item_id) = path_item.get("id").and_then(JsonValue::as_str) else {
            continue;
        };
        let arn = format!(
            "arn:aws:apigateway:{}::/restapis/{api_id}/resources/{item_id}",
            api.region
        );
        let mut resource =
            Resource::new(arn, types::APIGATEWAY_RESOURCE, &api.account_id, &api.region)
                .with_resource_id(item_id)
                .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &api.id));
        resource.resource_name = path_item
            .get("path")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        resource.configuration = json!({
            "restApiId": api_id,
            "id": item_id,
            "path": path_item.get("path"),
            "resourceMethods": path_item.get("resourceMethods"),
        });
        produced.push(resource);
    }

    for authorizer in client.get_rest_api_authorizers(&api_id).await? {
        let Some(authorizer_id) = authorizer.get("id").and_then(JsonValue::as_str) else {
            continue;
        };
        let arn = format!(
            "arn:aws:apigateway:{}::/restapis/{api_id}/authorizers/{authorizer_id}",
            api.region
        );
        let mut resource = Resource::new(
            arn,
            types::APIGATEWAY_AUTHORIZER,
            &api.account_id,
            &api.region,
        )
        .with_resource_id(authorizer_id)
        .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &api.id));
        resource.resource_name = authorizer
            .get("name")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        if let Some(provider_arns) = authorizer.get("providerARNs").and_then(JsonValue::as_array) {
            for provider_arn in provider_arns.iter().filter_map(JsonValue::as_str) {
                resource.add_relationship(RelationshipDescriptor::arn(
                    rels::ASSOCIATED_WITH,
                    provider_arn,
                ));
            }
        }
        resource.configuration = authorizer;
        produced.push(resource);
    }

    Ok(produced)
}

/// Data sources plus the Query and Mutation resolvers of a GraphQL API.
async fn graphql_api(client: &ProviderClient, api: &Resource) -> Result<Vec<Resource>> {
    let api_id = api
        .configuration
        .get("apiId")
        .and_then(JsonValue::as_str)
        .unwrap_or(&api.resource_id)
        .to_string();
    let mut produced = Vec::new();
    let mut data_source_arns: HashMap<String, String> = HashMap::new();

    for data_source in client.list_graphql_data_sources(&api_id).await? {
        let Some(arn) = data_source.get("dataSourceArn").and_then(JsonValue::as_str) else {
            continue;
        };
        let mut resource = Resource::new(
            arn,
            types::APPSYNC_DATA_SOURCE,
            &api.account_id,
            &api.region,
        )
        .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &api.id));
        if let Some(name) = data_source.get("name").and_then(JsonValue::as_str) {
            resource.resource_name = Some(name.to_string());
            data_source_arns.insert(name.to_string(), arn.to_string());
        }
        resource.configuration = data_source;
        produced.push(resource);
    }

    for type_name in ["Query", "Mutation"] {
        for resolver in client.list_graphql_resolvers(&api_id, type_name).await? {
            let Some(arn) = resolver.get("resolverArn").and_then(JsonValue::as_str) else {
                continue;
            };
            let mut resource =
                Resource::new(arn, types::APPSYNC_RESOLVER, &api.account_id, &api.region)
                    .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &api.id));
            resource.resource_name = resolver
                .get("fieldName")
                .and_then(JsonValue::as_str)
                .map(|field| format!("{type_name}.{field}"));
            if let Some(data_source_arn) = resolver
                .get("dataSourceName")
                .and_then(JsonValue::as_str)
                .and_then(|name| data_source_arns.get(name))
            {
                resource.add_relationship(RelationshipDescriptor::arn(
                    rels::ASSOCIATED_WITH,
                    data_source_arn,
                ));
            }
            resource.configuration = resolver;
            produced.push(resource);
        }
    }

    Ok(produced)
}

/// A table with a live stream ARN gets a stream resource.
async fn table_stream(client: &ProviderClient, table: &Resource) -> Result<Vec<Resource>> {
    let Some(stream_arn) = table
        .configuration
        .get("latestStreamArn")
        .and_then(JsonValue::as_str)
    else {
        return Ok(Vec::new());
    };

    let description = client.describe_table_stream(stream_arn).await?;
    let mut resource = Resource::new(
        stream_arn,
        types::DYNAMODB_STREAM,
        &table.account_id,
        &table.region,
    )
    .with_relationship(RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, &table.id));
    resource.configuration = description;
    Ok(vec![resource])
}

/// One task resource per running task in the service.
async fn service_tasks(client: &ProviderClient, service: &Resource) -> Result<Vec<Resource>> {
    let Some(cluster) = service
        .configuration
        .get("cluster")
        .or_else(|| service.configuration.get("clusterArn"))
        .and_then(JsonValue::as_str)
    else {
        return Ok(Vec::new());
    };
    let service_name = service
        .configuration
        .get("serviceName")
        .and_then(JsonValue::as_str)
        .or(service.resource_name.as_deref())
        .unwrap_or(&service.resource_id);

    let tasks = client
        .describe_cluster_tasks(cluster, Some(service_name))
        .await?;
    Ok(tasks
        .into_iter()
        .filter_map(|task| {
            let arn = task.get("taskArn").and_then(JsonValue::as_str)?.to_string();
            let mut resource =
                Resource::new(arn, types::ECS_TASK, &service.account_id, &service.region)
                    .with_relationship(RelationshipDescriptor::arn(
                        rels::ASSOCIATED_WITH,
                        &service.id,
                    ));
            resource.availability_zone = task
                .get("availabilityZone")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            resource.configuration = task;
            Some(resource)
        })
        .collect())
}

async fn cluster_nodegroups(client: &ProviderClient, cluster: &Resource) -> Result<Vec<Resource>> {
    let cluster_name = cluster
        .configuration
        .get("name")
        .and_then(JsonValue::as_str)
        .or(cluster.resource_name.as_deref())
        .unwrap_or(&cluster.resource_id)
        .to_string();

    let mut produced = Vec::new();
    for nodegroup_name in client.list_nodegroups(&cluster_name).await? {
        let nodegroup = client
            .describe_nodegroup(&cluster_name, &nodegroup_name)
            .await?;
        let Some(arn) = nodegroup.get("nodegroupArn").and_then(JsonValue::as_str) else {
            continue;
        };
        let mut resource =
            Resource::new(arn, types::EKS_NODEGROUP, &cluster.account_id, &cluster.region)
                .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &cluster.id));
        resource.resource_name = Some(nodegroup_name);
        resource.configuration = nodegroup;
        produced.push(resource);
    }
    Ok(produced)
}

/// One inline-policy resource per inline policy on the principal; inline
/// policies are global like their parents.
async fn inline_policies(client: &ProviderClient, principal: &Resource) -> Result<Vec<Resource>> {
    let principal_name = principal
        .resource_name
        .as_deref()
        .unwrap_or(&principal.resource_id);
    let policies = if principal.resource_type == types::IAM_ROLE {
        client.list_role_inline_policies(principal_name).await?
    } else {
        client.list_user_inline_policies(principal_name).await?
    };

    Ok(policies
        .into_iter()
        .map(|(policy_name, document)| {
            let arn = format!("{}/inlinePolicy/{policy_name}", principal.id);
            let mut resource = Resource::new(
                arn,
                types::IAM_INLINE_POLICY,
                &principal.account_id,
                GLOBAL_REGION,
            )
            .with_relationship(RelationshipDescriptor::arn(
                rels::ASSOCIATED_WITH,
                &principal.id,
            ));
            resource.resource_name = Some(policy_name.clone());
            resource.configuration = json!({
                "policyName": policy_name,
                "policyDocument": document,
            });
            resource
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_skips_accounts_without_credentials() {
        let mut resources = ResourceSet::new();
        resources.insert(Resource::new(
            "arn:aws:apigateway:eu-west-1::/restapis/abc",
            types::APIGATEWAY_REST_API,
            "111111111111",
            "eu-west-1",
        ));
        let accounts =
            BTreeMap::from([("111111111111".to_string(), Account::new("111111111111"))]);
        assert!(plan(&accounts, &resources).is_empty());
    }
}
