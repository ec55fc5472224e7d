use crate::domain::{rels, types, Account, RelationshipDescriptor, ResourceSet};
use crate::error::Result;
use crate::inference::env_vars::infer_env_var_relationships;
use crate::inference::lookup::LookupTables;
use crate::inference::Patch;
use crate::pool::settle_all;
use crate::provider::ProviderClient;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::warn;

const STAGE_ONE_CONCURRENCY: usize = 10;

/// Stage 1: per-(account, region) batch inference. Handlers run with
/// settled-all semantics; every failure is collected and logged, none is
/// fatal to the crawl.
pub async fn run_stage_one(
    provider: &ProviderClient,
    accounts: &BTreeMap<String, Account>,
    resources: &ResourceSet,
    lookups: &LookupTables,
) -> Vec<Patch> {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum Handler {
        EventSources,
        Functions,
        SnsSubscriptions,
        TransitGatewayVpcAttachments,
    }
    const HANDLERS: [Handler; 4] = [
        Handler::EventSources,
        Handler::Functions,
        Handler::SnsSubscriptions,
        Handler::TransitGatewayVpcAttachments,
    ];

    let mut work = Vec::new();
    for account in accounts.values() {
        if !account.is_eligible_for_discovery() {
            continue;
        }
        let Some(credentials) = account.credentials.clone() else {
            continue;
        };
        for region in &account.regions {
            for handler in HANDLERS {
                work.push((
                    handler,
                    account.account_id.clone(),
                    region.name.clone(),
                    credentials.clone(),
                ));
            }
        }
    }

    let outcomes = settle_all(
        work,
        STAGE_ONE_CONCURRENCY,
        |(handler, account_id, region, credentials)| {
            let client = provider.with_credentials(credentials, &region);
            async move {
                let patches = match handler {
                    Handler::EventSources => event_sources(&client, lookups).await,
                    Handler::Functions => {
                        Ok(function_env_vars(resources, &account_id, &region, lookups))
                    }
                    Handler::SnsSubscriptions => sns_subscriptions(&client, lookups).await,
                    Handler::TransitGatewayVpcAttachments => {
                        transit_gateway_vpc_attachments(
                            &client, resources, &account_id, &region, lookups,
                        )
                        .await
                    }
                };
                patches.map_err(|err| {
                    crate::error::Error::with_context(
                        format!("stage-one handler {handler:?} failed for {account_id}/{region}"),
                        err,
                    )
                })
            }
        },
    )
    .await;

    let mut patches = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(produced) => patches.extend(produced),
            Err(err) => warn!(error = %err, "stage-one inference handler failed"),
        }
    }
    patches
}

/// Function→stream mappings become `associated-with` edges on the function.
async fn event_sources(client: &ProviderClient, lookups: &LookupTables) -> Result<Vec<Patch>> {
    let mappings = client.list_event_source_mappings().await?;
    let mut patches = Vec::new();
    for mapping in mappings {
        let Some(source) = mapping.get("EventSourceArn").and_then(JsonValue::as_str) else {
            continue;
        };
        let Some(function) = mapping.get("FunctionArn").and_then(JsonValue::as_str) else {
            continue;
        };
        if lookups.contains_id(source) && lookups.contains_id(function) {
            patches.push(Patch::AddRelationship {
                resource_id: function.to_string(),
                descriptor: RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, source),
            });
        }
    }
    Ok(patches)
}

/// Environment-variable resolution for every function in the scope.
fn function_env_vars(
    resources: &ResourceSet,
    account_id: &str,
    region: &str,
    lookups: &LookupTables,
) -> Vec<Patch> {
    let mut patches = Vec::new();
    for function in resources.of_type(types::LAMBDA_FUNCTION) {
        if function.account_id != account_id || function.region != region {
            continue;
        }
        let values: Vec<&str> = function
            .configuration
            .get("environment")
            .and_then(|environment| environment.get("variables"))
            .and_then(JsonValue::as_object)
            .map(|variables| {
                variables
                    .values()
                    .filter_map(JsonValue::as_str)
                    .collect()
            })
            .unwrap_or_default();
        for descriptor in infer_env_var_relationships(
            &function.id,
            account_id,
            region,
            values.into_iter(),
            lookups,
        ) {
            patches.push(Patch::AddRelationship {
                resource_id: function.id.clone(),
                descriptor,
            });
        }
    }
    patches
}

/// A subscription whose topic and endpoint are both known resources links
/// the topic to the endpoint.
async fn sns_subscriptions(client: &ProviderClient, lookups: &LookupTables) -> Result<Vec<Patch>> {
    let subscriptions = client.list_sns_subscriptions().await?;
    let mut patches = Vec::new();
    for subscription in subscriptions {
        let Some(topic) = subscription.get("TopicArn").and_then(JsonValue::as_str) else {
            continue;
        };
        let Some(endpoint) = subscription.get("Endpoint").and_then(JsonValue::as_str) else {
            continue;
        };
        if lookups.contains_id(topic) && lookups.contains_id(endpoint) {
            patches.push(Patch::AddRelationship {
                resource_id: topic.to_string(),
                descriptor: RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, endpoint),
            });
        }
    }
    Ok(patches)
}

/// Augments attachment records with owner-account information and links the
/// attachment to its gateway, VPC, and subnets in the owner's scope.
async fn transit_gateway_vpc_attachments(
    client: &ProviderClient,
    resources: &ResourceSet,
    account_id: &str,
    region: &str,
    lookups: &LookupTables,
) -> Result<Vec<Patch>> {
    let attachment_ids: Vec<String> = resources
        .of_type(types::EC2_TRANSIT_GATEWAY_ATTACHMENT)
        .filter(|attachment| attachment.account_id == account_id && attachment.region == region)
        .map(|attachment| attachment.resource_id.clone())
        .collect();
    if attachment_ids.is_empty() {
        return Ok(Vec::new());
    }

    let described = client
        .describe_transit_gateway_vpc_attachments(&attachment_ids)
        .await?;
    let mut patches = Vec::new();
    for attachment in described {
        let Some(attachment_id) = attachment
            .get("TransitGatewayAttachmentId")
            .and_then(JsonValue::as_str)
        else {
            continue;
        };
        let Some(owner_id) = lookups
            .lookup_identifier(
                types::EC2_TRANSIT_GATEWAY_ATTACHMENT,
                attachment_id,
                account_id,
                region,
            )
            .cloned()
        else {
            continue;
        };
        let vpc_owner = attachment
            .get("VpcOwnerId")
            .and_then(JsonValue::as_str)
            .unwrap_or(account_id)
            .to_string();

        if let Some(gateway_id) = attachment
            .get("TransitGatewayId")
            .and_then(JsonValue::as_str)
        {
            patches.push(Patch::AddRelationship {
                resource_id: owner_id.clone(),
                descriptor: RelationshipDescriptor::resource_id(
                    rels::ATTACHED_TO,
                    types::EC2_TRANSIT_GATEWAY,
                    gateway_id,
                )
                .in_scope(account_id, region),
            });
        }
        if let Some(vpc_id) = attachment.get("VpcId").and_then(JsonValue::as_str) {
            patches.push(Patch::AddRelationship {
                resource_id: owner_id.clone(),
                descriptor: RelationshipDescriptor::resource_id(
                    rels::ASSOCIATED_WITH,
                    types::EC2_VPC,
                    vpc_id,
                )
                .in_scope(&vpc_owner, region),
            });
        }
        if let Some(subnet_ids) = attachment.get("SubnetIds").and_then(JsonValue::as_array) {
            for subnet_id in subnet_ids.iter().filter_map(JsonValue::as_str) {
                patches.push(Patch::AddRelationship {
                    resource_id: owner_id.clone(),
                    descriptor: RelationshipDescriptor::resource_id(
                        rels::ASSOCIATED_WITH,
                        types::EC2_SUBNET,
                        subnet_id,
                    )
                    .in_scope(&vpc_owner, region),
                });
            }
        }
    }
    Ok(patches)
}
