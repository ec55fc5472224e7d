use crate::credentials::AccountCredentials;
use crate::domain::{rels, types, Account, RelationshipDescriptor, Resource, ResourceSet};
use crate::error::Result;
use crate::provider::ProviderClient;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

const METHOD_VERBS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

#[derive(Clone)]
pub struct SecondOrderItem {
    pub resource: Resource,
    pub credentials: AccountCredentials,
    pub region: String,
}

/// Tier C runs only over Tier B output; currently that means gateway path
/// items, whose methods require one probe per verb.
pub fn plan(accounts: &BTreeMap<String, Account>, resources: &ResourceSet) -> Vec<SecondOrderItem> {
    resources
        .iter()
        .filter(|resource| resource.resource_type == types::APIGATEWAY_RESOURCE)
        .filter_map(|resource| {
            let account = accounts.get(&resource.account_id)?;
            let credentials = account.credentials.clone()?;
            Some(SecondOrderItem {
                region: resource.region.clone(),
                resource: resource.clone(),
                credentials,
            })
        })
        .collect()
}

pub async fn enrich(client: &ProviderClient, item: SecondOrderItem) -> Result<Vec<Resource>> {
    let path_item = &item.resource;
    let Some(rest_api_id) = path_item
        .configuration
        .get("restApiId")
        .and_then(JsonValue::as_str)
    else {
        return Ok(Vec::new());
    };

    let mut produced = Vec::new();
    for verb in METHOD_VERBS {
        // A missing verb on the path item is the normal case, not an error.
        let Some(method) = client
            .get_rest_api_method(rest_api_id, &path_item.resource_id, verb)
            .await?
        else {
            continue;
        };

        let arn = format!("{}/methods/{verb}", path_item.id);
        let mut resource = Resource::new(
            arn,
            types::APIGATEWAY_METHOD,
            &path_item.account_id,
            &path_item.region,
        )
        .with_resource_id(format!("{}-{verb}", path_item.resource_id))
        .with_relationship(RelationshipDescriptor::arn(rels::CONTAINED_IN, &path_item.id));
        resource.resource_name = Some(verb.to_string());
        resource.configuration = method;
        produced.push(resource);
    }
    Ok(produced)
}
