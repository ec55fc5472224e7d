use crate::error::{Error, Result};
use crate::graph::transport::GraphTransport;
use crate::projection::{ResourceUpdate, StoredResource};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

const INDEX_RESOURCES: &str = "mutation IndexResources($resources: [ResourceInput]!) { indexResources(resources: $resources) { unprocessedResources } }";
const UPDATE_INDEXED: &str = "mutation UpdateIndexedResources($resources: [ResourceUpdateInput]!) { updateIndexedResources(resources: $resources) { unprocessedResources } }";
const DELETE_INDEXED: &str = "mutation DeleteIndexedResources($resourceIds: [String]!) { deleteIndexedResources(resourceIds: $resourceIds) { unprocessedResources } }";

/// Client for the full-text search index. Every mutation reports the subset
/// the index could not process; a non-empty subset surfaces as the
/// `UnprocessedSearchIndexResources` kind for the dual-store coordinator.
#[derive(Clone)]
pub struct SearchIndexClient {
    transport: Arc<dyn GraphTransport>,
}

impl SearchIndexClient {
    pub fn new(transport: Arc<dyn GraphTransport>) -> Self {
        Self { transport }
    }

    pub async fn index(&self, resources: &[StoredResource]) -> Result<()> {
        let payload: Vec<JsonValue> = resources.iter().map(StoredResource::to_input).collect();
        let data = self
            .transport
            .execute(
                "indexResources",
                INDEX_RESOURCES,
                json!({ "resources": payload }),
            )
            .await?;
        raise_unprocessed(&data)
    }

    pub async fn update(&self, updates: &[ResourceUpdate]) -> Result<()> {
        let payload: Vec<JsonValue> = updates.iter().map(ResourceUpdate::to_input).collect();
        let data = self
            .transport
            .execute(
                "updateIndexedResources",
                UPDATE_INDEXED,
                json!({ "resources": payload }),
            )
            .await?;
        raise_unprocessed(&data)
    }

    pub async fn delete_indexed(&self, resource_ids: &[String]) -> Result<()> {
        let data = self
            .transport
            .execute(
                "deleteIndexedResources",
                DELETE_INDEXED,
                json!({ "resourceIds": resource_ids }),
            )
            .await?;
        raise_unprocessed(&data)
    }
}

fn raise_unprocessed(data: &JsonValue) -> Result<()> {
    let unprocessed: Vec<String> = data
        .get("unprocessedResources")
        .and_then(JsonValue::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if unprocessed.is_empty() {
        Ok(())
    } else {
        Err(Error::UnprocessedSearchIndexResources { ids: unprocessed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprocessed_subset_raises_typed_error() {
        let err = raise_unprocessed(&json!({ "unprocessedResources": ["arn:1", "arn:2"] }))
            .unwrap_err();
        match err {
            Error::UnprocessedSearchIndexResources { ids } => {
                assert_eq!(ids, vec!["arn:1".to_string(), "arn:2".to_string()]);
            }
            other => panic!("unexpected error kind: {other}"),
        }
    }

    #[test]
    fn empty_subset_is_success() {
        assert!(raise_unprocessed(&json!({ "unprocessedResources": [] })).is_ok());
        assert!(raise_unprocessed(&json!({})).is_ok());
    }
}
