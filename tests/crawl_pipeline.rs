mod support;

use cartographer::aggregator::AggregatorReader;
use cartographer::delta::compute_delta;
use cartographer::domain::{types, Account, ResourceSet};
use cartographer::enrichment::tags::synthesize_tags;
use cartographer::graph::search::SearchIndexClient;
use cartographer::graph::GraphStoreClient;
use cartographer::inference::RelationshipInferencer;
use cartographer::metadata;
use cartographer::persister::{projected_by_id, reconcile, Persister};
use cartographer::projection::project;
use cartographer::provider::ProviderClient;
use serde_json::json;
use std::collections::BTreeMap;
use support::{
    account_with_credentials, test_credentials, throttles, FakeProviderTransport,
    InMemoryGraphStore,
};

fn aggregate_row(arn: &str, account_id: &str, region: &str, resource_type: &str) -> String {
    json!({
        "arn": arn,
        "accountId": account_id,
        "awsRegion": region,
        "resourceType": resource_type,
        "resourceId": arn.rsplit('/').next().unwrap(),
        "configurationItemStatus": "OK",
        "configurationItemCaptureTime": "2026-07-01T00:00:00Z",
        "configuration": { "cidrBlock": "10.0.0.0/24", "vpcId": "vpc-1" },
        "tags": [{ "key": "env", "value": "prod" }],
        "relationships": [],
    })
    .to_string()
}

#[tokio::test]
async fn full_pipeline_filters_revived_accounts_and_deletes_their_remnants() {
    let transport = FakeProviderTransport::new();
    transport.respond(
        "config",
        "SelectAggregateResourceConfig",
        json!({
            "Results": [
                aggregate_row(
                    "arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1",
                    "111111111111",
                    "eu-west-1",
                    types::EC2_SUBNET,
                ),
                // This account fell out of the organization; its resources
                // linger in the aggregator for a while.
                aggregate_row(
                    "arn:aws:ec2:eu-west-1:999999999999:subnet/subnet-9",
                    "999999999999",
                    "eu-west-1",
                    types::EC2_SUBNET,
                ),
            ],
        }),
    );
    let provider = ProviderClient::new(transport, throttles(), test_credentials(), "eu-west-1");

    let accounts: BTreeMap<String, Account> = BTreeMap::from([(
        "111111111111".to_string(),
        account_with_credentials("111111111111", "eu-west-1"),
    )]);

    let reader = AggregatorReader::new(provider.clone(), "discovery-aggregator");
    let mut resources = reader.read_baseline(&accounts).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert!(resources.contains("arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1"));

    synthesize_tags(&mut resources);
    let lookups = RelationshipInferencer::new(provider)
        .run(&accounts, &mut resources)
        .await
        .unwrap();

    // The store still holds the removed account's subnet from an earlier
    // crawl; the delta must delete it rather than revive it.
    let store = InMemoryGraphStore::new();
    store.seed_resource(
        "arn:aws:ec2:eu-west-1:999999999999:subnet/subnet-9",
        "AWS_EC2_Subnet",
        None,
        json!({
            "accountId": "999999999999",
            "awsRegion": "eu-west-1",
            "resourceType": types::EC2_SUBNET,
        }),
    );
    let graph = GraphStoreClient::new(store.clone());
    let db_resources = graph.get_resources().await.unwrap();
    let db_relationships = graph.get_relationships().await.unwrap();

    let delta = compute_delta(&resources, &lookups, &db_resources, &db_relationships);
    assert_eq!(
        delta.resource_ids_to_delete,
        vec!["arn:aws:ec2:eu-west-1:999999999999:subnet/subnet-9".to_string()]
    );

    let persister = Persister::new(graph, SearchIndexClient::new(store.clone()));
    let outcome = persister.persist(&delta).await;
    assert!(outcome.failed_stores.is_empty());
    assert!(outcome.failed_deletes.is_empty());

    let projected = projected_by_id(resources.iter().map(project).collect());
    let reconciled = reconcile(&projected, &db_resources, &outcome);

    // The reconciled set covers exactly the surviving working set.
    let reconciled_ids: Vec<&str> = reconciled.iter().map(|entry| entry.id.as_str()).collect();
    assert!(reconciled_ids.contains(&"arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1"));
    assert!(!reconciled_ids.contains(&"arn:aws:ec2:eu-west-1:999999999999:subnet/subnet-9"));

    let rollup = metadata::aggregate(&reconciled);
    let account_rollup = rollup.get("111111111111").unwrap();
    assert_eq!(account_rollup.count, 2);
    let region_names: Vec<&str> = account_rollup
        .regions
        .iter()
        .map(|region| region.name.as_str())
        .collect();
    assert!(region_names.contains(&"eu-west-1"));
    assert!(region_names.contains(&"global"));
}

#[tokio::test]
async fn aggregator_rows_retain_wide_columns() {
    let transport = FakeProviderTransport::new();
    transport.respond(
        "config",
        "SelectAggregateResourceConfig",
        json!({
            "Results": [aggregate_row(
                "arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1",
                "111111111111",
                "eu-west-1",
                types::EC2_SUBNET,
            )],
        }),
    );
    let provider = ProviderClient::new(
        transport.clone(),
        throttles(),
        test_credentials(),
        "eu-west-1",
    );
    let accounts = BTreeMap::from([(
        "111111111111".to_string(),
        account_with_credentials("111111111111", "eu-west-1"),
    )]);

    let resources = AggregatorReader::new(provider, "discovery-aggregator")
        .read_baseline(&accounts)
        .await
        .unwrap();
    let subnet = resources
        .get("arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1")
        .unwrap();
    assert_eq!(subnet.configuration["vpcId"], "vpc-1");
    assert_eq!(subnet.tags[0].key, "env");
    assert_eq!(
        subnet.configuration_item_capture_time.as_deref(),
        Some("2026-07-01T00:00:00Z")
    );

    // The advanced query names the wide columns explicitly.
    let calls = transport.calls_to("config", "SelectAggregateResourceConfig");
    let expression = calls[0]["Expression"].as_str().unwrap();
    assert!(expression.contains("supplementaryConfiguration"));
    assert!(expression.contains("relationships"));
    assert!(expression.contains("NOT IN"));
}

#[test]
fn projection_survives_a_second_pass_over_every_resource() {
    use cartographer::projection::project_map;

    let mut resources = ResourceSet::new();
    resources.insert(
        cartographer::domain::Resource::new(
            "arn:aws:ec2:eu-west-1:111111111111:subnet/subnet-1",
            types::EC2_SUBNET,
            "111111111111",
            "eu-west-1",
        )
        .with_configuration(json!({ "vpcId": "vpc-1" }))
        .with_tag("Name", "private-a"),
    );
    synthesize_tags(&mut resources);

    for resource in resources.iter() {
        let projected = project(resource);
        assert_eq!(projected.properties, project_map(projected.properties.clone()));
    }
}
