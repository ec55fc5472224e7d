mod support;

use cartographer::config::{CrossAccountDiscovery, DiscoveryConfig};
use cartographer::domain::Account;
use cartographer::graph::GraphStoreClient;
use cartographer::metadata::AccountWriter;
use cartographer::provider::ProviderClient;
use cartographer::resolver::AccountResolver;
use serde_json::json;
use std::collections::BTreeMap;
use support::{test_credentials, throttles, FakeProviderTransport, InMemoryGraphStore};

fn config(mode: CrossAccountDiscovery) -> DiscoveryConfig {
    DiscoveryConfig {
        cluster_name: "discovery-cluster".to_string(),
        config_aggregator_name: "discovery-aggregator".to_string(),
        cross_account_discovery: mode,
        custom_user_agent: None,
        graph_store_url: "https://graph.example.com/graphql".to_string(),
        organization_unit_id: Some("ou-root".to_string()),
        region: "eu-west-1".to_string(),
        root_account_id: "111111111111".to_string(),
        discovery_role_name: "cartographer-discovery".to_string(),
        vpc_id: None,
        log_level: None,
    }
}

fn org_transport() -> std::sync::Arc<FakeProviderTransport> {
    let transport = FakeProviderTransport::new();
    transport.respond(
        "organizations",
        "DescribeOrganization",
        json!({ "Organization": { "Id": "o-abc123", "MasterAccountId": "111111111111" } }),
    );
    transport.respond(
        "organizations",
        "ListOrganizationalUnitsForParent",
        json!({ "OrganizationalUnits": [] }),
    );
    transport.respond(
        "organizations",
        "ListAccountsForParent",
        json!({
            "Accounts": [
                { "Id": "111111111111", "Name": "management" },
                { "Id": "222222222222", "Name": "workloads" },
            ],
        }),
    );
    transport.respond(
        "sts",
        "AssumeRole",
        json!({
            "Credentials": {
                "AccessKeyId": "AKIDASSUMED",
                "SecretAccessKey": "assumed-secret",
                "SessionToken": "assumed-token",
                "Expiration": "2026-08-02T12:00:00+00:00",
            },
        }),
    );
    transport.respond(
        "config",
        "DescribeConfigurationRecorders",
        json!({ "ConfigurationRecorders": [{ "name": "default" }] }),
    );
    transport.respond(
        "config",
        "DescribeDeliveryChannels",
        json!({ "DeliveryChannels": [{ "name": "default" }] }),
    );
    transport
}

#[tokio::test(start_paused = true)]
async fn organization_mode_reconciles_and_labels_accounts() {
    let transport = org_transport();
    let provider = ProviderClient::new(
        transport.clone(),
        throttles(),
        test_credentials(),
        "eu-west-1",
    );
    let resolver = AccountResolver::new(config(CrossAccountDiscovery::Organizations), provider);

    // Account 333 was crawled before but is gone from the organization.
    let stored = vec![Account::new("333333333333").with_region("eu-west-1")];
    let accounts = resolver.resolve(stored).await.unwrap();

    assert_eq!(accounts.len(), 3);
    let management = accounts.get("111111111111").unwrap();
    assert!(management.is_management_account);
    assert_eq!(management.organization_id.as_deref(), Some("o-abc123"));
    assert_eq!(management.is_iam_role_deployed, Some(true));
    assert!(management.credentials.is_some());
    assert_eq!(
        management.regions[0].is_config_enabled,
        Some(true),
        "recorder plus delivery channel means config is enabled"
    );

    let removed = accounts.get("333333333333").unwrap();
    assert!(removed.to_delete);
    assert!(!removed.is_eligible_for_discovery());

    // The trust role ARN carries the root-account suffix.
    let assume_calls = transport.calls_to("sts", "AssumeRole");
    assert!(assume_calls.iter().any(|call| {
        call["RoleArn"]
            == json!("arn:aws:iam::222222222222:role/cartographer-discovery-111111111111")
    }));
}

#[tokio::test(start_paused = true)]
async fn denied_trust_roles_mark_accounts_undeployed_but_keep_them() {
    let transport = org_transport();
    transport.deny("sts", "AssumeRole");
    let provider = ProviderClient::new(transport, throttles(), test_credentials(), "eu-west-1");
    let resolver = AccountResolver::new(config(CrossAccountDiscovery::Organizations), provider);

    let accounts = resolver.resolve(Vec::new()).await.unwrap();
    assert_eq!(accounts.len(), 2);
    for account in accounts.values() {
        assert_eq!(account.is_iam_role_deployed, Some(false));
        assert!(account.credentials.is_none());
        assert!(!account.is_eligible_for_discovery());
    }
}

#[tokio::test(start_paused = true)]
async fn access_denied_config_probe_disqualifies_the_account() {
    let transport = org_transport();
    transport.deny("config", "DescribeConfigurationRecorders");
    let provider = ProviderClient::new(transport, throttles(), test_credentials(), "eu-west-1");
    let resolver = AccountResolver::new(config(CrossAccountDiscovery::Organizations), provider);

    let accounts = resolver.resolve(Vec::new()).await.unwrap();
    for account in accounts.values() {
        assert_eq!(account.is_iam_role_deployed, Some(false));
    }
}

#[tokio::test(start_paused = true)]
async fn direct_mode_uses_the_stored_account_list() {
    let transport = org_transport();
    let provider = ProviderClient::new(
        transport.clone(),
        throttles(),
        test_credentials(),
        "eu-west-1",
    );
    let resolver = AccountResolver::new(config(CrossAccountDiscovery::SelfManaged), provider);

    let stored = vec![Account::new("444444444444").with_region("eu-west-1")];
    let accounts = resolver.resolve(stored).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert!(accounts.contains_key("444444444444"));
    assert!(transport
        .calls_to("organizations", "ListAccountsForParent")
        .is_empty());
}

#[tokio::test]
async fn last_crawled_only_advances_for_deployed_accounts() {
    let store = InMemoryGraphStore::new();
    let writer = AccountWriter::new(
        config(CrossAccountDiscovery::SelfManaged),
        GraphStoreClient::new(store.clone()),
    );

    let mut deployed = Account::new("111111111111").with_region("eu-west-1");
    deployed.is_iam_role_deployed = Some(true);
    let mut undeployed = Account::new("222222222222").with_region("eu-west-1");
    undeployed.is_iam_role_deployed = Some(false);

    let mut accounts = BTreeMap::from([
        ("111111111111".to_string(), deployed),
        ("222222222222".to_string(), undeployed),
    ]);
    writer.write_accounts(&mut accounts, BTreeMap::new()).await;

    assert!(accounts.get("111111111111").unwrap().last_crawled.is_some());
    assert!(accounts.get("222222222222").unwrap().last_crawled.is_none());

    let persisted = store.accounts.lock().unwrap();
    for account in persisted.iter() {
        assert!(account.get("toDelete").is_none());
        assert!(account.get("credentials").is_none());
    }
}
