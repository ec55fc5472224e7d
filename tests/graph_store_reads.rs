mod support;

use cartographer::graph::GraphStoreClient;
use serde_json::json;
use std::sync::atomic::Ordering;
use support::InMemoryGraphStore;

fn seed_resources(store: &InMemoryGraphStore, count: usize) {
    for index in 0..count {
        store.seed_resource(
            &format!("arn:resource-{index:05}"),
            "AWS_EC2_Instance",
            None,
            json!({ "resourceType": "AWS::EC2::Instance" }),
        );
    }
}

#[tokio::test]
async fn payload_too_large_halves_window_then_resets_page_size() {
    let store = InMemoryGraphStore::new();
    seed_resources(&store, 700);
    store.fail_first_resource_page.store(true, Ordering::SeqCst);

    let client = GraphStoreClient::new(store.clone());
    let resources = client.get_resources().await.unwrap();
    assert_eq!(resources.len(), 700);

    let windows = store.resource_windows.lock().unwrap().clone();
    // Rejected full window, replayed at half size from the same start, then
    // resumed with the default page size.
    assert_eq!(windows[0], (0, 1000));
    assert_eq!(windows[1], (0, 500));
    assert_eq!(windows[2], (500, 1500));
}

#[tokio::test]
async fn resource_read_stops_on_empty_page() {
    let store = InMemoryGraphStore::new();
    seed_resources(&store, 3);
    let client = GraphStoreClient::new(store.clone());
    let resources = client.get_resources().await.unwrap();
    assert_eq!(resources.len(), 3);
    assert!(resources.contains_key("arn:resource-00000"));
}

#[tokio::test]
async fn relationship_read_issues_one_extra_terminal_request() {
    let store = InMemoryGraphStore::new();
    // One short page: the reader still needs the following empty page to
    // stop, so two requests total.
    store.seed_relationship("edge-1", "arn:a", "IS_ASSOCIATED_WITH", "arn:b");
    let client = GraphStoreClient::new(store.clone());

    let relationships = client.get_relationships().await.unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(store.relationship_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_store_reads_cleanly() {
    let store = InMemoryGraphStore::new();
    let client = GraphStoreClient::new(store.clone());
    assert!(client.get_resources().await.unwrap().is_empty());
    assert!(client.get_relationships().await.unwrap().is_empty());
    assert!(client.get_accounts().await.unwrap().is_empty());
}
