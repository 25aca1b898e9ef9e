//! End-to-end portal flows against the in-memory client.

mod common;

use common::*;
use scholara_cache::{
    derive_key, keys, CacheContext, CollectionScope, KeyParams, MutationRequest, Operation,
};
use scholara_config::AppConfig;
use scholara_core::{CanonicalCode, EntityType, PageRequest};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_student_application_flow() {
    let client = Arc::new(InMemoryClient::with_records(vec![ahmad_application(), institution()]));
    let context = test_context(Arc::clone(&client));

    // An old bookmark still carries the legacy id.
    let bookmarked = context.resolve(EntityType::Application, "42").await;
    let application = bookmarked.data.expect("application found by legacy id");
    assert_eq!(application.code.as_str(), AHMAD_APPLICATION_CODE);

    // The new link uses the code and is served from the same entry.
    client.reset_calls();
    let linked = context.resolve(EntityType::Application, AHMAD_APPLICATION_CODE).await;
    assert_eq!(linked.data.as_ref(), Some(&application));
    assert!(client.calls().is_empty());
    assert_eq!(context.store().detail_keys(EntityType::Application).len(), 1);

    // The dashboard lists Ahmad's applications.
    let dashboard = context.collection_slot(EntityType::Application);
    let scope = CollectionScope::owner(AHMAD_USER_LEGACY_ID);
    let params = KeyParams::new().with_page(PageRequest::default());
    let listed = dashboard.resolve(&scope, &params).await;
    assert_eq!(listed.data.map(|items| items.len()), Some(1));
    let fetches = client.collection_calls();

    // He applies to a second program.
    let outcome = context
        .mutate(
            EntityType::Application,
            MutationRequest::create(json!({
                "owner": { "code": AHMAD_USER_CODE, "legacy_id": AHMAD_USER_LEGACY_ID },
                "parent": { "code": INSTITUTION_CODE },
                "studentName": "Ahmad",
                "program": "Economics",
            })),
        )
        .await
        .unwrap();
    assert!(!outcome.invalidated.is_empty());

    // Returning to the dashboard refetches and shows both.
    let refreshed = dashboard.resolve(&scope, &params).await;
    assert!(client.collection_calls() > fetches);
    let programs: Vec<_> = refreshed
        .data
        .expect("list refetched")
        .iter()
        .filter_map(|r| r.field_str("program").map(str::to_string))
        .collect();
    assert_eq!(programs.len(), 2);
    assert!(programs.contains(&"Economics".to_string()));
    assert_eq!(dashboard.current().data.map(|items| items.len()), Some(2));
}

#[tokio::test]
async fn test_institution_page_shows_new_review_count() {
    let client = Arc::new(InMemoryClient::with_records(vec![institution()]));
    let context = test_context(Arc::clone(&client));
    let page = context.entity_slot(EntityType::Institution);
    let reviews = context.collection_slot(EntityType::Review);
    let scope = CollectionScope::parent(INSTITUTION_LEGACY_ID);

    page.resolve(INSTITUTION_LEGACY_ID).await;
    let before = reviews.resolve(&scope, &KeyParams::new()).await;
    assert_eq!(before.data, Some(vec![]));

    let outcome = context
        .mutate(
            EntityType::Review,
            MutationRequest::create(json!({
                "owner": { "code": AHMAD_USER_CODE },
                "parent": { "code": INSTITUTION_CODE, "legacy_id": INSTITUTION_LEGACY_ID },
                "rating": 5,
            })),
        )
        .await
        .unwrap();

    let institution_key = keys::entity_detail(EntityType::Institution, &CanonicalCode::new(INSTITUTION_CODE));
    assert!(outcome.invalidated.contains(&institution_key));

    let after = reviews.resolve(&scope, &KeyParams::new()).await;
    assert_eq!(after.data.map(|items| items.len()), Some(1));
}

#[test]
fn test_keys_are_deterministic() {
    let first = KeyParams::new()
        .with("status", "submitted")
        .with("page", 2)
        .with("tags", vec!["cs", "math"]);
    let second = KeyParams::new()
        .with("tags", vec!["cs", "math"])
        .with("page", 2)
        .with("status", "submitted");

    let a = derive_key(EntityType::Application, Operation::Listing, &first);
    let b = derive_key(EntityType::Application, Operation::Listing, &second);

    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());
    assert_ne!(
        a,
        derive_key(EntityType::Application, Operation::Listing, &first.clone().with("page", 3))
    );
}

#[tokio::test]
async fn test_contexts_are_isolated() {
    let client = Arc::new(InMemoryClient::with_records(vec![ahmad_application()]));
    let first = test_context(Arc::clone(&client));
    let second = test_context(Arc::clone(&client));

    first.resolve(EntityType::Application, AHMAD_APPLICATION_CODE).await;

    assert_eq!(first.store().len(), 1);
    assert!(second.store().is_empty());
}

#[tokio::test]
async fn test_dispose_stops_sweeper_and_clears() {
    let client = Arc::new(InMemoryClient::with_records(vec![ahmad_application()]));
    let context = CacheContext::create(&AppConfig::default(), client).unwrap();
    assert!(context.has_sweeper());
    context.resolve(EntityType::Application, AHMAD_APPLICATION_CODE).await;

    context.dispose().await;

    assert!(!context.has_sweeper());
    assert!(context.store().is_empty());
}
