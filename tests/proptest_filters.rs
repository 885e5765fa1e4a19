//! Property-based tests using proptest
//!
//! These tests verify key casing, response normalization and filter
//! semantics using randomized inputs.

use cloudgraph::client::{ClientRegistry, PoolConfig, ReplayFactory};
use cloudgraph::query::{Exclude, Filter};
use cloudgraph::resource::case::{camel_to_snake, snake_to_camelcap};
use cloudgraph::resource::{Catalog, Resource, Session};
use proptest::prelude::*;
use serde_json::{json, Value};

const WIDGET_CATALOG: &str = r#"{"kinds": {"widget": {
    "service": "widgets",
    "key_prefix": "Widget",
    "identity_fields": ["name"],
    "describe": {"params": {"name": {"name": "WidgetNames", "kind": "list"}}}
}}}"#;

fn widget_session() -> Session {
    let catalog = Catalog::from_json(WIDGET_CATALOG).expect("widget catalog");
    let registry = ClientRegistry::new(ReplayFactory::default(), "us-east-1", PoolConfig::default());
    Session::builder(registry).catalog(catalog).build()
}

/// Generate arbitrary widget records
fn arb_widget() -> impl Strategy<Value = Value> {
    (
        "[a-z][a-z0-9-]{0,20}", // name
        prop_oneof!["Running", "Stopped", "Pending"],
        0u32..100,
        prop::collection::vec("[a-z]{1,6}", 0..4),
    )
        .prop_map(|(name, status, size, zones)| {
            json!({
                "WidgetName": name,
                "Status": status,
                "Size": size,
                "AvailabilityZones": zones,
            })
        })
}

/// Generate a list of widgets
fn arb_widget_list() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(arb_widget(), 0..30)
}

fn build(session: &Session, records: &[Value]) -> Vec<Resource> {
    let widgets = session.resources("widget").unwrap();
    records
        .iter()
        .map(|r| widgets.from_record(r.clone()).unwrap())
        .collect()
}

fn names(resources: &[Resource]) -> Vec<String> {
    resources
        .iter()
        .filter_map(|r| r.str_field("name").map(|s| s.to_string()))
        .collect()
}

proptest! {
    /// Snake-casing a CamelCase word sequence and casing it back is lossless
    ///
    /// Words have at least two characters; single capitals would read as
    /// an acronym.
    #[test]
    fn snake_case_round_trips(words in prop::collection::vec("[a-z][a-z0-9]{1,7}", 1..5)) {
        let camel: String = words.iter().map(|w| snake_to_camelcap(w)).collect();
        let snake = camel_to_snake(&camel);
        prop_assert_eq!(&snake, &words.join("_"));
        prop_assert_eq!(snake_to_camelcap(&snake), camel);
    }

    /// Plain fields keep their values; only key casing changes
    #[test]
    fn normalization_preserves_values(record in arb_widget()) {
        let session = widget_session();
        let widget = &build(&session, std::slice::from_ref(&record))[0];

        prop_assert_eq!(widget.str_field("name"), record["WidgetName"].as_str());
        prop_assert_eq!(widget.field("status").unwrap().to_json(), record["Status"].clone());
        prop_assert_eq!(widget.field("size").unwrap().to_json(), record["Size"].clone());
        prop_assert_eq!(
            widget.field("availability_zones").unwrap().to_json(),
            record["AvailabilityZones"].clone()
        );
        prop_assert!(widget.is_loaded());
    }

    /// Filter and Exclude partition the input, preserving order
    #[test]
    fn filter_and_exclude_partition(items in arb_widget_list(), needle in "[a-z]{0,3}") {
        let session = widget_session();
        let resources = build(&session, &items);

        let (kept, dropped) = tokio_test::block_on(async {
            let filter = Filter::new().with("name__icontains", needle.as_str()).unwrap();
            let exclude = Exclude::new().with("name__icontains", needle.as_str()).unwrap();
            (
                filter.run(&session, resources.clone()).await.unwrap(),
                exclude.run(&session, resources.clone()).await.unwrap(),
            )
        });

        prop_assert_eq!(kept.len() + dropped.len(), resources.len());
        let expected: Vec<String> = names(&resources)
            .into_iter()
            .filter(|n| n.contains(&needle))
            .collect();
        prop_assert_eq!(names(&kept), expected);
    }

    /// Filtering twice with the same predicate changes nothing
    #[test]
    fn filter_is_idempotent(items in arb_widget_list(), threshold in 0u32..100) {
        let session = widget_session();
        let resources = build(&session, &items);

        let (once, twice) = tokio_test::block_on(async {
            let filter = Filter::new().with("size__gte", threshold).unwrap();
            let once = filter.run(&session, resources).await.unwrap();
            let twice = filter.run(&session, once.clone()).await.unwrap();
            (once, twice)
        });

        prop_assert_eq!(names(&once), names(&twice));
        prop_assert!(once
            .iter()
            .all(|w| w.field("size").and_then(|s| s.as_f64()).unwrap() >= threshold as f64));
    }

    /// `_any` matches exactly when one of the single predicates matches
    #[test]
    fn any_is_union_of_singles(items in arb_widget_list()) {
        let session = widget_session();
        let resources = build(&session, &items);

        let (any, running, stopped) = tokio_test::block_on(async {
            let any = Filter::new()
                .with("status__exact_any", json!(["Running", "Stopped"]))
                .unwrap();
            let running = Filter::new().with("status__exact", "Running").unwrap();
            let stopped = Filter::new().with("status__exact", "Stopped").unwrap();
            (
                any.run(&session, resources.clone()).await.unwrap(),
                running.run(&session, resources.clone()).await.unwrap(),
                stopped.run(&session, resources.clone()).await.unwrap(),
            )
        });

        prop_assert_eq!(any.len(), running.len() + stopped.len());
    }
}
