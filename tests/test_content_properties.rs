//! Property tests for content addressing and the content client

use agentdeploy::content::{compute_cid_v1, is_valid_cid, ContentCache, ContentClient};
use agentdeploy::retry::RetryPolicy;
use agentdeploy::testing::FlakyContentBackend;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn module_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,15}"
}

proptest! {
    #[test]
    fn prop_computed_cids_are_valid(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let cid = compute_cid_v1(&payload);
        prop_assert!(is_valid_cid(&cid), "{}", cid);
        prop_assert_eq!(cid, compute_cid_v1(&payload));
    }

    #[test]
    fn prop_v0_shape_is_valid(body in "[1-9A-HJ-NP-Za-km-z]{44}") {
        let cid = format!("Qm{body}");
        prop_assert!(is_valid_cid(&cid));
    }

    #[test]
    fn prop_wrong_length_v0_is_invalid(body in "[1-9A-HJ-NP-Za-km-z]{0,43}") {
        let cid = format!("Qm{body}");
        prop_assert!(!is_valid_cid(&cid));
    }

    #[test]
    fn prop_whitespace_is_never_valid(cid in "[a-z2-7]{20,60}", at in 0usize..20) {
        let mut spaced = format!("b{cid}");
        spaced.insert(at + 1, ' ');
        prop_assert!(!is_valid_cid(&spaced));
    }

    #[test]
    fn prop_pin_then_fetch_round_trips(
        name in "[A-Za-z][A-Za-z0-9 ]{0,30}",
        modules in prop::collection::vec(module_name(), 1..6),
    ) {
        tokio_test::block_on(async {
            let backend = Arc::new(FlakyContentBackend::new());
            let client = ContentClient::new(
                backend.clone(),
                Arc::new(ContentCache::default()),
                RetryPolicy::no_retry(),
            );
            let document = json!({"name": name, "modules": modules, "trigger": "manual"});

            let cid = client.pin(&document, "agent-config.json").await.unwrap();
            assert!(is_valid_cid(&cid));

            // through the backend, not the cache
            client.clear_cache();
            let fetched = client.fetch(&cid).await.unwrap();
            assert_eq!(fetched, document);
            assert_eq!(backend.retrieve_calls(), 1);
        });
    }

    #[test]
    fn prop_repeated_pins_upload_once(
        modules in prop::collection::vec(module_name(), 1..4),
        repeats in 2usize..5,
    ) {
        tokio_test::block_on(async {
            let backend = Arc::new(FlakyContentBackend::new());
            let client = ContentClient::new(
                backend.clone(),
                Arc::new(ContentCache::default()),
                RetryPolicy::no_retry(),
            );
            let document = json!({"name": "Bot", "modules": modules});

            let first = client.pin(&document, "agent-config.json").await.unwrap();
            for _ in 1..repeats {
                let again = client.pin(&document, "agent-config.json").await.unwrap();
                assert_eq!(again, first);
            }
            assert_eq!(backend.upload_calls(), 1);
        });
    }
}
