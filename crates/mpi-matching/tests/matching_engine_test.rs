//! Matching engine behaviour against the in-memory resource store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use mpi_db::test_fixtures::patient;
use mpi_db::InMemoryResourceStore;
use mpi_matching::{
    precompute_representations, CandidateQuery, MatchClassification, MatchingEngine,
    MatchingRegistry, ReplaceOutcome, Resource, ResourceStore, Result,
};

fn registry() -> Arc<MatchingRegistry> {
    Arc::new(
        MatchingRegistry::from_value(json!({
            "resourceConfig": {
                "Patient": {
                    "matchingProperties": {
                        "identifier.value": {"algorithm": "exact", "weight": 0.6},
                        "name.given": {"algorithm": "levenshtein", "weight": 0.2},
                        "name.family": {"algorithm": "jaro-winkler", "weight": 0.2},
                        "birthDate": {"algorithm": "double-metaphone", "weight": 0.5}
                    },
                    "discriminatorProperties": {
                        "gender": {"algorithm": "exact", "weight": 1}
                    }
                },
                "Practitioner": {
                    "matchingProperties": {
                        "birthDate": {"algorithm": "double-metaphone", "weight": 1.0}
                    }
                },
                "Location": {"matchingProperties": "nope"}
            }
        }))
        .unwrap(),
    )
}

fn prepared(registry: &MatchingRegistry, mut resource: Resource) -> Resource {
    let config = registry.config_for(&resource.resource_type).unwrap();
    precompute_representations(config, &mut resource);
    resource
}

async fn setup(resources: Vec<Resource>) -> (MatchingEngine, Arc<MatchingRegistry>) {
    let registry = registry();
    let store = Arc::new(InMemoryResourceStore::new());
    for r in resources {
        store.insert(&prepared(&registry, r)).await.unwrap();
    }
    (MatchingEngine::new(store, registry.clone()), registry)
}

fn jane(id: &str) -> mpi_db::test_fixtures::ResourceBuilder {
    patient(id)
        .name(&["Jane"], Some("Smith"))
        .gender("female")
        .identifier("urn:nid", "123")
        .birth_date("1990-01-01")
}

// ============================================================================
// SCORING
// ============================================================================

#[tokio::test]
async fn test_identical_candidate_is_certain() {
    let (engine, registry) = setup(vec![
        jane("q").build(),
        jane("twin").build(),
        // Shares names only: 0.4, certainly-not.
        patient("namesake")
            .name(&["Jane"], Some("Smith"))
            .gender("female")
            .build(),
        // Same everything but blocked by the gender discriminator.
        patient("other-gender")
            .name(&["Jane"], Some("Smith"))
            .gender("male")
            .identifier("urn:nid", "123")
            .build(),
    ])
    .await;

    let query = prepared(&registry, jane("q").build());
    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();

    assert!(outcome.certain);
    assert_eq!(outcome.candidates.len(), 1);
    let twin = &outcome.candidates[0];
    assert_eq!(twin.resource_id, "twin");
    assert_eq!(twin.score, 1.0);
    assert_eq!(twin.classification, MatchClassification::Certain);
}

#[tokio::test]
async fn test_query_resource_never_matches_itself() {
    let (engine, registry) = setup(vec![jane("q").build()]).await;
    let query = prepared(&registry, jane("q").build());

    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    assert!(outcome.candidates.is_empty());
    assert!(!outcome.certain);
}

#[tokio::test]
async fn test_near_match_is_probable_and_not_certain() {
    let (engine, registry) = setup(vec![patient("close")
        .name(&["Jane"], Some("Smyth"))
        .gender("female")
        .identifier("urn:nid", "123")
        .build()])
    .await;

    let query = prepared(&registry, jane("q").build());
    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();

    assert!(!outcome.certain);
    assert_eq!(outcome.candidates.len(), 1);
    let close = &outcome.candidates[0];
    assert!(close.score > 0.9 && close.score < 1.0, "got {}", close.score);
    assert_eq!(close.classification, MatchClassification::Probable);
}

#[tokio::test]
async fn test_multi_valued_fields_use_best_pair() {
    let (engine, registry) = setup(vec![patient("c")
        .name(&["Mary", "Jane"], Some("Smith"))
        .gender("female")
        .identifier("urn:nid", "123")
        .build()])
    .await;

    let query = prepared(
        &registry,
        patient("q")
            .name(&["Jane"], Some("Smith"))
            .given("J")
            .gender("female")
            .identifier("urn:other", "123")
            .build(),
    );
    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    assert_eq!(outcome.candidates[0].score, 1.0);
}

#[tokio::test]
async fn test_missing_discriminator_value_does_not_block() {
    let (engine, registry) = setup(vec![jane("c").build()]).await;
    let query = prepared(
        &registry,
        patient("q")
            .name(&["Jane"], Some("Smith"))
            .identifier("urn:nid", "123")
            .build(),
    );

    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    assert_eq!(outcome.candidates.len(), 1);
}

#[tokio::test]
async fn test_results_are_ranked_and_truncated() {
    let (engine, registry) = setup(vec![
        jane("a").build(),
        jane("b").build(),
        patient("c")
            .name(&["Jane"], Some("Smyth"))
            .gender("female")
            .identifier("urn:nid", "123")
            .build(),
    ])
    .await;
    let query = prepared(&registry, jane("q").build());

    let outcome = engine.find_matches("Patient", &query, 2).await.unwrap();
    let ids: Vec<&str> = outcome
        .candidates
        .iter()
        .map(|c| c.resource_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

// ============================================================================
// CANDIDATE SCANS
// ============================================================================

/// Store wrapper counting candidate queries.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryResourceStore,
    candidate_queries: AtomicUsize,
}

#[async_trait]
impl ResourceStore for CountingStore {
    async fn insert(&self, resource: &Resource) -> Result<()> {
        self.inner.insert(resource).await
    }

    async fn get(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        self.inner.get(resource_type, id).await
    }

    async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Resource>> {
        self.candidate_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.find_candidates(query).await
    }

    async fn find_linked_to(&self, resource_type: &str, reference: &str) -> Result<Vec<Resource>> {
        self.inner.find_linked_to(resource_type, reference).await
    }

    async fn replace_version(
        &self,
        next: &Resource,
        expected_version: i64,
    ) -> Result<ReplaceOutcome> {
        self.inner.replace_version(next, expected_version).await
    }

    async fn history(&self, resource_type: &str, id: &str) -> Result<Vec<Resource>> {
        self.inner.history(resource_type, id).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        self.inner.delete(resource_type, id).await
    }
}

fn namesake(id: &str) -> Resource {
    patient(id)
        .name(&["Jane"], Some("Smith"))
        .gender("female")
        .build()
}

#[tokio::test]
async fn test_best_match_beyond_first_page_is_found() {
    let (engine, registry) = setup(vec![
        namesake("a"),
        namesake("b"),
        jane("c").build(),
        namesake("d"),
        namesake("e"),
    ])
    .await;
    let engine = engine.with_page_size(2);
    let query = prepared(&registry, jane("q").build());

    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    assert_eq!(outcome.candidates.len(), 1);
    assert_eq!(outcome.candidates[0].resource_id, "c");
    // Name similarity from the third page completes the score.
    assert_eq!(outcome.candidates[0].score, 1.0);
    assert!(outcome.certain);
}

#[tokio::test]
async fn test_exact_field_pages_through_every_candidate() {
    let ids = ["a", "b", "c", "d", "e"];
    let (engine, registry) = setup(
        ids.iter()
            .map(|id| {
                patient(id)
                    .name(&["Zed"], Some("Quux"))
                    .gender("female")
                    .identifier("urn:nid", "123")
                    .build()
            })
            .collect(),
    )
    .await;
    let engine = engine.with_page_size(2);
    let query = prepared(&registry, jane("q").build());

    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    let found: Vec<&str> = outcome
        .candidates
        .iter()
        .map(|c| c.resource_id.as_str())
        .collect();
    assert_eq!(found, ids);
    assert!(outcome
        .candidates
        .iter()
        .all(|c| c.classification == MatchClassification::Possible));
}

#[tokio::test]
async fn test_similarity_fields_share_one_scan() {
    let registry = registry();
    let store = Arc::new(CountingStore::default());
    for r in [jane("a").build(), namesake("b"), namesake("c")] {
        store.insert(&prepared(&registry, r)).await.unwrap();
    }
    let engine = MatchingEngine::new(store.clone(), registry.clone());
    let query = prepared(&registry, jane("q").build());

    let outcome = engine.find_matches("Patient", &query, 10).await.unwrap();
    assert_eq!(outcome.candidates[0].resource_id, "a");
    // One query for the identifier, one shared by both name fields.
    assert_eq!(store.candidate_queries.load(Ordering::SeqCst), 2);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_unsupported_algorithm_contributes_nothing() {
    let registry = registry();
    let store = Arc::new(InMemoryResourceStore::new());
    let doc = Resource::new("Practitioner", "a", json!({"birthDate": "1990-01-01"}));
    store.insert(&doc).await.unwrap();
    let engine = MatchingEngine::new(store, registry);

    let query = Resource::new("Practitioner", "q", json!({"birthDate": "1990-01-01"}));
    let outcome = engine.find_matches("Practitioner", &query, 10).await.unwrap();
    assert!(outcome.candidates.is_empty());
}

#[tokio::test]
async fn test_unconfigured_type_is_config_error() {
    let (engine, _) = setup(vec![]).await;
    let query = Resource::new("Encounter", "e1", json!({}));

    let err = engine.find_matches("Encounter", &query, 10).await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_malformed_type_is_config_error() {
    let (engine, _) = setup(vec![]).await;
    let query = Resource::new("Location", "l1", json!({}));

    let err = engine.find_matches("Location", &query, 10).await.unwrap_err();
    assert!(err.is_config());
}
