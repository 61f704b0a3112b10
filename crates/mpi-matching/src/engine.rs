//! Probabilistic matching engine.
//!
//! A match run is a small task graph joined before a pure reduction step.
//! Each exact field runs its own narrowed candidate query; all
//! representation-based fields share one scan of the discriminator-narrowed
//! collection. Both kinds page through candidates by id so no candidate is
//! skipped, and return per-candidate contributions that the reduction sums,
//! rounds, ranks and classifies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, trace};

use mpi_core::defaults::{CANDIDATE_PAGE_SIZE, SCORE_PRECISION};
use mpi_core::walker::{walk_owned, walk_strings};
use mpi_core::{
    CandidateQuery, MatchCandidate, MatchOutcome, Resource, ResourceStore, Result, ValueClause,
};

use crate::algorithms::best_similarity;
use crate::config::{
    AlgorithmFamily, FieldMatchConfig, MatchingRegistry, ResourceMatchConfig, ScoreAccumulation,
};

/// Contributions of one matching field, keyed by candidate id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldScores {
    pub path: String,
    pub contributions: Vec<(String, f64)>,
}

impl FieldScores {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            contributions: Vec::new(),
        }
    }
}

/// Scores resources of configured types against stored candidates.
pub struct MatchingEngine {
    store: Arc<dyn ResourceStore>,
    registry: Arc<MatchingRegistry>,
    page_size: i64,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn ResourceStore>, registry: Arc<MatchingRegistry>) -> Self {
        Self {
            store,
            registry,
            page_size: CANDIDATE_PAGE_SIZE,
        }
    }

    /// Documents fetched per candidate page. Every page is scanned.
    pub fn with_page_size(mut self, size: i64) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn registry(&self) -> &MatchingRegistry {
        &self.registry
    }

    /// Rank stored resources of `resource_type` against `query`.
    ///
    /// Fails with a configuration error when the type has no valid matching
    /// configuration. The query resource's own id never appears in the
    /// result, and neither do candidates classified `certainly-not`.
    #[instrument(skip(self, query), fields(
        subsystem = "matching",
        component = "engine",
        op = "find_matches",
        resource_type = %resource_type,
        resource_id = %query.id,
    ))]
    pub async fn find_matches(
        &self,
        resource_type: &str,
        query: &Resource,
        max_results: usize,
    ) -> Result<MatchOutcome> {
        let start = Instant::now();
        let config = self.registry.config_for(resource_type)?;
        let discriminators = discriminator_clauses(config, &query.body);
        let base = CandidateQuery::new(resource_type)
            .excluding(query.id.clone())
            .with_clauses(discriminators.iter().cloned())
            .with_limit(self.page_size);

        let mut exact_fields = Vec::new();
        let mut representation_fields = Vec::new();
        for field in &config.matching_properties {
            match field.algorithm.family() {
                AlgorithmFamily::Exact => exact_fields.push(field),
                AlgorithmFamily::Distance | AlgorithmFamily::Phonetic => {
                    representation_fields.push(field)
                }
                AlgorithmFamily::Unsupported => debug!(
                    path = %field.path,
                    algorithm = field.algorithm.id(),
                    "Algorithm not supported, field contributes nothing"
                ),
            }
        }

        let (exact_scores, representation_scores) = futures::try_join!(
            try_join_all(
                exact_fields
                    .iter()
                    .map(|field| self.score_exact_field(field, query, &base))
            ),
            self.score_representation_fields(&representation_fields, query, &base),
        )?;
        let per_field: Vec<FieldScores> = exact_scores
            .into_iter()
            .chain(representation_scores)
            .collect();

        let totals = accumulate(&per_field);
        let outcome = rank(
            resource_type,
            totals,
            max_results,
            self.registry.accumulation(),
        );

        debug!(
            field_count = per_field.len(),
            discriminator_count = discriminators.len(),
            candidate_count = outcome.candidates.len(),
            certain = outcome.certain,
            duration_ms = start.elapsed().as_millis() as u64,
            "Match run complete"
        );
        Ok(outcome)
    }

    /// Every candidate sharing a raw value at the field's path earns the
    /// full weight.
    async fn score_exact_field(
        &self,
        field: &FieldMatchConfig,
        query: &Resource,
        base: &CandidateQuery,
    ) -> Result<FieldScores> {
        let mut scores = FieldScores::new(&field.path);
        let values = distinct(walk_owned(&field.path, &query.body));
        if values.is_empty() {
            return Ok(scores);
        }

        let narrowed = base
            .clone()
            .with_clause(ValueClause::new(&field.path, values));
        self.scan(narrowed, |candidate| {
            scores.contributions.push((candidate.id, field.weight));
        })
        .await?;
        Ok(scores)
    }

    /// Score every distance and phonetic field in one pass over the
    /// candidates, comparing precomputed representations.
    async fn score_representation_fields(
        &self,
        fields: &[&FieldMatchConfig],
        query: &Resource,
        base: &CandidateQuery,
    ) -> Result<Vec<FieldScores>> {
        let active: Vec<(&FieldMatchConfig, String, Vec<String>)> = fields
            .iter()
            .filter_map(|field| {
                let path = field.representation_path();
                let values = walk_strings(&path, &query.body);
                (!values.is_empty()).then_some((*field, path, values))
            })
            .collect();
        let mut scores: Vec<FieldScores> = active
            .iter()
            .map(|(field, _, _)| FieldScores::new(&field.path))
            .collect();
        if active.is_empty() {
            return Ok(scores);
        }

        self.scan(base.clone(), |candidate| {
            for ((field, path, query_values), field_scores) in active.iter().zip(&mut scores) {
                let values = walk_strings(path, &candidate.body);
                let similarity = best_similarity(&field.algorithm, query_values, &values);
                if similarity > 0.0 {
                    field_scores
                        .contributions
                        .push((candidate.id.clone(), similarity * field.weight));
                }
            }
        })
        .await?;
        Ok(scores)
    }

    /// Feed every document matching `query` to `visit`, one id-ordered page
    /// at a time. Returns the number of documents visited.
    async fn scan<F>(&self, mut query: CandidateQuery, mut visit: F) -> Result<usize>
    where
        F: FnMut(Resource) + Send,
    {
        let mut scanned = 0usize;
        let mut pages = 0usize;
        loop {
            let page = self.store.find_candidates(&query).await?;
            let full = page.len() as i64 >= query.limit;
            let last_id = page.last().map(|r| r.id.clone());
            scanned += page.len();
            pages += 1;
            page.into_iter().for_each(&mut visit);

            match last_id {
                Some(id) if full => {
                    trace!(pages, scanned, after_id = %id, "Fetching next candidate page");
                    query = query.after(id);
                }
                _ => break,
            }
        }
        debug!(pages, scanned, clauses = query.clauses.len(), "Candidate scan complete");
        Ok(scanned)
    }
}

/// Value clauses every candidate must satisfy.
///
/// Discriminators the query resource has no values for, or whose algorithm
/// is unsupported, impose no constraint.
pub fn discriminator_clauses(config: &ResourceMatchConfig, body: &JsonValue) -> Vec<ValueClause> {
    config
        .discriminator_properties
        .iter()
        .filter(|f| f.algorithm.family() != AlgorithmFamily::Unsupported)
        .filter_map(|f| {
            let path = f.value_path();
            let values = distinct(walk_owned(&path, body));
            (!values.is_empty()).then(|| ValueClause::new(path, values))
        })
        .collect()
}

/// Sum each candidate's contributions across fields.
pub fn accumulate(fields: &[FieldScores]) -> HashMap<String, f64> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for field in fields {
        for (id, contribution) in &field.contributions {
            *totals.entry(id.clone()).or_insert(0.0) += contribution;
        }
    }
    totals
}

/// Round, rank, classify and truncate accumulated scores.
///
/// Ties are broken by candidate id so results are deterministic.
pub fn rank(
    resource_type: &str,
    totals: HashMap<String, f64>,
    max_results: usize,
    accumulation: ScoreAccumulation,
) -> MatchOutcome {
    let mut candidates: Vec<MatchCandidate> = totals
        .into_iter()
        .map(|(id, total)| {
            let total = match accumulation {
                ScoreAccumulation::Clamped => total.min(1.0),
                ScoreAccumulation::Uncapped => total,
            };
            MatchCandidate::new(resource_type, id, round_score(total))
        })
        .filter(|c| c.classification.is_match())
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
    candidates.truncate(max_results);

    MatchOutcome::new(candidates)
}

/// Round to the fixed score precision.
pub fn round_score(score: f64) -> f64 {
    let factor = 10f64.powi(SCORE_PRECISION);
    (score * factor).round() / factor
}

fn distinct(values: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut out: Vec<JsonValue> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
