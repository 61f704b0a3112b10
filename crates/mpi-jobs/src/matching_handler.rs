//! Handler that runs a match and applies its links.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{error, warn};

use mpi_core::defaults::MATCH_MAX_RESULTS;
use mpi_core::{MatchJobPayload, ResourceStore, Result};
use mpi_matching::{MatchingEngine, MatchingRegistry, ResourceLinker};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Scores the job's resource and rewrites the duplicate links around it.
pub struct MatchingJobHandler {
    engine: MatchingEngine,
    linker: ResourceLinker,
    max_results: usize,
}

impl MatchingJobHandler {
    pub fn new(store: Arc<dyn ResourceStore>, registry: Arc<MatchingRegistry>) -> Self {
        Self {
            engine: MatchingEngine::new(store.clone(), registry),
            linker: ResourceLinker::new(store),
            max_results: MATCH_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Match and link one payload, returning a summary of the run.
    pub async fn process(&self, payload: &MatchJobPayload) -> Result<JsonValue> {
        let resource = payload.resource()?;
        let outcome = self
            .engine
            .find_matches(&payload.resource_type, &resource, self.max_results)
            .await?;
        self.linker
            .apply_matches(&outcome.candidates, &resource)
            .await?;

        let candidates: Vec<JsonValue> = outcome
            .candidates
            .iter()
            .map(|c| {
                json!({
                    "reference": c.reference(),
                    "score": c.score,
                    "classification": c.classification.code(),
                    "search": c.search_tag(),
                })
            })
            .collect();

        Ok(json!({
            "resourceType": resource.resource_type,
            "resourceId": resource.id,
            "candidates": candidates,
            "certain": outcome.certain,
        }))
    }
}

#[async_trait]
impl JobHandler for MatchingJobHandler {
    fn name(&self) -> &'static str {
        "matching"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        match self.process(ctx.payload()).await {
            Ok(summary) => JobResult::Success(Some(summary)),
            Err(e) => {
                if e.is_config() {
                    error!(
                        subsystem = "jobs",
                        component = "matching_handler",
                        job_id = %ctx.job_id(),
                        resource_type = %ctx.payload().resource_type,
                        error = %e,
                        "Matching configuration error, job will keep failing until fixed"
                    );
                } else {
                    warn!(
                        subsystem = "jobs",
                        component = "matching_handler",
                        job_id = %ctx.job_id(),
                        resource_type = %ctx.payload().resource_type,
                        delivery_count = ctx.delivery_count(),
                        error = %e,
                        "Matching job failed"
                    );
                }
                JobResult::Failed(e.to_string())
            }
        }
    }
}
