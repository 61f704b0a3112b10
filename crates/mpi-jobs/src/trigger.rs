//! Hooks called by the resource write pipeline.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use mpi_core::{MatchJobPayload, MatchQueue, Resource, Result};
use mpi_matching::{precompute_representations, MatchingRegistry};

/// Connects resource writes to the matching queue.
pub struct MatchTrigger {
    queue: Arc<dyn MatchQueue>,
    registry: Arc<MatchingRegistry>,
}

impl MatchTrigger {
    pub fn new(queue: Arc<dyn MatchQueue>, registry: Arc<MatchingRegistry>) -> Self {
        Self { queue, registry }
    }

    /// Precompute matching representations before a resource is stored.
    ///
    /// Returns `false` when the type has no valid configuration and the
    /// resource was left untouched.
    pub fn before_write(&self, resource: &mut Resource) -> bool {
        match self.registry.config_for(&resource.resource_type) {
            Ok(config) => {
                precompute_representations(config, resource);
                true
            }
            Err(_) => false,
        }
    }

    /// Enqueue a matching job for a created or updated resource.
    ///
    /// Only types with a configuration entry are enqueued. Entries that
    /// failed validation still enqueue, so the failure shows up in the
    /// worker logs instead of silently skipping matching.
    pub async fn on_resource_written(&self, resource: &Resource) -> Result<Option<Uuid>> {
        if !self.registry.is_configured(&resource.resource_type) {
            return Ok(None);
        }
        let job_id = self
            .queue
            .enqueue(MatchJobPayload::for_resource(resource))
            .await?;
        debug!(
            subsystem = "jobs",
            component = "trigger",
            job_id = %job_id,
            resource_type = %resource.resource_type,
            resource_id = %resource.id,
            "Matching job enqueued"
        );
        Ok(Some(job_id))
    }
}
