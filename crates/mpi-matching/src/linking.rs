//! Duplicate-link maintenance between matched resources.
//!
//! Each match run rewrites the symmetric `<classification>-duplicate-source`
//! / `<classification>-duplicate-target` edges between the written resource
//! and its candidates. Every write is a conditional version swap: the store
//! archives exactly the version it overwrites, and a writer that lost a race
//! re-reads the document and reapplies its edit.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use mpi_core::defaults::LINK_SAVE_ATTEMPTS;
use mpi_core::{
    DuplicateLinkType, Error, LinkRole, MatchCandidate, ReplaceOutcome, Resource, ResourceLink,
    ResourceStore, Result,
};

/// Drop every duplicate-typed link and every link pointing back at
/// `own_reference`. Other links are kept in order.
pub fn strip_matching_links(links: Vec<ResourceLink>, own_reference: &str) -> Vec<ResourceLink> {
    links
        .into_iter()
        .filter(|l| !l.is_duplicate() && !l.references(own_reference))
        .collect()
}

/// Drop duplicate links pointing at `reference`. Links of any other type are
/// owned elsewhere and kept.
pub fn strip_duplicate_links_to(links: Vec<ResourceLink>, reference: &str) -> Vec<ResourceLink> {
    links
        .into_iter()
        .filter(|l| !(l.is_duplicate() && l.references(reference)))
        .collect()
}

/// Maintains duplicate links in a [`ResourceStore`].
pub struct ResourceLinker {
    store: Arc<dyn ResourceStore>,
}

impl ResourceLinker {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Strip duplicate links to `resource` from every stored resource of its
    /// type that carries one, and return `resource`'s latest stored version
    /// with its own duplicate links removed in memory.
    ///
    /// Fails with [`Error::ResourceNotFound`] when `resource` no longer
    /// exists.
    #[instrument(skip(self, resource), fields(
        subsystem = "matching",
        component = "linker",
        op = "remove_previous_matching_links",
        resource_type = %resource.resource_type,
        resource_id = %resource.id,
    ))]
    pub async fn remove_previous_matching_links(&self, resource: &Resource) -> Result<Resource> {
        let reference = resource.reference();
        let mut latest = self.fetch(&resource.resource_type, &resource.id).await?;

        let linked = self
            .store
            .find_linked_to(&resource.resource_type, &reference)
            .await?;

        let mut updated_count = 0usize;
        for doc in linked {
            if doc.id == resource.id {
                continue;
            }
            if !doc
                .links()?
                .iter()
                .any(|l| l.is_duplicate() && l.references(&reference))
            {
                continue;
            }
            self.update_links(doc, |links| strip_duplicate_links_to(links, &reference))
                .await?;
            updated_count += 1;
        }

        let own = strip_matching_links(latest.links()?, &reference);
        latest.set_links(own)?;

        debug!(updated_count, "Previous matching links removed");
        Ok(latest)
    }

    /// Point each matching candidate back at `resource` with a
    /// `<classification>-duplicate-source` link.
    ///
    /// An existing duplicate link from the candidate to `resource` is
    /// replaced. Fails with [`Error::ResourceNotFound`] when a candidate no
    /// longer exists.
    #[instrument(skip(self, candidates, resource), fields(
        subsystem = "matching",
        component = "linker",
        op = "add_link_to_matches",
        resource_type = %resource.resource_type,
        resource_id = %resource.id,
        candidate_count = candidates.len(),
    ))]
    pub async fn add_link_to_matches(
        &self,
        candidates: &[MatchCandidate],
        resource: &Resource,
    ) -> Result<usize> {
        let reference = resource.reference();
        let mut updated_count = 0usize;

        for candidate in candidates.iter().filter(|c| c.classification.is_match()) {
            if candidate.reference() == reference {
                continue;
            }
            let current = self
                .fetch(&candidate.resource_type, &candidate.resource_id)
                .await?;
            let link = ResourceLink::duplicate(
                reference.clone(),
                DuplicateLinkType::new(candidate.classification, LinkRole::Source),
                candidate.score,
            );
            self.update_links(current, |links| {
                let mut links = strip_duplicate_links_to(links, &reference);
                links.push(link.clone());
                links
            })
            .await?;
            updated_count += 1;
        }

        debug!(updated_count, "Links added to matches");
        Ok(updated_count)
    }

    /// Rewrite `resource`'s duplicate links so it carries one
    /// `<classification>-duplicate-target` link per matching candidate, in a
    /// single write. Returns the stored version.
    #[instrument(skip(self, candidates, resource), fields(
        subsystem = "matching",
        component = "linker",
        op = "add_matches_links_to_resource",
        resource_type = %resource.resource_type,
        resource_id = %resource.id,
        candidate_count = candidates.len(),
    ))]
    pub async fn add_matches_links_to_resource(
        &self,
        candidates: &[MatchCandidate],
        resource: &Resource,
    ) -> Result<Resource> {
        let reference = resource.reference();
        let current = self.fetch(&resource.resource_type, &resource.id).await?;

        let new_links: Vec<ResourceLink> = candidates
            .iter()
            .filter(|c| c.classification.is_match())
            .filter(|c| c.reference() != reference)
            .map(|c| {
                ResourceLink::duplicate(
                    c.reference(),
                    DuplicateLinkType::new(c.classification, LinkRole::Target),
                    c.score,
                )
            })
            .collect();

        self.update_links(current, |links| {
            let mut links = strip_matching_links(links, &reference);
            links.extend(new_links.iter().cloned());
            links
        })
        .await
    }

    /// Run all three link steps for one match result.
    pub async fn apply_matches(
        &self,
        candidates: &[MatchCandidate],
        resource: &Resource,
    ) -> Result<Resource> {
        let cleaned = self.remove_previous_matching_links(resource).await?;
        let updated_count = self.add_link_to_matches(candidates, &cleaned).await?;
        let stored = self
            .add_matches_links_to_resource(candidates, &cleaned)
            .await?;

        info!(
            subsystem = "matching",
            component = "linker",
            resource_type = %stored.resource_type,
            resource_id = %stored.id,
            version_id = stored.version_id,
            updated_count,
            "Match links applied"
        );
        Ok(stored)
    }

    async fn fetch(&self, resource_type: &str, id: &str) -> Result<Resource> {
        self.store
            .get(resource_type, id)
            .await?
            .ok_or_else(|| Error::resource_not_found(resource_type, id))
    }

    /// Write the next version of `current` with `edit` applied to its links.
    ///
    /// The write only lands if `current` is still the stored version. On a
    /// conflict the document is re-read and `edit` reapplied, up to
    /// [`LINK_SAVE_ATTEMPTS`] times, after which the caller gets
    /// [`Error::VersionConflict`] and the job is retried on redelivery.
    async fn update_links<F>(&self, mut current: Resource, edit: F) -> Result<Resource>
    where
        F: Fn(Vec<ResourceLink>) -> Vec<ResourceLink> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let mut next = current.next_version();
            next.set_links(edit(current.links()?))?;

            match self
                .store
                .replace_version(&next, current.version_id)
                .await?
            {
                ReplaceOutcome::Replaced => return Ok(next),
                ReplaceOutcome::NotFound => {
                    return Err(Error::resource_not_found(&current.resource_type, &current.id))
                }
                ReplaceOutcome::Conflict { stored_version } if attempt < LINK_SAVE_ATTEMPTS => {
                    debug!(
                        resource_type = %current.resource_type,
                        resource_id = %current.id,
                        expected_version = current.version_id,
                        stored_version,
                        attempt,
                        "Concurrent link update, re-reading"
                    );
                    current = self.fetch(&current.resource_type, &current.id).await?;
                    attempt += 1;
                }
                ReplaceOutcome::Conflict { stored_version } => {
                    warn!(
                        subsystem = "matching",
                        component = "linker",
                        resource_type = %current.resource_type,
                        resource_id = %current.id,
                        stored_version,
                        attempts = attempt,
                        "Link update kept conflicting, giving up"
                    );
                    return Err(Error::VersionConflict {
                        resource_type: current.resource_type,
                        id: current.id,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
