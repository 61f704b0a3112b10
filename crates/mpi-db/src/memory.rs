//! In-process queue and resource store.
//!
//! Same contracts as the PostgreSQL implementations, held behind tokio
//! locks. Used by tests and single-process deployments that do not need
//! durability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::warn;
use uuid::Uuid;

use mpi_core::walker::walk;
use mpi_core::{
    CandidateQuery, MatchJob, MatchJobPayload, MatchQueue, QueueStats, ReplaceOutcome, Resource,
    ResourceStore, Result,
};

use crate::match_queue::QueueConfig;

struct QueuedJob {
    id: Uuid,
    payload: MatchJobPayload,
    enqueued_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    ack_token: Option<Uuid>,
    delivery_count: i32,
}

/// Vector-backed MatchQueue with visibility-window redelivery.
pub struct InMemoryMatchQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    config: QueueConfig,
    notify: Arc<Notify>,
}

impl InMemoryMatchQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    fn visibility_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
    }
}

impl Default for InMemoryMatchQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl MatchQueue for InMemoryMatchQueue {
    async fn enqueue(&self, payload: MatchJobPayload) -> Result<Uuid> {
        let now = Utc::now();
        let id = Uuid::now_v7();
        self.jobs.lock().await.push(QueuedJob {
            id,
            payload,
            enqueued_at: now,
            visible_at: now,
            ack_token: None,
            delivery_count: 0,
        });
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<MatchJob>> {
        let now = Utc::now();
        let window = self.visibility_window();
        let mut jobs = self.jobs.lock().await;

        // Insertion order doubles as enqueue order.
        let Some(job) = jobs.iter_mut().find(|j| j.visible_at <= now) else {
            return Ok(None);
        };

        let ack_token = Uuid::new_v4();
        job.ack_token = Some(ack_token);
        job.visible_at = now + window;
        job.delivery_count += 1;

        Ok(Some(MatchJob {
            id: job.id,
            payload: job.payload.clone(),
            ack_token,
            delivery_count: job.delivery_count,
            enqueued_at: job.enqueued_at,
            visible_at: job.visible_at,
        }))
    }

    async fn ack(&self, ack_token: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| j.ack_token != Some(ack_token));
        let acked = jobs.len() < before;
        if !acked {
            warn!(
                subsystem = "db",
                component = "match_queue",
                op = "ack",
                ack_token = %ack_token,
                "Ack token no longer owns a job (visibility window expired)"
            );
        }
        Ok(acked)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let jobs = self.jobs.lock().await;
        let visible = jobs.iter().filter(|j| j.visible_at <= now).count() as i64;
        Ok(QueueStats {
            visible,
            in_flight: jobs.len() as i64 - visible,
        })
    }

    fn wake_handle(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

type Key = (String, String);

/// HashMap-backed ResourceStore.
#[derive(Default)]
pub struct InMemoryResourceStore {
    latest: RwLock<HashMap<Key, Resource>>,
    history: RwLock<Vec<Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(resource_type: &str, id: &str) -> Key {
        (resource_type.to_string(), id.to_string())
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn insert(&self, resource: &Resource) -> Result<()> {
        let key = Self::key(&resource.resource_type, &resource.id);
        let mut latest = self.latest.write().await;
        if latest.contains_key(&key) {
            return Err(mpi_core::Error::InvalidInput(format!(
                "resource {} already exists",
                resource.reference()
            )));
        }
        latest.insert(key, resource.clone());
        Ok(())
    }

    async fn get(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        let latest = self.latest.read().await;
        Ok(latest.get(&Self::key(resource_type, id)).cloned())
    }

    async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Resource>> {
        let latest = self.latest.read().await;
        let mut found: Vec<Resource> = latest
            .values()
            .filter(|r| r.resource_type == query.resource_type)
            .filter(|r| query.exclude_id.as_deref() != Some(r.id.as_str()))
            .filter(|r| query.after_id.as_deref().map_or(true, |after| r.id.as_str() > after))
            .filter(|r| {
                query.clauses.iter().all(|clause| {
                    walk(&clause.path, &r.body)
                        .into_iter()
                        .any(|v| clause.values.contains(v))
                })
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.truncate(query.limit.max(0) as usize);
        Ok(found)
    }

    async fn find_linked_to(&self, resource_type: &str, reference: &str) -> Result<Vec<Resource>> {
        let latest = self.latest.read().await;
        let mut found = Vec::new();
        for r in latest.values().filter(|r| r.resource_type == resource_type) {
            if r.links()?.iter().any(|l| l.references(reference)) {
                found.push(r.clone());
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn replace_version(
        &self,
        next: &Resource,
        expected_version: i64,
    ) -> Result<ReplaceOutcome> {
        // Lock order: latest, then history.
        let mut latest = self.latest.write().await;
        let Some(slot) = latest.get_mut(&Self::key(&next.resource_type, &next.id)) else {
            return Ok(ReplaceOutcome::NotFound);
        };
        if slot.version_id != expected_version {
            return Ok(ReplaceOutcome::Conflict {
                stored_version: slot.version_id,
            });
        }
        let previous = std::mem::replace(slot, next.clone());
        self.history.write().await.push(previous);
        Ok(ReplaceOutcome::Replaced)
    }

    async fn history(&self, resource_type: &str, id: &str) -> Result<Vec<Resource>> {
        let history = self.history.read().await;
        let mut versions: Vec<Resource> = history
            .iter()
            .filter(|r| r.resource_type == resource_type && r.id == id)
            .cloned()
            .collect();
        versions.sort_by_key(|r| r.version_id);
        Ok(versions)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        let mut latest = self.latest.write().await;
        Ok(latest.remove(&Self::key(resource_type, id)).is_some())
    }
}
