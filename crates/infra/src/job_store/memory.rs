//! In-memory job store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docsmith_core::{Job, JobId, JobStatus};

use super::{CreateOutcome, JobStore, JobStoreError, StatusFields};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_transition(
    job: &mut Job,
    next: JobStatus,
    fields: StatusFields,
) -> Result<(), JobStoreError> {
    match next {
        JobStatus::Processing => job.mark_processing()?,
        JobStatus::Completed => {
            job.mark_completed(fields.artifact_url, fields.pull_request_url)?
        }
        JobStatus::Failed => {
            job.mark_failed(fields.error.unwrap_or_default())?;
        }
        JobStatus::Pending => {
            return Err(docsmith_core::DomainError::illegal_transition(format!(
                "{} -> pending",
                job.status
            ))
            .into());
        }
    }
    Ok(())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<CreateOutcome, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();

        // Uniqueness among non-failed rows, checked under the same lock
        // as the insert.
        if let Some(existing) = jobs
            .values()
            .find(|j| j.source == job.source && j.occupies_locator())
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }

        jobs.insert(job.id, job.clone());
        Ok(CreateOutcome::Created(job))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut all: Vec<_> = jobs.values().cloned().collect();
        // Newest first; IDs are time-ordered and break created_at ties.
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        Ok(all
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn set_status(
        &self,
        id: JobId,
        next: JobStatus,
        fields: StatusFields,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        apply_transition(job, next, fields)?;
        Ok(job.clone())
    }

    async fn requeue_crashed(&self, id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Processing {
            return Err(docsmith_core::DomainError::illegal_transition(format!(
                "requeue from {}",
                job.status
            ))
            .into());
        }
        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.remove(&id).ok_or(JobStoreError::NotFound(id))?;
        Ok(())
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn sweep_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id)
            .collect();
        for id in &stale {
            jobs.remove(id);
        }
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_core::locator;

    fn job_for(url: &str) -> Job {
        Job::new(locator::normalize(url).unwrap(), None)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryJobStore::new();
        let job = job_for("https://example.com/acme/widget");
        let outcome = store.create(job.clone()).await.unwrap();
        assert!(outcome.is_created());

        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        // Reads are idempotent.
        assert_eq!(store.get(job.id).await.unwrap().unwrap(), fetched);
    }

    #[tokio::test]
    async fn duplicate_locator_returns_existing() {
        let store = InMemoryJobStore::new();
        let first = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        let second = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(second.job().id, first.job().id);
    }

    #[tokio::test]
    async fn failed_job_releases_the_locator() {
        let store = InMemoryJobStore::new();
        let first = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        let id = first.job().id;

        store
            .set_status(id, JobStatus::Processing, StatusFields::default())
            .await
            .unwrap();
        store
            .set_status(id, JobStatus::Failed, StatusFields::error("network: boom"))
            .await
            .unwrap();

        let retry = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        assert!(retry.is_created());
        assert_ne!(retry.job().id, id);
    }

    #[tokio::test]
    async fn set_status_rejects_illegal_transitions() {
        let store = InMemoryJobStore::new();
        let outcome = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        let id = outcome.job().id;

        // pending -> completed skips processing.
        let err = store
            .set_status(
                id,
                JobStatus::Completed,
                StatusFields::completed(Some("https://cdn/docs/x".into()), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Domain(_)));

        store
            .set_status(id, JobStatus::Processing, StatusFields::default())
            .await
            .unwrap();
        store
            .set_status(
                id,
                JobStatus::Completed,
                StatusFields::completed(Some("https://cdn/docs/x".into()), None),
            )
            .await
            .unwrap();

        // Terminal records reject all further mutation.
        let err = store
            .set_status(id, JobStatus::Failed, StatusFields::error("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Domain(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_stable_under_head_insertions() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let outcome = store
                .create(job_for(&format!("https://example.com/acme/widget{i}")))
                .await
                .unwrap();
            ids.push(outcome.job().id);
        }

        let page = store.list(1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[3]);
        assert_eq!(page[1].id, ids[2]);

        // A new head insertion shifts offsets but not relative order.
        store
            .create(job_for("https://example.com/acme/another"))
            .await
            .unwrap();
        let page_after = store.list(2, 2).await.unwrap();
        assert_eq!(page_after[0].id, ids[3]);
        assert_eq!(page_after[1].id, ids[2]);
    }

    #[tokio::test]
    async fn requeue_crashed_only_from_processing() {
        let store = InMemoryJobStore::new();
        let outcome = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        let id = outcome.job().id;

        assert!(store.requeue_crashed(id).await.is_err());

        store
            .set_status(id, JobStatus::Processing, StatusFields::default())
            .await
            .unwrap();
        let recovered = store.requeue_crashed(id).await.unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryJobStore::new();
        assert!(matches!(
            store.delete(JobId::new()).await.unwrap_err(),
            JobStoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn sweeps_only_old_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let done = store
            .create(job_for("https://example.com/acme/widget"))
            .await
            .unwrap();
        let id = done.job().id;
        store
            .set_status(id, JobStatus::Processing, StatusFields::default())
            .await
            .unwrap();
        store
            .set_status(id, JobStatus::Failed, StatusFields::error("network: boom"))
            .await
            .unwrap();
        store
            .create(job_for("https://example.com/acme/pending"))
            .await
            .unwrap();

        let removed = store
            .sweep_terminal_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(id).await.unwrap().is_none());
        assert_eq!(store.list(0, 10).await.unwrap().len(), 1);
    }
}
