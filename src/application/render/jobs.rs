//! Per-session bookkeeping of in-flight compile jobs.

use std::{collections::HashMap, sync::Arc, time::Instant};

use futures::future::join_all;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::domain::Fragment;

use super::types::{CacheKey, JobEvent, JobId, JobState};

/// A compile job owned by one session.
#[derive(Debug)]
pub struct CompileJob {
    pub id: JobId,
    pub fragment: Fragment,
    pub key: CacheKey,
    pub state: JobState,
    pub started_at: Instant,
    /// Other spans with the same key, attached when this job's artifact lands.
    pub waiting: Vec<Fragment>,
    handle: JoinHandle<()>,
}

/// Jobs owned by a session, plus the channel and permits their tasks use.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: HashMap<JobId, CompileJob>,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobRegistry {
    /// Build a registry allowing `max_concurrent` running compilers, together
    /// with the receiving end of its event channel.
    pub fn new(max_concurrent: usize) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let registry = Self {
            jobs: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            events,
        };
        (registry, receiver)
    }

    pub(crate) fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    pub(crate) fn events(&self) -> mpsc::UnboundedSender<JobEvent> {
        self.events.clone()
    }

    pub(crate) fn register(
        &mut self,
        id: JobId,
        fragment: Fragment,
        key: CacheKey,
        handle: JoinHandle<()>,
    ) {
        self.jobs.insert(
            id,
            CompileJob {
                id,
                fragment,
                key,
                state: JobState::Pending,
                started_at: Instant::now(),
                waiting: Vec::new(),
                handle,
            },
        );
    }

    /// Job already compiling `key`, if any.
    pub fn in_flight(&self, key: &CacheKey) -> Option<JobId> {
        self.jobs
            .values()
            .find(|job| job.key == *key)
            .map(|job| job.id)
    }

    /// Hand `fragment` to job `id` so it receives that job's artifact too.
    ///
    /// Returns false when the job is gone. Parking the same fragment twice is a no-op.
    pub fn park(&mut self, id: JobId, fragment: &Fragment) -> bool {
        let Some(job) = self.jobs.get_mut(&id) else {
            return false;
        };
        if job.fragment != *fragment && !job.waiting.contains(fragment) {
            job.waiting.push(fragment.clone());
        }
        true
    }

    pub fn mark_running(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Running;
        }
    }

    /// Deregister a job that reached `state`. Unknown ids were already cancelled.
    pub fn finish(&mut self, id: JobId, state: JobState) -> Option<CompileJob> {
        let mut job = self.jobs.remove(&id)?;
        job.state = state;
        Some(job)
    }

    pub fn get(&self, id: JobId) -> Option<&CompileJob> {
        self.jobs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Abort every job and wait until each task has been torn down.
    ///
    /// Dropping a task drops its child process (killed on drop), its temporary
    /// input and its scratch output, so once this returns nothing is left behind.
    /// The drained jobs are returned in the `Cancelled` state.
    pub async fn cancel_all(&mut self) -> Vec<CompileJob> {
        let mut jobs: Vec<CompileJob> = self.jobs.drain().map(|(_, job)| job).collect();
        if jobs.is_empty() {
            return jobs;
        }

        for job in &jobs {
            job.handle.abort();
        }
        join_all(jobs.iter_mut().map(|job| &mut job.handle)).await;

        for job in &mut jobs {
            debug!(
                target = "application::render::jobs",
                op = "jobs::cancel_all",
                job_id = %job.id,
                span = %job.fragment.span,
                previous = ?job.state,
                waiting = job.waiting.len(),
                "Compile job cancelled"
            );
            job.state = JobState::Cancelled;
        }

        info!(
            target = "application::render::jobs",
            op = "jobs::cancel_all",
            cancelled = jobs.len(),
            "Cancelled in-flight compile jobs"
        );
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Span;

    #[tokio::test]
    async fn cancel_all_aborts_and_clears() {
        let (mut registry, _events) = JobRegistry::new(2);
        let fragment = Fragment::new(Span::new(0, 3), "$a$");
        let key = CacheKey::of_source("$a$");
        let id = JobId::new();
        let handle = tokio::spawn(std::future::pending::<()>());
        registry.register(id, fragment.clone(), key.clone(), handle);
        registry.mark_running(id);

        assert_eq!(registry.in_flight(&key), Some(id));
        assert_eq!(registry.get(id).map(|job| job.state), Some(JobState::Running));

        let cancelled = registry.cancel_all().await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].state, JobState::Cancelled);
        assert!(cancelled[0].handle.is_finished());
        assert!(registry.is_empty());
        assert_eq!(registry.in_flight(&key), None);
    }

    #[tokio::test]
    async fn park_collects_other_spans_with_the_same_key() {
        let (mut registry, _events) = JobRegistry::new(1);
        let first = Fragment::new(Span::new(0, 3), "$a$");
        let second = Fragment::new(Span::new(8, 11), "$a$");
        let key = CacheKey::of_source("$a$");
        let id = JobId::new();
        registry.register(
            id,
            first.clone(),
            key.clone(),
            tokio::spawn(std::future::pending::<()>()),
        );

        assert_eq!(registry.in_flight(&key), Some(id));
        assert!(registry.park(id, &second));
        assert!(registry.park(id, &second));
        assert!(registry.park(id, &first));
        assert!(!registry.park(JobId::new(), &second));

        let job = registry.finish(id, JobState::Succeeded).expect("registered");
        assert_eq!(job.waiting, vec![second]);
        job.handle.abort();
    }

    #[tokio::test]
    async fn finish_deregisters_once() {
        let (mut registry, _events) = JobRegistry::new(1);
        let id = JobId::new();
        registry.register(
            id,
            Fragment::new(Span::new(0, 3), "$b$"),
            CacheKey::of_source("$b$"),
            tokio::spawn(async {}),
        );
        registry.mark_running(id);
        assert_eq!(registry.get(id).map(|job| job.state), Some(JobState::Running));

        let job = registry.finish(id, JobState::Succeeded).expect("registered");
        assert_eq!(job.state, JobState::Succeeded);
        assert!(registry.finish(id, JobState::Succeeded).is_none());
    }

    #[test]
    fn zero_concurrency_still_allows_one_job() {
        let (registry, _events) = JobRegistry::new(0);
        assert_eq!(registry.permits().available_permits(), 1);
    }
}
