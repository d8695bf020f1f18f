//! Background scheduler: trigger reconciliation and the tick loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use strand_queue::{EnqueueInput, EventQueue};
use strand_store::{JobOwner, JobStore, ScheduledJob, Skill, Trigger, Workflow};

use crate::error::Result;
use crate::schedule::{calculate_next_run, parse_schedule};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tuning knobs for the tick loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between due-job sweeps.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Inner {
    jobs: Arc<dyn JobStore>,
    queue: RwLock<Option<EventQueue>>,
    running: AtomicBool,
    ticking: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: SchedulerConfig,
}

/// Clears the tick guard however the sweep ends: normal return, unwind,
/// or the future being dropped at an await point.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Materializes cron triggers into scheduled jobs and fires synthetic
/// events when they come due. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                queue: RwLock::new(None),
                running: AtomicBool::new(false),
                ticking: AtomicBool::new(false),
                handle: Mutex::new(None),
                config,
            }),
        }
    }

    /// Bind the queue fired events are enqueued into. Ticks before
    /// binding are no-ops.
    pub fn bind_event_queue(&self, queue: EventQueue) {
        *self
            .inner
            .queue
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(queue);
    }

    fn queue(&self) -> Option<EventQueue> {
        self.inner
            .queue
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Reconcile the job table with the cron triggers of the given
    /// skills. Idempotent; safe to call on every definition change.
    pub async fn sync_from_skills(&self, skills: &[Skill]) -> Result<()> {
        let desired = desired_jobs(skills.iter().map(|s| (JobOwner::Skill(s.id), s.enabled, &s.triggers)));
        self.reconcile(desired, |owner| matches!(owner, JobOwner::Skill(_)))
            .await
    }

    /// Reconcile the job table with the cron triggers of the given
    /// workflows.
    pub async fn sync_from_workflows(&self, workflows: &[Workflow]) -> Result<()> {
        let desired = desired_jobs(
            workflows
                .iter()
                .map(|w| (JobOwner::Workflow(w.id), w.enabled, &w.triggers)),
        );
        self.reconcile(desired, |owner| matches!(owner, JobOwner::Workflow(_)))
            .await
    }

    /// Bring the job table in line with the desired set.
    ///
    /// Creates missing jobs with a fresh `next_run_at`, updates jobs
    /// whose schedule string changed (recomputing the next run), and
    /// deletes jobs this pass covers that are no longer desired: the
    /// owner was deleted or disabled, or the trigger stopped being
    /// cron. Unparseable expressions are dropped from the desired set,
    /// so a definition gone bad loses its job instead of firing.
    async fn reconcile<F>(&self, desired: Vec<(JobOwner, usize, String)>, covers: F) -> Result<()>
    where
        F: Fn(&JobOwner) -> bool,
    {
        let mut keep: HashSet<(JobOwner, usize)> = HashSet::new();

        for (owner, trigger_index, expr) in desired {
            if let Err(err) = parse_schedule(&expr) {
                warn!(
                    owner_id = %owner.id(),
                    trigger_index,
                    error = %err,
                    "skipping trigger with unparseable schedule"
                );
                continue;
            }
            keep.insert((owner, trigger_index));

            match self.inner.jobs.get_job(owner, trigger_index).await? {
                Some(existing) if existing.schedule == expr => {}
                Some(mut existing) => {
                    existing.schedule = expr.clone();
                    existing.next_run_at = calculate_next_run(&expr, Utc::now());
                    self.inner.jobs.upsert_job(existing).await?;
                    info!(
                        owner_id = %owner.id(),
                        trigger_index,
                        schedule = %expr,
                        "scheduled job updated"
                    );
                }
                None => {
                    let next = calculate_next_run(&expr, Utc::now());
                    let job = ScheduledJob::new(owner, trigger_index, expr.clone(), next);
                    self.inner.jobs.upsert_job(job).await?;
                    info!(
                        owner_kind = owner.kind(),
                        owner_id = %owner.id(),
                        trigger_index,
                        schedule = %expr,
                        "scheduled job created"
                    );
                }
            }
        }

        for job in self.inner.jobs.list_jobs().await? {
            if covers(&job.owner) && !keep.contains(&(job.owner, job.trigger_index)) {
                self.inner
                    .jobs
                    .remove_job(job.owner, job.trigger_index)
                    .await?;
                info!(
                    owner_id = %job.owner.id(),
                    trigger_index = job.trigger_index,
                    "orphaned scheduled job removed"
                );
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Run one due-job sweep.
    ///
    /// Normally driven by [`start`](Self::start); callable directly by
    /// embedders that bring their own timer. Single-flight: a tick
    /// while one is active is a no-op. Returns the number of jobs
    /// fired.
    pub async fn tick(&self) -> Result<usize> {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(0);
        }

        let _guard = TickGuard(&self.inner.ticking);
        self.tick_locked().await
    }

    async fn tick_locked(&self) -> Result<usize> {
        let Some(queue) = self.queue() else {
            debug!("tick with no bound event queue");
            return Ok(0);
        };

        let now = Utc::now();
        let due = self.inner.jobs.due_jobs(now).await?;
        let mut fired = 0usize;

        for job in due {
            match self.fire_job(&queue, &job).await {
                Ok(()) => fired += 1,
                Err(err) => {
                    // One bad job must not block the rest of the sweep.
                    warn!(job_id = %job.id, error = %err, "scheduled job failed to fire");
                }
            }
        }

        if fired > 0 {
            debug!(fired, "tick fired due jobs");
        }
        Ok(fired)
    }

    async fn fire_job(&self, queue: &EventQueue, job: &ScheduledJob) -> Result<()> {
        let now = Utc::now();
        let payload = json!({
            "schedule": job.schedule,
            "job_id": job.id,
            "owner": { "kind": job.owner.kind(), "id": job.owner.id() },
        });

        queue
            .enqueue(EnqueueInput::new("cron", "schedule.fired", payload))
            .await
            .map_err(|err| match err {
                strand_queue::QueueError::Store(e) => crate::error::ScheduleError::Store(e),
            })?;

        let next = calculate_next_run(&job.schedule, now);
        self.inner.jobs.record_job_fire(job.id, now, next).await?;

        info!(
            job_id = %job.id,
            owner_kind = job.owner.kind(),
            owner_id = %job.owner.id(),
            "scheduled job fired"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the background tick loop. Idempotent; a second call while
    /// running is a no-op.
    pub fn start(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scheduler already running");
            return;
        }

        let scheduler = self.clone();
        let interval = self.inner.config.tick_interval;
        let handle = tokio::spawn(async move {
            info!("scheduler started");
            while scheduler.inner.running.load(Ordering::Acquire) {
                if let Err(err) = scheduler.tick().await {
                    warn!(error = %err, "scheduler tick failed");
                }
                tokio::time::sleep(interval).await;
            }
            info!("scheduler stopped");
        });

        *self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    /// Stop the background loop and wait for it to wind down.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            warn!("stop called but scheduler is not running");
            return;
        }

        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!(error = %err, "scheduler task panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

/// Flatten definitions into the desired job set: one entry per cron
/// trigger of each enabled owner.
fn desired_jobs<'a, I>(owners: I) -> Vec<(JobOwner, usize, String)>
where
    I: Iterator<Item = (JobOwner, bool, &'a Vec<Trigger>)>,
{
    owners
        .filter(|(_, enabled, _)| *enabled)
        .flat_map(|(owner, _, triggers)| {
            triggers.iter().enumerate().filter_map(move |(i, t)| {
                t.schedule.as_ref().map(|expr| (owner, i, expr.clone()))
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use strand_store::{EventStore, MemoryStore, Trigger};

    fn scheduler_with(store: Arc<MemoryStore>) -> Scheduler {
        Scheduler::new(store, SchedulerConfig::default())
    }

    fn cron_skill(expr: &str) -> Skill {
        let mut skill = Skill::new("nightly", "Do the nightly chores.");
        skill.triggers.push(Trigger::on_schedule(expr));
        skill
    }

    #[tokio::test]
    async fn sync_creates_jobs_for_cron_triggers_only() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let mut skill = cron_skill("0 2 * * *");
        skill.triggers.push(Trigger::on_source("github"));
        scheduler.sync_from_skills(&[skill.clone()]).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].owner, JobOwner::Skill(skill.id));
        assert_eq!(jobs[0].trigger_index, 0);
        assert!(jobs[0].next_run_at.is_some());
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let skill = cron_skill("0 2 * * *");

        scheduler.sync_from_skills(&[skill.clone()]).await.unwrap();
        let first = store.list_jobs().await.unwrap();
        scheduler.sync_from_skills(&[skill]).await.unwrap();
        let second = store.list_jobs().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].next_run_at, second[0].next_run_at);
    }

    #[tokio::test]
    async fn sync_updates_changed_schedule_in_place() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let mut skill = cron_skill("0 2 * * *");
        scheduler.sync_from_skills(&[skill.clone()]).await.unwrap();
        let before = store.list_jobs().await.unwrap()[0].clone();

        skill.triggers[0].schedule = Some("0 3 * * *".into());
        scheduler.sync_from_skills(&[skill]).await.unwrap();
        let after = store.list_jobs().await.unwrap()[0].clone();

        assert_eq!(after.id, before.id);
        assert_eq!(after.schedule, "0 3 * * *");
        assert_ne!(after.next_run_at, before.next_run_at);
    }

    #[tokio::test]
    async fn sync_removes_jobs_of_disabled_and_deleted_owners() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let mut skill = cron_skill("0 2 * * *");
        scheduler.sync_from_skills(&[skill.clone()]).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);

        skill.enabled = false;
        scheduler.sync_from_skills(&[skill]).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());

        let other = cron_skill("0 2 * * *");
        scheduler.sync_from_skills(&[other]).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);

        // Owner deleted entirely.
        scheduler.sync_from_skills(&[]).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_drops_jobs_whose_schedule_went_bad() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let mut skill = cron_skill("0 2 * * *");
        scheduler.sync_from_skills(&[skill.clone()]).await.unwrap();

        skill.triggers[0].schedule = Some("garbage".into());
        scheduler.sync_from_skills(&[skill]).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skill_and_workflow_sync_do_not_disturb_each_other() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let mut workflow = Workflow::new("digest", "Send the digest.");
        workflow.triggers.push(Trigger::on_schedule("0 8 * * *"));
        scheduler.sync_from_workflows(&[workflow]).await.unwrap();

        // A skill sync with no skills must leave workflow jobs alone.
        scheduler.sync_from_skills(&[]).await.unwrap();
        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0].owner, JobOwner::Workflow(_)));
    }

    #[tokio::test]
    async fn tick_without_bound_queue_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let job = ScheduledJob::new(
            JobOwner::Skill(uuid::Uuid::now_v7()),
            0,
            "0 * * * *",
            Some(Utc::now() - ChronoDuration::minutes(1)),
        );
        store.upsert_job(job).await.unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_and_reschedules() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let queue = EventQueue::new(store.clone());
        scheduler.bind_event_queue(queue);

        let owner = JobOwner::Workflow(uuid::Uuid::now_v7());
        let job = ScheduledJob::new(
            owner,
            0,
            "0 * * * *",
            Some(Utc::now() - ChronoDuration::minutes(1)),
        );
        let job_id = job.id;
        store.upsert_job(job).await.unwrap();

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 1);

        // No consumer is registered, so the synthetic event sits
        // pending where we can inspect it.
        let pending = store.list_pending_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        let event = &pending[0];
        assert_eq!(event.source, "cron");
        assert_eq!(event.event_type, "schedule.fired");
        assert_eq!(event.payload["owner"]["kind"], "workflow");
        assert_eq!(event.payload["job_id"], serde_json::json!(job_id));

        let job = store.get_job(owner, 0).await.unwrap().unwrap();
        assert!(job.last_run_at.is_some());
        assert!(job.next_run_at.unwrap() > Utc::now());

        // Rescheduled into the future: a second tick fires nothing.
        assert_eq!(scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn panicking_tick_releases_the_tick_guard() {
        use async_trait::async_trait;
        use chrono::DateTime;

        /// Job store whose first due-job sweep panics; everything else
        /// delegates to a real in-memory store.
        struct FlakyJobs {
            inner: MemoryStore,
            blown: AtomicBool,
        }

        #[async_trait]
        impl JobStore for FlakyJobs {
            async fn upsert_job(&self, job: ScheduledJob) -> strand_store::Result<ScheduledJob> {
                self.inner.upsert_job(job).await
            }

            async fn get_job(
                &self,
                owner: JobOwner,
                trigger_index: usize,
            ) -> strand_store::Result<Option<ScheduledJob>> {
                self.inner.get_job(owner, trigger_index).await
            }

            async fn list_jobs(&self) -> strand_store::Result<Vec<ScheduledJob>> {
                self.inner.list_jobs().await
            }

            async fn remove_job(
                &self,
                owner: JobOwner,
                trigger_index: usize,
            ) -> strand_store::Result<()> {
                self.inner.remove_job(owner, trigger_index).await
            }

            async fn due_jobs(
                &self,
                now: DateTime<Utc>,
            ) -> strand_store::Result<Vec<ScheduledJob>> {
                if !self.blown.swap(true, Ordering::SeqCst) {
                    panic!("job store exploded");
                }
                self.inner.due_jobs(now).await
            }

            async fn record_job_fire(
                &self,
                id: uuid::Uuid,
                last_run_at: DateTime<Utc>,
                next_run_at: Option<DateTime<Utc>>,
            ) -> strand_store::Result<ScheduledJob> {
                self.inner.record_job_fire(id, last_run_at, next_run_at).await
            }
        }

        let store = Arc::new(FlakyJobs {
            inner: MemoryStore::new(),
            blown: AtomicBool::new(false),
        });
        let scheduler = Scheduler::new(store.clone(), SchedulerConfig::default());
        scheduler.bind_event_queue(EventQueue::new(Arc::new(MemoryStore::new())));

        let job = ScheduledJob::new(
            JobOwner::Skill(uuid::Uuid::now_v7()),
            0,
            "0 * * * *",
            Some(Utc::now() - ChronoDuration::minutes(1)),
        );
        store.upsert_job(job).await.unwrap();

        let tick = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.tick().await }
        });
        assert!(tick.await.unwrap_err().is_panic());

        // The unwound tick must not leave the scheduler wedged; the
        // next tick proceeds and fires the due job.
        assert_eq!(scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn start_stop_lifecycle_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(
            store,
            SchedulerConfig {
                tick_interval: Duration::from_millis(10),
            },
        );

        assert!(!scheduler.is_running());
        scheduler.start();
        assert!(scheduler.is_running());
        // Second start is a no-op.
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        // Second stop is a no-op.
        scheduler.stop().await;
    }
}
