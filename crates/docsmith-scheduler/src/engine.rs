use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::{compute_next_run, Schedule};

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobEntry {
    id: String,
    name: String,
    schedule: Schedule,
    callback: JobFn,
    /// Single-flight guard: a due job whose previous run is still in flight
    /// is skipped; its missed ticks coalesce into the next fire.
    running: Arc<AtomicBool>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    run_count: Arc<AtomicU64>,
}

/// Read-only view of a job for the operator surface.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
    pub run_count: u64,
}

/// Polls every second and fires due jobs on the tokio runtime.
pub struct Scheduler {
    jobs: Mutex<Vec<Arc<JobEntry>>>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a job. The callback is invoked on every fire; it must be a
    /// factory so each fire gets a fresh future.
    pub fn add_job<F, Fut>(&self, name: &str, schedule: Schedule, callback: F) -> String
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let next = compute_next_run(&schedule, Utc::now());
        let entry = Arc::new(JobEntry {
            id: id.clone(),
            name: name.to_string(),
            schedule,
            callback: Arc::new(move || Box::pin(callback()) as JobFuture),
            running: Arc::new(AtomicBool::new(false)),
            next_run: Mutex::new(next),
            run_count: Arc::new(AtomicU64::new(0)),
        });
        self.jobs.lock().unwrap().push(entry);
        info!(job_id = %id, name, "job added");
        id
    }

    /// Remove a job by id. An in-flight run completes on its own.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|j| JobInfo {
                id: j.id.clone(),
                name: j.name.clone(),
                next_run: *j.next_run.lock().unwrap(),
                running: j.running.load(Ordering::SeqCst),
                run_count: j.run_count.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Main loop. Ticks once a second until `shutdown` broadcasts `true`,
    /// then waits for in-flight jobs to finish. Pending triggers are
    /// dropped — shutdown is graceful, not a drain-the-backlog pass.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("scheduler stopped, in-flight jobs complete");
    }

    /// Fire every due job. Missed ticks coalesce because the next run is
    /// always computed from `now`, never replayed per missed slot.
    fn tick(&self, now: DateTime<Utc>) {
        let due: Vec<Arc<JobEntry>> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .filter(|j| {
                    j.next_run
                        .lock()
                        .unwrap()
                        .map(|t| t <= now)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for job in due {
            *job.next_run.lock().unwrap() = compute_next_run(&job.schedule, now);

            if job.running.swap(true, Ordering::SeqCst) {
                // Previous run still in flight — skip, the flag clears when
                // it finishes and the next due tick fires again.
                warn!(job = %job.name, "previous run still in flight, tick skipped");
                continue;
            }

            debug!(job = %job.name, "job fired");
            let fut = (job.callback)();
            let running = Arc::clone(&job.running);
            let run_count = Arc::clone(&job.run_count);
            self.tracker.spawn(async move {
                fut.await;
                run_count.fetch_add(1, Ordering::SeqCst);
                running.store(false, Ordering::SeqCst);
            });
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn start(scheduler: Arc<Scheduler>) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(scheduler.run(rx));
        tx
    }

    #[tokio::test(start_paused = true)]
    async fn interval_job_fires_repeatedly() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        scheduler.add_job("tick", Schedule::IntervalSecs(5), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let tx = start(Arc::clone(&scheduler));
        tokio::time::sleep(Duration::from_secs(16)).await;
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fired = count.load(Ordering::SeqCst);
        assert!((2..=4).contains(&fired), "expected ~3 fires, got {fired}");
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_skips_overlapping_runs() {
        let scheduler = Arc::new(Scheduler::new());
        let entered = Arc::new(AtomicU32::new(0));
        let e = Arc::clone(&entered);
        // Runs take far longer than the 1 s interval.
        scheduler.add_job("slow", Schedule::IntervalSecs(1), move || {
            let e = Arc::clone(&e);
            async move {
                e.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let tx = start(Arc::clone(&scheduler));
        tokio::time::sleep(Duration::from_secs(10)).await;
        // Only the first run may have entered; the rest were skipped.
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        tx.send(true).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn once_job_fires_exactly_once() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        scheduler.add_job(
            "one-shot",
            Schedule::Once(Utc::now() + chrono::Duration::seconds(2)),
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        let tx = start(Arc::clone(&scheduler));
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let jobs = scheduler.list_jobs();
        assert_eq!(jobs[0].next_run, None);
        assert_eq!(jobs[0].run_count, 1);
    }

    #[tokio::test]
    async fn add_remove_list() {
        let scheduler = Scheduler::new();
        let id = scheduler.add_job("job", Schedule::IntervalSecs(60), || async {});
        assert_eq!(scheduler.list_jobs().len(), 1);
        scheduler.remove_job(&id).unwrap();
        assert!(scheduler.list_jobs().is_empty());
        assert!(matches!(
            scheduler.remove_job(&id),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }
}
