//! Scheduler (C10): interval and daily-cron jobs, non-reentrant, built
//! directly on `tokio::time` rather than an external job-scheduler crate —
//! none of the five teachers/pack repos pull one in, and the teacher already
//! drives its own periodic work with `tokio::time::interval` in `main.rs`.

use chrono::{NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    IntervalMinutes(u64),
    DailyCron { hour: u32, minute: u32 },
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub name: String,
    pub trigger: Trigger,
    pub running: bool,
    pub paused: bool,
}

struct Job {
    trigger: Trigger,
    func: JobFn,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Process-global scheduler, held as one `Arc` and passed explicitly rather
/// than as a singleton, per spec.md §9's remap. Registering a name that
/// already exists replaces the previous binding (its task is aborted first).
pub struct Scheduler {
    timezone: Tz,
    jobs: Mutex<HashMap<String, Job>>,
}

impl Scheduler {
    pub fn new(timezone: Tz) -> Arc<Self> {
        Arc::new(Scheduler {
            timezone,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Registers (or replaces) a named job and immediately spawns its driver
    /// task. Replacing an existing name aborts the previous task.
    pub fn register<F, Fut>(self: &Arc<Self>, name: &str, trigger: Trigger, func: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let func: JobFn = Arc::new(move || Box::pin(func()));
        let running = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));

        {
            let mut jobs = self.jobs.lock();
            if let Some(old) = jobs.remove(name) {
                if let Some(handle) = old.handle {
                    handle.abort();
                }
            }
        }

        let scheduler = Arc::clone(self);
        let name_owned = name.to_string();
        let driver_running = Arc::clone(&running);
        let driver_paused = Arc::clone(&paused);
        let driver_func = Arc::clone(&func);
        let handle = tokio::spawn(async move {
            scheduler
                .drive(name_owned, trigger, driver_func, driver_running, driver_paused)
                .await;
        });

        self.jobs.lock().insert(
            name.to_string(),
            Job {
                trigger,
                func,
                running,
                paused,
                handle: Some(handle),
            },
        );
    }

    async fn drive(
        self: Arc<Self>,
        name: String,
        trigger: Trigger,
        func: JobFn,
        running: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
    ) {
        loop {
            let wait = self.next_wait(trigger);
            tokio::time::sleep(wait).await;

            if paused.load(Ordering::SeqCst) {
                continue;
            }

            // Non-reentrancy: if the previous tick is still in flight, skip
            // this one silently rather than queueing or stacking calls.
            if running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!(job = name.as_str(), "tick skipped: previous run still in flight");
                continue;
            }

            let job_func = Arc::clone(&func);
            let job_running = Arc::clone(&running);
            let job_name = name.clone();
            tokio::spawn(async move {
                info!(job = job_name.as_str(), "tick starting");
                job_func().await;
                job_running.store(false, Ordering::SeqCst);
                info!(job = job_name.as_str(), "tick finished");
            });
        }
    }

    fn next_wait(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::IntervalMinutes(n) => Duration::from_secs(n.max(1) * 60),
            Trigger::DailyCron { hour, minute } => self.duration_until_next_daily(hour, minute),
        }
    }

    fn duration_until_next_daily(&self, hour: u32, minute: u32) -> Duration {
        let now = Utc::now().with_timezone(&self.timezone);
        let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_else(|| NaiveTime::from_hms_opt(16, 0, 0).unwrap());
        let mut target = now.date_naive().and_time(target_time);
        if target <= now.naive_local() {
            target += chrono::Duration::days(1);
        }
        let target_tz = self
            .timezone
            .from_local_datetime(&target)
            .single()
            .unwrap_or_else(|| now + chrono::Duration::days(1));
        (target_tz.with_timezone(&Utc) - now.with_timezone(&Utc))
            .to_std()
            .unwrap_or(Duration::from_secs(60))
    }

    /// Runs a named job's body immediately, out of band from its normal
    /// trigger, still honoring non-reentrancy.
    pub async fn trigger_now(&self, name: &str) -> bool {
        let (func, running) = {
            let jobs = self.jobs.lock();
            match jobs.get(name) {
                Some(job) => (Arc::clone(&job.func), Arc::clone(&job.running)),
                None => return false,
            }
        };
        if running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(job = name, "trigger_now skipped: already running");
            return false;
        }
        func().await;
        running.store(false, Ordering::SeqCst);
        true
    }

    pub fn pause(&self, name: &str) -> bool {
        match self.jobs.lock().get(name) {
            Some(job) => {
                job.paused.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, name: &str) -> bool {
        match self.jobs.lock().get(name) {
            Some(job) => {
                job.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<JobStatus> {
        self.jobs
            .lock()
            .iter()
            .map(|(name, job)| JobStatus {
                name: name.clone(),
                trigger: job.trigger,
                running: job.running.load(Ordering::SeqCst),
                paused: job.paused.load(Ordering::SeqCst),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn non_reentrant_job_skips_overlapping_ticks() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        let overlap_detected = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicBool::new(false));
        let completions = Arc::new(AtomicU32::new(0));

        let overlap_for_job = Arc::clone(&overlap_detected);
        let in_flight_for_job = Arc::clone(&in_flight);
        let completions_for_job = Arc::clone(&completions);

        scheduler.register("slow-job", Trigger::IntervalMinutes(0), move || {
            let overlap_detected = Arc::clone(&overlap_for_job);
            let in_flight = Arc::clone(&in_flight_for_job);
            let completions = Arc::clone(&completions_for_job);
            async move {
                if in_flight.swap(true, Ordering::SeqCst) {
                    overlap_detected.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(40)).await;
                in_flight.store(false, Ordering::SeqCst);
                completions.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Fire several concurrent trigger_now calls; the non-reentrancy
        // guard should let only one body run at a time, so the others
        // should observe `false` and skip rather than overlap.
        let mut handles = Vec::new();
        for _ in 0..5 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move { scheduler.trigger_now("slow-job").await }));
        }
        let mut ran = 0;
        for h in handles {
            if h.await.unwrap() {
                ran += 1;
            }
        }

        assert!(!overlap_detected.load(Ordering::SeqCst));
        assert!(ran >= 1, "at least one trigger_now call should have run");
        assert!(completions.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn daily_cron_computes_a_nonnegative_wait() {
        let scheduler = Scheduler::new(chrono_tz::Africa::Casablanca);
        let wait = scheduler.duration_until_next_daily(16, 0);
        assert!(wait.as_secs() > 0);
        assert!(wait.as_secs() <= 24 * 3600);
    }

    #[test]
    fn pause_resume_and_list_roundtrip_through_registered_jobs() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        scheduler.register("noop", Trigger::IntervalMinutes(10), || async {});
        assert!(scheduler.pause("noop"));
        let statuses = scheduler.list();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].paused);
        assert!(scheduler.resume("noop"));
        assert!(!scheduler.pause("missing"));
    }
}
