/// Scheduler Service
/// Runs the daily digest on a per-minute cron tick. Each tick sends the
/// digest to users whose local notification time has arrived and who have
/// not received one for that local day yet.
use crate::config::{DEFAULT_TIMEZONE, DIGEST_CATCH_UP_MINUTES, DIGEST_TICK_CRON};
use crate::database::{parse_email_time, User};
use crate::error::{AppError, Result};
use crate::services::DigestService;
use crate::storage::Store;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still running
    Skipped,
    Completed { due: usize, sent: usize },
}

/// Local calendar day whose digest is due at `now`, if any.
///
/// A user is due from the instant their configured email time occurs on a
/// local day until the catch-up window closes. A window crossing midnight
/// still belongs to the day it started on.
pub fn due_slot(user: &User, now: DateTime<Utc>) -> Option<NaiveDate> {
    let tz = user.timezone.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(
            "User {} has unknown timezone {:?}, using {}",
            user.id,
            user.timezone,
            DEFAULT_TIMEZONE
        );
        DEFAULT_TIMEZONE.parse::<Tz>().unwrap_or(Tz::UTC)
    });

    let send_at = match parse_email_time(&user.email_time) {
        Ok(time) => time,
        Err(e) => {
            tracing::warn!("User {} has unusable email time: {}", user.id, e);
            return None;
        }
    };

    let today = now.with_timezone(&tz).date_naive();
    let window = Duration::minutes(DIGEST_CATCH_UP_MINUTES);

    [today.pred_opt(), Some(today)]
        .into_iter()
        .flatten()
        .find(|day| {
            send_instant(&tz, day.and_time(send_at))
                .is_some_and(|start| start <= now && now < start + window)
        })
}

/// UTC instant of a local wall-clock time.
///
/// Repeated times use their first occurrence. Times skipped by a clock
/// change move to the first local minute that exists.
fn send_instant(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    (0..=MAX_GAP_MINUTES).find_map(|shift| {
        tz.from_local_datetime(&(local + Duration::minutes(shift)))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    })
}

/// Longest clock-change gap searched when resolving a send time
const MAX_GAP_MINUTES: i64 = 180;

/// Executes digest ticks, never more than one at a time
pub struct DigestRunner {
    store: Arc<dyn Store>,
    digests: DigestService,
    running: AtomicBool,
}

/// Clears the running flag when a tick ends, even on error
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DigestRunner {
    pub fn new(store: Arc<dyn Store>, digests: DigestService) -> Self {
        Self {
            store,
            digests,
            running: AtomicBool::new(false),
        }
    }

    pub async fn run_tick(&self) -> Result<TickOutcome> {
        self.run_tick_at(Utc::now()).await
    }

    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Skipping digest tick: previous tick still running");
            return Ok(TickOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let mut due = 0;
        let mut sent = 0;

        for user in self.store.list_notifiable_users().await? {
            let Some(day) = due_slot(&user, now) else {
                continue;
            };
            due += 1;

            // Claimed before sending, so a crash mid-send never repeats a digest
            match self.store.claim_digest_delivery(&user.id, day).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!("Failed to claim digest slot for user {}: {}", user.id, e);
                    continue;
                }
            }

            match self.digests.build_digest_on(&user.id, day).await {
                Ok(digest) => {
                    if self.digests.dispatch(&digest).await {
                        sent += 1;
                    }
                }
                Err(e) => tracing::error!("Failed to build digest for user {}: {}", user.id, e),
            }
        }

        if due > 0 {
            tracing::info!("Digest tick complete: {} due, {} sent", due, sent);
        }
        Ok(TickOutcome::Completed { due, sent })
    }
}

/// Scheduler service for the daily digest
pub struct DigestScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    runner: Arc<DigestRunner>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl DigestScheduler {
    /// Create new scheduler service
    pub async fn new(runner: DigestRunner) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            runner: Arc::new(runner),
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Register the per-minute digest job and start the scheduler
    pub async fn start(&self) -> Result<()> {
        let runner = Arc::clone(&self.runner);

        let job = Job::new_async(DIGEST_TICK_CRON.to_string(), move |_uuid, _l| {
            let runner = Arc::clone(&runner);
            Box::pin(async move {
                if let Err(e) = runner.run_tick().await {
                    tracing::error!("Digest tick failed: {}", e);
                }
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create digest job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;

        *self.current_job_id.write().await = Some(job_id);

        tracing::info!("Digest scheduler started ({})", DIGEST_TICK_CRON);
        Ok(())
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        *self.current_job_id.write().await = None;
        tracing::info!("Digest scheduler shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, Repository, UserPatch};
    use crate::services::digest::tests::RecordingMailer;
    use crate::services::{MagicLinkService, UsersService};

    fn user(timezone: &str, email_time: &str) -> User {
        User {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            timezone: timezone.to_string(),
            email_time: email_time.to_string(),
            email_enabled: true,
            created_at: Utc::now(),
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_due_slot_window() {
        // Berlin is UTC+1 in early March
        let berlin = user("Europe/Berlin", "09:00");

        assert_eq!(due_slot(&berlin, utc(2025, 3, 10, 7, 59)), None);
        assert_eq!(due_slot(&berlin, utc(2025, 3, 10, 8, 0)), Some(day(2025, 3, 10)));
        assert_eq!(due_slot(&berlin, utc(2025, 3, 10, 8, 29)), Some(day(2025, 3, 10)));
        assert_eq!(due_slot(&berlin, utc(2025, 3, 10, 8, 30)), None);
    }

    #[test]
    fn test_due_slot_across_midnight() {
        let late = user("UTC", "23:50");

        assert_eq!(due_slot(&late, utc(2025, 3, 10, 23, 55)), Some(day(2025, 3, 10)));
        assert_eq!(due_slot(&late, utc(2025, 3, 11, 0, 10)), Some(day(2025, 3, 10)));
        assert_eq!(due_slot(&late, utc(2025, 3, 11, 0, 20)), None);
    }

    #[test]
    fn test_due_slot_unknown_timezone_falls_back() {
        // Los Angeles is UTC-7 after the March DST switch
        let lost = user("Nowhere/Special", "09:00");

        assert_eq!(due_slot(&lost, utc(2025, 3, 10, 16, 5)), Some(day(2025, 3, 10)));
        assert_eq!(due_slot(&lost, utc(2025, 3, 10, 9, 5)), None);
    }

    #[test]
    fn test_due_slot_inside_spring_forward_gap() {
        // 2025-03-09 02:00 PST jumps to 03:00 PDT; 02:30 never happens
        let early = user("America/Los_Angeles", "02:30");

        assert_eq!(due_slot(&early, utc(2025, 3, 9, 9, 59)), None);
        assert_eq!(due_slot(&early, utc(2025, 3, 9, 10, 0)), Some(day(2025, 3, 9)));
        assert_eq!(due_slot(&early, utc(2025, 3, 9, 10, 29)), Some(day(2025, 3, 9)));
        assert_eq!(due_slot(&early, utc(2025, 3, 9, 10, 30)), None);

        // Ordinary days are unaffected (PDT, UTC-7)
        assert_eq!(due_slot(&early, utc(2025, 3, 10, 9, 30)), Some(day(2025, 3, 10)));
    }

    #[test]
    fn test_due_slot_repeated_hour_sends_once() {
        // 2025-11-02 01:30 happens twice in Los Angeles
        let night = user("America/Los_Angeles", "01:30");

        assert_eq!(due_slot(&night, utc(2025, 11, 2, 8, 35)), Some(day(2025, 11, 2)));
        assert_eq!(due_slot(&night, utc(2025, 11, 2, 9, 35)), None);
    }

    async fn setup() -> (DigestRunner, Arc<dyn Store>, Arc<RecordingMailer>) {
        let pool = create_memory_pool().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(Repository::new(pool));
        let users = UsersService::new(store.clone());
        let links = MagicLinkService::new(store.clone(), users);
        let mailer = Arc::new(RecordingMailer::default());
        let digests = DigestService::new(store.clone(), links, mailer.clone(), "http://app");
        (DigestRunner::new(store.clone(), digests), store, mailer)
    }

    #[tokio::test]
    async fn test_tick_sends_at_most_once_per_day() {
        let (runner, store, mailer) = setup().await;

        let ada = store.create_user("u1", "ada@example.com").await.unwrap();
        store
            .update_user(
                &ada.id,
                &UserPatch {
                    timezone: Some("Europe/Berlin".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let grace = store.create_user("u2", "grace@example.com").await.unwrap();
        store
            .update_user(
                &grace.id,
                &UserPatch {
                    timezone: Some("Europe/Berlin".to_string()),
                    email_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = runner.run_tick_at(utc(2025, 3, 10, 8, 1)).await.unwrap();
        assert_eq!(first, TickOutcome::Completed { due: 1, sent: 1 });

        let second = runner.run_tick_at(utc(2025, 3, 10, 8, 2)).await.unwrap();
        assert_eq!(second, TickOutcome::Completed { due: 1, sent: 0 });

        let next_day = runner.run_tick_at(utc(2025, 3, 11, 8, 0)).await.unwrap();
        assert_eq!(next_day, TickOutcome::Completed { due: 1, sent: 1 });

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|d| d.to == "ada@example.com"));
        assert_eq!(sent[1].date_label, "Tuesday, March 11, 2025");
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (runner, _, _) = setup().await;

        runner.running.store(true, Ordering::Release);
        assert_eq!(runner.run_tick().await.unwrap(), TickOutcome::Skipped);

        runner.running.store(false, Ordering::Release);
        assert!(matches!(
            runner.run_tick().await.unwrap(),
            TickOutcome::Completed { .. }
        ));
        assert!(!runner.running.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_scheduler_start_and_shutdown() {
        let (runner, _, _) = setup().await;
        let scheduler = DigestScheduler::new(runner).await.unwrap();

        scheduler.start().await.unwrap();
        assert!(scheduler.is_scheduled().await);

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_scheduled().await);
    }
}
