//! Storage module
//!
//! Defines the persistence contract shared by every backend and provides
//! the flat-file JSON backend. The SQLite backend lives in `database`.
//!
//! Contract rules every backend honours:
//! - partial updates touch only the slots present in the patch; an empty
//!   patch performs no write
//! - deleting an objective deletes its key results, deleting a task deletes
//!   its direct subtasks, deleting a user deletes everything it owns
//! - health metrics and heartbeat work are soft-deleted and excluded from
//!   list queries
//! - lookups by id fail with `AppError::NotFound`, duplicate emails with
//!   `AppError::DuplicateKey`

pub mod json_store;

pub use json_store::JsonFileStore;

use crate::database::models::*;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    // ===== Users =====

    /// Create a user with default timezone, email time and notifications on
    async fn create_user(&self, id: &str, email: &str) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<User>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<User>;

    /// Delete a user and everything the user owns
    async fn delete_user(&self, id: &str) -> Result<()>;

    /// Users with the daily digest enabled
    async fn list_notifiable_users(&self) -> Result<Vec<User>>;

    /// Record that the digest for `local_date` is being sent.
    ///
    /// Returns `false` if the slot was already claimed.
    async fn claim_digest_delivery(&self, user_id: &str, local_date: NaiveDate) -> Result<bool>;

    // ===== Objectives =====

    /// Insert the objective row only; key results are created separately
    async fn create_objective(&self, user_id: &str, new: &NewObjective) -> Result<Objective>;

    async fn get_objective(&self, id: &str) -> Result<Objective>;

    /// All objectives, newest quarter first
    async fn list_objectives(&self, user_id: &str) -> Result<Vec<Objective>>;

    /// Objectives for exactly this quarter whose status is active or unset
    async fn list_current_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>>;

    /// Objectives strictly before this quarter, most recent first
    async fn list_past_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>>;

    async fn update_objective(&self, id: &str, patch: &ObjectivePatch) -> Result<Objective>;

    async fn delete_objective(&self, id: &str) -> Result<()>;

    // ===== Key results =====

    async fn create_key_result(&self, objective_id: &str, new: &NewKeyResult)
        -> Result<KeyResult>;

    async fn get_key_result(&self, id: &str) -> Result<KeyResult>;

    async fn list_key_results(&self, objective_id: &str) -> Result<Vec<KeyResult>>;

    async fn update_key_result(&self, id: &str, patch: &KeyResultPatch) -> Result<KeyResult>;

    async fn delete_key_result(&self, id: &str) -> Result<()>;

    // ===== Health metrics =====

    async fn create_health_metric(
        &self,
        user_id: &str,
        new: &NewHealthMetric,
    ) -> Result<HealthMetric>;

    /// Returns soft-deleted rows too
    async fn get_health_metric(&self, id: &str) -> Result<HealthMetric>;

    async fn list_health_metrics(&self, user_id: &str) -> Result<Vec<HealthMetric>>;

    async fn update_health_metric(
        &self,
        id: &str,
        patch: &HealthMetricPatch,
    ) -> Result<HealthMetric>;

    async fn delete_health_metric(&self, id: &str) -> Result<()>;

    // ===== Heartbeat work =====

    async fn create_heartbeat_work(
        &self,
        user_id: &str,
        new: &NewHeartbeatWork,
    ) -> Result<HeartbeatWork>;

    /// Returns soft-deleted rows too
    async fn get_heartbeat_work(&self, id: &str) -> Result<HeartbeatWork>;

    async fn list_heartbeat_work(&self, user_id: &str) -> Result<Vec<HeartbeatWork>>;

    async fn update_heartbeat_work(
        &self,
        id: &str,
        patch: &HeartbeatWorkPatch,
    ) -> Result<HeartbeatWork>;

    async fn delete_heartbeat_work(&self, id: &str) -> Result<()>;

    // ===== Tasks =====

    async fn create_task(&self, user_id: &str, new: &NewTask) -> Result<Task>;

    async fn get_task(&self, id: &str) -> Result<Task>;

    /// Top-level tasks filtered by `view`, relative to the calendar day `today`
    async fn list_tasks(&self, user_id: &str, view: TaskView, today: NaiveDate)
        -> Result<Vec<Task>>;

    async fn list_subtasks(&self, parent_id: &str) -> Result<Vec<Task>>;

    /// Apply a patch; a status change stamps or clears `completed_at`
    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task>;

    /// Delete a task and every task below it
    async fn delete_task(&self, id: &str) -> Result<()>;

    // ===== Magic links =====

    async fn create_magic_link(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<MagicLink>;

    /// The link for `token` if it is unused and unexpired at `now`
    async fn find_valid_magic_link(&self, token: &str, now: DateTime<Utc>)
        -> Result<Option<MagicLink>>;

    /// Stamp `used_at` if the link is unused and unexpired at `now`.
    ///
    /// Check and stamp happen in one step. Returns `false` when the token is
    /// unknown, expired or already claimed; a used link keeps its first stamp.
    async fn claim_magic_link(&self, token: &str, now: DateTime<Utc>) -> Result<bool>;
}

/// Order objectives newest quarter first
pub(crate) fn sort_objectives_desc(objectives: &mut [Objective]) {
    objectives.sort_by(|a, b| (b.year, b.quarter).cmp(&(a.year, a.quarter)));
}

/// Whether a top-level task belongs in `view` on the calendar day `today`
pub(crate) fn task_matches_view(task: &Task, view: TaskView, today: NaiveDate) -> bool {
    let open = task.status != TaskStatus::Done;
    let deadline_day = task.deadline.map(|d| d.date());

    match view {
        TaskView::Today => open && deadline_day.map_or(true, |day| day == today),
        TaskView::Upcoming => open && deadline_day.is_some_and(|day| day > today),
        TaskView::Completed => !open,
        TaskView::All => open,
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour checks run against every `Store` implementation.

    use super::*;
    use crate::error::AppError;
    use chrono::Duration;

    pub async fn seed_user(store: &dyn Store) -> User {
        let id = uuid::Uuid::new_v4().to_string();
        store
            .create_user(&id, &format!("{}@example.com", id))
            .await
            .unwrap()
    }

    pub fn objective(title: &str, quarter: i64, year: i64) -> NewObjective {
        NewObjective {
            title: title.to_string(),
            description: None,
            quarter,
            year,
            key_results: Vec::new(),
        }
    }

    pub fn task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub async fn user_defaults_and_uniqueness(store: &dyn Store) {
        let user = store.create_user("u1", "ada@example.com").await.unwrap();
        assert_eq!(user.timezone, crate::config::DEFAULT_TIMEZONE);
        assert_eq!(user.email_time, crate::config::DEFAULT_EMAIL_TIME);
        assert!(user.email_enabled);

        let dup = store.create_user("u2", "ada@example.com").await;
        assert!(matches!(dup, Err(AppError::DuplicateKey(_))));

        let found = store.find_user_by_email("ada@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some("u1".to_string()));
        assert!(store.find_user_by_email("nobody@example.com").await.unwrap().is_none());

        assert!(matches!(
            store.get_user("missing").await,
            Err(AppError::NotFound { .. })
        ));
    }

    pub async fn user_partial_update(store: &dyn Store) {
        let user = seed_user(store).await;

        let unchanged = store.update_user(&user.id, &UserPatch::default()).await.unwrap();
        assert_eq!(unchanged, user);

        let patch = UserPatch {
            email_enabled: Some(false),
            ..Default::default()
        };
        let updated = store.update_user(&user.id, &patch).await.unwrap();
        assert!(!updated.email_enabled);
        assert_eq!(updated.timezone, user.timezone);
        assert_eq!(updated.email_time, user.email_time);

        let notifiable = store.list_notifiable_users().await.unwrap();
        assert!(notifiable.iter().all(|u| u.id != user.id));
    }

    pub async fn objective_queries(store: &dyn Store) {
        let user = seed_user(store).await;

        for (title, q, y) in [
            ("Old", 4, 2024),
            ("Current", 1, 2025),
            ("Earlier this year", 1, 2025),
            ("Future", 2, 2025),
        ] {
            store.create_objective(&user.id, &objective(title, q, y)).await.unwrap();
        }

        let earlier = store
            .list_objectives(&user.id)
            .await
            .unwrap()
            .into_iter()
            .find(|o| o.title == "Earlier this year")
            .unwrap();
        let archived = ObjectivePatch {
            status: Some(Some("archived".to_string())),
            ..Default::default()
        };
        store.update_objective(&earlier.id, &archived).await.unwrap();

        let all = store.list_objectives(&user.id).await.unwrap();
        let order: Vec<(i64, i64)> = all.iter().map(|o| (o.year, o.quarter)).collect();
        assert_eq!(order[0], (2025, 2));
        assert_eq!(order[3], (2024, 4));

        let current = store.list_current_objectives(&user.id, 1, 2025).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].title, "Current");

        let past = store.list_past_objectives(&user.id, 2, 2025).await.unwrap();
        let titles: Vec<&str> = past.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles.len(), 3);
        assert_eq!(titles[2], "Old");
        assert!(!titles.contains(&"Future"));
    }

    pub async fn objective_cascade(store: &dyn Store) {
        let user = seed_user(store).await;
        let obj = store
            .create_objective(&user.id, &objective("Grow revenue", 1, 2025))
            .await
            .unwrap();

        for description in ["Reach $10k MRR", "Sign 5 customers"] {
            let kr = NewKeyResult {
                description: description.to_string(),
                ..Default::default()
            };
            store.create_key_result(&obj.id, &kr).await.unwrap();
        }
        assert_eq!(store.list_key_results(&obj.id).await.unwrap().len(), 2);

        store.delete_objective(&obj.id).await.unwrap();

        assert!(store.list_key_results(&obj.id).await.unwrap().is_empty());
        assert!(matches!(
            store.get_objective(&obj.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    pub async fn key_result_defaults_and_confidence(store: &dyn Store) {
        let user = seed_user(store).await;
        let obj = store
            .create_objective(&user.id, &objective("Grow revenue", 1, 2025))
            .await
            .unwrap();

        let kr = store
            .create_key_result(
                &obj.id,
                &NewKeyResult {
                    description: "Reach $10k MRR".to_string(),
                    start_value: Some(0.0),
                    target_value: Some(10000.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(kr.kind, KeyResultKind::Numeric);
        assert_eq!(kr.confidence_level, 5);
        assert_eq!(kr.current_value, 0.0);
        assert_eq!(kr.status, "active");

        let rejected = KeyResultPatch {
            confidence_level: Some(11),
            current_value: Some(500.0),
            ..Default::default()
        };
        assert!(matches!(
            store.update_key_result(&kr.id, &rejected).await,
            Err(AppError::Validation(_))
        ));
        let after = store.get_key_result(&kr.id).await.unwrap();
        assert_eq!(after, kr);

        let accepted = KeyResultPatch {
            confidence_level: Some(8),
            ..Default::default()
        };
        let updated = store.update_key_result(&kr.id, &accepted).await.unwrap();
        assert_eq!(updated.confidence_level, 8);
        assert_eq!(updated.current_value, kr.current_value);

        let noop = store
            .update_key_result(&kr.id, &KeyResultPatch::default())
            .await
            .unwrap();
        assert_eq!(noop, updated);
    }

    pub async fn soft_delete(store: &dyn Store) {
        let user = seed_user(store).await;

        let metric = store
            .create_health_metric(
                &user.id,
                &NewHealthMetric {
                    name: "Sleep".to_string(),
                    description: None,
                    status: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(metric.status, MetricStatus::Green);
        assert!(metric.active);

        let noop = store
            .update_health_metric(&metric.id, &HealthMetricPatch::default())
            .await
            .unwrap();
        assert_eq!(noop, metric);

        let work = store
            .create_heartbeat_work(
                &user.id,
                &NewHeartbeatWork {
                    name: "Code review".to_string(),
                    description: None,
                    category: Some("engineering".to_string()),
                },
            )
            .await
            .unwrap();

        store.delete_health_metric(&metric.id).await.unwrap();
        store.delete_heartbeat_work(&work.id).await.unwrap();

        assert!(store.list_health_metrics(&user.id).await.unwrap().is_empty());
        assert!(store.list_heartbeat_work(&user.id).await.unwrap().is_empty());

        assert!(!store.get_health_metric(&metric.id).await.unwrap().active);
        assert!(!store.get_heartbeat_work(&work.id).await.unwrap().active);
    }

    pub async fn task_views_and_completion(store: &dyn Store) {
        let user = seed_user(store).await;
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let at = |d: NaiveDate| d.and_hms_opt(15, 0, 0);

        let due_today = store
            .create_task(
                &user.id,
                &NewTask {
                    deadline: at(today),
                    ..task("Due today")
                },
            )
            .await
            .unwrap();
        let undated = store.create_task(&user.id, &task("Undated")).await.unwrap();
        let later = store
            .create_task(
                &user.id,
                &NewTask {
                    deadline: at(today + Duration::days(3)),
                    ..task("Later")
                },
            )
            .await
            .unwrap();
        store
            .create_task(
                &user.id,
                &NewTask {
                    parent_task_id: Some(due_today.id.clone()),
                    ..task("Subtask")
                },
            )
            .await
            .unwrap();

        let ids = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id).collect::<Vec<_>>();

        let today_view = ids(store.list_tasks(&user.id, TaskView::Today, today).await.unwrap());
        assert_eq!(today_view.len(), 2);
        assert!(today_view.contains(&due_today.id) && today_view.contains(&undated.id));

        let upcoming = ids(store.list_tasks(&user.id, TaskView::Upcoming, today).await.unwrap());
        assert_eq!(upcoming, vec![later.id.clone()]);

        assert_eq!(
            store.list_tasks(&user.id, TaskView::All, today).await.unwrap().len(),
            3
        );

        let done = TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        let first = store.update_task(&undated.id, &done).await.unwrap();
        assert!(first.completed_at.is_some());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.update_task(&due_today.id, &done).await.unwrap();

        let today_view = store.list_tasks(&user.id, TaskView::Today, today).await.unwrap();
        assert!(today_view.is_empty());

        let completed = ids(store.list_tasks(&user.id, TaskView::Completed, today).await.unwrap());
        assert_eq!(completed, vec![due_today.id.clone(), undated.id.clone()]);

        let reopen = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let reopened = store.update_task(&undated.id, &reopen).await.unwrap();
        assert!(reopened.completed_at.is_none());

        let untouched = store.update_task(&later.id, &TaskPatch::default()).await.unwrap();
        assert_eq!(untouched, later);
    }

    pub async fn task_cascade(store: &dyn Store) {
        let user = seed_user(store).await;
        let parent = store.create_task(&user.id, &task("Parent")).await.unwrap();
        let child = store
            .create_task(
                &user.id,
                &NewTask {
                    parent_task_id: Some(parent.id.clone()),
                    ..task("Child")
                },
            )
            .await
            .unwrap();
        let grandchild = store
            .create_task(
                &user.id,
                &NewTask {
                    parent_task_id: Some(child.id.clone()),
                    ..task("Grandchild")
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list_subtasks(&parent.id).await.unwrap().len(), 1);

        store.delete_task(&parent.id).await.unwrap();

        assert!(matches!(
            store.get_task(&child.id).await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_task(&grandchild.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    pub async fn magic_link_lifecycle(store: &dyn Store) {
        let user = seed_user(store).await;
        let now = Utc::now();
        let link = store
            .create_magic_link(&user.id, "token-1", now + Duration::hours(24))
            .await
            .unwrap();
        assert!(link.used_at.is_none());

        assert!(store.find_valid_magic_link("token-1", now).await.unwrap().is_some());
        assert!(store
            .find_valid_magic_link("token-1", now + Duration::hours(25))
            .await
            .unwrap()
            .is_none());

        assert!(store.claim_magic_link("token-1", now).await.unwrap());
        assert!(store.find_valid_magic_link("token-1", now).await.unwrap().is_none());
        assert!(store.find_valid_magic_link("unknown", now).await.unwrap().is_none());
    }

    pub async fn magic_link_claimed_once(store: &dyn Store) {
        let user = seed_user(store).await;
        let now = Utc::now();
        store
            .create_magic_link(&user.id, "token-once", now + Duration::hours(24))
            .await
            .unwrap();
        store
            .create_magic_link(&user.id, "token-stale", now - Duration::seconds(1))
            .await
            .unwrap();

        assert!(store.claim_magic_link("token-once", now).await.unwrap());
        assert!(!store.claim_magic_link("token-once", now).await.unwrap());
        assert!(!store.claim_magic_link("token-stale", now).await.unwrap());
        assert!(!store.claim_magic_link("unknown", now).await.unwrap());

        // The losing claim leaves the first stamp in place
        let later = now + Duration::minutes(5);
        assert!(!store.claim_magic_link("token-once", later).await.unwrap());
        assert!(store
            .find_valid_magic_link("token-once", now)
            .await
            .unwrap()
            .is_none());
    }

    pub async fn digest_claims(store: &dyn Store) {
        let user = seed_user(store).await;
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        assert!(store.claim_digest_delivery(&user.id, day).await.unwrap());
        assert!(!store.claim_digest_delivery(&user.id, day).await.unwrap());
        assert!(store
            .claim_digest_delivery(&user.id, day.succ_opt().unwrap())
            .await
            .unwrap());
    }

    pub async fn user_cascade(store: &dyn Store) {
        let user = seed_user(store).await;
        let obj = store
            .create_objective(&user.id, &objective("Ship it", 2, 2025))
            .await
            .unwrap();
        store
            .create_key_result(
                &obj.id,
                &NewKeyResult {
                    description: "Reach 100 users".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let t = store.create_task(&user.id, &task("Call mom")).await.unwrap();

        store.delete_user(&user.id).await.unwrap();

        assert!(store.get_user(&user.id).await.is_err());
        assert!(store.get_objective(&obj.id).await.is_err());
        assert!(store.list_key_results(&obj.id).await.unwrap().is_empty());
        assert!(store.get_task(&t.id).await.is_err());
    }

    /// Run every contract check against a store factory.
    pub async fn run_all<F, Fut>(make: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Box<dyn Store>>,
    {
        user_defaults_and_uniqueness(make().await.as_ref()).await;
        user_partial_update(make().await.as_ref()).await;
        objective_queries(make().await.as_ref()).await;
        objective_cascade(make().await.as_ref()).await;
        key_result_defaults_and_confidence(make().await.as_ref()).await;
        soft_delete(make().await.as_ref()).await;
        task_views_and_completion(make().await.as_ref()).await;
        task_cascade(make().await.as_ref()).await;
        magic_link_lifecycle(make().await.as_ref()).await;
        magic_link_claimed_once(make().await.as_ref()).await;
        digest_claims(make().await.as_ref()).await;
        user_cascade(make().await.as_ref()).await;
    }
}
