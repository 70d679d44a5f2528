//! Repository layer for database operations
//!
//! SQLite implementation of the `Store` contract. Partial updates are built
//! with `QueryBuilder` so only the slots present in a patch are written.

use super::models::*;
use crate::config::{DEFAULT_EMAIL_TIME, DEFAULT_TIMEZONE};
use crate::error::{map_missing_reference, map_unique_violation, AppError, Result};
use crate::storage::Store;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for Repository {
    // ===== Users =====

    async fn create_user(&self, id: &str, email: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, timezone, email_time, email_enabled, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(DEFAULT_TIMEZONE)
        .bind(DEFAULT_EMAIL_TIME)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &format!("email {}", email)))?;

        tracing::debug!("Created user: {}", id);
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("User", id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<User> {
        patch.validate()?;
        let current = self.get_user(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(timezone) = &patch.timezone {
                set.push("timezone = ").push_bind_unseparated(timezone.clone());
            }
            if let Some(email_time) = &patch.email_time {
                set.push("email_time = ").push_bind_unseparated(email_time.clone());
            }
            if let Some(enabled) = patch.email_enabled {
                set.push("email_enabled = ").push_bind_unseparated(enabled);
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated user settings: {}", id);
        self.get_user(id).await
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        // Owned rows go with the user through ON DELETE CASCADE
        let rows = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("User", id));
        }

        tracing::debug!("Deleted user: {}", id);
        Ok(())
    }

    async fn list_notifiable_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email_enabled = 1 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn claim_digest_delivery(&self, user_id: &str, local_date: NaiveDate) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            INSERT OR IGNORE INTO digest_deliveries (user_id, local_date, sent_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(local_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }

    // ===== Objectives =====

    async fn create_objective(&self, user_id: &str, new: &NewObjective) -> Result<Objective> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();

        let objective = sqlx::query_as::<_, Objective>(
            r#"
            INSERT INTO objectives (id, user_id, title, description, quarter, year, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.quarter)
        .bind(new.year)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_missing_reference(e, "User", user_id))?;

        tracing::debug!("Created objective: {} for user: {}", id, user_id);
        Ok(objective)
    }

    async fn get_objective(&self, id: &str) -> Result<Objective> {
        sqlx::query_as::<_, Objective>("SELECT * FROM objectives WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Objective", id))
    }

    async fn list_objectives(&self, user_id: &str) -> Result<Vec<Objective>> {
        let objectives = sqlx::query_as::<_, Objective>(
            r#"
            SELECT * FROM objectives
            WHERE user_id = ?
            ORDER BY year DESC, quarter DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(objectives)
    }

    async fn list_current_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>> {
        let objectives = sqlx::query_as::<_, Objective>(
            r#"
            SELECT * FROM objectives
            WHERE user_id = ? AND quarter = ? AND year = ?
              AND (status = 'active' OR status IS NULL)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(quarter)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;

        Ok(objectives)
    }

    async fn list_past_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>> {
        let objectives = sqlx::query_as::<_, Objective>(
            r#"
            SELECT * FROM objectives
            WHERE user_id = ? AND (year < ? OR (year = ? AND quarter < ?))
            ORDER BY year DESC, quarter DESC
            "#,
        )
        .bind(user_id)
        .bind(year)
        .bind(year)
        .bind(quarter)
        .fetch_all(&self.pool)
        .await?;

        Ok(objectives)
    }

    async fn update_objective(&self, id: &str, patch: &ObjectivePatch) -> Result<Objective> {
        patch.validate()?;
        let current = self.get_objective(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE objectives SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = &patch.title {
                set.push("title = ").push_bind_unseparated(title.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(status) = &patch.status {
                set.push("status = ").push_bind_unseparated(status.clone());
            }
            if let Some(quarter) = patch.quarter {
                set.push("quarter = ").push_bind_unseparated(quarter);
            }
            if let Some(year) = patch.year {
                set.push("year = ").push_bind_unseparated(year);
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated objective: {}", id);
        self.get_objective(id).await
    }

    async fn delete_objective(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM key_results WHERE objective_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("DELETE FROM objectives WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            return Err(AppError::not_found("Objective", id));
        }

        tx.commit().await?;

        tracing::debug!("Deleted objective and its key results: {}", id);
        Ok(())
    }

    // ===== Key results =====

    async fn create_key_result(
        &self,
        objective_id: &str,
        new: &NewKeyResult,
    ) -> Result<KeyResult> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();
        let values = new.resolved();

        let key_result = sqlx::query_as::<_, KeyResult>(
            r#"
            INSERT INTO key_results (id, objective_id, description, kind, start_value,
                                     current_value, target_value, confidence_level, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(objective_id)
        .bind(&new.description)
        .bind(values.kind)
        .bind(values.start_value)
        .bind(values.current_value)
        .bind(values.target_value)
        .bind(values.confidence_level)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_missing_reference(e, "Objective", objective_id))?;

        tracing::debug!("Created key result: {} for objective: {}", id, objective_id);
        Ok(key_result)
    }

    async fn get_key_result(&self, id: &str) -> Result<KeyResult> {
        sqlx::query_as::<_, KeyResult>("SELECT * FROM key_results WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Key result", id))
    }

    async fn list_key_results(&self, objective_id: &str) -> Result<Vec<KeyResult>> {
        let key_results = sqlx::query_as::<_, KeyResult>(
            "SELECT * FROM key_results WHERE objective_id = ? ORDER BY created_at ASC",
        )
        .bind(objective_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(key_results)
    }

    async fn update_key_result(&self, id: &str, patch: &KeyResultPatch) -> Result<KeyResult> {
        // Rejected before any write, so an out-of-range confidence leaves the row as it was
        patch.validate()?;
        let current = self.get_key_result(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE key_results SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(kind) = patch.kind {
                set.push("kind = ").push_bind_unseparated(kind);
            }
            if let Some(start) = patch.start_value {
                set.push("start_value = ").push_bind_unseparated(start);
            }
            if let Some(value) = patch.current_value {
                set.push("current_value = ").push_bind_unseparated(value);
            }
            if let Some(target) = patch.target_value {
                set.push("target_value = ").push_bind_unseparated(target);
            }
            if let Some(level) = patch.confidence_level {
                set.push("confidence_level = ").push_bind_unseparated(level);
            }
            if let Some(status) = &patch.status {
                set.push("status = ").push_bind_unseparated(status.clone());
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated key result: {}", id);
        self.get_key_result(id).await
    }

    async fn delete_key_result(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM key_results WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("Key result", id));
        }

        tracing::debug!("Deleted key result: {}", id);
        Ok(())
    }

    // ===== Health metrics =====

    async fn create_health_metric(
        &self,
        user_id: &str,
        new: &NewHealthMetric,
    ) -> Result<HealthMetric> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let metric = sqlx::query_as::<_, HealthMetric>(
            r#"
            INSERT INTO health_metrics (id, user_id, name, description, status, notes, active,
                                        last_updated, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.status.unwrap_or_default())
        .bind(&new.notes)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_missing_reference(e, "User", user_id))?;

        tracing::debug!("Created health metric: {} for user: {}", id, user_id);
        Ok(metric)
    }

    async fn get_health_metric(&self, id: &str) -> Result<HealthMetric> {
        sqlx::query_as::<_, HealthMetric>("SELECT * FROM health_metrics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Health metric", id))
    }

    async fn list_health_metrics(&self, user_id: &str) -> Result<Vec<HealthMetric>> {
        let metrics = sqlx::query_as::<_, HealthMetric>(
            r#"
            SELECT * FROM health_metrics
            WHERE user_id = ? AND active = 1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(metrics)
    }

    async fn update_health_metric(
        &self,
        id: &str,
        patch: &HealthMetricPatch,
    ) -> Result<HealthMetric> {
        patch.validate()?;
        let current = self.get_health_metric(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE health_metrics SET last_updated = ");
        qb.push_bind(Utc::now());
        if let Some(name) = &patch.name {
            qb.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = &patch.description {
            qb.push(", description = ").push_bind(description.clone());
        }
        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status);
        }
        if let Some(notes) = &patch.notes {
            qb.push(", notes = ").push_bind(notes.clone());
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated health metric: {}", id);
        self.get_health_metric(id).await
    }

    async fn delete_health_metric(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("UPDATE health_metrics SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("Health metric", id));
        }

        tracing::debug!("Soft deleted health metric: {}", id);
        Ok(())
    }

    // ===== Heartbeat work =====

    async fn create_heartbeat_work(
        &self,
        user_id: &str,
        new: &NewHeartbeatWork,
    ) -> Result<HeartbeatWork> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();

        let work = sqlx::query_as::<_, HeartbeatWork>(
            r#"
            INSERT INTO heartbeat_work (id, user_id, name, description, category, active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.category)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_missing_reference(e, "User", user_id))?;

        tracing::debug!("Created heartbeat work: {} for user: {}", id, user_id);
        Ok(work)
    }

    async fn get_heartbeat_work(&self, id: &str) -> Result<HeartbeatWork> {
        sqlx::query_as::<_, HeartbeatWork>("SELECT * FROM heartbeat_work WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Heartbeat work", id))
    }

    async fn list_heartbeat_work(&self, user_id: &str) -> Result<Vec<HeartbeatWork>> {
        let work = sqlx::query_as::<_, HeartbeatWork>(
            r#"
            SELECT * FROM heartbeat_work
            WHERE user_id = ? AND active = 1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(work)
    }

    async fn update_heartbeat_work(
        &self,
        id: &str,
        patch: &HeartbeatWorkPatch,
    ) -> Result<HeartbeatWork> {
        patch.validate()?;
        let current = self.get_heartbeat_work(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE heartbeat_work SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(name) = &patch.name {
                set.push("name = ").push_bind_unseparated(name.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(category) = &patch.category {
                set.push("category = ").push_bind_unseparated(category.clone());
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated heartbeat work: {}", id);
        self.get_heartbeat_work(id).await
    }

    async fn delete_heartbeat_work(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("UPDATE heartbeat_work SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("Heartbeat work", id));
        }

        tracing::debug!("Soft deleted heartbeat work: {}", id);
        Ok(())
    }

    // ===== Tasks =====

    async fn create_task(&self, user_id: &str, new: &NewTask) -> Result<Task> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (id, user_id, title, description, deadline, status, assignment_type,
                               assignment_id, parent_task_id, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.deadline)
        .bind(new.status.unwrap_or_default())
        .bind(new.assignment_type)
        .bind(&new.assignment_id)
        .bind(&new.parent_task_id)
        .bind(now)
        .bind(new.completion_at(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &new.parent_task_id {
            Some(parent_id) => map_missing_reference(e, "Task", parent_id),
            None => map_missing_reference(e, "User", user_id),
        })?;

        tracing::debug!("Created task: {} for user: {}", id, user_id);
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Task", id))
    }

    async fn list_tasks(
        &self,
        user_id: &str,
        view: TaskView,
        today: NaiveDate,
    ) -> Result<Vec<Task>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM tasks WHERE parent_task_id IS NULL AND user_id = ",
        );
        qb.push_bind(user_id);

        match view {
            TaskView::Today => {
                qb.push(" AND status != 'done' AND (deadline IS NULL OR date(deadline) = ")
                    .push_bind(today)
                    .push(") ORDER BY created_at ASC");
            }
            TaskView::Upcoming => {
                qb.push(" AND status != 'done' AND deadline IS NOT NULL AND date(deadline) > ")
                    .push_bind(today)
                    .push(" ORDER BY deadline ASC, created_at ASC");
            }
            TaskView::Completed => {
                qb.push(" AND status = 'done' ORDER BY julianday(COALESCE(completed_at, created_at)) DESC");
            }
            TaskView::All => {
                qb.push(" AND status != 'done' ORDER BY created_at ASC");
            }
        }

        let tasks = qb.build_query_as::<Task>().fetch_all(&self.pool).await?;
        Ok(tasks)
    }

    async fn list_subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE parent_task_id = ? ORDER BY created_at ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        let current = self.get_task(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE tasks SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = &patch.title {
                set.push("title = ").push_bind_unseparated(title.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(deadline) = patch.deadline {
                set.push("deadline = ").push_bind_unseparated(deadline);
            }
            if let Some(status) = patch.status {
                set.push("status = ").push_bind_unseparated(status);
            }
            if let Some(assignment_type) = patch.assignment_type {
                set.push("assignment_type = ")
                    .push_bind_unseparated(assignment_type);
            }
            if let Some(assignment_id) = &patch.assignment_id {
                set.push("assignment_id = ")
                    .push_bind_unseparated(assignment_id.clone());
            }
            if let Some(completed_at) = patch.completion_change(&current, Utc::now()) {
                set.push("completed_at = ").push_bind_unseparated(completed_at);
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        tracing::debug!("Updated task: {}", id);
        self.get_task(id).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tasks WHERE parent_task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            return Err(AppError::not_found("Task", id));
        }

        tx.commit().await?;

        tracing::debug!("Deleted task and its subtasks: {}", id);
        Ok(())
    }

    // ===== Magic links =====

    async fn create_magic_link(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<MagicLink> {
        let id = Uuid::new_v4().to_string();

        let link = sqlx::query_as::<_, MagicLink>(
            r#"
            INSERT INTO magic_links (id, user_id, token, expires_at, created_at, used_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "magic link token"))?;

        tracing::debug!("Created magic link: {} for user: {}", id, user_id);
        Ok(link)
    }

    async fn find_valid_magic_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MagicLink>> {
        let link = sqlx::query_as::<_, MagicLink>("SELECT * FROM magic_links WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(link.filter(|l| l.is_valid_at(now)))
    }

    async fn claim_magic_link(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE magic_links SET used_at = ?
            WHERE token = ? AND used_at IS NULL AND julianday(expires_at) > julianday(?)
            "#,
        )
        .bind(now)
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        tracing::debug!("Magic link claim: {}", rows == 1);
        Ok(rows == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;
    use crate::storage::contract;

    async fn create_test_repo() -> Repository {
        Repository::new(create_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_store_contract() {
        contract::run_all(|| async { Box::new(create_test_repo().await) as Box<dyn Store> })
            .await;
    }

    #[tokio::test]
    async fn test_active_flag_is_boolean() {
        let repo = create_test_repo().await;
        let user = contract::seed_user(&repo).await;

        let metric = repo
            .create_health_metric(
                &user.id,
                &NewHealthMetric {
                    name: "Energy".to_string(),
                    description: None,
                    status: Some(MetricStatus::Yellow),
                    notes: None,
                },
            )
            .await
            .unwrap();

        let stored: i64 = sqlx::query_scalar("SELECT active FROM health_metrics WHERE id = ?")
            .bind(&metric.id)
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["active"], serde_json::json!(true));
        assert_eq!(json["status"], serde_json::json!("yellow"));
    }

    #[tokio::test]
    async fn test_health_metric_update_touches_last_updated() {
        let repo = create_test_repo().await;
        let user = contract::seed_user(&repo).await;

        let metric = repo
            .create_health_metric(
                &user.id,
                &NewHealthMetric {
                    name: "Sleep".to_string(),
                    description: Some("hours per night".to_string()),
                    status: None,
                    notes: None,
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let patch = HealthMetricPatch {
            status: Some(MetricStatus::Red),
            notes: Some(Some("new baby".to_string())),
            ..Default::default()
        };
        let updated = repo.update_health_metric(&metric.id, &patch).await.unwrap();

        assert_eq!(updated.status, MetricStatus::Red);
        assert_eq!(updated.notes.as_deref(), Some("new baby"));
        assert_eq!(updated.description, metric.description);
        assert!(updated.last_updated > metric.last_updated);
    }

    #[tokio::test]
    async fn test_explicit_null_clears_column() {
        let repo = create_test_repo().await;
        let user = contract::seed_user(&repo).await;

        let objective = repo
            .create_objective(
                &user.id,
                &NewObjective {
                    title: "Get fit".to_string(),
                    description: Some("Run a marathon".to_string()),
                    quarter: 2,
                    year: 2025,
                    key_results: Vec::new(),
                },
            )
            .await
            .unwrap();

        let patch: ObjectivePatch = serde_json::from_str(r#"{"description": null}"#).unwrap();
        let updated = repo.update_objective(&objective.id, &patch).await.unwrap();

        assert!(updated.description.is_none());
        assert_eq!(updated.title, "Get fit");
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let repo = create_test_repo().await;

        assert!(matches!(
            repo.delete_objective("nope").await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            repo.delete_task("nope").await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            repo.update_key_result("nope", &KeyResultPatch::default()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
