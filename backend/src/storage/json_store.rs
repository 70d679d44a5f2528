//! JSON file store
//!
//! Keeps the whole document in memory and rewrites the file after every
//! mutation. Writes go to a temp file that is synced and renamed over the
//! original, so a crash never leaves a half-written document behind.

use super::{sort_objectives_desc, task_matches_view, Store};
use crate::config::{DEFAULT_EMAIL_TIME, DEFAULT_TIMEZONE};
use crate::database::models::*;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DigestDelivery {
    user_id: String,
    local_date: NaiveDate,
    sent_at: DateTime<Utc>,
}

/// On-disk document layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    objectives: Vec<Objective>,
    #[serde(default)]
    key_results: Vec<KeyResult>,
    #[serde(default)]
    health_metrics: Vec<HealthMetric>,
    #[serde(default)]
    heartbeat_work: Vec<HeartbeatWork>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    magic_links: Vec<MagicLink>,
    #[serde(default)]
    digest_deliveries: Vec<DigestDelivery>,
}

pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty document if none exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let doc = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let doc: Document = serde_json::from_str(&content)?;
            tracing::info!(
                "Loaded JSON store from {:?} ({} users, {} objectives, {} tasks)",
                path,
                doc.users.len(),
                doc.objectives.len(),
                doc.tasks.len()
            );
            doc
        } else {
            let doc = Document::default();
            write_document(&path, &doc).await?;
            tracing::info!("Created empty JSON store at {:?}", path);
            doc
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T>(&self, f: impl FnOnce(&Document) -> Result<T>) -> Result<T> {
        let doc = self.doc.lock().await;
        f(&doc)
    }

    /// Apply `f` to a copy of the document and persist it.
    ///
    /// The in-memory document only changes once the file write succeeded.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let out = f(&mut next)?;
        write_document(&self.path, &next).await?;
        *doc = next;
        Ok(out)
    }
}

async fn write_document(path: &Path, doc: &Document) -> Result<()> {
    let content = serde_json::to_string_pretty(doc)?;

    // Write to temp file first (atomic write)
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    tracing::debug!("JSON store written to {:?}", path);
    Ok(())
}

fn find<'a, T>(
    items: &'a [T],
    entity: &'static str,
    id: &str,
    key: impl Fn(&T) -> &str,
) -> Result<&'a T> {
    items
        .iter()
        .find(|item| key(item) == id)
        .ok_or_else(|| AppError::not_found(entity, id))
}

fn find_mut<'a, T>(
    items: &'a mut [T],
    entity: &'static str,
    id: &str,
    key: impl Fn(&T) -> &str,
) -> Result<&'a mut T> {
    items
        .iter_mut()
        .find(|item| key(item) == id)
        .ok_or_else(|| AppError::not_found(entity, id))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl Store for JsonFileStore {
    // ===== Users =====

    async fn create_user(&self, id: &str, email: &str) -> Result<User> {
        let user = self
            .mutate(|doc| {
                if doc.users.iter().any(|u| u.email == email) {
                    return Err(AppError::DuplicateKey(format!("email {}", email)));
                }
                if doc.users.iter().any(|u| u.id == id) {
                    return Err(AppError::DuplicateKey(format!("user {}", id)));
                }
                let user = User {
                    id: id.to_string(),
                    email: email.to_string(),
                    timezone: DEFAULT_TIMEZONE.to_string(),
                    email_time: DEFAULT_EMAIL_TIME.to_string(),
                    email_enabled: true,
                    created_at: Utc::now(),
                };
                doc.users.push(user.clone());
                Ok(user)
            })
            .await?;

        tracing::debug!("Created user: {}", id);
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        self.read(|doc| find(&doc.users, "User", id, |u| u.id.as_str()).cloned())
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.read(|doc| Ok(doc.users.iter().find(|u| u.email == email).cloned()))
            .await
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<User> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_user(id).await;
        }

        self.mutate(|doc| {
            let user = find_mut(&mut doc.users, "User", id, |u| u.id.as_str())?;
            if let Some(timezone) = &patch.timezone {
                user.timezone = timezone.clone();
            }
            if let Some(email_time) = &patch.email_time {
                user.email_time = email_time.clone();
            }
            if let Some(enabled) = patch.email_enabled {
                user.email_enabled = enabled;
            }
            Ok(user.clone())
        })
        .await
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            find(&doc.users, "User", id, |u| u.id.as_str())?;

            let objective_ids: Vec<String> = doc
                .objectives
                .iter()
                .filter(|o| o.user_id == id)
                .map(|o| o.id.clone())
                .collect();

            doc.users.retain(|u| u.id != id);
            doc.objectives.retain(|o| o.user_id != id);
            doc.key_results
                .retain(|kr| !objective_ids.contains(&kr.objective_id));
            doc.health_metrics.retain(|m| m.user_id != id);
            doc.heartbeat_work.retain(|w| w.user_id != id);
            doc.tasks.retain(|t| t.user_id != id);
            doc.magic_links.retain(|l| l.user_id != id);
            doc.digest_deliveries.retain(|d| d.user_id != id);
            Ok(())
        })
        .await?;

        tracing::debug!("Deleted user: {}", id);
        Ok(())
    }

    async fn list_notifiable_users(&self) -> Result<Vec<User>> {
        self.read(|doc| Ok(doc.users.iter().filter(|u| u.email_enabled).cloned().collect()))
            .await
    }

    async fn claim_digest_delivery(&self, user_id: &str, local_date: NaiveDate) -> Result<bool> {
        let claimed = self
            .read(|doc| {
                Ok(doc
                    .digest_deliveries
                    .iter()
                    .any(|d| d.user_id == user_id && d.local_date == local_date))
            })
            .await?;
        if claimed {
            return Ok(false);
        }

        self.mutate(|doc| {
            // Re-checked under the same lock that performs the insert
            if doc
                .digest_deliveries
                .iter()
                .any(|d| d.user_id == user_id && d.local_date == local_date)
            {
                return Ok(false);
            }
            doc.digest_deliveries.push(DigestDelivery {
                user_id: user_id.to_string(),
                local_date,
                sent_at: Utc::now(),
            });
            Ok(true)
        })
        .await
    }

    // ===== Objectives =====

    async fn create_objective(&self, user_id: &str, new: &NewObjective) -> Result<Objective> {
        new.validate()?;
        let objective = Objective {
            id: new_id(),
            user_id: user_id.to_string(),
            title: new.title.clone(),
            description: new.description.clone(),
            quarter: new.quarter,
            year: new.year,
            status: Some("active".to_string()),
            created_at: Utc::now(),
        };

        self.mutate(|doc| {
            find(&doc.users, "User", user_id, |u| u.id.as_str())?;
            doc.objectives.push(objective.clone());
            Ok(())
        })
        .await?;

        tracing::debug!("Created objective: {} for user: {}", objective.id, user_id);
        Ok(objective)
    }

    async fn get_objective(&self, id: &str) -> Result<Objective> {
        self.read(|doc| find(&doc.objectives, "Objective", id, |o| o.id.as_str()).cloned())
            .await
    }

    async fn list_objectives(&self, user_id: &str) -> Result<Vec<Objective>> {
        let mut objectives = self
            .read(|doc| {
                Ok(doc
                    .objectives
                    .iter()
                    .filter(|o| o.user_id == user_id)
                    .cloned()
                    .collect::<Vec<_>>())
            })
            .await?;
        sort_objectives_desc(&mut objectives);
        Ok(objectives)
    }

    async fn list_current_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>> {
        self.read(|doc| {
            Ok(doc
                .objectives
                .iter()
                .filter(|o| o.user_id == user_id && o.quarter == quarter && o.year == year)
                .filter(|o| o.status.as_deref().map_or(true, |s| s == "active"))
                .cloned()
                .collect())
        })
        .await
    }

    async fn list_past_objectives(
        &self,
        user_id: &str,
        quarter: i64,
        year: i64,
    ) -> Result<Vec<Objective>> {
        let mut objectives = self
            .read(|doc| {
                Ok(doc
                    .objectives
                    .iter()
                    .filter(|o| o.user_id == user_id && (o.year, o.quarter) < (year, quarter))
                    .cloned()
                    .collect::<Vec<_>>())
            })
            .await?;
        sort_objectives_desc(&mut objectives);
        Ok(objectives)
    }

    async fn update_objective(&self, id: &str, patch: &ObjectivePatch) -> Result<Objective> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_objective(id).await;
        }

        self.mutate(|doc| {
            let objective = find_mut(&mut doc.objectives, "Objective", id, |o| o.id.as_str())?;
            if let Some(title) = &patch.title {
                objective.title = title.clone();
            }
            if let Some(description) = &patch.description {
                objective.description = description.clone();
            }
            if let Some(status) = &patch.status {
                objective.status = status.clone();
            }
            if let Some(quarter) = patch.quarter {
                objective.quarter = quarter;
            }
            if let Some(year) = patch.year {
                objective.year = year;
            }
            Ok(objective.clone())
        })
        .await
    }

    async fn delete_objective(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            find(&doc.objectives, "Objective", id, |o| o.id.as_str())?;
            doc.key_results.retain(|kr| kr.objective_id != id);
            doc.objectives.retain(|o| o.id != id);
            Ok(())
        })
        .await?;

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
        let values = new.resolved();
        let key_result = KeyResult {
            id: new_id(),
            objective_id: objective_id.to_string(),
            description: new.description.clone(),
            kind: values.kind,
            start_value: values.start_value,
            current_value: values.current_value,
            target_value: values.target_value,
            confidence_level: values.confidence_level,
            status: "active".to_string(),
            created_at: Utc::now(),
        };

        self.mutate(|doc| {
            find(&doc.objectives, "Objective", objective_id, |o| o.id.as_str())?;
            doc.key_results.push(key_result.clone());
            Ok(())
        })
        .await?;

        tracing::debug!(
            "Created key result: {} for objective: {}",
            key_result.id,
            objective_id
        );
        Ok(key_result)
    }

    async fn get_key_result(&self, id: &str) -> Result<KeyResult> {
        self.read(|doc| find(&doc.key_results, "Key result", id, |kr| kr.id.as_str()).cloned())
            .await
    }

    async fn list_key_results(&self, objective_id: &str) -> Result<Vec<KeyResult>> {
        self.read(|doc| {
            Ok(doc
                .key_results
                .iter()
                .filter(|kr| kr.objective_id == objective_id)
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_key_result(&self, id: &str, patch: &KeyResultPatch) -> Result<KeyResult> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_key_result(id).await;
        }

        self.mutate(|doc| {
            let kr = find_mut(&mut doc.key_results, "Key result", id, |kr| kr.id.as_str())?;
            if let Some(description) = &patch.description {
                kr.description = description.clone();
            }
            if let Some(kind) = patch.kind {
                kr.kind = kind;
            }
            if let Some(start) = patch.start_value {
                kr.start_value = start;
            }
            if let Some(value) = patch.current_value {
                kr.current_value = value;
            }
            if let Some(target) = patch.target_value {
                kr.target_value = target;
            }
            if let Some(level) = patch.confidence_level {
                kr.confidence_level = level;
            }
            if let Some(status) = &patch.status {
                kr.status = status.clone();
            }
            Ok(kr.clone())
        })
        .await
    }

    async fn delete_key_result(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            find(&doc.key_results, "Key result", id, |kr| kr.id.as_str())?;
            doc.key_results.retain(|kr| kr.id != id);
            Ok(())
        })
        .await?;

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
        let now = Utc::now();
        let metric = HealthMetric {
            id: new_id(),
            user_id: user_id.to_string(),
            name: new.name.clone(),
            description: new.description.clone(),
            status: new.status.unwrap_or_default(),
            notes: new.notes.clone(),
            active: true,
            last_updated: now,
            created_at: now,
        };

        self.mutate(|doc| {
            find(&doc.users, "User", user_id, |u| u.id.as_str())?;
            doc.health_metrics.push(metric.clone());
            Ok(())
        })
        .await?;

        tracing::debug!("Created health metric: {} for user: {}", metric.id, user_id);
        Ok(metric)
    }

    async fn get_health_metric(&self, id: &str) -> Result<HealthMetric> {
        self.read(|doc| find(&doc.health_metrics, "Health metric", id, |m| m.id.as_str()).cloned())
            .await
    }

    async fn list_health_metrics(&self, user_id: &str) -> Result<Vec<HealthMetric>> {
        self.read(|doc| {
            Ok(doc
                .health_metrics
                .iter()
                .filter(|m| m.user_id == user_id && m.active)
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_health_metric(
        &self,
        id: &str,
        patch: &HealthMetricPatch,
    ) -> Result<HealthMetric> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_health_metric(id).await;
        }

        self.mutate(|doc| {
            let metric = find_mut(&mut doc.health_metrics, "Health metric", id, |m| m.id.as_str())?;
            if let Some(name) = &patch.name {
                metric.name = name.clone();
            }
            if let Some(description) = &patch.description {
                metric.description = description.clone();
            }
            if let Some(status) = patch.status {
                metric.status = status;
            }
            if let Some(notes) = &patch.notes {
                metric.notes = notes.clone();
            }
            metric.last_updated = Utc::now();
            Ok(metric.clone())
        })
        .await
    }

    async fn delete_health_metric(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            let metric = find_mut(&mut doc.health_metrics, "Health metric", id, |m| m.id.as_str())?;
            metric.active = false;
            Ok(())
        })
        .await?;

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
        let work = HeartbeatWork {
            id: new_id(),
            user_id: user_id.to_string(),
            name: new.name.clone(),
            description: new.description.clone(),
            category: new.category.clone(),
            active: true,
            created_at: Utc::now(),
        };

        self.mutate(|doc| {
            find(&doc.users, "User", user_id, |u| u.id.as_str())?;
            doc.heartbeat_work.push(work.clone());
            Ok(())
        })
        .await?;

        tracing::debug!("Created heartbeat work: {} for user: {}", work.id, user_id);
        Ok(work)
    }

    async fn get_heartbeat_work(&self, id: &str) -> Result<HeartbeatWork> {
        self.read(|doc| find(&doc.heartbeat_work, "Heartbeat work", id, |w| w.id.as_str()).cloned())
            .await
    }

    async fn list_heartbeat_work(&self, user_id: &str) -> Result<Vec<HeartbeatWork>> {
        self.read(|doc| {
            Ok(doc
                .heartbeat_work
                .iter()
                .filter(|w| w.user_id == user_id && w.active)
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_heartbeat_work(
        &self,
        id: &str,
        patch: &HeartbeatWorkPatch,
    ) -> Result<HeartbeatWork> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_heartbeat_work(id).await;
        }

        self.mutate(|doc| {
            let work = find_mut(&mut doc.heartbeat_work, "Heartbeat work", id, |w| w.id.as_str())?;
            if let Some(name) = &patch.name {
                work.name = name.clone();
            }
            if let Some(description) = &patch.description {
                work.description = description.clone();
            }
            if let Some(category) = &patch.category {
                work.category = category.clone();
            }
            Ok(work.clone())
        })
        .await
    }

    async fn delete_heartbeat_work(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            let work = find_mut(&mut doc.heartbeat_work, "Heartbeat work", id, |w| w.id.as_str())?;
            work.active = false;
            Ok(())
        })
        .await?;

        tracing::debug!("Soft deleted heartbeat work: {}", id);
        Ok(())
    }

    // ===== Tasks =====

    async fn create_task(&self, user_id: &str, new: &NewTask) -> Result<Task> {
        new.validate()?;
        let now = Utc::now();
        let task = Task {
            id: new_id(),
            user_id: user_id.to_string(),
            title: new.title.clone(),
            description: new.description.clone(),
            deadline: new.deadline,
            status: new.status.unwrap_or_default(),
            assignment_type: new.assignment_type,
            assignment_id: new.assignment_id.clone(),
            parent_task_id: new.parent_task_id.clone(),
            created_at: now,
            completed_at: new.completion_at(now),
        };

        self.mutate(|doc| {
            find(&doc.users, "User", user_id, |u| u.id.as_str())?;
            if let Some(parent_id) = &task.parent_task_id {
                find(&doc.tasks, "Task", parent_id, |t| t.id.as_str())?;
            }
            doc.tasks.push(task.clone());
            Ok(())
        })
        .await?;

        tracing::debug!("Created task: {} for user: {}", task.id, user_id);
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.read(|doc| find(&doc.tasks, "Task", id, |t| t.id.as_str()).cloned())
            .await
    }

    async fn list_tasks(
        &self,
        user_id: &str,
        view: TaskView,
        today: NaiveDate,
    ) -> Result<Vec<Task>> {
        let mut tasks = self
            .read(|doc| {
                Ok(doc
                    .tasks
                    .iter()
                    .filter(|t| t.user_id == user_id && t.parent_task_id.is_none())
                    .filter(|t| task_matches_view(t, view, today))
                    .cloned()
                    .collect::<Vec<_>>())
            })
            .await?;

        match view {
            TaskView::Today | TaskView::All => tasks.sort_by_key(|t| t.created_at),
            TaskView::Upcoming => tasks.sort_by_key(|t| (t.deadline, t.created_at)),
            TaskView::Completed => {
                tasks.sort_by_key(|t| std::cmp::Reverse(t.completed_at.unwrap_or(t.created_at)))
            }
        }
        Ok(tasks)
    }

    async fn list_subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        self.read(|doc| {
            Ok(doc
                .tasks
                .iter()
                .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get_task(id).await;
        }

        self.mutate(|doc| {
            let task = find_mut(&mut doc.tasks, "Task", id, |t| t.id.as_str())?;
            let completion = patch.completion_change(task, Utc::now());

            if let Some(title) = &patch.title {
                task.title = title.clone();
            }
            if let Some(description) = &patch.description {
                task.description = description.clone();
            }
            if let Some(deadline) = patch.deadline {
                task.deadline = deadline;
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            if let Some(assignment_type) = patch.assignment_type {
                task.assignment_type = assignment_type;
            }
            if let Some(assignment_id) = &patch.assignment_id {
                task.assignment_id = assignment_id.clone();
            }
            if let Some(completed_at) = completion {
                task.completed_at = completed_at;
            }
            Ok(task.clone())
        })
        .await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            find(&doc.tasks, "Task", id, |t| t.id.as_str())?;

            // Whole subtree, matching the SQLite cascade
            let mut doomed = vec![id.to_string()];
            let mut next = 0;
            while next < doomed.len() {
                let parent = doomed[next].clone();
                doomed.extend(
                    doc.tasks
                        .iter()
                        .filter(|t| t.parent_task_id.as_deref() == Some(parent.as_str()))
                        .map(|t| t.id.clone()),
                );
                next += 1;
            }
            doc.tasks.retain(|t| !doomed.contains(&t.id));
            Ok(())
        })
        .await?;

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
        let link = MagicLink {
            id: new_id(),
            user_id: user_id.to_string(),
            token: token.to_string(),
            expires_at,
            created_at: Utc::now(),
            used_at: None,
        };

        self.mutate(|doc| {
            if doc.magic_links.iter().any(|l| l.token == token) {
                return Err(AppError::DuplicateKey("magic link token".to_string()));
            }
            doc.magic_links.push(link.clone());
            Ok(())
        })
        .await?;

        tracing::debug!("Created magic link: {} for user: {}", link.id, user_id);
        Ok(link)
    }

    async fn find_valid_magic_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MagicLink>> {
        self.read(|doc| {
            Ok(doc
                .magic_links
                .iter()
                .find(|l| l.token == token && l.is_valid_at(now))
                .cloned())
        })
        .await
    }

    async fn claim_magic_link(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let claimed = self
            .mutate(|doc| {
                match doc
                    .magic_links
                    .iter_mut()
                    .find(|l| l.token == token && l.is_valid_at(now))
                {
                    Some(link) => {
                        link.used_at = Some(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .await?;

        tracing::debug!("Magic link claim: {}", claimed);
        Ok(claimed)
    }
}
