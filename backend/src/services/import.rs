//! Legacy data import
//!
//! Loads a flat-file document from the earlier JSON-backed planner into the
//! configured store. Records are created through the store contract, so
//! objectives, key results, metrics and tasks receive new ids; references
//! between them are remapped. User ids are kept. A record that cannot be
//! imported is logged and skipped.

use crate::database::{
    deadline, AssignmentType, HealthMetricPatch, KeyResultKind, MetricStatus, NewHealthMetric,
    NewHeartbeatWork, NewKeyResult, NewObjective, NewTask, ObjectivePatch, TaskStatus, UserPatch,
};
use crate::error::{AppError, Result};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct LegacyDocument {
    #[serde(default)]
    pub users: Vec<LegacyUser>,
    #[serde(default)]
    pub objectives: Vec<LegacyObjective>,
    #[serde(default)]
    pub key_results: Vec<LegacyKeyResult>,
    #[serde(default)]
    pub health_metrics: Vec<LegacyHealthMetric>,
    #[serde(default)]
    pub heartbeat_work: Vec<LegacyHeartbeatWork>,
    #[serde(default)]
    pub tasks: Vec<LegacyTask>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub email_time: Option<String>,
    /// `true`/`false` or `1`/`0`
    #[serde(default)]
    pub email_enabled: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyObjective {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quarter: i64,
    pub year: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyKeyResult {
    pub objective_id: String,
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub start_value: Option<f64>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyHealthMetric {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub active: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyHeartbeatWork {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub active: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyTask {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignment_type: Option<String>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Counts of imported and skipped records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub users: usize,
    pub objectives: usize,
    pub key_results: usize,
    pub health_metrics: usize,
    pub heartbeat_work: usize,
    pub tasks: usize,
    pub skipped: usize,
}

/// Legacy id to new id, per entity
#[derive(Default)]
struct IdMap {
    users: HashMap<String, String>,
    objectives: HashMap<String, String>,
    health_metrics: HashMap<String, String>,
    heartbeat_work: HashMap<String, String>,
    tasks: HashMap<String, String>,
}

/// Map a legacy task status onto the current taxonomy
pub fn normalize_task_status(status: &str) -> Option<TaskStatus> {
    match status.trim().to_lowercase().as_str() {
        "todo" | "not_started" => Some(TaskStatus::NotStarted),
        "in_progress" => Some(TaskStatus::InProgress),
        "done" | "cancelled" => Some(TaskStatus::Done),
        _ => None,
    }
}

fn loose_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_enum<T: for<'de> Deserialize<'de>>(value: &str) -> Option<T> {
    serde_json::from_value(Value::String(value.to_string())).ok()
}

pub struct ImportService {
    store: Arc<dyn Store>,
}

impl ImportService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        tracing::info!("Importing legacy data from {:?}", path);

        let content = tokio::fs::read_to_string(path).await?;
        let document: LegacyDocument = serde_json::from_str(&content)?;

        self.import_document(&document).await
    }

    pub async fn import_document(&self, doc: &LegacyDocument) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut ids = IdMap::default();

        for user in &doc.users {
            match self.import_user(user).await {
                Ok(id) => {
                    ids.users.insert(user.id.clone(), id);
                    report.users += 1;
                }
                Err(e) => skip(&mut report, "user", &user.email, e),
            }
        }

        for objective in &doc.objectives {
            match self.import_objective(&ids, objective).await {
                Ok(id) => {
                    ids.objectives.insert(objective.id.clone(), id);
                    report.objectives += 1;
                }
                Err(e) => skip(&mut report, "objective", &objective.title, e),
            }
        }

        for kr in &doc.key_results {
            match self.import_key_result(&ids, kr).await {
                Ok(()) => report.key_results += 1,
                Err(e) => skip(&mut report, "key result", &kr.description, e),
            }
        }

        for metric in &doc.health_metrics {
            match self.import_health_metric(&ids, metric).await {
                Ok(id) => {
                    ids.health_metrics.insert(metric.id.clone(), id);
                    report.health_metrics += 1;
                }
                Err(e) => skip(&mut report, "health metric", &metric.name, e),
            }
        }

        for work in &doc.heartbeat_work {
            match self.import_heartbeat_work(&ids, work).await {
                Ok(id) => {
                    ids.heartbeat_work.insert(work.id.clone(), id);
                    report.heartbeat_work += 1;
                }
                Err(e) => skip(&mut report, "heartbeat work", &work.name, e),
            }
        }

        // Parents before subtasks so parent ids can be remapped
        let (parents, subtasks): (Vec<&LegacyTask>, Vec<&LegacyTask>) =
            doc.tasks.iter().partition(|t| t.parent_task_id.is_none());
        for task in parents.into_iter().chain(subtasks) {
            match self.import_task(&ids, task).await {
                Ok(id) => {
                    ids.tasks.insert(task.id.clone(), id);
                    report.tasks += 1;
                }
                Err(e) => skip(&mut report, "task", &task.title, e),
            }
        }

        tracing::info!(
            "Import complete: {} users, {} objectives, {} key results, {} health metrics, {} heartbeat work, {} tasks, {} skipped",
            report.users,
            report.objectives,
            report.key_results,
            report.health_metrics,
            report.heartbeat_work,
            report.tasks,
            report.skipped
        );
        Ok(report)
    }

    async fn import_user(&self, legacy: &LegacyUser) -> Result<String> {
        let email = legacy.email.trim().to_lowercase();
        let user = match self.store.create_user(&legacy.id, &email).await {
            Ok(user) => user,
            Err(AppError::DuplicateKey(_)) => {
                let existing = self
                    .store
                    .find_user_by_email(&email)
                    .await?
                    .ok_or_else(|| AppError::not_found("User", &email))?;
                tracing::info!("User {} already exists, merging into {}", email, existing.id);
                return Ok(existing.id);
            }
            Err(e) => return Err(e),
        };

        let patch = UserPatch {
            timezone: legacy.timezone.clone(),
            email_time: legacy.email_time.clone(),
            email_enabled: legacy.email_enabled.as_ref().and_then(loose_bool),
        };
        if let Err(e) = self.store.update_user(&user.id, &patch).await {
            tracing::warn!("Keeping default settings for user {}: {}", user.id, e);
        }

        Ok(user.id)
    }

    async fn import_objective(&self, ids: &IdMap, legacy: &LegacyObjective) -> Result<String> {
        let user_id = lookup(&ids.users, "User", &legacy.user_id)?;
        let new = NewObjective {
            title: legacy.title.clone(),
            description: legacy.description.clone(),
            quarter: legacy.quarter,
            year: legacy.year,
            key_results: Vec::new(),
        };
        let objective = self.store.create_objective(user_id, &new).await?;

        if let Some(status) = legacy.status.as_deref().filter(|s| *s != "active") {
            let patch = ObjectivePatch {
                status: Some(Some(status.to_string())),
                ..Default::default()
            };
            self.store.update_objective(&objective.id, &patch).await?;
        }

        Ok(objective.id)
    }

    async fn import_key_result(&self, ids: &IdMap, legacy: &LegacyKeyResult) -> Result<()> {
        let objective_id = lookup(&ids.objectives, "Objective", &legacy.objective_id)?;
        let new = NewKeyResult {
            description: legacy.description.clone(),
            kind: legacy.kind.as_deref().and_then(parse_enum::<KeyResultKind>),
            start_value: legacy.start_value,
            current_value: legacy.current_value,
            target_value: legacy.target_value,
            confidence_level: legacy.confidence_level,
        };
        let kr = self.store.create_key_result(objective_id, &new).await?;

        if let Some(status) = legacy.status.as_deref().filter(|s| *s != "active") {
            let patch = crate::database::KeyResultPatch {
                status: Some(status.to_string()),
                ..Default::default()
            };
            self.store.update_key_result(&kr.id, &patch).await?;
        }
        Ok(())
    }

    async fn import_health_metric(
        &self,
        ids: &IdMap,
        legacy: &LegacyHealthMetric,
    ) -> Result<String> {
        let user_id = lookup(&ids.users, "User", &legacy.user_id)?;
        let new = NewHealthMetric {
            name: legacy.name.clone(),
            description: legacy.description.clone(),
            status: legacy.status.as_deref().and_then(parse_enum::<MetricStatus>),
            notes: legacy.notes.clone(),
        };
        let metric = self.store.create_health_metric(user_id, &new).await?;

        if legacy.active.as_ref().and_then(loose_bool) == Some(false) {
            self.store.delete_health_metric(&metric.id).await?;
        }
        Ok(metric.id)
    }

    async fn import_heartbeat_work(
        &self,
        ids: &IdMap,
        legacy: &LegacyHeartbeatWork,
    ) -> Result<String> {
        let user_id = lookup(&ids.users, "User", &legacy.user_id)?;
        let new = NewHeartbeatWork {
            name: legacy.name.clone(),
            description: legacy.description.clone(),
            category: legacy.category.clone(),
        };
        let work = self.store.create_heartbeat_work(user_id, &new).await?;

        if legacy.active.as_ref().and_then(loose_bool) == Some(false) {
            self.store.delete_heartbeat_work(&work.id).await?;
        }
        Ok(work.id)
    }

    async fn import_task(&self, ids: &IdMap, legacy: &LegacyTask) -> Result<String> {
        let user_id = lookup(&ids.users, "User", &legacy.user_id)?;

        let parent_task_id = match &legacy.parent_task_id {
            Some(parent) => Some(lookup(&ids.tasks, "Task", parent)?.clone()),
            None => None,
        };

        let status = match legacy.status.as_deref() {
            None => TaskStatus::NotStarted,
            Some(raw) => normalize_task_status(raw).unwrap_or_else(|| {
                tracing::warn!("Unknown status {:?} on task {}, using not_started", raw, legacy.id);
                TaskStatus::NotStarted
            }),
        };

        let assignment_type = legacy
            .assignment_type
            .as_deref()
            .and_then(parse_enum::<AssignmentType>);
        let assignment_id = match (assignment_type, &legacy.assignment_id) {
            (Some(kind), Some(old)) => {
                let map = match kind {
                    AssignmentType::Objective => &ids.objectives,
                    AssignmentType::HealthMetric => &ids.health_metrics,
                    AssignmentType::HeartbeatWork => &ids.heartbeat_work,
                };
                map.get(old).cloned()
            }
            _ => None,
        };
        if legacy.assignment_id.is_some() && assignment_id.is_none() {
            tracing::warn!("Dropping unresolved assignment on task {}", legacy.id);
        }

        let completed_at = legacy
            .completed_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let new = NewTask {
            title: legacy.title.clone(),
            description: legacy.description.clone(),
            deadline: legacy.deadline.as_deref().and_then(deadline::parse),
            status: Some(status),
            assignment_type: assignment_id.as_ref().and(assignment_type),
            assignment_id,
            parent_task_id,
            completed_at,
        };
        let task = self.store.create_task(user_id, &new).await?;
        Ok(task.id)
    }
}

fn lookup<'a>(map: &'a HashMap<String, String>, entity: &'static str, id: &str) -> Result<&'a String> {
    map.get(id).ok_or_else(|| AppError::not_found(entity, id))
}

fn skip(report: &mut ImportReport, kind: &str, label: &str, error: AppError) {
    tracing::error!("Error importing {} {:?}: {}", kind, label, error);
    report.skipped += 1;
}
