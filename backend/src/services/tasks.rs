//! Tasks service
//!
//! Task views, subtasks and assignment resolution. Tasks may be assigned
//! to an objective, a health metric or a heartbeat work item owned by the
//! same user.

use crate::database::{
    AssignmentDetails, AssignmentType, NewTask, Task, TaskPatch, TaskView, TaskWithDetails,
};
use crate::error::{AppError, Result};
use crate::storage::Store;
use chrono::NaiveDate;
use std::sync::Arc;

/// Service for managing tasks
#[derive(Clone)]
pub struct TasksService {
    store: Arc<dyn Store>,
}

impl TasksService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Top-level tasks in `view`, each with its subtasks and assignment
    pub async fn list(
        &self,
        user_id: &str,
        view: TaskView,
        today: NaiveDate,
    ) -> Result<Vec<TaskWithDetails>> {
        let tasks = self.store.list_tasks(user_id, view, today).await?;

        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            out.push(self.with_details(task).await?);
        }
        Ok(out)
    }

    pub async fn create(&self, user_id: &str, new: &NewTask) -> Result<TaskWithDetails> {
        tracing::info!("Creating task for user {}: {}", user_id, new.title);

        if let Some(parent_id) = &new.parent_task_id {
            self.owned_task(user_id, parent_id).await?;
        }
        if let (Some(kind), Some(id)) = (new.assignment_type, &new.assignment_id) {
            self.check_assignment(user_id, kind, id).await?;
        }

        let task = self.store.create_task(user_id, new).await?;

        tracing::info!("Task created successfully: {}", task.id);
        self.with_details(task).await
    }

    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<TaskWithDetails> {
        tracing::debug!("Updating task: {}", id);

        let current = self.owned_task(user_id, id).await?;

        // An untouched assignment stays as is, even if its target is gone
        if patch.assignment_type.is_none() && patch.assignment_id.is_none() {
            let task = self.store.update_task(id, patch).await?;
            return self.with_details(task).await;
        }

        let kind = patch.assignment_type.unwrap_or(current.assignment_type);
        let assignment_id = patch
            .assignment_id
            .clone()
            .unwrap_or_else(|| current.assignment_id.clone());
        match (kind, assignment_id) {
            (Some(kind), Some(assignment_id)) => {
                self.check_assignment(user_id, kind, &assignment_id).await?
            }
            (None, None) => {}
            _ => {
                return Err(AppError::Validation(
                    "assignment_type and assignment_id must be set together".to_string(),
                ))
            }
        }

        let task = self.store.update_task(id, patch).await?;
        self.with_details(task).await
    }

    /// Delete a task and its subtasks
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        tracing::info!("Deleting task: {}", id);

        self.owned_task(user_id, id).await?;
        self.store.delete_task(id).await?;

        tracing::info!("Task deleted successfully: {}", id);
        Ok(())
    }

    async fn owned_task(&self, user_id: &str, id: &str) -> Result<Task> {
        let task = self.store.get_task(id).await?;
        if task.user_id != user_id {
            return Err(AppError::not_found("Task", id));
        }
        Ok(task)
    }

    /// Fail unless the assignment target exists and belongs to `user_id`
    async fn check_assignment(&self, user_id: &str, kind: AssignmentType, id: &str) -> Result<()> {
        match self.resolve_assignment(kind, id).await? {
            Some((owner, _)) if owner == user_id => Ok(()),
            _ => Err(AppError::not_found(assignment_entity(kind), id)),
        }
    }

    /// Owner and display details of an assignment target, if it still exists
    async fn resolve_assignment(
        &self,
        kind: AssignmentType,
        id: &str,
    ) -> Result<Option<(String, AssignmentDetails)>> {
        let resolved = match kind {
            AssignmentType::Objective => self
                .store
                .get_objective(id)
                .await
                .map(|o| (o.user_id, o.id, o.title, true)),
            AssignmentType::HealthMetric => self
                .store
                .get_health_metric(id)
                .await
                .map(|m| (m.user_id, m.id, m.name, m.active)),
            AssignmentType::HeartbeatWork => self
                .store
                .get_heartbeat_work(id)
                .await
                .map(|w| (w.user_id, w.id, w.name, w.active)),
        };

        match resolved {
            Ok((owner, id, title, true)) => Ok(Some((owner, AssignmentDetails { id, title }))),
            Ok(_) | Err(AppError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn with_details(&self, task: Task) -> Result<TaskWithDetails> {
        let subtasks = self.store.list_subtasks(&task.id).await?;

        let assignment_details = match (task.assignment_type, &task.assignment_id) {
            (Some(kind), Some(id)) => self
                .resolve_assignment(kind, id)
                .await?
                .map(|(_, details)| details),
            _ => None,
        };

        Ok(TaskWithDetails {
            task,
            subtasks,
            assignment_details,
        })
    }
}

fn assignment_entity(kind: AssignmentType) -> &'static str {
    match kind {
        AssignmentType::Objective => "Objective",
        AssignmentType::HealthMetric => "Health metric",
        AssignmentType::HeartbeatWork => "Heartbeat work",
    }
}
