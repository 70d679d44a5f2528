//! Health metrics and heartbeat work service
//!
//! Both are user-owned labels that tasks can be assigned to. Deletes are
//! soft so historical task assignments keep resolving by id.

use crate::database::{
    HealthMetric, HealthMetricPatch, HeartbeatWork, HeartbeatWorkPatch, NewHealthMetric,
    NewHeartbeatWork,
};
use crate::error::{AppError, Result};
use crate::storage::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn Store>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    // ===== Health metrics =====

    pub async fn list_health_metrics(&self, user_id: &str) -> Result<Vec<HealthMetric>> {
        self.store.list_health_metrics(user_id).await
    }

    pub async fn create_health_metric(
        &self,
        user_id: &str,
        new: &NewHealthMetric,
    ) -> Result<HealthMetric> {
        tracing::info!("Creating health metric for user {}: {}", user_id, new.name);
        self.store.create_health_metric(user_id, new).await
    }

    pub async fn update_health_metric(
        &self,
        user_id: &str,
        id: &str,
        patch: &HealthMetricPatch,
    ) -> Result<HealthMetric> {
        self.owned_health_metric(user_id, id).await?;
        self.store.update_health_metric(id, patch).await
    }

    pub async fn delete_health_metric(&self, user_id: &str, id: &str) -> Result<()> {
        tracing::info!("Deleting health metric: {}", id);
        self.owned_health_metric(user_id, id).await?;
        self.store.delete_health_metric(id).await
    }

    async fn owned_health_metric(&self, user_id: &str, id: &str) -> Result<HealthMetric> {
        let metric = self.store.get_health_metric(id).await?;
        if metric.user_id != user_id || !metric.active {
            return Err(AppError::not_found("Health metric", id));
        }
        Ok(metric)
    }

    // ===== Heartbeat work =====

    pub async fn list_heartbeat_work(&self, user_id: &str) -> Result<Vec<HeartbeatWork>> {
        self.store.list_heartbeat_work(user_id).await
    }

    pub async fn create_heartbeat_work(
        &self,
        user_id: &str,
        new: &NewHeartbeatWork,
    ) -> Result<HeartbeatWork> {
        tracing::info!("Creating heartbeat work for user {}: {}", user_id, new.name);
        self.store.create_heartbeat_work(user_id, new).await
    }

    pub async fn update_heartbeat_work(
        &self,
        user_id: &str,
        id: &str,
        patch: &HeartbeatWorkPatch,
    ) -> Result<HeartbeatWork> {
        self.owned_heartbeat_work(user_id, id).await?;
        self.store.update_heartbeat_work(id, patch).await
    }

    pub async fn delete_heartbeat_work(&self, user_id: &str, id: &str) -> Result<()> {
        tracing::info!("Deleting heartbeat work: {}", id);
        self.owned_heartbeat_work(user_id, id).await?;
        self.store.delete_heartbeat_work(id).await
    }

    async fn owned_heartbeat_work(&self, user_id: &str, id: &str) -> Result<HeartbeatWork> {
        let work = self.store.get_heartbeat_work(id).await?;
        if work.user_id != user_id || !work.active {
            return Err(AppError::not_found("Heartbeat work", id));
        }
        Ok(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, MetricStatus, Repository};

    async fn setup() -> (MetricsService, String, String) {
        let pool = create_memory_pool().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(Repository::new(pool));
        let ada = store.create_user("u1", "ada@example.com").await.unwrap();
        let grace = store.create_user("u2", "grace@example.com").await.unwrap();
        (MetricsService::new(store), ada.id, grace.id)
    }

    #[tokio::test]
    async fn test_health_metric_lifecycle() {
        let (service, ada, grace) = setup().await;

        let metric = service
            .create_health_metric(
                &ada,
                &NewHealthMetric {
                    name: "Sleep".to_string(),
                    description: None,
                    status: None,
                    notes: None,
                },
            )
            .await
            .unwrap();

        let patch = HealthMetricPatch {
            status: Some(MetricStatus::Yellow),
            ..Default::default()
        };
        assert!(matches!(
            service.update_health_metric(&grace, &metric.id, &patch).await,
            Err(AppError::NotFound { .. })
        ));
        let updated = service
            .update_health_metric(&ada, &metric.id, &patch)
            .await
            .unwrap();
        assert_eq!(updated.status, MetricStatus::Yellow);

        service.delete_health_metric(&ada, &metric.id).await.unwrap();
        assert!(service.list_health_metrics(&ada).await.unwrap().is_empty());

        // Already soft-deleted
        assert!(matches!(
            service.delete_health_metric(&ada, &metric.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_work_lifecycle() {
        let (service, ada, grace) = setup().await;

        let work = service
            .create_heartbeat_work(
                &ada,
                &NewHeartbeatWork {
                    name: "Inbox zero".to_string(),
                    description: None,
                    category: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(service.list_heartbeat_work(&ada).await.unwrap().len(), 1);
        assert!(service.list_heartbeat_work(&grace).await.unwrap().is_empty());

        let patch: HeartbeatWorkPatch =
            serde_json::from_str(r#"{"category": "admin"}"#).unwrap();
        let updated = service
            .update_heartbeat_work(&ada, &work.id, &patch)
            .await
            .unwrap();
        assert_eq!(updated.category.as_deref(), Some("admin"));
        assert_eq!(updated.name, "Inbox zero");

        assert!(service.delete_heartbeat_work(&grace, &work.id).await.is_err());
        service.delete_heartbeat_work(&ada, &work.id).await.unwrap();
        assert!(service.list_heartbeat_work(&ada).await.unwrap().is_empty());
    }
}
