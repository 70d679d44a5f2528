//! Objectives service
//!
//! Objectives with their key results, quarter-relative listings and
//! key result set reconciliation on update.

use crate::database::{
    KeyResult, KeyResultPatch, NewObjective, Objective, ObjectiveUpdate, ObjectiveWithKeyResults,
};
use crate::error::{AppError, Result};
use crate::storage::Store;
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

/// Quarter (1-4) and year containing `date`
pub fn quarter_of(date: NaiveDate) -> (i64, i64) {
    (date.month0() as i64 / 3 + 1, date.year() as i64)
}

/// Service for managing objectives and key results
#[derive(Clone)]
pub struct ObjectivesService {
    store: Arc<dyn Store>,
}

impl ObjectivesService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// All objectives for the user, newest quarter first
    pub async fn list(&self, user_id: &str) -> Result<Vec<ObjectiveWithKeyResults>> {
        let objectives = self.store.list_objectives(user_id).await?;
        self.with_key_results(objectives).await
    }

    /// Active objectives in the quarter containing `today`
    pub async fn list_current(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<ObjectiveWithKeyResults>> {
        let (quarter, year) = quarter_of(today);
        let objectives = self
            .store
            .list_current_objectives(user_id, quarter, year)
            .await?;
        self.with_key_results(objectives).await
    }

    /// Objectives from quarters before the one containing `today`
    pub async fn list_past(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<ObjectiveWithKeyResults>> {
        let (quarter, year) = quarter_of(today);
        let objectives = self.store.list_past_objectives(user_id, quarter, year).await?;
        self.with_key_results(objectives).await
    }

    /// Create an objective together with its initial key results
    pub async fn create(
        &self,
        user_id: &str,
        new: &NewObjective,
    ) -> Result<ObjectiveWithKeyResults> {
        tracing::info!("Creating objective for user {}: {}", user_id, new.title);

        // Key results are checked up front so a bad entry creates nothing
        new.validate()?;

        let objective = self.store.create_objective(user_id, new).await?;
        let mut key_results = Vec::with_capacity(new.key_results.len());
        for kr in &new.key_results {
            key_results.push(self.store.create_key_result(&objective.id, kr).await?);
        }

        tracing::info!(
            "Objective created successfully: {} ({} key results)",
            objective.id,
            key_results.len()
        );

        Ok(ObjectiveWithKeyResults {
            objective,
            key_results,
        })
    }

    /// Update an objective and, if a key result set is given, reconcile it.
    ///
    /// Entries whose id names an existing key result update it, entries
    /// without an id are created, and existing key results that are not
    /// listed are deleted. Each step is an independent write.
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        update: &ObjectiveUpdate,
    ) -> Result<ObjectiveWithKeyResults> {
        tracing::debug!("Updating objective: {}", id);

        self.owned_objective(user_id, id).await?;
        update.patch.validate()?;
        if let Some(drafts) = &update.key_results {
            for draft in drafts {
                draft.to_patch().validate()?;
            }
        }

        let objective = self.store.update_objective(id, &update.patch).await?;

        if let Some(drafts) = &update.key_results {
            let existing = self.store.list_key_results(id).await?;
            let mut kept: Vec<String> = Vec::new();

            for draft in drafts {
                match &draft.id {
                    Some(kr_id) if existing.iter().any(|kr| &kr.id == kr_id) => {
                        self.store.update_key_result(kr_id, &draft.to_patch()).await?;
                        kept.push(kr_id.clone());
                    }
                    Some(kr_id) => {
                        tracing::warn!(
                            "Ignoring key result {} that does not belong to objective {}",
                            kr_id,
                            id
                        );
                    }
                    None => {
                        let created = self.store.create_key_result(id, &draft.fields).await?;
                        kept.push(created.id);
                    }
                }
            }

            for kr in existing.iter().filter(|kr| !kept.contains(&kr.id)) {
                self.store.delete_key_result(&kr.id).await?;
            }
        }

        let key_results = self.store.list_key_results(id).await?;

        tracing::debug!("Objective updated successfully: {}", id);
        Ok(ObjectiveWithKeyResults {
            objective,
            key_results,
        })
    }

    /// Delete an objective and its key results
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        tracing::info!("Deleting objective: {}", id);

        self.owned_objective(user_id, id).await?;
        self.store.delete_objective(id).await?;

        tracing::info!("Objective deleted successfully: {}", id);
        Ok(())
    }

    /// Check-in on a single key result
    pub async fn update_key_result(
        &self,
        user_id: &str,
        id: &str,
        patch: &KeyResultPatch,
    ) -> Result<KeyResult> {
        let key_result = self.store.get_key_result(id).await?;
        self.owned_objective(user_id, &key_result.objective_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound { .. } => AppError::not_found("Key result", id),
                e => e,
            })?;

        self.store.update_key_result(id, patch).await
    }

    /// The objective `id`, provided it belongs to `user_id`
    pub async fn owned_objective(&self, user_id: &str, id: &str) -> Result<Objective> {
        let objective = self.store.get_objective(id).await?;
        if objective.user_id != user_id {
            return Err(AppError::not_found("Objective", id));
        }
        Ok(objective)
    }

    async fn with_key_results(
        &self,
        objectives: Vec<Objective>,
    ) -> Result<Vec<ObjectiveWithKeyResults>> {
        let mut out = Vec::with_capacity(objectives.len());
        for objective in objectives {
            let key_results = self.store.list_key_results(&objective.id).await?;
            out.push(ObjectiveWithKeyResults {
                objective,
                key_results,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, KeyResultDraft, NewKeyResult, Repository};

    async fn setup() -> (ObjectivesService, Arc<dyn Store>, String) {
        let pool = create_memory_pool().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(Repository::new(pool));
        let user = store.create_user("u1", "ada@example.com").await.unwrap();
        (ObjectivesService::new(store.clone()), store, user.id)
    }

    fn kr(description: &str) -> NewKeyResult {
        NewKeyResult {
            description: description.to_string(),
            ..Default::default()
        }
    }

    fn grow_revenue() -> NewObjective {
        NewObjective {
            title: "Grow revenue".to_string(),
            description: None,
            quarter: 1,
            year: 2025,
            key_results: vec![NewKeyResult {
                start_value: Some(0.0),
                target_value: Some(10000.0),
                ..kr("Reach $10k MRR")
            }],
        }
    }

    #[test]
    fn test_quarter_of() {
        let q = |m, d| quarter_of(NaiveDate::from_ymd_opt(2025, m, d).unwrap());
        assert_eq!(q(1, 1), (1, 2025));
        assert_eq!(q(3, 31), (1, 2025));
        assert_eq!(q(4, 1), (2, 2025));
        assert_eq!(q(9, 30), (3, 2025));
        assert_eq!(q(12, 31), (4, 2025));
    }

    #[tokio::test]
    async fn test_create_and_list_current() {
        let (service, _, user_id) = setup().await;
        service.create(&user_id, &grow_revenue()).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 2, 14).unwrap();
        let current = service.list_current(&user_id, today).await.unwrap();

        assert_eq!(current.len(), 1);
        assert_eq!(current[0].objective.title, "Grow revenue");
        assert_eq!(current[0].key_results.len(), 1);
        assert_eq!(current[0].key_results[0].confidence_level, 5);
        assert_eq!(current[0].key_results[0].current_value, 0.0);

        let next_quarter = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
        assert!(service.list_current(&user_id, next_quarter).await.unwrap().is_empty());
        assert_eq!(service.list_past(&user_id, next_quarter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_key_result_before_writing() {
        let (service, store, user_id) = setup().await;

        let mut new = grow_revenue();
        new.key_results.push(NewKeyResult {
            confidence_level: Some(12),
            ..kr("Sign 5 customers")
        });

        assert!(matches!(
            service.create(&user_id, &new).await,
            Err(AppError::Validation(_))
        ));
        assert!(store.list_objectives(&user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_reconciles_key_results() {
        let (service, _, user_id) = setup().await;

        let mut new = grow_revenue();
        new.key_results.push(kr("Sign 5 customers"));
        let created = service.create(&user_id, &new).await.unwrap();
        let keep = created.key_results[0].clone();

        let update = ObjectiveUpdate {
            key_results: Some(vec![
                KeyResultDraft {
                    id: Some(keep.id.clone()),
                    fields: NewKeyResult {
                        current_value: Some(2500.0),
                        ..kr("Reach $10k MRR")
                    },
                },
                KeyResultDraft {
                    id: None,
                    fields: kr("Launch referral program"),
                },
            ]),
            ..Default::default()
        };

        let updated = service
            .update(&user_id, &created.objective.id, &update)
            .await
            .unwrap();

        let descriptions: Vec<&str> = updated
            .key_results
            .iter()
            .map(|k| k.description.as_str())
            .collect();
        assert_eq!(descriptions.len(), 2);
        assert!(descriptions.contains(&"Reach $10k MRR"));
        assert!(descriptions.contains(&"Launch referral program"));

        let kept = updated.key_results.iter().find(|k| k.id == keep.id).unwrap();
        assert_eq!(kept.current_value, 2500.0);
        assert_eq!(kept.target_value, 10000.0);
        assert_eq!(updated.objective.title, "Grow revenue");
    }

    #[tokio::test]
    async fn test_update_without_key_results_leaves_them() {
        let (service, _, user_id) = setup().await;
        let created = service.create(&user_id, &grow_revenue()).await.unwrap();

        let update: ObjectiveUpdate =
            serde_json::from_str(r#"{"title": "Grow revenue sustainably"}"#).unwrap();
        let updated = service
            .update(&user_id, &created.objective.id, &update)
            .await
            .unwrap();

        assert_eq!(updated.objective.title, "Grow revenue sustainably");
        assert_eq!(updated.key_results, created.key_results);
    }

    #[tokio::test]
    async fn test_foreign_objective_is_not_found() {
        let (service, store, user_id) = setup().await;
        let created = service.create(&user_id, &grow_revenue()).await.unwrap();
        let other = store.create_user("u2", "grace@example.com").await.unwrap();

        assert!(matches!(
            service.delete(&other.id, &created.objective.id).await,
            Err(AppError::NotFound { .. })
        ));

        let patch = KeyResultPatch {
            current_value: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(
            service
                .update_key_result(&other.id, &created.key_results[0].id, &patch)
                .await,
            Err(AppError::NotFound { .. })
        ));

        service.delete(&user_id, &created.objective.id).await.unwrap();
    }
}
