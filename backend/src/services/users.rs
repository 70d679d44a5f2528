//! Users service
//!
//! Account lookup, profile settings and account removal.

use crate::database::{User, UserPatch};
use crate::error::{AppError, Result};
use crate::storage::Store;
use std::sync::Arc;
use uuid::Uuid;

/// Service for managing user accounts
#[derive(Clone)]
pub struct UsersService {
    store: Arc<dyn Store>,
}

impl UsersService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Find the account for `email`, creating it with default settings if needed
    pub async fn find_or_create(&self, email: &str) -> Result<User> {
        let email = normalize_email(email)?;

        if let Some(user) = self.store.find_user_by_email(&email).await? {
            return Ok(user);
        }

        let id = Uuid::new_v4().to_string();
        match self.store.create_user(&id, &email).await {
            Ok(user) => {
                tracing::info!("Created user {} for {}", user.id, user.email);
                Ok(user)
            }
            // A concurrent login for the same address won the insert
            Err(AppError::DuplicateKey(_)) => self
                .store
                .find_user_by_email(&email)
                .await?
                .ok_or_else(|| AppError::not_found("User", &email)),
            Err(e) => Err(e),
        }
    }

    /// Get the caller's profile
    pub async fn get_profile(&self, user_id: &str) -> Result<User> {
        self.store.get_user(user_id).await
    }

    /// Update timezone, digest time and digest opt-in
    pub async fn update_settings(&self, user_id: &str, patch: &UserPatch) -> Result<User> {
        tracing::info!("Updating settings for user: {}", user_id);
        self.store.update_user(user_id, patch).await
    }

    /// Delete the account and everything it owns
    pub async fn delete_account(&self, user_id: &str) -> Result<()> {
        tracing::info!("Deleting user: {}", user_id);

        self.store.delete_user(user_id).await?;

        tracing::info!("User deleted successfully: {}", user_id);
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::Validation(format!("invalid email address: {:?}", email))),
    }
}
