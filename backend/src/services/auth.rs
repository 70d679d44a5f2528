//! Magic link authentication
//!
//! Tokens are single use and expire after `MAGIC_LINK_TTL_HOURS`. A token
//! moves from issued to either redeemed or expired and never back.

use crate::config::MAGIC_LINK_TTL_HOURS;
use crate::database::{MagicLink, User};
use crate::error::{AppError, Result};
use crate::services::UsersService;
use crate::storage::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a login request
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub user: User,
    /// App-relative path the browser opens to complete the login
    #[serde(rename = "magicLink")]
    pub magic_link: String,
}

/// Path embedded in login links for `token`
pub fn verify_path(token: &str) -> String {
    format!("/auth/verify/{}", token)
}

/// Service issuing and redeeming magic links
#[derive(Clone)]
pub struct MagicLinkService {
    store: Arc<dyn Store>,
    users: UsersService,
}

impl MagicLinkService {
    pub fn new(store: Arc<dyn Store>, users: UsersService) -> Self {
        Self { store, users }
    }

    /// Find or create the account for `email` and issue it a login link
    pub async fn login(&self, email: &str) -> Result<LoginResponse> {
        let user = self.users.find_or_create(email).await?;
        let link = self.issue(&user.id).await?;

        tracing::info!("Issued login link for user: {}", user.id);
        Ok(LoginResponse {
            user,
            magic_link: verify_path(&link.token),
        })
    }

    /// Issue a fresh token for `user_id`
    pub async fn issue(&self, user_id: &str) -> Result<MagicLink> {
        self.issue_at(user_id, Utc::now()).await
    }

    pub async fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<MagicLink> {
        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::hours(MAGIC_LINK_TTL_HOURS);

        self.store.create_magic_link(user_id, &token, expires_at).await
    }

    /// Exchange a token for its user, consuming the token
    pub async fn verify(&self, token: &str) -> Result<User> {
        self.verify_at(token, Utc::now()).await
    }

    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<User> {
        let link = self
            .store
            .find_valid_magic_link(token, now)
            .await?
            .ok_or(AppError::InvalidOrExpired)?;

        // A concurrent verify may have won the token since the lookup
        if !self.redeem_at(token, now).await? {
            return Err(AppError::InvalidOrExpired);
        }

        let user = match self.store.get_user(&link.user_id).await {
            Ok(user) => user,
            Err(AppError::NotFound { .. }) => return Err(AppError::InvalidOrExpired),
            Err(e) => return Err(e),
        };

        tracing::info!("Magic link redeemed for user: {}", user.id);
        Ok(user)
    }

    /// Consume a token without logging in. Returns whether this call consumed it.
    pub async fn redeem(&self, token: &str) -> Result<bool> {
        self.redeem_at(token, Utc::now()).await
    }

    async fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        self.store.claim_magic_link(token, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, create_pool, Repository};
    use crate::storage::JsonFileStore;
    use tempfile::TempDir;

    async fn create_test_service() -> MagicLinkService {
        let pool = create_memory_pool().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(Repository::new(pool));
        MagicLinkService::new(store.clone(), UsersService::new(store))
    }

    #[tokio::test]
    async fn test_login_issues_link() {
        let service = create_test_service().await;

        let response = service.login("ada@example.com").await.unwrap();

        assert!(response.magic_link.starts_with("/auth/verify/"));
        let token = response.magic_link.trim_start_matches("/auth/verify/");
        let user = service.verify(token).await.unwrap();
        assert_eq!(user.id, response.user.id);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["magicLink"].is_string());
        assert_eq!(json["user"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_verify_is_single_use() {
        let service = create_test_service().await;
        let response = service.login("ada@example.com").await.unwrap();
        let link = service.issue(&response.user.id).await.unwrap();

        service.verify(&link.token).await.unwrap();

        assert!(matches!(
            service.verify(&link.token).await,
            Err(AppError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_expired_link_is_rejected() {
        let service = create_test_service().await;
        let response = service.login("ada@example.com").await.unwrap();

        let issued_at = Utc::now();
        let link = service.issue_at(&response.user.id, issued_at).await.unwrap();
        assert_eq!(link.expires_at, issued_at + Duration::hours(24));

        let later = link.expires_at + Duration::seconds(1);
        assert!(matches!(
            service.verify_at(&link.token, later).await,
            Err(AppError::InvalidOrExpired)
        ));

        // Rejection does not consume the token
        assert!(service.verify_at(&link.token, issued_at).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let service = create_test_service().await;

        assert!(matches!(
            service.verify("not-a-token").await,
            Err(AppError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_redeem_blocks_verify() {
        let service = create_test_service().await;
        let response = service.login("ada@example.com").await.unwrap();
        let link = service.issue(&response.user.id).await.unwrap();

        assert!(service.redeem(&link.token).await.unwrap());
        assert!(!service.redeem(&link.token).await.unwrap());

        assert!(service.verify(&link.token).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verify_succeeds_once() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("auth.db")).await.unwrap();
        let store: Arc<dyn Store> = Arc::new(Repository::new(pool));
        let service = MagicLinkService::new(store.clone(), UsersService::new(store));
        let user = service.login("ada@example.com").await.unwrap().user;

        for _ in 0..20 {
            let link = service.issue(&user.id).await.unwrap();

            let attempts: Vec<_> = (0..4)
                .map(|_| {
                    let service = service.clone();
                    let token = link.token.clone();
                    tokio::spawn(async move { service.verify(&token).await })
                })
                .collect();

            let mut successes = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => successes += 1,
                    Err(e) => assert!(matches!(e, AppError::InvalidOrExpired)),
                }
            }
            assert_eq!(successes, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verify_succeeds_once_on_json_store() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(
            JsonFileStore::open(temp_dir.path().join("data.json"))
                .await
                .unwrap(),
        );
        let service = MagicLinkService::new(store.clone(), UsersService::new(store));
        let user = service.login("ada@example.com").await.unwrap().user;
        let link = service.issue(&user.id).await.unwrap();

        let attempts: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let token = link.token.clone();
                tokio::spawn(async move { service.verify(&token).await })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
