use axum::extract::FromRef;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState, users::repo_types::User};

/// Freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

const ISSUE_FAILED: &str = "Something went wrong while generating access and refresh tokens";
const REPLAYED: &str = "Refresh token is expired or used";

/// Signs a new pair for `user_id` and stores the refresh token as the only trusted one.
pub async fn issue_token_pair(state: &AppState, user_id: Uuid) -> Result<TokenPair, AppError> {
    try_issue(state, user_id).await.map_err(|e| {
        error!(error = ?e, %user_id, "token issuance failed");
        AppError::Internal(ISSUE_FAILED.into())
    })
}

async fn try_issue(state: &AppState, user_id: Uuid) -> anyhow::Result<TokenPair> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {user_id} not found"))?;

    let pair = sign_pair(state, &user)?;
    if !state
        .store
        .set_refresh_token(user.id, Some(&pair.refresh_token))
        .await?
    {
        anyhow::bail!("user {user_id} vanished while storing refresh token");
    }
    Ok(pair)
}

fn sign_pair(state: &AppState, user: &User) -> anyhow::Result<TokenPair> {
    let keys = JwtKeys::from_ref(state);
    Ok(TokenPair {
        access_token: keys.sign_access(user)?,
        refresh_token: keys.sign_refresh(user)?,
    })
}

/// Compares `candidate` with the stored hash. An unparsable hash counts as a mismatch.
pub fn verify_password(state: &AppState, user: &User, candidate: &str) -> bool {
    match state.hasher.verify(candidate, &user.password_hash) {
        Ok(ok) => ok,
        Err(e) => {
            error!(error = %e, user_id = %user.id, "stored password hash is unreadable");
            false
        }
    }
}

/// Exchanges the current refresh token for a new pair. Every failure is a 401.
pub async fn refresh(state: &AppState, incoming: Option<&str>) -> Result<TokenPair, AppError> {
    let incoming = incoming
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(incoming).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        AppError::unauthorized(format!("Invalid refresh token: {e}"))
    })?;

    let user = state
        .store
        .find_by_id(claims.sub)
        .await
        .map_err(|e| AppError::unauthorized(AppError::from(e).to_string()))?
        .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

    if user.refresh_token.as_deref() != Some(incoming) {
        warn!(user_id = %user.id, "superseded refresh token presented");
        return Err(AppError::unauthorized(REPLAYED));
    }

    let pair = sign_pair(state, &user).map_err(|e| {
        error!(error = ?e, user_id = %user.id, "token issuance failed");
        AppError::unauthorized(ISSUE_FAILED)
    })?;
    let rotated = state
        .store
        .rotate_refresh_token(user.id, incoming, &pair.refresh_token)
        .await
        .map_err(|e| AppError::unauthorized(AppError::from(e).to_string()))?;
    if !rotated {
        warn!(user_id = %user.id, "refresh token redeemed concurrently");
        return Err(AppError::unauthorized(REPLAYED));
    }
    info!(user_id = %user.id, "refresh token rotated");
    Ok(pair)
}

/// Forgets the stored refresh token so it can never be exchanged again.
pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    state.store.set_refresh_token(user_id, None).await?;
    info!(%user_id, "refresh token cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::{
        auth::{Argon2Hasher, CredentialHasher},
        config::{AppConfig, JwtConfig, MediaConfig, PasswordConfig},
        storage::StorageClient,
        users::{repo_types::NewUser, MemoryUserStore, UserStore},
    };

    struct NoStorage;

    #[async_trait]
    impl StorageClient for NoStorage {
        async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn state() -> AppState {
        let config = AppConfig {
            database_url: String::new(),
            database_max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            cookie_secure: true,
            jwt: JwtConfig {
                access_secret: "access".into(),
                refresh_secret: "refresh".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                access_ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            media: MediaConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
                public_url: "https://media.test".into(),
                upload_dir: std::env::temp_dir(),
                max_upload_bytes: 1024,
            },
            password: PasswordConfig::default(),
        };
        let hasher = Argon2Hasher::with_params(64, 1, 1).unwrap();
        AppState::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(config),
            Arc::new(NoStorage),
            Arc::new(hasher),
        )
    }

    async fn seed(state: &AppState) -> User {
        let password_hash = state.hasher.hash("pw").unwrap();
        state
            .store
            .create(NewUser {
                username: "annlee".into(),
                email: "ann@x.com".into(),
                full_name: "Ann Lee".into(),
                avatar: "https://media.test/users/a.png".into(),
                cover_image: None,
                password_hash,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn issued_refresh_token_is_stored() {
        let state = state();
        let user = seed(&state).await;
        let pair = issue_token_pair(&state, user.id).await.unwrap();
        let stored = state.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn issuing_for_unknown_user_is_internal() {
        let state = state();
        let err = issue_token_pair(&state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() {
        let state = state();
        let user = seed(&state).await;
        let first = issue_token_pair(&state, user.id).await.unwrap();

        let second = refresh(&state, Some(&first.refresh_token)).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let err = refresh(&state, Some(&first.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(m) if m == "Refresh token is expired or used"));
    }

    #[tokio::test]
    async fn concurrent_redemptions_rotate_once() {
        let state = state();
        let user = seed(&state).await;
        let first = issue_token_pair(&state, user.id).await.unwrap();

        let (a, b) = tokio::join!(
            refresh(&state, Some(&first.refresh_token)),
            refresh(&state, Some(&first.refresh_token)),
        );
        let winners: Vec<_> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(winners.len(), 1);

        let stored = state.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(winners[0].refresh_token.as_str()));
    }

    #[tokio::test]
    async fn refresh_requires_a_token() {
        let state = state();
        assert!(matches!(refresh(&state, None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(refresh(&state, Some("  ")).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(refresh(&state, Some("garbage")).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let state = state();
        let user = seed(&state).await;
        let pair = issue_token_pair(&state, user.id).await.unwrap();
        let err = refresh(&state, Some(&pair.access_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn logout_invalidates_stored_token() {
        let state = state();
        let user = seed(&state).await;
        let pair = issue_token_pair(&state, user.id).await.unwrap();

        logout(&state, user.id).await.unwrap();
        let stored = state.store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());

        let err = refresh(&state, Some(&pair.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn verify_password_checks_hash() {
        let state = state();
        let user = seed(&state).await;
        assert!(verify_password(&state, &user, "pw"));
        assert!(!verify_password(&state, &user, "nope"));

        let broken = User {
            password_hash: "plaintext".into(),
            ..user
        };
        assert!(!verify_password(&state, &broken, "plaintext"));
    }
}
