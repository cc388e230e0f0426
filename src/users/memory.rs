use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, StoreResult, UserStore};
use super::repo_types::{NewUser, User};

/// Process-local store with the same uniqueness rules as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

fn taken(users: &HashMap<Uuid, User>, except: Option<Uuid>, pred: impl Fn(&User) -> bool) -> bool {
    users
        .values()
        .any(|u| Some(u.id) != except && pred(u))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if taken(&users, None, |u| u.username == new.username) {
            return Err(StoreError::Duplicate("username".into()));
        }
        if taken(&users, None, |u| u.email == new.email) {
            return Err(StoreError::Duplicate("email".into()));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            full_name: new.full_name,
            avatar: new.avatar,
            cover_image: new.cover_image,
            password_hash: new.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        Ok(users
            .get_mut(&id)
            .map(|u| u.refresh_token = token.map(str::to_owned))
            .is_some())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.refresh_token.as_deref() == Some(current) => {
                u.refresh_token = Some(next.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        Ok(users
            .get_mut(&id)
            .map(|u| {
                u.password_hash = hash.to_owned();
                u.updated_at = OffsetDateTime::now_utc();
            })
            .is_some())
    }

    async fn update_details(
        &self,
        id: Uuid,
        full_name: &str,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        if let Some(email) = email {
            if taken(&users, Some(id), |u| u.email == email) {
                return Err(StoreError::Duplicate("email".into()));
            }
        }
        Ok(users.get_mut(&id).map(|u| {
            u.full_name = full_name.to_owned();
            if let Some(email) = email {
                u.email = email.to_owned();
            }
            u.updated_at = OffsetDateTime::now_utc();
            u.clone()
        }))
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|u| {
            u.avatar = url.to_owned();
            u.updated_at = OffsetDateTime::now_utc();
            u.clone()
        }))
    }

    async fn set_cover_image(&self, id: Uuid, url: &str) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|u| {
            u.cover_image = Some(url.to_owned());
            u.updated_at = OffsetDateTime::now_utc();
            u.clone()
        }))
    }
}
