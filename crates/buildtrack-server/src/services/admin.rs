//! User administration.
//!
//! Every write updates the user snapshot on this instance and broadcasts it
//! to the others, then invalidates the cached key families that embed users.

use std::sync::Arc;

use buildtrack_core::models::roles;
use buildtrack_core::{DynRepository, EntityMeta, Repository, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{RoleGuard, ServiceCache, ServiceError, ServiceResult, require};
use crate::sync::SnapshotSync;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub password_hash: String,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub id: i64,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_verify: Option<bool>,
}

pub struct AdminService {
    repo: DynRepository<User>,
    cache: ServiceCache,
    sync: Arc<SnapshotSync>,
    roles: RoleGuard,
}

impl AdminService {
    pub fn new(repo: DynRepository<User>, cache: ServiceCache, sync: Arc<SnapshotSync>) -> Self {
        let roles = RoleGuard::new(sync.snapshot().clone());
        Self {
            repo,
            cache,
            sync,
            roles,
        }
    }

    pub async fn is_in_role(&self, user_id: i64, role: &str) -> ServiceResult<bool> {
        self.roles.is_in_role(user_id, role).await
    }

    pub async fn is_in_any_role(&self, user_id: i64, roles: &[&str]) -> ServiceResult<bool> {
        self.roles.is_in_any_role(user_id, roles).await
    }

    /// All live users, from the snapshot.
    pub async fn list_users(&self) -> ServiceResult<Arc<Vec<User>>> {
        Ok(self.sync.snapshot().records().await?)
    }

    /// Accounts created by an administrator start out verified.
    pub async fn create_user(&self, new: NewUser, actor: i64) -> ServiceResult<User> {
        self.require_admin(actor).await?;
        check_role(&new.role)?;

        let users = self.sync.snapshot().records().await?;
        if users
            .iter()
            .any(|u| u.username == new.username || u.email == new.email)
        {
            return Err(ServiceError::not_allowed("username or email already in use"));
        }

        let created = self
            .repo
            .insert(User {
                id: 0,
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
                role: new.role,
                is_verify: true,
                meta: EntityMeta::created_by(actor),
            })
            .await?;

        self.after_write(&created).await?;
        info!(user_id = created.id, actor, "user created");
        Ok(created)
    }

    /// Admins cannot edit themselves or other admins.
    pub async fn update_user(&self, update: UserUpdate, actor: i64) -> ServiceResult<User> {
        self.require_admin(actor).await?;
        if update.id == actor || self.is_admin(update.id).await? {
            return Err(ServiceError::not_allowed(format!(
                "user {} cannot be updated",
                update.id
            )));
        }
        let mut user = require(self.repo.as_ref(), update.id).await?;

        if let Some(role) = update.role {
            check_role(&role)?;
            user.role = role;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(is_verify) = update.is_verify {
            user.is_verify = is_verify;
        }
        user.meta.touch(actor);

        let updated = self.repo.update(user).await?;
        self.after_write(&updated).await?;
        Ok(updated)
    }

    /// Soft-delete a user. Admins cannot delete themselves or other admins.
    pub async fn delete_user(&self, user_id: i64, actor: i64) -> ServiceResult<()> {
        self.require_admin(actor).await?;
        if user_id == actor || self.is_admin(user_id).await? {
            return Err(ServiceError::not_allowed(format!(
                "user {user_id} cannot be deleted"
            )));
        }

        let user = require(self.repo.as_ref(), user_id).await?;
        self.repo.soft_delete(user_id, actor).await?;
        self.after_write(&user).await?;
        info!(user_id, actor, "user deleted");
        Ok(())
    }

    async fn after_write(&self, user: &User) -> ServiceResult<()> {
        self.cache.invalidate(user);
        self.sync.trigger_update(user.id).await?;
        Ok(())
    }

    /// Strict check; `Executive Board` does not imply administrator.
    async fn is_admin(&self, user_id: i64) -> ServiceResult<bool> {
        Ok(self
            .sync
            .snapshot()
            .records()
            .await?
            .iter()
            .any(|u| u.id == user_id && u.role == roles::ADMIN))
    }

    async fn require_admin(&self, actor: i64) -> ServiceResult<()> {
        if self.is_admin(actor).await? {
            Ok(())
        } else {
            Err(ServiceError::not_allowed(format!(
                "user {actor} is not an administrator"
            )))
        }
    }
}

fn check_role(role: &str) -> ServiceResult<()> {
    if roles::is_valid(role) {
        Ok(())
    } else {
        Err(ServiceError::not_allowed(format!("unknown role: {role}")))
    }
}
