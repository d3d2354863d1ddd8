use std::sync::Arc;

use buildtrack_core::models::roles;
use buildtrack_core::{EntityKind, User};

use super::{ServiceError, ServiceResult};
use crate::snapshot::UserSnapshot;

/// Role checks answered from the user snapshot, never the database.
///
/// An `Executive Board` user passes every check.
#[derive(Clone)]
pub struct RoleGuard {
    users: Arc<UserSnapshot>,
}

impl RoleGuard {
    pub fn new(users: Arc<UserSnapshot>) -> Self {
        Self { users }
    }

    async fn user(&self, user_id: i64) -> ServiceResult<User> {
        self.users
            .records()
            .await?
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(EntityKind::User, user_id))
    }

    pub async fn is_in_role(&self, user_id: i64, role: &str) -> ServiceResult<bool> {
        let user = self.user(user_id).await?;
        Ok(user.role == roles::EXECUTIVE_BOARD || user.role == role)
    }

    pub async fn is_in_any_role(&self, user_id: i64, wanted: &[&str]) -> ServiceResult<bool> {
        let user = self.user(user_id).await?;
        Ok(user.role == roles::EXECUTIVE_BOARD || wanted.contains(&user.role.as_str()))
    }

    /// `NotAllowed` unless `user_id` holds one of `wanted`.
    pub async fn require_any(&self, user_id: i64, wanted: &[&str]) -> ServiceResult<()> {
        if self.is_in_any_role(user_id, wanted).await? {
            Ok(())
        } else {
            Err(ServiceError::not_allowed(format!(
                "user {user_id} needs one of {wanted:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildtrack_core::EntityMeta;
    use buildtrack_db_memory::InMemoryRepository;

    use crate::snapshot::RepositorySource;

    fn user(id: i64, role: &str) -> User {
        User {
            id,
            username: format!("u{id}"),
            email: format!("u{id}@example.com"),
            password_hash: String::new(),
            role: role.into(),
            is_verify: true,
            meta: EntityMeta::created_by(1),
        }
    }

    fn guard() -> RoleGuard {
        let repo = Arc::new(InMemoryRepository::with_rows([
            user(1, roles::EXECUTIVE_BOARD),
            user(2, roles::TECHNICAL_MANAGER),
            user(3, roles::USER),
        ]));
        RoleGuard::new(Arc::new(UserSnapshot::new(
            "users",
            Arc::new(RepositorySource::<User>::new(repo)),
        )))
    }

    #[tokio::test]
    async fn executive_board_passes_every_check() {
        let guard = guard();
        assert!(guard.is_in_role(1, roles::ADMIN).await.unwrap());
        assert!(guard.is_in_any_role(1, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn role_match_is_exact() {
        let guard = guard();
        assert!(guard.is_in_role(2, roles::TECHNICAL_MANAGER).await.unwrap());
        assert!(!guard.is_in_role(3, roles::TECHNICAL_MANAGER).await.unwrap());
        assert!(
            guard
                .is_in_any_role(3, &[roles::ADMIN, roles::USER])
                .await
                .unwrap()
        );
        assert!(matches!(
            guard.require_any(3, &[roles::ADMIN]).await,
            Err(ServiceError::NotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let guard = guard();
        assert!(matches!(
            guard.is_in_role(99, roles::USER).await,
            Err(ServiceError::NotFound { id: 99, .. })
        ));
    }
}
