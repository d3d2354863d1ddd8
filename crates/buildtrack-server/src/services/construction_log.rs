use buildtrack_cache::{InvalidationPlan, KeySpace};
use buildtrack_core::models::roles;
use buildtrack_core::{
    ConstructionLog, ConstructionLogStatus, DynRepository, EntityKind, EntityMeta, Project,
    Repository, Scope,
};
use tracing::{info, instrument, warn};

use super::{RoleGuard, ServiceCache, ServiceError, ServiceResult, require};

const LOGS: KeySpace = KeySpace::of(EntityKind::ConstructionLog);

/// Roles allowed to approve or reject a log.
const REVIEWERS: [&str; 2] = [roles::TECHNICAL_MANAGER, roles::EXECUTIVE_BOARD];

pub struct ConstructionLogService {
    repo: DynRepository<ConstructionLog>,
    projects: DynRepository<Project>,
    cache: ServiceCache,
    roles: RoleGuard,
}

impl ConstructionLogService {
    pub fn new(
        repo: DynRepository<ConstructionLog>,
        projects: DynRepository<Project>,
        cache: ServiceCache,
        roles: RoleGuard,
    ) -> Self {
        Self {
            repo,
            projects,
            cache,
            roles,
        }
    }

    pub async fn get_by_id(&self, id: i64) -> ServiceResult<ConstructionLog> {
        self.cache
            .store()
            .get_or_load(&LOGS.by_id(id), None, || require(self.repo.as_ref(), id))
            .await
    }

    pub async fn list_by_project(&self, project_id: i64) -> ServiceResult<Vec<ConstructionLog>> {
        let key = LOGS.by_scope(Scope::Project, project_id);
        self.cache
            .store()
            .get_or_load(&key, None, || async {
                let all = self.repo.list().await?;
                Ok::<_, ServiceError>(
                    all.into_iter()
                        .filter(|log| log.project_id == project_id)
                        .collect(),
                )
            })
            .await
    }

    pub async fn create(&self, mut log: ConstructionLog, actor: i64) -> ServiceResult<ConstructionLog> {
        log.status = ConstructionLogStatus::WaitingForApproval;
        log.meta = EntityMeta::created_by(actor);
        let created = self.repo.insert(log).await?;
        self.cache.invalidate(&created);
        Ok(created)
    }

    /// Edit a log that has not been reviewed yet.
    pub async fn update(&self, mut log: ConstructionLog, actor: i64) -> ServiceResult<ConstructionLog> {
        let existing = require(self.repo.as_ref(), log.id).await?;
        if existing.status == ConstructionLogStatus::Approved {
            return Err(ServiceError::not_allowed(format!(
                "construction log {} is already approved",
                log.id
            )));
        }
        log.status = existing.status;
        log.meta = existing.meta.clone();
        log.meta.touch(actor);
        let updated = self.repo.update(log).await?;
        if existing.project_id != updated.project_id {
            self.cache.invalidate(&existing);
        }
        self.cache.invalidate(&updated);
        Ok(updated)
    }

    /// Approve a waiting log. Progress, plans, inspections, the project,
    /// inventories and the dashboards built on them all derive from approved
    /// logs, so their caches go too, along with the project members' views.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: i64, actor: i64) -> ServiceResult<ConstructionLog> {
        self.review(id, actor, ConstructionLogStatus::Approved).await
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, id: i64, actor: i64) -> ServiceResult<ConstructionLog> {
        self.review(id, actor, ConstructionLogStatus::Rejected).await
    }

    async fn review(
        &self,
        id: i64,
        actor: i64,
        status: ConstructionLogStatus,
    ) -> ServiceResult<ConstructionLog> {
        self.roles.require_any(actor, &REVIEWERS).await?;

        let mut log = require(self.repo.as_ref(), id).await?;
        if log.status != ConstructionLogStatus::WaitingForApproval {
            return Err(ServiceError::not_allowed(format!(
                "construction log {id} is not waiting for approval"
            )));
        }
        log.status = status;
        log.meta.touch(actor);
        let reviewed = self.repo.update(log).await?;

        let mut plan = InvalidationPlan::for_entity(&reviewed);
        match self.projects.get(reviewed.project_id).await {
            Ok(Some(project)) => {
                plan.add_member_views(&project.member_ids);
            }
            Ok(None) => {}
            Err(e) => warn!(
                project_id = reviewed.project_id,
                error = %e,
                "project members unavailable, member views kept"
            ),
        }
        self.cache.submit(plan);
        info!(id, project_id = reviewed.project_id, status = ?status, "construction log reviewed");
        Ok(reviewed)
    }
}
