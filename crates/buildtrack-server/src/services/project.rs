use buildtrack_cache::KeySpace;
use buildtrack_core::{DynRepository, EntityKind, EntityMeta, Project, Repository, Scope};
use tracing::instrument;

use super::{ServiceCache, ServiceError, ServiceResult, require};

const PROJECTS: KeySpace = KeySpace::of(EntityKind::Project);

pub struct ProjectService {
    repo: DynRepository<Project>,
    cache: ServiceCache,
}

impl ProjectService {
    pub fn new(repo: DynRepository<Project>, cache: ServiceCache) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: i64) -> ServiceResult<Project> {
        self.cache
            .store()
            .get_or_load(&PROJECTS.by_id(id), None, || require(self.repo.as_ref(), id))
            .await
    }

    pub async fn list(&self) -> ServiceResult<Vec<Project>> {
        self.cache
            .store()
            .get_or_load(&PROJECTS.list(), None, || async {
                Ok::<_, ServiceError>(self.repo.list().await?)
            })
            .await
    }

    /// Projects `user_id` is a member of.
    pub async fn list_for_user(&self, user_id: i64) -> ServiceResult<Vec<Project>> {
        self.cache
            .store()
            .get_or_load(&PROJECTS.by_scope(Scope::User, user_id), None, || async {
                let all = self.repo.list().await?;
                Ok::<_, ServiceError>(
                    all.into_iter()
                        .filter(|p| p.member_ids.contains(&user_id))
                        .collect(),
                )
            })
            .await
    }

    pub async fn create(&self, mut project: Project, actor: i64) -> ServiceResult<Project> {
        project.meta = EntityMeta::created_by(actor);
        let created = self.repo.insert(project).await?;
        self.cache.invalidate(&created);
        Ok(created)
    }

    pub async fn update(&self, mut project: Project, actor: i64) -> ServiceResult<Project> {
        let existing = require(self.repo.as_ref(), project.id).await?;
        project.meta = existing.meta.clone();
        project.meta.touch(actor);
        let updated = self.repo.update(project).await?;
        // Members removed by this update still have the old listing cached.
        self.cache.invalidate(&existing);
        self.cache.invalidate(&updated);
        Ok(updated)
    }

    pub async fn delete(&self, id: i64, actor: i64) -> ServiceResult<()> {
        let existing = require(self.repo.as_ref(), id).await?;
        self.repo.soft_delete(id, actor).await?;
        self.cache.invalidate(&existing);
        Ok(())
    }
}
