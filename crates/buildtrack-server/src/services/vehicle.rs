use std::time::Duration;

use buildtrack_cache::KeySpace;
use buildtrack_core::{DynRepository, EntityKind, EntityMeta, Repository, Scope, Vehicle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ServiceCache, ServiceError, ServiceResult, require};

const VEHICLES: KeySpace = KeySpace::of(EntityKind::Vehicle);

/// Vehicles change rarely and are read on most resource screens.
const VEHICLE_TTL: Duration = Duration::from_secs(15 * 60);

/// Filters for [`VehicleService::search`]. Text filters match substrings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSearch {
    pub license_plate: Option<String>,
    pub brand: Option<String>,
    pub vehicle_type: Option<i32>,
    pub status: Option<i32>,
    pub driver: Option<i64>,
    pub page_index: usize,
    pub page_size: usize,
}

impl VehicleSearch {
    fn cache_key(&self) -> String {
        VEHICLES
            .search()
            .param_opt("lp", self.license_plate.as_deref())
            .param_opt("br", self.brand.as_deref())
            .param_opt("vt", self.vehicle_type)
            .param_opt("st", self.status)
            .param_opt("dr", self.driver)
            .param("pi", self.page_index)
            .param("ps", self.page_size)
            .build()
    }

    fn matches(&self, v: &Vehicle) -> bool {
        self.license_plate
            .as_deref()
            .is_none_or(|lp| v.license_plate.contains(lp))
            && self.brand.as_deref().is_none_or(|b| v.brand.contains(b))
            && self.vehicle_type.is_none_or(|t| v.vehicle_type == t)
            && self.status.is_none_or(|s| v.status == s)
            && self.driver.is_none_or(|d| v.driver == d)
    }
}

pub struct VehicleService {
    repo: DynRepository<Vehicle>,
    cache: ServiceCache,
}

impl VehicleService {
    pub fn new(repo: DynRepository<Vehicle>, cache: ServiceCache) -> Self {
        Self { repo, cache }
    }

    /// By-id reads go through the fast tier.
    pub async fn get_by_id(&self, id: i64) -> ServiceResult<Vehicle> {
        self.cache
            .store()
            .get_or_load_with(&VEHICLES.by_id(id), Some(VEHICLE_TTL), true, || {
                require(self.repo.as_ref(), id)
            })
            .await
    }

    /// Filtered page, most recently updated first. A page size of 0 means
    /// no paging.
    pub async fn search(&self, filter: &VehicleSearch) -> ServiceResult<Vec<Vehicle>> {
        let key = filter.cache_key();
        self.cache
            .store()
            .get_or_load(&key, Some(VEHICLE_TTL), || async {
                debug!(key = %key, "vehicle search cache miss");
                let matching = self
                    .repo
                    .list()
                    .await?
                    .into_iter()
                    .filter(|v| filter.matches(v));
                let page: Vec<Vehicle> = if filter.page_size == 0 {
                    matching.collect()
                } else {
                    matching
                        .skip(filter.page_index * filter.page_size)
                        .take(filter.page_size)
                        .collect()
                };
                Ok::<_, ServiceError>(page)
            })
            .await
    }

    pub async fn list_by_type(&self, vehicle_type: i32) -> ServiceResult<Vec<Vehicle>> {
        let key = VEHICLES.by_scope(Scope::Type, i64::from(vehicle_type));
        self.cache
            .store()
            .get_or_load(&key, Some(VEHICLE_TTL), || async {
                let all = self.repo.list().await?;
                Ok::<_, ServiceError>(
                    all.into_iter()
                        .filter(|v| v.vehicle_type == vehicle_type)
                        .collect(),
                )
            })
            .await
    }

    pub async fn create(&self, mut vehicle: Vehicle, actor: i64) -> ServiceResult<Vehicle> {
        let plate_taken = self
            .repo
            .list()
            .await?
            .iter()
            .any(|v| v.license_plate == vehicle.license_plate);
        if plate_taken {
            return Err(ServiceError::not_allowed(format!(
                "license plate {} already exists",
                vehicle.license_plate
            )));
        }

        vehicle.meta = EntityMeta::created_by(actor);
        let created = self.repo.insert(vehicle).await?;
        self.cache.invalidate(&created);
        Ok(created)
    }

    pub async fn update(&self, mut vehicle: Vehicle, actor: i64) -> ServiceResult<Vehicle> {
        let existing = require(self.repo.as_ref(), vehicle.id).await?;
        vehicle.meta = existing.meta.clone();
        vehicle.meta.touch(actor);
        let updated = self.repo.update(vehicle).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use buildtrack_db_memory::InMemoryRepository;

    use crate::services::testing;

    fn vehicle(plate: &str, brand: &str, vehicle_type: i32) -> Vehicle {
        Vehicle {
            id: 0,
            license_plate: plate.into(),
            brand: brand.into(),
            vehicle_type,
            status: 1,
            driver: 4,
            description: None,
            meta: EntityMeta::default(),
        }
    }

    async fn service() -> (VehicleService, Arc<InMemoryRepository<Vehicle>>, ServiceCache) {
        let repo = Arc::new(InMemoryRepository::<Vehicle>::new());
        let cache = testing::cache();
        let service = VehicleService::new(repo.clone(), cache.clone());
        service.create(vehicle("29C-001", "Hino", 1), 1).await.unwrap();
        service.create(vehicle("29C-002", "Hino", 2), 1).await.unwrap();
        service.create(vehicle("30A-100", "Isuzu", 1), 1).await.unwrap();
        cache.queue().flush().await;
        (service, repo, cache)
    }

    #[tokio::test]
    async fn by_id_is_served_from_the_fast_tier() {
        let (service, repo, cache) = service().await;
        let v = service.get_by_id(1).await.unwrap();
        assert_eq!(v.license_plate, "29C-001");
        assert!(cache.store().fast_tier().contains(&VEHICLES.by_id(1)));

        service.get_by_id(1).await.unwrap();
        assert_eq!(repo.read_count(), 4);
    }

    #[test]
    fn search_keys_are_deterministic() {
        let filter = VehicleSearch {
            brand: Some("Hino".into()),
            vehicle_type: Some(1),
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(
            filter.cache_key(),
            "VEHICLE:SEARCH:lp=:br=Hino:vt=1:st=:dr=:pi=0:ps=10"
        );
        assert_eq!(filter.cache_key(), filter.clone().cache_key());
    }

    #[tokio::test]
    async fn search_results_are_cached_until_a_write() {
        let (service, _repo, cache) = service().await;
        let filter = VehicleSearch {
            brand: Some("Hino".into()),
            ..Default::default()
        };

        assert_eq!(service.search(&filter).await.unwrap().len(), 2);
        assert!(
            cache
                .store()
                .get::<Vec<Vehicle>>(&filter.cache_key(), false)
                .await
                .is_some()
        );

        service.create(vehicle("29C-003", "Hino", 3), 1).await.unwrap();
        cache.queue().flush().await;
        assert_eq!(service.search(&filter).await.unwrap().len(), 3);
        assert_eq!(service.list_by_type(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_evicts_fast_tier_copy() {
        let (service, _repo, cache) = service().await;
        let mut v = service.get_by_id(2).await.unwrap();
        v.status = 3;
        service.update(v, 9).await.unwrap();
        cache.queue().flush().await;

        assert!(!cache.store().fast_tier().contains(&VEHICLES.by_id(2)));
        assert_eq!(service.get_by_id(2).await.unwrap().status, 3);
    }

    #[tokio::test]
    async fn duplicate_plate_is_rejected() {
        let (service, _repo, _cache) = service().await;
        let err = service
            .create(vehicle("30A-100", "Isuzu", 1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAllowed(_)));
    }
}
