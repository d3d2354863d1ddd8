//! Write-side invalidation: which keys and patterns a change touches.
//!
//! A write to one entity invalidates its own key space and, one hop out,
//! the key spaces of the kinds whose cached views embed it. The dependency
//! table is static.

use buildtrack_core::{Entity, EntityKind, Scope};

use crate::keys::{KeySpace, scope_target, scopes_of};
use crate::store::CacheStore;
use crate::tier::glob_match;

/// Kinds whose cached views must be dropped when `kind` changes.
pub const fn dependents(kind: EntityKind) -> &'static [EntityKind] {
    use EntityKind as K;
    match kind {
        K::ConstructionLog => &[
            K::ConstructionProgress,
            K::ConstructionPlan,
            K::InspectionReport,
            K::Project,
            K::ResourceInventory,
        ],
        K::ConstructionProgress => &[K::Project],
        K::ConstructionPlan => &[K::ConstructionTeam, K::ConstructionProgress, K::Project],
        K::ConstructionTeam => &[K::User, K::ConstructionPlan],
        K::InspectionReport => &[K::ConstructionProgress, K::Project],
        K::Contract => &[K::ContractDetail, K::Project],
        K::User => &[K::ConstructionTeam, K::Project, K::Contract, K::ContractDetail],
        K::MobilizationReq | K::AllocationReq | K::Material | K::Vehicle => {
            &[K::ResourceInventory]
        }
        K::Project
        | K::ContractDetail
        | K::Customer
        | K::SiteSurvey
        | K::ResourceInventory
        | K::ActionLog => &[],
    }
}

/// Patterns of derived views outside the entity key spaces that a change to
/// `kind` makes stale: progress items, task boards, dashboards, statistics
/// and reports are all computed from approved construction logs.
pub const fn derived_patterns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::ConstructionLog => &[
            "ConstructionProgressItem:*",
            "TASK:*",
            "DASHBOARD:*",
            "STATISTICS:*",
            "REPORT:*",
        ],
        _ => &[],
    }
}

/// A row that was created, updated or soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub kind: EntityKind,
    pub id: i64,
    pub scopes: Vec<(Scope, i64)>,
}

impl EntityChange {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self {
            kind,
            id,
            scopes: Vec::new(),
        }
    }

    pub fn of<T: Entity>(entity: &T) -> Self {
        Self {
            kind: T::KIND,
            id: entity.id(),
            scopes: entity.scopes(),
        }
    }

    pub fn with_scope(mut self, scope: Scope, id: i64) -> Self {
        self.scopes.push((scope, id));
        self
    }
}

/// Keys and patterns to delete after a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    keys: Vec<String>,
    patterns: Vec<String>,
}

impl InvalidationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan for a change to `entity`, including dependent kinds.
    pub fn for_entity<T: Entity>(entity: &T) -> Self {
        Self::for_change(&EntityChange::of(entity))
    }

    pub fn for_change(change: &EntityChange) -> Self {
        let mut plan = Self::new();
        let own = KeySpace::of(change.kind);

        plan.add_key(own.by_id(change.id));
        for (scope, id) in &change.scopes {
            plan.add_key(own.by_scope(*scope, *id));
        }
        plan.add_key_space(own);
        for &pattern in derived_patterns(change.kind) {
            plan.add_pattern(pattern);
        }

        for &dependent in dependents(change.kind) {
            let space = KeySpace::of(dependent);
            plan.add_key_space(space);

            for &scope in scopes_of(dependent) {
                for (changed_scope, id) in &change.scopes {
                    if *changed_scope == scope {
                        plan.add_key(space.by_scope(scope, *id));
                    }
                }
                if scope_target(scope) == Some(change.kind) {
                    plan.add_key(space.by_scope(scope, change.id));
                }
            }

            for (scope, id) in &change.scopes {
                if scope_target(*scope) == Some(dependent) {
                    plan.add_key(space.by_id(*id));
                }
            }
        }

        plan
    }

    /// Main key, list key and pattern of `space`.
    pub fn add_key_space(&mut self, space: KeySpace) -> &mut Self {
        self.add_key(space.main());
        self.add_key(space.list());
        self.add_pattern(space.pattern());
        self
    }

    /// Per-user views (`USER:{id}:*`) and notification feeds of `members`.
    pub fn add_member_views(&mut self, members: &[i64]) -> &mut Self {
        for id in members {
            self.add_pattern(format!("USER:{id}:*"));
            self.add_pattern(format!("NOTIFICATIONS:USER:{id}:*"));
        }
        self
    }

    pub fn add_key(&mut self, key: impl Into<String>) -> &mut Self {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self
    }

    pub fn add_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        let pattern = pattern.into();
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    pub fn merge(&mut self, other: InvalidationPlan) -> &mut Self {
        for key in other.keys {
            self.add_key(key);
        }
        for pattern in other.patterns {
            self.add_pattern(pattern);
        }
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    /// Whether executing this plan removes `key`.
    pub fn covers(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key) || self.patterns.iter().any(|p| glob_match(p, key))
    }

    /// Run the plan against `store`. Failures are logged by the store.
    pub async fn execute(&self, store: &CacheStore) {
        store.delete_many(&self.keys).await;
        for pattern in &self.patterns {
            store.delete_by_pattern(pattern).await;
        }
        tracing::debug!(
            keys = self.keys.len(),
            patterns = self.patterns.len(),
            "invalidation plan executed"
        );
    }
}
