//! Cache key templates, one key space per entity kind.
//!
//! ```text
//! PROJECT                      main
//! PROJECT:LIST                 list
//! PROJECT:ID:7                 by id
//! CONSTRUCTION_LOG:PROJECT:7   by parent scope
//! VEHICLE:SEARCH:brand=Hino:…  search
//! PROJECT:*                    pattern
//! ```

use std::fmt::{Display, Write};

use buildtrack_core::{Entity, EntityKind, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySpace {
    kind: EntityKind,
}

impl KeySpace {
    pub const fn of(kind: EntityKind) -> Self {
        Self { kind }
    }

    pub const fn for_entity<T: Entity>() -> Self {
        Self::of(T::KIND)
    }

    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn main(&self) -> String {
        self.kind.namespace().to_string()
    }

    pub fn list(&self) -> String {
        format!("{}:LIST", self.kind)
    }

    pub fn by_id(&self, id: i64) -> String {
        format!("{}:ID:{id}", self.kind)
    }

    pub fn by_scope(&self, scope: Scope, id: i64) -> String {
        format!("{}:{}:{id}", self.kind, scope)
    }

    pub fn pattern(&self) -> String {
        format!("{}:*", self.kind)
    }

    pub fn search(&self) -> SearchKey {
        SearchKey::new(self.kind)
    }

    /// Parent scopes rows of this kind are listed under.
    pub fn scopes(&self) -> &'static [Scope] {
        scopes_of(self.kind)
    }
}

/// Parent scopes each kind's read paths list rows under.
pub const fn scopes_of(kind: EntityKind) -> &'static [Scope] {
    use EntityKind as K;
    match kind {
        K::Project => &[Scope::User],
        K::Contract | K::ContractDetail => &[Scope::Project],
        K::SiteSurvey => &[Scope::Project],
        K::ConstructionLog => &[Scope::Project],
        K::ConstructionPlan => &[Scope::Project],
        K::ConstructionProgress => &[Scope::Project, Scope::Plan],
        K::ConstructionTeam => &[Scope::User],
        K::InspectionReport => &[Scope::Project],
        K::Vehicle => &[Scope::Type],
        K::ResourceInventory => &[Scope::Project],
        K::MobilizationReq | K::AllocationReq => &[Scope::Project],
        K::ActionLog => &[Scope::User],
        K::Customer | K::Material | K::User => &[],
    }
}

/// The entity kind whose ids a scope refers to, if any.
pub const fn scope_target(scope: Scope) -> Option<EntityKind> {
    match scope {
        Scope::Project => Some(EntityKind::Project),
        Scope::User => Some(EntityKind::User),
        Scope::Plan => Some(EntityKind::ConstructionPlan),
        Scope::Type => None,
    }
}

/// Builder for `ENTITY:SEARCH:name=value:...` keys.
///
/// Parameters render in the order they are added; `None` renders as an
/// empty value so that absent filters still occupy their slot.
#[derive(Debug, Clone)]
pub struct SearchKey {
    key: String,
}

impl SearchKey {
    fn new(kind: EntityKind) -> Self {
        Self {
            key: format!("{kind}:SEARCH"),
        }
    }

    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        let _ = write!(self.key, ":{name}={value}");
        self
    }

    pub fn param_opt<V: Display>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self.param(name, ""),
        }
    }

    pub fn build(self) -> String {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_families() {
        let space = KeySpace::of(EntityKind::ConstructionLog);
        assert_eq!(space.main(), "CONSTRUCTION_LOG");
        assert_eq!(space.list(), "CONSTRUCTION_LOG:LIST");
        assert_eq!(space.by_id(3), "CONSTRUCTION_LOG:ID:3");
        assert_eq!(
            space.by_scope(Scope::Project, 7),
            "CONSTRUCTION_LOG:PROJECT:7"
        );
        assert_eq!(space.pattern(), "CONSTRUCTION_LOG:*");
    }

    #[test]
    fn search_key_keeps_caller_order() {
        let key = KeySpace::of(EntityKind::Vehicle)
            .search()
            .param("brand", "Hino")
            .param_opt::<i32>("status", None)
            .param("page", 1)
            .build();
        assert_eq!(key, "VEHICLE:SEARCH:brand=Hino:status=:page=1");
    }
}
