//! Entity kinds, parent scopes, and the common entity contract.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Every business entity type that owns a cache key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Contract,
    ContractDetail,
    Customer,
    SiteSurvey,
    ConstructionLog,
    ConstructionPlan,
    ConstructionProgress,
    ConstructionTeam,
    InspectionReport,
    Material,
    Vehicle,
    ResourceInventory,
    MobilizationReq,
    AllocationReq,
    ActionLog,
    User,
}

impl EntityKind {
    /// All kinds, in declaration order.
    pub const ALL: [EntityKind; 17] = [
        EntityKind::Project,
        EntityKind::Contract,
        EntityKind::ContractDetail,
        EntityKind::Customer,
        EntityKind::SiteSurvey,
        EntityKind::ConstructionLog,
        EntityKind::ConstructionPlan,
        EntityKind::ConstructionProgress,
        EntityKind::ConstructionTeam,
        EntityKind::InspectionReport,
        EntityKind::Material,
        EntityKind::Vehicle,
        EntityKind::ResourceInventory,
        EntityKind::MobilizationReq,
        EntityKind::AllocationReq,
        EntityKind::ActionLog,
        EntityKind::User,
    ];

    /// Upper-case namespace used as the cache key prefix and storage discriminator.
    pub const fn namespace(self) -> &'static str {
        match self {
            EntityKind::Project => "PROJECT",
            EntityKind::Contract => "CONTRACT",
            EntityKind::ContractDetail => "CONTRACT_DETAIL",
            EntityKind::Customer => "CUSTOMER",
            EntityKind::SiteSurvey => "SITE_SURVEY",
            EntityKind::ConstructionLog => "CONSTRUCTION_LOG",
            EntityKind::ConstructionPlan => "CONSTRUCTION_PLAN",
            EntityKind::ConstructionProgress => "CONSTRUCTION_PROGRESS",
            EntityKind::ConstructionTeam => "CONSTRUCTION_TEAM",
            EntityKind::InspectionReport => "INSPECTION_REPORT",
            EntityKind::Material => "MATERIAL",
            EntityKind::Vehicle => "VEHICLE",
            EntityKind::ResourceInventory => "RESOURCE_INVENTORY",
            EntityKind::MobilizationReq => "MOBILIZATION_REQ",
            EntityKind::AllocationReq => "ALLOCATION_REQ",
            EntityKind::ActionLog => "ACTION_LOG",
            EntityKind::User => "USER",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.namespace() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// A parent dimension that a row can be listed under (`CONTRACT:PROJECT:{id}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Project,
    User,
    Plan,
    Type,
}

impl Scope {
    pub const fn namespace(self) -> &'static str {
        match self {
            Scope::Project => "PROJECT",
            Scope::User => "USER",
            Scope::Plan => "PLAN",
            Scope::Type => "TYPE",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Audit columns carried by every persisted row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub creator: i64,
    #[serde(default)]
    pub updater: i64,
}

impl EntityMeta {
    /// Metadata for a freshly created row.
    pub fn created_by(actor: i64) -> Self {
        let now = Utc::now();
        Self {
            created_at: Some(now),
            updated_at: Some(now),
            deleted: false,
            creator: actor,
            updater: actor,
        }
    }

    /// Stamp an update by `actor`.
    pub fn touch(&mut self, actor: i64) {
        self.updated_at = Some(Utc::now());
        self.updater = actor;
    }

    /// Mark the row as soft-deleted by `actor`.
    pub fn soft_delete(&mut self, actor: i64) {
        self.deleted = true;
        self.touch(actor);
    }
}

/// Contract shared by every persisted business entity.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Parent scopes this row is listed under.
    fn scopes(&self) -> Vec<(Scope, i64)> {
        Vec::new()
    }

    fn is_deleted(&self) -> bool {
        self.meta().deleted
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta().updated_at
    }
}
