//! Business entities that flow through the cache layer.
//!
//! Only the columns the caching services read are modelled here; the rest of
//! each row lives in the relational store untouched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, EntityMeta, Scope};

/// Role names assigned to users.
pub mod roles {
    pub const ADMIN: &str = "Administrator";
    pub const USER: &str = "User";
    pub const CONSTRUCTION_EMPLOYEE: &str = "Construction Employee";
    pub const BUSINESS_EMPLOYEE: &str = "Business Employee";
    pub const TECHNICAL_MANAGER: &str = "Technical Manager";
    pub const QUALITY_ASSURANCE: &str = "Quality Assurance";
    pub const EXECUTIVE_BOARD: &str = "Executive Board";
    pub const HEAD_OF_CONSTRUCTION_TEAM: &str = "Head of Construction Team";
    pub const RESOURCE_MANAGER: &str = "Resource Manager";

    pub const VALID: [&str; 9] = [
        ADMIN,
        USER,
        CONSTRUCTION_EMPLOYEE,
        BUSINESS_EMPLOYEE,
        TECHNICAL_MANAGER,
        QUALITY_ASSURANCE,
        EXECUTIVE_BOARD,
        HEAD_OF_CONSTRUCTION_TEAM,
        RESOURCE_MANAGER,
    ];

    pub fn is_valid(role: &str) -> bool {
        VALID.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    pub role: String,
    #[serde(default)]
    pub is_verify: bool,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProjectStatus {
    #[default]
    ReceiveRequest,
    Planning,
    InProgress,
    Completed,
    Paused,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    pub project_code: String,
    pub project_name: String,
    pub customer_id: i64,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub budget: f64,
    /// Users assigned to the project. The user side of the relation is not
    /// embedded, so the graph stays acyclic.
    #[serde(default)]
    pub member_ids: Vec<i64>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn scopes(&self) -> Vec<(Scope, i64)> {
        self.member_ids.iter().map(|id| (Scope::User, *id)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    #[serde(default)]
    pub id: i64,
    pub license_plate: String,
    pub brand: String,
    #[serde(default)]
    pub vehicle_type: i32,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub driver: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Entity for Vehicle {
    const KIND: EntityKind = EntityKind::Vehicle;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn scopes(&self) -> Vec<(Scope, i64)> {
        vec![(Scope::Type, i64::from(self.vehicle_type))]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConstructionLogStatus {
    #[default]
    WaitingForApproval,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionLog {
    #[serde(default)]
    pub id: i64,
    pub project_id: i64,
    pub log_code: String,
    pub log_name: String,
    pub log_date: NaiveDate,
    #[serde(default)]
    pub status: ConstructionLogStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Entity for ConstructionLog {
    const KIND: EntityKind = EntityKind::ConstructionLog;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn scopes(&self) -> Vec<(Scope, i64)> {
        vec![(Scope::Project, self.project_id)]
    }
}
