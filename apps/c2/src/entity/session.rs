//! Session entity: the lifetime of one node registration.
//!
//! The platform fingerprint a node reports at registration is denormalized
//! into columns. Timestamps are RFC 3339 UTC strings, which keeps time
//! window filters plain lexicographic comparisons.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "session")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub session_start: String,
    /// NULL while the session is active.
    pub session_end: Option<String>,
    pub env_ip: String,
    pub env_port: i32,
    pub env_platform: String,
    pub env_node: String,
    pub env_os_system: String,
    pub env_os_release: String,
    pub env_os_version: String,
    pub env_hw_machine: String,
    pub env_hw_processor: String,
    pub env_rt_build_no: String,
    pub env_rt_build_date: String,
    pub env_rt_compiler: String,
    pub env_rt_implementation: String,
    pub env_rt_version: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::execution::Entity")]
    Executions,
}

impl Related<super::execution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Executions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
