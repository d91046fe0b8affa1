//! Batch job entity (groups N file transfers under one id)

use sea_orm::entity::prelude::*;

pub const KIND_UPLOAD: i32 = 0;
pub const KIND_DOWNLOAD: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "batch_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: i32, // 0=upload, 1=download
    pub total: i32,
    pub completed: i32, // items finished successfully so far
    pub status: i32,    // JobStatus, derived from item outcomes
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::batch_item::Entity")]
    Items,
}

impl Related<super::batch_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
