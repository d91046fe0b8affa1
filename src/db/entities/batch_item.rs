//! Batch item entity (one file within a batch job)

use sea_orm::entity::prelude::*;

pub const STATUS_PENDING: i32 = 0;
pub const STATUS_IN_PROGRESS: i32 = 1;
pub const STATUS_COMPLETED: i32 = 2;
pub const STATUS_FAILED: i32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "batch_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub job_id: i64,
    pub file_name: String,
    pub file_id: Option<i64>, // set once the transfer created a file row
    pub status: i32,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::batch_job::Entity",
        from = "Column::JobId",
        to = "super::batch_job::Column::Id"
    )]
    Job,
}

impl Related<super::batch_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
