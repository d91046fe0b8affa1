//! Transfer history entity (one row per completed operation)

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "transfer_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub file_id: Option<i64>,
    pub op: String,      // tag of the details union, denormalized for queries
    pub details: String, // JSON-encoded OperationDetails
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
