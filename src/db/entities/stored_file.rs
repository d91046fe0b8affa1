//! Logical file entity (one row per user-visible file)

use sea_orm::entity::prelude::*;

/// Stored in one remote message.
pub const KIND_SINGLE: i32 = 0;
/// Split into ordered part attachments.
pub const KIND_CHUNKED: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "stored_files")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub share_id: String, // random opaque token for public links
    pub name: String,
    pub original_name: String,
    pub size: i64,
    pub content_type: String,
    pub kind: i32,             // 0=single, 1=chunked
    pub upload_complete: bool, // flipped only after every remote write succeeded
    pub remote_message_id: Option<String>, // set only when kind=single
    pub public: bool,
    pub channel_id: i64,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::channel::Entity",
        from = "Column::ChannelId",
        to = "super::channel::Column::Id"
    )]
    Channel,
    #[sea_orm(has_many = "super::file_part::Entity")]
    Parts,
}

impl Related<super::channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Channel.def()
    }
}

impl Related<super::file_part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Parts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
