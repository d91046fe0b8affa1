//! File/Part ledger: the persistence contract the orchestrator drives.
//!
//! Pure CRUD over the SeaORM entities, with one guarantee the orchestrator
//! relies on: part reads come back ordered by sequence number, not insertion
//! order. Each part row is committed independently as its upload completes,
//! so a crash mid-upload leaves a ledger that reflects exactly which parts
//! reached the remote store.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::db::entities::{
    batch_item, batch_job, channel, file_part, stored_file, transfer_log, BatchItem, BatchJob,
    Channel, FilePart, StoredFile,
};
use crate::db::unix_now;
use crate::error::{Result, TransferError};
use crate::history::OperationDetails;

/// Metadata for a new logical file row, created before any network call.
pub struct NewFile {
    pub name: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub kind: i32,
    pub channel_id: i64,
}

#[derive(Clone)]
pub struct Ledger {
    db: DatabaseConnection,
}

impl Ledger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    // -- channels ---------------------------------------------------------

    /// Pure lookup by remote destination; creates and touches nothing.
    pub async fn find_channel(&self, remote_id: &str) -> Result<Option<channel::Model>> {
        Ok(Channel::find()
            .filter(channel::Column::RemoteId.eq(remote_id))
            .one(&self.db)
            .await?)
    }

    /// Finds the cached channel for a remote destination, creating it on
    /// first use. Touches `last_used_at` either way.
    pub async fn resolve_channel(&self, remote_id: &str) -> Result<channel::Model> {
        if let Some(existing) = self.find_channel(remote_id).await? {
            let mut active: channel::ActiveModel = existing.into();
            active.last_used_at = Set(unix_now());
            return Ok(active.update(&self.db).await?);
        }

        let active = channel::ActiveModel {
            remote_id: Set(remote_id.to_string()),
            name: Set(None),
            last_used_at: Set(unix_now()),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?)
    }

    pub async fn get_channel(&self, channel_id: i64) -> Result<channel::Model> {
        Channel::find_by_id(channel_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| TransferError::NotFound(format!("channel {}", channel_id)))
    }

    // -- files ------------------------------------------------------------

    pub async fn create_file(&self, meta: NewFile) -> Result<stored_file::Model> {
        let active = stored_file::ActiveModel {
            share_id: Set(Uuid::new_v4().simple().to_string()),
            name: Set(meta.name),
            original_name: Set(meta.original_name),
            size: Set(meta.size as i64),
            content_type: Set(meta.content_type),
            kind: Set(meta.kind),
            upload_complete: Set(false),
            remote_message_id: Set(None),
            public: Set(false),
            channel_id: Set(meta.channel_id),
            created_at: Set(unix_now()),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?)
    }

    /// Flips `upload_complete` once every required remote write succeeded.
    /// `remote_message_id` is present only for single-message files.
    pub async fn mark_file_complete(
        &self,
        file_id: i64,
        remote_message_id: Option<String>,
    ) -> Result<()> {
        let active = stored_file::ActiveModel {
            id: Set(file_id),
            upload_complete: Set(true),
            remote_message_id: Set(remote_message_id),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: i64) -> Result<stored_file::Model> {
        StoredFile::find_by_id(file_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| TransferError::NotFound(format!("file {}", file_id)))
    }

    pub async fn get_file_by_share_id(&self, share_id: &str) -> Result<stored_file::Model> {
        StoredFile::find()
            .filter(stored_file::Column::ShareId.eq(share_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| TransferError::NotFound("shared file".to_string()))
    }

    pub async fn list_files(&self, channel_id: i64) -> Result<Vec<stored_file::Model>> {
        Ok(StoredFile::find()
            .filter(stored_file::Column::ChannelId.eq(channel_id))
            .order_by_desc(stored_file::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn set_file_visibility(&self, file_id: i64, public: bool) -> Result<()> {
        let active = stored_file::ActiveModel {
            id: Set(file_id),
            public: Set(public),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        FilePart::delete_many()
            .filter(file_part::Column::FileId.eq(file_id))
            .exec(&self.db)
            .await?;
        StoredFile::delete_by_id(file_id).exec(&self.db).await?;
        Ok(())
    }

    // -- parts ------------------------------------------------------------

    /// Creates the part row immediately before that chunk's upload attempt.
    pub async fn create_part(&self, file_id: i64, seq: u32, size: u64) -> Result<i64> {
        let active = file_part::ActiveModel {
            file_id: Set(file_id),
            seq: Set(seq as i32),
            size: Set(size as i64),
            remote_message_id: Set(None),
            attachment_url: Set(None),
            upload_complete: Set(false),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?.id)
    }

    pub async fn mark_part_complete(
        &self,
        part_id: i64,
        remote_message_id: String,
        attachment_url: String,
    ) -> Result<()> {
        let active = file_part::ActiveModel {
            id: Set(part_id),
            remote_message_id: Set(Some(remote_message_id)),
            attachment_url: Set(Some(attachment_url)),
            upload_complete: Set(true),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    /// Parts ordered by sequence number, never by insertion order.
    pub async fn parts_for_file(&self, file_id: i64) -> Result<Vec<file_part::Model>> {
        Ok(FilePart::find()
            .filter(file_part::Column::FileId.eq(file_id))
            .order_by_asc(file_part::Column::Seq)
            .all(&self.db)
            .await?)
    }

    // -- batches ----------------------------------------------------------

    pub async fn create_batch_job(&self, kind: i32, total: u32) -> Result<batch_job::Model> {
        let active = batch_job::ActiveModel {
            kind: Set(kind),
            total: Set(total as i32),
            completed: Set(0),
            status: Set(crate::batch::JobStatus::Pending as i32),
            created_at: Set(unix_now()),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?)
    }

    pub async fn create_batch_item(&self, job_id: i64, file_name: &str) -> Result<i64> {
        let active = batch_item::ActiveModel {
            job_id: Set(job_id),
            file_name: Set(file_name.to_string()),
            file_id: Set(None),
            status: Set(batch_item::STATUS_PENDING),
            error: Set(None),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?.id)
    }

    pub async fn mark_item_in_progress(&self, item_id: i64) -> Result<()> {
        let active = batch_item::ActiveModel {
            id: Set(item_id),
            status: Set(batch_item::STATUS_IN_PROGRESS),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn mark_item_completed(&self, item_id: i64, file_id: i64) -> Result<()> {
        let active = batch_item::ActiveModel {
            id: Set(item_id),
            file_id: Set(Some(file_id)),
            status: Set(batch_item::STATUS_COMPLETED),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn mark_item_failed(&self, item_id: i64, error: &str) -> Result<()> {
        let active = batch_item::ActiveModel {
            id: Set(item_id),
            status: Set(batch_item::STATUS_FAILED),
            error: Set(Some(error.to_string())),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn update_job_progress(
        &self,
        job_id: i64,
        completed: u32,
        status: i32,
    ) -> Result<()> {
        let active = batch_job::ActiveModel {
            id: Set(job_id),
            completed: Set(completed as i32),
            status: Set(status),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn get_batch_job(
        &self,
        job_id: i64,
    ) -> Result<(batch_job::Model, Vec<batch_item::Model>)> {
        let job = BatchJob::find_by_id(job_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| TransferError::NotFound(format!("batch job {}", job_id)))?;
        let items = BatchItem::find()
            .filter(batch_item::Column::JobId.eq(job_id))
            .order_by_asc(batch_item::Column::Id)
            .all(&self.db)
            .await?;
        Ok((job, items))
    }

    // -- history ----------------------------------------------------------

    pub async fn record_history(&self, details: &OperationDetails) -> Result<()> {
        let active = transfer_log::ActiveModel {
            file_id: Set(details.file_id()),
            op: Set(details.op_name().to_string()),
            details: Set(serde_json::to_string(details)
                .map_err(|e| TransferError::InvalidRequest(e.to_string()))?),
            created_at: Set(unix_now()),
            ..Default::default()
        };
        active.insert(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::stored_file::KIND_CHUNKED;
    use crate::db::init_memory_database;

    async fn test_ledger() -> Ledger {
        Ledger::new(init_memory_database().await.unwrap())
    }

    fn meta(channel_id: i64) -> NewFile {
        NewFile {
            name: "data.bin".to_string(),
            original_name: "data.bin".to_string(),
            size: 100,
            content_type: "application/octet-stream".to_string(),
            kind: KIND_CHUNKED,
            channel_id,
        }
    }

    #[tokio::test]
    async fn parts_come_back_in_sequence_order() {
        let ledger = test_ledger().await;
        let channel = ledger.resolve_channel("c1").await.unwrap();
        let file = ledger.create_file(meta(channel.id)).await.unwrap();

        // Insert out of order on purpose
        for seq in [3u32, 1, 2] {
            ledger.create_part(file.id, seq, 10).await.unwrap();
        }

        let parts = ledger.parts_for_file(file.id).await.unwrap();
        let seqs: Vec<i32> = parts.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn find_channel_never_creates_rows() {
        let ledger = test_ledger().await;
        assert!(ledger.find_channel("ghost").await.unwrap().is_none());
        // Still absent after the failed lookup
        assert!(ledger.find_channel("ghost").await.unwrap().is_none());

        let created = ledger.resolve_channel("ghost").await.unwrap();
        let found = ledger.find_channel("ghost").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn resolve_channel_is_idempotent_and_touches_last_used() {
        let ledger = test_ledger().await;
        let first = ledger.resolve_channel("chan-9").await.unwrap();
        let second = ledger.resolve_channel("chan-9").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.last_used_at >= first.last_used_at);
    }

    #[tokio::test]
    async fn share_id_lookup_finds_the_file() {
        let ledger = test_ledger().await;
        let channel = ledger.resolve_channel("c1").await.unwrap();
        let file = ledger.create_file(meta(channel.id)).await.unwrap();
        assert!(!file.share_id.is_empty());

        let found = ledger.get_file_by_share_id(&file.share_id).await.unwrap();
        assert_eq!(found.id, file.id);

        let missing = ledger.get_file_by_share_id("nope").await;
        assert!(matches!(missing, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn mark_part_complete_sets_remote_reference() {
        let ledger = test_ledger().await;
        let channel = ledger.resolve_channel("c1").await.unwrap();
        let file = ledger.create_file(meta(channel.id)).await.unwrap();
        let part_id = ledger.create_part(file.id, 1, 10).await.unwrap();

        ledger
            .mark_part_complete(part_id, "m1".to_string(), "https://cdn/x".to_string())
            .await
            .unwrap();

        let parts = ledger.parts_for_file(file.id).await.unwrap();
        assert!(parts[0].upload_complete);
        assert_eq!(parts[0].remote_message_id.as_deref(), Some("m1"));
        assert_eq!(parts[0].attachment_url.as_deref(), Some("https://cdn/x"));
    }
}
