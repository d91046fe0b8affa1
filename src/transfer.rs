//! Transfer orchestrator: the upload/download state machine.
//!
//! Decides whether a file needs chunking, drives the per-part loop with
//! pacing between remote calls, and reconstructs files either from ledger
//! rows or by scanning recent channel history when no local bookkeeping
//! applies. All remote failures arrive here already translated into the
//! abstract `TransferError` kinds; nothing in this module retries.

use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};

use crate::chunk::{self, ChunkRange};
use crate::config::TransferConfig;
use crate::db::entities::file_part;
use crate::db::entities::stored_file::{self, KIND_CHUNKED, KIND_SINGLE};
use crate::error::{Result, TransferError};
use crate::history::OperationDetails;
use crate::ledger::{Ledger, NewFile};
use crate::remote::{ChannelClient, RemoteAttachment, RemoteMessage};

/// What the HTTP layer gets back from a finished upload.
#[derive(Clone, Debug)]
pub struct StoredFileHandle {
    pub file_id: i64,
    pub share_id: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    ledger: Ledger,
    client: Arc<dyn ChannelClient>,
}

impl Orchestrator {
    pub fn new(ledger: Ledger, client: Arc<dyn ChannelClient>) -> Self {
        Self { ledger, client }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // -- upload -----------------------------------------------------------

    /// Stores one file in the destination channel, chunking it when it
    /// exceeds the threshold. The file row is created incomplete before any
    /// network call and flipped complete only once every remote write has
    /// been acknowledged; a part failure aborts the whole file and leaves
    /// earlier parts orphaned in the channel.
    pub async fn upload(
        &self,
        cfg: &TransferConfig,
        channel_ref: &str,
        credential: &str,
        data: Bytes,
        filename: &str,
        content_type: &str,
    ) -> Result<StoredFileHandle> {
        let size = data.len() as u64;
        if size == 0 {
            return Err(TransferError::InvalidRequest("empty upload".to_string()));
        }
        if size > cfg.max_file_size {
            return Err(TransferError::InvalidRequest(format!(
                "file is {} bytes, limit is {}",
                size, cfg.max_file_size
            )));
        }

        let channel = self.ledger.resolve_channel(channel_ref).await?;

        // Strictly greater than the threshold; a file exactly at it stays single.
        let chunked = size > cfg.chunk_threshold;
        let file = self
            .ledger
            .create_file(NewFile {
                name: filename.to_string(),
                original_name: filename.to_string(),
                size,
                content_type: content_type.to_string(),
                kind: if chunked { KIND_CHUNKED } else { KIND_SINGLE },
                channel_id: channel.id,
            })
            .await?;

        let parts = if chunked {
            let count = self
                .upload_chunked(cfg, &channel.remote_id, credential, file.id, &data, filename)
                .await?;
            self.ledger.mark_file_complete(file.id, None).await?;
            count
        } else {
            let receipt = self
                .client
                .upload_attachment(&channel.remote_id, credential, data, filename, content_type)
                .await?;
            self.ledger
                .mark_file_complete(file.id, Some(receipt.message_id))
                .await?;
            1
        };

        tracing::info!(
            file_id = file.id,
            size,
            parts,
            chunked,
            "upload complete: {}",
            filename
        );

        self.ledger
            .record_history(&OperationDetails::Upload {
                file_id: file.id,
                size,
                parts,
            })
            .await?;

        Ok(StoredFileHandle {
            file_id: file.id,
            share_id: file.share_id,
        })
    }

    async fn upload_chunked(
        &self,
        cfg: &TransferConfig,
        channel: &str,
        credential: &str,
        file_id: i64,
        data: &Bytes,
        base: &str,
    ) -> Result<u32> {
        let ranges = chunk::split(data.len() as u64, cfg.chunk_size);

        if cfg.upload_concurrency <= 1 {
            for range in &ranges {
                if range.seq > 1 && cfg.part_pace_ms > 0 {
                    tokio::time::sleep(cfg.part_pace()).await;
                }
                self.upload_one_part(channel, credential, file_id, data, *range, base)
                    .await?;
            }
        } else {
            // Pacing is the sequential mode's throttle; with several parts
            // in flight the concurrency bound itself limits request rate.
            // The futures are collected up front so the stream owns them and
            // the whole upload stays spawnable.
            let part_uploads: Vec<_> = ranges
                .iter()
                .map(|range| self.upload_one_part(channel, credential, file_id, data, *range, base))
                .collect();
            stream::iter(part_uploads)
                .buffered(cfg.upload_concurrency)
                .try_collect::<Vec<()>>()
                .await?;
        }

        Ok(ranges.len() as u32)
    }

    async fn upload_one_part(
        &self,
        channel: &str,
        credential: &str,
        file_id: i64,
        data: &Bytes,
        range: ChunkRange,
        base: &str,
    ) -> Result<()> {
        let part_id = self.ledger.create_part(file_id, range.seq, range.len).await?;
        let payload = data.slice(range.offset as usize..(range.offset + range.len) as usize);
        let name = chunk::part_name(base, range.seq);

        let receipt = self
            .client
            .upload_attachment(channel, credential, payload, &name, "application/octet-stream")
            .await?;

        self.ledger
            .mark_part_complete(part_id, receipt.message_id, receipt.attachment_url)
            .await?;

        tracing::debug!(file_id, seq = range.seq, len = range.len, "part stored");
        Ok(())
    }

    // -- download ---------------------------------------------------------

    /// Reconstructs a ledger-known file. Chunked files prefer stored part
    /// references and fall back to scanning channel history; single files
    /// are matched by exact attachment name in recent messages.
    pub async fn download(
        &self,
        cfg: &TransferConfig,
        credential: &str,
        file: &stored_file::Model,
    ) -> Result<(Bytes, String)> {
        let channel = self.ledger.get_channel(file.channel_id).await?;

        let (data, via_scan) = if file.kind == KIND_CHUNKED {
            // Part rows are only authoritative once the whole upload
            // finished; a torn upload's prefix must not be served as the file.
            let parts = self.ledger.parts_for_file(file.id).await?;
            if file.upload_complete && ledger_parts_usable(&parts) {
                (self.fetch_ledger_parts(&parts).await?, false)
            } else {
                let data = self
                    .scan_download(cfg, &channel.remote_id, credential, &file.original_name)
                    .await?;
                (data, true)
            }
        } else {
            let messages = self
                .client
                .list_recent_messages(&channel.remote_id, credential, cfg.scan_limit)
                .await?;
            let attachment = find_exact(&messages, &file.original_name).ok_or_else(|| {
                TransferError::NotFound(format!(
                    "attachment {} not in the most recent {} messages",
                    file.original_name, cfg.scan_limit
                ))
            })?;
            (self.client.fetch_bytes(&attachment.url).await?, false)
        };

        if (data.len() as i64) < file.size {
            // The channel no longer holds every expected part.
            return Err(TransferError::NotFound(format!(
                "reassembled only {} of {} bytes of {}",
                data.len(),
                file.size,
                file.original_name
            )));
        }
        if data.len() as i64 != file.size {
            return Err(TransferError::Remote(format!(
                "reassembled {} bytes, expected {}",
                data.len(),
                file.size
            )));
        }

        self.ledger
            .record_history(&OperationDetails::Download {
                file_id: file.id,
                size: data.len() as u64,
                via_scan,
            })
            .await?;

        Ok((data, file.content_type.clone()))
    }

    /// Pure-scan retrieval for files with no local rows at all: exact name
    /// first, then the part scan.
    pub async fn download_by_name(
        &self,
        cfg: &TransferConfig,
        channel_ref: &str,
        credential: &str,
        filename: &str,
    ) -> Result<Bytes> {
        let messages = self
            .client
            .list_recent_messages(channel_ref, credential, cfg.scan_limit)
            .await?;

        if let Some(attachment) = find_exact(&messages, filename) {
            return self.client.fetch_bytes(&attachment.url).await;
        }

        let found = collect_scanned_parts(&messages, filename);
        ensure_contiguous(&found, filename, cfg.scan_limit)?;
        self.fetch_scanned_parts(&found).await
    }

    async fn scan_download(
        &self,
        cfg: &TransferConfig,
        channel: &str,
        credential: &str,
        base: &str,
    ) -> Result<Bytes> {
        let messages = self
            .client
            .list_recent_messages(channel, credential, cfg.scan_limit)
            .await?;
        let found = collect_scanned_parts(&messages, base);
        ensure_contiguous(&found, base, cfg.scan_limit)?;
        self.fetch_scanned_parts(&found).await
    }

    async fn fetch_ledger_parts(&self, parts: &[file_part::Model]) -> Result<Bytes> {
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            let url = part.attachment_url.as_deref().ok_or_else(|| {
                TransferError::NotFound(format!("part {} has no stored attachment", part.seq))
            })?;
            pieces.push(self.client.fetch_bytes(url).await?);
        }
        Ok(chunk::join(pieces))
    }

    async fn fetch_scanned_parts(&self, found: &[(u32, RemoteAttachment)]) -> Result<Bytes> {
        let mut pieces = Vec::with_capacity(found.len());
        for (_, attachment) in found {
            pieces.push(self.client.fetch_bytes(&attachment.url).await?);
        }
        Ok(chunk::join(pieces))
    }
}

/// Ledger rows are only trusted when they form a complete contiguous run
/// starting at 1 with stored attachment references; anything else falls
/// back to the scan.
fn ledger_parts_usable(parts: &[file_part::Model]) -> bool {
    !parts.is_empty()
        && parts.iter().enumerate().all(|(i, p)| {
            p.seq == (i + 1) as i32 && p.upload_complete && p.attachment_url.is_some()
        })
}

fn find_exact<'a>(messages: &'a [RemoteMessage], filename: &str) -> Option<&'a RemoteAttachment> {
    messages
        .iter()
        .flat_map(|m| m.attachments.iter())
        .find(|a| a.filename == filename)
}

/// Filters attachments named `{base}.partN`, sorted ascending by the parsed
/// numeric suffix (never lexically, which would put part10 before part2).
/// Listing order is newest-first, so the first occurrence of a sequence
/// number wins when a part was re-posted.
fn collect_scanned_parts(
    messages: &[RemoteMessage],
    base: &str,
) -> Vec<(u32, RemoteAttachment)> {
    let mut found: Vec<(u32, RemoteAttachment)> = Vec::new();
    for message in messages {
        for attachment in &message.attachments {
            if let Some(seq) = chunk::parse_part_seq(&attachment.filename, base) {
                if !found.iter().any(|(s, _)| *s == seq) {
                    found.push((seq, attachment.clone()));
                }
            }
        }
    }
    found.sort_by_key(|(seq, _)| *seq);
    found
}

fn ensure_contiguous(
    found: &[(u32, RemoteAttachment)],
    base: &str,
    scan_limit: u8,
) -> Result<()> {
    if found.is_empty() {
        return Err(TransferError::NotFound(format!(
            "no parts of {} found in the channel",
            base
        )));
    }
    for (i, (seq, _)) in found.iter().enumerate() {
        let expected = (i + 1) as u32;
        if *seq != expected {
            // Parts posted before the listing window can no longer be seen;
            // surface that rather than returning a corrupt reassembly.
            return Err(TransferError::NotFound(format!(
                "part {} of {} is missing; it may have aged out of the {}-message listing window",
                expected, base, scan_limit
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::init_memory_database;
    use crate::testutil::MockClient;

    async fn setup(fail_on_call: Option<usize>) -> (Orchestrator, Arc<MockClient>) {
        let ledger = Ledger::new(init_memory_database().await.unwrap());
        let client = Arc::new(MockClient::new(fail_on_call));
        (
            Orchestrator::new(ledger, client.clone() as Arc<dyn ChannelClient>),
            client,
        )
    }

    fn small_cfg() -> TransferConfig {
        TransferConfig {
            chunk_size: 4,
            chunk_threshold: 4,
            part_pace_ms: 0,
            ..Default::default()
        }
    }

    const OCTET: &str = "application/octet-stream";

    #[tokio::test]
    async fn small_file_takes_the_single_path() {
        let (orchestrator, client) = setup(None).await;
        let cfg = TransferConfig::default();
        let data = Bytes::from(vec![7u8; 1024]);

        let handle = orchestrator
            .upload(&cfg, "chan", "Bearer t", data.clone(), "note.txt", "text/plain")
            .await
            .unwrap();

        let file = orchestrator.ledger().get_file(handle.file_id).await.unwrap();
        assert_eq!(file.kind, KIND_SINGLE);
        assert!(file.upload_complete);
        assert!(file.remote_message_id.is_some());
        assert_eq!(client.upload_calls(), 1);

        let (fetched, content_type) = orchestrator.download(&cfg, "Bearer t", &file).await.unwrap();
        assert_eq!(fetched, data);
        assert_eq!(content_type, "text/plain");
    }

    #[tokio::test]
    async fn file_at_threshold_is_not_chunked_but_one_byte_more_is() {
        let (orchestrator, _) = setup(None).await;
        let cfg = small_cfg();

        let at = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from(vec![1u8; 4]), "at.bin", OCTET)
            .await
            .unwrap();
        let over = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from(vec![1u8; 5]), "over.bin", OCTET)
            .await
            .unwrap();

        let at_file = orchestrator.ledger().get_file(at.file_id).await.unwrap();
        let over_file = orchestrator.ledger().get_file(over.file_id).await.unwrap();
        assert_eq!(at_file.kind, KIND_SINGLE);
        assert_eq!(over_file.kind, KIND_CHUNKED);

        let parts = orchestrator.ledger().parts_for_file(over.file_id).await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].size, 1);
    }

    #[tokio::test]
    async fn large_file_round_trips_through_three_parts() {
        let (orchestrator, client) = setup(None).await;
        let cfg = small_cfg();
        // 2.5 chunks
        let data: Bytes = (0..10u8).collect::<Vec<u8>>().into();

        let handle = orchestrator
            .upload(&cfg, "chan", "t", data.clone(), "big.bin", OCTET)
            .await
            .unwrap();

        let file = orchestrator.ledger().get_file(handle.file_id).await.unwrap();
        assert_eq!(file.kind, KIND_CHUNKED);
        assert!(file.upload_complete);
        assert_eq!(client.upload_calls(), 3);

        let parts = orchestrator.ledger().parts_for_file(file.id).await.unwrap();
        let sizes: Vec<i64> = parts.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(parts.iter().all(|p| p.upload_complete));

        let (fetched, _) = orchestrator.download(&cfg, "t", &file).await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn failed_part_aborts_the_upload_without_attempting_later_parts() {
        // 3 parts; the second upload call is made to fail.
        let (orchestrator, client) = setup(Some(2)).await;
        let cfg = small_cfg();
        let data = Bytes::from(vec![9u8; 10]);

        let result = orchestrator
            .upload(&cfg, "chan", "t", data, "doomed.bin", OCTET)
            .await;
        assert!(matches!(result, Err(TransferError::Remote(_))));
        assert_eq!(client.upload_calls(), 2);

        // The file row exists but was never marked complete.
        let file = orchestrator.ledger().get_file(1).await.unwrap();
        assert!(!file.upload_complete);

        // Part 1 completed, part 2 stayed incomplete, part 3 was never created.
        let parts = orchestrator.ledger().parts_for_file(file.id).await.unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].upload_complete);
        assert!(!parts[1].upload_complete);
    }

    #[tokio::test]
    async fn concurrent_upload_mode_still_round_trips() {
        let (orchestrator, _) = setup(None).await;
        let cfg = TransferConfig {
            upload_concurrency: 3,
            ..small_cfg()
        };
        let data: Bytes = (0..20u8).collect::<Vec<u8>>().into();

        let handle = orchestrator
            .upload(&cfg, "chan", "t", data.clone(), "wide.bin", OCTET)
            .await
            .unwrap();

        let file = orchestrator.ledger().get_file(handle.file_id).await.unwrap();
        let (fetched, _) = orchestrator.download(&cfg, "t", &file).await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn concurrent_upload_is_spawnable_as_a_background_task() {
        let (orchestrator, _) = setup(None).await;
        let cfg = TransferConfig {
            upload_concurrency: 3,
            ..small_cfg()
        };
        let data: Bytes = (0..12u8).collect::<Vec<u8>>().into();

        let handle = tokio::spawn(async move {
            orchestrator
                .upload(&cfg, "chan", "t", data, "spawned.bin", OCTET)
                .await
        })
        .await
        .unwrap()
        .unwrap();
        assert!(handle.file_id > 0);
    }

    #[tokio::test]
    async fn interrupted_chunked_upload_downloads_as_not_found() {
        // Part 2 of 3 fails, leaving a truncated prefix in the channel and
        // an incomplete file row in the ledger.
        let (orchestrator, _) = setup(Some(2)).await;
        let cfg = small_cfg();
        let upload = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from(vec![5u8; 10]), "torn.bin", OCTET)
            .await;
        assert!(upload.is_err());

        let file = orchestrator.ledger().get_file(1).await.unwrap();
        assert!(!file.upload_complete);

        let result = orchestrator.download(&cfg, "t", &file).await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn scan_fallback_reorders_parts_found_out_of_order() {
        let (orchestrator, client) = setup(None).await;
        let cfg = small_cfg();

        // Listing order ends up 2, 3, 1 (newest first); reassembly must be 1, 2, 3.
        client.seed_message("report.part1", b"AAAA");
        client.seed_message("report.part3", b"CC");
        client.seed_message("report.part2", b"BBBB");

        let data = orchestrator
            .download_by_name(&cfg, "chan", "t", "report")
            .await
            .unwrap();
        assert_eq!(data.as_ref(), b"AAAABBBBCC");
    }

    #[tokio::test]
    async fn scan_orders_numerically_not_lexically() {
        let messages: Vec<RemoteMessage> = ["f.part10", "f.part2", "f.part1", "f.part11"]
            .iter()
            .map(|name| RemoteMessage {
                message_id: name.to_string(),
                attachments: vec![RemoteAttachment {
                    filename: name.to_string(),
                    url: format!("mock://{}", name),
                    size: 1,
                }],
            })
            .collect();

        let found = collect_scanned_parts(&messages, "f");
        let seqs: Vec<u32> = found.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 2, 10, 11]);
    }

    #[tokio::test]
    async fn scan_with_no_parts_is_not_found() {
        let (orchestrator, client) = setup(None).await;
        client.seed_message("unrelated.txt", b"x");

        let result = orchestrator
            .download_by_name(&small_cfg(), "chan", "t", "ghost.bin")
            .await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn scan_with_a_sequence_gap_names_the_listing_window() {
        let (orchestrator, client) = setup(None).await;
        client.seed_message("old.part2", b"BB");
        client.seed_message("old.part3", b"CC");

        let result = orchestrator
            .download_by_name(&small_cfg(), "chan", "t", "old")
            .await;
        match result {
            Err(TransferError::NotFound(msg)) => {
                assert!(msg.contains("listing window"), "message was: {}", msg)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_any_remote_call() {
        let (orchestrator, client) = setup(None).await;
        let result = orchestrator
            .upload(&small_cfg(), "chan", "t", Bytes::new(), "empty.bin", OCTET)
            .await;
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
        assert_eq!(client.upload_calls(), 0);
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected() {
        let (orchestrator, _) = setup(None).await;
        let cfg = TransferConfig {
            max_file_size: 8,
            ..small_cfg()
        };
        let result = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from(vec![0u8; 9]), "fat.bin", OCTET)
            .await;
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }
}
