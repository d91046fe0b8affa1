//! Batch runner: drives the orchestrator over a list of files.
//!
//! Files are processed strictly one after another; a single file's failure
//! is recorded against its item and the batch proceeds, so the job ends in
//! a partial-success status rather than aborting siblings. Progress is
//! emitted after each item's outcome on an unbounded channel the caller
//! may subscribe to.

use std::path::Path;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::TransferConfig;
use crate::db::entities::stored_file;
use crate::error::{Result, TransferError};
use crate::history::OperationDetails;
use crate::transfer::{Orchestrator, StoredFileHandle};

/// Aggregate job state, derived from item outcomes and never set directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum JobStatus {
    Pending = 0,
    InProgress = 1,
    Completed = 2,
    CompletedWithErrors = 3,
    Failed = 4,
}

/// One input file for a batch upload.
pub struct BatchFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Progress notification emitted once per item outcome, then once at the end.
#[derive(Clone, Debug)]
pub enum BatchEvent {
    ItemStarted {
        job_id: i64,
        filename: String,
    },
    ItemFinished {
        job_id: i64,
        filename: String,
        result: std::result::Result<StoredFileHandle, String>,
    },
    Finished {
        job_id: i64,
        status: JobStatus,
        completed: u32,
        failed: u32,
    },
}

/// Derives the aggregate status from item counts.
///
/// `completed` iff every item succeeded; once all items have terminated with
/// at least one failure it is `completed_with_errors` (or `failed` when
/// nothing succeeded); before that, in progress.
pub fn derive_status(total: u32, succeeded: u32, failed: u32) -> JobStatus {
    if succeeded + failed < total {
        if succeeded + failed == 0 {
            JobStatus::Pending
        } else {
            JobStatus::InProgress
        }
    } else if failed == 0 {
        JobStatus::Completed
    } else if succeeded == 0 {
        JobStatus::Failed
    } else {
        JobStatus::CompletedWithErrors
    }
}

/// Uploads every file in `items` under the given job, sequentially.
///
/// Returns the final derived status. Errors returned here are ledger
/// failures only; transfer failures are captured per item.
pub async fn run_batch_upload(
    orchestrator: &Orchestrator,
    cfg: &TransferConfig,
    job_id: i64,
    channel_ref: &str,
    credential: &str,
    items: Vec<BatchFile>,
    events: Option<UnboundedSender<BatchEvent>>,
) -> Result<JobStatus> {
    let ledger = orchestrator.ledger();
    let total = items.len() as u32;
    let mut succeeded = 0u32;
    let mut failed = 0u32;

    let mut item_ids = Vec::with_capacity(items.len());
    for item in &items {
        item_ids.push(ledger.create_batch_item(job_id, &item.filename).await?);
    }

    for (item_id, item) in item_ids.into_iter().zip(items) {
        ledger.mark_item_in_progress(item_id).await?;
        emit(&events, BatchEvent::ItemStarted {
            job_id,
            filename: item.filename.clone(),
        });

        let outcome = orchestrator
            .upload(
                cfg,
                channel_ref,
                credential,
                item.data,
                &item.filename,
                &item.content_type,
            )
            .await;

        let result = match outcome {
            Ok(handle) => {
                succeeded += 1;
                ledger.mark_item_completed(item_id, handle.file_id).await?;
                Ok(handle)
            }
            Err(e) => {
                failed += 1;
                let message = e.to_string();
                tracing::warn!(job_id, file = %item.filename, "batch item failed: {}", message);
                ledger.mark_item_failed(item_id, &message).await?;
                Err(message)
            }
        };

        let status = derive_status(total, succeeded, failed);
        ledger
            .update_job_progress(job_id, succeeded, status as i32)
            .await?;

        emit(&events, BatchEvent::ItemFinished {
            job_id,
            filename: item.filename,
            result,
        });
    }

    let status = derive_status(total, succeeded, failed);
    ledger
        .update_job_progress(job_id, succeeded, status as i32)
        .await?;
    ledger
        .record_history(&OperationDetails::BatchUpload {
            job_id,
            total,
            completed: succeeded,
            failed,
        })
        .await?;

    tracing::info!(job_id, total, succeeded, failed, "batch finished");
    emit(&events, BatchEvent::Finished {
        job_id,
        status,
        completed: succeeded,
        failed,
    });

    Ok(status)
}

/// Reconstructs every requested file and writes it under `dest`,
/// sequentially. An unknown id or a file whose parts can no longer be
/// retrieved fails its item; siblings proceed.
pub async fn run_batch_download(
    orchestrator: &Orchestrator,
    cfg: &TransferConfig,
    job_id: i64,
    credential: &str,
    file_ids: Vec<i64>,
    dest: &Path,
    events: Option<UnboundedSender<BatchEvent>>,
) -> Result<JobStatus> {
    let ledger = orchestrator.ledger();
    let total = file_ids.len() as u32;
    let mut succeeded = 0u32;
    let mut failed = 0u32;

    tokio::fs::create_dir_all(dest).await?;

    let mut queue = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        let lookup = ledger.get_file(file_id).await;
        let name = match &lookup {
            Ok(file) => file.name.clone(),
            Err(_) => format!("file {}", file_id),
        };
        let item_id = ledger.create_batch_item(job_id, &name).await?;
        queue.push((item_id, file_id, name, lookup.ok()));
    }

    for (item_id, file_id, name, lookup) in queue {
        ledger.mark_item_in_progress(item_id).await?;
        emit(&events, BatchEvent::ItemStarted {
            job_id,
            filename: name.clone(),
        });

        let outcome = match lookup {
            Some(file) => fetch_to_disk(orchestrator, cfg, credential, &file, dest).await,
            None => Err(TransferError::NotFound(format!("file {}", file_id))),
        };

        let result = match outcome {
            Ok(handle) => {
                succeeded += 1;
                ledger.mark_item_completed(item_id, handle.file_id).await?;
                Ok(handle)
            }
            Err(e) => {
                failed += 1;
                let message = e.to_string();
                tracing::warn!(job_id, file = %name, "batch item failed: {}", message);
                ledger.mark_item_failed(item_id, &message).await?;
                Err(message)
            }
        };

        let status = derive_status(total, succeeded, failed);
        ledger
            .update_job_progress(job_id, succeeded, status as i32)
            .await?;

        emit(&events, BatchEvent::ItemFinished {
            job_id,
            filename: name,
            result,
        });
    }

    let status = derive_status(total, succeeded, failed);
    ledger
        .update_job_progress(job_id, succeeded, status as i32)
        .await?;
    ledger
        .record_history(&OperationDetails::BatchDownload {
            job_id,
            total,
            completed: succeeded,
            failed,
        })
        .await?;

    tracing::info!(job_id, total, succeeded, failed, "batch finished");
    emit(&events, BatchEvent::Finished {
        job_id,
        status,
        completed: succeeded,
        failed,
    });

    Ok(status)
}

async fn fetch_to_disk(
    orchestrator: &Orchestrator,
    cfg: &TransferConfig,
    credential: &str,
    file: &stored_file::Model,
    dest: &Path,
) -> Result<StoredFileHandle> {
    let (data, _) = orchestrator.download(cfg, credential, file).await?;
    tokio::fs::write(dest.join(leaf_name(&file.name)), &data).await?;
    Ok(StoredFileHandle {
        file_id: file.id,
        share_id: file.share_id.clone(),
    })
}

/// Final path component only; stored names must not escape `dest`.
fn leaf_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download.bin")
}

fn emit(events: &Option<UnboundedSender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        // A dropped receiver just means nobody is listening anymore.
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::entities::{batch_item, batch_job};
    use crate::db::init_memory_database;
    use crate::ledger::Ledger;
    use crate::remote::ChannelClient;
    use crate::testutil::MockClient;

    #[test]
    fn status_is_derived_from_item_outcomes() {
        assert_eq!(derive_status(3, 0, 0), JobStatus::Pending);
        assert_eq!(derive_status(3, 1, 0), JobStatus::InProgress);
        assert_eq!(derive_status(3, 1, 1), JobStatus::InProgress);
        assert_eq!(derive_status(3, 3, 0), JobStatus::Completed);
        assert_eq!(derive_status(3, 2, 1), JobStatus::CompletedWithErrors);
        assert_eq!(derive_status(3, 0, 3), JobStatus::Failed);
    }

    fn batch_file(name: &str, byte: u8) -> BatchFile {
        BatchFile {
            filename: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            data: Bytes::from(vec![byte; 16]),
        }
    }

    #[tokio::test]
    async fn one_failing_file_does_not_halt_the_batch() {
        let ledger = Ledger::new(init_memory_database().await.unwrap());
        // Three single-message files; the second remote call fails.
        let client = Arc::new(MockClient::new(Some(2)));
        let orchestrator =
            Orchestrator::new(ledger.clone(), client.clone() as Arc<dyn ChannelClient>);
        let cfg = TransferConfig::default();

        let job = ledger
            .create_batch_job(batch_job::KIND_UPLOAD, 3)
            .await
            .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let status = run_batch_upload(
            &orchestrator,
            &cfg,
            job.id,
            "chan",
            "t",
            vec![batch_file("a.bin", 1), batch_file("b.bin", 2), batch_file("c.bin", 3)],
            Some(tx),
        )
        .await
        .unwrap();

        assert_eq!(status, JobStatus::CompletedWithErrors);
        assert_eq!(client.upload_calls(), 3);

        let (job, items) = ledger.get_batch_job(job.id).await.unwrap();
        assert_eq!(job.completed, 2);
        assert_eq!(job.status, JobStatus::CompletedWithErrors as i32);

        let statuses: Vec<i32> = items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                batch_item::STATUS_COMPLETED,
                batch_item::STATUS_FAILED,
                batch_item::STATUS_COMPLETED
            ]
        );
        assert!(items[1].error.is_some());
        assert!(items[0].file_id.is_some());
        assert!(items[2].file_id.is_some());

        // One finished event per file, then the terminal event.
        let mut item_events = 0;
        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                BatchEvent::ItemFinished { .. } => item_events += 1,
                BatchEvent::Finished { status, completed, failed, .. } => {
                    finished = Some((status, completed, failed))
                }
                BatchEvent::ItemStarted { .. } => {}
            }
        }
        assert_eq!(item_events, 3);
        assert_eq!(finished, Some((JobStatus::CompletedWithErrors, 2, 1)));
    }

    #[tokio::test]
    async fn batch_download_writes_files_and_fails_the_unknown_id() {
        let ledger = Ledger::new(init_memory_database().await.unwrap());
        let client = Arc::new(MockClient::new(None));
        let orchestrator =
            Orchestrator::new(ledger.clone(), client.clone() as Arc<dyn ChannelClient>);
        let cfg = TransferConfig::default();

        let a = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from_static(b"alpha"), "a.txt", "text/plain")
            .await
            .unwrap();
        let b = orchestrator
            .upload(&cfg, "chan", "t", Bytes::from_static(b"bravo"), "b.txt", "text/plain")
            .await
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let job = ledger
            .create_batch_job(batch_job::KIND_DOWNLOAD, 3)
            .await
            .unwrap();

        let status = run_batch_download(
            &orchestrator,
            &cfg,
            job.id,
            "t",
            vec![a.file_id, 999, b.file_id],
            dir.path(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(status, JobStatus::CompletedWithErrors);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"bravo");

        let (job, items) = ledger.get_batch_job(job.id).await.unwrap();
        assert_eq!(job.kind, batch_job::KIND_DOWNLOAD);
        assert_eq!(job.completed, 2);
        let statuses: Vec<i32> = items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                batch_item::STATUS_COMPLETED,
                batch_item::STATUS_FAILED,
                batch_item::STATUS_COMPLETED
            ]
        );
        assert!(items[1].error.is_some());
    }

    #[test]
    fn destination_names_keep_only_the_final_component() {
        assert_eq!(leaf_name("report.pdf"), "report.pdf");
        assert_eq!(leaf_name("../../etc/passwd"), "passwd");
        assert_eq!(leaf_name("dir/inner/x.bin"), "x.bin");
    }
}
