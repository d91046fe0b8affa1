//! Transfer configuration.
//!
//! A single snapshot is taken per request and passed into the orchestrator
//! by value, so in-flight transfers are never affected by a concurrent
//! settings change. The admin endpoint replaces the shared snapshot and
//! bumps `version`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling the remote platform enforces per message attachment.
/// The configured chunk size must stay strictly below this, leaving
/// headroom for multipart/protocol overhead.
pub const PLATFORM_ATTACHMENT_CEILING: u64 = 25 * 1024 * 1024;

/// The platform's message-listing API returns at most this many messages
/// per call, which bounds how far back the scan fallback can see.
pub const PLATFORM_LIST_CEILING: u8 = 100;

const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;
const DEFAULT_PART_PACE_MS: u64 = 500;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    /// Bumped every time the admin settings endpoint replaces the snapshot.
    #[serde(default)]
    pub version: u32,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u64,
    /// Files strictly larger than this are chunked. Shared with the "large
    /// file" labeling in listings so both call sites agree.
    pub chunk_threshold: u64,
    /// Uploads above this are rejected outright.
    pub max_file_size: u64,
    /// Delay between consecutive part uploads when running sequentially.
    pub part_pace_ms: u64,
    /// Number of parts in flight at once. 1 means strictly sequential with
    /// pacing, which is the rate-limit-friendly default.
    pub upload_concurrency: usize,
    /// How many recent messages the scan fallback inspects.
    pub scan_limit: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            version: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_threshold: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            part_pace_ms: DEFAULT_PART_PACE_MS,
            upload_concurrency: 1,
            scan_limit: PLATFORM_LIST_CEILING,
        }
    }
}

impl TransferConfig {
    pub fn part_pace(&self) -> Duration {
        Duration::from_millis(self.part_pace_ms)
    }

    /// Validates a snapshot before it is installed.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".into());
        }
        if self.chunk_size >= PLATFORM_ATTACHMENT_CEILING {
            return Err(format!(
                "chunk_size must be strictly below the platform attachment ceiling ({} bytes)",
                PLATFORM_ATTACHMENT_CEILING
            ));
        }
        if self.chunk_threshold > PLATFORM_ATTACHMENT_CEILING {
            return Err("chunk_threshold exceeds the platform attachment ceiling".into());
        }
        if self.upload_concurrency == 0 {
            return Err("upload_concurrency must be at least 1".into());
        }
        if self.scan_limit == 0 || self.scan_limit > PLATFORM_LIST_CEILING {
            return Err(format!(
                "scan_limit must be between 1 and {}",
                PLATFORM_LIST_CEILING
            ));
        }
        Ok(())
    }
}
