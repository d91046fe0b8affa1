use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// What the platform hands back after a successful attachment post.
///
/// The attachment URL is captured at post time so the ledger download path
/// can fetch part bytes directly without a message lookup.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub message_id: String,
    pub attachment_url: String,
}

#[derive(Clone, Debug)]
pub struct RemoteAttachment {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct RemoteMessage {
    pub message_id: String,
    pub attachments: Vec<RemoteAttachment>,
}

/// Client for the remote chat platform's message API.
///
/// The credential is an opaque `Authorization` header value passed through
/// unmodified; this layer never inspects its structure.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Posts one binary attachment to a channel. One message becomes
    /// visible in the destination on success.
    async fn upload_attachment(
        &self,
        channel: &str,
        credential: &str,
        data: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt>;

    /// Lists the most recent messages in a channel, newest first, bounded
    /// by `limit`.
    async fn list_recent_messages(
        &self,
        channel: &str,
        credential: &str,
        limit: u8,
    ) -> Result<Vec<RemoteMessage>>;

    /// Fetches attachment content by URL. Attachment URLs are directly
    /// fetchable without re-authenticating against the messaging API.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes>;
}
