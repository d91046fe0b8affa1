//! Shared test doubles.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TransferError};
use crate::remote::{ChannelClient, RemoteAttachment, RemoteMessage, UploadReceipt};

struct MockState {
    messages: Vec<RemoteMessage>, // newest first
    blobs: HashMap<String, Bytes>,
    upload_calls: usize,
    next_id: usize,
}

/// In-memory stand-in for the remote platform. Uploads become listed
/// messages with fetchable `mock://` URLs; an optional call index can be
/// made to fail for atomicity tests.
pub struct MockClient {
    state: Mutex<MockState>,
    fail_on_call: Option<usize>,
}

impl MockClient {
    pub fn new(fail_on_call: Option<usize>) -> Self {
        Self {
            state: Mutex::new(MockState {
                messages: Vec::new(),
                blobs: HashMap::new(),
                upload_calls: 0,
                next_id: 0,
            }),
            fail_on_call,
        }
    }

    pub fn upload_calls(&self) -> usize {
        self.state.lock().unwrap().upload_calls
    }

    /// Seeds a pre-existing message, as if posted by someone else.
    pub fn seed_message(&self, filename: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let url = format!("mock://{}/{}", state.next_id, filename);
        state.blobs.insert(url.clone(), Bytes::copy_from_slice(data));
        let message = RemoteMessage {
            message_id: state.next_id.to_string(),
            attachments: vec![RemoteAttachment {
                filename: filename.to_string(),
                url,
                size: data.len() as u64,
            }],
        };
        state.messages.insert(0, message);
    }
}

#[async_trait]
impl ChannelClient for MockClient {
    async fn upload_attachment(
        &self,
        _channel: &str,
        _credential: &str,
        data: Bytes,
        filename: &str,
        _mime_type: &str,
    ) -> Result<UploadReceipt> {
        let mut state = self.state.lock().unwrap();
        state.upload_calls += 1;
        if self.fail_on_call == Some(state.upload_calls) {
            return Err(TransferError::Remote("injected failure".to_string()));
        }
        state.next_id += 1;
        let message_id = state.next_id.to_string();
        let url = format!("mock://{}/{}", message_id, filename);
        state.blobs.insert(url.clone(), data.clone());
        let message = RemoteMessage {
            message_id: message_id.clone(),
            attachments: vec![RemoteAttachment {
                filename: filename.to_string(),
                url: url.clone(),
                size: data.len() as u64,
            }],
        };
        state.messages.insert(0, message);
        Ok(UploadReceipt {
            message_id,
            attachment_url: url,
        })
    }

    async fn list_recent_messages(
        &self,
        _channel: &str,
        _credential: &str,
        limit: u8,
    ) -> Result<Vec<RemoteMessage>> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.iter().take(limit as usize).cloned().collect())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        state
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(url.to_string()))
    }
}
