//! HTTP implementation of [`ChannelClient`] against a bot-token message API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, multipart, StatusCode};
use serde::Deserialize;

use super::client::{ChannelClient, RemoteAttachment, RemoteMessage, UploadReceipt};
use crate::error::{Result, TransferError};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Reqwest-backed channel client. The base URL is configurable so the same
/// client works against compatible self-hosted platforms (and test servers).
pub struct HttpChannelClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: String,
    #[serde(default)]
    attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    filename: String,
    url: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

impl HttpChannelClient {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }

    fn messages_url(&self, channel: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel)
    }

    /// Resolves a non-success response into the abstract error taxonomy,
    /// preferring the platform's own message text when the body carries one.
    async fn map_error(response: reqwest::Response) -> TransferError {
        let status = response.status();
        let detail = response
            .json::<ErrorPayload>()
            .await
            .ok()
            .and_then(|p| p.message);
        map_status(status, detail)
    }
}

fn map_status(status: StatusCode, detail: Option<String>) -> TransferError {
    match status {
        StatusCode::UNAUTHORIZED => TransferError::Auth,
        StatusCode::FORBIDDEN => TransferError::Permission,
        StatusCode::NOT_FOUND => TransferError::NotFound("destination channel".to_string()),
        StatusCode::TOO_MANY_REQUESTS => TransferError::RateLimit,
        _ => TransferError::Remote(
            detail.unwrap_or_else(|| format!("unexpected status {}", status)),
        ),
    }
}

fn transport_error(e: reqwest::Error) -> TransferError {
    TransferError::Remote(format!("transport failure: {}", e))
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn upload_attachment(
        &self,
        channel: &str,
        credential: &str,
        data: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt> {
        let part = multipart::Part::stream(data)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| TransferError::InvalidRequest(format!("bad mime type: {}", e)))?;
        let form = multipart::Form::new().part("files[0]", part);

        let response = self
            .http
            .post(self.messages_url(channel))
            .header(header::AUTHORIZATION, credential)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }

        let message: MessagePayload = response.json().await.map_err(transport_error)?;
        let attachment = message.attachments.into_iter().next().ok_or_else(|| {
            TransferError::Remote("upload response carried no attachment".to_string())
        })?;

        Ok(UploadReceipt {
            message_id: message.id,
            attachment_url: attachment.url,
        })
    }

    async fn list_recent_messages(
        &self,
        channel: &str,
        credential: &str,
        limit: u8,
    ) -> Result<Vec<RemoteMessage>> {
        let response = self
            .http
            .get(self.messages_url(channel))
            .query(&[("limit", limit.to_string())])
            .header(header::AUTHORIZATION, credential)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }

        let messages: Vec<MessagePayload> = response.json().await.map_err(transport_error)?;
        Ok(messages
            .into_iter()
            .map(|m| RemoteMessage {
                message_id: m.id,
                attachments: m
                    .attachments
                    .into_iter()
                    .map(|a| RemoteAttachment {
                        filename: a.filename,
                        url: a.url,
                        size: a.size,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self.http.get(url).send().await.map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }

        response.bytes().await.map_err(transport_error)
    }
}
