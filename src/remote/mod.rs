//! Remote chat-platform boundary.
//!
//! `ChannelClient` is the pluggable seam the orchestrator talks through;
//! `HttpChannelClient` is the production implementation. All translation
//! from raw transport failures into the `TransferError` taxonomy happens
//! inside this module and nowhere else.

mod client;
mod http;

pub use client::{ChannelClient, RemoteAttachment, RemoteMessage, UploadReceipt};
pub use http::HttpChannelClient;
