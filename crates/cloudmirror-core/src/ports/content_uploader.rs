//! Content uploader port
//!
//! Sends the bytes of a local file change once the server has answered
//! `upload` for it. Running without an uploader is supported; such changes
//! stay in the failure queue until one is configured.

use crate::domain::{Change, ContentStream};

/// Port trait for file content uploads
#[async_trait::async_trait]
pub trait IContentUploader: Send + Sync {
    /// Uploads the content of `change` from `stream`
    async fn upload(&self, change: &Change, stream: ContentStream) -> anyhow::Result<()>;
}
