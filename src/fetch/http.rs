//! HTTP(S) fetcher backed by reqwest.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::SourceFetcher;
use crate::error::IngestError;

/// Streams the response body straight to the destination file, so the
/// download itself stays bounded-memory regardless of file size.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Fetch(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Fetch(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(IngestError::Fetch(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::Fetch(format!("failed to create directory: {}", e)))?;
        }

        // File::create truncates, giving the overwrite semantics we want
        // for a prior partial download at the same path.
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| IngestError::Fetch(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| IngestError::Fetch(format!("transfer from {} failed: {}", url, e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| IngestError::Fetch(format!("failed to write {}: {}", dest.display(), e)))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| IngestError::Fetch(format!("failed to flush {}: {}", dest.display(), e)))?;

        debug!(url = %url, bytes = downloaded, "download complete");
        info!("Downloaded {} ({} bytes)", dest.display(), downloaded);
        Ok(())
    }
}
