//! Fetching remote source files to the local filesystem.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use std::path::Path;

use crate::error::IngestError;

/// Trait for resolving a URL to a local file.
///
/// Implementations download the resource to `dest`, replacing any prior
/// file at that path. No retry happens at this layer; the pipeline wraps
/// the call in its own retry policy.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), IngestError>;
}
