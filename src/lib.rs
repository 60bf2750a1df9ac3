pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod read;
pub mod source;
pub mod telemetry;
pub mod transform;
pub mod write;

pub use error::IngestError;
pub use pipeline::{IngestPipeline, PipelineOptions, PipelineState, RunSummary};
pub use source::{ConnectionTarget, SourceDescriptor, SourceFormat};
