//! Core domain types

pub mod chunk;
pub mod document;
pub mod job;
pub mod profile;
pub mod query;
pub mod remote;
pub mod response;

pub use chunk::{Chunk, ChunkType, QualityFlag, SparseVector};
pub use document::{
    ConnectionState, Document, DocumentStatus, FileFormat, FormatCategory, Lane, SourceType,
};
pub use job::{fail_codes, JobError, JobState, ProcessingJob, QueueCounts};
pub use profile::{ProcessingProfile, ProfileConfig};
pub use query::{SearchMode, SearchRequest};
pub use remote::{RemoteChange, RemoteFile, RemoteFolderBinding, SyncReport, SyncStatus};
