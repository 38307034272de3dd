//! Processing job types and failure codes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::FileFormat;
use super::profile::ProfileConfig;

/// Failure codes stored in `Document::fail_reason` and `JobError::code`.
///
/// These are plain strings at the storage layer; a reason may carry extra
/// detail after the code, e.g. `PROCESSING_ERROR: connection reset`.
pub mod fail_codes {
    pub const TEXT_TOO_SHORT: &str = "TEXT_TOO_SHORT";
    pub const EXCESSIVE_NOISE: &str = "EXCESSIVE_NOISE";
    pub const NO_CONTENT: &str = "NO_CONTENT";
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";
    pub const PASSWORD_PROTECTED: &str = "PASSWORD_PROTECTED";
    pub const CORRUPT_FILE: &str = "CORRUPT_FILE";
    pub const UNSUPPORTED_FORMAT: &str = "UNSUPPORTED_FORMAT";
    pub const REMOVED_FROM_REMOTE: &str = "REMOVED_FROM_REMOTE";
    pub const STATE_CONFLICT: &str = "STATE_CONFLICT";
    pub const TIMEOUT: &str = "TIMEOUT";

    /// Error codes that terminate a job without further retries.
    pub fn is_permanent(code: &str) -> bool {
        matches!(code, PASSWORD_PROTECTED | CORRUPT_FILE | UNSUPPORTED_FORMAT)
    }

    /// Compose a reason string from a code and optional detail.
    pub fn with_detail(code: &str, detail: &str) -> String {
        if detail.is_empty() {
            code.to_string()
        } else {
            format!("{}: {}", code, detail)
        }
    }
}

/// Error recorded against a job delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        fail_codes::is_permanent(&self.code)
    }
}

/// Queue-side job state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "delayed" => Some(Self::Delayed),
            _ => None,
        }
    }
}

/// A heavy-lane processing job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Stored file path handed to the converter
    pub file_path: String,
    pub format: FileFormat,
    /// Profile parameters frozen at enqueue time
    pub profile_config: ProfileConfig,
    /// Deliveries attempted so far; only increases
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Earliest time the job may run (backoff target for delayed jobs)
    pub next_run_at: DateTime<Utc>,
    pub state: JobState,
    pub last_error: Option<JobError>,
    /// Reservation deadline while active; expiry requeues the job
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reserved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(
        document_id: Uuid,
        file_path: String,
        format: FileFormat,
        profile_config: ProfileConfig,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            file_path,
            format,
            profile_config,
            attempts_made: 0,
            max_attempts,
            next_run_at: now,
            state: JobState::Waiting,
            last_error: None,
            reserved_until: None,
            created_at: now,
            finished_at: None,
        }
    }
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}
