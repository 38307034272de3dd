//! Remote folder synchronization types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file as reported by the remote store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// MD5 hex of the remote content, when the store reports it
    pub md5: Option<String>,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    /// Containing folder on the remote side
    pub folder_id: String,
}

/// One entry of the remote change stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    pub remote_file_id: String,
    pub removed: bool,
    pub file: Option<RemoteFile>,
}

/// A page of the remote change stream
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub changes: Vec<RemoteChange>,
    /// Present when more pages follow
    pub next_page_token: Option<String>,
    /// Present on the final page; persisted for the next incremental run
    pub new_start_page_token: Option<String>,
}

/// Sync state of a binding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Syncing => "SYNCING",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(Self::Idle),
            "SYNCING" => Some(Self::Syncing),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A tracked remote folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFolderBinding {
    pub id: Uuid,
    pub remote_folder_id: String,
    pub recursive: bool,
    /// Opaque change cursor; None until the first full sync completes
    pub page_token: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub profile_id: Option<Uuid>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl RemoteFolderBinding {
    pub fn new(remote_folder_id: String, recursive: bool, profile_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_folder_id,
            recursive,
            page_token: None,
            last_synced_at: None,
            sync_status: SyncStatus::Idle,
            sync_error: None,
            profile_id,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Per-file sync error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFileError {
    pub remote_file_id: String,
    pub error: String,
}

/// Outcome of a sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub errors: Vec<SyncFileError>,
}
