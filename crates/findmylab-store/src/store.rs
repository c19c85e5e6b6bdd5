//! Persistence contract shared by the memory and Postgres backends.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use findmylab_core::{Opportunity, Program, UnknownOption};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slug {0:?} is already used by another opportunity")]
    DuplicateSlug(String),
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
    #[error("opportunity {0} already exists")]
    AlreadyExists(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// One retained snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: Uuid,
    pub parent: Uuid,
    pub version_no: u32,
    pub autosave: bool,
    pub created_at: DateTime<Utc>,
    pub snapshot: Opportunity,
}

/// How a commit records its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionWrite {
    /// Always add a new version.
    Append,
    /// Overwrite the newest version when it is itself an autosave.
    Autosave,
}

/// A document write plus its version bookkeeping, applied atomically.
#[derive(Debug, Clone)]
pub struct Commit {
    pub doc: Opportunity,
    pub version: VersionWrite,
    pub max_versions: usize,
    pub create: bool,
}

impl Commit {
    pub(crate) fn version_for(&self, version_no: u32, now: DateTime<Utc>) -> Version {
        Version {
            id: Uuid::new_v4(),
            parent: self.doc.id,
            version_no,
            autosave: self.version == VersionWrite::Autosave,
            created_at: now,
            snapshot: self.doc.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListFilter {
    pub published_only: bool,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub docs: Vec<Opportunity>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledAction {
    Publish,
    Unpublish,
}

impl ScheduledAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduledAction::Publish => "publish",
            ScheduledAction::Unpublish => "unpublish",
        }
    }
}

impl fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledAction {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(ScheduledAction::Publish),
            "unpublish" => Ok(ScheduledAction::Unpublish),
            other => Err(UnknownOption {
                field: "action",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: Uuid,
    pub document: Uuid,
    pub action: ScheduledAction,
    pub run_at: DateTime<Utc>,
}

/// Raw persistence. Access control, validation and hooks live in
/// [`crate::Collection`]; backends only keep documents consistent.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes the document and its version in one step, prunes versions past
    /// `max_versions` (oldest first), enforces slug uniqueness, and returns the
    /// state the document had immediately before the write.
    async fn commit(&self, commit: Commit) -> Result<Option<Opportunity>, StoreError>;

    /// Removes a document with its versions and scheduled jobs.
    async fn delete(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Opportunity>, StoreError>;

    /// Newest `created_at` first.
    async fn list(&self, filter: ListFilter) -> Result<ListPage, StoreError>;

    /// Newest version first.
    async fn versions(&self, id: Uuid) -> Result<Vec<Version>, StoreError>;

    async fn put_program(&self, program: Program) -> Result<(), StoreError>;

    async fn program(&self, id: &str) -> Result<Option<Program>, StoreError>;

    async fn schedule(&self, job: ScheduledJob) -> Result<(), StoreError>;

    /// Removes and returns every job with `run_at <= now`, oldest first.
    async fn take_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, StoreError>;
}
