//! In-process backend used for development servers and tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use findmylab_core::{Opportunity, Program};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    Commit, DocumentStore, ListFilter, ListPage, ScheduledJob, StoreError, Version, VersionWrite,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: HashMap<Uuid, Opportunity>,
    // Oldest at the front.
    versions: HashMap<Uuid, VecDeque<Version>>,
    programs: HashMap<String, Program>,
    jobs: Vec<ScheduledJob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn commit(&self, commit: Commit) -> Result<Option<Opportunity>, StoreError> {
        let mut state = self.state.write().await;
        let id = commit.doc.id;

        match (commit.create, state.docs.contains_key(&id)) {
            (true, true) => return Err(StoreError::AlreadyExists(id)),
            (false, false) => return Err(StoreError::NotFound(id)),
            _ => {}
        }

        if let Some(slug) = commit.doc.slug() {
            let taken = state
                .docs
                .values()
                .any(|other| other.id != id && other.slug() == Some(slug));
            if taken {
                return Err(StoreError::DuplicateSlug(slug.to_string()));
            }
        }

        let now = Utc::now();
        let versions = state.versions.entry(id).or_default();
        match versions.back_mut() {
            Some(newest) if commit.version == VersionWrite::Autosave && newest.autosave => {
                newest.snapshot = commit.doc.clone();
                newest.created_at = now;
            }
            newest => {
                let next_no = newest.map_or(1, |v| v.version_no + 1);
                versions.push_back(commit.version_for(next_no, now));
            }
        }
        while versions.len() > commit.max_versions {
            versions.pop_front();
        }

        Ok(state.docs.insert(id, commit.doc))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.docs.remove(&id);
        if removed.is_some() {
            state.versions.remove(&id);
            state.jobs.retain(|job| job.document != id);
        }
        Ok(removed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        Ok(self.state.read().await.docs.get(&id).cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Opportunity>, StoreError> {
        let state = self.state.read().await;
        Ok(state.docs.values().find(|d| d.slug() == Some(slug)).cloned())
    }

    async fn list(&self, filter: ListFilter) -> Result<ListPage, StoreError> {
        let state = self.state.read().await;
        let mut docs: Vec<&Opportunity> = state
            .docs
            .values()
            .filter(|d| !filter.published_only || d.is_published())
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = docs.len();
        let docs = docs
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();
        Ok(ListPage { docs, total })
    }

    async fn versions(&self, id: Uuid) -> Result<Vec<Version>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .get(&id)
            .map(|v| v.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_program(&self, program: Program) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .programs
            .insert(program.id.clone(), program);
        Ok(())
    }

    async fn program(&self, id: &str) -> Result<Option<Program>, StoreError> {
        Ok(self.state.read().await.programs.get(id).cloned())
    }

    async fn schedule(&self, job: ScheduledJob) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.docs.contains_key(&job.document) {
            return Err(StoreError::NotFound(job.document));
        }
        state.jobs.push(job);
        Ok(())
    }

    async fn take_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, StoreError> {
        let mut state = self.state.write().await;
        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.jobs.drain(..).partition(|job| job.run_at <= now);
        state.jobs = pending;
        due.sort_by_key(|job| job.run_at);
        Ok(due)
    }
}
