//! The Opportunities collection: access rules, before-change population,
//! versioned commits and after-change/after-delete hook dispatch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use findmylab_core::schema::{self, CollectionSchema};
use findmylab_core::slug::slug_from;
use findmylab_core::{
    format_slug, strip_hidden, strip_nulls, validate, FieldError, Opportunity, OpportunityData, Program,
    Status, ValidationErrors, ValidationMode, MAX_VERSIONS_PER_DOC,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::store::{
    Commit, DocumentStore, ListFilter, ScheduledAction, ScheduledJob, StoreError, Version,
    VersionWrite,
};

/// Keys owned by the collection itself; client values for them are ignored.
const SYSTEM_KEYS: [&str; 4] = ["id", "_status", "createdAt", "updatedAt"];
const PARENT_PROGRAM: &str = "parent-program";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Editor { id: String },
}

impl Actor {
    pub fn editor(id: impl Into<String>) -> Self {
        Actor::Editor { id: id.into() }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Actor::Editor { .. })
    }
}

/// Per-request flags threaded through to hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RequestContext {
    #[serde(default, rename = "disableRevalidate")]
    pub disable_revalidate: bool,
}

impl RequestContext {
    pub fn quiet() -> Self {
        Self {
            disable_revalidate: true,
        }
    }
}

/// Side effects that run after a write has been committed. Implementations
/// must not fail the write; anything slow belongs on a background task.
pub trait CollectionHooks: Send + Sync {
    fn after_change(&self, doc: &Opportunity, previous: Option<&Opportunity>, ctx: &RequestContext);
    fn after_delete(&self, doc: &Opportunity, ctx: &RequestContext);
}

#[derive(Debug, Default)]
pub struct NoopHooks;

impl CollectionHooks for NoopHooks {
    fn after_change(&self, _: &Opportunity, _: Option<&Opportunity>, _: &RequestContext) {}
    fn after_delete(&self, _: &Opportunity, _: &RequestContext) {}
}

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("you are not allowed to perform this action")]
    Forbidden,
    #[error("opportunity not found")]
    NotFound,
    #[error("version {0} not found")]
    VersionNotFound(Uuid),
    #[error("slug {0:?} is already in use")]
    DuplicateSlug(String),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CollectionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSlug(slug) => CollectionError::DuplicateSlug(slug),
            StoreError::NotFound(_) => CollectionError::NotFound,
            other => CollectionError::Store(other),
        }
    }
}

pub type CollectionResult<T> = Result<T, CollectionError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindQuery {
    /// Relationship population depth; `parent-program` is populated at 1+.
    pub depth: u8,
    pub limit: usize,
    pub page: usize,
    /// Internal callers skip the published-only read filter.
    pub override_access: bool,
    pub select: Option<Vec<String>>,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self {
            depth: 2,
            limit: 10,
            page: 1,
            override_access: true,
            select: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedDocs {
    pub docs: Vec<JsonValue>,
    pub total_docs: usize,
    pub limit: usize,
    pub page: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

#[derive(Clone)]
pub struct Collection {
    store: Arc<dyn DocumentStore>,
    hooks: Arc<dyn CollectionHooks>,
    schema: &'static CollectionSchema,
}

impl Collection {
    pub fn new(store: Arc<dyn DocumentStore>, hooks: Arc<dyn CollectionHooks>) -> Self {
        Self {
            store,
            hooks,
            schema: schema::opportunities(),
        }
    }

    pub fn schema(&self) -> &'static CollectionSchema {
        self.schema
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn create(
        &self,
        actor: &Actor,
        input: JsonValue,
        draft: bool,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        let patch = into_object(input)?;
        let status = target_status(draft, &patch, None)?;
        let doc = self.prepare(Uuid::new_v4(), Map::new(), &patch, status, None)?;
        self.commit(doc, VersionWrite::Append, true, ctx)
            .instrument(info_span!("collection.create"))
            .await
    }

    /// Shallow-merges `patch` over the stored document.
    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: JsonValue,
        draft: bool,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        let patch = into_object(patch)?;
        let existing = self.load(id).await?;
        let status = target_status(draft, &patch, Some(&existing))?;
        let doc = self.prepare(id, existing_fields(&existing)?, &patch, status, Some(&existing))?;
        self.commit(doc, VersionWrite::Append, false, ctx)
            .instrument(info_span!("collection.update", %id))
            .await
    }

    /// A draft write that coalesces into the newest version while the editor
    /// keeps typing.
    pub async fn autosave(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: JsonValue,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        let patch = into_object(patch)?;
        let existing = self.load(id).await?;
        let doc = self.prepare(
            id,
            existing_fields(&existing)?,
            &patch,
            Status::Draft,
            Some(&existing),
        )?;
        self.commit(doc, VersionWrite::Autosave, false, ctx).await
    }

    pub async fn publish(
        &self,
        actor: &Actor,
        id: Uuid,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        self.set_status(id, Status::Published, ctx).await
    }

    pub async fn unpublish(
        &self,
        actor: &Actor,
        id: Uuid,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        self.set_status(id, Status::Draft, ctx).await
    }

    pub async fn delete(
        &self,
        actor: &Actor,
        id: Uuid,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        let doc = self
            .store
            .delete(id)
            .instrument(info_span!("collection.delete", %id))
            .await?
            .ok_or(CollectionError::NotFound)?;
        self.hooks.after_delete(&doc, ctx);
        Ok(doc)
    }

    /// Drafts are reported as missing to anonymous readers.
    pub async fn find_by_id(&self, actor: &Actor, id: Uuid) -> CollectionResult<Opportunity> {
        let doc = self.store.get(id).await?;
        readable(actor, doc)
    }

    pub async fn find_by_slug(&self, actor: &Actor, slug: &str) -> CollectionResult<Opportunity> {
        let doc = self.store.get_by_slug(slug).await?;
        readable(actor, doc)
    }

    pub async fn find(&self, actor: &Actor, query: &FindQuery) -> CollectionResult<PaginatedDocs> {
        let limit = query.limit.max(1);
        let page = query.page.max(1);
        let filter = ListFilter {
            published_only: !query.override_access && !actor.is_authenticated(),
            limit,
            offset: (page - 1).saturating_mul(limit),
        };
        let listed = self.store.list(filter).await?;

        let mut docs = Vec::with_capacity(listed.docs.len());
        for doc in &listed.docs {
            let mut value = doc.to_json().map_err(StoreError::from)?;
            if query.depth >= 1 {
                self.populate_parent_program(doc, &mut value).await?;
            }
            if let Some(select) = &query.select {
                value = project(value, select);
            }
            docs.push(value);
        }

        let total_pages = listed.total.max(1).div_ceil(limit);
        Ok(PaginatedDocs {
            docs,
            total_docs: listed.total,
            limit,
            page,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        })
    }

    pub async fn versions(&self, actor: &Actor, id: Uuid) -> CollectionResult<Vec<Version>> {
        require_editor(actor)?;
        self.load(id).await?;
        Ok(self.store.versions(id).await?)
    }

    /// Writes a retained snapshot back as the current document. The restored
    /// document keeps the snapshot's status unless `draft` is set.
    pub async fn restore_version(
        &self,
        actor: &Actor,
        id: Uuid,
        version_id: Uuid,
        draft: bool,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        require_editor(actor)?;
        let existing = self.load(id).await?;
        let version = self
            .store
            .versions(id)
            .await?
            .into_iter()
            .find(|v| v.id == version_id)
            .ok_or(CollectionError::VersionNotFound(version_id))?;

        let status = if draft {
            Status::Draft
        } else {
            version.snapshot.status
        };
        let snapshot = existing_fields(&version.snapshot)?;
        let doc = self.prepare(id, snapshot, &Map::new(), status, Some(&existing))?;
        self.commit(doc, VersionWrite::Append, false, ctx)
            .instrument(info_span!("collection.restore", %id, %version_id))
            .await
    }

    pub async fn schedule(
        &self,
        actor: &Actor,
        id: Uuid,
        action: ScheduledAction,
        run_at: DateTime<Utc>,
    ) -> CollectionResult<ScheduledJob> {
        require_editor(actor)?;
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            document: id,
            action,
            run_at,
        };
        self.store.schedule(job.clone()).await?;
        info!(%id, %action, %run_at, "scheduled status change");
        Ok(job)
    }

    /// Applies every job due at `now`, oldest first. A job that fails is
    /// logged and dropped; the rest still run. Returns how many applied.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> CollectionResult<usize> {
        let jobs = self.store.take_due_jobs(now).await?;
        let ctx = RequestContext::default();
        let mut applied = 0;
        for job in jobs {
            let status = match job.action {
                ScheduledAction::Publish => Status::Published,
                ScheduledAction::Unpublish => Status::Draft,
            };
            match self.set_status(job.document, status, &ctx).await {
                Ok(_) => {
                    applied += 1;
                    info!(id = %job.document, action = %job.action, "ran scheduled job");
                }
                Err(err) => {
                    warn!(id = %job.document, action = %job.action, error = %err, "scheduled job failed");
                }
            }
        }
        Ok(applied)
    }

    pub async fn register_program(&self, program: Program) -> CollectionResult<()> {
        Ok(self.store.put_program(program).await?)
    }

    async fn load(&self, id: Uuid) -> CollectionResult<Opportunity> {
        self.store.get(id).await?.ok_or(CollectionError::NotFound)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: Status,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        let existing = self.load(id).await?;
        let doc = self.prepare(id, existing_fields(&existing)?, &Map::new(), status, Some(&existing))?;
        self.commit(doc, VersionWrite::Append, false, ctx)
            .instrument(info_span!("collection.set_status", %id, status = status.as_str()))
            .await
    }

    async fn commit(
        &self,
        doc: Opportunity,
        version: VersionWrite,
        create: bool,
        ctx: &RequestContext,
    ) -> CollectionResult<Opportunity> {
        let previous = self
            .store
            .commit(Commit {
                doc: doc.clone(),
                version,
                max_versions: MAX_VERSIONS_PER_DOC,
                create,
            })
            .await?;
        self.hooks.after_change(&doc, previous.as_ref(), ctx);
        Ok(doc)
    }

    /// Builds the document to commit: merge, strip hidden values, validate,
    /// drop nulls, then fill slug, row ids, `publishedAt` and timestamps.
    fn prepare(
        &self,
        id: Uuid,
        mut fields: Map<String, JsonValue>,
        patch: &Map<String, JsonValue>,
        status: Status,
        existing: Option<&Opportunity>,
    ) -> CollectionResult<Opportunity> {
        for (key, value) in patch {
            if !SYSTEM_KEYS.contains(&key.as_str()) {
                fields.insert(key.clone(), value.clone());
            }
        }
        depopulate_relationship(&mut fields);

        let mut value = JsonValue::Object(fields);
        strip_hidden(self.schema, &mut value);
        let mode = match status {
            Status::Published => ValidationMode::Publish,
            Status::Draft => ValidationMode::Draft,
        };
        validate(self.schema, &value, mode)?;
        strip_nulls(&mut value);

        let mut data: OpportunityData =
            serde_json::from_value(value).map_err(|err| CollectionError::Malformed(err.to_string()))?;
        resolve_slug(&mut data, patch);
        if status == Status::Published && data.slug.is_none() {
            return Err(ValidationErrors(vec![FieldError::new("slug", "This field is required.")]).into());
        }
        data.assign_row_ids();

        let now = Utc::now();
        if data.published_at.is_none() {
            data.published_at = Some(now);
        }
        Ok(Opportunity {
            id,
            data,
            status,
            created_at: existing.map_or(now, |e| e.created_at),
            updated_at: now,
        })
    }

    async fn populate_parent_program(
        &self,
        doc: &Opportunity,
        value: &mut JsonValue,
    ) -> CollectionResult<()> {
        let Some(program_id) = doc.data.parent_program.as_deref() else {
            return Ok(());
        };
        if let Some(program) = self.store.program(program_id).await? {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(PARENT_PROGRAM.to_string(), program.default_projection());
            }
        }
        Ok(())
    }
}

fn require_editor(actor: &Actor) -> CollectionResult<()> {
    if actor.is_authenticated() {
        Ok(())
    } else {
        Err(CollectionError::Forbidden)
    }
}

fn readable(actor: &Actor, doc: Option<Opportunity>) -> CollectionResult<Opportunity> {
    match doc {
        Some(doc) if doc.is_published() || actor.is_authenticated() => Ok(doc),
        _ => Err(CollectionError::NotFound),
    }
}

fn into_object(value: JsonValue) -> CollectionResult<Map<String, JsonValue>> {
    match value {
        JsonValue::Object(obj) => Ok(obj),
        _ => Err(CollectionError::Malformed("expected a JSON object".to_string())),
    }
}

fn existing_fields(doc: &Opportunity) -> CollectionResult<Map<String, JsonValue>> {
    let value = doc.to_json().map_err(StoreError::from)?;
    into_object(value)
}

/// `draft` wins, then an explicit `_status` in the body, then whatever the
/// document already had. A new document saved without `draft` is published.
fn target_status(
    draft: bool,
    patch: &Map<String, JsonValue>,
    existing: Option<&Opportunity>,
) -> CollectionResult<Status> {
    if draft {
        return Ok(Status::Draft);
    }
    match patch.get("_status") {
        Some(JsonValue::String(raw)) => raw.parse().map_err(|_| {
            ValidationErrors(vec![FieldError::new(
                "_status",
                format!("{raw:?} is not a valid option"),
            )])
            .into()
        }),
        Some(_) => Err(ValidationErrors(vec![FieldError::new("_status", "must be an option value")]).into()),
        None => Ok(existing.map_or(Status::Published, |e| e.status)),
    }
}

/// Accepts a populated `{id, ...}` reference and stores just the id.
fn depopulate_relationship(fields: &mut Map<String, JsonValue>) {
    if let Some(JsonValue::Object(obj)) = fields.get(PARENT_PROGRAM) {
        let id = obj.get("id").cloned().unwrap_or(JsonValue::Null);
        fields.insert(PARENT_PROGRAM.to_string(), id);
    }
}

/// An explicit slug in this write is formatted and unlocks the slug;
/// otherwise a locked (or missing) slug follows the title.
fn resolve_slug(data: &mut OpportunityData, patch: &Map<String, JsonValue>) {
    let explicit = patch
        .get("slug")
        .and_then(JsonValue::as_str)
        .and_then(slug_from);
    let relock = patch.get("slugLock") == Some(&JsonValue::Bool(true));

    match explicit {
        Some(slug) if !relock => {
            data.slug = Some(slug);
            data.slug_lock = false;
        }
        _ if data.slug_lock || data.slug.is_none() => {
            if let Some(slug) = data.title.as_deref().and_then(slug_from) {
                data.slug = Some(slug);
            }
        }
        _ => {
            data.slug = data.slug.as_deref().map(format_slug).filter(|s| !s.is_empty());
        }
    }
}

fn project(value: JsonValue, select: &[String]) -> JsonValue {
    let JsonValue::Object(mut obj) = value else {
        return value;
    };
    let mut out = Map::new();
    for key in std::iter::once("id").chain(select.iter().map(String::as_str)) {
        if let Some(v) = obj.remove(key) {
            out.insert(key.to_string(), v);
        }
    }
    JsonValue::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Fired {
        Change {
            slug: Option<String>,
            status: Status,
            previous: Option<Status>,
            quiet: bool,
        },
        Delete {
            slug: Option<String>,
        },
    }

    #[derive(Default)]
    struct RecordingHooks(Mutex<Vec<Fired>>);

    impl RecordingHooks {
        fn take(&self) -> Vec<Fired> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl CollectionHooks for RecordingHooks {
        fn after_change(&self, doc: &Opportunity, previous: Option<&Opportunity>, ctx: &RequestContext) {
            self.0.lock().unwrap().push(Fired::Change {
                slug: doc.data.slug.clone(),
                status: doc.status,
                previous: previous.map(|p| p.status),
                quiet: ctx.disable_revalidate,
            });
        }

        fn after_delete(&self, doc: &Opportunity, _: &RequestContext) {
            self.0.lock().unwrap().push(Fired::Delete {
                slug: doc.data.slug.clone(),
            });
        }
    }

    fn setup() -> (Collection, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::default());
        let collection = Collection::new(Arc::new(MemoryStore::new()), hooks.clone());
        (collection, hooks)
    }

    fn editor() -> Actor {
        Actor::editor("editor-1")
    }

    fn publishable(title: &str) -> JsonValue {
        json!({
            "title": title,
            "description": "Work on wet-lab protocols with the Smith group.",
            "researchType": ["Undergraduate Research"],
            "modalityKnown": true,
            "modality": ["in-person"],
            "contact": [{"type": "person", "name": "Dr. Smith", "email": "smith@example.edu"}],
            "keywords": [{"keyword": "biology"}, {"keyword": "genomics"}],
            "layout": [{"blockType": "content", "columns": []}],
        })
    }

    #[tokio::test]
    async fn drafts_may_be_incomplete_but_publishing_requires_fields() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let doc = c
            .create(&editor(), json!({"title": "Half Done"}), true, &ctx)
            .await
            .unwrap();
        assert_eq!(doc.status, Status::Draft);
        assert_eq!(doc.slug(), Some("half-done"));

        let err = c.publish(&editor(), doc.id, &ctx).await.unwrap_err();
        let CollectionError::Invalid(errors) = err else {
            panic!("expected validation failure, got {err:?}");
        };
        let paths = errors.paths();
        assert!(paths.contains(&"description"));
        assert!(paths.contains(&"researchType"));
        assert!(paths.contains(&"layout"));
    }

    #[tokio::test]
    async fn null_groups_and_date_only_published_at_are_accepted() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let mut input = publishable("Null Lab");
        input["dates"] = JsonValue::Null;
        input["deadline"] = JsonValue::Null;
        input["restrictions"] = JsonValue::Null;
        input["modalityKnown"] = JsonValue::Null;
        input["publishedAt"] = json!("2024-03-01");
        validate(c.schema, &input, ValidationMode::Draft).unwrap();

        let doc = c.create(&editor(), input, false, &ctx).await.unwrap();
        assert_eq!(doc.data.dates, findmylab_core::DateRange::default());
        assert!(!doc.data.modality_known());
        assert_eq!(
            doc.data.published_at.map(|at| at.to_rfc3339()),
            Some("2024-03-01T00:00:00+00:00".to_string())
        );

        let updated = c
            .update(&editor(), doc.id, json!({"keywords": null, "title": "Null Lab"}), false, &ctx)
            .await
            .unwrap();
        assert!(updated.data.keywords.is_empty());
    }

    #[tokio::test]
    async fn unknown_options_are_rejected_even_for_drafts() {
        let (c, _) = setup();
        let err = c
            .create(
                &editor(),
                json!({"title": "X", "researchType": ["Faculty Research"]}),
                true,
                &RequestContext::default(),
            )
            .await
            .unwrap_err();
        let CollectionError::Invalid(errors) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.paths(), vec!["researchType.0"]);
    }

    #[tokio::test]
    async fn second_document_with_same_explicit_slug_is_rejected() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let mut first = publishable("First");
        first["slug"] = json!("Shared Slug");
        let doc = c.create(&editor(), first, false, &ctx).await.unwrap();
        assert_eq!(doc.slug(), Some("shared-slug"));
        assert!(!doc.data.slug_lock);

        let mut second = publishable("Second");
        second["slug"] = json!("shared-slug");
        let err = c.create(&editor(), second, false, &ctx).await.unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateSlug(s) if s == "shared-slug"));
    }

    #[tokio::test]
    async fn locked_slug_follows_title_until_set_explicitly() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let doc = c.create(&editor(), publishable("Old Title"), true, &ctx).await.unwrap();
        let doc = c
            .update(&editor(), doc.id, json!({"title": "New Title"}), true, &ctx)
            .await
            .unwrap();
        assert_eq!(doc.slug(), Some("new-title"));

        let doc = c
            .update(&editor(), doc.id, json!({"slug": "custom"}), true, &ctx)
            .await
            .unwrap();
        let doc = c
            .update(&editor(), doc.id, json!({"title": "Renamed Again"}), true, &ctx)
            .await
            .unwrap();
        assert_eq!(doc.slug(), Some("custom"));
    }

    #[tokio::test]
    async fn fifty_five_saves_keep_the_newest_fifty_versions() {
        let (c, _) = setup();
        let ctx = RequestContext::quiet();
        let doc = c.create(&editor(), publishable("Busy Lab"), true, &ctx).await.unwrap();
        for i in 1..55 {
            c.update(&editor(), doc.id, json!({"description": format!("rev {i}")}), true, &ctx)
                .await
                .unwrap();
        }
        let versions = c.versions(&editor(), doc.id).await.unwrap();
        assert_eq!(versions.len(), MAX_VERSIONS_PER_DOC);
        assert_eq!(versions[0].version_no, 55);
        assert_eq!(versions[0].snapshot.data.description.as_deref(), Some("rev 54"));
        assert_eq!(versions.last().unwrap().version_no, 6);
    }

    #[tokio::test]
    async fn autosave_coalesces_into_one_version() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let doc = c.create(&editor(), publishable("Typing Lab"), true, &ctx).await.unwrap();
        for word in ["a", "ab", "abc"] {
            c.autosave(&editor(), doc.id, json!({"description": word}), &ctx)
                .await
                .unwrap();
        }
        let versions = c.versions(&editor(), doc.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].autosave);
        assert_eq!(versions[0].snapshot.data.description.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn anonymous_find_never_returns_drafts() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        c.create(&editor(), publishable("Live Lab"), false, &ctx).await.unwrap();
        c.create(&editor(), publishable("Hidden Lab"), true, &ctx).await.unwrap();

        let query = FindQuery {
            override_access: false,
            ..Default::default()
        };
        let anon = c.find(&Actor::Anonymous, &query).await.unwrap();
        assert_eq!(anon.total_docs, 1);
        assert_eq!(anon.docs[0]["title"], json!("Live Lab"));

        let editors = c.find(&editor(), &query).await.unwrap();
        assert_eq!(editors.total_docs, 2);

        let hidden = c.create(&editor(), publishable("Other"), true, &ctx).await.unwrap();
        let err = c.find_by_id(&Actor::Anonymous, hidden.id).await.unwrap_err();
        assert!(matches!(err, CollectionError::NotFound));
    }

    #[tokio::test]
    async fn anonymous_writes_are_forbidden() {
        let (c, _) = setup();
        let err = c
            .create(&Actor::Anonymous, publishable("Nope"), false, &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Forbidden));
    }

    #[tokio::test]
    async fn find_projects_paginates_and_populates() {
        let (c, _) = setup();
        let ctx = RequestContext::quiet();
        c.register_program(Program {
            id: "summer-2024".into(),
            title: "Summer Research 2024".into(),
            slug: Some("summer-research-2024".into()),
        })
        .await
        .unwrap();
        for i in 0..3 {
            let mut input = publishable(&format!("Lab {i}"));
            input["parent-program"] = json!("summer-2024");
            c.create(&editor(), input, false, &ctx).await.unwrap();
        }

        let query = FindQuery {
            depth: 1,
            limit: 2,
            page: 2,
            override_access: false,
            select: Some(vec!["title".into(), "parent-program".into()]),
        };
        let page = c.find(&Actor::Anonymous, &query).await.unwrap();
        assert_eq!(page.total_docs, 3);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_prev_page);
        assert!(!page.has_next_page);
        assert_eq!(page.docs.len(), 1);

        let doc = page.docs[0].as_object().unwrap();
        let mut keys: Vec<_> = doc.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "parent-program", "title"]);
        assert_eq!(doc["parent-program"]["title"], json!("Summer Research 2024"));

        let shallow = c
            .find(&Actor::Anonymous, &FindQuery { depth: 0, ..query })
            .await
            .unwrap();
        assert_eq!(shallow.docs[0]["parent-program"], json!("summer-2024"));
    }

    #[tokio::test]
    async fn hidden_values_are_stripped_before_storage() {
        let (c, _) = setup();
        let mut input = publishable("Strip Lab");
        input["modalityKnown"] = json!(false);
        input["deadline"] = json!({"isRolling": true, "date": "2024-05-01"});
        input["restrictions"] = json!({
            "has_required_courses": false,
            "requiredCourses": [{"courseCode": "BIO 101"}],
        });
        let doc = c
            .create(&editor(), input, false, &RequestContext::default())
            .await
            .unwrap();
        let stored = doc.to_json().unwrap();
        assert!(stored.get("modality").is_none());
        assert!(stored["deadline"].get("date").map_or(true, JsonValue::is_null));
        assert!(doc.data.restrictions.required_courses().is_none());
    }

    #[tokio::test]
    async fn published_at_is_populated_once() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let doc = c.create(&editor(), publishable("Dated"), true, &ctx).await.unwrap();
        let first = doc.data.published_at.unwrap();
        let doc = c.publish(&editor(), doc.id, &ctx).await.unwrap();
        assert_eq!(doc.data.published_at, Some(first));
    }

    #[tokio::test]
    async fn restore_brings_back_an_earlier_snapshot() {
        let (c, _) = setup();
        let ctx = RequestContext::default();
        let doc = c.create(&editor(), publishable("Original"), true, &ctx).await.unwrap();
        c.update(&editor(), doc.id, json!({"title": "Changed"}), true, &ctx)
            .await
            .unwrap();
        let oldest = c.versions(&editor(), doc.id).await.unwrap().pop().unwrap();

        let restored = c
            .restore_version(&editor(), doc.id, oldest.id, true, &ctx)
            .await
            .unwrap();
        assert_eq!(restored.data.title.as_deref(), Some("Original"));
        assert_eq!(restored.slug(), Some("original"));
        assert_eq!(c.versions(&editor(), doc.id).await.unwrap().len(), 3);

        let err = c
            .restore_version(&editor(), doc.id, Uuid::new_v4(), true, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::VersionNotFound(_)));
    }

    #[tokio::test]
    async fn scheduled_publish_runs_and_fires_hooks() {
        let (c, hooks) = setup();
        let ctx = RequestContext::default();
        let doc = c.create(&editor(), publishable("Later Lab"), true, &ctx).await.unwrap();
        hooks.take();

        let now = Utc::now();
        c.schedule(&editor(), doc.id, ScheduledAction::Publish, now - Duration::minutes(1))
            .await
            .unwrap();
        c.schedule(&editor(), doc.id, ScheduledAction::Unpublish, now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(c.run_scheduled(now).await.unwrap(), 1);
        assert!(c.find_by_id(&Actor::Anonymous, doc.id).await.unwrap().is_published());
        assert_eq!(
            hooks.take(),
            vec![Fired::Change {
                slug: Some("later-lab".into()),
                status: Status::Published,
                previous: Some(Status::Draft),
                quiet: false,
            }]
        );

        assert_eq!(c.run_scheduled(now).await.unwrap(), 0);
        assert_eq!(c.run_scheduled(now + Duration::hours(2)).await.unwrap(), 1);
        assert!(!c.find_by_id(&editor(), doc.id).await.unwrap().is_published());
    }

    #[tokio::test]
    async fn bio_lab_lifecycle_hands_hooks_the_committed_pair() {
        let (c, hooks) = setup();
        let ctx = RequestContext::default();
        let mut input = publishable("Bio Lab 2024");
        input["_status"] = json!("published");
        let doc = c.create(&editor(), input, false, &ctx).await.unwrap();
        assert_eq!(doc.slug(), Some("bio-lab-2024"));

        c.delete(&editor(), doc.id, &ctx).await.unwrap();
        assert_eq!(
            hooks.take(),
            vec![
                Fired::Change {
                    slug: Some("bio-lab-2024".into()),
                    status: Status::Published,
                    previous: None,
                    quiet: false,
                },
                Fired::Delete {
                    slug: Some("bio-lab-2024".into()),
                },
            ]
        );
        let err = c.delete(&editor(), doc.id, &ctx).await.unwrap_err();
        assert!(matches!(err, CollectionError::NotFound));
    }

    #[tokio::test]
    async fn request_context_reaches_hooks() {
        let (c, hooks) = setup();
        c.create(&editor(), publishable("Quiet"), true, &RequestContext::quiet())
            .await
            .unwrap();
        assert!(matches!(hooks.take()[..], [Fired::Change { quiet: true, .. }]));
    }
}
