//! Pure planning: which cached pages a committed change makes stale.

use std::fmt;

use findmylab_core::{opportunity_path, Opportunity};
use findmylab_store::RequestContext;
use serde::Serialize;

/// Tag shared by every cached opportunity page and the sitemap.
pub const SITEMAP_TAG: &str = "opportunities-sitemap";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Invalidation {
    Path(String),
    Tag(String),
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalidation::Path(path) => write!(f, "path {path}"),
            Invalidation::Tag(tag) => write!(f, "tag {tag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The document is published now.
    Published,
    /// The document was published and no longer is.
    Withdrawn,
    Deleted,
}

/// One page to revalidate together with the sitemap tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revalidation {
    pub reason: Reason,
    pub path: String,
}

impl Revalidation {
    fn new(reason: Reason, slug: Option<&str>) -> Self {
        Self {
            reason,
            path: opportunity_path(slug.unwrap_or_default()),
        }
    }

    pub fn invalidations(&self) -> [Invalidation; 2] {
        [
            Invalidation::Path(self.path.clone()),
            Invalidation::Tag(SITEMAP_TAG.to_string()),
        ]
    }

    pub fn log_message(&self) -> String {
        match self.reason {
            Reason::Published => format!("Revalidating opportunity at path: {}", self.path),
            Reason::Withdrawn => format!("Revalidating old opportunity at path: {}", self.path),
            Reason::Deleted => format!("Revalidating deleted opportunity at path: {}", self.path),
        }
    }
}

/// A published document refreshes its own page. A document that stopped
/// being published refreshes the page it used to live at. A renamed
/// published document leaves its old path to the sitemap tag.
pub fn plan_after_change(
    doc: &Opportunity,
    previous: Option<&Opportunity>,
    ctx: &RequestContext,
) -> Vec<Revalidation> {
    if ctx.disable_revalidate {
        return Vec::new();
    }

    let mut plan = Vec::new();
    if doc.is_published() {
        plan.push(Revalidation::new(Reason::Published, doc.slug()));
    }
    if let Some(previous) = previous {
        if previous.is_published() && !doc.is_published() {
            plan.push(Revalidation::new(Reason::Withdrawn, previous.slug()));
        }
    }
    plan
}

/// A document without a slug still yields `/opportunity/`.
pub fn plan_after_delete(doc: &Opportunity, ctx: &RequestContext) -> Option<Revalidation> {
    (!ctx.disable_revalidate).then(|| Revalidation::new(Reason::Deleted, doc.slug()))
}

pub fn flatten(plan: &[Revalidation]) -> Vec<Invalidation> {
    plan.iter().flat_map(Revalidation::invalidations).collect()
}
