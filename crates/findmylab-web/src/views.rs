//! Public HTML pages and the editor preview.

use std::future::Future;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use findmylab_core::paths::{HOME_SLUG, LISTING_PATH};
use findmylab_core::{opportunity_path, Contact, Opportunity, Restrictions, COLLECTION_SLUG};
use findmylab_revalidate::SITEMAP_TAG;
use findmylab_store::{Actor, CollectionError, FindQuery};
use serde::Deserialize;
use tracing::warn;

use crate::cache::CachedPage;
use crate::config::secret_matches;
use crate::listing::{
    badge_for, dates_text, deadline_text, load_listing, modality_icons, Badge, ListingCard,
    ListingError, ModalityIcon,
};
use crate::AppState;

pub const X_CACHE: &str = "x-cache";

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    published_count: usize,
}

#[derive(Template)]
#[template(path = "listing.html")]
struct ListingTemplate {
    cards: Vec<ListingCard>,
}

#[derive(Template)]
#[template(path = "detail.html")]
struct DetailTemplate {
    view: DetailView,
    preview: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactView {
    pub name: String,
    pub department: Option<&'static str>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office: Option<String>,
}

impl ContactView {
    fn from_contact(contact: &Contact) -> Self {
        let office = [&contact.office.building, &contact.office.room, &contact.office.address]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>();
        Self {
            name: contact.name.clone().unwrap_or_default(),
            department: contact
                .department
                .as_ref()
                .and_then(|d| d.department())
                .map(|d| d.full_name),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            office: (!office.is_empty()).then(|| office.join(", ")),
        }
    }
}

/// Everything the detail page shows for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub title: String,
    pub status: &'static str,
    pub description: String,
    pub badges: Vec<Badge>,
    pub icons: Vec<ModalityIcon>,
    pub keywords: Vec<String>,
    pub program: Option<String>,
    pub dates: Option<String>,
    pub deadline: Option<String>,
    pub requirements: Vec<String>,
    pub contacts: Vec<ContactView>,
    pub affiliations: Vec<String>,
}

impl DetailView {
    pub fn new(doc: &Opportunity, program: Option<String>) -> Self {
        let data = &doc.data;
        Self {
            title: data.title.clone().unwrap_or_default(),
            status: doc.status.as_str(),
            description: data.description.clone().unwrap_or_default(),
            badges: data.research_type.iter().copied().map(badge_for).collect(),
            icons: modality_icons(data.modality()),
            keywords: data
                .keywords
                .iter()
                .filter_map(|k| k.keyword.clone())
                .collect(),
            program,
            dates: dates_text(&data.dates),
            deadline: deadline_text(data.deadline()),
            requirements: requirement_lines(&data.restrictions),
            contacts: data.contact.iter().map(ContactView::from_contact).collect(),
            affiliations: data
                .affiliations
                .iter()
                .map(|key| {
                    key.department()
                        .map_or_else(|| key.as_str().to_string(), |d| d.full_name.to_string())
                })
                .collect(),
        }
    }
}

/// Full eligibility text for the detail page. Course and hour rows only
/// appear when their toggles are on.
pub fn requirement_lines(restrictions: &Restrictions) -> Vec<String> {
    let mut lines = Vec::new();
    if restrictions.must_be_citizen {
        lines.push("Must be a U.S. citizen".to_string());
    }
    if restrictions.must_be_over_18 {
        lines.push("Must be 18 or older".to_string());
    }
    if restrictions.must_be_current_student {
        lines.push("Must be a current student".to_string());
    }
    for course in restrictions.required_courses().unwrap_or_default() {
        let Some(code) = course.course_code.as_deref() else {
            continue;
        };
        match course.note.as_deref().filter(|n| !n.is_empty()) {
            Some(note) => lines.push(format!("Required course: {code} ({note})")),
            None => lines.push(format!("Required course: {code}")),
        }
    }
    if let Some(hours) = restrictions.required_hours() {
        let mut line = match hours.hours {
            Some(h) => format!("At least {h} hours per week"),
            None => "Minimum weekly hours".to_string(),
        };
        if let Some(note) = hours.note.as_deref().filter(|n| !n.is_empty()) {
            line.push_str(&format!(" ({note})"));
        }
        lines.push(line);
    }
    if let Some(extra) = restrictions
        .additional_requirements
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        lines.push(extra.to_string());
    }
    lines
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewParams {
    pub slug: Option<String>,
    pub collection: Option<String>,
    pub path: Option<String>,
    pub preview_secret: Option<String>,
}

pub async fn home_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    serve_cached(&state, &headers, "/", render_home(&state)).await
}

pub async fn listing_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    serve_cached(&state, &headers, LISTING_PATH, render_listing(&state)).await
}

pub async fn detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(slug): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    if slug == HOME_SLUG {
        return Redirect::permanent("/").into_response();
    }
    let path = opportunity_path(&slug);
    serve_cached(&state, &headers, &path, render_detail(&state, &slug)).await
}

/// Target of editor preview links. Renders the current state of the
/// document, drafts included, and is never cached.
pub async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PreviewParams>,
) -> Response {
    let authorized = secret_matches(
        state.config.preview_secret.as_deref(),
        params.preview_secret.as_deref(),
    );
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            Html("You are not allowed to preview this page".to_string()),
        )
            .into_response();
    }
    if params.collection.as_deref() != Some(COLLECTION_SLUG) {
        return not_found();
    }
    let Some(slug) = params.slug.filter(|s| !s.is_empty()) else {
        return not_found();
    };

    let doc = match state
        .collection
        .find_by_slug(&Actor::editor("preview"), &slug)
        .await
    {
        Ok(doc) => doc,
        Err(CollectionError::NotFound) => return not_found(),
        Err(err) => return server_error(err.into()),
    };
    if let Some(path) = params.path.as_deref() {
        if path != opportunity_path(&slug) {
            warn!(%slug, path, "preview path does not match slug");
        }
    }

    let program = match parent_program_title(&state, &doc).await {
        Ok(program) => program,
        Err(err) => return server_error(err.into()),
    };
    let mut resp = render_html(DetailTemplate {
        view: DetailView::new(&doc, program),
        preview: true,
    });
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

async fn render_home(state: &AppState) -> Result<String, Response> {
    match state
        .collection
        .find_by_slug(&Actor::Anonymous, HOME_SLUG)
        .await
    {
        Ok(doc) => return render_doc(state, &doc).await,
        Err(CollectionError::NotFound) => {}
        Err(err) => return Err(server_error(err.into())),
    }

    let count_query = FindQuery {
        depth: 0,
        limit: 1,
        override_access: false,
        ..FindQuery::default()
    };
    let published = state
        .collection
        .find(&Actor::Anonymous, &count_query)
        .await
        .map_err(|err| server_error(err.into()))?;
    render_string(HomeTemplate {
        published_count: published.total_docs,
    })
}

pub(crate) async fn render_listing(state: &AppState) -> Result<String, Response> {
    match load_listing(&state.collection).await {
        Ok(cards) => render_string(ListingTemplate { cards }),
        Err(err @ ListingError::UnmappedResearchType(_)) => {
            warn!(error = %err, "listing render failed");
            Err(server_error(err.into()))
        }
        Err(err) => Err(server_error(err.into())),
    }
}

async fn render_detail(state: &AppState, slug: &str) -> Result<String, Response> {
    match state.collection.find_by_slug(&Actor::Anonymous, slug).await {
        Ok(doc) => render_doc(state, &doc).await,
        Err(CollectionError::NotFound) => Err(not_found()),
        Err(err) => Err(server_error(err.into())),
    }
}

async fn render_doc(state: &AppState, doc: &Opportunity) -> Result<String, Response> {
    let program = parent_program_title(state, doc)
        .await
        .map_err(|err| server_error(err.into()))?;
    render_string(DetailTemplate {
        view: DetailView::new(doc, program),
        preview: false,
    })
}

async fn parent_program_title(
    state: &AppState,
    doc: &Opportunity,
) -> Result<Option<String>, findmylab_store::StoreError> {
    let Some(id) = doc.data.parent_program.as_deref() else {
        return Ok(None);
    };
    Ok(state
        .collection
        .store()
        .program(id)
        .await?
        .map(|p| p.title))
}

/// Answers from the page cache when possible, otherwise renders, stores the
/// page under the sitemap tag and answers with it. Error responses are never
/// cached, nor is a page whose render overlapped an invalidation.
pub(crate) async fn serve_cached<F>(state: &AppState, headers: &HeaderMap, path: &str, render: F) -> Response
where
    F: Future<Output = Result<String, Response>>,
{
    if let Some(page) = state.cache.get(path).await {
        return page_response(&page, headers, "HIT");
    }
    let generation = state.cache.generation().await;
    let body = match render.await {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let page = CachedPage::new(body, &[SITEMAP_TAG]);
    state.cache.insert_if_current(path, &page, generation).await;
    page_response(&page, headers, "MISS")
}

fn page_response(page: &CachedPage, headers: &HeaderMap, cache_status: &'static str) -> Response {
    let etag = HeaderValue::from_str(&page.etag).ok();
    let fresh = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|candidates| {
            candidates
                .split(',')
                .any(|c| c.trim() == page.etag || c.trim() == "*")
        });

    let mut resp = if fresh {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Html(page.body.clone()).into_response()
    };
    if let Some(etag) = etag {
        resp.headers_mut().insert(header::ETAG, etag);
    }
    resp.headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(cache_status));
    resp
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("Opportunity not found".to_string())).into_response()
}

fn render_string<T: Template>(tpl: T) -> Result<String, Response> {
    tpl.render()
        .map_err(|err| server_error(anyhow::anyhow!(err.to_string())))
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

pub(crate) fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
