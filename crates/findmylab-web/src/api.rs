//! JSON API for editors and internal clients.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use findmylab_core::{departments, schema, FieldError};
use findmylab_store::{
    Actor, CollectionError, FindQuery, RequestContext, ScheduledAction, StoreError,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::config::secret_matches;
use crate::AppState;

const SERVICE_EDITOR: &str = "service";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error(transparent)]
    Collection(#[from] CollectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let collection = match self {
            ApiError::Unauthorized => {
                return error_body(StatusCode::UNAUTHORIZED, "missing or invalid bearer token", None)
            }
            ApiError::Collection(err) => err,
        };
        let message = collection.to_string();
        match collection {
            CollectionError::Forbidden => error_body(StatusCode::FORBIDDEN, &message, None),
            CollectionError::NotFound | CollectionError::VersionNotFound(_) => {
                error_body(StatusCode::NOT_FOUND, &message, None)
            }
            CollectionError::DuplicateSlug(_) => error_body(StatusCode::CONFLICT, &message, None),
            CollectionError::Invalid(errors) => {
                error_body(StatusCode::BAD_REQUEST, "validation failed", Some(errors.0.as_slice()))
            }
            CollectionError::Malformed(_) => error_body(StatusCode::BAD_REQUEST, &message, None),
            CollectionError::Store(err) => {
                error!(error = %err, "store failure");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None)
            }
        }
    }
}

fn error_body(status: StatusCode, message: &str, fields: Option<&[FieldError]>) -> Response {
    let mut body = json!({ "message": message });
    if let Some(fields) = fields {
        body["errors"] = json!(fields);
    }
    (status, Json(body)).into_response()
}

type ApiResult<T> = Result<T, ApiError>;

/// Resolves the caller from the `Authorization` header. No header means an
/// anonymous reader; a header that does not carry the configured token is
/// rejected outright.
pub fn actor_from_headers(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Ok(Actor::Anonymous);
    };
    let token = raw
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if secret_matches(state.config.service_token.as_deref(), token) {
        Ok(Actor::editor(SERVICE_EDITOR))
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteParams {
    pub draft: bool,
    pub disable_revalidate: bool,
}

impl WriteParams {
    fn ctx(&self) -> RequestContext {
        RequestContext {
            disable_revalidate: self.disable_revalidate,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FindParams {
    pub depth: Option<u8>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    /// Comma-separated field names.
    pub select: Option<String>,
}

impl FindParams {
    /// HTTP callers never get the internal access override.
    pub fn to_query(&self) -> FindQuery {
        let defaults = FindQuery::default();
        FindQuery {
            depth: self.depth.unwrap_or(defaults.depth),
            limit: self.limit.unwrap_or(defaults.limit),
            page: self.page.unwrap_or(defaults.page),
            override_access: false,
            select: self.select.as_deref().map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    pub action: ScheduledAction,
    pub run_at: DateTime<Utc>,
}

fn doc_json(doc: &findmylab_core::Opportunity) -> ApiResult<JsonValue> {
    doc.to_json()
        .map_err(|err| ApiError::Collection(CollectionError::Store(StoreError::from(err))))
}

pub async fn list_opportunities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FindParams>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let page = state.collection.find(&actor, &params.to_query()).await?;
    Ok(Json(page).into_response())
}

pub async fn create_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<WriteParams>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state
        .collection
        .create(&actor, body, params.draft, &params.ctx())
        .await?;
    Ok((StatusCode::CREATED, Json(doc_json(&doc)?)).into_response())
}

pub async fn get_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state.collection.find_by_id(&actor, id).await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn update_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<WriteParams>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state
        .collection
        .update(&actor, id, body, params.draft, &params.ctx())
        .await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn delete_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<WriteParams>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state.collection.delete(&actor, id, &params.ctx()).await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn autosave_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<WriteParams>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state
        .collection
        .autosave(&actor, id, body, &params.ctx())
        .await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn publish_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<WriteParams>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state.collection.publish(&actor, id, &params.ctx()).await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn unpublish_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<WriteParams>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state.collection.unpublish(&actor, id, &params.ctx()).await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let versions = state.collection.versions(&actor, id).await?;
    Ok(Json(json!({ "docs": versions, "totalDocs": versions.len() })).into_response())
}

pub async fn restore_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath((id, version_id)): AxumPath<(Uuid, Uuid)>,
    Query(params): Query<WriteParams>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let doc = state
        .collection
        .restore_version(&actor, id, version_id, params.draft, &params.ctx())
        .await?;
    Ok(Json(doc_json(&doc)?).into_response())
}

pub async fn schedule_opportunity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<Response> {
    let actor = actor_from_headers(&state, &headers)?;
    let job = state
        .collection
        .schedule(&actor, id, body.action, body.run_at)
        .await?;
    Ok((StatusCode::CREATED, Json(job)).into_response())
}

pub async fn opportunities_schema() -> Response {
    Json(schema::opportunities()).into_response()
}

pub async fn list_departments() -> Response {
    Json(departments::all()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageCache, WebConfig};
    use axum::http::HeaderValue;
    use findmylab_store::{Collection, MemoryStore, NoopHooks};

    fn state_with_token(token: &str) -> AppState {
        let collection = Arc::new(Collection::new(Arc::new(MemoryStore::new()), Arc::new(NoopHooks)));
        let config = WebConfig {
            service_token: Some(token.into()),
            ..WebConfig::default()
        };
        AppState::new(collection, Arc::new(PageCache::new()), config)
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_must_match_the_configured_secret() {
        let state = state_with_token("editor-token");
        assert_eq!(
            actor_from_headers(&state, &bearer("Bearer editor-token")).unwrap(),
            Actor::editor(SERVICE_EDITOR)
        );
        assert_eq!(actor_from_headers(&state, &HeaderMap::new()).unwrap(), Actor::Anonymous);
        for wrong in ["Bearer editor-toke", "Bearer editor-token2", "Bearer ", "editor-token"] {
            assert!(matches!(
                actor_from_headers(&state, &bearer(wrong)),
                Err(ApiError::Unauthorized)
            ));
        }
    }

    #[test]
    fn find_params_split_select_and_never_override() {
        let params = FindParams {
            depth: Some(0),
            limit: None,
            page: Some(3),
            select: Some("title, slug,,keywords".into()),
        };
        let query = params.to_query();
        assert_eq!(query.depth, 0);
        assert_eq!(query.limit, 10);
        assert_eq!(query.page, 3);
        assert!(!query.override_access);
        assert_eq!(
            query.select,
            Some(vec!["title".to_string(), "slug".to_string(), "keywords".to_string()])
        );
        assert_eq!(FindParams::default().to_query().select, None);
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = ApiError::from(CollectionError::Invalid(findmylab_core::ValidationErrors(vec![
            FieldError::new("title", "This field is required."),
        ])));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(CollectionError::DuplicateSlug("x".into()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
