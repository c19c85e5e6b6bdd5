//! Targets that can drop cached pages by path or by tag.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::plan::Invalidation;

#[derive(Debug, Error)]
pub enum InvalidateError {
    #[error("revalidate request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("revalidate endpoint answered {status} for {target}")]
    Status { status: u16, target: Invalidation },
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait Invalidator: Send + Sync {
    async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError>;
    async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError>;

    async fn apply(&self, invalidation: &Invalidation) -> Result<(), InvalidateError> {
        match invalidation {
            Invalidation::Path(path) => self.invalidate_path(path).await,
            Invalidation::Tag(tag) => self.invalidate_tag(tag).await,
        }
    }
}

#[derive(Debug, Default)]
pub struct NoopInvalidator;

#[async_trait]
impl Invalidator for NoopInvalidator {
    async fn invalidate_path(&self, _path: &str) -> Result<(), InvalidateError> {
        Ok(())
    }

    async fn invalidate_tag(&self, _tag: &str) -> Result<(), InvalidateError> {
        Ok(())
    }
}

/// Keeps every invalidation in arrival order.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    log: Mutex<Vec<Invalidation>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Invalidation> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Vec<Invalidation> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, invalidation: Invalidation) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invalidation);
    }
}

#[async_trait]
impl Invalidator for RecordingInvalidator {
    async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError> {
        self.push(Invalidation::Path(path.to_string()));
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError> {
        self.push(Invalidation::Tag(tag.to_string()));
        Ok(())
    }
}

/// Applies each invalidation to every target, carrying on past failures.
/// The first failure is returned once all targets have been tried.
#[derive(Clone, Default)]
pub struct FanoutInvalidator {
    targets: Vec<Arc<dyn Invalidator>>,
}

impl FanoutInvalidator {
    pub fn new(targets: Vec<Arc<dyn Invalidator>>) -> Self {
        Self { targets }
    }

    pub fn with(mut self, target: Arc<dyn Invalidator>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    async fn fan_out(&self, invalidation: Invalidation) -> Result<(), InvalidateError> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(err) = target.apply(&invalidation).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Invalidator for FanoutInvalidator {
    async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError> {
        self.fan_out(Invalidation::Path(path.to_string())).await
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError> {
        self.fan_out(Invalidation::Tag(tag.to_string())).await
    }
}

pub const SECRET_HEADER: &str = "x-revalidate-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpInvalidatorConfig {
    pub url: String,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl HttpInvalidatorConfig {
    /// `None` unless `FINDMYLAB_REVALIDATE_URL` is set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("FINDMYLAB_REVALIDATE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        Some(Self {
            url,
            secret: std::env::var("FINDMYLAB_REVALIDATE_SECRET").ok(),
            timeout: Duration::from_secs(5),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RevalidateBody<'a> {
    Path { path: &'a str },
    Tag { tag: &'a str },
}

/// Forwards invalidations to an external frontend's revalidate endpoint.
#[derive(Debug, Clone)]
pub struct HttpInvalidator {
    client: reqwest::Client,
    config: HttpInvalidatorConfig,
}

impl HttpInvalidator {
    pub fn new(config: HttpInvalidatorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building revalidate http client")?;
        Ok(Self { client, config })
    }

    async fn post(&self, body: RevalidateBody<'_>, target: Invalidation) -> Result<(), InvalidateError> {
        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(secret) = &self.config.secret {
            request = request.header(SECRET_HEADER, secret);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(InvalidateError::Status {
                status: status.as_u16(),
                target,
            })
        }
    }
}

#[async_trait]
impl Invalidator for HttpInvalidator {
    async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError> {
        self.post(RevalidateBody::Path { path }, Invalidation::Path(path.to_string()))
            .await
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError> {
        self.post(RevalidateBody::Tag { tag }, Invalidation::Tag(tag.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value as JsonValue;

    struct Failing;

    #[async_trait]
    impl Invalidator for Failing {
        async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError> {
            Err(InvalidateError::Rejected(format!("no cache for {path}")))
        }

        async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError> {
            Err(InvalidateError::Rejected(format!("no cache for {tag}")))
        }
    }

    #[tokio::test]
    async fn fanout_continues_past_failures() {
        let recorder = Arc::new(RecordingInvalidator::new());
        let fanout = FanoutInvalidator::new(vec![Arc::new(Failing), recorder.clone()]);

        let err = fanout.invalidate_path("/opportunity/a").await.unwrap_err();
        assert!(err.to_string().contains("/opportunity/a"));
        fanout.invalidate_tag("opportunities-sitemap").await.unwrap_err();

        assert_eq!(
            recorder.take(),
            vec![
                Invalidation::Path("/opportunity/a".into()),
                Invalidation::Tag("opportunities-sitemap".into()),
            ]
        );
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, JsonValue)>>>;

    async fn capture(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<JsonValue>,
    ) -> StatusCode {
        let secret = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reject = body.get("tag").is_some_and(|t| t == "broken");
        seen.lock().unwrap().push((secret, body));
        if reject {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    #[tokio::test]
    async fn http_invalidator_posts_path_and_tag_with_secret() {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/api/revalidate", post(capture))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let invalidator = HttpInvalidator::new(HttpInvalidatorConfig {
            url: format!("http://{addr}/api/revalidate"),
            secret: Some("s3cret".into()),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        invalidator.invalidate_path("/opportunity/bio-lab-2024").await.unwrap();
        invalidator.invalidate_tag("opportunities-sitemap").await.unwrap();
        let err = invalidator.invalidate_tag("broken").await.unwrap_err();
        assert!(matches!(err, InvalidateError::Status { status: 500, .. }));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0.as_deref(), Some("s3cret"));
        assert_eq!(seen[0].1, serde_json::json!({"path": "/opportunity/bio-lab-2024"}));
        assert_eq!(seen[1].1, serde_json::json!({"tag": "opportunities-sitemap"}));
    }
}
