//! Rendered-page cache keyed by request path, with tag groups for bulk
//! invalidation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use findmylab_revalidate::{InvalidateError, Invalidator};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub body: String,
    /// Quoted strong validator, ready for the `ETag` header.
    pub etag: String,
    pub tags: Vec<String>,
}

impl CachedPage {
    pub fn new(body: String, tags: &[&str]) -> Self {
        Self {
            etag: format!("\"{}\"", sha256_hex(body.as_bytes())),
            body,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct CacheState {
    pages: HashMap<String, CachedPage>,
    by_tag: HashMap<String, HashSet<String>>,
    /// Bumped by every invalidation.
    generation: u64,
}

impl CacheState {
    fn remove(&mut self, path: &str) -> bool {
        let Some(page) = self.pages.remove(path) else {
            return false;
        };
        for tag in &page.tags {
            if let Some(paths) = self.by_tag.get_mut(tag) {
                paths.remove(path);
                if paths.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct PageCache {
    state: RwLock<CacheState>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<CachedPage> {
        self.state.read().await.pages.get(path).cloned()
    }

    /// Current invalidation generation. Read it before rendering a page and
    /// hand it to [`PageCache::insert_if_current`].
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    pub async fn insert(&self, path: &str, page: CachedPage) -> CachedPage {
        let mut state = self.state.write().await;
        Self::store(&mut state, path, page.clone());
        page
    }

    /// Stores the page only if no invalidation ran since `generation` was
    /// read; a render that raced a write is served once and dropped.
    pub async fn insert_if_current(&self, path: &str, page: &CachedPage, generation: u64) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!(path, "page rendered before an invalidation; not cached");
            return false;
        }
        Self::store(&mut state, path, page.clone());
        true
    }

    fn store(state: &mut CacheState, path: &str, page: CachedPage) {
        state.remove(path);
        for tag in &page.tags {
            state
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(path.to_string());
        }
        state.pages.insert(path.to_string(), page);
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.state.read().await.pages.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.pages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Invalidator for PageCache {
    async fn invalidate_path(&self, path: &str) -> Result<(), InvalidateError> {
        let mut state = self.state.write().await;
        state.generation += 1;
        let removed = state.remove(path);
        debug!(path, removed, "page cache path invalidated");
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), InvalidateError> {
        let mut state = self.state.write().await;
        state.generation += 1;
        let paths = state.by_tag.remove(tag).unwrap_or_default();
        for path in &paths {
            state.remove(path);
        }
        debug!(tag, removed = paths.len(), "page cache tag invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findmylab_revalidate::SITEMAP_TAG;

    #[test]
    fn etag_is_sha256_of_body() {
        let page = CachedPage::new("hello".into(), &[]);
        assert_eq!(
            page.etag,
            "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        );
    }

    #[tokio::test]
    async fn path_invalidation_drops_one_page() {
        let cache = PageCache::new();
        cache.insert("/opportunity/a", CachedPage::new("a".into(), &[SITEMAP_TAG])).await;
        cache.insert("/opportunity/b", CachedPage::new("b".into(), &[SITEMAP_TAG])).await;

        cache.invalidate_path("/opportunity/a").await.unwrap();
        assert!(!cache.contains("/opportunity/a").await);
        assert!(cache.contains("/opportunity/b").await);

        cache.invalidate_path("/never-cached").await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn tag_invalidation_drops_every_tagged_page() {
        let cache = PageCache::new();
        cache.insert("/opportunities", CachedPage::new("list".into(), &[SITEMAP_TAG])).await;
        cache.insert("/opportunity/a", CachedPage::new("a".into(), &[SITEMAP_TAG])).await;
        cache.insert("/about", CachedPage::new("about".into(), &[])).await;

        cache.invalidate_tag(SITEMAP_TAG).await.unwrap();
        assert!(!cache.contains("/opportunities").await);
        assert!(!cache.contains("/opportunity/a").await);
        assert!(cache.contains("/about").await);

        // A re-inserted page is tracked under its tag again.
        cache.insert("/opportunities", CachedPage::new("list".into(), &[SITEMAP_TAG])).await;
        cache.invalidate_tag(SITEMAP_TAG).await.unwrap();
        assert!(!cache.is_empty().await);
        assert!(!cache.contains("/opportunities").await);
    }

    #[tokio::test]
    async fn render_that_raced_an_invalidation_is_not_stored() {
        let cache = PageCache::new();
        let seen = cache.generation().await;
        // A publish lands while the listing is still rendering.
        cache.invalidate_tag(SITEMAP_TAG).await.unwrap();

        let stale = CachedPage::new("old list".into(), &[SITEMAP_TAG]);
        assert!(!cache.insert_if_current("/opportunities", &stale, seen).await);
        assert!(!cache.contains("/opportunities").await);

        let seen = cache.generation().await;
        let fresh = CachedPage::new("new list".into(), &[SITEMAP_TAG]);
        assert!(cache.insert_if_current("/opportunities", &fresh, seen).await);
        assert_eq!(cache.get("/opportunities").await, Some(fresh));

        cache.invalidate_path("/opportunity/other").await.unwrap();
        assert!(!cache.insert_if_current("/opportunities", &stale, seen).await);
        assert_eq!(cache.get("/opportunities").await.unwrap().body, "new list");
    }
}
