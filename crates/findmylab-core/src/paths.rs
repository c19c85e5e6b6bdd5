//! Public paths for Opportunity documents.

use crate::schema::COLLECTION_SLUG;

pub const HOME_SLUG: &str = "home";
pub const OPPORTUNITY_PREFIX: &str = "/opportunity/";
pub const LISTING_PATH: &str = "/opportunities";

/// `"home"` maps to `/`, everything else to `/opportunity/{slug}`.
pub fn opportunity_path(slug: &str) -> String {
    if slug == HOME_SLUG {
        "/".to_string()
    } else {
        format!("{OPPORTUNITY_PREFIX}{slug}")
    }
}

/// Path of the preview endpoint for a document, as used by live preview.
pub fn preview_path(slug: &str, preview_secret: &str) -> Result<String, serde_urlencoded::ser::Error> {
    let path = opportunity_path(slug);
    let query = serde_urlencoded::to_string([
        ("slug", slug),
        ("collection", COLLECTION_SLUG),
        ("path", path.as_str()),
        ("previewSecret", preview_secret),
    ])?;
    Ok(format!("/next/preview?{query}"))
}
