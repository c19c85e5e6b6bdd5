use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
    /// Bearer token that grants editor access to the JSON API. With no token
    /// configured every caller is anonymous.
    pub service_token: Option<String>,
    /// Shared secret the admin UI appends to preview links.
    pub preview_secret: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            service_token: None,
            preview_secret: None,
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            port: std::env::var("FINDMYLAB_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            service_token: non_empty("FINDMYLAB_SERVICE_TOKEN"),
            preview_secret: non_empty("FINDMYLAB_PREVIEW_SECRET"),
        }
    }
}

/// Checks a caller-supplied secret against the configured one. Both sides
/// are hashed first so the comparison is constant-time and length-blind.
/// An unset or empty secret never matches.
pub fn secret_matches(configured: Option<&str>, given: Option<&str>) -> bool {
    match (configured, given) {
        (Some(expected), Some(given)) if !expected.is_empty() && !given.is_empty() => {
            let expected = Sha256::digest(expected.as_bytes());
            let given = Sha256::digest(given.as_bytes());
            expected.ct_eq(&given).into()
        }
        _ => false,
    }
}
