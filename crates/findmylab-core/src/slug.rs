//! URL-safe slugs derived from titles.

/// Spaces become hyphens, anything outside `[A-Za-z0-9_-]` is dropped, and
/// the result is lowercased.
pub fn format_slug(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Like [`format_slug`], but `None` when nothing usable is left.
pub fn slug_from(value: &str) -> Option<String> {
    let slug = format_slug(value);
    (!slug.is_empty()).then_some(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_titles() {
        assert_eq!(format_slug("Bio Lab 2024"), "bio-lab-2024");
        assert_eq!(format_slug("C++ & Rust: Systems!"), "c--rust-systems");
        assert_eq!(format_slug("snake_case_ok"), "snake_case_ok");
        assert_eq!(format_slug("Café Übung"), "caf-bung");
    }

    #[test]
    fn empty_results_become_none() {
        assert_eq!(slug_from("!!!"), None);
        assert_eq!(slug_from("Home").as_deref(), Some("home"));
    }
}
