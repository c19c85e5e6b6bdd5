//! Data shaping for the public opportunities listing.

use std::str::FromStr;

use findmylab_core::{
    opportunity_path, DateRange, Deadline, DeadlineField, Keyword, Modality, ResearchType,
    Restrictions,
};
use findmylab_store::{Actor, Collection, CollectionError, FindQuery};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const LISTING_LIMIT: usize = 12;
pub const LISTING_DEPTH: u8 = 1;
pub const LISTING_SELECT: [&str; 8] = [
    "title",
    "slug",
    "keywords",
    "restrictions",
    "researchType",
    "modality",
    "dates",
    "deadline",
];
pub const MAX_KEYWORD_BADGES: usize = 3;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("research type {0:?} has no badge mapping")]
    UnmappedResearchType(String),
    #[error("malformed listing document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Query(#[from] CollectionError),
}

/// The listing reads as an anonymous visitor would, so drafts never show.
pub fn listing_query() -> FindQuery {
    FindQuery {
        depth: LISTING_DEPTH,
        limit: LISTING_LIMIT,
        page: 1,
        override_access: false,
        select: Some(LISTING_SELECT.iter().map(|s| s.to_string()).collect()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub short_name: &'static str,
    pub title: &'static str,
    pub class: &'static str,
}

pub fn badge_for(research_type: ResearchType) -> Badge {
    let (short_name, class) = match research_type {
        ResearchType::UndergraduateResearch => ("UG", "bg-blue-100 text-blue-800"),
        ResearchType::GraduateResearch => ("Grad", "bg-blue-300 text-blue-900"),
        ResearchType::PostdoctoralResearch => ("Postdoc", "bg-blue-900 text-gray-100"),
        ResearchType::Internship => ("Internship", "bg-teal-100 text-teal-900"),
        ResearchType::Other => ("Other", "bg-gray-100 text-gray-900"),
    };
    Badge {
        short_name,
        title: research_type.as_str(),
        class,
    }
}

/// Stored values are strings on the wire; anything outside the badge table
/// fails the whole render.
pub fn badge_for_raw(raw: &str) -> Result<Badge, ListingError> {
    ResearchType::from_str(raw)
        .map(badge_for)
        .map_err(|_| ListingError::UnmappedResearchType(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalityIcon {
    pub icon: &'static str,
    pub label: &'static str,
}

/// One icon per declared modality, always in-person, remote, hybrid order.
pub fn modality_icons(modality: &[Modality]) -> Vec<ModalityIcon> {
    Modality::ALL
        .into_iter()
        .filter(|m| modality.contains(m))
        .map(|m| ModalityIcon {
            icon: match m {
                Modality::InPerson => "school",
                Modality::Remote => "home",
                Modality::Hybrid => "blend",
            },
            label: m.label(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordBadge {
    pub key: String,
    pub text: String,
}

pub fn keyword_badges(keywords: &[Keyword]) -> Vec<KeywordBadge> {
    keywords
        .iter()
        .take(MAX_KEYWORD_BADGES)
        .map(|k| KeywordBadge {
            key: k.render_key().to_string(),
            text: k.keyword.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn deadline_text(deadline: Deadline) -> Option<String> {
    match deadline {
        Deadline::Rolling => Some("Rolling deadline".to_string()),
        Deadline::Fixed(date) => Some(format!("Apply by {}", date.format("%Y-%m-%d"))),
        Deadline::Unspecified => None,
    }
}

pub fn dates_text(dates: &DateRange) -> Option<String> {
    let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();
    match (dates.start, dates.end) {
        (Some(start), Some(end)) => Some(format!("{} to {}", fmt(start), fmt(end))),
        (Some(start), None) => Some(format!("Starts {}", fmt(start))),
        (None, Some(end)) => Some(format!("Ends {}", fmt(end))),
        (None, None) => None,
    }
}

/// Short eligibility flags shown under a card.
pub fn restriction_notes(restrictions: &Restrictions) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if restrictions.must_be_citizen {
        notes.push("Citizens only");
    }
    if restrictions.must_be_over_18 {
        notes.push("18+");
    }
    if restrictions.must_be_current_student {
        notes.push("Current students");
    }
    if restrictions.required_courses().is_some_and(|c| !c.is_empty()) {
        notes.push("Prerequisite courses");
    }
    if restrictions.required_hours().is_some() {
        notes.push("Minimum hours");
    }
    notes
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListingDoc {
    title: Option<String>,
    slug: Option<String>,
    keywords: Vec<Keyword>,
    restrictions: Restrictions,
    research_type: Vec<String>,
    modality: Vec<Modality>,
    dates: DateRange,
    deadline: DeadlineField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCard {
    pub title: String,
    pub slug: String,
    pub href: String,
    pub badges: Vec<Badge>,
    pub icons: Vec<ModalityIcon>,
    pub keywords: Vec<KeywordBadge>,
    pub dates: Option<String>,
    pub deadline: Option<String>,
    pub notes: Vec<&'static str>,
}

pub fn card_from_doc(doc: &JsonValue) -> Result<ListingCard, ListingError> {
    let doc = ListingDoc::deserialize(doc)?;
    let badges = doc
        .research_type
        .iter()
        .map(|raw| badge_for_raw(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let slug = doc.slug.unwrap_or_default();
    Ok(ListingCard {
        title: doc.title.unwrap_or_default(),
        href: opportunity_path(&slug),
        slug,
        badges,
        icons: modality_icons(&doc.modality),
        keywords: keyword_badges(&doc.keywords),
        dates: dates_text(&doc.dates),
        deadline: deadline_text(doc.deadline.resolve()),
        notes: restriction_notes(&doc.restrictions),
    })
}

/// Runs the listing query and shapes each document into exactly one card.
pub async fn load_listing(collection: &Collection) -> Result<Vec<ListingCard>, ListingError> {
    let page = collection.find(&Actor::Anonymous, &listing_query()).await?;
    page.docs.iter().map(card_from_doc).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use findmylab_store::{MemoryStore, NoopHooks, RequestContext};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn badge_table_covers_every_research_type() {
        let shorts: Vec<_> = ResearchType::ALL.into_iter().map(|t| badge_for(t).short_name).collect();
        assert_eq!(shorts, vec!["Internship", "UG", "Grad", "Postdoc", "Other"]);
        assert_eq!(badge_for_raw("Graduate Research").unwrap().class, "bg-blue-300 text-blue-900");
    }

    #[test]
    fn unmapped_research_type_is_fatal() {
        let doc = json!({"title": "X", "slug": "x", "researchType": ["Faculty Research"]});
        let err = card_from_doc(&doc).unwrap_err();
        assert!(matches!(err, ListingError::UnmappedResearchType(v) if v == "Faculty Research"));
    }

    #[test]
    fn remote_and_hybrid_render_two_icons() {
        let icons = modality_icons(&[Modality::Hybrid, Modality::Remote]);
        let names: Vec<_> = icons.iter().map(|i| i.icon).collect();
        assert_eq!(names, vec!["home", "blend"]);
        assert!(modality_icons(&[]).is_empty());
    }

    #[test]
    fn only_first_three_keywords_render() {
        let doc = json!({
            "slug": "k",
            "keywords": [
                {"id": "a1", "keyword": "genomics"},
                {"keyword": "python"},
                {"id": "c3", "keyword": "microscopy"},
                {"id": "d4", "keyword": "statistics"},
                {"id": "e5", "keyword": "field work"},
            ],
        });
        let card = card_from_doc(&doc).unwrap();
        assert_eq!(
            card.keywords,
            vec![
                KeywordBadge { key: "a1".into(), text: "genomics".into() },
                KeywordBadge { key: "python".into(), text: "python".into() },
                KeywordBadge { key: "c3".into(), text: "microscopy".into() },
            ]
        );
    }

    #[test]
    fn card_texts() {
        let doc = json!({
            "title": "Coral Lab",
            "slug": "coral-lab",
            "researchType": ["Internship", "Undergraduate Research"],
            "dates": {"start": "2024-06-01", "end": "2024-08-15"},
            "deadline": {"isRolling": false, "date": "2024-05-01"},
            "restrictions": {"must_be_citizen": true, "has_required_courses": false,
                             "requiredCourses": [{"courseCode": "BIO 101"}]},
        });
        let card = card_from_doc(&doc).unwrap();
        assert_eq!(card.href, "/opportunity/coral-lab");
        assert_eq!(card.badges.len(), 2);
        assert_eq!(card.dates.as_deref(), Some("2024-06-01 to 2024-08-15"));
        assert_eq!(card.deadline.as_deref(), Some("Apply by 2024-05-01"));
        assert_eq!(card.notes, vec!["Citizens only"]);
    }

    #[tokio::test]
    async fn listing_renders_each_published_document_once() {
        let collection = Collection::new(Arc::new(MemoryStore::new()), Arc::new(NoopHooks));
        let editor = Actor::editor("e");
        let ctx = RequestContext::quiet();
        for (title, draft) in [("Alpha Lab", false), ("Beta Lab", false), ("Gamma Draft", true)] {
            collection
                .create(
                    &editor,
                    json!({
                        "title": title,
                        "description": "d",
                        "researchType": ["Other"],
                        "layout": [{"blockType": "cta"}],
                    }),
                    draft,
                    &ctx,
                )
                .await
                .unwrap();
        }

        let cards = load_listing(&collection).await.unwrap();
        let mut slugs: Vec<_> = cards.iter().map(|c| c.slug.as_str()).collect();
        slugs.sort_unstable();
        assert_eq!(slugs, vec!["alpha-lab", "beta-lab"]);
    }

    #[test]
    fn listing_query_contract() {
        let q = listing_query();
        assert_eq!((q.limit, q.depth, q.override_access), (12, 1, false));
        assert_eq!(q.select.unwrap().len(), 8);
    }
}
