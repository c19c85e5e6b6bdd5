//! Typed Opportunity document model.
//!
//! Wire names follow the collection schema exactly (`researchType`,
//! `parent-program`, `has_required_courses`, ...). Fields gated by a sibling
//! flag are private; read them through the accessors, which return nothing
//! while the governing flag is off.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use crate::departments::DepartmentKey;
use crate::schema::SelectOption;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{value:?} is not a valid {field} option")]
pub struct UnknownOption {
    pub field: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResearchType {
    #[serde(rename = "Internship")]
    Internship,
    #[serde(rename = "Undergraduate Research")]
    UndergraduateResearch,
    #[serde(rename = "Graduate Research")]
    GraduateResearch,
    #[serde(rename = "Postdoctoral Research")]
    PostdoctoralResearch,
    #[serde(rename = "Other")]
    Other,
}

impl ResearchType {
    pub const ALL: [ResearchType; 5] = [
        ResearchType::Internship,
        ResearchType::UndergraduateResearch,
        ResearchType::GraduateResearch,
        ResearchType::PostdoctoralResearch,
        ResearchType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResearchType::Internship => "Internship",
            ResearchType::UndergraduateResearch => "Undergraduate Research",
            ResearchType::GraduateResearch => "Graduate Research",
            ResearchType::PostdoctoralResearch => "Postdoctoral Research",
            ResearchType::Other => "Other",
        }
    }

    pub fn options() -> Vec<SelectOption> {
        Self::ALL
            .iter()
            .map(|t| SelectOption::new(t.as_str(), t.as_str()))
            .collect()
    }
}

impl fmt::Display for ResearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchType {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownOption {
                field: "researchType",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    InPerson,
    Remote,
    Hybrid,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::InPerson, Modality::Remote, Modality::Hybrid];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::InPerson => "in-person",
            Modality::Remote => "remote",
            Modality::Hybrid => "hybrid",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Modality::InPerson => "In-Person",
            Modality::Remote => "Remote",
            Modality::Hybrid => "Hybrid",
        }
    }

    pub fn options() -> Vec<SelectOption> {
        Self::ALL
            .iter()
            .map(|m| SelectOption::new(m.label(), m.as_str()))
            .collect()
    }
}

impl FromStr for Modality {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownOption {
                field: "modality",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Person,
    Organization,
}

impl ContactKind {
    pub fn options() -> Vec<SelectOption> {
        vec![
            SelectOption::new("Person", "person"),
            SelectOption::new("Organization", "organization"),
        ]
    }
}

/// Visibility state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Published,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Published => "published",
        }
    }
}

impl FromStr for Status {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Status::Draft),
            "published" => Ok(Status::Published),
            other => Err(UnknownOption {
                field: "_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Serde adapter for optional calendar dates.
///
/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (keeping the UTC date) and
/// always writes `YYYY-MM-DD`.
pub mod calendar_date {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).date_naive())
        })
    }

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid calendar date {raw:?}"))),
        }
    }
}

/// Serde adapter for optional timestamps that also takes a bare `YYYY-MM-DD`
/// (read as midnight UTC), matching what a date field accepts.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                super::calendar_date::parse(raw)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        at.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, with = "calendar_date")]
    pub start: Option<NaiveDate>,
    #[serde(default, with = "calendar_date")]
    pub end: Option<NaiveDate>,
}

/// Resolved application deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Rolling,
    Fixed(NaiveDate),
    Unspecified,
}

/// Stored form of the deadline group: a rolling flag plus a date that only
/// counts while the flag is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineField {
    #[serde(default)]
    is_rolling: bool,
    #[serde(default, with = "calendar_date")]
    date: Option<NaiveDate>,
}

impl DeadlineField {
    pub fn resolve(&self) -> Deadline {
        match (self.is_rolling, self.date) {
            (true, _) => Deadline::Rolling,
            (false, Some(date)) => Deadline::Fixed(date),
            (false, None) => Deadline::Unspecified,
        }
    }

    pub fn is_rolling(&self) -> bool {
        self.is_rolling
    }
}

impl From<Deadline> for DeadlineField {
    fn from(deadline: Deadline) -> Self {
        match deadline {
            Deadline::Rolling => Self {
                is_rolling: true,
                date: None,
            },
            Deadline::Fixed(date) => Self {
                is_rolling: false,
                date: Some(date),
            },
            Deadline::Unspecified => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Office {
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<ContactKind>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<DepartmentKey>,
    #[serde(default)]
    pub office: Office,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Keyword {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl Keyword {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            id: None,
            keyword: Some(keyword.into()),
        }
    }

    /// Key used when rendering keyword lists: the row id, else the text.
    pub fn render_key(&self) -> &str {
        self.id
            .as_deref()
            .or(self.keyword.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequiredCourse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "courseCode")]
    pub course_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequiredHours {
    #[serde(default)]
    pub hours: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrictions {
    pub must_be_citizen: bool,
    pub must_be_over_18: bool,
    pub must_be_current_student: bool,
    has_required_courses: bool,
    #[serde(rename = "requiredCourses", skip_serializing_if = "Vec::is_empty")]
    required_courses: Vec<RequiredCourse>,
    has_required_hours: bool,
    #[serde(rename = "requiredHours", skip_serializing_if = "Option::is_none")]
    required_hours: Option<RequiredHours>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_requirements: Option<String>,
}

impl Restrictions {
    pub fn has_required_courses(&self) -> bool {
        self.has_required_courses
    }

    pub fn has_required_hours(&self) -> bool {
        self.has_required_hours
    }

    /// Required courses, or `None` while `has_required_courses` is off.
    pub fn required_courses(&self) -> Option<&[RequiredCourse]> {
        self.has_required_courses
            .then_some(self.required_courses.as_slice())
    }

    /// Required weekly hours, or `None` while `has_required_hours` is off.
    pub fn required_hours(&self) -> Option<&RequiredHours> {
        if self.has_required_hours {
            self.required_hours.as_ref()
        } else {
            None
        }
    }

    pub fn set_required_courses(&mut self, courses: Option<Vec<RequiredCourse>>) {
        self.has_required_courses = courses.is_some();
        self.required_courses = courses.unwrap_or_default();
    }

    pub fn set_required_hours(&mut self, hours: Option<RequiredHours>) {
        self.has_required_hours = hours.is_some();
        self.required_hours = hours;
    }

    fn assign_row_ids(&mut self) {
        for course in &mut self.required_courses {
            fill_row_id(&mut course.id);
        }
    }
}

/// Opaque content block. Only `blockType` is interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBlock {
    #[serde(rename = "blockType")]
    pub block_type: String,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl LayoutBlock {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            fields: Map::new(),
        }
    }
}

/// Editable content of an Opportunity. Required-ness is enforced by schema
/// validation at publish time, so drafts may leave most of it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpportunityData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub research_type: Vec<ResearchType>,
    modality_known: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    modality: Vec<Modality>,
    pub dates: DateRange,
    pub deadline: DeadlineField,
    #[serde(rename = "parent-program")]
    pub parent_program: Option<String>,
    pub contact: Vec<Contact>,
    pub affiliations: Vec<DepartmentKey>,
    pub keywords: Vec<Keyword>,
    pub restrictions: Restrictions,
    pub layout: Vec<LayoutBlock>,
    #[serde(with = "timestamp")]
    pub published_at: Option<DateTime<Utc>>,
    pub slug: Option<String>,
    pub slug_lock: bool,
}

impl Default for OpportunityData {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            research_type: Vec::new(),
            modality_known: false,
            modality: Vec::new(),
            dates: DateRange::default(),
            deadline: DeadlineField::default(),
            parent_program: None,
            contact: Vec::new(),
            affiliations: Vec::new(),
            keywords: Vec::new(),
            restrictions: Restrictions::default(),
            layout: Vec::new(),
            published_at: None,
            slug: None,
            slug_lock: true,
        }
    }
}

impl OpportunityData {
    pub fn modality_known(&self) -> bool {
        self.modality_known
    }

    /// Declared modalities; empty while `modalityKnown` is off.
    pub fn modality(&self) -> &[Modality] {
        if self.modality_known {
            &self.modality
        } else {
            &[]
        }
    }

    pub fn set_modality(&mut self, modality: Option<Vec<Modality>>) {
        self.modality_known = modality.is_some();
        self.modality = modality.unwrap_or_default();
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline.resolve()
    }

    /// Gives every array row without an id a fresh one. Existing ids are
    /// kept so keyed rendering stays stable across saves.
    pub fn assign_row_ids(&mut self) {
        for contact in &mut self.contact {
            fill_row_id(&mut contact.id);
        }
        for keyword in &mut self.keywords {
            fill_row_id(&mut keyword.id);
        }
        self.restrictions.assign_row_ids();
    }
}

fn fill_row_id(id: &mut Option<String>) {
    if id.as_deref().map_or(true, str::is_empty) {
        *id = Some(Uuid::new_v4().simple().to_string());
    }
}

/// A stored Opportunity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: OpportunityData,
    #[serde(rename = "_status")]
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn slug(&self) -> Option<&str> {
        self.data.slug.as_deref()
    }

    pub fn is_published(&self) -> bool {
        self.status == Status::Published
    }

    pub fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }

    /// Projection used when this document is referenced from elsewhere.
    pub fn default_projection(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id,
            "title": self.data.title,
            "slug": self.data.slug,
        })
    }
}

/// Target of the `parent-program` relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl Program {
    pub fn default_projection(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id,
            "title": self.title,
            "slug": self.slug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn research_type_uses_display_names_on_the_wire() {
        let v = serde_json::to_value(ResearchType::UndergraduateResearch).unwrap();
        assert_eq!(v, json!("Undergraduate Research"));
        assert_eq!(
            "Postdoctoral Research".parse::<ResearchType>().unwrap(),
            ResearchType::PostdoctoralResearch
        );
        let err = "Faculty Research".parse::<ResearchType>().unwrap_err();
        assert_eq!(err.field, "researchType");
    }

    #[test]
    fn modality_is_hidden_until_known() {
        let mut data: OpportunityData = serde_json::from_value(json!({
            "modalityKnown": false,
            "modality": ["remote"],
        }))
        .unwrap();
        assert!(data.modality().is_empty());

        data.set_modality(Some(vec![Modality::Remote, Modality::Hybrid]));
        assert_eq!(data.modality(), &[Modality::Remote, Modality::Hybrid]);

        data.set_modality(None);
        assert!(!data.modality_known());
        assert!(data.modality().is_empty());
    }

    #[test]
    fn rolling_deadline_ignores_stale_date() {
        let field: DeadlineField =
            serde_json::from_value(json!({"isRolling": true, "date": "2024-05-01"})).unwrap();
        assert_eq!(field.resolve(), Deadline::Rolling);

        let field: DeadlineField =
            serde_json::from_value(json!({"date": "2024-05-01T00:00:00.000Z"})).unwrap();
        assert_eq!(
            field.resolve(),
            Deadline::Fixed(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
    }

    #[test]
    fn published_at_takes_a_bare_date_as_midnight_utc() {
        let data: OpportunityData =
            serde_json::from_value(json!({"publishedAt": "2024-03-01"})).unwrap();
        let at = data.published_at.unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let data: OpportunityData =
            serde_json::from_value(json!({"publishedAt": "2024-03-01T12:30:00Z"})).unwrap();
        assert_eq!(data.published_at.unwrap().to_rfc3339(), "2024-03-01T12:30:00+00:00");

        let back = serde_json::to_value(&data).unwrap();
        let again: OpportunityData = serde_json::from_value(back).unwrap();
        assert_eq!(again.published_at, data.published_at);
        assert!(serde_json::from_value::<OpportunityData>(json!({"publishedAt": "soon"})).is_err());
    }

    #[test]
    fn required_courses_ignored_when_flag_is_off() {
        let restrictions: Restrictions = serde_json::from_value(json!({
            "has_required_courses": false,
            "requiredCourses": [{"courseCode": "CS 225"}],
            "has_required_hours": true,
            "requiredHours": {"hours": 10, "note": "weekday mornings"},
        }))
        .unwrap();
        assert!(restrictions.required_courses().is_none());
        assert_eq!(restrictions.required_hours().unwrap().hours, Some(10.0));
    }

    #[test]
    fn row_ids_are_filled_once_and_then_kept() {
        let mut data = OpportunityData {
            keywords: vec![Keyword::new("genomics"), Keyword::new("python")],
            ..Default::default()
        };
        data.assign_row_ids();
        let first: Vec<_> = data.keywords.iter().map(|k| k.id.clone().unwrap()).collect();
        data.assign_row_ids();
        let second: Vec<_> = data.keywords.iter().map(|k| k.id.clone().unwrap()).collect();
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn keyword_render_key_falls_back_to_text() {
        let kw = Keyword::new("ecology");
        assert_eq!(kw.render_key(), "ecology");
    }

    #[test]
    fn document_flattens_data_and_status() {
        let doc = Opportunity {
            id: Uuid::nil(),
            data: OpportunityData {
                title: Some("Bio Lab".into()),
                slug: Some("bio-lab".into()),
                ..Default::default()
            },
            status: Status::Published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let v = doc.to_json().unwrap();
        assert_eq!(v["_status"], json!("published"));
        assert_eq!(v["title"], json!("Bio Lab"));
        assert_eq!(v["slugLock"], json!(true));
        let back: Opportunity = serde_json::from_value(v).unwrap();
        assert_eq!(back, doc);
    }
}
