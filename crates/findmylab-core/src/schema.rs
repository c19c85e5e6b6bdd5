//! Declarative field schema for the `opportunities` collection.
//!
//! The schema is plain data: validation (see [`crate::validate`]) walks it,
//! the editor API serves it as JSON, and access/version settings are read
//! from it by the collection service.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::departments;
use crate::model::{ContactKind, Modality, ResearchType};

pub const COLLECTION_SLUG: &str = "opportunities";
pub const PROGRAMS_COLLECTION_SLUG: &str = "programs";
pub const MAX_VERSIONS_PER_DOC: usize = 50;
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub label: &'static str,
    pub value: &'static str,
}

impl SelectOption {
    pub fn new(label: &'static str, value: &'static str) -> Self {
        Self { label, value }
    }
}

/// Visibility rule evaluated against the sibling fields of the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "when", content = "field", rename_all = "camelCase")]
pub enum Condition {
    SiblingTrue(&'static str),
    SiblingFalse(&'static str),
}

impl Condition {
    pub fn is_visible(&self, siblings: &Map<String, JsonValue>) -> bool {
        let flag = |name: &str| siblings.get(name).and_then(JsonValue::as_bool).unwrap_or(false);
        match self {
            Condition::SiblingTrue(name) => flag(name),
            Condition::SiblingFalse(name) => !flag(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockDef {
    pub slug: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    Textarea,
    Email,
    Number,
    Checkbox,
    Date,
    Select {
        options: Vec<SelectOption>,
        #[serde(rename = "hasMany")]
        has_many: bool,
    },
    Group {
        fields: Vec<FieldDef>,
    },
    Array {
        fields: Vec<FieldDef>,
    },
    Relationship {
        #[serde(rename = "relationTo")]
        relation_to: &'static str,
        #[serde(rename = "hasMany")]
        has_many: bool,
    },
    Blocks {
        blocks: Vec<BlockDef>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl FieldDef {
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label: None,
            kind,
            required: false,
            unique: false,
            condition: None,
            description: None,
            default_value: None,
        }
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn textarea(name: &'static str) -> Self {
        Self::new(name, FieldKind::Textarea)
    }

    pub fn email(name: &'static str) -> Self {
        Self::new(name, FieldKind::Email)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn checkbox(name: &'static str) -> Self {
        Self::new(name, FieldKind::Checkbox)
    }

    pub fn date(name: &'static str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn select(name: &'static str, options: Vec<SelectOption>) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                options,
                has_many: false,
            },
        )
    }

    pub fn select_many(name: &'static str, options: Vec<SelectOption>) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                options,
                has_many: true,
            },
        )
    }

    pub fn group(name: &'static str, fields: Vec<FieldDef>) -> Self {
        Self::new(name, FieldKind::Group { fields })
    }

    pub fn array(name: &'static str, fields: Vec<FieldDef>) -> Self {
        Self::new(name, FieldKind::Array { fields })
    }

    pub fn relationship(name: &'static str, relation_to: &'static str) -> Self {
        Self::new(
            name,
            FieldKind::Relationship {
                relation_to,
                has_many: false,
            },
        )
    }

    pub fn blocks(name: &'static str, blocks: Vec<BlockDef>) -> Self {
        Self::new(name, FieldKind::Blocks { blocks })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn description(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn shown_when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Child fields of groups and array rows.
    pub fn children(&self) -> &[FieldDef] {
        match &self.kind {
            FieldKind::Group { fields } | FieldKind::Array { fields } => fields,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tab {
    pub label: &'static str,
    pub fields: Vec<FieldDef>,
}

/// Top-level layout entry. Tabs are presentational: their fields live at the
/// top level of the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Field(FieldDef),
    Tabs(Vec<Tab>),
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct TabsNode<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            tabs: &'a [Tab],
        }

        match self {
            Node::Field(field) => field.serialize(s),
            Node::Tabs(tabs) => TabsNode { kind: "tabs", tabs }.serialize(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessRule {
    Anyone,
    Authenticated,
    AuthenticatedOrPublished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessConfig {
    pub create: AccessRule,
    pub read: AccessRule,
    pub update: AccessRule,
    pub delete: AccessRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    pub use_as_title: &'static str,
    pub default_columns: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftsConfig {
    #[serde(serialize_with = "serialize_millis")]
    pub autosave_interval: Duration,
    pub schedule_publish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsConfig {
    pub max_per_doc: usize,
    pub drafts: DraftsConfig,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub slug: &'static str,
    pub access: AccessConfig,
    pub default_populate: Vec<&'static str>,
    pub admin: AdminConfig,
    pub fields: Vec<Node>,
    pub versions: VersionsConfig,
}

impl CollectionSchema {
    /// Data-bearing fields in document order, with tab contents inlined.
    pub fn data_fields(&self) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .flat_map(|node| match node {
                Node::Field(field) => vec![field],
                Node::Tabs(tabs) => tabs.iter().flat_map(|t| t.fields.iter()).collect(),
            })
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.data_fields().into_iter().find(|f| f.name == name)
    }

    /// Projects a document onto its `defaultPopulate` fields plus `id`.
    pub fn default_projection(&self, doc: &JsonValue) -> JsonValue {
        let mut out = Map::new();
        if let Some(obj) = doc.as_object() {
            for key in std::iter::once("id").chain(self.default_populate.iter().copied()) {
                if let Some(v) = obj.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
        }
        JsonValue::Object(out)
    }
}

pub const LAYOUT_BLOCKS: [BlockDef; 5] = [
    BlockDef {
        slug: "cta",
        label: "Call to Action",
    },
    BlockDef {
        slug: "content",
        label: "Content",
    },
    BlockDef {
        slug: "mediaBlock",
        label: "Media Block",
    },
    BlockDef {
        slug: "archive",
        label: "Archive",
    },
    BlockDef {
        slug: "formBlock",
        label: "Form Block",
    },
];

/// The Opportunities collection definition, built once.
pub fn opportunities() -> &'static CollectionSchema {
    static SCHEMA: OnceLock<CollectionSchema> = OnceLock::new();
    SCHEMA.get_or_init(build_opportunities)
}

fn build_opportunities() -> CollectionSchema {
    let basic_info = Tab {
        label: "Basic Info",
        fields: vec![
            FieldDef::textarea("description")
                .required()
                .description("A detailed description of the opportunity."),
            FieldDef::select_many("researchType", ResearchType::options()).required(),
            FieldDef::checkbox("modalityKnown").label("Modality Known"),
            FieldDef::select_many("modality", Modality::options())
                .required()
                .shown_when(Condition::SiblingTrue("modalityKnown")),
            FieldDef::group(
                "dates",
                vec![FieldDef::date("start"), FieldDef::date("end")],
            ),
            FieldDef::group(
                "deadline",
                vec![
                    FieldDef::checkbox("isRolling").label("Rolling Deadline"),
                    FieldDef::date("date").shown_when(Condition::SiblingFalse("isRolling")),
                ],
            ),
            FieldDef::relationship("parent-program", PROGRAMS_COLLECTION_SLUG),
        ],
    };

    let contact_and_affiliations = Tab {
        label: "Contact & Affiliations",
        fields: vec![
            FieldDef::array(
                "contact",
                vec![
                    FieldDef::select("type", ContactKind::options()).required(),
                    FieldDef::text("name").required(),
                    FieldDef::email("email"),
                    FieldDef::text("phone"),
                    FieldDef::select("department", departments::options()),
                    FieldDef::group(
                        "office",
                        vec![
                            FieldDef::text("building"),
                            FieldDef::text("room"),
                            FieldDef::text("address"),
                        ],
                    ),
                ],
            ),
            FieldDef::select_many("affiliations", departments::options()),
            FieldDef::array("keywords", vec![FieldDef::text("keyword")])
                .description("Keywords to help with searching and categorizing"),
        ],
    };

    let requirements = Tab {
        label: "Requirements & Restrictions",
        fields: vec![FieldDef::group(
            "restrictions",
            vec![
                FieldDef::checkbox("must_be_citizen").label("Must be a U.S. Citizen"),
                FieldDef::checkbox("must_be_over_18").label("Must be 18 or older"),
                FieldDef::checkbox("must_be_current_student").label("Must be a current student"),
                FieldDef::checkbox("has_required_courses").label("Has Required Courses"),
                FieldDef::array(
                    "requiredCourses",
                    vec![
                        FieldDef::text("courseCode").required(),
                        FieldDef::textarea("note"),
                    ],
                )
                .shown_when(Condition::SiblingTrue("has_required_courses")),
                FieldDef::checkbox("has_required_hours").label("Has Required Hours per Week"),
                FieldDef::group(
                    "requiredHours",
                    vec![FieldDef::number("hours").required(), FieldDef::textarea("note")],
                )
                .shown_when(Condition::SiblingTrue("has_required_hours")),
                FieldDef::textarea("additional_requirements").label("Additional Requirements"),
            ],
        )],
    };

    let content = Tab {
        label: "Content",
        fields: vec![FieldDef::blocks("layout", LAYOUT_BLOCKS.to_vec()).required()],
    };

    CollectionSchema {
        slug: COLLECTION_SLUG,
        access: AccessConfig {
            create: AccessRule::Authenticated,
            read: AccessRule::AuthenticatedOrPublished,
            update: AccessRule::Authenticated,
            delete: AccessRule::Authenticated,
        },
        default_populate: vec!["title", "slug"],
        admin: AdminConfig {
            use_as_title: "title",
            default_columns: vec!["title", "slug", "updatedAt"],
        },
        fields: vec![
            Node::Field(FieldDef::text("title").required()),
            Node::Tabs(vec![basic_info, contact_and_affiliations, requirements, content]),
            Node::Field(FieldDef::date("publishedAt")),
            Node::Field(FieldDef::text("slug").label("Slug").unique()),
            Node::Field(FieldDef::checkbox("slugLock").default_value(JsonValue::Bool(true))),
        ],
        versions: VersionsConfig {
            max_per_doc: MAX_VERSIONS_PER_DOC,
            drafts: DraftsConfig {
                autosave_interval: AUTOSAVE_INTERVAL,
                schedule_publish: true,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tabs_are_inlined_into_data_fields() {
        let schema = opportunities();
        let names: Vec<_> = schema.data_fields().iter().map(|f| f.name).collect();
        assert_eq!(names.first(), Some(&"title"));
        assert!(names.contains(&"researchType"));
        assert!(names.contains(&"restrictions"));
        assert!(names.contains(&"layout"));
        assert_eq!(names.last(), Some(&"slugLock"));
    }

    #[test]
    fn department_options_come_from_the_registry() {
        let schema = opportunities();
        let affiliations = schema.field("affiliations").unwrap();
        let FieldKind::Select { options, has_many } = &affiliations.kind else {
            panic!("affiliations should be a select");
        };
        assert!(*has_many);
        assert_eq!(options, &departments::options());

        let contact = schema.field("contact").unwrap();
        let department = contact
            .children()
            .iter()
            .find(|f| f.name == "department")
            .unwrap();
        let FieldKind::Select { options, .. } = &department.kind else {
            panic!("department should be a select");
        };
        assert_eq!(options, &departments::options());
    }

    #[test]
    fn schema_serializes_for_admin_tooling() {
        let v = serde_json::to_value(opportunities()).unwrap();
        assert_eq!(v["slug"], json!("opportunities"));
        assert_eq!(v["versions"]["maxPerDoc"], json!(50));
        assert_eq!(v["versions"]["drafts"]["autosaveInterval"], json!(100));
        assert_eq!(v["fields"][1]["type"], json!("tabs"));
        assert_eq!(v["fields"][1]["tabs"][0]["label"], json!("Basic Info"));
        let modality = &v["fields"][1]["tabs"][0]["fields"][3];
        assert_eq!(modality["name"], json!("modality"));
        assert_eq!(modality["hasMany"], json!(true));
        assert_eq!(
            modality["condition"],
            json!({"when": "siblingTrue", "field": "modalityKnown"})
        );
    }

    #[test]
    fn default_projection_keeps_id_title_slug() {
        let doc = json!({"id": "x", "title": "T", "slug": "t", "description": "long"});
        assert_eq!(
            opportunities().default_projection(&doc),
            json!({"id": "x", "title": "T", "slug": "t"})
        );
    }
}
