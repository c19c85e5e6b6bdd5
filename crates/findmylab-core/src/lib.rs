//! Core domain model and collection schema for Find My Lab opportunities.

pub mod departments;
pub mod model;
pub mod paths;
pub mod schema;
pub mod slug;
pub mod validate;

pub use departments::{Department, DepartmentKey, DEPARTMENTS};
pub use model::{
    Contact, ContactKind, DateRange, Deadline, DeadlineField, Keyword, LayoutBlock, Modality,
    Office, Opportunity, OpportunityData, Program, RequiredCourse, RequiredHours, ResearchType,
    Restrictions, Status, UnknownOption,
};
pub use paths::{opportunity_path, preview_path};
pub use schema::{CollectionSchema, COLLECTION_SLUG, MAX_VERSIONS_PER_DOC};
pub use slug::format_slug;
pub use validate::{strip_hidden, strip_nulls, validate, FieldError, ValidationErrors, ValidationMode};

pub const CRATE_NAME: &str = "findmylab-core";
