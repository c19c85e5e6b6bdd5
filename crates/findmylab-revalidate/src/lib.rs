//! Cache revalidation for opportunity pages: planning after changes and
//! deletes, and applying the plan through pluggable invalidators.

pub mod invalidator;
pub mod plan;
pub mod worker;

pub use invalidator::{
    FanoutInvalidator, HttpInvalidator, HttpInvalidatorConfig, InvalidateError, Invalidator,
    NoopInvalidator, RecordingInvalidator,
};
pub use plan::{plan_after_change, plan_after_delete, Invalidation, Reason, Revalidation, SITEMAP_TAG};
pub use worker::Revalidator;

pub const CRATE_NAME: &str = "findmylab-revalidate";
