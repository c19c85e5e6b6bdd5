//! Persistence, versioning and the collection service for opportunities.

pub mod collection;
pub mod memory;
pub mod postgres;
pub mod scheduler;
pub mod seed;
pub mod store;

pub use collection::{
    Actor, Collection, CollectionError, CollectionHooks, CollectionResult, FindQuery, NoopHooks,
    PaginatedDocs, RequestContext,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use scheduler::{maybe_build_scheduler, SchedulerConfig};
pub use seed::{apply_seed, SeedFile, SeedOpportunity, SeedSummary};
pub use store::{
    Commit, DocumentStore, ListFilter, ListPage, ScheduledAction, ScheduledJob, StoreError,
    Version, VersionWrite,
};

pub const CRATE_NAME: &str = "findmylab-store";
