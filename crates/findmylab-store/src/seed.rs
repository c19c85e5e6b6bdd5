//! YAML seed files for local development.
//!
//! ```yaml
//! programs:
//!   - id: summer-2024
//!     title: Summer Research 2024
//! opportunities:
//!   - status: published
//!     data:
//!       title: Bio Lab 2024
//!       researchType: [Undergraduate Research]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use findmylab_core::{Program, Status};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, info_span, warn, Instrument};

use crate::collection::{Actor, Collection, CollectionError, RequestContext};

pub const SEED_ACTOR: &str = "seed";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub programs: Vec<Program>,
    pub opportunities: Vec<SeedOpportunity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOpportunity {
    #[serde(default)]
    pub status: Status,
    pub data: JsonValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub programs: usize,
    pub created: usize,
    pub skipped: usize,
}

impl SeedFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing seed yaml")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Registers programs and creates opportunities without triggering
/// revalidation. Documents whose slug already exists are skipped, so a seed
/// can be applied repeatedly.
pub async fn apply_seed(collection: &Collection, seed: SeedFile) -> Result<SeedSummary> {
    let actor = Actor::editor(SEED_ACTOR);
    let ctx = RequestContext::quiet();
    let mut summary = SeedSummary::default();

    for program in seed.programs {
        collection
            .register_program(program.clone())
            .await
            .with_context(|| format!("registering program {}", program.id))?;
        summary.programs += 1;
    }

    for (i, entry) in seed.opportunities.into_iter().enumerate() {
        let draft = entry.status == Status::Draft;
        let mut data = entry.data;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("_status".to_string(), JsonValue::String(entry.status.as_str().to_string()));
        }
        let created = collection
            .create(&actor, data, draft, &ctx)
            .instrument(info_span!("seed.opportunity", index = i))
            .await;
        match created {
            Ok(doc) => {
                summary.created += 1;
                info!(id = %doc.id, slug = doc.slug().unwrap_or_default(), "seeded opportunity");
            }
            Err(CollectionError::DuplicateSlug(slug)) => {
                summary.skipped += 1;
                warn!(%slug, "seed opportunity already exists; skipping");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("seeding opportunity #{i}"));
            }
        }
    }
    Ok(summary)
}
