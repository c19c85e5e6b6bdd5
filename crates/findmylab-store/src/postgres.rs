//! Postgres backend. Documents live as JSONB in `data_json`, with the slug and
//! status lifted into columns so uniqueness and the published filter run in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use findmylab_core::{Opportunity, Program};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::store::{
    Commit, DocumentStore, ListFilter, ListPage, ScheduledJob, StoreError, Version, VersionWrite,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .instrument(info_span!("store.migrate"))
            .await?;
        Ok(())
    }

    async fn write_version(
        tx: &mut Transaction<'_, Postgres>,
        commit: &Commit,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let newest = sqlx::query(
            r#"
            SELECT id, version_no, autosave
              FROM opportunity_versions
             WHERE parent_id = $1
             ORDER BY version_no DESC
             LIMIT 1
            "#,
        )
        .bind(commit.doc.id)
        .fetch_optional(&mut **tx)
        .await?;

        let snapshot = serde_json::to_value(&commit.doc)?;
        let mut next_no = 1;
        if let Some(row) = newest {
            let id: Uuid = row.try_get("id")?;
            let version_no: i32 = row.try_get("version_no")?;
            let autosave: bool = row.try_get("autosave")?;
            if commit.version == VersionWrite::Autosave && autosave {
                sqlx::query(
                    "UPDATE opportunity_versions SET snapshot_json = $2, created_at = $3 WHERE id = $1",
                )
                .bind(id)
                .bind(&snapshot)
                .bind(now)
                .execute(&mut **tx)
                .await?;
                return Ok(());
            }
            next_no = version_no + 1;
        }

        let version = commit.version_for(next_no as u32, now);
        sqlx::query(
            r#"
            INSERT INTO opportunity_versions (id, parent_id, version_no, autosave, snapshot_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(version.id)
        .bind(version.parent)
        .bind(next_no)
        .bind(version.autosave)
        .bind(&snapshot)
        .bind(version.created_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM opportunity_versions
             WHERE parent_id = $1
               AND id NOT IN (
                   SELECT id FROM opportunity_versions
                    WHERE parent_id = $1
                    ORDER BY version_no DESC
                    LIMIT $2
               )
            "#,
        )
        .bind(commit.doc.id)
        .bind(commit.max_versions as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn commit_in_tx(&self, commit: Commit) -> Result<Option<Opportunity>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query("SELECT data_json FROM opportunities WHERE id = $1 FOR UPDATE")
            .bind(commit.doc.id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| decode_doc(&row))
            .transpose()?;

        match (commit.create, previous.is_some()) {
            (true, true) => return Err(StoreError::AlreadyExists(commit.doc.id)),
            (false, false) => return Err(StoreError::NotFound(commit.doc.id)),
            _ => {}
        }

        let data_json = serde_json::to_value(&commit.doc)?;
        sqlx::query(
            r#"
            INSERT INTO opportunities (id, slug, status, data_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
               SET slug = EXCLUDED.slug,
                   status = EXCLUDED.status,
                   data_json = EXCLUDED.data_json,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(commit.doc.id)
        .bind(commit.doc.slug())
        .bind(commit.doc.status.as_str())
        .bind(&data_json)
        .bind(commit.doc.created_at)
        .bind(commit.doc.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| slug_conflict(err, commit.doc.slug()))?;

        Self::write_version(&mut tx, &commit, Utc::now()).await?;
        tx.commit().await?;
        Ok(previous)
    }
}

fn decode_doc(row: &PgRow) -> Result<Opportunity, StoreError> {
    let value: serde_json::Value = row.try_get("data_json")?;
    Ok(serde_json::from_value(value)?)
}

fn slug_conflict(err: sqlx::Error, slug: Option<&str>) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::DuplicateSlug(slug.unwrap_or_default().to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn commit(&self, commit: Commit) -> Result<Option<Opportunity>, StoreError> {
        let span = info_span!("store.commit", id = %commit.doc.id);
        self.commit_in_tx(commit).instrument(span).await
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query("DELETE FROM opportunities WHERE id = $1 RETURNING data_json")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query("SELECT data_json FROM opportunities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Opportunity>, StoreError> {
        let row = sqlx::query("SELECT data_json FROM opportunities WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn list(&self, filter: ListFilter) -> Result<ListPage, StoreError> {
        let status = filter.published_only.then_some("published");
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM opportunities WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(
            r#"
            SELECT data_json
              FROM opportunities
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(filter.limit as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let docs = rows.iter().map(decode_doc).collect::<Result<Vec<_>, _>>()?;
        Ok(ListPage {
            docs,
            total: total.max(0) as usize,
        })
    }

    async fn versions(&self, id: Uuid) -> Result<Vec<Version>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, parent_id, version_no, autosave, snapshot_json, created_at
              FROM opportunity_versions
             WHERE parent_id = $1
             ORDER BY version_no DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let version_no: i32 = row.try_get("version_no")?;
            let snapshot: serde_json::Value = row.try_get("snapshot_json")?;
            out.push(Version {
                id: row.try_get("id")?,
                parent: row.try_get("parent_id")?,
                version_no: u32::try_from(version_no)
                    .map_err(|_| StoreError::Corrupt(format!("version_no {version_no}")))?,
                autosave: row.try_get("autosave")?,
                created_at: row.try_get("created_at")?,
                snapshot: serde_json::from_value(snapshot)?,
            });
        }
        Ok(out)
    }

    async fn put_program(&self, program: Program) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO programs (id, title, slug) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title, slug = EXCLUDED.slug
            "#,
        )
        .bind(&program.id)
        .bind(&program.title)
        .bind(program.slug.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn program(&self, id: &str) -> Result<Option<Program>, StoreError> {
        let row = sqlx::query("SELECT id, title, slug FROM programs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Program {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            slug: row.try_get("slug")?,
        }))
    }

    async fn schedule(&self, job: ScheduledJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, document_id, action, run_at)
            SELECT $1, id, $3, $4 FROM opportunities WHERE id = $2
            "#,
        )
        .bind(job.id)
        .bind(job.document)
        .bind(job.action.as_str())
        .bind(job.run_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.document));
        }
        Ok(())
    }

    async fn take_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM scheduled_jobs
             WHERE run_at <= $1
            RETURNING id, document_id, action, run_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.try_get("action")?;
            jobs.push(ScheduledJob {
                id: row.try_get("id")?,
                document: row.try_get("document_id")?,
                action: action
                    .parse()
                    .map_err(|err| StoreError::Corrupt(format!("scheduled job: {err}")))?,
                run_at: row.try_get("run_at")?,
            });
        }
        jobs.sort_by_key(|job| job.run_at);
        Ok(jobs)
    }
}
