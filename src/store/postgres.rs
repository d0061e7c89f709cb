// src/store/postgres.rs
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{IngestStore, NewSnapshot, Snapshot, Source, StoreError, StoreResult, StoredRecord};
use crate::connectors::ConnectorMetadata;

// 10 binds per row, Postgres caps a statement at 65535
const RECORD_CHUNK: usize = 1_000;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IngestStore for PgStore {
    async fn upsert_source(&self, meta: &ConnectorMetadata) -> StoreResult<Source> {
        let row = sqlx::query_as::<_, Source>(
            r#"
            INSERT INTO sources (key, title, description, kind, homepage, schedule, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (key) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                kind = EXCLUDED.kind,
                homepage = EXCLUDED.homepage,
                schedule = EXCLUDED.schedule,
                enabled = TRUE,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&meta.id)
        .bind(&meta.title)
        .bind(&meta.description)
        .bind(meta.kind.as_str())
        .bind(&meta.homepage)
        .bind(&meta.schedule)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_ingested(&self, key: &str, record_count: i64, revision: Option<&str>) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE sources
            SET total_records = $2, last_revision = $3, last_ingested_at = now(), updated_at = now()
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(record_count)
        .bind(revision)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn get_source(&self, key: &str) -> StoreResult<Option<Source>> {
        let row = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_sources(&self) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY title ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn latest_snapshot(&self, key: &str) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT * FROM snapshots
            WHERE source_key = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_snapshots(&self, key: &str) -> StoreResult<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, Snapshot>(
            "SELECT * FROM snapshots WHERE source_key = $1 ORDER BY created_at DESC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_snapshot(&self, new: NewSnapshot) -> StoreResult<Snapshot> {
        let mut tx = self.pool.begin().await?;

        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            INSERT INTO snapshots (id, source_key, revision, record_count, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.source_key)
        .bind(&new.revision)
        .bind(new.records.len() as i64)
        .bind(&new.metadata)
        .fetch_one(&mut *tx)
        .await?;

        for chunk in new.records.chunks(RECORD_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO records (id, snapshot_id, source_key, uid, jurisdiction, address, category, latitude, longitude, raw) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(snapshot.id)
                    .push_bind(&snapshot.source_key)
                    .push_bind(&r.uid)
                    .push_bind(&r.jurisdiction)
                    .push_bind(&r.address)
                    .push_bind(r.category.as_str())
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(Json(&r.raw));
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn records_for_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            "SELECT * FROM records WHERE snapshot_id = $1 ORDER BY uid ASC",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
