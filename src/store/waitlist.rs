use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::WaitlistStore;
use crate::error::CoreResult;
use crate::models::WaitlistEntry;

const WAITLIST_COLUMNS: &str = "id, event_id, user_id, position, opted_out";

pub struct PgWaitlistStore {
    pool: PgPool,
}

impl PgWaitlistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WaitlistStore for PgWaitlistStore {
    async fn enqueue(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<i32> {
        let mut tx = self.pool.begin().await?;

        // Advisory-блокировка по событию сериализует выбор max(position)+1,
        // иначе конкурентные вставки упрутся в уникальный (event_id, position).
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(event_id.to_string())
            .execute(&mut *tx)
            .await?;

        let position: i32 = sqlx::query_scalar(
            "INSERT INTO waitlist (event_id, user_id, position) \
             VALUES ($1, $2, (SELECT COALESCE(MAX(position), 0) + 1 \
                              FROM waitlist WHERE event_id = $1)) \
             RETURNING position",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(position)
    }

    async fn opt_out(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE waitlist SET opted_out = TRUE WHERE event_id = $1 AND user_id = $2")
            .bind(event_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn next_active(&self, event_id: Uuid) -> CoreResult<Option<WaitlistEntry>> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(&format!(
            "SELECT {WAITLIST_COLUMNS} FROM waitlist \
             WHERE event_id = $1 AND opted_out = FALSE \
             ORDER BY position ASC LIMIT 1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn remove(&self, entry_id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM waitlist WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self, event_id: Uuid) -> CoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waitlist WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list(
        &self,
        event_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<WaitlistEntry>> {
        let entries = sqlx::query_as::<_, WaitlistEntry>(&format!(
            "SELECT {WAITLIST_COLUMNS} FROM waitlist WHERE event_id = $1 \
             ORDER BY position ASC LIMIT $2 OFFSET $3"
        ))
        .bind(event_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
