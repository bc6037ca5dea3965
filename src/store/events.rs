use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{EventCounts, EventStore};
use crate::error::CoreResult;
use crate::models::{Event, EventStatus};

const EVENT_COLUMNS: &str = "id, name, venue, start_time, end_time, capacity, reserved, \
     status, ticket_price, max_per_booking, updated_at";

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn update_status(&self, id: Uuid, status: EventStatus) -> CoreResult<()> {
        sqlx::query("UPDATE events SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn counts(&self) -> CoreResult<Vec<EventCounts>> {
        let counts =
            sqlx::query_as::<_, EventCounts>("SELECT id, capacity, reserved FROM events")
                .fetch_all(&self.pool)
                .await?;
        Ok(counts)
    }
}
