use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub venue: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub reserved: i32,
    pub status: EventStatus,
    pub ticket_price: f64,
    pub max_per_booking: i32,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Событие закрыто для новых бронирований.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, EventStatus::Cancelled | EventStatus::Expired)
            || now > self.end_time
    }
}
