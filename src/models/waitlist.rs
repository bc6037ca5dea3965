use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub opted_out: bool,
}
