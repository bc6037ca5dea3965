//! waitlists.rs
//!
//! Тонкий сервис листа ожидания - контракты enqueue/optOut/count/list
//! для внешнего слоя.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::WaitlistEntry;
use crate::store::{EventStore, WaitlistStore};

pub struct WaitlistService {
    events: Arc<dyn EventStore>,
    waitlist: Arc<dyn WaitlistStore>,
}

impl WaitlistService {
    pub fn new(events: Arc<dyn EventStore>, waitlist: Arc<dyn WaitlistStore>) -> Self {
        Self { events, waitlist }
    }

    pub async fn join(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<i32> {
        self.events
            .get(event_id)
            .await?
            .ok_or(CoreError::NotFound("event"))?;
        self.waitlist.enqueue(event_id, user_id).await
    }

    pub async fn opt_out(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        self.waitlist.opt_out(event_id, user_id).await
    }

    pub async fn count(&self, event_id: Uuid) -> CoreResult<i64> {
        self.waitlist.count(event_id).await
    }

    pub async fn list(
        &self,
        event_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<WaitlistEntry>> {
        self.waitlist.list(event_id, limit, offset).await
    }
}
