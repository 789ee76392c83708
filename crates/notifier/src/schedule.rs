//! Scheduled-notification bridge.
//!
//! Drives an existing schedule through `pending → processing → sent | failed`
//! around one dispatch. The claim is a conditional update, so a scheduler that
//! fires the same schedule twice gets a `Conflict` on the second attempt.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::ScheduleStatus;

use crate::store::NotificationStore;

pub struct ScheduleBridge {
    store: Arc<dyn NotificationStore>,
}

impl ScheduleBridge {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Move the schedule `pending → processing`. Must complete before any delivery starts.
    pub async fn claim(&self, scheduled_id: Uuid) -> Result<(), AppError> {
        let claimed = self
            .store
            .transition_schedule(
                scheduled_id,
                ScheduleStatus::Pending,
                ScheduleStatus::Processing,
                None,
                None,
            )
            .await?;

        if claimed {
            tracing::info!(scheduled_id = %scheduled_id, "Scheduled notification processing");
            return Ok(());
        }

        match self.store.find_schedule(scheduled_id).await? {
            Some(schedule) => Err(AppError::Conflict(format!(
                "Scheduled notification {} is {}, expected pending",
                scheduled_id, schedule.status
            ))),
            None => Err(AppError::NotFound(format!(
                "Scheduled notification {} not found",
                scheduled_id
            ))),
        }
    }

    /// Move a claimed schedule `processing → failed` when the dispatch never started.
    pub async fn abandon(&self, scheduled_id: Uuid, reason: String) {
        match self
            .store
            .transition_schedule(
                scheduled_id,
                ScheduleStatus::Processing,
                ScheduleStatus::Failed,
                None,
                Some(reason),
            )
            .await
        {
            Ok(true) => tracing::warn!(scheduled_id = %scheduled_id, "Scheduled notification abandoned"),
            Ok(false) => tracing::warn!(
                scheduled_id = %scheduled_id,
                "Scheduled notification left processing state before it was abandoned"
            ),
            Err(e) => tracing::error!(
                scheduled_id = %scheduled_id,
                error = %e,
                "Failed to abandon scheduled notification"
            ),
        }
    }

    /// Terminal status and error summary for a settled batch.
    pub fn settle(failure_count: u32) -> (ScheduleStatus, Option<String>) {
        if failure_count == 0 {
            (ScheduleStatus::Sent, None)
        } else {
            (
                ScheduleStatus::Failed,
                Some(format!("{} delivery failures", failure_count)),
            )
        }
    }

    /// Move the schedule `processing → sent | failed`.
    ///
    /// Errors are logged, not returned: the deliveries already happened and the
    /// caller still gets its counts.
    pub async fn finish(&self, scheduled_id: Uuid, failure_count: u32) {
        let (status, error_message) = Self::settle(failure_count);
        let sent_at = (status == ScheduleStatus::Sent).then(Utc::now);

        match self
            .store
            .transition_schedule(
                scheduled_id,
                ScheduleStatus::Processing,
                status,
                sent_at,
                error_message,
            )
            .await
        {
            Ok(true) => tracing::info!(
                scheduled_id = %scheduled_id,
                status = %status,
                failure_count,
                "Scheduled notification finished"
            ),
            Ok(false) => tracing::warn!(
                scheduled_id = %scheduled_id,
                "Scheduled notification left processing state during dispatch"
            ),
            Err(e) => tracing::error!(
                scheduled_id = %scheduled_id,
                error = %e,
                "Failed to finalize scheduled notification"
            ),
        }
    }
}
