//! Expiry sweeper

use chrono::{DateTime, Utc};
use gatepass_util::GatepassId;
use tracing::{debug, info, warn};

use crate::{CoreError, CoreEvent, CoreResult, GatepassEngine};

impl GatepassEngine {
    /// Expire every pending request whose stage deadline is at or before
    /// `now`. Returns how many were expired by this call.
    ///
    /// A request that leaves its pending state concurrently is skipped, so a
    /// second sweep with no new overdue requests returns 0.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let now = gatepass_util::stored_precision(now);
        let candidates = self.store.list_expirable(now)?;
        let mut count = 0;

        for id in &candidates {
            match self.sweep_one(id, now) {
                Ok(true) => count += 1,
                Ok(false) => debug!(gatepass_id = %id, "Skipped; no longer overdue"),
                Err(e) => warn!(gatepass_id = %id, error = %e, "Failed to expire gatepass"),
            }
        }

        if count > 0 {
            info!(count, candidates = candidates.len(), "Expired overdue requests");
            self.emit(CoreEvent::RequestsExpired { count });
        }

        Ok(count)
    }

    fn sweep_one(&self, id: &GatepassId, now: DateTime<Utc>) -> CoreResult<bool> {
        for _ in 0..self.workflow.max_retries.max(1) {
            let current = self.get_gatepass(id)?;
            if !current.is_overdue(now) {
                return Ok(false);
            }
            if self.try_expire(&current, now)?.is_some() {
                return Ok(true);
            }
        }

        Err(CoreError::Conflict(*id))
    }
}
