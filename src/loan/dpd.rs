//! Days-past-due sweep

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ServiceResult;
use crate::store::LoanStore;

/// Recomputes days past due for every unpaid installment.
///
/// The sweep overwrites rather than increments, so running it twice with the
/// same `now` leaves identical rows. Paid rows are excluded by the update
/// itself, which lets a concurrent payment win.
#[derive(Clone)]
pub struct DpdRecalculator {
    store: Arc<dyn LoanStore>,
}

impl DpdRecalculator {
    pub fn new(store: Arc<dyn LoanStore>) -> Self {
        Self { store }
    }

    /// Returns how many installments were touched
    pub async fn recalculate(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let affected = self.store.recalculate_days_past_due(now).await?;
        tracing::info!(affected, "DPD recalculation finished");
        Ok(affected)
    }
}
