use std::sync::Arc;

use tracing::trace;

use crate::error::CoreError;
use crate::model::*;
use crate::observability::{RESERVATIONS_CLAIMED_TOTAL, RESERVATIONS_NOT_FOUND_TOTAL};

use super::{OverlapIndex, ReservationScheduler, SchedulerState};

impl<I: OverlapIndex> ReservationScheduler<I> {
    pub async fn get_hot_short_reservation(&self) -> Result<Arc<Reservation>, CoreError> {
        self.claim(Heat::Hot, DurationClass::Short).await
    }

    pub async fn get_hot_long_reservation(&self) -> Result<Arc<Reservation>, CoreError> {
        self.claim(Heat::Hot, DurationClass::Long).await
    }

    pub async fn get_cold_short_reservation(&self) -> Result<Arc<Reservation>, CoreError> {
        self.claim(Heat::Cold, DurationClass::Short).await
    }

    pub async fn get_cold_long_reservation(&self) -> Result<Arc<Reservation>, CoreError> {
        self.claim(Heat::Cold, DurationClass::Long).await
    }

    /// Pick the lowest-id available reservation of `class` overlapping a
    /// `heat` interval and mark it in flight.
    pub async fn claim(&self, heat: Heat, class: DurationClass) -> Result<Arc<Reservation>, CoreError> {
        let labels = [("heat", heat.label()), ("class", class.label())];
        let mut guard = self.state.lock().await;

        let intervals = match heat {
            Heat::Hot => self.temperatures.find_hot_intervals().await,
            Heat::Cold => self.temperatures.find_cold_intervals().await,
        };
        let chosen = match intervals {
            Ok(intervals) => lowest_available(&guard, &intervals, class),
            Err(_) => None,
        };
        let Some(chosen) = chosen else {
            metrics::counter!(RESERVATIONS_NOT_FOUND_TOTAL, &labels).increment(1);
            return Err(CoreError::NotFound("reservation"));
        };

        if let Some(entry) = guard.entries.get_mut(&chosen.id) {
            entry.state = entry.state.claim()?;
        }
        metrics::counter!(RESERVATIONS_CLAIMED_TOTAL, &labels).increment(1);
        trace!(id = chosen.id, heat = heat.label(), class = class.label(), "reservation claimed");
        Ok(chosen)
    }
}

fn lowest_available<I: OverlapIndex>(
    state: &SchedulerState<I>,
    intervals: &[Interval],
    class: DurationClass,
) -> Option<Arc<Reservation>> {
    let mut best: Option<&Arc<Reservation>> = None;
    for interval in intervals {
        for r in state.index.query_overlap(interval) {
            if r.class() != class || best.is_some_and(|b| b.id <= r.id) {
                continue;
            }
            let available = state
                .entries
                .get(&r.id)
                .is_some_and(|e| e.state == AllocationState::Available);
            if available {
                best = Some(r);
            }
        }
    }
    best.cloned()
}
