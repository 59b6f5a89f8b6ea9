mod index;
mod queries;
mod temperature;

pub use index::{OverlapIndex, SortedOverlapIndex};
pub use temperature::IntervalTemperatures;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::limits::HOUR_SECS;
use crate::model::*;

pub(super) struct Entry {
    pub(super) reservation: Arc<Reservation>,
    pub(super) state: AllocationState,
}

/// Everything guarded by the scheduler lock.
pub(super) struct SchedulerState<I> {
    pub(super) index: I,
    pub(super) entries: HashMap<u64, Entry>,
    /// Commit order, for end-of-run reconciliation.
    pub(super) committed: Vec<Arc<Reservation>>,
}

/// Hands out exclusive, classified reservation slots.
///
/// Lock order is always scheduler state, then temperatures; claim, commit and
/// abort all serialize on the state lock.
pub struct ReservationScheduler<I = SortedOverlapIndex> {
    pub(super) temperatures: IntervalTemperatures,
    horizon: Interval,
    pub(super) state: Mutex<SchedulerState<I>>,
}

impl ReservationScheduler {
    pub fn new(base_at: Secs, max_capacity: i64, horizon_hours: usize) -> Result<Self, CoreError> {
        Self::with_index(base_at, max_capacity, horizon_hours, SortedOverlapIndex::new())
    }
}

impl<I: OverlapIndex> ReservationScheduler<I> {
    pub fn with_index(
        base_at: Secs,
        max_capacity: i64,
        horizon_hours: usize,
        index: I,
    ) -> Result<Self, CoreError> {
        let temperatures = IntervalTemperatures::new(base_at, max_capacity, horizon_hours)?;
        Ok(Self {
            temperatures,
            horizon: Interval::new(base_at, base_at + horizon_hours as Secs * HOUR_SECS),
            state: Mutex::new(SchedulerState {
                index,
                entries: HashMap::new(),
                committed: Vec::new(),
            }),
        })
    }

    pub fn temperatures(&self) -> &IntervalTemperatures {
        &self.temperatures
    }

    pub fn horizon(&self) -> Interval {
        self.horizon
    }

    /// Seed candidate slots, all available. The batch is validated as a whole
    /// before anything is inserted.
    pub async fn load_reservations(
        &self,
        reservations: impl IntoIterator<Item = Reservation>,
    ) -> Result<usize, CoreError> {
        let mut state = self.state.lock().await;
        let mut batch: HashMap<u64, Reservation> = HashMap::new();
        for r in reservations {
            if r.end_at < r.start_at {
                return Err(CoreError::InvariantViolation(format!(
                    "reservation {} ends before it starts",
                    r.id
                )));
            }
            if r.end_at.checked_sub(r.start_at).is_none() {
                return Err(CoreError::InvariantViolation(format!(
                    "reservation {} duration out of range",
                    r.id
                )));
            }
            // A point may sit on the anchor; a proper range ending there lies
            // wholly before it.
            let before = r.end_at < self.horizon.start
                || (r.end_at == self.horizon.start && r.start_at < r.end_at);
            if before || r.start_at >= self.horizon.end {
                return Err(CoreError::InvariantViolation(format!(
                    "reservation {} [{}, {}) lies outside the calendar [{}, {})",
                    r.id, r.start_at, r.end_at, self.horizon.start, self.horizon.end
                )));
            }
            if state.entries.contains_key(&r.id) || batch.contains_key(&r.id) {
                return Err(CoreError::InvariantViolation(format!(
                    "duplicate reservation id {}",
                    r.id
                )));
            }
            batch.insert(r.id, r);
        }

        let loaded = batch.len();
        for (id, r) in batch {
            let reservation = Arc::new(r);
            state.index.insert(reservation.clone());
            state.entries.insert(
                id,
                Entry {
                    reservation,
                    state: AllocationState::Available,
                },
            );
        }
        debug!(loaded, total = state.entries.len(), "reservations loaded");
        Ok(loaded)
    }

    /// Finalize a claimed reservation and count it into the temperatures.
    pub async fn commit_reservation(&self, reservation: &Reservation) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let entry = lookup(&mut state.entries, reservation.id)?;
        entry.state = entry.state.commit()?;
        let committed = entry.reservation.clone();
        state.committed.push(committed.clone());

        let peak = self
            .temperatures
            .add_interval(committed.start_at, committed.end_at)
            .await;
        if peak as i64 > self.temperatures.max_capacity() {
            warn!(
                id = committed.id,
                peak,
                max_capacity = self.temperatures.max_capacity(),
                "hour bucket above capacity after commit"
            );
        }
        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL).increment(1);
        debug!(id = committed.id, "reservation committed");
        Ok(())
    }

    /// Hand a claimed reservation back; it becomes selectable again unchanged.
    pub async fn abort_reservation(&self, reservation: &Reservation) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let entry = lookup(&mut state.entries, reservation.id)?;
        entry.state = entry.state.abort()?;
        metrics::counter!(crate::observability::RESERVATIONS_ABORTED_TOTAL).increment(1);
        debug!(id = reservation.id, "reservation aborted");
        Ok(())
    }

    pub async fn state_of(&self, id: u64) -> Option<AllocationState> {
        self.state.lock().await.entries.get(&id).map(|e| e.state)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Committed reservations in commit order.
    pub async fn committed(&self) -> Vec<Arc<Reservation>> {
        self.state.lock().await.committed.clone()
    }

    pub async fn range_committed(&self, mut f: impl FnMut(&Reservation)) {
        let state = self.state.lock().await;
        for r in &state.committed {
            f(r);
        }
    }
}

fn lookup(entries: &mut HashMap<u64, Entry>, id: u64) -> Result<&mut Entry, CoreError> {
    entries
        .get_mut(&id)
        .ok_or_else(|| CoreError::InvariantViolation(format!("unknown reservation id {id}")))
}
