use std::sync::Arc;

use crate::model::{Interval, Reservation, Secs};

/// Lookup of loaded reservations by time range.
pub trait OverlapIndex: Send + Sync {
    fn insert(&mut self, reservation: Arc<Reservation>);

    /// Every reservation overlapping `range` (see [`Interval::overlaps`]), in
    /// ascending start order.
    fn query_overlap(&self, range: &Interval) -> Vec<&Arc<Reservation>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reservations kept sorted by start, plus the longest duration seen so a
/// query can binary-search both ends of the candidate window.
#[derive(Debug, Default)]
pub struct SortedOverlapIndex {
    entries: Vec<Arc<Reservation>>,
    max_duration: Secs,
}

impl SortedOverlapIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlapIndex for SortedOverlapIndex {
    fn insert(&mut self, reservation: Arc<Reservation>) {
        let key = (reservation.start_at, reservation.id);
        let pos = self
            .entries
            .binary_search_by_key(&key, |r| (r.start_at, r.id))
            .unwrap_or_else(|e| e);
        self.max_duration = self.max_duration.max(reservation.duration());
        self.entries.insert(pos, reservation);
    }

    fn query_overlap(&self, range: &Interval) -> Vec<&Arc<Reservation>> {
        // Anything starting after range.end can't overlap; points at exactly
        // range.end still can.
        let right_bound = self.entries.partition_point(|r| r.start_at <= range.end);
        // Anything starting earlier than range.start - max_duration ends before it.
        let floor = range.start.saturating_sub(self.max_duration);
        let left_bound = self.entries[..right_bound].partition_point(|r| r.start_at < floor);
        self.entries[left_bound..right_bound]
            .iter()
            .filter(|r| r.overlaps(range))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::HOUR_SECS as H;

    fn index_of(slots: &[(u64, Secs, Secs)]) -> SortedOverlapIndex {
        let mut idx = SortedOverlapIndex::new();
        for &(id, s, e) in slots {
            idx.insert(Arc::new(Reservation::slot(id, s, e)));
        }
        idx
    }

    fn ids(hits: Vec<&Arc<Reservation>>) -> Vec<u64> {
        hits.iter().map(|r| r.id).collect()
    }

    #[test]
    fn keeps_start_order() {
        let idx = index_of(&[(3, 4 * H, 5 * H), (1, 0, H), (2, 2 * H, 3 * H)]);
        assert_eq!(idx.len(), 3);
        assert_eq!(ids(idx.query_overlap(&Interval::new(0, 10 * H))), vec![1, 2, 3]);
    }

    #[test]
    fn skips_past_and_future() {
        let idx = index_of(&[(1, 0, H), (2, 4 * H, 6 * H), (3, 10 * H, 11 * H)]);
        assert_eq!(ids(idx.query_overlap(&Interval::new(5 * H, 8 * H))), vec![2]);
    }

    #[test]
    fn adjacent_not_included() {
        let idx = index_of(&[(1, 0, H), (2, 2 * H, 3 * H)]);
        assert!(idx.query_overlap(&Interval::new(H, 2 * H)).is_empty());
    }

    #[test]
    fn long_reservation_spanning_query() {
        let idx = index_of(&[(1, 0, 100 * H), (2, 50 * H, 51 * H)]);
        assert_eq!(ids(idx.query_overlap(&Interval::new(70 * H, 71 * H))), vec![1]);
    }

    #[test]
    fn point_query_hits_touching_reservations() {
        let idx = index_of(&[(1, 0, H), (2, H, 2 * H), (3, 3 * H, 4 * H)]);
        assert_eq!(ids(idx.query_overlap(&Interval::new(H, H))), vec![1, 2]);
    }

    #[test]
    fn point_reservation_at_query_end() {
        let idx = index_of(&[(1, 3 * H, 3 * H)]);
        assert_eq!(ids(idx.query_overlap(&Interval::new(0, 3 * H))), vec![1]);
    }

    #[test]
    fn empty_index() {
        let idx = SortedOverlapIndex::new();
        assert!(idx.is_empty());
        assert!(idx.query_overlap(&Interval::new(0, H)).is_empty());
    }
}
