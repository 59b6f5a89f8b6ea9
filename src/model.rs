use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::limits::{HOUR_SECS, SHORT_THRESHOLD_SECS};

/// Unix seconds. Every timestamp in the crate uses this type.
pub type Secs = i64;

/// Time range `[start, end)`. A range with `start == end` is a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Secs,
    pub end: Secs,
}

impl Interval {
    pub fn new(start: Secs, end: Secs) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Secs {
        self.end - self.start
    }

    pub fn hours(&self) -> i64 {
        self.duration() / HOUR_SECS
    }

    pub fn is_point(&self) -> bool {
        self.start == self.end
    }

    /// Overlap test between two ranges.
    ///
    /// Proper ranges are half-open, so adjacent ranges do not overlap. A point
    /// overlaps any range that contains it with both ends inclusive, which is
    /// what "is this exact instant taken" lookups need.
    pub fn overlaps(&self, other: &Interval) -> bool {
        if self.is_point() {
            return other.start <= self.start && self.start <= other.end;
        }
        if other.is_point() {
            return self.start <= other.start && other.start <= self.end;
        }
        self.start < other.end && other.start < self.end
    }
}

/// Duration class of a reservation, split at [`SHORT_THRESHOLD_SECS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationClass {
    Short,
    Long,
}

impl DurationClass {
    pub fn of(duration: Secs) -> Self {
        if duration < SHORT_THRESHOLD_SECS {
            DurationClass::Short
        } else {
            DurationClass::Long
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DurationClass::Short => "short",
            DurationClass::Long => "long",
        }
    }
}

/// Fill level of the hours a reservation is picked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Heat {
    /// Exactly one opening left.
    Hot,
    /// More than one opening left.
    Cold,
}

impl Heat {
    pub fn label(&self) -> &'static str {
        match self {
            Heat::Hot => "hot",
            Heat::Cold => "cold",
        }
    }
}

/// A bookable slot. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u64,
    #[serde(default)]
    pub owner_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub start_at: Secs,
    pub end_at: Secs,
}

impl Reservation {
    /// Bare slot with no owner or text, mostly for tests and synthetic seeds.
    pub fn slot(id: u64, start_at: Secs, end_at: Secs) -> Self {
        Self {
            id,
            owner_id: 0,
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            start_at,
            end_at,
        }
    }

    pub fn span(&self) -> Interval {
        Interval::new(self.start_at, self.end_at)
    }

    pub fn duration(&self) -> Secs {
        self.end_at - self.start_at
    }

    pub fn class(&self) -> DurationClass {
        DurationClass::of(self.duration())
    }

    pub fn overlaps(&self, query: &Interval) -> bool {
        self.span().overlaps(query)
    }
}

/// Allocation lifecycle of one reservation.
///
/// `Available -> Inflight -> Committed`, or `Inflight -> Available` on abort.
/// `Committed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    Available,
    Inflight,
    Committed,
}

impl AllocationState {
    pub fn claim(self) -> Result<Self, CoreError> {
        self.step(AllocationState::Available, AllocationState::Inflight)
    }

    pub fn commit(self) -> Result<Self, CoreError> {
        self.step(AllocationState::Inflight, AllocationState::Committed)
    }

    pub fn abort(self) -> Result<Self, CoreError> {
        self.step(AllocationState::Inflight, AllocationState::Available)
    }

    fn step(self, from: AllocationState, to: AllocationState) -> Result<Self, CoreError> {
        if self == from {
            Ok(to)
        } else {
            Err(CoreError::InvariantViolation(format!(
                "illegal transition {self:?} -> {to:?} (expected {from:?})"
            )))
        }
    }
}
