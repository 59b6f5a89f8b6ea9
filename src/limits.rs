use crate::model::Secs;

/// One calendar bucket.
pub const HOUR_SECS: Secs = 3_600;

/// Reservations shorter than this are "short", everything else is "long".
pub const SHORT_THRESHOLD_SECS: Secs = 10 * HOUR_SECS;

/// Smallest per-hour capacity the hot/cold split can work with: it has to
/// tell "one opening left" apart from "full".
pub const MIN_CAPACITY: i64 = 2;

/// 2024-04-01 00:00:00 JST.
pub const DEFAULT_BASE_AT: Secs = 1_711_897_200;

pub const DEFAULT_SLOTS: i64 = 2;

/// One year of hourly buckets.
pub const DEFAULT_HORIZON_HOURS: usize = 24 * 365;

pub const DEFAULT_PARALLELISM: u32 = 10;

pub const DEFAULT_SESSION_POOL_CAPACITY: usize = 2_000;
pub const DEFAULT_SLOT_POOL_CAPACITY: usize = 10_000;
