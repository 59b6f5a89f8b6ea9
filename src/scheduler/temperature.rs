use std::ops::Range;

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::limits::{HOUR_SECS, MIN_CAPACITY};
use crate::model::{Interval, Secs};

/// Hourly occupancy histogram over a fixed calendar window.
///
/// Bucket `i` covers `[base_at + i h, base_at + (i+1) h)` and counts the
/// committed reservations touching that hour.
pub struct IntervalTemperatures {
    base_at: Secs,
    max_capacity: i64,
    buckets: RwLock<Vec<u64>>,
}

impl IntervalTemperatures {
    pub fn new(base_at: Secs, max_capacity: i64, length_hours: usize) -> Result<Self, CoreError> {
        if max_capacity < MIN_CAPACITY {
            return Err(CoreError::InvalidConfiguration(format!(
                "max capacity must be at least {MIN_CAPACITY}, got {max_capacity}"
            )));
        }
        Ok(Self {
            base_at,
            max_capacity,
            buckets: RwLock::new(vec![0; length_hours]),
        })
    }

    pub fn base_at(&self) -> Secs {
        self.base_at
    }

    pub fn max_capacity(&self) -> i64 {
        self.max_capacity
    }

    /// Bucket index of the hour containing `at`. Negative before `base_at`.
    pub fn hour_of(&self, at: Secs) -> i64 {
        (at - self.base_at).div_euclid(HOUR_SECS)
    }

    /// Count `[start_at, end_at]` into the histogram, end hour included.
    ///
    /// Hours outside the tracked horizon are dropped. Returns the highest
    /// temperature among the touched buckets (0 if none were in range).
    pub async fn add_interval(&self, start_at: Secs, end_at: Secs) -> u64 {
        let mut buckets = self.buckets.write().await;
        let first = self.hour_of(start_at).max(0);
        let last = self.hour_of(end_at).min(buckets.len() as i64 - 1);
        let mut peak = 0;
        for i in first..=last {
            let bucket = &mut buckets[i as usize];
            *bucket += 1;
            peak = peak.max(*bucket);
        }
        peak
    }

    /// Maximal runs of hours whose temperature satisfies `pred`, shortest first.
    pub async fn find_intervals(&self, pred: impl Fn(u64) -> bool) -> Vec<Interval> {
        let buckets = self.buckets.read().await;
        let mut intervals: Vec<Interval> = matching_runs(&buckets, pred)
            .into_iter()
            .map(|run| self.run_to_interval(run))
            .collect();
        intervals.sort_by_key(|i| i.hours());
        intervals
    }

    /// Hours with exactly one opening left.
    pub async fn find_hot_intervals(&self) -> Result<Vec<Interval>, CoreError> {
        let hot = (self.max_capacity - 1) as u64;
        let intervals = self.find_intervals(|t| t == hot).await;
        if intervals.is_empty() {
            return Err(CoreError::NotFound("hot interval"));
        }
        Ok(intervals)
    }

    /// Hours with more than one opening left.
    pub async fn find_cold_intervals(&self) -> Result<Vec<Interval>, CoreError> {
        let hot = (self.max_capacity - 1) as u64;
        let intervals = self.find_intervals(|t| t < hot).await;
        if intervals.is_empty() {
            return Err(CoreError::NotFound("cold interval"));
        }
        Ok(intervals)
    }

    pub async fn snapshot(&self) -> Vec<u64> {
        self.buckets.read().await.clone()
    }

    fn run_to_interval(&self, run: Range<usize>) -> Interval {
        Interval::new(
            self.base_at + run.start as Secs * HOUR_SECS,
            self.base_at + run.end as Secs * HOUR_SECS,
        )
    }
}

/// Two-cursor run scan: `left` skips buckets failing `pred`, `right` then
/// advances over buckets passing it. Every `[left, right)` is maximal and
/// `right` may equal `buckets.len()`.
pub(super) fn matching_runs(buckets: &[u64], pred: impl Fn(u64) -> bool) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut left = 0;
    while left < buckets.len() {
        while left < buckets.len() && !pred(buckets[left]) {
            left += 1;
        }
        if left == buckets.len() {
            break;
        }
        let mut right = left;
        while right < buckets.len() && pred(buckets[right]) {
            right += 1;
        }
        runs.push(left..right);
        left = right;
    }
    runs
}
