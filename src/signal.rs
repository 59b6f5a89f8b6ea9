use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::observability::SCENARIO_TOTAL;

pub type ScoreTag = &'static str;

/// Per-tag success/failure tallies for the score collaborator to poll.
#[derive(Default)]
pub struct ScenarioCounter {
    counts: DashMap<ScoreTag, u64>,
}

impl ScenarioCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tag: ScoreTag) {
        self.add_n(tag, 1);
    }

    pub fn add_n(&self, tag: ScoreTag, n: u64) {
        *self.counts.entry(tag).or_insert(0) += n;
        metrics::counter!(SCENARIO_TOTAL, "tag" => tag).increment(n);
    }

    /// Count `result` under `ok` or `failed`, passing it through.
    pub fn record<T, E>(&self, ok: ScoreTag, failed: ScoreTag, result: Result<T, E>) -> Result<T, E> {
        self.add(if result.is_ok() { ok } else { failed });
        result
    }

    pub fn get(&self, tag: ScoreTag) -> u64 {
        self.counts.get(&tag).map(|c| *c).unwrap_or(0)
    }

    pub fn breakdown(&self) -> BTreeMap<ScoreTag, u64> {
        self.counts.iter().map(|e| (*e.key(), *e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unknown_tag_is_zero() {
        let c = ScenarioCounter::new();
        assert_eq!(c.get("viewer"), 0);
        assert!(c.breakdown().is_empty());
    }

    #[test]
    fn record_routes_by_outcome() {
        let c = ScenarioCounter::new();
        let ok: Result<u32, &str> = c.record("reserve", "reserve-fail", Ok(1));
        assert_eq!(ok, Ok(1));
        let _ = c.record::<u32, _>("reserve", "reserve-fail", Err("boom"));
        let _ = c.record::<u32, _>("reserve", "reserve-fail", Err("boom"));
        assert_eq!(c.get("reserve"), 1);
        assert_eq!(c.get("reserve-fail"), 2);
        let table = c.breakdown();
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec!["reserve", "reserve-fail"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_are_not_lost() {
        let c = Arc::new(ScenarioCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        c.add("viewer");
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(c.get("viewer"), 4_000);
    }
}
