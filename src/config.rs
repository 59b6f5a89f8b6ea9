use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;
use crate::limits::*;
use crate::model::{Reservation, Secs};

/// Run settings, read from `SLOTBENCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub base_at: Secs,
    pub slots: i64,
    pub horizon_hours: usize,
    pub parallelism: u32,
    /// Load level advertised by the target; when set, each role gate holds
    /// `2^weight_exponent` units instead of `parallelism`.
    pub weight_exponent: Option<u32>,
    pub duration: Duration,
    pub seed_file: Option<PathBuf>,
    pub session_pool_capacity: usize,
    pub slot_pool_capacity: usize,
    pub metrics_port: Option<u16>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_at: DEFAULT_BASE_AT,
            slots: DEFAULT_SLOTS,
            horizon_hours: DEFAULT_HORIZON_HOURS,
            parallelism: DEFAULT_PARALLELISM,
            weight_exponent: None,
            duration: Duration::from_secs(60),
            seed_file: None,
            session_pool_capacity: DEFAULT_SESSION_POOL_CAPACITY,
            slot_pool_capacity: DEFAULT_SLOT_POOL_CAPACITY,
            metrics_port: None,
        }
    }
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Values that fail to parse keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let d = Self::default();
        Self {
            base_at: parsed(&lookup, "SLOTBENCH_BASE_AT").unwrap_or(d.base_at),
            slots: parsed(&lookup, "SLOTBENCH_SLOTS").unwrap_or(d.slots),
            horizon_hours: parsed(&lookup, "SLOTBENCH_HORIZON_HOURS").unwrap_or(d.horizon_hours),
            parallelism: parsed(&lookup, "SLOTBENCH_PARALLELISM").unwrap_or(d.parallelism),
            weight_exponent: parsed(&lookup, "SLOTBENCH_WEIGHT_EXPONENT"),
            duration: parsed(&lookup, "SLOTBENCH_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.duration),
            seed_file: lookup("SLOTBENCH_SEED_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            session_pool_capacity: parsed(&lookup, "SLOTBENCH_SESSION_POOL_CAPACITY")
                .unwrap_or(d.session_pool_capacity),
            slot_pool_capacity: parsed(&lookup, "SLOTBENCH_SLOT_POOL_CAPACITY")
                .unwrap_or(d.slot_pool_capacity),
            metrics_port: parsed(&lookup, "SLOTBENCH_METRICS_PORT"),
        }
    }

    /// Seed reservations: the seed file if configured, otherwise a synthetic set.
    pub fn seed(&self) -> Result<Vec<Reservation>, CoreError> {
        match &self.seed_file {
            Some(path) => load_seed_file(path),
            None => Ok(synthetic_seed(self.base_at, self.horizon_hours, self.slots as usize * 64)),
        }
    }
}

/// Read a JSON array of reservations.
pub fn load_seed_file(path: &Path) -> Result<Vec<Reservation>, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidConfiguration(format!("seed file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        CoreError::InvalidConfiguration(format!("seed file {}: {e}", path.display()))
    })
}

/// Deterministic spread of short and long slots across the horizon.
pub fn synthetic_seed(base_at: Secs, horizon_hours: usize, count: usize) -> Vec<Reservation> {
    let max_len: i64 = 23;
    let span = (horizon_hours as i64 - max_len).max(1);
    (0..count as u64)
        .map(|i| {
            let start_hour = (i as i64 * 7_919) % span;
            let hours = 1 + (i as i64 * 31) % max_len;
            let mut r = Reservation::slot(
                i + 1,
                base_at + start_hour * HOUR_SECS,
                base_at + (start_hour + hours) * HOUR_SECS,
            );
            r.owner_id = i % 97 + 1;
            r.title = format!("broadcast #{}", i + 1);
            r.tags = vec![r.class().label().to_string()];
            r
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::model::DurationClass;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = DriverConfig::from_lookup(|_| None);
        assert_eq!(cfg, DriverConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = DriverConfig::from_lookup(lookup_from(&[
            ("SLOTBENCH_SLOTS", "5"),
            ("SLOTBENCH_HORIZON_HOURS", "48"),
            ("SLOTBENCH_PARALLELISM", " 32 "),
            ("SLOTBENCH_WEIGHT_EXPONENT", "3"),
            ("SLOTBENCH_DURATION_SECS", "5"),
            ("SLOTBENCH_METRICS_PORT", "9100"),
            ("SLOTBENCH_SEED_FILE", "/tmp/seed.json"),
        ]));
        assert_eq!(cfg.slots, 5);
        assert_eq!(cfg.horizon_hours, 48);
        assert_eq!(cfg.parallelism, 32);
        assert_eq!(cfg.weight_exponent, Some(3));
        assert_eq!(cfg.duration, Duration::from_secs(5));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.seed_file, Some(PathBuf::from("/tmp/seed.json")));
    }

    #[test]
    fn unparseable_values_fall_back() {
        let cfg = DriverConfig::from_lookup(lookup_from(&[
            ("SLOTBENCH_SLOTS", "many"),
            ("SLOTBENCH_METRICS_PORT", "99999"),
        ]));
        assert_eq!(cfg.slots, DEFAULT_SLOTS);
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn synthetic_seed_stays_in_horizon() {
        let seed = synthetic_seed(DEFAULT_BASE_AT, 24 * 30, 500);
        assert_eq!(seed.len(), 500);
        let horizon_end = DEFAULT_BASE_AT + 24 * 30 * HOUR_SECS;
        for r in &seed {
            assert!(r.start_at >= DEFAULT_BASE_AT);
            assert!(r.end_at <= horizon_end);
            assert!(r.end_at > r.start_at);
        }
        assert!(seed.iter().any(|r| r.class() == DurationClass::Short));
        assert!(seed.iter().any(|r| r.class() == DurationClass::Long));
        // stable across calls
        assert_eq!(seed, synthetic_seed(DEFAULT_BASE_AT, 24 * 30, 500));
    }

    #[test]
    fn seed_file_round_trip() {
        let dir = std::env::temp_dir().join("slotbench_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"[{{"id":1,"owner_id":7,"title":"morning","tags":["a"],"start_at":0,"end_at":3600}},
                {{"id":2,"start_at":3600,"end_at":7200}}]"#
        )
        .unwrap();

        let cfg = DriverConfig {
            seed_file: Some(path),
            ..DriverConfig::default()
        };
        let seed = cfg.seed().unwrap();
        assert_eq!(seed.len(), 2);
        assert_eq!(seed[0].owner_id, 7);
        assert_eq!(seed[0].title, "morning");
        assert_eq!(seed[1], Reservation::slot(2, 3600, 7200));
    }

    #[test]
    fn missing_or_bad_seed_file() {
        let missing = load_seed_file(Path::new("/nonexistent/slotbench/seed.json"));
        assert!(matches!(missing, Err(CoreError::InvalidConfiguration(_))));

        let dir = std::env::temp_dir().join("slotbench_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_seed_file(&path),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }
}
