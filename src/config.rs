use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ScanError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Resolve every event's host before classifying it.
    pub dns_resolution: bool,
    /// Max hops from the targets at which scan/internal modules still receive events.
    pub scope_search_distance: i32,
    /// Max hops from the targets at which output modules still receive events.
    pub scope_report_distance: i32,
    /// DNS children are speculated for events with distance in `[0, dns_search_distance)`.
    pub dns_search_distance: i32,
    pub main_threads: usize,
    pub event_threads: usize,
    pub dns_threads: usize,
    pub internal_threads: usize,
    /// In-flight emissions allowed per module before `emit_event` waits.
    pub module_emit_limit: usize,
    pub completion_passes: usize,
    pub poll_interval_ms: u64,
    pub status_frequency_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dns_resolution: true,
            scope_search_distance: 0,
            scope_report_distance: 1,
            dns_search_distance: 2,
            main_threads: 20,
            event_threads: 25,
            dns_threads: 20,
            internal_threads: 10,
            module_emit_limit: 100,
            completion_passes: 5,
            poll_interval_ms: 100,
            status_frequency_secs: 10,
        }
    }
}

impl ScanConfig {
    pub fn from_file(path: &Path) -> Result<Self, ScanError> {
        let data = std::fs::read_to_string(path)?;
        let cfg: ScanConfig = serde_json::from_str(&data)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scope_search_distance < 0 || self.scope_report_distance < 0 || self.dns_search_distance < 0 {
            return Err(ScanError::Config("scope distances must not be negative".into()));
        }
        if self.main_threads == 0 || self.event_threads == 0 || self.dns_threads == 0 || self.internal_threads == 0 {
            return Err(ScanError::Config("pool sizes must be at least 1".into()));
        }
        if self.module_emit_limit == 0 {
            return Err(ScanError::Config("module_emit_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_frequency(&self) -> Duration {
        Duration::from_secs(self.status_frequency_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"scope_report_distance": 3, "dns_resolution": false}"#).unwrap();
        assert_eq!(cfg.scope_report_distance, 3);
        assert!(!cfg.dns_resolution);
        assert_eq!(cfg.completion_passes, 5);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn negative_distance_is_rejected() {
        let cfg = ScanConfig { dns_search_distance: -1, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ScanError::Config(_))));
    }
}
