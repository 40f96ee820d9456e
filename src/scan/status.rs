use std::fmt;

use serde::Serialize;

/// Lifecycle of a scan:
/// STARTING → RUNNING → {FINISHING ⇄ RUNNING} → {FINISHED | ABORTING → ABORTED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    NotStarted,
    Starting,
    Running,
    Finishing,
    Finished,
    Aborting,
    Aborted,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::NotStarted => "NOT_STARTED",
            ScanStatus::Starting => "STARTING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Finishing => "FINISHING",
            ScanStatus::Finished => "FINISHED",
            ScanStatus::Aborting => "ABORTING",
            ScanStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, ScanStatus::Aborting | ScanStatus::Aborted)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ScanStatus::Finished | ScanStatus::Aborted)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
