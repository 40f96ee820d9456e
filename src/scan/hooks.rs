use super::Scan;

/// Callbacks the driver loop invokes around a scan.
pub trait DispatcherHook: Send + Sync {
    fn on_start(&self, _scan: &Scan) {}
}

/// Default hook: announces the scan.
pub struct LoggingHook;

impl DispatcherHook for LoggingHook {
    fn on_start(&self, scan: &Scan) {
        tracing::info!(
            scan = scan.name(),
            targets = scan.target().events().len(),
            modules = scan.modules().len(),
            "Starting scan"
        );
    }
}
