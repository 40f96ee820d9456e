pub mod concurrent;
pub mod config;
pub mod dns;
pub mod error;
pub mod event;
pub mod http_client;
pub mod modules;
pub mod output;
pub mod scan;
pub mod target;
pub mod word_cloud;

// re-export the types most callers need
pub use crate::error::ScanError;
pub use crate::event::{Event, EventModule, EventType};
pub use crate::scan::{EmitOptions, Scan, ScanStatus};
