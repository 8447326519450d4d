pub mod entry;
pub mod journal;
pub mod recorder;
pub mod workflow_logger;
pub mod utils;

pub use entry::{Actor, AuditEntry, AuditEvent};
pub use recorder::AuditRecorder;
