//! Recovery persistence and scheduling

pub mod journal;
pub mod scheduler;

pub use journal::RecoveryJournal;
pub use scheduler::{RecoveryScheduler, SchedulerConfig};
