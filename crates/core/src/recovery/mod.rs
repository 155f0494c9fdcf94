//! Longer-horizon recovery of operations that exhausted local retries

mod manager;

pub use manager::{RecoveryManager, SubmitOutcome, TickSummary};
