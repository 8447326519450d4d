pub mod events;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod state;

pub use events::RunEvent;
pub use ledger::FindingLedger;
pub use metrics::{Assessment, OutcomeCounts, RunReport};
pub use orchestrator::{EngineComponents, PhaseController};
pub use phase::{default_phases, ExitPredicate, PhaseDefinition};
pub use state::{new_run_id, PhaseRecord, Run, RunStatus};
