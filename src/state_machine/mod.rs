// State machine for action executions
//
// queued -> executing -> {completed | failed}, with the transient rolled_back phase,
// the retry edge back to queued, and the cancel/expire exits.

pub mod events;
pub mod states;

pub use events::ExecutionEvent;
pub use states::ExecutionStatus;
