mod persistence;
mod state;

pub use persistence::SnapshotStore;
pub use state::{AddOutcome, QueueState};
