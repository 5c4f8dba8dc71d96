pub mod actor;
pub mod messages;
pub mod summary;

pub use actor::BackendActor;
pub use messages::{BackendCommand, BackendEvent, TransferSpec};
pub use summary::BatchSummary;
