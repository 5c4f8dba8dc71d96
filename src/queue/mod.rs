pub mod bus;
pub mod events;
pub mod manager;

pub use bus::{EventBus, SubscriptionId};
pub use events::{GroupEvent, GroupEventKind, GroupListener};
pub use manager::QueueManager;
