pub mod directory;
pub mod event_relay;
pub mod gate;
pub mod handle_cache;
pub mod registry;


pub use directory::SubscriptionDirectory;
pub use event_relay::{EventRelay, RelayStats};
pub use handle_cache::ContractHandleCache;
pub use registry::ListenerRegistry;
