//! `stocklot-events` — event abstractions and in-process distribution.
//!
//! Events are the source of truth for every stock-affecting change; the
//! movement ledger and the live stock log are both derived from them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
