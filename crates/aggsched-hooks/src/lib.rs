//! aggsched-hooks: Job lifecycle events.
//!
//! Every firing of a scheduled job reports started/completed/failed
//! transitions to the listeners registered on a [`JobEventDispatcher`].

pub mod dispatcher;
pub mod events;
pub mod logging;

pub use dispatcher::{JobEventDispatcher, JobListener, ListenerError};
pub use events::{JobEvent, JobPhase};
pub use logging::LoggingListener;
