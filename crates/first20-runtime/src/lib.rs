//! First 20 Hours runtime
//!
//! Session handling, the per-user timer collection, and the countdown
//! engines, exposed as a library so the binary and the tests share them.

pub mod collection;
pub mod config;
pub mod event_manager;
pub mod events;
pub mod runtime;
pub mod session;
pub mod timer;

pub use collection::{CollectionError, TimerCollection};
pub use config::{ConfigManager, ConfigManagerError};
pub use event_manager::EventManager;
pub use events::{CollectionEvent, CollectionEventType, RuntimeEvent, SessionEvent, SessionEventType};
pub use runtime::Runtime;
pub use session::{SessionError, SessionManager};
pub use timer::{
    CountdownEngine, CountdownManager, CountdownManagerError, CountdownSnapshot, EngineError,
    TimerEvent, TimerEventType,
};
