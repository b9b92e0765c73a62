pub mod engine;
pub mod events;
pub mod manager;

pub use engine::{CountdownEngine, CountdownSnapshot, EngineError};
pub use events::{TimerEvent, TimerEventType};
pub use manager::{CountdownManager, CountdownManagerError};
