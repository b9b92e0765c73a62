pub mod manager;

pub use manager::{CollectionError, TimerCollection};
