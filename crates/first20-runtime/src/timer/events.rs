//! Countdown events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by a countdown engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerEvent {
    pub event_type: TimerEventType,
    pub timer_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Types of countdown events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEventType {
    /// Countdown started
    Started { time_left: u32 },
    /// One second elapsed
    Tick { time_left: u32 },
    /// Countdown paused by the user
    Paused { time_left: u32 },
    /// Countdown reached zero and stopped
    Expired,
    /// Countdown set back to the full budget
    Reset,
    /// Remaining time written to the backend
    Checkpointed { time_left: u32 },
    /// Remaining time could not be written; the engine holds it until the next checkpoint
    CheckpointFailed { message: String },
}

impl TimerEvent {
    pub fn new(event_type: TimerEventType, timer_id: String) -> Self {
        Self {
            event_type,
            timer_id,
            timestamp: Utc::now(),
        }
    }

    pub fn started(timer_id: String, time_left: u32) -> Self {
        Self::new(TimerEventType::Started { time_left }, timer_id)
    }

    pub fn tick(timer_id: String, time_left: u32) -> Self {
        Self::new(TimerEventType::Tick { time_left }, timer_id)
    }

    pub fn paused(timer_id: String, time_left: u32) -> Self {
        Self::new(TimerEventType::Paused { time_left }, timer_id)
    }

    pub fn checkpointed(timer_id: String, time_left: u32) -> Self {
        Self::new(TimerEventType::Checkpointed { time_left }, timer_id)
    }

    pub fn checkpoint_failed(timer_id: String, message: String) -> Self {
        Self::new(TimerEventType::CheckpointFailed { message }, timer_id)
    }
}
