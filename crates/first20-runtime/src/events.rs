use chrono::{DateTime, Utc};
use first20_core::models::Timer;
use serde::{Deserialize, Serialize};

use crate::timer::TimerEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Timer(TimerEvent),
    Collection(CollectionEvent),
    Session(SessionEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub event_type: CollectionEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionEventType {
    Loaded { count: usize },
    Added { timer: Timer },
    Updated { timer: Timer },
    Removed { timer_id: String },
    Failed { message: String },
    Cleared,
}

impl CollectionEvent {
    pub fn new(event_type: CollectionEventType, user_id: Option<String>) -> Self {
        Self {
            event_type,
            user_id,
            timestamp: Utc::now(),
        }
    }

    pub fn loaded(user_id: String, count: usize) -> Self {
        Self::new(CollectionEventType::Loaded { count }, Some(user_id))
    }

    pub fn added(user_id: String, timer: Timer) -> Self {
        Self::new(CollectionEventType::Added { timer }, Some(user_id))
    }

    pub fn updated(user_id: String, timer: Timer) -> Self {
        Self::new(CollectionEventType::Updated { timer }, Some(user_id))
    }

    pub fn removed(user_id: String, timer_id: String) -> Self {
        Self::new(CollectionEventType::Removed { timer_id }, Some(user_id))
    }

    pub fn failed(user_id: Option<String>, message: String) -> Self {
        Self::new(CollectionEventType::Failed { message }, user_id)
    }

    pub fn cleared() -> Self {
        Self::new(CollectionEventType::Cleared, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: SessionEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventType {
    SignedIn { user_id: String },
    SignedOut,
    /// Profile was missing and has been recreated from sign-up data
    ProfileRepaired { user_id: String },
    /// Signed in, but no profile could be loaded or recreated
    ProfileUnavailable { user_id: String, message: String },
}

impl SessionEvent {
    pub fn new(event_type: SessionEventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
        }
    }

    pub fn signed_in(user_id: String) -> Self {
        Self::new(SessionEventType::SignedIn { user_id })
    }

    pub fn signed_out() -> Self {
        Self::new(SessionEventType::SignedOut)
    }
}
