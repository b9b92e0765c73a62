//! Authenticated session handed out by the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SignupMetadata;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    /// Sign-up data kept with the account, used to repair a missing profile
    pub metadata: Option<SignupMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Auth state change pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { session: Session },
    SignedOut,
}

impl Session {
    pub fn new(user_id: String, email: String, metadata: Option<SignupMetadata>) -> Self {
        Self {
            user_id,
            email,
            metadata,
            created_at: Utc::now(),
        }
    }
}
