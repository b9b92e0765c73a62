//! Profile and user identity models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Avatar used when a profile never picked one.
pub const DEFAULT_EMOJI: &str = "😊";

/// Profile row held by the backend, keyed by user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default = "default_emoji")]
    pub emoji: String,
}

/// Name and avatar captured at sign-up and kept with the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignupMetadata {
    pub name: String,
    #[serde(default = "default_emoji")]
    pub emoji: String,
}

/// Signed-in user as shown in the header and profile page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub emoji: String,
}

fn default_emoji() -> String {
    DEFAULT_EMOJI.to_string()
}

impl Profile {
    pub fn new(id: String, name: String, emoji: Option<String>) -> Result<Self> {
        let profile = Self {
            id,
            name,
            emoji: emoji
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(default_emoji),
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Rebuild a missing profile from the data cached at sign-up
    pub fn from_metadata(user_id: &str, metadata: &SignupMetadata) -> Result<Self> {
        Self::new(
            user_id.to_string(),
            metadata.name.clone(),
            Some(metadata.emoji.clone()),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("Profile ID cannot be empty".to_string()));
        }

        if self.name.trim().is_empty() {
            return Err(Error::Validation(
                "Profile name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl SignupMetadata {
    pub fn new(name: String, emoji: Option<String>) -> Self {
        Self {
            name,
            emoji: emoji
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(default_emoji),
        }
    }
}

impl User {
    pub fn from_profile(profile: &Profile, email: &str) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            email: email.to_string(),
            emoji: profile.emoji.clone(),
        }
    }
}
