//! Remote row shape of a timer
//!
//! The backend stores timers with snake_case columns and an owner column;
//! the rest of the crate works with [`Timer`]. The conversions here are the
//! only place the two shapes meet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Timer;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub goal: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skill_breakdown: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub resources: String,
    pub time_left: u32,
    pub created_at: DateTime<Utc>,
}

/// Editable columns written by an update. Identity and creation time never change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerFields {
    pub title: String,
    pub goal: String,
    pub skill_breakdown: Vec<String>,
    pub resources: String,
    pub time_left: u32,
}

impl TimerRecord {
    pub fn from_timer(timer: &Timer, user_id: &str) -> Self {
        Self {
            id: timer.id.clone(),
            user_id: user_id.to_string(),
            title: timer.title.clone(),
            goal: timer.goal.clone(),
            skill_breakdown: timer.skill_breakdown.clone(),
            resources: timer.resources.clone(),
            time_left: timer.time_left,
            created_at: timer.created_at,
        }
    }

    pub fn into_timer(self) -> Timer {
        Timer {
            id: self.id,
            title: self.title,
            goal: self.goal,
            skill_breakdown: self.skill_breakdown,
            resources: self.resources,
            time_left: self.time_left,
            created_at: self.created_at,
        }
    }

    pub fn apply(&mut self, fields: TimerFields) {
        self.title = fields.title;
        self.goal = fields.goal;
        self.skill_breakdown = fields.skill_breakdown;
        self.resources = fields.resources;
        self.time_left = fields.time_left;
    }
}

impl From<&Timer> for TimerFields {
    fn from(timer: &Timer) -> Self {
        Self {
            title: timer.title.clone(),
            goal: timer.goal.clone(),
            skill_breakdown: timer.skill_breakdown.clone(),
            resources: timer.resources.clone(),
            time_left: timer.time_left,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
