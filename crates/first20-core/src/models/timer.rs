//! Timer data model

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Practice budget of a fresh timer: 20 hours in seconds.
pub const TWENTY_HOURS: u32 = 20 * 60 * 60;

/// One learning goal and its remaining practice time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub skill_breakdown: Vec<String>,
    pub resources: String,
    pub time_left: u32,
    pub created_at: DateTime<Utc>,
}

/// Remaining time split for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBreakdown {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Timer {
    /// Create a new timer with the full 20 hour budget
    pub fn new(
        title: String,
        goal: String,
        skill_breakdown: Vec<String>,
        resources: String,
    ) -> Result<Self> {
        let timer = Self {
            id: Uuid::new_v4().to_string(),
            title,
            goal,
            skill_breakdown: filter_skills(skill_breakdown),
            resources,
            time_left: TWENTY_HOURS,
            created_at: Utc::now(),
        };
        timer.validate()?;
        Ok(timer)
    }

    /// Validate the timer data
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("Timer ID cannot be empty".to_string()));
        }

        if self.title.trim().is_empty() {
            return Err(Error::Validation("Timer title cannot be empty".to_string()));
        }

        if self.time_left > TWENTY_HOURS {
            return Err(Error::Validation(format!(
                "Time left must be between 0 and {} seconds",
                TWENTY_HOURS
            )));
        }

        Ok(())
    }

    pub fn update_title(&mut self, title: String) -> Result<()> {
        if title.trim().is_empty() {
            return Err(Error::Validation("Timer title cannot be empty".to_string()));
        }
        self.title = title;
        Ok(())
    }

    pub fn update_goal(&mut self, goal: String) {
        self.goal = goal;
    }

    /// Replace the checklist, dropping blank entries
    pub fn set_skill_breakdown(&mut self, skills: Vec<String>) {
        self.skill_breakdown = filter_skills(skills);
    }

    pub fn update_resources(&mut self, resources: String) {
        self.resources = resources;
    }

    /// Drop blank checklist entries before the timer is persisted
    pub fn normalize(&mut self) {
        let skills = std::mem::take(&mut self.skill_breakdown);
        self.skill_breakdown = filter_skills(skills);
    }

    pub fn time_breakdown(&self) -> TimeBreakdown {
        TimeBreakdown::from_seconds(self.time_left)
    }

    /// Short form used in lists, e.g. `19h 58m`
    pub fn format_short(&self) -> String {
        let TimeBreakdown { hours, minutes, .. } = self.time_breakdown();
        format!("{}h {}m", hours, minutes)
    }

    /// Seconds already practiced out of the 20 hour budget
    pub fn practiced_seconds(&self) -> u32 {
        TWENTY_HOURS.saturating_sub(self.time_left)
    }

    pub fn is_complete(&self) -> bool {
        self.time_left == 0
    }
}

impl TimeBreakdown {
    pub fn from_seconds(total: u32) -> Self {
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }

    /// Zero padded clock form, e.g. `19:58:07`
    pub fn as_clock(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

fn filter_skills(skills: Vec<String>) -> Vec<String> {
    skills
        .into_iter()
        .filter(|skill| !skill.trim().is_empty())
        .collect()
}
