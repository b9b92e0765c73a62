//! Interface to the hosted backend
//!
//! Authentication, profile rows, timer rows and per-user change
//! notifications all live behind [`RemoteStore`]. Every call may fail; the
//! managers in the runtime turn failures into recoverable errors.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::TimerFields;
use crate::models::{AuthEvent, Profile, Session, SignupMetadata, Timer};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Change notification for one timer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerChange {
    pub kind: ChangeKind,
    pub timer_id: String,
    pub user_id: String,
}

/// Live subscription to one user's timer changes.
///
/// Dropping the receiver stops delivery locally; [`RemoteStore::unsubscribe`]
/// releases it on the backend.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: String,
    pub events: mpsc::UnboundedReceiver<TimerChange>,
}

pub trait RemoteStore: Send + Sync + 'static {
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignupMetadata,
    ) -> impl Future<Output = Result<Session>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

    fn current_session(&self) -> impl Future<Output = Option<Session>> + Send;

    fn on_auth_change(&self) -> broadcast::Receiver<AuthEvent>;

    fn fetch_profile(&self, user_id: &str)
        -> impl Future<Output = Result<Option<Profile>>> + Send;

    fn insert_profile(&self, profile: &Profile) -> impl Future<Output = Result<()>> + Send;

    fn update_profile(&self, profile: &Profile) -> impl Future<Output = Result<()>> + Send;

    /// All timers owned by `user_id`, newest `created_at` first
    fn list_timers(&self, user_id: &str) -> impl Future<Output = Result<Vec<Timer>>> + Send;

    fn insert_timer(
        &self,
        timer: &Timer,
        user_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Rows match on both `id` and `user_id`
    fn update_timer(
        &self,
        id: &str,
        user_id: &str,
        fields: TimerFields,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Rows match on both `id` and `user_id`
    fn delete_timer(&self, id: &str, user_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn subscribe_timer_changes(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Subscription>> + Send;

    fn unsubscribe(&self, id: SubscriptionId) -> impl Future<Output = ()> + Send;
}
