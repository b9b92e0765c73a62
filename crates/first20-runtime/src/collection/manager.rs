//! Timer collection manager - the signed-in user's timers
//!
//! Holds the in-memory list the views read from and keeps it in step with the
//! backend. Writes are two-phase: the list is changed first, the backend call
//! follows, and the local change is rolled back if the call fails. Any push
//! notification for the user's rows triggers a full re-fetch.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use first20_core::models::Timer;
use first20_core::storage::{RemoteStore, Subscription, SubscriptionId, TimerFields};

use crate::event_manager::EventManager;
use crate::events::CollectionEvent;

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("No signed-in user")]
    NoSession,

    #[error("Timer not found: {0}")]
    NotFound(String),

    #[error("Invalid timer: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] first20_core::Error),
}

pub type Result<T> = std::result::Result<T, CollectionError>;

#[derive(Default)]
struct CollectionState {
    user_id: Option<String>,
    timers: Vec<Timer>,
    loading: bool,
    last_error: Option<String>,
    /// Bumped on every attach/detach; results fetched under an older value are dropped
    generation: u64,
}

impl CollectionState {
    fn session(&self) -> Result<(String, u64)> {
        self.user_id
            .clone()
            .map(|user_id| (user_id, self.generation))
            .ok_or(CollectionError::NoSession)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.timers.iter().position(|timer| timer.id == id)
    }
}

struct Listener {
    subscription_id: SubscriptionId,
    handle: JoinHandle<()>,
}

pub struct TimerCollection<S: RemoteStore> {
    store: Arc<S>,
    state: Arc<RwLock<CollectionState>>,
    listener: Arc<Mutex<Option<Listener>>>,
    event_manager: Arc<EventManager>,
}

impl<S: RemoteStore> Clone for TimerCollection<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            state: self.state.clone(),
            listener: self.listener.clone(),
            event_manager: self.event_manager.clone(),
        }
    }
}

impl<S: RemoteStore> TimerCollection<S> {
    pub fn new(store: Arc<S>, event_manager: Arc<EventManager>) -> Self {
        Self {
            store,
            state: Arc::new(RwLock::new(CollectionState::default())),
            listener: Arc::new(Mutex::new(None)),
            event_manager,
        }
    }

    /// Bind the collection to `user_id`: drop any previous user's state and
    /// subscription, subscribe to the new user's changes, then fetch.
    pub async fn attach(&self, user_id: &str) -> Result<()> {
        let mut listener = self.listener.lock().await;
        self.release(&mut listener).await;

        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.user_id = Some(user_id.to_string());
            state.timers.clear();
            state.last_error = None;
            state.loading = true;
            state.generation
        };
        tracing::info!("Attaching timer collection to user {}", user_id);

        let subscribed = self.subscribe(&mut listener, user_id, generation).await;
        drop(listener);

        self.refresh_for(generation).await?;
        self.report_unsubscribed(subscribed, user_id).await
    }

    /// Open the push subscription for `user_id` and start its listener.
    /// The caller holds the listener lock.
    async fn subscribe(
        &self,
        listener: &mut Option<Listener>,
        user_id: &str,
        generation: u64,
    ) -> std::result::Result<(), first20_core::Error> {
        match self.store.subscribe_timer_changes(user_id).await {
            Ok(subscription) => {
                *listener = Some(self.spawn_listener(subscription, generation));
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to subscribe to timer changes: {}", e);
                Err(e)
            }
        }
    }

    /// A fetch that succeeded clears the last error; a missing subscription
    /// must still be visible afterwards.
    async fn report_unsubscribed(
        &self,
        subscribed: std::result::Result<(), first20_core::Error>,
        user_id: &str,
    ) -> Result<()> {
        match subscribed {
            Ok(()) => Ok(()),
            Err(e) => Err(self
                .record(CollectionError::Store(e), Some(user_id.to_string()))
                .await),
        }
    }

    /// Cancel the subscription and discard all state
    pub async fn detach(&self) {
        let mut listener = self.listener.lock().await;
        self.release(&mut listener).await;

        let previous = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.timers.clear();
            state.loading = false;
            state.last_error = None;
            state.user_id.take()
        };

        if let Some(user_id) = previous {
            tracing::info!("Detached timer collection from user {}", user_id);
            self.event_manager.emit_collection(CollectionEvent::cleared());
        }
    }

    async fn release(&self, listener: &mut Option<Listener>) {
        if let Some(active) = listener.take() {
            active.handle.abort();
            self.store.unsubscribe(active.subscription_id).await;
            tracing::debug!("Released subscription {:?}", active.subscription_id);
        }
    }

    fn spawn_listener(&self, subscription: Subscription, generation: u64) -> Listener {
        let subscription_id = subscription.id;
        let mut events = subscription.events;
        let collection = self.clone();

        let handle = tokio::spawn(async move {
            while let Some(change) = events.recv().await {
                tracing::debug!(
                    "Push notification {:?} for timer {}",
                    change.kind,
                    change.timer_id
                );
                // A single re-fetch covers everything already queued
                while events.try_recv().is_ok() {}

                if let Err(e) = collection.refresh_for(generation).await {
                    tracing::warn!("Refresh after push notification failed: {}", e);
                }
            }
            tracing::debug!("Subscription {:?} closed", subscription_id);
        });

        Listener {
            subscription_id,
            handle,
        }
    }

    /// Re-fetch the whole collection for the attached user, subscribing
    /// again first if live updates are not running
    pub async fn refresh(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;
        let (generation, user_id) = {
            let state = self.state.read().await;
            (state.generation, state.user_id.clone())
        };

        let subscribed = match user_id.as_deref() {
            Some(user_id) if listener.is_none() => {
                tracing::info!("Retrying timer subscription for user {}", user_id);
                self.subscribe(&mut listener, user_id, generation).await
            }
            _ => Ok(()),
        };
        drop(listener);

        self.refresh_for(generation).await?;
        match user_id {
            Some(user_id) => self.report_unsubscribed(subscribed, &user_id).await,
            None => Ok(()),
        }
    }

    /// Whether push notifications are currently being received
    pub async fn is_live(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    async fn refresh_for(&self, generation: u64) -> Result<()> {
        let user_id = {
            let state = self.state.read().await;
            if state.generation != generation {
                return Ok(());
            }
            match state.user_id.clone() {
                Some(user_id) => user_id,
                None => return Ok(()),
            }
        };

        tracing::debug!("Fetching timers for user {}", user_id);
        let result = self.store.list_timers(&user_id).await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::debug!("Discarding stale timer fetch for user {}", user_id);
            return Ok(());
        }
        state.loading = false;

        match result {
            Ok(mut timers) => {
                timers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                let count = timers.len();
                state.timers = timers;
                state.last_error = None;
                drop(state);

                tracing::debug!("Loaded {} timers for user {}", count, user_id);
                self.event_manager
                    .emit_collection(CollectionEvent::loaded(user_id, count));
                Ok(())
            }
            Err(e) => {
                drop(state);
                tracing::error!("Error loading timers: {}", e);
                Err(self.record(CollectionError::Store(e), Some(user_id)).await)
            }
        }
    }

    /// Current timers, newest first
    pub async fn list(&self) -> Vec<Timer> {
        self.state.read().await.timers.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Timer> {
        let state = self.state.read().await;
        state.timers.iter().find(|timer| timer.id == id).cloned()
    }

    /// Like [`get`](Self::get), for callers that treat absence as an error
    pub async fn require(&self, id: &str) -> Result<Timer> {
        self.get(id)
            .await
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn user_id(&self) -> Option<String> {
        self.state.read().await.user_id.clone()
    }

    pub async fn add(&self, mut timer: Timer) -> Result<Timer> {
        timer.normalize();

        let (user_id, generation) = {
            let mut state = self.state.write().await;
            state.last_error = None;
            let session = state.session();
            match session {
                Ok(session) if state.position(&timer.id).is_some() => {
                    drop(state);
                    let err = CollectionError::Invalid(format!("Timer {} already exists", timer.id));
                    return Err(self.record(err, Some(session.0)).await);
                }
                Ok(session) => {
                    if let Err(e) = timer.validate() {
                        drop(state);
                        let err = CollectionError::Invalid(e.to_string());
                        return Err(self.record(err, Some(session.0)).await);
                    }
                    state.timers.insert(0, timer.clone());
                    session
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!("Adding timer {} for user {}", timer.id, user_id);
        if let Err(e) = self.store.insert_timer(&timer, &user_id).await {
            {
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.timers.retain(|existing| existing != &timer);
                }
            }
            tracing::error!("Error adding timer {}: {}", timer.id, e);
            return Err(self.record(CollectionError::Store(e), Some(user_id)).await);
        }

        self.event_manager
            .emit_collection(CollectionEvent::added(user_id, timer.clone()));
        Ok(timer)
    }

    /// Write every editable field of `timer`; `id` and `created_at` stay as stored
    pub async fn update(&self, mut timer: Timer) -> Result<Timer> {
        timer.normalize();

        let ((user_id, generation), previous) = {
            let mut state = self.state.write().await;
            state.last_error = None;
            let session = state.session()?;

            let Some(position) = state.position(&timer.id) else {
                drop(state);
                let err = CollectionError::NotFound(timer.id.clone());
                return Err(self.record(err, Some(session.0)).await);
            };
            if let Err(e) = timer.validate() {
                drop(state);
                let err = CollectionError::Invalid(e.to_string());
                return Err(self.record(err, Some(session.0)).await);
            }

            timer.created_at = state.timers[position].created_at;
            let previous = std::mem::replace(&mut state.timers[position], timer.clone());
            (session, previous)
        };

        tracing::debug!("Updating timer {} for user {}", timer.id, user_id);
        let fields = TimerFields::from(&timer);
        if let Err(e) = self.store.update_timer(&timer.id, &user_id, fields).await {
            {
                let mut state = self.state.write().await;
                if state.generation == generation {
                    if let Some(entry) = state.timers.iter_mut().find(|t| t.id == timer.id) {
                        if *entry == timer {
                            *entry = previous;
                        }
                    }
                }
            }
            tracing::error!("Error updating timer {}: {}", timer.id, e);
            return Err(self.record(CollectionError::Store(e), Some(user_id)).await);
        }

        self.event_manager
            .emit_collection(CollectionEvent::updated(user_id, timer.clone()));
        Ok(timer)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let ((user_id, generation), position, removed) = {
            let mut state = self.state.write().await;
            state.last_error = None;
            let session = state.session()?;

            let Some(position) = state.position(id) else {
                drop(state);
                let err = CollectionError::NotFound(id.to_string());
                return Err(self.record(err, Some(session.0)).await);
            };
            let removed = state.timers.remove(position);
            (session, position, removed)
        };

        tracing::info!("Deleting timer {} for user {}", id, user_id);
        if let Err(e) = self.store.delete_timer(id, &user_id).await {
            {
                let mut state = self.state.write().await;
                if state.generation == generation && state.position(id).is_none() {
                    let at = position.min(state.timers.len());
                    state.timers.insert(at, removed);
                }
            }
            tracing::error!("Error deleting timer {}: {}", id, e);
            return Err(self.record(CollectionError::Store(e), Some(user_id)).await);
        }

        self.event_manager
            .emit_collection(CollectionEvent::removed(user_id, id.to_string()));
        Ok(())
    }

    /// Store the failure as the last error and broadcast it
    async fn record(&self, err: CollectionError, user_id: Option<String>) -> CollectionError {
        let message = err.to_string();
        self.state.write().await.last_error = Some(message.clone());
        self.event_manager
            .emit_collection(CollectionEvent::failed(user_id, message));
        err
    }
}
