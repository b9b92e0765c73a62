//! Wires the managers together
//!
//! The session manager decides who is signed in, the timer collection follows
//! the session, and the countdown manager follows the collection. All of it
//! is driven by one task reading the shared event bus.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use first20_core::models::{Config, User};
use first20_core::storage::RemoteStore;

use crate::collection::TimerCollection;
use crate::event_manager::EventManager;
use crate::events::{CollectionEventType, RuntimeEvent, SessionEventType};
use crate::session::{SessionError, SessionManager};
use crate::timer::CountdownManager;

pub struct Runtime<S: RemoteStore> {
    store: Arc<S>,
    event_manager: Arc<EventManager>,
    session: SessionManager<S>,
    collection: TimerCollection<S>,
    countdowns: CountdownManager<S>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RemoteStore> Runtime<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        let event_manager = Arc::new(EventManager::new());
        let session = SessionManager::new(store.clone(), event_manager.clone());
        let collection = TimerCollection::new(store.clone(), event_manager.clone());
        let countdowns = CountdownManager::new(
            collection.clone(),
            event_manager.clone(),
            config.countdown.tick_interval(),
        );

        Self {
            store,
            event_manager,
            session,
            collection,
            countdowns,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn session(&self) -> &SessionManager<S> {
        &self.session
    }

    pub fn collection(&self) -> &TimerCollection<S> {
        &self.collection
    }

    pub fn countdowns(&self) -> &CountdownManager<S> {
        &self.countdowns
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.event_manager.subscribe()
    }

    /// Start following events and restore any session the backend holds.
    ///
    /// A restored session with no usable profile is reported as an error but
    /// stays active; the collection still loads for it.
    pub async fn start(&self) -> Result<Option<User>, SessionError> {
        let events = self.event_manager.subscribe();
        let handle = self.spawn_dispatcher(events);
        if let Some(previous) = self.dispatcher.lock().await.replace(handle) {
            previous.abort();
        }

        self.session.watch_auth_changes().await;
        tracing::info!("Runtime started");

        self.session.restore().await
    }

    pub async fn shutdown(&self) {
        self.session.stop_watching().await;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }

        self.countdowns.unmount_all().await;
        self.collection.detach().await;
        tracing::info!("Runtime stopped");
    }

    fn spawn_dispatcher(&self, mut events: broadcast::Receiver<RuntimeEvent>) -> JoinHandle<()> {
        let collection = self.collection.clone();
        let countdowns = self.countdowns.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RuntimeEvent::Session(event)) => match event.event_type {
                        SessionEventType::SignedIn { user_id } => {
                            if collection.user_id().await.as_deref() == Some(user_id.as_str()) {
                                continue;
                            }
                            countdowns.unmount_all().await;
                            if let Err(e) = collection.attach(&user_id).await {
                                tracing::warn!("Timer collection attached with errors: {}", e);
                            }
                        }
                        SessionEventType::SignedOut => {
                            countdowns.unmount_all().await;
                            collection.detach().await;
                        }
                        _ => {}
                    },
                    Ok(RuntimeEvent::Collection(event)) => match event.event_type {
                        CollectionEventType::Loaded { .. }
                        | CollectionEventType::Added { .. }
                        | CollectionEventType::Removed { .. }
                        | CollectionEventType::Cleared => {
                            countdowns.reconcile(&collection.list().await).await;
                        }
                        _ => {}
                    },
                    Ok(RuntimeEvent::Timer(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Runtime lagged by {} events, reconciling", skipped);
                        countdowns.reconcile(&collection.list().await).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
