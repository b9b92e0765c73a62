//! Session manager - who is signed in
//!
//! Tracks the backend session and the user's profile. A signed-in user whose
//! profile row is missing gets one rebuilt from the name and emoji captured at
//! sign-up; when that fails the session stays up in a degraded state where
//! [`SessionManager::user`] is `None` but [`SessionManager::user_id`] is set.

use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, Mutex, RwLock};
use tokio::task::JoinHandle;

use first20_core::models::{AuthEvent, Profile, Session, SignupMetadata, User};
use first20_core::storage::RemoteStore;

use crate::event_manager::EventManager;
use crate::events::{SessionEvent, SessionEventType};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Profile unavailable for user {user_id}: {message}")]
    ProfileMissing { user_id: String, message: String },

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<first20_core::Error> for SessionError {
    fn from(e: first20_core::Error) -> Self {
        match e {
            first20_core::Error::Auth(message) => SessionError::Auth(message),
            first20_core::Error::Validation(message) => SessionError::Invalid(message),
            other => SessionError::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    user: Option<User>,
}

pub struct SessionManager<S: RemoteStore> {
    store: Arc<S>,
    state: Arc<RwLock<SessionState>>,
    /// Serializes session changes so an auth event and an explicit login can't interleave
    transition: Arc<Mutex<()>>,
    watcher: Arc<Mutex<Option<JoinHandle<()>>>>,
    event_manager: Arc<EventManager>,
}

impl<S: RemoteStore> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            state: self.state.clone(),
            transition: self.transition.clone(),
            watcher: self.watcher.clone(),
            event_manager: self.event_manager.clone(),
        }
    }
}

impl<S: RemoteStore> SessionManager<S> {
    pub fn new(store: Arc<S>, event_manager: Arc<EventManager>) -> Self {
        Self {
            store,
            state: Arc::new(RwLock::new(SessionState::default())),
            transition: Arc::new(Mutex::new(())),
            watcher: Arc::new(Mutex::new(None)),
            event_manager,
        }
    }

    /// Pick up a session the backend already holds, e.g. after a restart.
    ///
    /// Returns `Ok(None)` when nobody is signed in.
    pub async fn restore(&self) -> Result<Option<User>> {
        match self.store.current_session().await {
            Some(session) => self.establish(session).await.map(Some),
            None => {
                tracing::debug!("No session to restore");
                Ok(None)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(SessionError::Auth(
                "Email and password are required".to_string(),
            ));
        }

        tracing::info!("Signing in {}", email);
        let session = self.store.authenticate(email, password).await?;
        self.establish(session).await
    }

    /// Create an account and its profile, then sign in
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        emoji: Option<String>,
    ) -> Result<User> {
        if name.trim().is_empty() {
            return Err(SessionError::Invalid("Name cannot be empty".to_string()));
        }
        if email.trim().is_empty() || password.is_empty() {
            return Err(SessionError::Invalid(
                "Email and password are required".to_string(),
            ));
        }

        let metadata = SignupMetadata::new(name.to_string(), emoji);

        // Held across sign-up so the backend's auth event finds the profile in place
        let _transition = self.transition.lock().await;

        tracing::info!("Registering {}", email);
        let session = self.store.sign_up(email, password, metadata.clone()).await?;

        let profile = Profile::from_metadata(&session.user_id, &metadata)?;
        if let Err(e) = self.store.insert_profile(&profile).await {
            tracing::warn!("Creating profile for user {} failed: {}", profile.id, e);
        }

        self.establish_locked(session).await
    }

    /// Sign out locally even if the backend call fails
    pub async fn logout(&self) -> Result<()> {
        let remote = self.store.sign_out().await;
        self.clear().await;

        if let Err(e) = remote {
            tracing::warn!("Backend sign-out failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Change name and/or emoji; fields left as `None` keep their value
    pub async fn update_profile(&self, name: Option<String>, emoji: Option<String>) -> Result<User> {
        let _transition = self.transition.lock().await;

        let (user, email) = {
            let state = self.state.read().await;
            let session = state.session.as_ref().ok_or(SessionError::NotSignedIn)?;
            let user = state
                .user
                .clone()
                .ok_or_else(|| SessionError::ProfileMissing {
                    user_id: session.user_id.clone(),
                    message: "no profile loaded".to_string(),
                })?;
            (user, session.email.clone())
        };

        let profile = Profile {
            id: user.id.clone(),
            name: name.unwrap_or(user.name),
            emoji: emoji.unwrap_or(user.emoji),
        };
        profile
            .validate()
            .map_err(|e| SessionError::Invalid(e.to_string()))?;

        self.store.update_profile(&profile).await?;

        let updated = User::from_profile(&profile, &email);
        self.state.write().await.user = Some(updated.clone());
        tracing::info!("Updated profile for user {}", updated.id);
        Ok(updated)
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.user.clone()
    }

    /// Set whenever a session exists, with or without a loaded profile
    pub async fn user_id(&self) -> Option<String> {
        let state = self.state.read().await;
        state.session.as_ref().map(|session| session.user_id.clone())
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.read().await.session.clone()
    }

    pub async fn is_degraded(&self) -> bool {
        let state = self.state.read().await;
        state.session.is_some() && state.user.is_none()
    }

    /// Follow sign-in and sign-out events pushed by the backend
    pub async fn watch_auth_changes(&self) {
        let mut events = self.store.on_auth_change();
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn { session }) => {
                        if let Err(e) = manager.establish(session).await {
                            tracing::warn!("Session from auth event is degraded: {}", e);
                        }
                    }
                    Ok(AuthEvent::SignedOut) => manager.clear().await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} auth events, re-reading session", skipped);
                        match manager.store.current_session().await {
                            Some(session) => {
                                if let Err(e) = manager.establish(session).await {
                                    tracing::warn!("Session after resync is degraded: {}", e);
                                }
                            }
                            None => manager.clear().await,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Auth event stream closed");
        });

        if let Some(previous) = self.watcher.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_watching(&self) {
        if let Some(handle) = self.watcher.lock().await.take() {
            handle.abort();
        }
    }

    /// Adopt `session`, loading or repairing its profile.
    ///
    /// A session for the user already signed in is not processed twice, so
    /// the backend's auth event and the caller of `login` can both land here.
    async fn establish(&self, session: Session) -> Result<User> {
        let _transition = self.transition.lock().await;
        self.establish_locked(session).await
    }

    /// [`establish`](Self::establish) for callers already holding `transition`
    async fn establish_locked(&self, session: Session) -> Result<User> {
        {
            let state = self.state.read().await;
            if let Some(current) = &state.session {
                if current.user_id == session.user_id {
                    return state.user.clone().ok_or_else(|| SessionError::ProfileMissing {
                        user_id: session.user_id.clone(),
                        message: "no profile loaded".to_string(),
                    });
                }
            }
        }

        {
            let mut state = self.state.write().await;
            state.session = Some(session.clone());
            state.user = None;
        }

        let user_id = session.user_id.clone();
        let outcome = self.load_user(&session).await;

        match &outcome {
            Ok(user) => {
                self.state.write().await.user = Some(user.clone());
                tracing::info!("Signed in as {} ({})", user.name, user.id);
            }
            Err(e) => {
                tracing::error!("Signed in without a profile: {}", e);
                self.event_manager
                    .emit_session(SessionEvent::new(SessionEventType::ProfileUnavailable {
                        user_id: user_id.clone(),
                        message: e.to_string(),
                    }));
            }
        }

        self.event_manager.emit_session(SessionEvent::signed_in(user_id));
        outcome
    }

    async fn load_user(&self, session: &Session) -> Result<User> {
        match self.store.fetch_profile(&session.user_id).await {
            Ok(Some(profile)) => Ok(User::from_profile(&profile, &session.email)),
            Ok(None) => self.repair_profile(session).await,
            Err(e) => Err(SessionError::ProfileMissing {
                user_id: session.user_id.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// One attempt at recreating a missing profile row from sign-up data
    async fn repair_profile(&self, session: &Session) -> Result<User> {
        let missing = |message: String| SessionError::ProfileMissing {
            user_id: session.user_id.clone(),
            message,
        };

        let metadata = session
            .metadata
            .as_ref()
            .ok_or_else(|| missing("no sign-up data to rebuild the profile".to_string()))?;
        let profile = Profile::from_metadata(&session.user_id, metadata)
            .map_err(|e| missing(e.to_string()))?;

        tracing::info!("Creating missing profile for user {}", session.user_id);
        self.store
            .insert_profile(&profile)
            .await
            .map_err(|e| missing(e.to_string()))?;

        self.event_manager
            .emit_session(SessionEvent::new(SessionEventType::ProfileRepaired {
                user_id: session.user_id.clone(),
            }));
        Ok(User::from_profile(&profile, &session.email))
    }

    async fn clear(&self) {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut state = self.state.write().await;
            state.user = None;
            state.session.take()
        };

        if let Some(session) = previous {
            tracing::info!("Signed out user {}", session.user_id);
            self.event_manager.emit_session(SessionEvent::signed_out());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RuntimeEvent;
    use first20_core::models::DEFAULT_EMOJI;
    use first20_core::storage::{MemoryStore, Operation};
    use tokio::sync::broadcast;
    use tokio::time::{timeout, Duration};

    fn setup() -> (Arc<MemoryStore>, SessionManager<MemoryStore>, broadcast::Receiver<RuntimeEvent>) {
        let store = Arc::new(MemoryStore::new());
        let event_manager = Arc::new(EventManager::new());
        let events = event_manager.subscribe();
        let manager = SessionManager::new(store.clone(), event_manager);
        (store, manager, events)
    }

    fn session_events(events: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<SessionEventType> {
        let mut found = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RuntimeEvent::Session(event) = event {
                found.push(event.event_type);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_register_creates_profile() {
        let (store, manager, mut events) = setup();

        let user = manager
            .register("Ada", "ada@example.com", "secret-pass", Some("🧠".to_string()))
            .await
            .unwrap();

        assert_eq!(user.name, "Ada");
        assert_eq!(user.emoji, "🧠");
        assert_eq!(user.email, "ada@example.com");
        assert!(store.fetch_profile(&user.id).await.unwrap().is_some());
        assert_eq!(manager.user().await, Some(user.clone()));

        let types = session_events(&mut events);
        assert!(types.contains(&SessionEventType::SignedIn {
            user_id: user.id.clone()
        }));
        assert!(!types.contains(&SessionEventType::ProfileRepaired { user_id: user.id }));
    }

    #[tokio::test]
    async fn test_register_while_watching_does_not_repair() {
        let (_store, manager, mut events) = setup();
        manager.watch_auth_changes().await;

        let user = manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let types = session_events(&mut events);
        assert_eq!(
            types
                .iter()
                .filter(|t| matches!(t, SessionEventType::SignedIn { .. }))
                .count(),
            1
        );
        assert!(!types.contains(&SessionEventType::ProfileRepaired { user_id: user.id }));
        manager.stop_watching().await;
    }

    #[tokio::test]
    async fn test_register_falls_back_to_repair_when_profile_insert_fails() {
        let (store, manager, _events) = setup();
        store.fail_on(Operation::InsertProfile);

        let result = manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await;

        assert!(matches!(result, Err(SessionError::ProfileMissing { .. })));
        assert!(manager.is_degraded().await);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_store, manager, _events) = setup();

        assert!(matches!(
            manager.register(" ", "ada@example.com", "secret-pass", None).await,
            Err(SessionError::Invalid(_))
        ));
        assert!(matches!(
            manager.register("Ada", "ada@example.com", "123", None).await,
            Err(SessionError::Auth(_))
        ));
        assert!(manager.user_id().await.is_none());
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let (store, manager, _events) = setup();
        let registered = manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await
            .unwrap();
        manager.logout().await.unwrap();
        assert!(manager.user().await.is_none());
        assert!(manager.user_id().await.is_none());

        let user = manager.login("ada@example.com", "secret-pass").await.unwrap();
        assert_eq!(user, registered);
        assert_eq!(user.emoji, DEFAULT_EMOJI);
        assert!(store.current_session().await.is_some());
    }

    #[tokio::test]
    async fn test_login_rejects_blank_and_bad_credentials() {
        let (_store, manager, _events) = setup();

        assert!(matches!(
            manager.login("", "secret-pass").await,
            Err(SessionError::Auth(_))
        ));
        assert!(matches!(
            manager.login("nobody@example.com", "secret-pass").await,
            Err(SessionError::Auth(_))
        ));
        assert!(manager.session().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_profile_is_repaired_from_metadata() {
        let (store, manager, mut events) = setup();
        let user = manager
            .register("Ada", "ada@example.com", "secret-pass", Some("🎹".to_string()))
            .await
            .unwrap();
        manager.logout().await.unwrap();
        store.remove_profile(&user.id);
        session_events(&mut events);

        let restored = manager.login("ada@example.com", "secret-pass").await.unwrap();

        assert_eq!(restored.name, "Ada");
        assert_eq!(restored.emoji, "🎹");
        assert!(store.fetch_profile(&user.id).await.unwrap().is_some());
        assert!(session_events(&mut events).contains(&SessionEventType::ProfileRepaired {
            user_id: user.id
        }));
    }

    #[tokio::test]
    async fn test_failed_repair_degrades_session() {
        let (store, manager, _events) = setup();
        let user = manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await
            .unwrap();
        manager.logout().await.unwrap();
        store.remove_profile(&user.id);
        store.fail_on(Operation::InsertProfile);

        let result = manager.login("ada@example.com", "secret-pass").await;

        assert!(matches!(result, Err(SessionError::ProfileMissing { .. })));
        assert!(manager.user().await.is_none());
        assert_eq!(manager.user_id().await, Some(user.id));
        assert!(manager.is_degraded().await);
        assert!(matches!(
            manager.update_profile(Some("Ada L.".to_string()), None).await,
            Err(SessionError::ProfileMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_profile_is_partial() {
        let (store, manager, _events) = setup();
        let user = manager
            .register("Ada", "ada@example.com", "secret-pass", Some("🧠".to_string()))
            .await
            .unwrap();

        let updated = manager
            .update_profile(Some("Ada L.".to_string()), None)
            .await
            .unwrap();

        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.emoji, "🧠");
        let stored = store.fetch_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Ada L.");

        assert!(matches!(
            manager.update_profile(Some("  ".to_string()), None).await,
            Err(SessionError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_update_profile_requires_session() {
        let (_store, manager, _events) = setup();
        assert!(matches!(
            manager.update_profile(None, None).await,
            Err(SessionError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_restore_existing_session() {
        let (store, manager, _events) = setup();
        assert!(manager.restore().await.unwrap().is_none());

        manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await
            .unwrap();

        let event_manager = Arc::new(EventManager::new());
        let fresh = SessionManager::new(store, event_manager);
        let restored = fresh.restore().await.unwrap().unwrap();
        assert_eq!(restored.name, "Ada");
    }

    #[tokio::test]
    async fn test_auth_events_are_followed() {
        let (store, manager, mut events) = setup();
        manager.watch_auth_changes().await;

        store
            .sign_up(
                "ada@example.com",
                "secret-pass",
                SignupMetadata::new("Ada".to_string(), None),
            )
            .await
            .unwrap();

        let signed_in = timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(RuntimeEvent::Session(event)) = events.recv().await {
                    if let SessionEventType::SignedIn { user_id } = event.event_type {
                        return user_id;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.user_id().await, Some(signed_in));
        assert_eq!(manager.user().await.unwrap().name, "Ada");

        store.sign_out().await.unwrap();
        timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(RuntimeEvent::Session(event)) = events.recv().await {
                    if event.event_type == SessionEventType::SignedOut {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert!(manager.user_id().await.is_none());

        manager.stop_watching().await;
    }

    #[tokio::test]
    async fn test_login_and_auth_event_sign_in_once() {
        let (store, manager, mut events) = setup();
        manager
            .register("Ada", "ada@example.com", "secret-pass", None)
            .await
            .unwrap();
        manager.logout().await.unwrap();
        session_events(&mut events);

        manager.watch_auth_changes().await;
        let user = manager.login("ada@example.com", "secret-pass").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let signed_in: Vec<_> = session_events(&mut events)
            .into_iter()
            .filter(|t| matches!(t, SessionEventType::SignedIn { .. }))
            .collect();
        assert_eq!(signed_in, vec![SessionEventType::SignedIn { user_id: user.id }]);
        assert!(store.fetch_profile(&manager.user_id().await.unwrap()).await.unwrap().is_some());
    }
}
