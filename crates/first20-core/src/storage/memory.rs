//! In-process backend used by tests and the local CLI
//!
//! Behaves like the hosted backend as far as the runtime can observe:
//! credential checks, per-user timer rows keyed by id and owner, change
//! notifications for every successful write, and auth events. Failures can be
//! injected per [`Operation`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::record::{TimerFields, TimerRecord};
use super::remote::{ChangeKind, RemoteStore, Subscription, SubscriptionId, TimerChange};
use crate::models::{AuthEvent, Profile, Session, SignupMetadata, Timer, TWENTY_HOURS};
use crate::{Error, Result};

const MIN_PASSWORD_LEN: usize = 6;

/// Backend calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    SignUp,
    SignOut,
    FetchProfile,
    InsertProfile,
    UpdateProfile,
    ListTimers,
    InsertTimer,
    UpdateTimer,
    DeleteTimer,
    Subscribe,
}

struct Account {
    user_id: String,
    password: String,
    metadata: SignupMetadata,
}

struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    profiles: HashMap<String, Profile>,
    rows: Vec<TimerRecord>,
    subscribers: HashMap<SubscriptionId, (String, mpsc::UnboundedSender<TimerChange>)>,
    next_subscription: u64,
    failures: HashSet<Operation>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    auth_tx: broadcast::Sender<AuthEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                accounts: HashMap::new(),
                session: None,
                profiles: HashMap::new(),
                rows: Vec::new(),
                subscribers: HashMap::new(),
                next_subscription: 1,
                failures: HashSet::new(),
            })),
            auth_tx,
        }
    }

    /// Make every following call of `operation` fail until cleared
    pub fn fail_on(&self, operation: Operation) {
        self.lock().failures.insert(operation);
    }

    pub fn clear_failure(&self, operation: Operation) {
        self.lock().failures.remove(&operation);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Raw rows as the backend holds them
    pub fn rows(&self) -> Vec<TimerRecord> {
        self.lock().rows.clone()
    }

    pub fn row(&self, id: &str) -> Option<TimerRecord> {
        self.lock().rows.iter().find(|row| row.id == id).cloned()
    }

    /// Drop a profile row, leaving the account in place
    pub fn remove_profile(&self, user_id: &str) {
        self.lock().profiles.remove(user_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(inner: &Inner, operation: Operation) -> Result<()> {
        if inner.failures.contains(&operation) {
            return Err(Error::Store(format!("{:?} failed: backend unavailable", operation)));
        }
        Ok(())
    }

    fn notify(inner: &mut Inner, kind: ChangeKind, timer_id: &str, user_id: &str) {
        let change = TimerChange {
            kind,
            timer_id: timer_id.to_string(),
            user_id: user_id.to_string(),
        };

        inner.subscribers.retain(|id, (owner, tx)| {
            if owner != user_id {
                return true;
            }
            let delivered = tx.send(change.clone()).is_ok();
            if !delivered {
                tracing::debug!("Dropping closed subscription {:?}", id);
            }
            delivered
        });
    }

    fn begin_session(&self, inner: &mut Inner, session: Session) {
        inner.session = Some(session.clone());
        let _ = self.auth_tx.send(AuthEvent::SignedIn { session });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Session> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::Authenticate)?;

        let session = match inner.accounts.get(email) {
            Some(account) if account.password == password => Session::new(
                account.user_id.clone(),
                email.to_string(),
                Some(account.metadata.clone()),
            ),
            _ => return Err(Error::Auth("Invalid login credentials".to_string())),
        };

        self.begin_session(&mut inner, session.clone());
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignupMetadata,
    ) -> Result<Session> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::SignUp)?;

        if !email.contains('@') {
            return Err(Error::Auth("Unable to validate email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::Auth(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if inner.accounts.contains_key(email) {
            return Err(Error::Auth("User already registered".to_string()));
        }

        let user_id = Uuid::new_v4().to_string();
        inner.accounts.insert(
            email.to_string(),
            Account {
                user_id: user_id.clone(),
                password: password.to_string(),
                metadata: metadata.clone(),
            },
        );

        let session = Session::new(user_id, email.to_string(), Some(metadata));
        self.begin_session(&mut inner, session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::SignOut)?;

        if inner.session.take().is_some() {
            let _ = self.auth_tx.send(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    fn on_auth_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let inner = self.lock();
        Self::check(&inner, Operation::FetchProfile)?;
        Ok(inner.profiles.get(user_id).cloned())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::InsertProfile)?;

        if inner.profiles.contains_key(&profile.id) {
            return Err(Error::Store(format!(
                "Profile already exists for user {}",
                profile.id
            )));
        }
        inner.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::UpdateProfile)?;

        match inner.profiles.get_mut(&profile.id) {
            Some(existing) => {
                *existing = profile.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Profile {}", profile.id))),
        }
    }

    async fn list_timers(&self, user_id: &str) -> Result<Vec<Timer>> {
        let inner = self.lock();
        Self::check(&inner, Operation::ListTimers)?;

        let mut rows: Vec<TimerRecord> = inner
            .rows
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows.into_iter().map(TimerRecord::into_timer).collect())
    }

    async fn insert_timer(&self, timer: &Timer, user_id: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::InsertTimer)?;

        if inner.rows.iter().any(|row| row.id == timer.id) {
            return Err(Error::Store(format!(
                "Duplicate key: timer {} already exists",
                timer.id
            )));
        }
        if timer.time_left > TWENTY_HOURS {
            return Err(Error::Store("time_left violates check constraint".to_string()));
        }

        inner.rows.push(TimerRecord::from_timer(timer, user_id));
        Self::notify(&mut inner, ChangeKind::Insert, &timer.id, user_id);
        Ok(())
    }

    async fn update_timer(&self, id: &str, user_id: &str, fields: TimerFields) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::UpdateTimer)?;

        if fields.time_left > TWENTY_HOURS {
            return Err(Error::Store("time_left violates check constraint".to_string()));
        }

        let row = inner
            .rows
            .iter_mut()
            .find(|row| row.id == id && row.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("Timer {}", id)))?;
        row.apply(fields);

        Self::notify(&mut inner, ChangeKind::Update, id, user_id);
        Ok(())
    }

    async fn delete_timer(&self, id: &str, user_id: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::DeleteTimer)?;

        let position = inner
            .rows
            .iter()
            .position(|row| row.id == id && row.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("Timer {}", id)))?;
        inner.rows.remove(position);

        Self::notify(&mut inner, ChangeKind::Delete, id, user_id);
        Ok(())
    }

    async fn subscribe_timer_changes(&self, user_id: &str) -> Result<Subscription> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::Subscribe)?;

        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.insert(id, (user_id.to_string(), tx));

        Ok(Subscription {
            id,
            user_id: user_id.to_string(),
            events: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn signed_up(store: &MemoryStore, email: &str) -> Session {
        store
            .sign_up(
                email,
                "secret-pass",
                SignupMetadata::new("Ada".to_string(), None),
            )
            .await
            .unwrap()
    }

    fn timer(title: &str, age_minutes: i64) -> Timer {
        let mut timer = Timer::new(title.to_string(), String::new(), vec![], String::new()).unwrap();
        timer.created_at = Utc::now() - Duration::minutes(age_minutes);
        timer
    }

    #[tokio::test]
    async fn test_sign_up_and_authenticate() {
        let store = MemoryStore::new();
        let session = signed_up(&store, "ada@example.com").await;
        assert_eq!(store.current_session().await, Some(session.clone()));

        store.sign_out().await.unwrap();
        assert!(store.current_session().await.is_none());

        let again = store
            .authenticate("ada@example.com", "secret-pass")
            .await
            .unwrap();
        assert_eq!(again.user_id, session.user_id);
        assert_eq!(again.metadata.unwrap().name, "Ada");
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let store = MemoryStore::new();
        signed_up(&store, "ada@example.com").await;

        let result = store.authenticate("ada@example.com", "wrong").await;
        assert!(matches!(result, Err(Error::Auth(_))));

        let result = store.authenticate("nobody@example.com", "secret-pass").await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_sign_up_rules() {
        let store = MemoryStore::new();
        let metadata = SignupMetadata::new("Ada".to_string(), None);

        let short = store.sign_up("ada@example.com", "123", metadata.clone()).await;
        assert!(matches!(short, Err(Error::Auth(_))));

        signed_up(&store, "ada@example.com").await;
        let duplicate = store
            .sign_up("ada@example.com", "secret-pass", metadata)
            .await;
        assert!(matches!(duplicate, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_auth_events() {
        let store = MemoryStore::new();
        let mut events = store.on_auth_change();

        let session = signed_up(&store, "ada@example.com").await;
        store.sign_out().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedIn { session }
        );
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_scoped() {
        let store = MemoryStore::new();
        let older = timer("Older", 30);
        let newer = timer("Newer", 1);
        let foreign = timer("Foreign", 0);

        store.insert_timer(&older, "u1").await.unwrap();
        store.insert_timer(&newer, "u1").await.unwrap();
        store.insert_timer(&foreign, "u2").await.unwrap();

        let listed = store.list_timers("u1").await.unwrap();
        assert_eq!(listed, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_update_requires_owner() {
        let store = MemoryStore::new();
        let mut timer = timer("Chess", 0);
        store.insert_timer(&timer, "u1").await.unwrap();

        timer.time_left = 10;
        let result = store
            .update_timer(&timer.id, "u2", TimerFields::from(&timer))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.row(&timer.id).unwrap().time_left, TWENTY_HOURS);

        store
            .update_timer(&timer.id, "u1", TimerFields::from(&timer))
            .await
            .unwrap();
        assert_eq!(store.row(&timer.id).unwrap().time_left, 10);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = MemoryStore::new();
        let timer = timer("Chess", 0);
        store.insert_timer(&timer, "u1").await.unwrap();

        assert!(store.delete_timer(&timer.id, "u2").await.is_err());
        store.delete_timer(&timer.id, "u1").await.unwrap();
        assert!(store.row(&timer.id).is_none());
    }

    #[tokio::test]
    async fn test_subscription_scoped_to_user() {
        let store = MemoryStore::new();
        let mut mine = store.subscribe_timer_changes("u1").await.unwrap();
        let mut theirs = store.subscribe_timer_changes("u2").await.unwrap();

        let timer = timer("Chess", 0);
        store.insert_timer(&timer, "u1").await.unwrap();

        let change = mine.events.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.timer_id, timer.id);
        assert!(theirs.events.try_recv().is_err());

        store.unsubscribe(mine.id).await;
        assert_eq!(store.subscriber_count(), 1);
        store.delete_timer(&timer.id, "u1").await.unwrap();
        assert!(mine.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_on(Operation::InsertTimer);

        let timer = timer("Chess", 0);
        let result = store.insert_timer(&timer, "u1").await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(store.rows().is_empty());

        store.clear_failures();
        store.insert_timer(&timer, "u1").await.unwrap();
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_rows() {
        let store = MemoryStore::new();
        let profile = Profile::new("u1".to_string(), "Ada".to_string(), None).unwrap();

        assert!(store.fetch_profile("u1").await.unwrap().is_none());
        store.insert_profile(&profile).await.unwrap();
        assert!(store.insert_profile(&profile).await.is_err());

        let mut renamed = profile.clone();
        renamed.name = "Ada L.".to_string();
        store.update_profile(&renamed).await.unwrap();
        assert_eq!(store.fetch_profile("u1").await.unwrap(), Some(renamed));

        store.remove_profile("u1");
        assert!(store.fetch_profile("u1").await.unwrap().is_none());
    }
}
