//! Countdown manager - one engine per displayed timer

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

use first20_core::models::Timer;
use first20_core::storage::RemoteStore;

use super::engine::{CountdownEngine, CountdownSnapshot, EngineError};
use crate::collection::TimerCollection;
use crate::event_manager::EventManager;

#[derive(Debug, thiserror::Error)]
pub enum CountdownManagerError {
    #[error("No countdown mounted for timer: {0}")]
    NotFound(String),

    #[error("Countdown engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, CountdownManagerError>;

/// Keeps the set of running engines in line with the timers on screen
pub struct CountdownManager<S: RemoteStore> {
    /// Mounted engines indexed by timer id
    engines: Arc<RwLock<HashMap<String, Arc<CountdownEngine<S>>>>>,
    collection: TimerCollection<S>,
    event_manager: Arc<EventManager>,
    tick_interval: Duration,
}

impl<S: RemoteStore> Clone for CountdownManager<S> {
    fn clone(&self) -> Self {
        Self {
            engines: self.engines.clone(),
            collection: self.collection.clone(),
            event_manager: self.event_manager.clone(),
            tick_interval: self.tick_interval,
        }
    }
}

impl<S: RemoteStore> CountdownManager<S> {
    pub fn new(
        collection: TimerCollection<S>,
        event_manager: Arc<EventManager>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engines: Arc::new(RwLock::new(HashMap::new())),
            collection,
            event_manager,
            tick_interval,
        }
    }

    /// Create an idle engine for `timer`. Returns `false` if one is already mounted.
    pub async fn mount(&self, timer: &Timer) -> bool {
        let mut engines = self.engines.write().await;
        if engines.contains_key(&timer.id) {
            return false;
        }

        let engine = CountdownEngine::new(
            timer,
            self.collection.clone(),
            self.event_manager.clone(),
            self.tick_interval,
        );
        engines.insert(timer.id.clone(), Arc::new(engine));
        tracing::debug!("Mounted countdown for timer {}", timer.id);
        true
    }

    /// Tear down the engine for `timer_id`, cancelling its tick loop
    pub async fn unmount(&self, timer_id: &str) -> bool {
        let engine = self.engines.write().await.remove(timer_id);

        match engine {
            Some(engine) => {
                engine.shutdown().await;
                tracing::debug!("Unmounted countdown for timer {}", timer_id);
                true
            }
            None => false,
        }
    }

    pub async fn unmount_all(&self) {
        let engines: Vec<_> = {
            let mut engines = self.engines.write().await;
            engines.drain().map(|(_, engine)| engine).collect()
        };

        for engine in &engines {
            engine.shutdown().await;
        }
        if !engines.is_empty() {
            tracing::info!("Unmounted {} countdowns", engines.len());
        }
    }

    async fn engine(&self, timer_id: &str) -> Result<Arc<CountdownEngine<S>>> {
        let engines = self.engines.read().await;
        engines
            .get(timer_id)
            .cloned()
            .ok_or_else(|| CountdownManagerError::NotFound(timer_id.to_string()))
    }

    pub async fn start(&self, timer_id: &str) -> Result<bool> {
        let engine = self.engine(timer_id).await?;
        Ok(engine.start().await)
    }

    pub async fn pause(&self, timer_id: &str) -> Result<bool> {
        let engine = self.engine(timer_id).await?;
        Ok(engine.pause().await?)
    }

    pub async fn reset(&self, timer_id: &str) -> Result<()> {
        let engine = self.engine(timer_id).await?;
        engine.reset().await?;
        Ok(())
    }

    pub async fn snapshot(&self, timer_id: &str) -> Result<CountdownSnapshot> {
        let engine = self.engine(timer_id).await?;
        Ok(engine.snapshot().await)
    }

    pub async fn toggle_skill(&self, timer_id: &str, index: usize) -> Result<bool> {
        let engine = self.engine(timer_id).await?;
        Ok(engine.toggle_skill(index).await?)
    }

    /// Snapshots of every mounted countdown, ordered by timer id
    pub async fn snapshots(&self) -> Vec<CountdownSnapshot> {
        let engines: Vec<_> = self.engines.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(engines.len());
        for engine in engines {
            snapshots.push(engine.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.timer_id.cmp(&b.timer_id));
        snapshots
    }

    pub async fn mounted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_mounted(&self, timer_id: &str) -> bool {
        self.engines.read().await.contains_key(timer_id)
    }

    /// Match the mounted engines to the collection's current timers.
    ///
    /// Engines for timers that disappeared are torn down, new timers get an
    /// idle engine, and idle engines pick up refreshed remaining times.
    pub async fn reconcile(&self, timers: &[Timer]) {
        let stale: Vec<String> = {
            let engines = self.engines.read().await;
            engines
                .keys()
                .filter(|id| !timers.iter().any(|timer| &timer.id == *id))
                .cloned()
                .collect()
        };
        for timer_id in stale {
            self.unmount(&timer_id).await;
        }

        for timer in timers {
            if self.mount(timer).await {
                continue;
            }
            if let Ok(engine) = self.engine(&timer.id).await {
                engine.adopt(timer.time_left).await;
                engine.retain_skills(timer.skill_breakdown.len()).await;
                if let Err(e) = engine.flush().await {
                    tracing::warn!("Retrying checkpoint for timer {} failed: {}", timer.id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use first20_core::models::{CountdownState, TWENTY_HOURS};
    use first20_core::storage::MemoryStore;
    use tokio::time::sleep;

    async fn setup() -> (Arc<MemoryStore>, TimerCollection<MemoryStore>, CountdownManager<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let event_manager = Arc::new(EventManager::new());
        let collection = TimerCollection::new(store.clone(), event_manager.clone());
        collection.attach("u1").await.unwrap();
        let manager =
            CountdownManager::new(collection.clone(), event_manager, Duration::from_secs(1));
        (store, collection, manager)
    }

    async fn add(collection: &TimerCollection<MemoryStore>, title: &str) -> Timer {
        let timer = Timer::new(title.to_string(), String::new(), vec![], String::new()).unwrap();
        collection.add(timer).await.unwrap()
    }

    #[tokio::test]
    async fn test_mount_once() {
        let (_store, collection, manager) = setup().await;
        let timer = add(&collection, "Chess").await;

        assert!(manager.mount(&timer).await);
        assert!(!manager.mount(&timer).await);
        assert_eq!(manager.mounted_ids().await, vec![timer.id.clone()]);

        let snapshot = manager.snapshot(&timer.id).await.unwrap();
        assert_eq!(snapshot.state, CountdownState::Idle);
        assert_eq!(snapshot.time_left, TWENTY_HOURS);
    }

    #[tokio::test]
    async fn test_unknown_timer() {
        let (_store, _collection, manager) = setup().await;
        assert!(matches!(
            manager.start("missing").await,
            Err(CountdownManagerError::NotFound(_))
        ));
        assert!(!manager.unmount("missing").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_pause_through_manager() {
        let (store, collection, manager) = setup().await;
        let timer = add(&collection, "Chess").await;
        manager.mount(&timer).await;

        assert!(manager.start(&timer.id).await.unwrap());
        sleep(Duration::from_millis(2500)).await;
        assert!(manager.pause(&timer.id).await.unwrap());

        assert_eq!(store.row(&timer.id).unwrap().time_left, TWENTY_HOURS - 2);
    }

    #[tokio::test]
    async fn test_checked_skills_follow_shorter_checklist() {
        let (_store, collection, manager) = setup().await;
        let timer = Timer::new(
            "Piano".to_string(),
            String::new(),
            vec!["Scales".to_string(), "Sight reading".to_string()],
            String::new(),
        )
        .unwrap();
        let timer = collection.add(timer).await.unwrap();
        manager.mount(&timer).await;

        assert!(manager.toggle_skill(&timer.id, 0).await.unwrap());
        assert!(manager.toggle_skill(&timer.id, 1).await.unwrap());

        let mut edited = timer.clone();
        edited.set_skill_breakdown(vec!["Scales".to_string()]);
        collection.update(edited).await.unwrap();
        manager.reconcile(&collection.list().await).await;

        let snapshot = manager.snapshot(&timer.id).await.unwrap();
        assert_eq!(snapshot.checked_skills, vec![0]);
        assert!(matches!(
            manager.toggle_skill("missing", 0).await,
            Err(CountdownManagerError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_tears_down_removed_timers() {
        let (_store, collection, manager) = setup().await;
        let kept = add(&collection, "Chess").await;
        let removed = add(&collection, "Piano").await;
        manager.reconcile(&collection.list().await).await;
        assert_eq!(manager.mounted_ids().await.len(), 2);

        manager.start(&removed.id).await.unwrap();
        collection.remove(&removed.id).await.unwrap();
        manager.reconcile(&collection.list().await).await;

        assert_eq!(manager.mounted_ids().await, vec![kept.id.clone()]);
        assert!(!manager.is_mounted(&removed.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_adopts_refreshed_value_when_idle() {
        let (_store, collection, manager) = setup().await;
        let idle = add(&collection, "Chess").await;
        let running = add(&collection, "Piano").await;
        manager.reconcile(&collection.list().await).await;
        manager.start(&running.id).await.unwrap();

        let timers: Vec<Timer> = collection
            .list()
            .await
            .into_iter()
            .map(|mut timer| {
                timer.time_left = 600;
                timer
            })
            .collect();
        manager.reconcile(&timers).await;

        assert_eq!(manager.snapshot(&idle.id).await.unwrap().time_left, 600);
        assert_eq!(
            manager.snapshot(&running.id).await.unwrap().time_left,
            TWENTY_HOURS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_all() {
        let (store, collection, manager) = setup().await;
        let timer = add(&collection, "Chess").await;
        manager.mount(&timer).await;
        manager.start(&timer.id).await.unwrap();

        manager.unmount_all().await;
        sleep(Duration::from_secs(3)).await;

        assert!(manager.mounted_ids().await.is_empty());
        assert!(manager.snapshots().await.is_empty());
        assert_eq!(store.row(&timer.id).unwrap().time_left, TWENTY_HOURS);
    }
}
