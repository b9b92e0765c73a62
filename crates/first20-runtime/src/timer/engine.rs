use first20_core::models::{Countdown, CountdownState, TickOutcome, TimeBreakdown, Timer};
use first20_core::storage::RemoteStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

use super::events::{TimerEvent, TimerEventType};
use crate::collection::{CollectionError, TimerCollection};
use crate::event_manager::EventManager;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Timer not found: {0}")]
    NotFound(String),

    #[error("Timer {timer_id} has no skill at position {index}")]
    SkillOutOfRange { timer_id: String, index: usize },

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Point-in-time view of one countdown, as a card would render it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountdownSnapshot {
    pub timer_id: String,
    pub time_left: u32,
    pub state: CountdownState,
    pub display: TimeBreakdown,
    /// The last checkpoint failed and the local value is ahead of the backend
    pub unsynced: bool,
    /// Positions in the skill checklist ticked off on this card
    pub checked_skills: Vec<usize>,
}

struct EngineState {
    countdown: Countdown,
    unsynced: bool,
    /// Incremented on every start, pause and reset; a tick loop only acts for its own run
    run: u64,
    /// Checklist progress lives with the card only, it is never written back
    checked: BTreeSet<usize>,
}

/// Countdown for one displayed timer.
///
/// Ticks locally once per interval and writes the remaining time through the
/// timer collection on pause, reset and expiry. Dropping the engine cancels
/// any running tick loop.
pub struct CountdownEngine<S: RemoteStore> {
    timer_id: String,
    state: Arc<RwLock<EngineState>>,
    collection: TimerCollection<S>,
    event_manager: Arc<EventManager>,
    tick_interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RemoteStore> CountdownEngine<S> {
    pub fn new(
        timer: &Timer,
        collection: TimerCollection<S>,
        event_manager: Arc<EventManager>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            timer_id: timer.id.clone(),
            state: Arc::new(RwLock::new(EngineState {
                countdown: Countdown::new(timer.time_left),
                unsynced: false,
                run: 0,
                checked: BTreeSet::new(),
            })),
            collection,
            event_manager,
            tick_interval,
            ticker: Mutex::new(None),
        }
    }

    pub fn timer_id(&self) -> &str {
        &self.timer_id
    }

    pub async fn snapshot(&self) -> CountdownSnapshot {
        let state = self.state.read().await;
        CountdownSnapshot {
            timer_id: self.timer_id.clone(),
            time_left: state.countdown.time_left(),
            state: state.countdown.state(),
            display: state.countdown.breakdown(),
            unsynced: state.unsynced,
            checked_skills: state.checked.iter().copied().collect(),
        }
    }

    /// Begin ticking. Returns `false` when already running or at zero.
    pub async fn start(&self) -> bool {
        let mut ticker = self.ticker.lock().await;

        let (time_left, run) = {
            let mut state = self.state.write().await;
            if !state.countdown.start() {
                return false;
            }
            state.run += 1;
            (state.countdown.time_left(), state.run)
        };

        if let Some(stale) = ticker.take() {
            stale.abort();
        }
        *ticker = Some(self.spawn_ticker(run));
        drop(ticker);

        tracing::debug!("Countdown {} started at {}s", self.timer_id, time_left);
        self.event_manager
            .emit_timer(TimerEvent::started(self.timer_id.clone(), time_left));
        true
    }

    /// Stop ticking and persist the remaining time.
    ///
    /// Returns `Ok(false)` without writing when the countdown was not running.
    pub async fn pause(&self) -> Result<bool> {
        let mut ticker = self.ticker.lock().await;

        let time_left = {
            let mut state = self.state.write().await;
            if !state.countdown.pause() {
                return Ok(false);
            }
            state.run += 1;
            state.countdown.time_left()
        };

        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        drop(ticker);

        tracing::debug!("Countdown {} paused at {}s", self.timer_id, time_left);
        self.event_manager
            .emit_timer(TimerEvent::paused(self.timer_id.clone(), time_left));

        self.checkpoint().await?;
        Ok(true)
    }

    /// Back to the full 20 hours, idle, persisted. Allowed from any state.
    pub async fn reset(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().await;
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        {
            let mut state = self.state.write().await;
            state.run += 1;
            state.countdown.reset();
        }
        drop(ticker);

        tracing::debug!("Countdown {} reset", self.timer_id);
        self.event_manager.emit_timer(TimerEvent::new(
            TimerEventType::Reset,
            self.timer_id.clone(),
        ));

        self.checkpoint().await?;
        Ok(())
    }

    /// Retry a failed checkpoint. Returns `Ok(false)` when nothing was pending.
    pub async fn flush(&self) -> Result<bool> {
        if !self.state.read().await.unsynced {
            return Ok(false);
        }
        self.checkpoint().await?;
        Ok(true)
    }

    /// Take a refreshed remaining time from the collection.
    ///
    /// Ignored while running or while holding an unsynced value, since the
    /// local count is newer than the backend's in both cases.
    pub async fn adopt(&self, time_left: u32) -> bool {
        let mut state = self.state.write().await;
        if state.unsynced || state.countdown.is_running() {
            return false;
        }
        state.countdown.set_time_left(time_left)
    }

    /// Flip the checked mark of one skill in the timer's checklist.
    ///
    /// Returns whether the skill is checked afterwards.
    pub async fn toggle_skill(&self, index: usize) -> Result<bool> {
        let timer = self
            .collection
            .get(&self.timer_id)
            .await
            .ok_or_else(|| EngineError::NotFound(self.timer_id.clone()))?;
        if index >= timer.skill_breakdown.len() {
            return Err(EngineError::SkillOutOfRange {
                timer_id: self.timer_id.clone(),
                index,
            });
        }

        let mut state = self.state.write().await;
        let checked = if state.checked.remove(&index) {
            false
        } else {
            state.checked.insert(index)
        };
        tracing::debug!("Skill {} of timer {} checked: {}", index, self.timer_id, checked);
        Ok(checked)
    }

    /// Forget checked marks past the end of a checklist that got shorter
    pub async fn retain_skills(&self, count: usize) {
        self.state.write().await.checked.retain(|index| *index < count);
    }

    /// Cancel the tick loop without writing anything
    pub async fn shutdown(&self) {
        let mut ticker = self.ticker.lock().await;
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        let mut state = self.state.write().await;
        state.run += 1;
        state.countdown.pause();
    }

    pub async fn is_ticking(&self) -> bool {
        let ticker = self.ticker.lock().await;
        ticker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn checkpoint(&self) -> Result<u32> {
        checkpoint(
            &self.state,
            &self.collection,
            &self.event_manager,
            &self.timer_id,
        )
        .await
    }

    fn spawn_ticker(&self, run: u64) -> JoinHandle<()> {
        let state = self.state.clone();
        let collection = self.collection.clone();
        let event_manager = self.event_manager.clone();
        let timer_id = self.timer_id.clone();
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut tick_interval = interval_at(Instant::now() + period, period);

            loop {
                tick_interval.tick().await;

                let outcome = {
                    let mut state = state.write().await;
                    if state.run != run {
                        break;
                    }
                    state.countdown.tick()
                };

                match outcome {
                    TickOutcome::Skipped => break,
                    TickOutcome::Ticked(time_left) => {
                        event_manager.emit_timer(TimerEvent::tick(timer_id.clone(), time_left));
                    }
                    TickOutcome::Expired => {
                        tracing::info!("Countdown {} reached zero", timer_id);
                        event_manager.emit_timer(TimerEvent::tick(timer_id.clone(), 0));
                        event_manager.emit_timer(TimerEvent::new(
                            TimerEventType::Expired,
                            timer_id.clone(),
                        ));

                        if let Err(e) =
                            checkpoint(&state, &collection, &event_manager, &timer_id).await
                        {
                            tracing::warn!("Checkpoint after expiry of {} failed: {}", timer_id, e);
                        }
                        break;
                    }
                }
            }
        })
    }
}

impl<S: RemoteStore> Drop for CountdownEngine<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

/// Write the engine's current remaining time through the collection
async fn checkpoint<S: RemoteStore>(
    state: &RwLock<EngineState>,
    collection: &TimerCollection<S>,
    event_manager: &EventManager,
    timer_id: &str,
) -> Result<u32> {
    let time_left = state.read().await.countdown.time_left();

    let Some(mut timer) = collection.get(timer_id).await else {
        tracing::warn!("Timer {} is no longer in the collection, skipping checkpoint", timer_id);
        return Err(EngineError::NotFound(timer_id.to_string()));
    };
    timer.time_left = time_left;

    match collection.update(timer).await {
        Ok(_) => {
            {
                let mut state = state.write().await;
                if state.countdown.time_left() == time_left {
                    state.unsynced = false;
                }
            }
            tracing::debug!("Checkpointed timer {} at {}s", timer_id, time_left);
            event_manager.emit_timer(TimerEvent::checkpointed(timer_id.to_string(), time_left));
            Ok(time_left)
        }
        Err(e) => {
            state.write().await.unsynced = true;
            tracing::error!("Error updating timer {}: {}", timer_id, e);
            event_manager.emit_timer(TimerEvent::checkpoint_failed(
                timer_id.to_string(),
                e.to_string(),
            ));
            Err(e.into())
        }
    }
}
