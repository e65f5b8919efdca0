//! The leader elector state machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hivesync_core::TimerService;
use hivesync_core::config::ElectionConfig;
use hivesync_store::{DynSharedStore, StoreError};

/// Name of the renewal callback on the elector's own timer service.
const RENEW_TIMER: &str = "hivesync_election_renew";

/// Buffer size for the election event channel.
const EVENT_CAPACITY: usize = 64;

/// Events emitted by an elector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    /// This instance acquired the lock and is now the leader.
    Elected,
    /// This instance lost or released the lock.
    Revoked,
    /// A store operation failed; the elector carries on.
    Error(String),
}

/// Per-project elector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    Idle,
    Candidate,
    Leader,
}

/// Leader election lock for one election project.
///
/// The lock key is derived from `(app_name, project)`; the holder value is a
/// random id unique to this elector instance. Electors on every replica race
/// the same key; the store's conditional set is the sole tie-break, and
/// losers retry on a fixed delay.
///
/// # Example
///
/// ```ignore
/// let elector = LeaderElector::new(store, &config.election, "nightly-reports");
/// let mut events = elector.subscribe();
/// elector.elect().await;
///
/// while let Ok(event) = events.recv().await {
///     if event == ElectionEvent::Elected {
///         // run singleton work until Revoked
///     }
/// }
/// ```
pub struct LeaderElector {
    store: DynSharedStore,
    key: String,
    instance_id: String,
    ttl: Duration,
    wait: Duration,
    state: Mutex<ElectorState>,
    events: broadcast::Sender<ElectionEvent>,
    renew_timers: TimerService,
    retry: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    pub fn new(store: DynSharedStore, config: &ElectionConfig, project: &str) -> Arc<Self> {
        let digest = Sha256::digest(format!("{}:{}", config.app_name, project));
        let key = format!("{}:{}", config.key_prefix, hex::encode(digest));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            store,
            key,
            instance_id: Uuid::new_v4().to_string(),
            ttl: config.ttl(),
            wait: config.wait(),
            state: Mutex::new(ElectorState::Idle),
            events,
            renew_timers: TimerService::new(),
            retry: Mutex::new(None),
        })
    }

    /// This elector's random holder id.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The derived lock key.
    pub fn lock_key(&self) -> &str {
        &self.key
    }

    /// Current state.
    pub fn state(&self) -> ElectorState {
        self.state.lock().map(|s| *s).unwrap_or(ElectorState::Idle)
    }

    /// Subscribe to election events. Only events sent after subscription are
    /// received.
    pub fn subscribe(&self) -> broadcast::Receiver<ElectionEvent> {
        self.events.subscribe()
    }

    /// Attempt to take the lock with one atomic conditional set.
    ///
    /// Winning arms the renewal timer at `ttl / 2`. Losing (or a store
    /// failure, which is reported and swallowed) schedules a retry after the
    /// fixed `wait` delay.
    pub async fn elect(self: &Arc<Self>) {
        if self.state() == ElectorState::Leader {
            return;
        }

        match self
            .store
            .set_if_absent(&self.key, &self.instance_id, self.ttl)
            .await
        {
            Ok(true) => {
                info!(key = %self.key, instance = %self.instance_id, "elected leader");
                self.set_state(ElectorState::Leader);
                self.emit(ElectionEvent::Elected);
                self.arm_renewal();
            }
            Ok(false) => {
                debug!(key = %self.key, "lock held elsewhere, standing by");
                self.set_state(ElectorState::Candidate);
                self.schedule_retry();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "election attempt failed");
                self.emit(ElectionEvent::Error(e.to_string()));
                self.set_state(ElectorState::Candidate);
                self.schedule_retry();
            }
        }
    }

    /// Whether the stored holder id is this instance's id.
    pub async fn is_leader(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(&self.key).await?.as_deref() == Some(self.instance_id.as_str()))
    }

    /// Release the lock if held, cancel all timers, return to Idle.
    pub async fn stop(self: &Arc<Self>) {
        match self.is_leader().await {
            Ok(true) => {
                if let Err(e) = self.store.delete(&self.key).await {
                    warn!(key = %self.key, error = %e, "failed to release leader lock");
                    self.emit(ElectionEvent::Error(e.to_string()));
                } else {
                    info!(key = %self.key, "released leader lock");
                    self.emit(ElectionEvent::Revoked);
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(key = %self.key, error = %e, "holder check failed during stop");
                self.emit(ElectionEvent::Error(e.to_string()));
            }
        }

        self.renew_timers.stop();
        if let Ok(mut slot) = self.retry.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.set_state(ElectorState::Idle);
    }

    /// One renewal tick.
    ///
    /// Still the holder: extend the TTL. No longer the holder: stand down
    /// and re-enter the candidate loop. A bare transport failure is reported
    /// but forces no transition; the next tick's holder check decides.
    async fn renew(self: &Arc<Self>) {
        if self.state() != ElectorState::Leader {
            return;
        }

        match self.is_leader().await {
            Ok(true) => {
                if let Err(e) = self.store.expire(&self.key, self.ttl).await {
                    warn!(key = %self.key, error = %e, "lock renewal failed");
                    self.emit(ElectionEvent::Error(e.to_string()));
                } else {
                    debug!(key = %self.key, "lock renewed");
                }
            }
            Ok(false) => {
                info!(key = %self.key, "lock lost, standing down");
                self.renew_timers.off_timer(RENEW_TIMER);
                self.emit(ElectionEvent::Revoked);
                self.set_state(ElectorState::Candidate);
                self.schedule_retry();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "holder check failed");
                self.emit(ElectionEvent::Error(e.to_string()));
            }
        }
    }

    fn arm_renewal(self: &Arc<Self>) {
        let elector = Arc::clone(self);
        self.renew_timers
            .on_timer(RENEW_TIMER, self.ttl / 2, move || {
                let elector = Arc::clone(&elector);
                async move {
                    elector.renew().await;
                }
            });
    }

    fn schedule_retry(self: &Arc<Self>) {
        let elector = Arc::clone(self);
        let wait = self.wait;
        let task = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            debug!(key = %elector.key, "retrying election");
            elector.elect().await;
        });

        if let Ok(mut slot) = self.retry.lock() {
            if let Some(old) = slot.replace(task) {
                old.abort();
            }
        }
    }

    fn set_state(&self, next: ElectorState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn emit(&self, event: ElectionEvent) {
        // A send error only means no live subscribers.
        let _ = self.events.send(event);
    }
}
