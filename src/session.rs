//! Conversation sessions: bounded history, idle expiry, per-session locking.
//!
//! Sessions live in a map of `Arc<tokio::sync::Mutex<SessionState>>`. The
//! outer `std::sync::Mutex` only guards map membership and is never held
//! across an `.await`; the inner async mutex serialises turns of the same
//! session while different sessions proceed in parallel.
//!
//! Expiry is lazy: a session idle for longer than the timeout is renewed
//! (history cleared, same id) the next time it is acquired. [`sweep`]
//! reclaims memory for sessions nobody comes back to; it skips sessions
//! whose lock is held, since those are in use.
//!
//! [`sweep`]: SessionManager::sweep

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use rag_support_core::models::{Message, Role};
use rag_support_core::RagError;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// Messages kept per session; a turn adds two.
    pub max_history: usize,
    /// Idle time after which a session is treated as gone.
    pub timeout: Duration,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            max_history: 20,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. For tests and simulations.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::milliseconds(by.as_millis() as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How [`SessionManager::acquire`] resolved the requested id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No id was given; a new session was created.
    Created,
    /// A live session was found.
    Resumed,
    /// The id was unknown or had expired; it now names an empty session.
    Renewed,
}

#[derive(Debug)]
struct SessionState {
    id: String,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    history: VecDeque<Message>,
    turns: u64,
    /// Set once the entry has left the map; holders of a stale `Arc` retry.
    evicted: bool,
}

impl SessionState {
    fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_active_at: now,
            history: VecDeque::new(),
            turns: 0,
            evicted: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        idle(self.last_active_at, now) > timeout
    }

    fn renew(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.last_active_at = now;
        self.history.clear();
        self.turns = 0;
    }
}

fn idle(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Read-only copy of a session, for callers that only inspect it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub history: Vec<Message>,
    pub turns: u64,
}

type SessionSlot = Arc<AsyncMutex<SessionState>>;

pub struct SessionManager {
    params: SessionParams,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionManager {
    pub fn new(params: SessionParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            params,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty session and return its id.
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let state = SessionState::new(id.clone(), self.clock.now());
        self.map()
            .insert(id.clone(), Arc::new(AsyncMutex::new(state)));
        tracing::debug!(session_id = %id, "session created");
        id
    }

    /// Lock the session for one turn.
    ///
    /// With `None` a new session is created. A known, live id is resumed. An
    /// unknown or expired id is (re)started empty under the same id. The
    /// returned guard holds the session's lock until dropped.
    ///
    /// Acquiring does not count as activity; only a recorded turn extends
    /// the idle window.
    pub async fn acquire(&self, session_id: Option<&str>) -> Result<SessionGuard, RagError> {
        let requested = match session_id {
            Some(id) => {
                validate_session_id(id)?;
                Some(id.to_string())
            }
            None => None,
        };

        loop {
            let (id, slot, mut status) = match &requested {
                None => {
                    let id = self.create();
                    let slot = self.map().get(&id).cloned();
                    match slot {
                        Some(slot) => (id, slot, SessionStatus::Created),
                        // swept between create and lookup; try again
                        None => continue,
                    }
                }
                Some(id) => {
                    let mut map = self.map();
                    match map.get(id) {
                        Some(slot) => (id.clone(), slot.clone(), SessionStatus::Resumed),
                        None => {
                            let slot = Arc::new(AsyncMutex::new(SessionState::new(
                                id.clone(),
                                self.clock.now(),
                            )));
                            map.insert(id.clone(), slot.clone());
                            (id.clone(), slot, SessionStatus::Renewed)
                        }
                    }
                }
            };

            let mut state = slot.lock_owned().await;
            if state.evicted {
                continue;
            }

            let now = self.clock.now();
            if status == SessionStatus::Resumed && state.is_expired(now, self.params.timeout) {
                tracing::info!(session_id = %id, "session expired; starting fresh");
                state.renew(now);
                status = SessionStatus::Renewed;
            }

            return Ok(SessionGuard {
                state,
                status,
                max_history: self.params.max_history,
                clock: self.clock.clone(),
            });
        }
    }

    /// Copy of a live session's state.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, RagError> {
        let slot = self.slot(session_id)?;
        let state = slot.lock().await;
        if state.evicted || state.is_expired(self.clock.now(), self.params.timeout) {
            return Err(RagError::SessionNotFound(session_id.to_string()));
        }
        Ok(SessionSnapshot {
            id: state.id.clone(),
            created_at: state.created_at,
            last_active_at: state.last_active_at,
            history: state.history.iter().cloned().collect(),
            turns: state.turns,
        })
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>, RagError> {
        Ok(self.snapshot(session_id).await?.history)
    }

    /// End a session. Waits for an in-flight turn on it to finish.
    pub async fn delete(&self, session_id: &str) -> Result<(), RagError> {
        let slot = self
            .map()
            .remove(session_id)
            .ok_or_else(|| RagError::SessionNotFound(session_id.to_string()))?;
        slot.lock().await.evicted = true;
        tracing::debug!(session_id, "session deleted");
        Ok(())
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, slot| match slot.try_lock() {
            Ok(mut state) => {
                if state.is_expired(now, self.params.timeout) {
                    state.evicted = true;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });
        let removed = before - map.len();
        if removed > 0 {
            tracing::info!(removed, remaining = map.len(), "expired sessions swept");
        }
        removed
    }

    /// Time until the session expires if left idle.
    ///
    /// A session in the middle of a turn reports the full timeout.
    pub fn time_remaining(&self, session_id: &str) -> Result<Duration, RagError> {
        let slot = self.slot(session_id)?;
        let state = match slot.try_lock() {
            Ok(state) => state,
            Err(_) => return Ok(self.params.timeout),
        };
        let elapsed = idle(state.last_active_at, self.clock.now());
        if state.evicted || elapsed > self.params.timeout {
            return Err(RagError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.params.timeout - elapsed)
    }

    /// Number of live sessions, after sweeping expired ones.
    pub fn active_sessions(&self) -> usize {
        self.sweep();
        self.map().len()
    }

    /// Sweep every `interval` until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(manager) => {
                        manager.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    fn slot(&self, session_id: &str) -> Result<SessionSlot, RagError> {
        self.map()
            .get(session_id)
            .cloned()
            .ok_or_else(|| RagError::SessionNotFound(session_id.to_string()))
    }
}

fn validate_session_id(id: &str) -> Result<(), RagError> {
    if id.is_empty()
        || id.len() > MAX_SESSION_ID_LEN
        || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RagError::validation(
            "session id must be 1-128 characters of [A-Za-z0-9_-]",
        ));
    }
    Ok(())
}

/// Exclusive access to one session for the duration of a turn.
///
/// Dropping the guard releases the session, whichever way the turn ends.
pub struct SessionGuard {
    state: OwnedMutexGuard<SessionState>,
    status: SessionStatus,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.created_at
    }

    pub fn history(&self) -> Vec<Message> {
        self.state.history.iter().cloned().collect()
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.state.history.len().saturating_sub(n);
        self.state.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    /// Append a question/answer pair, evicting the oldest messages past the
    /// bound, and refresh the activity timestamp.
    pub fn record_turn(&mut self, question: &str, answer: &str) {
        let now = self.clock.now();
        let max_history = self.max_history;
        let state = &mut *self.state;
        state.history.push_back(Message::new(Role::User, question, now));
        state.history.push_back(Message::new(Role::Assistant, answer, now));
        while state.history.len() > max_history {
            state.history.pop_front();
        }
        state.turns += 1;
        state.last_active_at = now;
    }
}
