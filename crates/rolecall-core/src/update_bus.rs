//! Cursor-based long-poll notification bus
//!
//! Each user has a monotonically increasing cursor, the latest payload and
//! reason, and the list of long-poll requests currently waiting for a change.
//! State lives only as long as the process; after a restart clients
//! resynchronise by cursor comparison.
//!
//! A waiter is resolved exactly once. `notify` and the poll timeout both race
//! to move it out of `Pending` with one compare-and-set; whoever loses does
//! nothing. Dropping the poll future (client disconnect) moves it to
//! `Cancelled` and removes it from the registry.

use crate::config::LongPollConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering as CursorOrdering;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Reason reported when the client's cursor can't be answered incrementally
pub const RESYNC_REASON: &str = "resync";

/// Result of a long-poll
#[derive(Debug)]
pub struct UpdateEvent<P> {
    pub cursor: u64,
    pub changed: bool,
    pub reason: Option<String>,
    pub payload: Option<Arc<P>>,
}

impl<P> UpdateEvent<P> {
    fn unchanged(cursor: u64) -> Self {
        Self {
            cursor,
            changed: false,
            reason: None,
            payload: None,
        }
    }

    fn changed(cursor: u64, reason: Option<String>, payload: Option<Arc<P>>) -> Self {
        Self {
            cursor,
            changed: true,
            reason,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaiterState {
    Pending = 0,
    Resolved = 1,
    Cancelled = 2,
}

impl WaiterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WaiterState::Pending,
            1 => WaiterState::Resolved,
            _ => WaiterState::Cancelled,
        }
    }
}

struct Waiter<P> {
    id: u64,
    since: u64,
    state: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<UpdateEvent<P>>>>,
}

impl<P> Waiter<P> {
    fn new(id: u64, since: u64, tx: oneshot::Sender<UpdateEvent<P>>) -> Self {
        Self {
            id,
            since,
            state: AtomicU8::new(WaiterState::Pending as u8),
            tx: Mutex::new(Some(tx)),
        }
    }

    fn state(&self) -> WaiterState {
        WaiterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Leave `Pending`; false if someone else already did
    fn transition(&self, to: WaiterState) -> bool {
        self.state
            .compare_exchange(
                WaiterState::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Resolve with `event` if still pending
    fn deliver(&self, event: UpdateEvent<P>) -> bool {
        if !self.transition(WaiterState::Resolved) {
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            // receiver gone means the poll future is being dropped
            let _ = tx.send(event);
        }
        true
    }
}

struct UserChannel<P> {
    cursor: u64,
    last_reason: Option<String>,
    last_payload: Option<Arc<P>>,
    waiters: Vec<Arc<Waiter<P>>>,
}

impl<P> Default for UserChannel<P> {
    fn default() -> Self {
        Self {
            cursor: 0,
            last_reason: None,
            last_payload: None,
            waiters: Vec::new(),
        }
    }
}

impl<P> UserChannel<P> {
    /// Answer for a cursor that differs from the current one
    fn catch_up(&self, since: u64) -> UpdateEvent<P> {
        let reason = if since + 1 == self.cursor {
            self.last_reason.clone()
        } else {
            Some(RESYNC_REASON.to_string())
        };
        UpdateEvent::changed(self.cursor, reason, self.last_payload.clone())
    }
}

/// Removes a waiter from the registry however the poll ends
struct WaiterGuard<'a, P> {
    bus: &'a UpdateBus<P>,
    user_id: &'a str,
    waiter: Arc<Waiter<P>>,
}

impl<P> Drop for WaiterGuard<'_, P> {
    fn drop(&mut self) {
        if self.waiter.transition(WaiterState::Cancelled) {
            trace!(user_id = self.user_id, waiter = self.waiter.id, "Long-poll cancelled");
        } else {
            trace!(
                user_id = self.user_id,
                waiter = self.waiter.id,
                state = ?self.waiter.state(),
                "Long-poll finished"
            );
        }
        if let Some(mut channel) = self.bus.channels.get_mut(self.user_id) {
            channel.waiters.retain(|w| w.id != self.waiter.id);
        }
    }
}

/// Registry of per-user cursors and pending long-polls.
///
/// Constructed once at startup and shared by `Arc`.
pub struct UpdateBus<P> {
    channels: DashMap<String, UserChannel<P>>,
    next_waiter_id: AtomicU64,
    config: LongPollConfig,
}

impl<P> UpdateBus<P> {
    pub fn new(config: LongPollConfig) -> Self {
        Self {
            channels: DashMap::new(),
            next_waiter_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &LongPollConfig {
        &self.config
    }

    /// Requested timeout clamped into the configured window
    pub fn clamp_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.config.default_timeout_ms)
            .clamp(self.config.min_timeout_ms, self.config.max_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Current cursor for a user (0 if nothing changed yet)
    pub fn cursor(&self, user_id: &str) -> u64 {
        self.channels.get(user_id).map(|c| c.cursor).unwrap_or(0)
    }

    /// Cached payload for the current cursor, if any
    pub fn latest_payload(&self, user_id: &str) -> Option<Arc<P>> {
        self.channels
            .get(user_id)
            .and_then(|c| c.last_payload.clone())
    }

    /// Pending long-polls for one user
    pub fn waiter_count(&self, user_id: &str) -> usize {
        self.channels
            .get(user_id)
            .map(|c| c.waiters.len())
            .unwrap_or(0)
    }

    /// Pending long-polls across all users
    pub fn total_waiters(&self) -> usize {
        self.channels.iter().map(|c| c.waiters.len()).sum()
    }

    /// Record a change for `user_id` and wake its waiters.
    ///
    /// Returns the new cursor. Waiters are resolved after the registry entry
    /// is released.
    pub fn notify(&self, user_id: &str, reason: impl Into<String>, payload: P) -> u64 {
        let reason = reason.into();
        let payload = Arc::new(payload);

        let (cursor, ready) = {
            let mut channel = self.channels.entry(user_id.to_string()).or_default();
            channel.cursor += 1;
            channel.last_reason = Some(reason.clone());
            channel.last_payload = Some(Arc::clone(&payload));

            let cursor = channel.cursor;
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut channel.waiters)
                .into_iter()
                .partition(|w| w.since < cursor);
            channel.waiters = waiting;
            (cursor, ready)
        };

        let delivered = ready
            .iter()
            .filter(|w| {
                w.deliver(UpdateEvent::changed(
                    cursor,
                    Some(reason.clone()),
                    Some(Arc::clone(&payload)),
                ))
            })
            .count();

        debug!(user_id, cursor, reason = %reason, delivered, "Update published");
        cursor
    }

    /// Long-poll for changes after `since`.
    ///
    /// Returns immediately when the client is behind (or ahead, after a
    /// restart); otherwise waits for the next `notify` or for `timeout`.
    pub async fn poll(&self, user_id: &str, since: u64, timeout: Duration) -> UpdateEvent<P> {
        let (waiter, mut rx) = {
            let mut channel = self.channels.entry(user_id.to_string()).or_default();
            match since.cmp(&channel.cursor) {
                CursorOrdering::Less => return channel.catch_up(since),
                CursorOrdering::Greater => {
                    debug!(user_id, since, cursor = channel.cursor, "Client cursor ahead, resync");
                    return UpdateEvent::changed(
                        channel.cursor,
                        Some(RESYNC_REASON.to_string()),
                        channel.last_payload.clone(),
                    );
                }
                CursorOrdering::Equal => {}
            }

            let (tx, rx) = oneshot::channel();
            let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            let waiter = Arc::new(Waiter::new(id, since, tx));
            channel.waiters.push(Arc::clone(&waiter));
            (waiter, rx)
        };

        let guard = WaiterGuard {
            bus: self,
            user_id,
            waiter,
        };

        tokio::select! {
            received = &mut rx => received.unwrap_or_else(|_| UpdateEvent::unchanged(since)),
            _ = tokio::time::sleep(timeout) => {
                if guard.waiter.transition(WaiterState::Resolved) {
                    trace!(user_id, since, "Long-poll timed out");
                    UpdateEvent::unchanged(since)
                } else {
                    // notify claimed the waiter first; its event is on the way
                    rx.await.unwrap_or_else(|_| UpdateEvent::unchanged(since))
                }
            }
        }
    }
}

impl<P> Default for UpdateBus<P> {
    fn default() -> Self {
        Self::new(LongPollConfig::default())
    }
}
