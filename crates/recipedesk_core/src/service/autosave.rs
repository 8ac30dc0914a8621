//! Debounced mutation bus driving preview, naming and autosave work.
//!
//! # Responsibility
//! - Fan one document mutation out to independent debounced channels.
//! - Report which channels are due once their input has quiesced.
//!
//! # Invariants
//! - A burst of triggers inside one window yields one firing per channel.
//! - Firing a channel drains the tab ids collected since its last firing.
//! - Nothing here blocks; the session drives time through `due(now)`.

use crate::model::tab::TabId;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for the session event loop.
pub trait Clock {
    fn now(&self) -> Instant;
    /// Wall-clock time in epoch milliseconds, for saved timestamps.
    fn epoch_millis(&self) -> i64;
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Clock advanced explicitly by the caller.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    epoch_origin_ms: i64,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            epoch_origin_ms: 1_700_000_000_000,
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn epoch_millis(&self) -> i64 {
        self.epoch_origin_ms + self.offset.get().as_millis() as i64
    }
}

/// Trailing-edge debouncer: fires once input has been quiet for `window`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Restarts the quiet window from `now`.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns `true` exactly once per quiesced burst.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Concern subscribed to document mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// Recompute the read-only preview of the active document.
    Preview,
    /// Re-derive attachment keys from document context.
    Resolver,
    /// Durable save of dirty tabs plus the session snapshot.
    Autosave,
}

#[derive(Debug)]
struct Subscriber {
    channel: Channel,
    debouncer: Debouncer,
    pending: BTreeSet<TabId>,
}

/// Channels that fired in one poll, in subscription order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueChannel {
    pub channel: Channel,
    pub tabs: Vec<TabId>,
}

/// Single mutation-event bus with one debounced subscriber per concern.
#[derive(Debug)]
pub struct MutationBus {
    subscribers: Vec<Subscriber>,
}

impl MutationBus {
    /// Builds the bus with preview, resolver and autosave windows, fired in
    /// that order when several are due together.
    pub fn new(preview: Duration, resolver: Duration, autosave: Duration) -> Self {
        let subscriber = |channel, window| Subscriber {
            channel,
            debouncer: Debouncer::new(window),
            pending: BTreeSet::new(),
        };
        Self {
            subscribers: vec![
                subscriber(Channel::Preview, preview),
                subscriber(Channel::Resolver, resolver),
                subscriber(Channel::Autosave, autosave),
            ],
        }
    }

    /// Notifies every channel that `tab_id` changed.
    pub fn publish(&mut self, tab_id: TabId, now: Instant) {
        for subscriber in &mut self.subscribers {
            subscriber.pending.insert(tab_id);
            subscriber.debouncer.trigger(now);
        }
    }

    /// Notifies one channel only.
    pub fn trigger(&mut self, channel: Channel, tab_id: TabId, now: Instant) {
        if let Some(subscriber) = self.subscriber_mut(channel) {
            subscriber.pending.insert(tab_id);
            subscriber.debouncer.trigger(now);
        }
    }

    /// Drops `tab_id` from one channel; the channel stops when nothing is left.
    pub fn settle(&mut self, channel: Channel, tab_id: TabId) {
        if let Some(subscriber) = self.subscriber_mut(channel) {
            subscriber.pending.remove(&tab_id);
            if subscriber.pending.is_empty() {
                subscriber.debouncer.cancel();
            }
        }
    }

    /// Drops `tab_id` from every channel.
    pub fn forget(&mut self, tab_id: TabId) {
        for channel in [Channel::Preview, Channel::Resolver, Channel::Autosave] {
            self.settle(channel, tab_id);
        }
    }

    pub fn is_pending(&self, channel: Channel) -> bool {
        self.subscribers
            .iter()
            .any(|subscriber| subscriber.channel == channel && subscriber.debouncer.is_pending())
    }

    /// Channels whose window elapsed by `now`.
    pub fn due(&mut self, now: Instant) -> Vec<DueChannel> {
        self.subscribers
            .iter_mut()
            .filter_map(|subscriber| {
                if !subscriber.debouncer.poll(now) {
                    return None;
                }
                Some(DueChannel {
                    channel: subscriber.channel,
                    tabs: std::mem::take(&mut subscriber.pending).into_iter().collect(),
                })
            })
            .collect()
    }

    /// Fires every pending channel regardless of time.
    pub fn flush(&mut self) -> Vec<DueChannel> {
        self.subscribers
            .iter_mut()
            .filter(|subscriber| subscriber.debouncer.is_pending())
            .map(|subscriber| {
                subscriber.debouncer.cancel();
                DueChannel {
                    channel: subscriber.channel,
                    tabs: std::mem::take(&mut subscriber.pending).into_iter().collect(),
                }
            })
            .collect()
    }

    fn subscriber_mut(&mut self, channel: Channel) -> Option<&mut Subscriber> {
        self.subscribers
            .iter_mut()
            .find(|subscriber| subscriber.channel == channel)
    }
}
