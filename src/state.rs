//! Connection lifecycle and channel/join state.
//!
//! Everything here is sans-IO: the types consume observed facts (a join
//! was requested, a confirmation arrived, a deadline passed) and hand back
//! wire lines or expired names. Timers and sockets live in the driver, so
//! all of this is unit-testable with a plain [`Instant`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::MAX_JOIN_LINE_LEN;
use crate::message::Message;

/// Current state of the connection.
///
/// Channel collections are cleared on every transition into
/// `Disconnected` or `Connecting`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport is being (re)established.
    Connecting,
    /// Transport is up; credentials sent, no 004 yet.
    Authenticating,
    /// 004 received; joins and sends are allowed.
    Ready,
}

/// Channel-level settings carried by ROOMSTATE.
///
/// Every field is optional: a partial ROOMSTATE toggles a single setting,
/// while a full one (the join confirmation) populates the lot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoomState {
    pub broadcaster_lang: Option<String>,
    pub emote_only: Option<bool>,
    /// Minimum follow age in minutes; `-1` means disabled.
    pub followers_only: Option<i64>,
    pub r9k: Option<bool>,
    pub rituals: Option<bool>,
    pub room_id: Option<String>,
    /// Slow-mode delay in seconds.
    pub slow: Option<u64>,
    pub subs_only: Option<bool>,
}

impl RoomState {
    pub(crate) fn from_message(msg: &Message) -> Self {
        Self {
            broadcaster_lang: msg
                .tag("broadcaster-lang")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            emote_only: tag_bool(msg, "emote-only"),
            followers_only: msg.tag("followers-only").and_then(|v| v.parse().ok()),
            r9k: tag_bool(msg, "r9k"),
            rituals: tag_bool(msg, "rituals"),
            room_id: msg.tag("room-id").map(str::to_string),
            slow: msg.tag("slow").and_then(|v| v.parse().ok()),
            subs_only: tag_bool(msg, "subs-only"),
        }
    }
}

fn tag_bool(msg: &Message, key: &str) -> Option<bool> {
    msg.tag(key).and_then(|v| match v {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    })
}

/// A channel we are in (or optimistically recorded as joining).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinedChannel {
    /// Lower-cased name, no `#`.
    pub name: String,
    /// Attached once a full ROOMSTATE has been observed.
    pub room_state: Option<RoomState>,
}

impl JoinedChannel {
    fn new(name: String) -> Self {
        Self {
            name,
            room_state: None,
        }
    }
}

/// A join that went out on the wire and awaits its confirming ROOMSTATE.
#[derive(Clone, Debug)]
pub struct PendingJoin {
    pub name: String,
    /// When the JOIN was issued; refreshed if the channel is re-drained.
    pub since: Instant,
}

/// Joined channels, the pending-join queue, and join deadlines.
///
/// Names are normalized (lower-cased, `#` stripped) at the boundary so
/// every collection speaks one casing.
#[derive(Debug, Default)]
pub struct ChannelRoster {
    joined: HashMap<String, JoinedChannel>,
    pending: Vec<PendingJoin>,
    queue: VecDeque<String>,
}

impl ChannelRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a join request. Already-joined channels are skipped unless
    /// `force` is set; queued and in-flight duplicates are always skipped.
    /// Returns whether the request was queued.
    pub fn request(&mut self, channel: &str, force: bool) -> bool {
        let name = normalize(channel);
        if name.is_empty() {
            return false;
        }
        if !force && self.joined.contains_key(&name) {
            return false;
        }
        if self.queue.contains(&name) || self.pending.iter().any(|p| p.name == name) {
            return false;
        }
        self.queue.push_back(name);
        true
    }

    /// Drain the queue into outbound `JOIN` lines.
    ///
    /// Each line packs as many channels as fit under
    /// [`MAX_JOIN_LINE_LEN`]; draining repeats until the queue is empty,
    /// so every queued channel lands in exactly one line. Drained channels
    /// are recorded as joined (optimistically) and as pending with their
    /// deadline started at `now`.
    pub fn drain(&mut self, now: Instant) -> Vec<String> {
        let mut lines = Vec::new();
        while !self.queue.is_empty() {
            let mut line = String::from("JOIN ");
            let mut first = true;
            while let Some(next) = self.queue.front() {
                let extra = 1 + next.len() + usize::from(!first);
                if line.len() + extra > MAX_JOIN_LINE_LEN {
                    break;
                }
                let name = self.queue.pop_front().expect("front was Some");
                if !first {
                    line.push(',');
                }
                line.push('#');
                line.push_str(&name);
                first = false;
                self.record_drained(name, now);
            }
            if first {
                // A name that alone exceeds the limit still goes out on
                // its own line; the server rejects it and the join times
                // out like any other failure.
                let name = self.queue.pop_front().expect("queue non-empty");
                line.push('#');
                line.push_str(&name);
                self.record_drained(name, now);
            }
            lines.push(line);
        }
        lines
    }

    fn record_drained(&mut self, name: String, now: Instant) {
        self.joined
            .entry(name.clone())
            .or_insert_with(|| JoinedChannel::new(name.clone()));
        match self.pending.iter_mut().find(|p| p.name == name) {
            Some(p) => p.since = now,
            None => self.pending.push(PendingJoin { name, since: now }),
        }
    }

    /// Mark a join as confirmed, removing its pending entry. Returns
    /// whether the channel was actually pending.
    pub fn confirm(&mut self, channel: &str) -> bool {
        let name = normalize(channel);
        let before = self.pending.len();
        self.pending.retain(|p| p.name != name);
        self.pending.len() != before
    }

    /// Attach observed room state to a joined channel.
    pub fn attach_room_state(&mut self, channel: &str, state: RoomState) {
        if let Some(joined) = self.joined.get_mut(&normalize(channel)) {
            joined.room_state = Some(state);
        }
    }

    /// Remove a channel from every collection (part, suspension, failure).
    /// Returns whether it was known at all.
    pub fn remove(&mut self, channel: &str) -> bool {
        let name = normalize(channel);
        let was_pending = self.pending.iter().any(|p| p.name == name);
        let was_queued = self.queue.contains(&name);
        self.pending.retain(|p| p.name != name);
        self.queue.retain(|c| c != &name);
        self.joined.remove(&name).is_some() || was_pending || was_queued
    }

    /// Remove and return every pending join whose deadline has passed.
    /// Expired channels are rolled back out of the joined set too.
    pub fn sweep_expired(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        self.pending.retain(|p| {
            if now.duration_since(p.since) >= timeout {
                expired.push(p.name.clone());
                false
            } else {
                true
            }
        });
        for name in &expired {
            self.joined.remove(name);
        }
        expired
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        self.joined.contains_key(&normalize(channel))
    }

    pub fn joined_channels(&self) -> impl Iterator<Item = &JoinedChannel> {
        self.joined.values()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Bulk clear on disconnect.
    ///
    /// Joined channels and in-flight joins are gone with the connection,
    /// but their names move back into the request queue: the drain after
    /// the next authentication re-joins them. Joins requested while
    /// offline sit in the queue already and survive untouched.
    pub fn reset(&mut self) {
        let mut rejoin: Vec<String> = self.joined.keys().cloned().collect();
        rejoin.sort();
        self.joined.clear();
        self.pending.clear();
        for name in rejoin.into_iter().rev() {
            if !self.queue.contains(&name) {
                self.queue.push_front(name);
            }
        }
    }
}

pub(crate) fn normalize(channel: &str) -> String {
    channel.trim_start_matches('#').to_lowercase()
}
