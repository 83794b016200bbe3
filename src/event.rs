//! Typed domain events emitted by the protocol engine.
//!
//! Every dispatch branch surfaces as a variant of [`ServerEvent`] with a
//! shallow, tags-derived payload. The set is closed: consumers match on
//! the enum, and anything the engine has no mapping for arrives as
//! [`ServerEvent::Unaccounted`] instead of being invented or dropped.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::message::Message;
use crate::state::RoomState;

/// A chat message received in a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChatMessage {
    pub channel: String,
    /// Login name, taken from the prefix.
    pub sender: String,
    /// Display name, when the user set one.
    pub display_name: Option<String>,
    pub text: String,
    /// Unique message id, used for deletion notices.
    pub id: Option<String>,
    pub color: Option<String>,
    /// Raw badge list, e.g. `moderator/1,subscriber/12`.
    pub badges: Option<String>,
    pub bits: Option<u64>,
    pub is_moderator: bool,
    pub is_subscriber: bool,
    /// Server-side send time from the `tmi-sent-ts` tag.
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub(crate) fn from_message(msg: &Message) -> Self {
        Self {
            channel: msg.channel().to_string(),
            sender: msg.user().to_string(),
            display_name: non_empty_tag(msg, "display-name"),
            text: msg.trailing().to_string(),
            id: non_empty_tag(msg, "id"),
            color: non_empty_tag(msg, "color"),
            badges: non_empty_tag(msg, "badges"),
            bits: msg.tag("bits").and_then(|b| b.parse().ok()),
            is_moderator: msg.tag_flag("mod"),
            is_subscriber: msg.tag_flag("subscriber"),
            sent_at: msg.tag("tmi-sent-ts").and_then(parse_timestamp),
        }
    }
}

/// Our own state within a channel, from USERSTATE.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserState {
    pub channel: String,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub badges: Option<String>,
    pub is_moderator: bool,
    pub is_subscriber: bool,
}

impl UserState {
    pub(crate) fn from_message(msg: &Message) -> Self {
        Self {
            channel: msg.channel().to_string(),
            display_name: non_empty_tag(msg, "display-name"),
            color: non_empty_tag(msg, "color"),
            badges: non_empty_tag(msg, "badges"),
            is_moderator: msg.tag_flag("mod"),
            is_subscriber: msg.tag_flag("subscriber"),
        }
    }
}

/// Common projection of a USERNOTICE announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserNotice {
    pub channel: String,
    /// Login of the originating user. Absent for anonymous events.
    pub login: Option<String>,
    /// Server-rendered description, from the `system-msg` tag.
    pub system_message: Option<String>,
    /// Message the user attached, when the notice carried one.
    pub text: Option<String>,
    /// The raw `msg-id`, kept so callers can reach sub-cases this crate
    /// does not model.
    pub msg_id: String,
}

impl UserNotice {
    pub(crate) fn from_message(msg: &Message) -> Self {
        Self {
            channel: msg.channel().to_string(),
            login: non_empty_tag(msg, "login"),
            system_message: non_empty_tag(msg, "system-msg"),
            text: if msg.params.len() >= 2 {
                Some(msg.trailing().to_string())
            } else {
                None
            },
            msg_id: msg.tag("msg-id").unwrap_or_default().to_string(),
        }
    }
}

/// A direct message.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Whisper {
    pub sender: String,
    pub display_name: Option<String>,
    pub text: String,
}

impl Whisper {
    pub(crate) fn from_message(msg: &Message) -> Self {
        Self {
            sender: msg.user().to_string(),
            display_name: non_empty_tag(msg, "display-name"),
            text: msg.trailing().to_string(),
        }
    }
}

/// Why a requested join did not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JoinFailureReason {
    /// No confirming ROOMSTATE arrived within the join-wait window.
    Timeout,
    /// The channel reported itself suspended.
    ChannelSuspended,
}

/// Domain events produced by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ServerEvent {
    /// Authentication completed (first 004 reply). Fires once per
    /// connection.
    Connected,
    /// The server rejected the provided credentials.
    IncorrectLogin { raw: String },
    /// The server asked us to reconnect; the transport is being cycled.
    Reconnecting,
    /// The transport reported a fatal error.
    ConnectionError { reason: String },
    /// The transport closed.
    Disconnected,

    /// A chat message arrived.
    ChatMessage(ChatMessage),
    /// The server confirmed our most recently sent chat message.
    MessageSent { channel: String, text: String },
    /// A direct message arrived.
    WhisperReceived(Whisper),
    /// The service bot reported another channel is hosting us. Only
    /// delivered while joined to our own channel.
    BeingHosted {
        channel: String,
        host: String,
        viewers: Option<u64>,
        text: String,
    },

    /// A user joined a channel (membership capability).
    UserJoined { channel: String, user: String },
    /// A user left a channel (membership capability).
    UserParted { channel: String, user: String },
    /// A join was confirmed by a full ROOMSTATE.
    JoinedChannel { channel: String },
    /// Our own PART was echoed back; the channel is gone from the roster.
    LeftChannel { channel: String },
    /// A join did not complete; the channel was rolled back.
    JoinFailed {
        channel: String,
        reason: JoinFailureReason,
    },
    /// NAMES reply listing users present before we joined.
    ExistingUsersDetected { channel: String, users: Vec<String> },

    /// Channel settings changed (or arrived with a join confirmation).
    ChannelStateChanged { channel: String, state: RoomState },
    /// First USERSTATE seen for a channel.
    UserStateChanged(UserState),

    /// This channel started hosting another (HOSTTARGET).
    HostingStarted {
        channel: String,
        target: String,
        viewers: Option<u64>,
    },
    /// This channel stopped hosting (HOSTTARGET with a `-` target).
    HostingStopped { channel: String, viewers: Option<u64> },
    /// NOTICE acknowledgement that host mode was entered.
    HostingOn { channel: String },
    /// NOTICE acknowledgement that host mode was exited.
    HostingOff { channel: String },

    /// Chat history was cleared.
    ChatCleared { channel: String },
    /// A user was timed out, with the `ban-duration` the server reported.
    UserTimedOut {
        channel: String,
        user: String,
        duration: Duration,
    },
    /// A user was banned permanently.
    UserBanned { channel: String, user: String },
    /// A single message was deleted.
    MessageCleared {
        channel: String,
        text: String,
        target_message_id: Option<String>,
    },

    /// A moderator was granted operator status.
    ModeratorJoined { channel: String, user: String },
    /// A moderator lost operator status.
    ModeratorLeft { channel: String, user: String },
    /// Moderator list reply; empty when the channel has none.
    ModeratorsReceived {
        channel: String,
        moderators: Vec<String>,
    },
    /// VIP list reply; empty when the channel has none.
    VipsReceived { channel: String, vips: Vec<String> },
    /// Chat color change acknowledgement.
    ChatColorChanged { channel: String },
    /// The command required permissions we do not have.
    NoPermission { channel: String },
    /// Attempted to raid our own channel.
    SelfRaidError { channel: String },
    /// Raid target warning for mature content.
    RaidNoticeMature { channel: String },
    /// The channel is suspended; it was removed from the roster.
    ChannelSuspended { channel: String },

    /// Incoming raid.
    Raid {
        notice: UserNotice,
        viewer_count: Option<u64>,
    },
    /// First-time subscription.
    NewSubscription(UserNotice),
    /// Resubscription.
    Resubscription(UserNotice),
    /// A named user gifted a subscription.
    GiftedSubscription(UserNotice),
    /// An anonymous user gifted a subscription.
    AnonymousGiftedSubscription(UserNotice),
    /// A batch of subscriptions was gifted to the community.
    CommunitySubscription(UserNotice),
    /// New-chatter ritual.
    RitualNewChatter(UserNotice),

    /// A structurally valid line the engine has no mapping for.
    Unaccounted { location: String, raw: String },
}

fn non_empty_tag(msg: &Message, key: &str) -> Option<String> {
    msg.tag(key).filter(|v| !v.is_empty()).map(str::to_string)
}

pub(crate) fn parse_timestamp(ms: &str) -> Option<DateTime<Utc>> {
    let ms: i64 = ms.parse().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}
