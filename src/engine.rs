//! The protocol orchestrator.
//!
//! [`Engine`] is a sans-IO machine: it consumes transport notifications,
//! received lines, and timer ticks, and produces [`Action`]s — lines to
//! send, transport instructions, and domain events. It performs no I/O and
//! reads no clocks; the caller passes `now` in, which keeps every scenario
//! unit-testable without a runtime.
//!
//! All state mutation happens through `&mut self`, so funneling the three
//! input sources (receive path, join-timeout sweep, keepalive tick)
//! through one caller — as [`Client`](crate::client::Client) does — gives
//! the single-writer discipline the shared collections need.
//!
//! No input can fault the dispatch loop: unparseable lines degrade to
//! `Unknown`, and recognized commands with unexpected shapes take the
//! unaccounted-for path instead of erroring.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::command::{Command, Reply};
use crate::config::{ClientConfig, AUTH_FAILURE_PHRASE, SERVICE_BOT_HOSTMASK};
use crate::error::ClientError;
use crate::event::{
    ChatMessage, JoinFailureReason, ServerEvent, UserNotice, UserState, Whisper,
};
use crate::keepalive::{Keepalive, KeepaliveStatus};
use crate::message::Message;
use crate::state::{normalize, ChannelRoster, ConnectionState, JoinedChannel, RoomState};

/// Outputs of the engine.
///
/// The caller is responsible for executing these in order; outbound sends
/// must keep their issuance order per connection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Action {
    /// Write this line to the transport.
    Send(String),
    /// Close the transport; `forced` marks a keepalive death.
    Close { forced: bool },
    /// Cycle the transport (server-requested RECONNECT).
    Reconnect,
    /// Deliver a domain event to the caller.
    Emit(ServerEvent),
}

/// Stateful orchestrator for one connection.
pub struct Engine {
    config: ClientConfig,
    state: ConnectionState,
    roster: ChannelRoster,
    keepalive: Option<Keepalive>,
    /// Channels whose first USERSTATE has been seen; a repeat confirms our
    /// own most recent send instead.
    seen_user_states: HashSet<String>,
    last_sent: Option<String>,
}

impl Engine {
    /// Create an engine in the disconnected state.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            roster: ChannelRoster::new(),
            keepalive: None,
            seen_user_states: HashSet::new(),
            last_sent: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Channels currently recorded as joined.
    pub fn joined_channels(&self) -> impl Iterator<Item = &JoinedChannel> {
        self.roster.joined_channels()
    }

    /// Whether any join awaits confirmation (drives the sweep timer).
    #[must_use]
    pub fn has_pending_joins(&self) -> bool {
        self.roster.has_pending()
    }

    /// When the keepalive timer should next fire, if armed.
    #[must_use]
    pub fn keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive.as_ref().map(Keepalive::deadline)
    }

    /// Replace credentials. Only allowed while disconnected.
    pub fn set_credentials(
        &mut self,
        username: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        self.config.username = username.into().to_lowercase();
        self.config.token = token.into();
        Ok(())
    }

    // === Transport notifications ===

    /// The transport came up: send the handshake and arm the keepalive.
    pub fn on_transport_connected(&mut self, now: Instant) -> Vec<Action> {
        self.reset_connection_state();
        self.state = ConnectionState::Authenticating;
        self.keepalive = Some(Keepalive::new(now, self.config.ping_timeout));

        let mut actions = Vec::new();
        actions.push(Action::Send(self.config.pass_line()));
        actions.push(Action::Send(format!("NICK {}", self.config.username)));
        actions.push(Action::Send(format!(
            "USER {0} 0 {0}",
            self.config.username
        )));
        if self.config.request_membership {
            actions.push(Action::Send("CAP REQ twitch.tv/membership".to_string()));
        }
        actions.push(Action::Send("CAP REQ twitch.tv/commands".to_string()));
        actions.push(Action::Send("CAP REQ twitch.tv/tags".to_string()));
        actions
    }

    /// The transport closed.
    pub fn on_transport_disconnected(&mut self) -> Vec<Action> {
        self.reset_connection_state();
        self.state = ConnectionState::Disconnected;
        vec![Action::Emit(ServerEvent::Disconnected)]
    }

    /// The transport failed irrecoverably.
    pub fn on_transport_error(&mut self, reason: impl Into<String>) -> Vec<Action> {
        self.reset_connection_state();
        self.state = ConnectionState::Disconnected;
        vec![Action::Emit(ServerEvent::ConnectionError {
            reason: reason.into(),
        })]
    }

    /// Feed a received chunk of newline-delimited lines.
    pub fn on_chunk(&mut self, chunk: &str, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        for line in chunk.split('\n') {
            let line = line.trim_end_matches('\r');
            actions.extend(self.on_line(line, now));
        }
        actions
    }

    /// Feed a single received line.
    pub fn on_line(&mut self, raw: &str, now: Instant) -> Vec<Action> {
        // Lines of a character or less are keepalive noise from the
        // transport's line splitting.
        if raw.len() <= 1 {
            return Vec::new();
        }
        trace!(line = raw, "recv");

        let msg = Message::parse(raw);
        let mut actions = Vec::new();

        if msg.raw.contains(AUTH_FAILURE_PHRASE) {
            actions.push(Action::Emit(ServerEvent::IncorrectLogin {
                raw: msg.raw.clone(),
            }));
            return actions;
        }

        self.dispatch(&msg, now, &mut actions);
        actions
    }

    // === Timer ticks ===

    /// Sweep pending joins whose deadline has passed.
    pub fn on_join_tick(&mut self, now: Instant) -> Vec<Action> {
        let expired = self.roster.sweep_expired(now, self.config.join_wait);
        expired
            .into_iter()
            .map(|channel| {
                warn!(%channel, "join confirmation timed out");
                Action::Emit(ServerEvent::JoinFailed {
                    channel,
                    reason: JoinFailureReason::Timeout,
                })
            })
            .collect()
    }

    /// Evaluate the keepalive. Fires the forced close exactly once; the
    /// monitor is torn down with it, so a late tick is a no-op.
    pub fn on_keepalive_tick(&mut self, now: Instant) -> Vec<Action> {
        match self.keepalive.as_ref().map(|k| k.status(now)) {
            Some(KeepaliveStatus::Dead) => {
                warn!("no PING answered within the keepalive window, force-closing");
                self.keepalive = None;
                vec![Action::Close { forced: true }]
            }
            _ => Vec::new(),
        }
    }

    // === Caller requests ===

    /// Queue a join. Already-joined channels are skipped; if the
    /// connection is ready the queue drains immediately.
    pub fn request_join(&mut self, channel: &str, now: Instant) -> Vec<Action> {
        self.queue_join(channel, false, now)
    }

    /// Queue a join even if the channel is already recorded as joined.
    pub fn force_join(&mut self, channel: &str, now: Instant) -> Vec<Action> {
        self.queue_join(channel, true, now)
    }

    fn queue_join(&mut self, channel: &str, force: bool, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.roster.request(channel, force) && self.state == ConnectionState::Ready {
            self.drain_joins(&mut actions, now);
        }
        actions
    }

    /// Send a PART. The channel leaves the roster when the server echoes
    /// the part back.
    pub fn request_part(&mut self, channel: &str) -> Result<Vec<Action>, ClientError> {
        if self.state != ConnectionState::Ready {
            return Err(ClientError::NotConnected);
        }
        Ok(vec![Action::Send(format!("PART #{}", normalize(channel)))])
    }

    /// Send a chat message, caching it for USERSTATE confirmation.
    pub fn send_chat(
        &mut self,
        channel: &str,
        text: &str,
        now: Instant,
    ) -> Result<Vec<Action>, ClientError> {
        if self.state != ConnectionState::Ready {
            return Err(ClientError::NotConnected);
        }
        self.last_sent = Some(text.to_string());
        let line = format!("PRIVMSG #{} :{}", normalize(channel), text);
        let mut actions = Vec::new();
        self.push_send(&mut actions, line, now);
        Ok(actions)
    }

    /// Send a raw line. Issuing a `PONG` this way updates the keepalive,
    /// which is how callers with auto-pong disabled stay alive.
    pub fn send_raw(&mut self, line: &str, now: Instant) -> Result<Vec<Action>, ClientError> {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Connecting
        ) {
            return Err(ClientError::NotConnected);
        }
        let mut actions = Vec::new();
        self.push_send(&mut actions, line.to_string(), now);
        Ok(actions)
    }

    // === Dispatch ===

    fn dispatch(&mut self, msg: &Message, now: Instant, actions: &mut Vec<Action>) {
        match &msg.command {
            Command::Ping => {
                if self.config.auto_pong {
                    self.push_send(actions, "PONG".to_string(), now);
                }
            }
            // The service never sends unsolicited PONGs, but one must not
            // fault the loop if observed.
            Command::Pong => {}
            Command::PrivMsg => self.handle_privmsg(msg, actions),
            Command::Notice => self.handle_notice(msg, now, actions),
            Command::Join => actions.push(Action::Emit(ServerEvent::UserJoined {
                channel: msg.channel().to_string(),
                user: msg.user().to_string(),
            })),
            Command::Part => self.handle_part(msg, actions),
            Command::HostTarget => self.handle_hosttarget(msg, actions),
            Command::ClearChat => self.handle_clearchat(msg, actions),
            Command::ClearMsg => actions.push(Action::Emit(ServerEvent::MessageCleared {
                channel: msg.channel().to_string(),
                text: msg.trailing().to_string(),
                target_message_id: msg.tag("target-msg-id").map(str::to_string),
            })),
            Command::UserState => self.handle_userstate(msg, actions),
            Command::Whisper => actions.push(Action::Emit(ServerEvent::WhisperReceived(
                Whisper::from_message(msg),
            ))),
            Command::RoomState => self.handle_roomstate(msg, actions),
            Command::Reconnect => {
                self.reset_connection_state();
                self.state = ConnectionState::Connecting;
                actions.push(Action::Emit(ServerEvent::Reconnecting));
                actions.push(Action::Reconnect);
            }
            Command::UserNotice => self.handle_usernotice(msg, actions),
            Command::Mode => self.handle_mode(msg, actions),
            Command::Reply(reply) => self.handle_reply(*reply, msg, now, actions),
            // Recognized vocabulary with nothing to do; consumed silently
            // so the unaccounted-for diagnostic stays meaningful.
            Command::GlobalUserState
            | Command::Nick
            | Command::Pass
            | Command::Cap
            | Command::ServerChange => {
                debug!(command = %msg.command, "recognized command consumed without event");
            }
            Command::Unknown(_) => self.unaccounted("Dispatch", msg, actions),
        }
    }

    fn handle_privmsg(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        if msg.prefix == SERVICE_BOT_HOSTMASK {
            let text = msg.trailing();
            let mut tokens = text.split(' ');
            let host = tokens.next().unwrap_or("").to_string();
            let viewers = tokens.find_map(|t| t.parse::<u64>().ok());
            actions.push(Action::Emit(ServerEvent::BeingHosted {
                channel: msg.channel().to_string(),
                host,
                viewers,
                text: text.to_string(),
            }));
        } else {
            actions.push(Action::Emit(ServerEvent::ChatMessage(
                ChatMessage::from_message(msg),
            )));
        }
    }

    fn handle_notice(&mut self, msg: &Message, now: Instant, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();
        let Some(msg_id) = msg.tag("msg-id") else {
            self.unaccounted("NoticeHandling", msg, actions);
            return;
        };

        match msg_id {
            "color_changed" => {
                actions.push(Action::Emit(ServerEvent::ChatColorChanged { channel }));
            }
            "host_on" => actions.push(Action::Emit(ServerEvent::HostingOn { channel })),
            "host_off" => actions.push(Action::Emit(ServerEvent::HostingOff { channel })),
            "room_mods" => actions.push(Action::Emit(ServerEvent::ModeratorsReceived {
                channel,
                moderators: parse_name_list(msg.trailing()),
            })),
            "no_mods" => actions.push(Action::Emit(ServerEvent::ModeratorsReceived {
                channel,
                moderators: Vec::new(),
            })),
            "vips_success" => actions.push(Action::Emit(ServerEvent::VipsReceived {
                channel,
                vips: parse_name_list(msg.trailing()),
            })),
            "no_vips" => actions.push(Action::Emit(ServerEvent::VipsReceived {
                channel,
                vips: Vec::new(),
            })),
            "no_permission" => {
                actions.push(Action::Emit(ServerEvent::NoPermission { channel }));
            }
            "raid_error_self" => {
                actions.push(Action::Emit(ServerEvent::SelfRaidError { channel }));
            }
            "raid_notice_mature" => {
                actions.push(Action::Emit(ServerEvent::RaidNoticeMature { channel }));
            }
            "msg_channel_suspended" => {
                // Terminal failure: the channel cannot be joined, so roll
                // it back and let the queue move on.
                self.roster.remove(&channel);
                actions.push(Action::Emit(ServerEvent::ChannelSuspended {
                    channel: channel.clone(),
                }));
                actions.push(Action::Emit(ServerEvent::JoinFailed {
                    channel,
                    reason: JoinFailureReason::ChannelSuspended,
                }));
                self.drain_joins(actions, now);
            }
            _ => self.unaccounted("NoticeHandling", msg, actions),
        }
    }

    fn handle_part(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();
        let user = msg.user().to_string();
        if user.eq_ignore_ascii_case(&self.config.username) {
            self.roster.remove(&channel);
            self.seen_user_states.remove(&normalize(&channel));
            actions.push(Action::Emit(ServerEvent::LeftChannel { channel }));
        } else {
            actions.push(Action::Emit(ServerEvent::UserParted { channel, user }));
        }
    }

    fn handle_hosttarget(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();
        let trailing = msg.trailing();
        let mut tokens = trailing.split(' ');
        let target = tokens.next().unwrap_or("");
        let viewers = tokens.next().and_then(|v| v.parse::<u64>().ok());

        if trailing.starts_with('-') {
            actions.push(Action::Emit(ServerEvent::HostingStopped { channel, viewers }));
        } else {
            actions.push(Action::Emit(ServerEvent::HostingStarted {
                channel,
                target: target.to_string(),
                viewers,
            }));
        }
    }

    fn handle_clearchat(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();
        let target = msg.trailing();
        if target.is_empty() {
            actions.push(Action::Emit(ServerEvent::ChatCleared { channel }));
        } else if let Some(duration) = msg.tag("ban-duration") {
            let seconds = duration.parse::<u64>().unwrap_or_default();
            actions.push(Action::Emit(ServerEvent::UserTimedOut {
                channel,
                user: target.to_string(),
                duration: Duration::from_secs(seconds),
            }));
        } else {
            actions.push(Action::Emit(ServerEvent::UserBanned {
                channel,
                user: target.to_string(),
            }));
        }
    }

    fn handle_userstate(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = normalize(msg.channel());
        if self.seen_user_states.insert(channel.clone()) {
            actions.push(Action::Emit(ServerEvent::UserStateChanged(
                UserState::from_message(msg),
            )));
        } else {
            // A repeat USERSTATE in a known channel is the server's
            // confirmation of our most recent send.
            actions.push(Action::Emit(ServerEvent::MessageSent {
                channel,
                text: self.last_sent.clone().unwrap_or_default(),
            }));
        }
    }

    fn handle_roomstate(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();

        // A full tag set is the join confirmation; a sparse one is a
        // single-setting toggle.
        if msg.tags.len() > 2 {
            if self.roster.confirm(&channel) {
                actions.push(Action::Emit(ServerEvent::JoinedChannel {
                    channel: normalize(&channel),
                }));
            }
            if !channel.eq_ignore_ascii_case(&self.config.username) {
                debug!(
                    %channel,
                    "being-hosted notifications only arrive in the client's own channel"
                );
            }
        }

        let state = RoomState::from_message(msg);
        self.roster.attach_room_state(&channel, state.clone());
        actions.push(Action::Emit(ServerEvent::ChannelStateChanged { channel, state }));
    }

    fn handle_usernotice(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let Some(msg_id) = msg.tag("msg-id") else {
            self.unaccounted("UserNoticeHandling", msg, actions);
            return;
        };
        let notice = UserNotice::from_message(msg);

        match msg_id {
            "raid" => {
                let viewer_count = msg
                    .tag("msg-param-viewerCount")
                    .and_then(|v| v.parse::<u64>().ok());
                actions.push(Action::Emit(ServerEvent::Raid {
                    notice,
                    viewer_count,
                }));
            }
            "resub" => actions.push(Action::Emit(ServerEvent::Resubscription(notice))),
            "sub" => actions.push(Action::Emit(ServerEvent::NewSubscription(notice))),
            "subgift" => actions.push(Action::Emit(ServerEvent::GiftedSubscription(notice))),
            "anonsubgift" => actions.push(Action::Emit(
                ServerEvent::AnonymousGiftedSubscription(notice),
            )),
            "submysterygift" => {
                actions.push(Action::Emit(ServerEvent::CommunitySubscription(notice)));
            }
            "ritual" => match msg.tag("msg-param-ritual-name") {
                Some("new_chatter") => {
                    actions.push(Action::Emit(ServerEvent::RitualNewChatter(notice)));
                }
                _ => self.unaccounted("UserNoticeRitualHandling", msg, actions),
            },
            _ => self.unaccounted("UserNoticeHandling", msg, actions),
        }
    }

    fn handle_mode(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let channel = msg.channel().to_string();
        if msg.params.len() >= 3 {
            let user = msg.params[2].clone();
            match msg.params[1].as_str() {
                "+o" => {
                    actions.push(Action::Emit(ServerEvent::ModeratorJoined { channel, user }));
                    return;
                }
                "-o" => {
                    actions.push(Action::Emit(ServerEvent::ModeratorLeft { channel, user }));
                    return;
                }
                _ => {}
            }
        }
        self.unaccounted("ModeHandling", msg, actions);
    }

    fn handle_reply(
        &mut self,
        reply: Reply,
        msg: &Message,
        now: Instant,
        actions: &mut Vec<Action>,
    ) {
        match reply {
            Reply::RPL_MYINFO => {
                // Authentication is complete; fires once per connection.
                if self.state != ConnectionState::Ready {
                    self.state = ConnectionState::Ready;
                    actions.push(Action::Emit(ServerEvent::Connected));
                    self.drain_joins(actions, now);
                }
            }
            Reply::RPL_NAMREPLY => {
                if msg.channel().eq_ignore_ascii_case(&self.config.username) {
                    actions.push(Action::Emit(ServerEvent::ExistingUsersDetected {
                        channel: msg.channel().to_string(),
                        users: msg
                            .trailing()
                            .split_whitespace()
                            .map(str::to_string)
                            .collect(),
                    }));
                }
            }
            Reply::RPL_ENDOFNAMES => self.drain_joins(actions, now),
            Reply::RPL_WELCOME
            | Reply::RPL_YOURHOST
            | Reply::RPL_CREATED
            | Reply::RPL_MOTD
            | Reply::RPL_MOTDSTART
            | Reply::RPL_ENDOFMOTD => {
                trace!(reply = reply.as_str(), "informational reply consumed");
            }
        }
    }

    // === Internals ===

    fn drain_joins(&mut self, actions: &mut Vec<Action>, now: Instant) {
        if self.state != ConnectionState::Ready {
            return;
        }
        for line in self.roster.drain(now) {
            actions.push(Action::Send(line));
        }
    }

    fn push_send(&mut self, actions: &mut Vec<Action>, line: String, now: Instant) {
        // Liveness is measured from outbound PONG issuance; the service
        // never replies to our PONGs.
        if line.starts_with("PONG") {
            if let Some(keepalive) = self.keepalive.as_mut() {
                keepalive.touch(now);
            }
        }
        actions.push(Action::Send(line));
    }

    fn unaccounted(&self, location: &str, msg: &Message, actions: &mut Vec<Action>) {
        debug!(location, raw = %msg.raw, "unaccounted-for message");
        actions.push(Action::Emit(ServerEvent::Unaccounted {
            location: location.to_string(),
            raw: msg.raw.clone(),
        }));
    }

    fn reset_connection_state(&mut self) {
        self.keepalive = None;
        self.roster.reset();
        self.seen_user_states.clear();
        self.last_sent = None;
    }
}

fn parse_name_list(text: &str) -> Vec<String> {
    match text.split_once(": ") {
        Some((_, list)) => list
            .trim_end_matches('.')
            .split(", ")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(ClientConfig::new("testbot", "oauth:secret"))
    }

    fn ready_engine() -> (Engine, Instant) {
        let mut engine = engine();
        let now = Instant::now();
        let _ = engine.on_transport_connected(now);
        let _ = engine.on_line(":tmi.twitch.tv 004 testbot :-", now);
        assert_eq!(engine.state(), ConnectionState::Ready);
        (engine, now)
    }

    fn events(actions: &[Action]) -> Vec<&ServerEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }

    fn sends(actions: &[Action]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_handshake_order() {
        let mut engine = engine();
        let actions = engine.on_transport_connected(Instant::now());
        assert_eq!(
            sends(&actions),
            vec![
                "PASS oauth:secret",
                "NICK testbot",
                "USER testbot 0 testbot",
                "CAP REQ twitch.tv/commands",
                "CAP REQ twitch.tv/tags",
            ]
        );
        assert_eq!(engine.state(), ConnectionState::Authenticating);
        assert!(engine.keepalive_deadline().is_some());
    }

    #[test]
    fn test_membership_cap_requested_when_configured() {
        let mut config = ClientConfig::new("testbot", "secret");
        config.request_membership = true;
        let mut engine = Engine::new(config);
        let actions = engine.on_transport_connected(Instant::now());
        assert!(sends(&actions).contains(&"CAP REQ twitch.tv/membership"));
    }

    #[test]
    fn test_ping_answered_and_keepalive_touched() {
        let (mut engine, now) = ready_engine();
        let before = engine.keepalive_deadline().unwrap();
        let later = now + Duration::from_secs(60);
        let actions = engine.on_line("PING :tmi.twitch.tv", later);
        assert_eq!(sends(&actions), vec!["PONG"]);
        assert!(events(&actions).is_empty());
        assert_eq!(
            engine.keepalive_deadline().unwrap(),
            before + Duration::from_secs(60)
        );
    }

    #[test]
    fn test_ping_ignored_with_auto_pong_disabled() {
        let mut config = ClientConfig::new("testbot", "secret");
        config.auto_pong = false;
        let mut engine = Engine::new(config);
        let now = Instant::now();
        let _ = engine.on_transport_connected(now);
        let before = engine.keepalive_deadline().unwrap();
        let actions = engine.on_line("PING :tmi.twitch.tv", now + Duration::from_secs(9));
        assert!(actions.is_empty());
        assert_eq!(engine.keepalive_deadline().unwrap(), before);
    }

    #[test]
    fn test_manual_pong_touches_keepalive() {
        let (mut engine, now) = ready_engine();
        let later = now + Duration::from_secs(30);
        let actions = engine.send_raw("PONG", later).unwrap();
        assert_eq!(sends(&actions), vec!["PONG"]);
        assert_eq!(
            engine.keepalive_deadline().unwrap(),
            later + engine.config.ping_timeout
        );
    }

    #[test]
    fn test_keepalive_force_close_exactly_once() {
        let (mut engine, _now) = ready_engine();
        let deadline = engine.keepalive_deadline().unwrap();
        assert!(engine.on_keepalive_tick(deadline - Duration::from_secs(1)).is_empty());

        let actions = engine.on_keepalive_tick(deadline);
        assert_eq!(actions, vec![Action::Close { forced: true }]);
        assert!(engine.keepalive_deadline().is_none());

        // A late tick after teardown is discarded.
        assert!(engine.on_keepalive_tick(deadline + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_connected_fires_once_and_drains_queue() {
        let mut engine = engine();
        let now = Instant::now();
        let _ = engine.request_join("SomeChannel", now);
        let _ = engine.on_transport_connected(now);

        let actions = engine.on_line(":tmi.twitch.tv 004 testbot :-", now);
        assert_eq!(events(&actions), vec![&ServerEvent::Connected]);
        assert_eq!(sends(&actions), vec!["JOIN #somechannel"]);

        let again = engine.on_line(":tmi.twitch.tv 004 testbot :-", now);
        assert!(events(&again).is_empty());
    }

    #[test]
    fn test_join_confirmed_by_full_roomstate() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);
        assert!(engine.has_pending_joins());

        let actions = engine.on_line(
            "@broadcaster-lang=;emote-only=0;followers-only=-1;r9k=0;room-id=1;slow=0;subs-only=0 \
             :tmi.twitch.tv ROOMSTATE #dallas",
            now,
        );
        let evs = events(&actions);
        assert!(matches!(
            evs[0],
            ServerEvent::JoinedChannel { channel } if channel == "dallas"
        ));
        assert!(matches!(evs[1], ServerEvent::ChannelStateChanged { .. }));
        assert!(!engine.has_pending_joins());
        assert!(engine.joined_channels().any(|c| c.name == "dallas"));
    }

    #[test]
    fn test_partial_roomstate_is_only_a_state_change() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);
        let _ = engine.on_line(
            "@emote-only=0;followers-only=-1;r9k=0;room-id=1;slow=0;subs-only=0 \
             :tmi.twitch.tv ROOMSTATE #dallas",
            now,
        );

        let actions = engine.on_line("@room-id=1;slow=10 :tmi.twitch.tv ROOMSTATE #dallas", now);
        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        assert!(matches!(evs[0], ServerEvent::ChannelStateChanged { .. }));
    }

    #[test]
    fn test_join_timeout_rolls_back_and_reports_once() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);

        let actions = engine.on_join_tick(now + engine.config.join_wait);
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::JoinFailed {
                channel: "dallas".to_string(),
                reason: JoinFailureReason::Timeout,
            }]
        );
        assert!(!engine.joined_channels().any(|c| c.name == "dallas"));

        // The sweep removed the entry; nothing fires again.
        assert!(engine
            .on_join_tick(now + engine.config.join_wait * 2)
            .is_empty());
    }

    #[test]
    fn test_suspended_channel_rolls_back_and_drains() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dead_channel", now);
        let _ = engine.request_join("alive_channel", now);

        let actions = engine.on_line(
            "@msg-id=msg_channel_suspended :tmi.twitch.tv NOTICE #dead_channel :This channel has been suspended.",
            now,
        );
        let evs = events(&actions);
        assert!(matches!(evs[0], ServerEvent::ChannelSuspended { channel } if channel == "dead_channel"));
        assert!(matches!(
            evs[1],
            ServerEvent::JoinFailed {
                channel,
                reason: JoinFailureReason::ChannelSuspended,
            } if channel == "dead_channel"
        ));
        assert!(!engine.joined_channels().any(|c| c.name == "dead_channel"));
    }

    #[test]
    fn test_end_of_names_drains_queue() {
        let (mut engine, now) = ready_engine();
        // Fill the queue without the request-time drain by queueing while
        // authenticating.
        engine.state = ConnectionState::Authenticating;
        let _ = engine.request_join("late_channel", now);
        engine.state = ConnectionState::Ready;

        let actions = engine.on_line(":testbot.tmi.twitch.tv 366 testbot #x :End of /NAMES list", now);
        assert_eq!(sends(&actions), vec!["JOIN #late_channel"]);
    }

    #[test]
    fn test_incorrect_login_short_circuits() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            ":tmi.twitch.tv NOTICE * :Login authentication failed",
            now,
        );
        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        assert!(matches!(evs[0], ServerEvent::IncorrectLogin { .. }));
    }

    #[test]
    fn test_privmsg_emits_chat_message() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            "@display-name=Ronni;id=abc :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #dallas :Kappa",
            now,
        );
        let evs = events(&actions);
        assert!(matches!(
            evs[0],
            ServerEvent::ChatMessage(chat) if chat.sender == "ronni" && chat.text == "Kappa"
        ));
    }

    #[test]
    fn test_privmsg_from_service_bot_is_being_hosted() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            ":jtv!jtv@jtv.tmi.twitch.tv PRIVMSG #testbot :SomeStreamer is now hosting you for 42 viewers.",
            now,
        );
        let evs = events(&actions);
        assert!(matches!(
            evs[0],
            ServerEvent::BeingHosted { host, viewers: Some(42), .. } if host == "SomeStreamer"
        ));
    }

    #[test]
    fn test_moderators_received_notice() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            "@msg-id=room_mods :tmi.twitch.tv NOTICE #dallas :The moderators of this channel are: alpha, beta",
            now,
        );
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::ModeratorsReceived {
                channel: "dallas".to_string(),
                moderators: vec!["alpha".to_string(), "beta".to_string()],
            }]
        );

        let none = engine.on_line(
            "@msg-id=no_mods :tmi.twitch.tv NOTICE #dallas :There are no moderators of this channel.",
            now,
        );
        assert_eq!(
            events(&none),
            vec![&ServerEvent::ModeratorsReceived {
                channel: "dallas".to_string(),
                moderators: Vec::new(),
            }]
        );
    }

    #[test]
    fn test_notice_without_msg_id_is_unaccounted() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(":tmi.twitch.tv NOTICE #dallas :plain text", now);
        assert!(matches!(
            events(&actions)[0],
            ServerEvent::Unaccounted { location, .. } if location == "NoticeHandling"
        ));
    }

    #[test]
    fn test_clearchat_variants() {
        let (mut engine, now) = ready_engine();

        let cleared = engine.on_line(":tmi.twitch.tv CLEARCHAT #dallas", now);
        assert_eq!(
            events(&cleared),
            vec![&ServerEvent::ChatCleared {
                channel: "dallas".to_string()
            }]
        );

        let timeout = engine.on_line(
            "@ban-duration=600 :tmi.twitch.tv CLEARCHAT #dallas :ronni",
            now,
        );
        assert_eq!(
            events(&timeout),
            vec![&ServerEvent::UserTimedOut {
                channel: "dallas".to_string(),
                user: "ronni".to_string(),
                duration: Duration::from_secs(600),
            }]
        );

        let ban = engine.on_line(":tmi.twitch.tv CLEARCHAT #dallas :ronni", now);
        assert_eq!(
            events(&ban),
            vec![&ServerEvent::UserBanned {
                channel: "dallas".to_string(),
                user: "ronni".to_string(),
            }]
        );
    }

    #[test]
    fn test_clearmsg_reads_target_tag() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            "@login=ronni;target-msg-id=abc-123-def :tmi.twitch.tv CLEARMSG #dallas :HeyGuys",
            now,
        );
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::MessageCleared {
                channel: "dallas".to_string(),
                text: "HeyGuys".to_string(),
                target_message_id: Some("abc-123-def".to_string()),
            }]
        );
    }

    #[test]
    fn test_userstate_first_then_confirmation() {
        let (mut engine, now) = ready_engine();

        let first = engine.on_line("@mod=1 :tmi.twitch.tv USERSTATE #dallas", now);
        assert!(matches!(
            events(&first)[0],
            ServerEvent::UserStateChanged(state) if state.channel == "dallas" && state.is_moderator
        ));

        let _ = engine.send_chat("dallas", "hello chat", now).unwrap();
        let second = engine.on_line("@mod=1 :tmi.twitch.tv USERSTATE #dallas", now);
        assert_eq!(
            events(&second),
            vec![&ServerEvent::MessageSent {
                channel: "dallas".to_string(),
                text: "hello chat".to_string(),
            }]
        );
    }

    #[test]
    fn test_self_part_removes_channel() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);
        let _ = engine.on_line(
            "@a=1;b=2;c=3 :tmi.twitch.tv ROOMSTATE #dallas",
            now,
        );

        let actions = engine.on_line(":testbot!testbot@testbot.tmi.twitch.tv PART #dallas", now);
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::LeftChannel {
                channel: "dallas".to_string()
            }]
        );
        assert!(!engine.joined_channels().any(|c| c.name == "dallas"));

        let other = engine.on_line(":ronni!ronni@ronni.tmi.twitch.tv PART #dallas", now);
        assert_eq!(
            events(&other),
            vec![&ServerEvent::UserParted {
                channel: "dallas".to_string(),
                user: "ronni".to_string(),
            }]
        );
    }

    #[test]
    fn test_hosttarget_start_and_stop() {
        let (mut engine, now) = ready_engine();

        let started = engine.on_line(":tmi.twitch.tv HOSTTARGET #hosting :target 20", now);
        assert_eq!(
            events(&started),
            vec![&ServerEvent::HostingStarted {
                channel: "hosting".to_string(),
                target: "target".to_string(),
                viewers: Some(20),
            }]
        );

        let stopped = engine.on_line(":tmi.twitch.tv HOSTTARGET #hosting :- 20", now);
        assert_eq!(
            events(&stopped),
            vec![&ServerEvent::HostingStopped {
                channel: "hosting".to_string(),
                viewers: Some(20),
            }]
        );
    }

    #[test]
    fn test_mode_grants_and_revocations() {
        let (mut engine, now) = ready_engine();

        let granted = engine.on_line(":jtv MODE #dallas +o ronni", now);
        assert_eq!(
            events(&granted),
            vec![&ServerEvent::ModeratorJoined {
                channel: "dallas".to_string(),
                user: "ronni".to_string(),
            }]
        );

        let revoked = engine.on_line(":jtv MODE #dallas -o ronni", now);
        assert_eq!(
            events(&revoked),
            vec![&ServerEvent::ModeratorLeft {
                channel: "dallas".to_string(),
                user: "ronni".to_string(),
            }]
        );

        let odd = engine.on_line(":jtv MODE #dallas +v ronni", now);
        assert!(matches!(events(&odd)[0], ServerEvent::Unaccounted { .. }));
    }

    #[test]
    fn test_usernotice_subscription_family() {
        let (mut engine, now) = ready_engine();

        let resub = engine.on_line(
            "@login=ronni;msg-id=resub :tmi.twitch.tv USERNOTICE #dallas :six months!",
            now,
        );
        assert!(matches!(
            events(&resub)[0],
            ServerEvent::Resubscription(notice) if notice.login.as_deref() == Some("ronni")
        ));

        let raid = engine.on_line(
            "@login=raider;msg-id=raid;msg-param-viewerCount=15 :tmi.twitch.tv USERNOTICE #dallas",
            now,
        );
        assert!(matches!(
            events(&raid)[0],
            ServerEvent::Raid { viewer_count: Some(15), .. }
        ));

        let ritual = engine.on_line(
            "@login=noob;msg-id=ritual;msg-param-ritual-name=new_chatter :tmi.twitch.tv USERNOTICE #dallas :HeyGuys",
            now,
        );
        assert!(matches!(
            events(&ritual)[0],
            ServerEvent::RitualNewChatter(_)
        ));

        let unknown_ritual = engine.on_line(
            "@login=noob;msg-id=ritual;msg-param-ritual-name=unheard_of :tmi.twitch.tv USERNOTICE #dallas",
            now,
        );
        assert!(matches!(
            events(&unknown_ritual)[0],
            ServerEvent::Unaccounted { location, .. } if location == "UserNoticeRitualHandling"
        ));

        let unknown = engine.on_line(
            "@msg-id=brand_new_thing :tmi.twitch.tv USERNOTICE #dallas",
            now,
        );
        assert!(matches!(
            events(&unknown)[0],
            ServerEvent::Unaccounted { location, .. } if location == "UserNoticeHandling"
        ));
    }

    #[test]
    fn test_existing_users_only_for_own_channel() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(
            ":testbot.tmi.twitch.tv 353 testbot = #testbot :alpha beta",
            now,
        );
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::ExistingUsersDetected {
                channel: "testbot".to_string(),
                users: vec!["alpha".to_string(), "beta".to_string()],
            }]
        );
    }

    #[test]
    fn test_reconnect_request_cycles_transport() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);
        let actions = engine.on_line(":tmi.twitch.tv RECONNECT", now);
        assert_eq!(events(&actions), vec![&ServerEvent::Reconnecting]);
        assert!(actions.contains(&Action::Reconnect));
        assert_eq!(engine.state(), ConnectionState::Connecting);
        assert!(!engine.has_pending_joins());
    }

    #[test]
    fn test_unknown_command_is_unaccounted() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_line(":tmi.twitch.tv 421 testbot WHO :Unknown command", now);
        assert!(matches!(
            events(&actions)[0],
            ServerEvent::Unaccounted { location, .. } if location == "Dispatch"
        ));
    }

    #[test]
    fn test_malformed_line_does_not_stop_the_chunk() {
        let (mut engine, now) = ready_engine();
        let actions = engine.on_chunk(
            "@broken-tags-no-space\r\nPING :tmi.twitch.tv\r\n\r\n",
            now,
        );
        // The malformed line degrades to Unknown (one unaccounted event),
        // the PING is still answered, and the empty line is discarded.
        assert_eq!(sends(&actions), vec!["PONG"]);
        assert_eq!(events(&actions).len(), 1);
    }

    #[test]
    fn test_send_chat_requires_ready() {
        let mut engine = engine();
        assert_eq!(
            engine.send_chat("dallas", "hi", Instant::now()).unwrap_err(),
            ClientError::NotConnected
        );

        let (mut engine, now) = ready_engine();
        let actions = engine.send_chat("Dallas", "hi", now).unwrap();
        assert_eq!(sends(&actions), vec!["PRIVMSG #dallas :hi"]);
    }

    #[test]
    fn test_part_request_requires_ready() {
        let mut engine = engine();
        assert_eq!(
            engine.request_part("dallas").unwrap_err(),
            ClientError::NotConnected
        );

        let (mut engine, _now) = ready_engine();
        let actions = engine.request_part("#Dallas").unwrap();
        assert_eq!(sends(&actions), vec!["PART #dallas"]);
    }

    #[test]
    fn test_set_credentials_only_while_disconnected() {
        let mut engine = engine();
        assert!(engine.set_credentials("other", "token").is_ok());

        let _ = engine.on_transport_connected(Instant::now());
        assert_eq!(
            engine.set_credentials("other", "token").unwrap_err(),
            ClientError::AlreadyConnected
        );
    }

    #[test]
    fn test_disconnect_clears_state_but_keeps_requests() {
        let (mut engine, now) = ready_engine();
        let _ = engine.request_join("dallas", now);

        let actions = engine.on_transport_disconnected();
        assert_eq!(events(&actions), vec![&ServerEvent::Disconnected]);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(!engine.has_pending_joins());
        assert!(engine.keepalive_deadline().is_none());
        assert_eq!(engine.joined_channels().count(), 0);

        // The request survives for the next connection.
        let _ = engine.on_transport_connected(now);
        let actions = engine.on_line(":tmi.twitch.tv 004 testbot :-", now);
        assert_eq!(
            sends(&actions),
            vec!["JOIN #dallas"]
        );
    }

    #[test]
    fn test_transport_error_emits_connection_error() {
        let (mut engine, _now) = ready_engine();
        let actions = engine.on_transport_error("tls handshake failed");
        assert_eq!(
            events(&actions),
            vec![&ServerEvent::ConnectionError {
                reason: "tls handshake failed".to_string()
            }]
        );
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(
            parse_name_list("The VIPs of this channel are: alpha, beta."),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert!(parse_name_list("no separator here").is_empty());
    }
}
