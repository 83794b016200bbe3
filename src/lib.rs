//! # tmi-proto
//!
//! A protocol engine for Twitch chat (TMI), the tag-augmented IRC dialect
//! spoken by the streaming chat service.
//!
//! ## Features
//!
//! - Infallible, allocation-conscious parsing of protocol lines into
//!   [`Message`], including IRCv3 tag escaping
//! - A closed [`Command`] classification of the dialect's vocabulary
//! - A sans-IO [`Engine`] driving connection lifecycle, channel join
//!   batching with confirmation timeouts, keepalive monitoring, and
//!   dispatch into typed [`ServerEvent`]s
//! - An optional Tokio actor driver ([`Client`]) that serializes the
//!   receive path and both timers through one task
//!
//! The transport (sockets, TLS, reconnect backoff) is a collaborator, not
//! part of this crate: implementations exchange [`TransportEvent`] and
//! [`TransportCommand`] values with the driver.
//!
//! ## Quick Start
//!
//! ```rust
//! use tmi_proto::Message;
//!
//! let msg = Message::parse(
//!     "@badge-info=;color=#0000FF;msg-id=resub :tmi.twitch.tv USERNOTICE #channel :message",
//! );
//! assert_eq!(msg.tag("msg-id"), Some("resub"));
//! assert_eq!(msg.channel(), "channel");
//! assert_eq!(msg.trailing(), "message");
//! ```
//!
//! Driving the engine without any runtime:
//!
//! ```rust
//! use std::time::Instant;
//! use tmi_proto::{ClientConfig, Engine};
//!
//! let mut engine = Engine::new(ClientConfig::new("bot", "oauth:token"));
//! let now = Instant::now();
//! let handshake = engine.on_transport_connected(now);
//! // Send each Action::Send line, deliver received chunks to
//! // engine.on_chunk(..), and forward Action::Emit events to consumers.
//! # let _ = handshake;
//! ```
//!
//! ## Known limitations
//!
//! Two behaviors of the dialect's reference client are preserved as
//! documented limitations rather than "fixed":
//!
//! - A malformed tag section (no closing space) degrades the *entire*
//!   line to [`Command::Unknown`] instead of recovering partial fields.
//! - At most [`message::MAX_MIDDLE_PARAMS`] middle parameters are
//!   accepted per line; a line beyond the cap also degrades to `Unknown`
//!   rather than being silently truncated.

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod keepalive;
pub mod message;
pub mod state;
pub mod transport;

#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod client;

pub use self::command::{Command, Reply};
pub use self::config::ClientConfig;
pub use self::engine::{Action, Engine};
pub use self::error::ClientError;
pub use self::event::{
    ChatMessage, JoinFailureReason, ServerEvent, UserNotice, UserState, Whisper,
};
pub use self::keepalive::{Keepalive, KeepaliveStatus};
pub use self::message::Message;
pub use self::state::{ConnectionState, JoinedChannel, RoomState};
pub use self::transport::{TransportCommand, TransportEvent};

#[cfg(feature = "tokio")]
pub use self::client::{Client, ClientHandle};
