//! Client configuration and protocol constants.

use std::time::Duration;

/// Hostname of the chat edge.
pub const TMI_HOST: &str = "tmi.twitch.tv";

/// Hostmask of the service bot that delivers being-hosted notifications.
pub const SERVICE_BOT_HOSTMASK: &str = "jtv!jtv@jtv.tmi.twitch.tv";

/// Literal phrase the server sends when login authentication fails.
///
/// The failure arrives as a NOTICE with no `msg-id` tag, so it is matched
/// against the raw line text before command dispatch.
pub const AUTH_FAILURE_PHRASE: &str = "Login authentication failed";

/// Maximum length of a single outbound `JOIN` line. Joins for more
/// channels than fit under this limit are split across multiple lines.
pub const MAX_JOIN_LINE_LEN: usize = 4096;

/// Default time to wait for a join confirmation (a full ROOMSTATE) before
/// reporting the join as failed.
pub const DEFAULT_JOIN_WAIT: Duration = Duration::from_secs(30);

/// Default keepalive timeout. The service pings roughly every five
/// minutes; the extra five seconds absorb scheduling jitter.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(305);

/// Configuration for a chat connection.
///
/// Construct with [`ClientConfig::new`]; every field is public, so
/// defaults can be overridden directly.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Login name. Lower-cased on construction; the service is
    /// case-insensitive but always speaks lowercase on the wire.
    pub username: String,
    /// OAuth token, with or without the `oauth:` prefix.
    pub token: String,
    /// How long a pending join may wait for its confirming ROOMSTATE.
    pub join_wait: Duration,
    /// Keepalive timeout measured from the last outbound PONG.
    pub ping_timeout: Duration,
    /// Answer server PINGs automatically. When disabled the caller must
    /// answer via `send_raw("PONG")` or the connection will be reaped.
    pub auto_pong: bool,
    /// Request the membership capability (JOIN/PART/MODE for other
    /// users).
    pub request_membership: bool,
}

impl ClientConfig {
    /// Create a configuration with protocol defaults.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into().to_lowercase(),
            token: token.into(),
            join_wait: DEFAULT_JOIN_WAIT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            auto_pong: true,
            request_membership: false,
        }
    }

    /// The `PASS` line for this configuration, normalizing the `oauth:`
    /// prefix the service expects.
    pub(crate) fn pass_line(&self) -> String {
        if self.token.starts_with("oauth:") {
            format!("PASS {}", self.token)
        } else {
            format!("PASS oauth:{}", self.token)
        }
    }
}
