//! Command classification for the chat dialect.
//!
//! The service speaks a fixed vocabulary: a handful of RFC 2812 commands, a
//! set of dialect-specific commands carried over IRCv3 tags, and nine
//! numeric replies. Anything else is [`Command::Unknown`].
//!
//! Classification is a pure, case-sensitive lookup — the service never
//! lower-cases commands on the wire, so neither do we.

/// Semantic command of a received line.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Command {
    /// `PRIVMSG` — chat message (or a being-hosted notification from the
    /// service bot).
    PrivMsg,
    /// `NOTICE` — server notice, sub-classified by its `msg-id` tag.
    Notice,
    /// `PING` — keepalive probe from the server.
    Ping,
    /// `PONG` — never sent unsolicited by the service; consumed silently.
    Pong,
    /// `HOSTTARGET` — this channel started or stopped hosting another.
    HostTarget,
    /// `CLEARCHAT` — chat cleared, or a user timed out / banned.
    ClearChat,
    /// `CLEARMSG` — a single message was deleted.
    ClearMsg,
    /// `USERSTATE` — our own state in a channel; repeats confirm sends.
    UserState,
    /// `GLOBALUSERSTATE` — our global state after authentication.
    GlobalUserState,
    /// `NICK`
    Nick,
    /// `JOIN`
    Join,
    /// `PART`
    Part,
    /// `PASS`
    Pass,
    /// `CAP`
    Cap,
    /// `WHISPER` — direct message.
    Whisper,
    /// `SERVERCHANGE`
    ServerChange,
    /// `RECONNECT` — the server asks us to reconnect.
    Reconnect,
    /// `ROOMSTATE` — channel settings; a full tag set confirms a join.
    RoomState,
    /// `USERNOTICE` — subscription, raid, and ritual announcements,
    /// sub-classified by `msg-id`.
    UserNotice,
    /// `MODE` — operator grants and revocations.
    Mode,
    /// Numeric reply.
    Reply(Reply),
    /// Anything outside the dialect's vocabulary, with the raw token.
    Unknown(String),
}

/// Numeric replies the service actually sends.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Reply {
    /// 001 - Welcome
    RPL_WELCOME = 1,
    /// 002 - Your host
    RPL_YOURHOST = 2,
    /// 003 - Server created
    RPL_CREATED = 3,
    /// 004 - Server info; authentication is complete once this arrives
    RPL_MYINFO = 4,
    /// 353 - NAMES reply
    RPL_NAMREPLY = 353,
    /// 366 - End of NAMES
    RPL_ENDOFNAMES = 366,
    /// 372 - MOTD line
    RPL_MOTD = 372,
    /// 375 - MOTD start
    RPL_MOTDSTART = 375,
    /// 376 - End of MOTD
    RPL_ENDOFMOTD = 376,
}

impl Command {
    /// Classify a raw command token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "PRIVMSG" => Self::PrivMsg,
            "NOTICE" => Self::Notice,
            "PING" => Self::Ping,
            "PONG" => Self::Pong,
            "HOSTTARGET" => Self::HostTarget,
            "CLEARCHAT" => Self::ClearChat,
            "CLEARMSG" => Self::ClearMsg,
            "USERSTATE" => Self::UserState,
            "GLOBALUSERSTATE" => Self::GlobalUserState,
            "NICK" => Self::Nick,
            "JOIN" => Self::Join,
            "PART" => Self::Part,
            "PASS" => Self::Pass,
            "CAP" => Self::Cap,
            "WHISPER" => Self::Whisper,
            "SERVERCHANGE" => Self::ServerChange,
            "RECONNECT" => Self::Reconnect,
            "ROOMSTATE" => Self::RoomState,
            "USERNOTICE" => Self::UserNotice,
            "MODE" => Self::Mode,
            "001" => Self::Reply(Reply::RPL_WELCOME),
            "002" => Self::Reply(Reply::RPL_YOURHOST),
            "003" => Self::Reply(Reply::RPL_CREATED),
            "004" => Self::Reply(Reply::RPL_MYINFO),
            "353" => Self::Reply(Reply::RPL_NAMREPLY),
            "366" => Self::Reply(Reply::RPL_ENDOFNAMES),
            "372" => Self::Reply(Reply::RPL_MOTD),
            "375" => Self::Reply(Reply::RPL_MOTDSTART),
            "376" => Self::Reply(Reply::RPL_ENDOFMOTD),
            _ => Self::Unknown(token.to_string()),
        }
    }

    /// The wire token for this command.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PrivMsg => "PRIVMSG",
            Self::Notice => "NOTICE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::HostTarget => "HOSTTARGET",
            Self::ClearChat => "CLEARCHAT",
            Self::ClearMsg => "CLEARMSG",
            Self::UserState => "USERSTATE",
            Self::GlobalUserState => "GLOBALUSERSTATE",
            Self::Nick => "NICK",
            Self::Join => "JOIN",
            Self::Part => "PART",
            Self::Pass => "PASS",
            Self::Cap => "CAP",
            Self::Whisper => "WHISPER",
            Self::ServerChange => "SERVERCHANGE",
            Self::Reconnect => "RECONNECT",
            Self::RoomState => "ROOMSTATE",
            Self::UserNotice => "USERNOTICE",
            Self::Mode => "MODE",
            Self::Reply(reply) => reply.as_str(),
            Self::Unknown(token) => token,
        }
    }
}

impl Reply {
    /// The three-digit wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RPL_WELCOME => "001",
            Self::RPL_YOURHOST => "002",
            Self::RPL_CREATED => "003",
            Self::RPL_MYINFO => "004",
            Self::RPL_NAMREPLY => "353",
            Self::RPL_ENDOFNAMES => "366",
            Self::RPL_MOTD => "372",
            Self::RPL_MOTDSTART => "375",
            Self::RPL_ENDOFMOTD => "376",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
