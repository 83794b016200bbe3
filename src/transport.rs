//! The transport collaborator contract.
//!
//! The engine never owns a socket. A transport implementation (TCP, TLS,
//! websocket, or a test harness) delivers [`TransportEvent`]s and executes
//! [`TransportCommand`]s; connection establishment and reconnect backoff
//! are its concern. Received chunks are newline-delimited; the engine
//! splits them and discards lines of length <= 1 as keepalive noise.

/// Notifications a transport delivers to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and writable.
    Connected,
    /// A received chunk of newline-delimited lines.
    Chunk(String),
    /// The connection closed, by either side.
    Disconnected,
    /// The connection failed irrecoverably.
    FatalError(String),
}

/// Instructions the engine issues to its transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCommand {
    /// Write one line; the transport appends the line terminator.
    Send(String),
    /// Close the connection. `forced` marks a non-graceful teardown
    /// (keepalive death).
    Close { forced: bool },
    /// Cycle the connection (server-requested RECONNECT).
    Reconnect,
}
