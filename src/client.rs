//! Tokio driver for the protocol engine.
//!
//! [`Client::run`] is a single actor loop: transport notifications, caller
//! requests, the join-timeout sweep, and the keepalive timer all funnel
//! through one `tokio::select!`, so every engine mutation happens on one
//! task. Parsing stays inside the engine call but is stateless; nothing in
//! the loop blocks, and timer work is bounded per tick.
//!
//! The keepalive branch re-arms `sleep_until` from the engine's deadline
//! on every iteration, sleeping for exactly the remaining duration instead
//! of polling on a fixed interval. When the engine tears the monitor down
//! (disconnect, keepalive death) the branch is disabled outright, so a
//! late wake cannot revive cleared state.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant as TokioInstant, MissedTickBehavior};
use tracing::{error, trace, warn};

use crate::config::ClientConfig;
use crate::engine::{Action, Engine};
use crate::error::ClientError;
use crate::event::ServerEvent;
use crate::transport::{TransportCommand, TransportEvent};

/// How often pending-join deadlines are checked while any exist.
const JOIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum ClientRequest {
    Join(String),
    ForceJoin(String),
    Part(String),
    SendChat { channel: String, text: String },
    SendRaw(String),
}

/// Cheap, cloneable handle for issuing requests to a running [`Client`].
#[derive(Clone, Debug)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientRequest>,
}

impl ClientHandle {
    /// Queue a channel join.
    pub fn join_channel(&self, channel: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientRequest::Join(channel.into()))
    }

    /// Queue a channel join even if the channel is recorded as joined.
    pub fn force_join_channel(&self, channel: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientRequest::ForceJoin(channel.into()))
    }

    /// Leave a channel.
    pub fn part_channel(&self, channel: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientRequest::Part(channel.into()))
    }

    /// Send a chat message to a channel.
    pub fn send_message(
        &self,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(ClientRequest::SendChat {
            channel: channel.into(),
            text: text.into(),
        })
    }

    /// Send a raw protocol line.
    pub fn send_raw(&self, line: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientRequest::SendRaw(line.into()))
    }

    fn send(&self, request: ClientRequest) -> Result<(), ClientError> {
        self.tx.send(request).map_err(|_| ClientError::Shutdown)
    }
}

/// The actor that owns an [`Engine`] and drives it from a transport.
pub struct Client {
    engine: Engine,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    transport_commands: mpsc::UnboundedSender<TransportCommand>,
    requests: mpsc::UnboundedReceiver<ClientRequest>,
    requests_open: bool,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Client {
    /// Wire a client to a transport's channel pair.
    ///
    /// Returns the client (to be `run`), a request handle, and the stream
    /// of domain events.
    pub fn new(
        config: ClientConfig,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        transport_commands: mpsc::UnboundedSender<TransportCommand>,
    ) -> (Self, ClientHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Self {
            engine: Engine::new(config),
            transport_events,
            transport_commands,
            requests: request_rx,
            requests_open: true,
            events: event_tx,
        };
        (client, ClientHandle { tx: request_tx }, event_rx)
    }

    /// Run until the transport goes away.
    pub async fn run(mut self) {
        let mut join_sweep = interval(JOIN_SWEEP_INTERVAL);
        join_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let keepalive_deadline = self
                .engine
                .keepalive_deadline()
                .map(TokioInstant::from_std);

            tokio::select! {
                event = self.transport_events.recv() => {
                    let Some(event) = event else {
                        trace!("transport event channel closed, stopping");
                        break;
                    };
                    let actions = self.on_transport_event(event);
                    if self.apply(actions).is_err() {
                        break;
                    }
                }
                request = self.requests.recv(), if self.requests_open => {
                    match request {
                        Some(request) => {
                            if self.on_request(request).is_err() {
                                break;
                            }
                        }
                        None => self.requests_open = false,
                    }
                }
                _ = join_sweep.tick(), if self.engine.has_pending_joins() => {
                    let actions = self.engine.on_join_tick(Instant::now());
                    if self.apply(actions).is_err() {
                        break;
                    }
                }
                _ = sleep_until(keepalive_deadline.unwrap_or_else(TokioInstant::now)),
                    if keepalive_deadline.is_some() =>
                {
                    let actions = self.engine.on_keepalive_tick(Instant::now());
                    if self.apply(actions).is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Vec<Action> {
        let now = Instant::now();
        match event {
            TransportEvent::Connected => self.engine.on_transport_connected(now),
            TransportEvent::Chunk(chunk) => self.engine.on_chunk(&chunk, now),
            TransportEvent::Disconnected => self.engine.on_transport_disconnected(),
            TransportEvent::FatalError(reason) => self.engine.on_transport_error(reason),
        }
    }

    fn on_request(&mut self, request: ClientRequest) -> Result<(), ()> {
        let now = Instant::now();
        let actions = match request {
            ClientRequest::Join(channel) => Ok(self.engine.request_join(&channel, now)),
            ClientRequest::ForceJoin(channel) => Ok(self.engine.force_join(&channel, now)),
            ClientRequest::Part(channel) => self.engine.request_part(&channel),
            ClientRequest::SendChat { channel, text } => {
                self.engine.send_chat(&channel, &text, now)
            }
            ClientRequest::SendRaw(line) => self.engine.send_raw(&line, now),
        };
        match actions {
            Ok(actions) => self.apply(actions),
            Err(err) => {
                // Precondition violation; reported and dropped rather than
                // fed back into the protocol event stream.
                error!(%err, "request rejected");
                Ok(())
            }
        }
    }

    fn apply(&mut self, actions: Vec<Action>) -> Result<(), ()> {
        for action in actions {
            let command = match action {
                Action::Send(line) => {
                    if line.starts_with("PASS ") {
                        trace!(line = "PASS ***", "send");
                    } else {
                        trace!(line = %line, "send");
                    }
                    TransportCommand::Send(line)
                }
                Action::Close { forced } => TransportCommand::Close { forced },
                Action::Reconnect => TransportCommand::Reconnect,
                Action::Emit(event) => {
                    // The caller may have dropped the event receiver;
                    // events are then discarded.
                    let _ = self.events.send(event);
                    continue;
                }
            };
            if self.transport_commands.send(command).is_err() {
                warn!("transport command channel closed, stopping");
                return Err(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        commands_rx: mpsc::UnboundedReceiver<TransportCommand>,
        handle: ClientHandle,
        server_events: mpsc::UnboundedReceiver<ServerEvent>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn spawn(config: ClientConfig) -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let (client, handle, server_events) = Client::new(config, events_rx, commands_tx);
            let task = tokio::spawn(client.run());
            Self {
                events_tx,
                commands_rx,
                handle,
                server_events,
                task,
            }
        }

        async fn next_command(&mut self) -> TransportCommand {
            self.commands_rx.recv().await.expect("command")
        }

        async fn connect_and_authenticate(&mut self) {
            self.events_tx.send(TransportEvent::Connected).unwrap();
            for _ in 0..5 {
                // PASS, NICK, USER, CAP x2
                let _ = self.next_command().await;
            }
            self.events_tx
                .send(TransportEvent::Chunk(
                    ":tmi.twitch.tv 004 testbot :-\r\n".to_string(),
                ))
                .unwrap();
            assert_eq!(
                self.server_events.recv().await.expect("event"),
                ServerEvent::Connected
            );
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("testbot", "oauth:secret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_flows_to_transport() {
        let mut harness = Harness::spawn(config());
        harness.events_tx.send(TransportEvent::Connected).unwrap();

        let mut lines = Vec::new();
        for _ in 0..5 {
            match harness.next_command().await {
                TransportCommand::Send(line) => lines.push(line),
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert_eq!(lines[0], "PASS oauth:secret");
        assert_eq!(lines[1], "NICK testbot");
        assert_eq!(lines[2], "USER testbot 0 testbot");
        assert!(lines[3..].iter().all(|l| l.starts_with("CAP REQ ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_answered() {
        let mut harness = Harness::spawn(config());
        harness.connect_and_authenticate().await;

        harness
            .events_tx
            .send(TransportEvent::Chunk("PING :tmi.twitch.tv\r\n".to_string()))
            .unwrap();
        assert_eq!(
            harness.next_command().await,
            TransportCommand::Send("PONG".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_is_force_closed_once() {
        let mut harness = Harness::spawn(config());
        let started = TokioInstant::now();
        harness.connect_and_authenticate().await;

        // No PING ever arrives; the paused clock advances to the deadline.
        assert_eq!(
            harness.next_command().await,
            TransportCommand::Close { forced: true }
        );
        assert!(started.elapsed() >= Duration::from_secs(305));

        // Exactly once: the next thing the transport hears is not a Close.
        harness.events_tx.send(TransportEvent::Disconnected).unwrap();
        assert_eq!(
            harness.server_events.recv().await.expect("event"),
            ServerEvent::Disconnected
        );
        assert!(harness.commands_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_reported_via_event() {
        let mut harness = Harness::spawn(config());
        harness.connect_and_authenticate().await;

        harness.handle.join_channel("dallas").unwrap();
        assert_eq!(
            harness.next_command().await,
            TransportCommand::Send("JOIN #dallas".to_string())
        );

        // No ROOMSTATE confirmation arrives; the sweep reports the failure.
        let event = harness.server_events.recv().await.expect("event");
        assert_eq!(
            event,
            ServerEvent::JoinFailed {
                channel: "dallas".to_string(),
                reason: crate::event::JoinFailureReason::Timeout,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_outlives_rejected_requests() {
        let mut harness = Harness::spawn(config());
        // Not connected: the request is rejected and logged, the loop
        // keeps running.
        harness.handle.send_message("dallas", "hi").unwrap();

        harness.connect_and_authenticate().await;
        harness.handle.send_message("dallas", "hi").unwrap();
        assert_eq!(
            harness.next_command().await,
            TransportCommand::Send("PRIVMSG #dallas :hi".to_string())
        );
    }
}
