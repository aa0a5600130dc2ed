//! Real-time channel actor.
//!
//! One task owns the socket and the [`ConnectionMachine`]. Callers talk to it
//! through a [`ChannelHandle`]; everything it observes comes back as
//! [`ChannelEvent`]s. Each backoff episode owns one retry deadline and one
//! status ticker, both dropped the moment the episode ends.

use std::collections::BTreeSet;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, Sleep, interval_at, sleep, timeout};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffConfig;
use super::connection::{CloseOutcome, ConnectionMachine};
use super::message::{ClientFrame, ServerMessage};
use crate::core::constants::CLOSE_HANDSHAKE_TIMEOUT;
use crate::core::{ChannelError, TransportError};

/// Inbound frame, as far as the channel cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text payload.
    Text(String),
    /// Peer closed, with its reason.
    Close(String),
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open connection.
pub struct Connection {
    /// Text frames to the server.
    pub sink: FrameSink,
    /// Frames from the server.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// Request to the channel actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Connect, and keep reconnecting until told otherwise.
    EnsureConnected,
    /// Stop wanting a connection and close any socket.
    Close,
    /// Replace the subscription set; sent now if open, and after every open.
    SetSubscriptions(BTreeSet<String>),
    /// Close everything and stop the task.
    Shutdown,
}

/// Something the channel observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Human-readable connection status; empty when idle.
    Status(String),
    /// Socket opened; the subscription set has been sent.
    Opened,
    /// Socket gone and no reconnect planned.
    Idle,
    /// Server closed with a fatal reason; no reconnect planned.
    Fatal(String),
    /// Decoded server frame.
    Message(ServerMessage),
    /// Recoverable problem worth surfacing.
    Error(String),
}

/// Cloneable handle to a running channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    /// Wrap a command sender.
    pub fn new(tx: UnboundedSender<ChannelCommand>) -> Self {
        Self { tx }
    }

    /// Send a raw command.
    pub fn send(&self, command: ChannelCommand) -> Result<(), ChannelError> {
        self.tx.send(command).map_err(|_| ChannelError::Shutdown)
    }

    /// See [`ChannelCommand::EnsureConnected`].
    pub fn ensure_connected(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::EnsureConnected)
    }

    /// See [`ChannelCommand::Close`].
    pub fn close(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::Close)
    }

    /// See [`ChannelCommand::SetSubscriptions`].
    pub fn set_subscriptions(&self, topics: BTreeSet<String>) -> Result<(), ChannelError> {
        self.send(ChannelCommand::SetSubscriptions(topics))
    }

    /// See [`ChannelCommand::Shutdown`].
    pub fn shutdown(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::Shutdown)
    }

    /// Whether the actor is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One backoff episode: the retry deadline and its status ticker.
///
/// A zero tick disables the countdown.
struct RetryEpisode {
    deadline: Instant,
    sleep: Pin<Box<Sleep>>,
    ticker: Option<Interval>,
    reason: String,
}

impl RetryEpisode {
    fn new(delay: Duration, tick: Duration, reason: String) -> Self {
        let now = Instant::now();
        Self {
            deadline: now + delay,
            sleep: Box::pin(sleep(delay)),
            ticker: (!tick.is_zero()).then(|| interval_at(now + tick, tick)),
            reason,
        }
    }

    /// Whole seconds until the retry, rounded.
    fn remaining_secs(&self) -> u64 {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        ((remaining.as_millis() + 500) / 1000) as u64
    }
}

enum RetryEvent {
    Due,
    Tick,
}

/// The channel actor.
pub struct RealtimeChannel<C: Connector> {
    connector: Arc<C>,
    machine: ConnectionMachine,
    status_tick: Duration,
    commands: UnboundedReceiver<ChannelCommand>,
    events: UnboundedSender<ChannelEvent>,
    subscriptions: BTreeSet<String>,
    connecting: Option<BoxFuture<'static, Result<Connection, TransportError>>>,
    connection: Option<Connection>,
    retry: Option<RetryEpisode>,
}

impl<C: Connector> RealtimeChannel<C> {
    /// Create the actor and the two ends callers use.
    pub fn new(
        connector: Arc<C>,
        backoff: BackoffConfig,
    ) -> (Self, ChannelHandle, UnboundedReceiver<ChannelEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let channel = Self {
            connector,
            machine: ConnectionMachine::new(backoff),
            status_tick: backoff.status_tick,
            commands: command_rx,
            events: event_tx,
            subscriptions: BTreeSet::new(),
            connecting: None,
            connection: None,
            retry: None,
        };
        (channel, ChannelHandle::new(command_tx), event_rx)
    }

    /// Create the actor and run it on the current runtime.
    pub fn spawn(
        connector: Arc<C>,
        backoff: BackoffConfig,
    ) -> (ChannelHandle, UnboundedReceiver<ChannelEvent>, JoinHandle<()>) {
        let (channel, handle, events) = Self::new(connector, backoff);
        let task = tokio::spawn(channel.run());
        (handle, events, task)
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                result = poll_connecting(&mut self.connecting) => {
                    self.connecting = None;
                    self.handle_connect_result(result).await;
                }
                frame = next_frame(&mut self.connection) => self.handle_frame(frame).await,
                event = next_retry_event(&mut self.retry) => match event {
                    RetryEvent::Due => self.handle_retry_due(),
                    RetryEvent::Tick => self.emit_retry_status(),
                },
            }
        }
        debug!("channel shutting down");
        self.retry = None;
        self.connecting = None;
        if let Some(connection) = self.connection.take() {
            close_connection(connection).await;
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // Nobody listening is not an error for the actor.
        let _ = self.events.send(event);
    }

    fn status(&self, text: impl Into<String>) {
        self.emit(ChannelEvent::Status(text.into()));
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::EnsureConnected => {
                if self.machine.ensure_connected() {
                    self.start_connect();
                }
            }
            ChannelCommand::Close => {
                self.retry = None;
                if !self.machine.close() {
                    self.emit(ChannelEvent::Idle);
                    self.status("");
                    return;
                }
                // A pending connect is left to finish; on_connected drops it.
                if let Some(connection) = self.connection.take() {
                    info!("closing channel");
                    close_connection(connection).await;
                    let outcome = self.machine.on_closed("");
                    self.apply_outcome(outcome);
                }
            }
            ChannelCommand::SetSubscriptions(topics) => {
                self.subscriptions = topics;
                if self.machine.is_open() {
                    let _ = self.send_subscriptions().await;
                }
            }
            ChannelCommand::Shutdown => {}
        }
    }

    fn start_connect(&mut self) {
        self.retry = None;
        info!("connecting");
        self.status("Connecting");
        let connector = Arc::clone(&self.connector);
        self.connecting = Some(Box::pin(async move { connector.connect().await }));
    }

    async fn handle_connect_result(&mut self, result: Result<Connection, TransportError>) {
        match result {
            Ok(connection) => {
                if self.machine.on_connected() {
                    info!("channel open");
                    self.connection = Some(connection);
                    self.status("Connected");
                    if self.send_subscriptions().await {
                        self.emit(ChannelEvent::Opened);
                    }
                } else {
                    debug!("connect finished after close; dropping socket");
                    close_connection(connection).await;
                    self.emit(ChannelEvent::Idle);
                    self.status("");
                }
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                let outcome = self.machine.on_closed(&e.to_string());
                self.apply_outcome(outcome);
            }
        }
    }

    /// Send the subscription set; false when the socket is gone afterwards.
    async fn send_subscriptions(&mut self) -> bool {
        let text = ClientFrame::subscriptions(&self.subscriptions).to_text();
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        debug!(frame = %text, "sending subscriptions");
        match connection.sink.send(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send failed");
                self.connection = None;
                let outcome = self.machine.on_closed(&e.to_string());
                self.apply_outcome(outcome);
                false
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Frame, TransportError>>) {
        let reason = match frame {
            Some(Ok(Frame::Text(text))) => {
                match ServerMessage::from_text(&text) {
                    Ok(message) => {
                        debug!(bytes = text.len(), "frame received");
                        self.status("Connected");
                        self.emit(ChannelEvent::Message(message));
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable frame");
                        self.emit(ChannelEvent::Error(format!("Bad message from server: {e}")));
                    }
                }
                return;
            }
            Some(Ok(Frame::Close(reason))) => reason,
            Some(Err(e)) => e.to_string(),
            None => "Connection lost".to_string(),
        };
        info!(reason = %reason, "channel closed");
        if let Some(connection) = self.connection.take() {
            close_connection(connection).await;
        }
        let outcome = self.machine.on_closed(&reason);
        self.apply_outcome(outcome);
    }

    fn apply_outcome(&mut self, outcome: CloseOutcome) {
        match outcome {
            CloseOutcome::Idle => {
                self.emit(ChannelEvent::Idle);
                self.status("");
            }
            CloseOutcome::Fatal { reason } => {
                error!(reason = %reason, "fatal close, not reconnecting");
                self.status(reason.clone());
                self.emit(ChannelEvent::Fatal(reason));
            }
            CloseOutcome::Retry { delay, reason } => {
                info!(delay_ms = delay.as_millis() as u64, reason = %reason, "reconnect scheduled");
                self.status(format!("Disconnected: {reason}"));
                self.retry = Some(RetryEpisode::new(delay, self.status_tick, reason));
            }
        }
    }

    fn handle_retry_due(&mut self) {
        self.retry = None;
        if self.machine.retry_due() {
            self.start_connect();
        }
    }

    fn emit_retry_status(&self) {
        let Some(episode) = &self.retry else {
            return;
        };
        let secs = episode.remaining_secs();
        if secs > 0 {
            self.status(format!(
                "Disconnected: {}\nReconnecting in {secs} sec.",
                episode.reason
            ));
        }
    }
}

async fn poll_connecting(
    connecting: &mut Option<BoxFuture<'static, Result<Connection, TransportError>>>,
) -> Result<Connection, TransportError> {
    match connecting {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_frame(connection: &mut Option<Connection>) -> Option<Result<Frame, TransportError>> {
    match connection {
        Some(connection) => connection.stream.next().await,
        None => pending().await,
    }
}

async fn next_retry_event(retry: &mut Option<RetryEpisode>) -> RetryEvent {
    let Some(episode) = retry else {
        return pending().await;
    };
    let Some(ticker) = episode.ticker.as_mut() else {
        (&mut episode.sleep).await;
        return RetryEvent::Due;
    };
    tokio::select! {
        biased;
        () = &mut episode.sleep => RetryEvent::Due,
        _ = ticker.tick() => RetryEvent::Tick,
    }
}

async fn close_connection(mut connection: Connection) {
    if timeout(CLOSE_HANDSHAKE_TIMEOUT, connection.sink.close())
        .await
        .is_err()
    {
        debug!("close handshake timed out");
    }
}
