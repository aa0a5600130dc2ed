//! High-level tracker client.
//!
//! Provides [`TrackerClient`], which wires an [`Api`], a [`Connector`] and a
//! [`SnapshotStorage`] into a running [`SyncController`] plus
//! [`RealtimeChannel`], and hands back a cheap handle for the application.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::config::ClientConfig;
use super::controller::{ControllerInput, SyncController};
use crate::core::{Api, ChannelError, SyncObserver};
use crate::session::{SnapshotStorage, SnapshotStore};
use crate::transport::{Connector, RealtimeChannel};

#[cfg(feature = "net")]
use crate::core::TrackerError;
#[cfg(feature = "net")]
use crate::transport::{HttpApi, WebSocketConnector};

/// A running tracker session.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use trackers_sync::prelude::*;
///
/// let config = ClientConfig::builder(url::Url::parse("https://host/tour-2024")?)
///     .client_hash(env!("CARGO_PKG_VERSION"))
///     .build();
/// let client = TrackerClient::launch(config, Arc::new(MyView), Arc::new(MemoryStorage::new()))?;
/// client.subscribe("riders_points")?;
/// // ...
/// client.shutdown().await;
/// ```
pub struct TrackerClient {
    inputs: UnboundedSender<ControllerInput>,
    controller: JoinHandle<()>,
    channel: JoinHandle<()>,
}

impl TrackerClient {
    /// Connect to the event at `config.base_url` over HTTP and WebSocket.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(feature = "net")]
    #[cfg_attr(docsrs, doc(cfg(feature = "net")))]
    pub fn launch(
        config: ClientConfig,
        observer: Arc<dyn SyncObserver>,
        storage: Arc<dyn SnapshotStorage>,
    ) -> Result<Self, TrackerError> {
        let api = HttpApi::new(config.base_url.clone(), config.request_timeout)?;
        let connector = WebSocketConnector::new(&config.base_url)?;
        info!(base = %config.base_url, socket = %connector.url(), "launching tracker client");
        Ok(Self::launch_with(
            &config,
            Arc::new(api),
            Arc::new(connector),
            observer,
            storage,
        ))
    }

    /// Run a session over any [`Api`] and [`Connector`].
    pub fn launch_with<A, C>(
        config: &ClientConfig,
        api: Arc<A>,
        connector: Arc<C>,
        observer: Arc<dyn SyncObserver>,
        storage: Arc<dyn SnapshotStorage>,
    ) -> Self
    where
        A: Api + 'static,
        C: Connector,
    {
        let (handle, events, channel) = RealtimeChannel::spawn(connector, config.backoff);
        let store = SnapshotStore::new(storage, config.storage_key());
        let controller = SyncController::new(api, handle, observer, store, config);

        let (inputs, input_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(controller.run(input_rx, events));
        debug!(key = %config.storage_key(), "tracker tasks spawned");

        Self {
            inputs,
            controller,
            channel,
        }
    }

    /// Add interest in `topic` (`"topic"` or `"topic.entity"`).
    pub fn subscribe(&self, topic: impl Into<String>) -> Result<(), ChannelError> {
        self.send(ControllerInput::Subscribe(topic.into()))
    }

    /// Drop interest in `topic`.
    pub fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), ChannelError> {
        self.send(ControllerInput::Unsubscribe(topic.into()))
    }

    /// Ask the server for the full state now.
    pub fn refresh(&self) -> Result<(), ChannelError> {
        self.send(ControllerInput::Refresh)
    }

    /// Whether the session has stopped.
    pub fn is_finished(&self) -> bool {
        self.controller.is_finished()
    }

    /// Stop the session and wait for both tasks.
    pub async fn shutdown(self) {
        let _ = self.send(ControllerInput::Shutdown);
        let _ = self.controller.await;
        let _ = self.channel.await;
        debug!("tracker client stopped");
    }

    fn send(&self, input: ControllerInput) -> Result<(), ChannelError> {
        self.inputs.send(input).map_err(|_| ChannelError::Shutdown)
    }
}
