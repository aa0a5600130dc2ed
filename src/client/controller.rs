//! Sync controller
//!
//! Single owner of the session: the snapshot, the subscription registry and
//! the status board. Inbound frames are processed one at a time, and every
//! reconcile of a frame finishes before the next frame is looked at, so two
//! reconciles of the same `(topic, entity)` never overlap.
//!
//! Fields of a frame are handled in a fixed order; several may apply:
//!
//! 1. `server_time`: clock offset
//! 2. `client_hash`: stale-client detection (rest of frame skipped)
//! 3. `sending`: status line
//! 4. `error`: server-side failure, into the error log
//! 5. `live`: liveness and subscription epoch
//! 6. `config_hash`: config replacement
//! 7. `routes_hash`: routes replacement
//! 8. value-map topics: merged per entity
//! 9. list topics: reconciled per entity
//!
//! then the snapshot is committed and the liveness follow-up runs.

use std::collections::{BTreeMap, VecDeque};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Sleep, sleep};
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use super::status::StatusBoard;
use crate::core::{Api, ApiError, BlockFetcher, ChannelError, ReconcileError, SyncObserver};
use crate::session::{
    CommitOutcome, PersistedSnapshot, SnapshotStore, SubscriptionRegistry, config_entities,
    split_topic,
};
use crate::sync::{Block, Record, SyncResult, UpdateDescriptor, check_indices, reconcile};
use crate::transport::{ChannelEvent, ChannelHandle, ServerMessage};

/// Whether the event config has been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPhase {
    /// Results are stored but not shown.
    AwaitingConfig,
    /// Results are shown as they arrive.
    Ready,
}

/// Where a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Pushed over the real-time channel.
    Channel,
    /// Pulled over HTTP.
    Http,
}

/// Request from the application to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerInput {
    /// Add interest in a topic.
    Subscribe(String),
    /// Drop interest in a topic.
    Unsubscribe(String),
    /// Ask the server for the full state now.
    Refresh,
    /// Stop the controller and the channel.
    Shutdown,
}

/// Block fetches for one `(topic, entity)`.
struct EntityFetcher<'a, A: ?Sized> {
    api: &'a A,
    topic: &'a str,
    entity: &'a str,
}

#[async_trait]
impl<'a, A: Api + ?Sized> BlockFetcher for EntityFetcher<'a, A> {
    async fn fetch_block(&self, block: &Block) -> Result<Vec<Record>, ApiError> {
        self.api.block(self.topic, self.entity, block).await
    }
}

/// What a processed frame asks for next.
#[derive(Debug, Default)]
struct FollowUp {
    refresh_state: bool,
    pull: bool,
}

/// Orchestrates the update cycle.
pub struct SyncController<A: Api> {
    api: Arc<A>,
    channel: ChannelHandle,
    observer: Arc<dyn SyncObserver>,
    store: SnapshotStore,
    snapshot: PersistedSnapshot,
    registry: SubscriptionRegistry,
    status: StatusBoard,
    phase: ConfigPhase,
    client_hash: Option<String>,
    stale_hash: Option<String>,
    time_offset: Option<f64>,
    channel_open: bool,
    poll_interval: Duration,
    poll_at: Option<Pin<Box<Sleep>>>,
}

impl<A: Api> SyncController<A> {
    /// Create a controller. Nothing happens until [`start`](Self::start).
    pub fn new(
        api: Arc<A>,
        channel: ChannelHandle,
        observer: Arc<dyn SyncObserver>,
        store: SnapshotStore,
        config: &ClientConfig,
    ) -> Self {
        Self {
            api,
            channel,
            observer,
            store,
            snapshot: PersistedSnapshot::default(),
            registry: SubscriptionRegistry::new(),
            status: StatusBoard::new(config.error_log_capacity),
            phase: ConfigPhase::AwaitingConfig,
            client_hash: config.client_hash.clone(),
            stale_hash: None,
            time_offset: None,
            channel_open: false,
            poll_interval: config.state_poll_interval,
            poll_at: None,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &PersistedSnapshot {
        &self.snapshot
    }

    /// Subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Status board.
    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Config phase.
    pub fn phase(&self) -> ConfigPhase {
        self.phase
    }

    /// Client clock minus server clock, in seconds.
    pub fn time_offset(&self) -> Option<f64> {
        self.time_offset
    }

    /// Whether a state re-poll is scheduled.
    pub fn poll_scheduled(&self) -> bool {
        self.poll_at.is_some()
    }

    /// Run until shut down. Starts the session first.
    pub async fn run(
        mut self,
        mut inputs: UnboundedReceiver<ControllerInput>,
        mut events: UnboundedReceiver<ChannelEvent>,
    ) {
        self.start().await;
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(ControllerInput::Shutdown) | None => break,
                    Some(input) => self.handle_input(input).await,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => break,
                },
                () = poll_due(&mut self.poll_at) => {
                    self.poll_at = None;
                    self.refresh_state().await;
                }
            }
        }
        debug!("controller shutting down");
        let _ = self.channel.shutdown();
    }

    /// Restore a cached live session, or ask the server for state.
    pub async fn start(&mut self) {
        match self.store.load() {
            Ok(Some(snapshot)) => {
                info!(key = %self.store.key(), "restoring cached session");
                self.snapshot = snapshot;
                if self.snapshot.config.is_some() {
                    self.phase = ConfigPhase::Ready;
                    self.replay_all();
                }
                self.send(ChannelHandle::ensure_connected);
                return;
            }
            Ok(None) => {}
            Err(e) => self.report_error(format!("Loading snapshot failed: {e}")),
        }
        self.refresh_state().await;
    }

    /// Handle one application request.
    pub async fn handle_input(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Subscribe(topic) => self.subscribe(&topic).await,
            ControllerInput::Unsubscribe(topic) => self.unsubscribe(&topic),
            ControllerInput::Refresh => self.refresh_state().await,
            ControllerInput::Shutdown => {}
        }
    }

    /// Add interest in `topic`.
    pub async fn subscribe(&mut self, topic: &str) {
        if self.registry.increment(topic) {
            debug!(topic = %topic, "topic active");
            self.resync_subscriptions();
            self.pull_if_offline().await;
        }
    }

    /// Drop interest in `topic`.
    pub fn unsubscribe(&mut self, topic: &str) {
        if self.registry.decrement(topic) {
            debug!(topic = %topic, "topic inactive");
            self.resync_subscriptions();
        }
    }

    /// Handle one channel event.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status(text) => self.set_status(text),
            ChannelEvent::Opened => self.channel_open = true,
            ChannelEvent::Idle => self.channel_open = false,
            ChannelEvent::Fatal(reason) => {
                self.channel_open = false;
                self.status.push_error(reason.clone());
                self.observer.on_error(&reason);
            }
            ChannelEvent::Message(message) => self.process(message, MessageOrigin::Channel).await,
            ChannelEvent::Error(error) => self.report_error(error),
        }
    }

    /// `GET state` and process the answer.
    pub async fn refresh_state(&mut self) {
        match self.api.state().await {
            Ok(message) => self.process(message, MessageOrigin::Http).await,
            Err(e) => {
                self.report_error(format!("Loading state failed: {e}"));
                self.schedule_poll();
            }
        }
    }

    /// Process a frame and everything it leads to.
    pub async fn process(&mut self, message: ServerMessage, origin: MessageOrigin) {
        let mut queue = VecDeque::from([(message, origin)]);
        while let Some((message, origin)) = queue.pop_front() {
            let follow_up = self.apply_message(message, origin).await;
            if follow_up.pull {
                queue.extend(
                    self.pull_unfetched()
                        .await
                        .into_iter()
                        .map(|m| (m, MessageOrigin::Http)),
                );
            }
            if follow_up.refresh_state {
                match self.api.state().await {
                    Ok(state) => queue.push_back((state, MessageOrigin::Http)),
                    Err(e) => {
                        self.report_error(format!("Loading state failed: {e}"));
                        self.schedule_poll();
                    }
                }
            }
        }
    }

    async fn apply_message(&mut self, message: ServerMessage, origin: MessageOrigin) -> FollowUp {
        let mut follow_up = FollowUp::default();
        let mut dirty = false;

        // 1. clock
        if let Some(server_time) = message.server_time {
            self.time_offset = Some(now_secs() - server_time);
        }

        // 2. stale client
        if let Some(server_hash) = &message.client_hash {
            let stale = self
                .client_hash
                .as_deref()
                .is_some_and(|ours| ours != server_hash);
            if stale && self.stale_hash.as_deref() != Some(server_hash.as_str()) {
                warn!(server_hash = %server_hash, "client build is stale, reloading");
                self.stale_hash = Some(server_hash.clone());
                self.observer.on_client_stale(server_hash);
                self.reset_session();
                follow_up.refresh_state = true;
                return follow_up;
            }
        }

        // 3. status
        if let Some(sending) = &message.sending {
            self.set_status(format!("Connected, loading {sending}"));
        }

        // 4. server error
        if let Some(error) = &message.error {
            self.report_error(error.clone());
        }

        // 5. liveness
        if let Some(live) = message.live {
            if self.snapshot.live != live {
                info!(live, "liveness changed");
                self.snapshot.live = live;
                self.registry.new_epoch();
                dirty = true;
            }
        }

        // 6. config
        if let Some(hash) = &message.config_hash {
            if self.snapshot.config_hash.as_ref() != Some(hash) {
                dirty |= self.replace_config(hash).await;
            }
        }

        // 7. routes
        if let Some(hash) = &message.routes_hash {
            if self.snapshot.routes_hash.as_ref() != Some(hash) {
                dirty |= self.replace_routes(hash).await;
            }
        }

        // 8. value maps
        for (topic, entities) in message.value_topics() {
            for (entity, values) in entities {
                let merged = self.snapshot.merge_values(topic, entity, values);
                if self.phase == ConfigPhase::Ready {
                    self.observer.on_values(topic, entity, &merged);
                }
                dirty = true;
            }
        }

        // 9. list topics
        for (topic, entities) in message.list_topics() {
            dirty |= self.reconcile_topic(topic, entities).await;
        }

        // 10. persistence
        if dirty {
            self.commit();
        }

        // 11. liveness follow-up
        match message.live {
            Some(true) => self.send(ChannelHandle::ensure_connected),
            Some(false) => {
                self.send(ChannelHandle::close);
                self.channel_open = false;
                follow_up.pull = true;
                follow_up.refresh_state = origin == MessageOrigin::Channel;
            }
            None => {}
        }
        if message.loading == Some(true) {
            debug!("server still loading, polling again later");
            self.schedule_poll();
        }
        follow_up
    }

    async fn replace_config(&mut self, hash: &str) -> bool {
        let config = match self.api.config(hash).await {
            Ok(config) => config,
            Err(e) => {
                self.report_error(format!("Loading config failed: {e}"));
                return false;
            }
        };
        info!(hash = %hash, "config replaced");
        if let Some(entities) = config_entities(&config) {
            let dropped = self.snapshot.retain_entities(&entities);
            if dropped > 0 {
                debug!(dropped, "dropped entities missing from config");
            }
        }
        self.snapshot.config_hash = Some(hash.to_string());
        self.snapshot.config = Some(config);
        self.phase = ConfigPhase::Ready;
        self.replay_all();
        true
    }

    async fn replace_routes(&mut self, hash: &str) -> bool {
        match self.api.routes(hash).await {
            Ok(routes) => {
                info!(hash = %hash, "routes replaced");
                if self.phase == ConfigPhase::Ready {
                    self.observer.on_routes_replaced(&routes);
                }
                self.snapshot.routes_hash = Some(hash.to_string());
                self.snapshot.routes = Some(routes);
                true
            }
            Err(e) => {
                self.report_error(format!("Loading routes failed: {e}"));
                false
            }
        }
    }

    /// Reconcile every entity of one list topic; returns whether anything changed.
    async fn reconcile_topic(&mut self, topic: &str, entities: &Map<String, Value>) -> bool {
        let api = &*self.api;
        let snapshot = &self.snapshot;
        let results = join_all(entities.iter().map(|(entity, raw)| async move {
            let update = UpdateDescriptor::from_value(raw.clone())?;
            let old_list = snapshot.sequence(topic, entity);
            let fetcher = EntityFetcher { api, topic, entity };
            let result = reconcile(&fetcher, old_list, &update).await?;
            check_indices(&result.new_list)?;
            Ok::<SyncResult, ReconcileError>(result)
        }))
        .await;

        let mut changed = false;
        for ((entity, _), result) in entities.iter().zip(results) {
            match result {
                Ok(result) if result.is_unchanged() => {}
                Ok(result) => {
                    debug!(
                        topic = %topic,
                        entity = %entity,
                        removed = result.old_items.len(),
                        added = result.new_items.len(),
                        "sequence reconciled"
                    );
                    self.snapshot
                        .set_sequence(topic, entity, result.new_list.clone());
                    if self.phase == ConfigPhase::Ready {
                        self.observer.on_sequence_reconciled(topic, entity, &result);
                    }
                    changed = true;
                }
                Err(e) => self.report_error(format!("{topic} {entity}: {e}")),
            }
        }
        changed
    }

    /// Emit everything cached, as if freshly received.
    fn replay_all(&self) {
        if let Some(config) = &self.snapshot.config {
            self.observer.on_config_replaced(config);
        }
        if let Some(routes) = &self.snapshot.routes {
            self.observer.on_routes_replaced(routes);
        }
        for (topic, entities) in &self.snapshot.values {
            for (entity, values) in entities {
                self.observer.on_values(topic, entity, values);
            }
        }
        for (topic, entity, sequence) in self.snapshot.sequences() {
            self.observer
                .on_sequence_reconciled(topic, entity, &SyncResult::full(sequence));
        }
    }

    /// Forget everything local, as a page reload would.
    fn reset_session(&mut self) {
        if let Err(e) = self.store.discard() {
            warn!(error = %e, "discarding snapshot failed");
        }
        self.snapshot = PersistedSnapshot::default();
        self.phase = ConfigPhase::AwaitingConfig;
        self.registry.new_epoch();
    }

    fn commit(&mut self) {
        match self.store.commit(&self.snapshot) {
            Ok(CommitOutcome::PersistedAfterClear) => {
                warn!(key = %self.store.key(), "snapshot persisted after clearing storage");
            }
            Ok(_) => {}
            Err(e) => self.report_error(format!("Snapshot persistence disabled: {e}")),
        }
    }

    fn resync_subscriptions(&self) {
        let topics = self.registry.active_topics();
        self.send(|channel| channel.set_subscriptions(topics));
    }

    async fn pull_if_offline(&mut self) {
        if self.channel_open || self.snapshot.live {
            return;
        }
        for message in self.pull_unfetched().await {
            self.process(message, MessageOrigin::Http).await;
        }
    }

    /// Pull every subscribed topic not yet pulled this epoch.
    async fn pull_unfetched(&mut self) -> Vec<ServerMessage> {
        if self.channel_open || self.snapshot.live {
            return Vec::new();
        }
        let mut messages = Vec::new();
        for name in self.registry.take_unfetched() {
            let (topic, entity) = split_topic(&name);
            debug!(topic = %topic, entity = ?entity, "pulling topic");
            match self.api.pull(topic, entity).await {
                Ok(value) => {
                    let value = match entity {
                        Some(entity) => Value::Object(Map::from_iter([(entity.to_string(), value)])),
                        None => value,
                    };
                    messages.push(ServerMessage {
                        topics: BTreeMap::from([(topic.to_string(), value)]),
                        ..ServerMessage::default()
                    });
                }
                Err(e) => self.report_error(format!("Loading {name} failed: {e}")),
            }
        }
        messages
    }

    fn schedule_poll(&mut self) {
        self.poll_at = Some(Box::pin(sleep(self.poll_interval)));
    }

    fn send(&self, command: impl FnOnce(&ChannelHandle) -> Result<(), ChannelError>) {
        if let Err(e) = command(&self.channel) {
            warn!(error = %e, "channel unavailable");
        }
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.status.set_status(text);
        self.observer.on_connection_status(&self.status.render());
    }

    fn report_error(&mut self, error: String) {
        warn!(error = %error, "sync error");
        self.status.push_error(error.clone());
        self.observer.on_error(&error);
        self.observer.on_connection_status(&self.status.render());
    }
}

async fn poll_due(poll_at: &mut Option<Pin<Box<Sleep>>>) {
    match poll_at {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
