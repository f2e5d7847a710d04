use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{timeout_at, Instant};

use crate::blockwise::{self, StreamKind};
use crate::error::{Error, Result};
use crate::subscription::{SlotRef, SubscriptionManager};
use crate::transport::{Inbox, Transport};

mod config;
mod firmware;
mod manifest;
mod platform;
mod types;

pub use firmware::{FirmwarePipeline, Progress};
pub use manifest::ManifestPipeline;
pub use platform::{Bootloader, Manifest, ManifestParser, SlotHeader, SlotIndex, StorageBackend};
pub use types::*;

struct Session<M> {
    generation: u64,
    /// Base topic of the transfer currently in flight.
    stream_topic: String,
    count_slot: Option<SlotRef>,
    block_slot: Option<SlotRef>,
    manifest: Option<M>,
    component: usize,
    firmware: Option<FirmwarePipeline>,
    images: Vec<ImageSummary>,
}

impl<M> Session<M> {
    fn new(generation: u64, topic: String) -> Self {
        Self {
            generation,
            stream_topic: topic,
            count_slot: None,
            block_slot: None,
            manifest: None,
            component: 0,
            firmware: None,
            images: Vec::new(),
        }
    }
}

/// Cloneable front door to a running [`Orchestrator`].
#[derive(Clone)]
pub struct UpdateHandle {
    tx: mpsc::Sender<Event>,
    status: watch::Receiver<Status>,
}

impl UpdateHandle {
    /// Starts a session for the manifest published under `topic`.
    pub async fn trigger(&self, topic: &[u8]) -> Result<()> {
        self.tx
            .send(Event::Trigger(Bytes::copy_from_slice(topic)))
            .await
            .map_err(|_| Error::WorkerStopped)
    }

    /// Inbox for subscriptions whose publishes are update triggers.
    pub fn trigger_inbox(&self) -> Inbox {
        Inbox::trigger(self.tx.clone())
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }
}

/// Drives one update session at a time from the event queue.
pub struct Orchestrator<T, P, S, B>
where
    P: ManifestParser,
{
    config: SuitConfig,
    manager: Arc<Mutex<SubscriptionManager<T>>>,
    parser: P,
    storage: S,
    bootloader: Arc<B>,
    events: mpsc::Receiver<Event>,
    sender: mpsc::WeakSender<Event>,
    status: watch::Sender<Status>,
    state: State,
    generation: u64,
    session: Option<Session<P::Manifest>>,
    manifest: ManifestPipeline,
    deadline: Option<Instant>,
}

impl<T, P, S, B> Orchestrator<T, P, S, B>
where
    T: Transport,
    P: ManifestParser,
    S: StorageBackend,
    B: Bootloader,
{
    pub fn new(
        config: SuitConfig,
        manager: Arc<Mutex<SubscriptionManager<T>>>,
        parser: P,
        storage: S,
        bootloader: Arc<B>,
    ) -> Result<(Self, UpdateHandle)> {
        config.validate()?;

        let (tx, events) = mpsc::channel(config.event_queue_depth);
        let (status, status_rx) = watch::channel(Status::default());
        let manifest = ManifestPipeline::new(config.manifest_capacity, config.block_size);

        let orchestrator = Self {
            config,
            manager,
            parser,
            storage,
            bootloader,
            events,
            sender: tx.downgrade(),
            status,
            state: State::Idle,
            generation: 0,
            session: None,
            manifest,
            deadline: None,
        };
        let handle = UpdateHandle {
            tx,
            status: status_rx,
        };
        Ok((orchestrator, handle))
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Processes events until every sender is gone.
    pub async fn run(mut self) {
        info!("update worker started");
        loop {
            let next = match self.deadline {
                Some(deadline) => match timeout_at(deadline, self.events.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let error = self.timeout_error();
                        self.abort(error).await;
                        continue;
                    }
                },
                None => self.events.recv().await,
            };
            let Some(event) = next else {
                break;
            };
            self.handle(event).await;
        }
        info!("update worker stopped");
    }

    pub async fn handle(&mut self, event: Event) {
        match event {
            Event::Trigger(topic) => self.on_trigger(&topic).await,
            Event::Registered { slot, alias, name } => {
                let mut manager = self.manager.lock().await;
                if let Err(e) = manager.register_alias(slot, alias, &name) {
                    warn!("dropping alias {} for '{}': {}", alias, name, e);
                }
            }
            Event::CountAnnounced {
                stream,
                generation,
                total,
            } => {
                if self.is_current(generation) {
                    let result = self.on_count(stream, total).await;
                    self.settle(result).await;
                } else {
                    debug!("dropping stale {} count from session {}", stream, generation);
                }
            }
            Event::BlockReceived {
                stream,
                generation,
                index,
                payload,
            } => {
                if self.is_current(generation) {
                    let result = self.on_block(stream, index, &payload).await;
                    self.settle(result).await;
                } else {
                    debug!("dropping stale {} block {} from session {}", stream, index, generation);
                }
            }
            Event::Error { generation, error } => {
                if self.is_current(generation) {
                    self.abort(error).await;
                } else {
                    debug!("dropping stale error from session {}: {}", generation, error);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle(event).await;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    async fn settle(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(Error::Duplicate { index }) if self.config.drop_duplicates => {
                warn!("dropping duplicate block {}", index);
            }
            Err(error) => self.abort(error).await,
        }
    }

    async fn on_trigger(&mut self, raw: &[u8]) {
        let topic = match self.parse_trigger(raw) {
            Ok(topic) => topic,
            Err(e) => {
                error!("rejecting trigger: {}", e);
                return;
            }
        };

        if let Some(previous) = self.session.as_ref().map(|s| s.generation) {
            warn!("trigger preempts session {} in state {:?}", previous, self.state);
            self.release_session().await;
        }

        self.generation += 1;
        info!("trigger received, downloading manifest from '{}'", topic);
        self.manifest.reset();
        self.session = Some(Session::new(self.generation, topic.clone()));
        // a new session is never published as idle
        self.enter(State::AwaitManifestCount);
        let generation = self.generation;
        self.status.send_modify(|s| s.session = generation);

        if let Err(e) = self.open_count(StreamKind::Manifest, &topic).await {
            self.abort(e).await;
        }
    }

    /// Strips the scheme and checks limits before anything is subscribed.
    fn parse_trigger(&self, raw: &[u8]) -> Result<String> {
        if raw.len() > self.config.trigger_max_len {
            return Err(Error::TopicTooLong {
                len: raw.len(),
                max: self.config.trigger_max_len,
            });
        }
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::InvalidTrigger("topic is not UTF-8".to_string()))?
            .trim_end_matches('\0')
            .trim();
        self.strip_scheme(text)
    }

    fn strip_scheme(&self, uri: &str) -> Result<String> {
        let topic = uri.strip_prefix(self.config.scheme.as_str()).unwrap_or(uri);
        if topic.is_empty() {
            return Err(Error::InvalidTrigger("empty topic".to_string()));
        }
        if topic.contains(['#', '+']) {
            return Err(Error::InvalidTrigger(format!("wildcard in '{}'", topic)));
        }
        if topic.len() > self.config.topic_max_len {
            return Err(Error::TopicTooLong {
                len: topic.len(),
                max: self.config.topic_max_len,
            });
        }
        Ok(topic.to_string())
    }

    async fn on_count(&mut self, stream: StreamKind, total: usize) -> Result<()> {
        match (stream, self.state) {
            (StreamKind::Manifest, State::AwaitManifestCount) => {
                self.manifest.on_count_announced(total)?;
                info!("expecting {} manifest blocks", total);
                self.release_count_slot().await;
                self.open_block(StreamKind::Manifest, 0).await?;
                self.enter(State::ReceivingManifest);
            }
            (StreamKind::Firmware, State::AwaitFirmwareCount) => {
                if total == 0 {
                    return Err(Error::InvalidBlockCount("0".to_string()));
                }
                let session = self.session_mut()?;
                let component = session.component;
                session
                    .firmware
                    .as_mut()
                    .ok_or(Error::ComponentIncomplete(component))?
                    .on_count_announced(total);
                self.release_count_slot().await;
                self.open_block(StreamKind::Firmware, 0).await?;
                self.enter(State::ReceivingFirmware);
            }
            _ => debug!("ignoring {} block count {} in state {:?}", stream, total, self.state),
        }
        Ok(())
    }

    async fn on_block(&mut self, stream: StreamKind, index: usize, payload: &[u8]) -> Result<()> {
        match (stream, self.state) {
            (StreamKind::Manifest, State::ReceivingManifest) => {
                let done = self.manifest.feed(index, payload)?;
                self.release_block_slot().await;
                match done {
                    None => {
                        self.open_block(StreamKind::Manifest, index + 1).await?;
                        self.arm_timer();
                    }
                    Some(len) => self.parse_manifest(len).await?,
                }
            }
            (StreamKind::Firmware, State::ReceivingFirmware) => {
                let progress = self.feed_firmware(index, payload)?;
                self.release_block_slot().await;
                match progress {
                    Progress::More => {
                        self.open_block(StreamKind::Firmware, index + 1).await?;
                        self.arm_timer();
                    }
                    Progress::Complete => self.finalize_component().await?,
                }
            }
            _ => debug!("ignoring {} block {} in state {:?}", stream, index, self.state),
        }
        Ok(())
    }

    async fn parse_manifest(&mut self, len: usize) -> Result<()> {
        self.enter(State::ParsingManifest);
        let manifest = self
            .parser
            .parse(self.manifest.contents(len))
            .map_err(Error::ManifestInvalid)?;
        info!(
            "manifest parsed ({} bytes, {} component(s))",
            len,
            manifest.component_count()
        );

        let session = self.session_mut()?;
        session.manifest = Some(manifest);
        session.component = 0;
        self.next_component().await
    }

    fn feed_firmware(&mut self, index: usize, payload: &[u8]) -> Result<Progress> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        let (Some(manifest), Some(firmware)) =
            (session.manifest.as_ref(), session.firmware.as_mut())
        else {
            return Err(Error::ComponentIncomplete(session.component));
        };
        firmware.feed(manifest, &mut self.storage, index, payload)
    }

    /// Starts fetching the next component with a URI, or validates the slot
    /// once none is left.
    async fn next_component(&mut self) -> Result<()> {
        let Some((component, uri, location)) = self.pending_component()? else {
            return self.validate_slot().await;
        };

        let topic = self.strip_scheme(&uri)?;
        info!("fetching component {} from '{}' into '{}'", component, topic, location);

        let firmware = FirmwarePipeline::new(component, location, self.config.block_size);
        let session = self.session_mut()?;
        session.component = component;
        session.firmware = Some(firmware);
        self.open_count(StreamKind::Firmware, &topic).await?;
        self.enter(State::AwaitFirmwareCount);
        Ok(())
    }

    /// First component at or after the cursor that has a URI, with its
    /// URI and storage location.
    fn pending_component(&mut self) -> Result<Option<(usize, String, String)>> {
        let session = self.session_mut()?;
        let Some(manifest) = session.manifest.as_ref() else {
            return Err(Error::ComponentIncomplete(session.component));
        };

        let Some((component, uri)) = (session.component..manifest.component_count())
            .find_map(|c| manifest.uri(c).map(|uri| (c, uri.to_string())))
        else {
            return Ok(None);
        };
        let location = manifest
            .storage_location(component)
            .ok_or(Error::ComponentIncomplete(component))?
            .to_string();
        Ok(Some((component, uri, location)))
    }

    async fn finalize_component(&mut self) -> Result<()> {
        self.enter(State::Finalizing);
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        let mut firmware = session
            .firmware
            .take()
            .ok_or(Error::ComponentIncomplete(session.component))?;
        let summary = firmware.finalize(&mut self.storage)?;
        info!(
            "component {} stored: {} bytes, crc32 {:#010x}",
            summary.component, summary.bytes, summary.crc32
        );

        session.images.push(summary);
        session.component = summary.component + 1;
        self.next_component().await
    }

    async fn validate_slot(&mut self) -> Result<()> {
        self.enter(State::ValidatingSlot);
        let slot = self.bootloader.other_slot();
        let header = self
            .bootloader
            .header(slot)
            .filter(|h| self.bootloader.validate(h))
            .ok_or(Error::SlotHeaderInvalid { slot })?;
        info!("slot {} header valid\n{}", slot, header);

        self.enter(State::Rebooting);
        let images = self
            .session
            .as_mut()
            .map(|s| std::mem::take(&mut s.images))
            .unwrap_or_default();
        self.release_session().await;
        self.report(SessionOutcome::Rebooted { images });

        info!("rebooting...");
        self.bootloader.reboot();
        self.enter(State::Idle);
        Ok(())
    }

    async fn abort(&mut self, error: Error) {
        error!(
            "update session {} aborted in state {:?}: {}",
            self.generation, self.state, error
        );
        self.enter(State::Aborted);
        self.release_session().await;
        self.manifest.reset();
        self.report(SessionOutcome::Aborted(Arc::new(error)));
        self.enter(State::Idle);
    }

    fn timeout_error(&self) -> Error {
        let stream = self.state.stream().unwrap_or(StreamKind::Manifest);
        let expected = match stream {
            StreamKind::Manifest => self.manifest.stream().expected(),
            StreamKind::Firmware => self
                .session
                .as_ref()
                .and_then(|s| s.firmware.as_ref())
                .map_or(0, |f| f.stream().expected()),
        };
        Error::BlockTimeout { stream, expected }
    }

    fn inbox(&self, stream: StreamKind, generation: u64, base: &str) -> Result<Inbox> {
        let tx = self.sender.upgrade().ok_or(Error::WorkerStopped)?;
        Ok(Inbox::stream(tx, stream, generation, base))
    }

    async fn open_count(&mut self, stream: StreamKind, topic: &str) -> Result<()> {
        let generation = self.session_mut()?.generation;
        let inbox = self.inbox(stream, generation, topic)?;
        let slot = self.manager.lock().await.subscribe(topic, inbox, false).await?;

        let session = self.session_mut()?;
        session.stream_topic = topic.to_string();
        session.count_slot = Some(slot);
        Ok(())
    }

    async fn open_block(&mut self, stream: StreamKind, index: usize) -> Result<()> {
        let session = self.session_mut()?;
        let generation = session.generation;
        let base = session.stream_topic.clone();
        let topic = blockwise::block_topic(&base, index, self.config.topic_max_len)?;

        let inbox = self.inbox(stream, generation, &base)?;
        let slot = self.manager.lock().await.subscribe(&topic, inbox, false).await?;
        self.session_mut()?.block_slot = Some(slot);
        Ok(())
    }

    async fn release_count_slot(&mut self) {
        let slot = self.session.as_mut().and_then(|s| s.count_slot.take());
        self.release(slot).await;
    }

    async fn release_block_slot(&mut self) {
        let slot = self.session.as_mut().and_then(|s| s.block_slot.take());
        self.release(slot).await;
    }

    async fn release(&mut self, slot: Option<SlotRef>) {
        if let Some(slot) = slot {
            if let Err(e) = self.manager.lock().await.unsubscribe(slot).await {
                warn!("unable to release subscription: {}", e);
            }
        }
    }

    /// Drops the session; partially written firmware is left as-is.
    async fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let count = session.count_slot.take();
            let block = session.block_slot.take();
            self.release(count).await;
            self.release(block).await;
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session<P::Manifest>> {
        self.session.as_mut().ok_or(Error::NoSession)
    }

    fn enter(&mut self, state: State) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
        self.arm_timer();
        self.status.send_modify(|s| s.state = state);
    }

    fn arm_timer(&mut self) {
        self.deadline = match self.config.block_timeout {
            Some(limit) if self.state.awaits_network() => Some(Instant::now() + limit),
            _ => None,
        };
    }

    fn report(&mut self, outcome: SessionOutcome) {
        self.status.send_modify(|s| s.last_outcome = Some(outcome));
    }
}
