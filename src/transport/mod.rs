use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

mod types;
pub use self::types::{QoS, Route, TopicId};

use crate::blockwise::{self, BlockEvent};
use crate::error::TransportError;
use crate::subscription::SlotRef;
use crate::suit::Event;

/// Publish/subscribe primitives of the gateway-facing transport.
///
/// Delivery is at-least-once and may reorder publishes; incoming traffic is
/// handed to the [`Inbox`] given at subscribe time.
pub trait Transport: Send {
    fn connect(
        &mut self,
        gateway: SocketAddr,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        inbox: Inbox,
    ) -> impl Future<Output = Result<TopicId, TransportError>> + Send;

    fn unsubscribe(&mut self, topic: &str)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    fn register(&mut self, topic: &str)
        -> impl Future<Output = Result<TopicId, TransportError>> + Send;

    fn publish(
        &mut self,
        topic: TopicId,
        data: &[u8],
        qos: QoS,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Hands transport callbacks over to the update worker's event queue.
///
/// Callbacks never touch session buffers; they only enqueue events tagged
/// with the session generation the subscription was made for. Enqueueing
/// never waits: a publish arriving on a full queue is dropped and left to
/// redelivery or the block timeout, since the worker may itself be inside a
/// transport call.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Event>,
    route: Route,
    generation: u64,
    base: Arc<str>,
    slot: Option<SlotRef>,
}

impl Inbox {
    pub(crate) fn trigger(tx: mpsc::Sender<Event>) -> Self {
        Self {
            tx,
            route: Route::Trigger,
            generation: 0,
            base: Arc::from(""),
            slot: None,
        }
    }

    pub(crate) fn stream(
        tx: mpsc::Sender<Event>,
        stream: blockwise::StreamKind,
        generation: u64,
        base: &str,
    ) -> Self {
        Self {
            tx,
            route: Route::Stream(stream),
            generation,
            base: Arc::from(base),
            slot: None,
        }
    }

    pub(crate) fn bind(mut self, slot: SlotRef) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn slot(&self) -> Option<SlotRef> {
        self.slot
    }

    /// PUBLISH received on `topic`.
    pub fn on_publish(&self, topic: &str, data: Bytes) {
        let event = match self.route {
            Route::Trigger => {
                debug!("received PUBLISH for trigger topic '{}'", topic);
                Event::Trigger(data)
            }
            Route::Stream(stream) => match blockwise::classify(&self.base, topic, &data) {
                Ok(BlockEvent::Count(total)) => Event::CountAnnounced {
                    stream,
                    generation: self.generation,
                    total,
                },
                Ok(BlockEvent::Block(index)) => Event::BlockReceived {
                    stream,
                    generation: self.generation,
                    index,
                    payload: data,
                },
                Err(error) => Event::Error {
                    generation: self.generation,
                    error,
                },
            },
        };
        self.deliver(event);
    }

    /// REGISTER received: the gateway bound `alias` to `name`.
    pub fn on_register(&self, alias: TopicId, name: &str) {
        let Some(slot) = self.slot else {
            debug!("ignoring REGISTER of '{}' on unbound inbox", name);
            return;
        };
        self.deliver(Event::Registered {
            slot,
            alias,
            name: name.to_string(),
        });
    }

    fn deliver(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                error!("Failed to forward event to update worker: queue closed");
            }
        }
    }
}
