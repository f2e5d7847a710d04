use std::net::SocketAddr;

use log::{debug, error, info, warn};

mod pool;
pub use self::pool::{Alias, Allocation, EvictionPolicy, SlotRef, TopicPool};

use crate::error::{ConnectError, Error, Result, SubscribeError, TransportError};
use crate::suit::SuitConfig;
use crate::transport::{Inbox, QoS, TopicId, Transport};

/// Owns the transport, the topic pool and the last known good gateway.
pub struct SubscriptionManager<T> {
    transport: T,
    pool: TopicPool,
    gateway: Option<SocketAddr>,
    qos: QoS,
}

impl<T: Transport> SubscriptionManager<T> {
    pub fn new(transport: T, config: &SuitConfig) -> Self {
        Self {
            transport,
            pool: TopicPool::new(
                config.subscription_slots,
                config.topic_max_len,
                config.aliases_per_slot,
                config.eviction,
            ),
            gateway: None,
            qos: config.qos,
        }
    }

    pub fn last_known_good_gateway(&self) -> Option<SocketAddr> {
        self.gateway
    }

    pub fn pool(&self) -> &TopicPool {
        &self.pool
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects to `gateway`, remembering it only on success.
    pub async fn connect(&mut self, gateway: SocketAddr) -> std::result::Result<(), ConnectError> {
        match self.transport.connect(gateway).await {
            Ok(()) => {
                info!("connected to gateway at {}", gateway);
                self.gateway = Some(gateway);
                Ok(())
            }
            Err(source) => {
                let err = ConnectError { gateway, source };
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Subscribes `topic`, feeding publishes into `inbox`.
    ///
    /// A gateway-disconnected rejection triggers exactly one reconnect to the
    /// last known good gateway followed by one retry.
    pub async fn subscribe(
        &mut self,
        topic: &str,
        inbox: Inbox,
        pinned: bool,
    ) -> std::result::Result<SlotRef, SubscribeError> {
        let max = self.pool.topic_max_len();
        if topic.len() > max {
            error!(
                "unable to subscribe to topic '{}': max length exceeded ({}/{})",
                topic,
                topic.len(),
                max
            );
            return Err(SubscribeError::TopicTooLong {
                topic: topic.to_string(),
                len: topic.len(),
                max,
            });
        }

        let capacity = self.pool.capacity();
        let allocation = self
            .pool
            .allocate_or_reuse(topic, pinned)
            .map_err(|e| match e {
                Error::TopicTooLong { len, max } => SubscribeError::TopicTooLong {
                    topic: topic.to_string(),
                    len,
                    max,
                },
                _ => SubscribeError::CapacityExceeded { capacity },
            })?;

        if let Some(evicted) = &allocation.evicted {
            info!("evicting subscription to '{}' for '{}'", evicted, topic);
            if let Err(e) = self.transport.unsubscribe(evicted).await {
                warn!("unable to unsubscribe from topic '{}': {}", evicted, e);
            }
        }

        let slot = allocation.slot;
        match self.subscribe_with_retry(topic, inbox.bind(slot)).await {
            Ok(id) => {
                info!("subscribed to topic '{}' (ID {})", topic, id);
                Ok(slot)
            }
            Err(e) => {
                if !allocation.reused {
                    self.pool.release(slot);
                }
                Err(e)
            }
        }
    }

    async fn subscribe_with_retry(
        &mut self,
        topic: &str,
        inbox: Inbox,
    ) -> std::result::Result<TopicId, SubscribeError> {
        match self.transport.subscribe(topic, self.qos, inbox.clone()).await {
            Ok(id) => return Ok(id),
            Err(TransportError::GatewayDisconnected) => {
                error!("unable to subscribe to topic '{}': gateway disconnected", topic);
            }
            Err(e) => {
                error!("unable to subscribe to topic '{}': {}", topic, e);
                return Err(SubscribeError::Rejected(e));
            }
        }

        let Some(gateway) = self.gateway else {
            error!("no known gateway to reconnect to");
            return Err(SubscribeError::GatewayUnreachable);
        };

        info!("gateway disconnected, trying to reconnect");
        if let Err(e) = self.transport.connect(gateway).await {
            error!("reconnect to gateway failed: {}", e);
            return Err(SubscribeError::GatewayUnreachable);
        }
        info!("successfully reconnected to gateway");

        match self.transport.subscribe(topic, self.qos, inbox).await {
            Ok(id) => Ok(id),
            Err(TransportError::GatewayDisconnected) => {
                error!("gateway disconnected again, giving up on '{}'", topic);
                Err(SubscribeError::GatewayUnreachable)
            }
            Err(e) => {
                error!("unable to subscribe to topic '{}': {}", topic, e);
                Err(SubscribeError::Rejected(e))
            }
        }
    }

    /// Releases `slot` and unsubscribes its topic. Stale handles are a no-op.
    pub async fn unsubscribe(&mut self, slot: SlotRef) -> Result<()> {
        let Some(topic) = self.pool.release(slot) else {
            return Ok(());
        };
        self.transport.unsubscribe(&topic).await?;
        debug!("unsubscribed from topic '{}'", topic);
        Ok(())
    }

    pub fn register_alias(&mut self, slot: SlotRef, alias: TopicId, name: &str) -> Result<()> {
        self.pool.register_alias(slot, alias, name)?;
        debug!("registered topic '{}' as ID {}", name, alias);
        Ok(())
    }

    /// Registers `topic` and publishes `data` to it.
    pub async fn publish(&mut self, topic: &str, data: &[u8]) -> Result<()> {
        let id = self.transport.register(topic).await.map_err(|e| {
            error!("unable to reg topic ID for {}: {}", topic, e);
            e
        })?;
        self.transport
            .publish(id, data, self.qos)
            .await
            .map_err(|e| {
                error!("unable to publish to {}: {}", topic, e);
                e
            })?;
        Ok(())
    }
}
