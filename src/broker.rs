//! Message broker abstraction used by the queue consumer.
//!
//! [`crate::amqp`] implements these traits on top of lapin; tests use
//! in-memory implementations.

use crate::errors::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Stream of deliveries for one registered consumer.
///
/// Ends when the channel closes; an `Err` item means the channel failed.
pub type DeliveryStream = BoxStream<'static, Result<InboundMessage, AppError>>;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AppError>;

    /// Negative acknowledgement without requeue.
    async fn reject(&self) -> Result<(), AppError>;
}

/// One message received from the queue, together with the handle that
/// settles exactly this delivery.
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub correlation_id: Option<String>,
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(
        delivery_tag: u64,
        correlation_id: Option<String>,
        payload: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            correlation_id,
            payload,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), AppError> {
        self.acker.ack().await
    }

    pub async fn reject(&self) -> Result<(), AppError> {
        self.acker.reject().await
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("delivery_tag", &self.delivery_tag)
            .field("correlation_id", &self.correlation_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection and a channel on it.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, AppError>;
}

/// An open connection/channel pair.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<(), AppError>;

    /// Register a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AppError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), AppError>;

    /// Both the connection and the channel are open.
    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), AppError>;
}
