use crate::broker::{Acknowledger, Broker, BrokerChannel, DeliveryStream, InboundMessage};
use crate::config::MessageSettings;
use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;

const CLOSE_REPLY_CODE: u16 = 200;
const CLOSE_REPLY_TEXT: &str = "credit engine worker shutdown";

/// RabbitMQ broker reached over AMQP 0-9-1.
pub struct AmqpBroker {
    uri: String,
    redacted_uri: String,
}

impl AmqpBroker {
    pub fn new(settings: &MessageSettings) -> Self {
        Self {
            uri: settings.connection_uri(),
            redacted_uri: settings.redacted_uri(),
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, AppError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .with_context(|| format!("Failed to connect to {}", self.redacted_uri))?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open channel")?;

        tracing::info!("Connection to broker established: {}", self.redacted_uri);
        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

/// A lapin connection with the single channel the worker uses.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), AppError> {
        let options = QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .with_context(|| format!("Failed to declare queue {}", queue))?;

        tracing::info!("Queue declared: {}", queue);
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AppError> {
        let options = BasicConsumeOptions {
            no_ack: false,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .with_context(|| format!("Failed to register consumer on {}", queue))?;

        tracing::info!("Consumer {} registered on {}", consumer_tag, queue);
        Ok(consumer
            .map(|delivery| delivery.map(inbound).map_err(AppError::from))
            .boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), AppError> {
        let properties = BasicProperties::default().with_content_type("application/json".into());
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .with_context(|| format!("Failed to publish with routing key {}", routing_key))?
            .await
            .context("Publisher confirmation failed")?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Close the channel, then the connection. Both are attempted; the first
    /// error is returned.
    async fn close(&self) -> Result<(), AppError> {
        let channel_closed = if self.channel.status().connected() {
            self.channel
                .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
                .await
                .context("Failed to close channel")
        } else {
            Ok(())
        };
        let connection_closed = if self.connection.status().connected() {
            self.connection
                .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
                .await
                .context("Failed to close connection")
        } else {
            Ok(())
        };
        first_error(channel_closed, connection_closed)
    }
}

/// Log every failure and return the first one.
fn first_error(first: Result<(), AppError>, second: Result<(), AppError>) -> Result<(), AppError> {
    for result in [&first, &second] {
        if let Err(e) = result {
            tracing::warn!("{}", e);
        }
    }
    first.and(second)
}

fn inbound(delivery: Delivery) -> InboundMessage {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string());
    InboundMessage::new(
        delivery.delivery_tag,
        correlation_id,
        delivery.data,
        Box::new(AmqpAcker(delivery.acker)),
    )
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), AppError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to ack delivery")?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), AppError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue: false,
        };
        self.0
            .nack(options)
            .await
            .context("Failed to nack delivery")?;
        Ok(())
    }
}
