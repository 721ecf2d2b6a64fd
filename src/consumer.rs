//! Queue consumer: owns the broker session, hands each delivery to the
//! request processor and keeps itself alive with a periodic health check.
//!
//! # States
//!
//! - **Disconnected**: no session.
//! - **Connecting**: `start` is opening a connection and registering.
//! - **Consuming**: a channel is open and the dispatcher task is draining it.
//!
//! The session handle sits behind a single async mutex. `start`, `stop`,
//! `is_connected` and `publish` all go through it, so no two paths ever open
//! or tear down the connection at the same time.
//!
//! # Message handling
//!
//! Deliveries are handled one at a time in arrival order:
//! 1. undecodable payload: ack and skip
//! 2. process, then persist the result through the Gateway, then ack
//! 3. persist failure or panic: reject without requeue (the message is dropped)
//!
//! Stopping a session lets the in-flight delivery finish for up to
//! `shutdown_grace` before the dispatcher is aborted.

use crate::broker::{Broker, BrokerChannel, DeliveryStream, InboundMessage};
use crate::config::{ConsumerTiming, MessageSettings};
use crate::errors::{AppError, ResultExt};
use crate::gateway_client::CreditGateway;
use crate::models::CreditRequest;
use crate::processor::RequestProcessor;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Consuming,
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and persisted, then acknowledged.
    Acked,
    /// Payload could not be decoded; acknowledged without processing.
    Discarded,
    /// Processing or persistence failed; rejected without requeue.
    Rejected,
}

/// Decodes, processes and settles one delivery at a time.
pub struct MessageHandler<G: ?Sized> {
    processor: RequestProcessor<G>,
    gateway: Arc<G>,
}

impl<G: CreditGateway + ?Sized> MessageHandler<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            processor: RequestProcessor::new(gateway.clone()),
            gateway,
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> Disposition {
        let span = tracing::info_span!(
            "delivery",
            delivery_tag = message.delivery_tag,
            correlation_id = message.correlation_id.as_deref().unwrap_or("-")
        );
        self.settle(message).instrument(span).await
    }

    async fn settle(&self, message: InboundMessage) -> Disposition {
        tracing::info!("Message received");

        let request = match decode(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Invalid message received, discarding: {}", e);
                if let Err(e) = message.ack().await {
                    tracing::error!("Failed to ack invalid message: {}", e);
                }
                return Disposition::Discarded;
            }
        };

        let outcome = AssertUnwindSafe(self.process_and_persist(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AppError::Internal("panic while processing message".to_string())));

        match outcome {
            Ok(()) => {
                if let Err(e) = message.ack().await {
                    tracing::error!("Failed to ack message: {}", e);
                }
                Disposition::Acked
            }
            Err(e) => {
                tracing::error!("Error processing message, rejecting without requeue: {}", e);
                if let Err(e) = message.reject().await {
                    tracing::error!("Failed to reject message: {}", e);
                }
                Disposition::Rejected
            }
        }
    }

    async fn process_and_persist(&self, request: CreditRequest) -> Result<(), AppError> {
        let processed = self.processor.process(request).await;
        let request_id = processed.id;

        self.gateway
            .update_status(&processed)
            .await
            .ok_or_else(|| {
                AppError::Transport(format!(
                    "failed to persist status trail for request {}",
                    request_id
                ))
            })?;

        tracing::info!(request_id, "Status trail persisted");
        Ok(())
    }
}

/// Decode a delivery body. Only a JSON object is a credit request.
fn decode(payload: &[u8]) -> Result<CreditRequest, AppError> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(AppError::Internal(
            "message body is not a JSON object".to_string(),
        ));
    }
    Ok(serde_json::from_value(value)?)
}

struct Dispatcher {
    task: JoinHandle<()>,
    /// Stops the task from taking further deliveries.
    stop: CancellationToken,
}

struct Session {
    channel: Arc<dyn BrokerChannel>,
    /// `None` for publish-only sessions.
    dispatcher: Option<Dispatcher>,
}

impl Session {
    fn is_consuming(&self) -> bool {
        self.channel.is_open()
            && self
                .dispatcher
                .as_ref()
                .map(|d| !d.task.is_finished())
                .unwrap_or(false)
    }

    /// Drain the in-flight delivery for up to `grace`, then close. Close
    /// errors are logged and swallowed.
    async fn shutdown(self, grace: Duration) {
        if let Some(dispatcher) = self.dispatcher {
            dispatcher.stop.cancel();
            let mut task = dispatcher.task;
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::warn!(
                    "In-flight message did not finish within {:?}, aborting",
                    grace
                );
                task.abort();
            }
        }
        if let Err(e) = self.channel.close().await {
            tracing::error!("Error closing broker channel: {}", e);
        }
    }
}

/// Closes a freshly opened channel if registration never completes,
/// including when the registering future is dropped.
struct PendingChannel {
    channel: Arc<dyn BrokerChannel>,
    armed: bool,
}

impl PendingChannel {
    fn new(channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            channel,
            armed: true,
        }
    }

    fn disarm(mut self) -> Arc<dyn BrokerChannel> {
        self.armed = false;
        self.channel.clone()
    }
}

impl Drop for PendingChannel {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let channel = self.channel.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = channel.close().await {
                        tracing::warn!("Error closing abandoned channel: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime to close abandoned channel"),
        }
    }
}

/// Single consumer for the credit-engine queue.
pub struct QueueConsumer<G: ?Sized> {
    settings: MessageSettings,
    timing: ConsumerTiming,
    broker: Arc<dyn Broker>,
    handler: Arc<MessageHandler<G>>,
    session: Mutex<Option<Session>>,
    state: watch::Sender<ConsumerState>,
}

impl<G: CreditGateway + ?Sized + 'static> QueueConsumer<G> {
    pub fn new(
        settings: MessageSettings,
        timing: ConsumerTiming,
        broker: Arc<dyn Broker>,
        gateway: Arc<G>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            settings,
            timing,
            broker,
            handler: Arc::new(MessageHandler::new(gateway)),
            session: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Connect, declare the queue and register the consumer.
    ///
    /// A no-op while already consuming. Any failure is returned to the
    /// caller; retrying is up to the caller.
    pub async fn start(&self) -> Result<(), AppError> {
        let mut session = self.session.lock().await;

        if session.as_ref().map(Session::is_consuming).unwrap_or(false) {
            tracing::debug!("Consumer already running on {}", self.settings.queue);
            return Ok(());
        }
        if let Some(stale) = session.take() {
            stale.shutdown(self.timing.shutdown_grace).await;
        }

        self.state.send_replace(ConsumerState::Connecting);
        match self.open_session().await {
            Ok(opened) => {
                *session = Some(opened);
                self.state.send_replace(ConsumerState::Consuming);
                tracing::info!("Consumer started. Queue: {}", self.settings.queue);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConsumerState::Disconnected);
                tracing::error!("Failed to start consumer: {}", e);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<Session, AppError> {
        let channel = self
            .broker
            .connect()
            .await
            .context("Failed to connect to broker")?;

        let pending = PendingChannel::new(channel);

        let consumer_tag = format!("credit-engine-worker-{}", Uuid::new_v4());
        let registered = async {
            pending
                .channel
                .declare_queue(&self.settings.queue)
                .await
                .context("Failed to set up queue")?;
            pending
                .channel
                .consume(&self.settings.queue, &consumer_tag)
                .await
                .context("Failed to register consumer")
        }
        .await;

        let channel = pending.disarm();
        let deliveries = match registered {
            Ok(deliveries) => deliveries,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    tracing::warn!("Error closing channel after failed start: {}", close_err);
                }
                return Err(e);
            }
        };

        let stop = CancellationToken::new();
        let task = tokio::spawn(dispatch(self.handler.clone(), deliveries, stop.clone()));
        Ok(Session {
            channel,
            dispatcher: Some(Dispatcher { task, stop }),
        })
    }

    /// Close the channel and connection if open. Idempotent.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Some(current) = session.take() {
            current.shutdown(self.timing.shutdown_grace).await;
            tracing::info!("Consumer stopped");
        }
        self.state.send_replace(ConsumerState::Disconnected);
    }

    /// True while the channel is open and deliveries are being drained.
    pub async fn is_connected(&self) -> bool {
        let session = self.session.lock().await;
        session.as_ref().map(Session::is_consuming).unwrap_or(false)
    }

    /// Publish `message` as JSON to the configured exchange.
    ///
    /// Opens a publish-only connection when no channel is open.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        message: &T,
        routing_key: &str,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_vec(message)?;
        let mut session = self.session.lock().await;

        let channel = match session.as_ref() {
            Some(current) if current.channel.is_open() => current.channel.clone(),
            _ => {
                if let Some(stale) = session.take() {
                    stale.shutdown(self.timing.shutdown_grace).await;
                    self.state.send_replace(ConsumerState::Disconnected);
                }
                let channel = self
                    .broker
                    .connect()
                    .await
                    .context("Failed to connect to broker for publish")?;
                *session = Some(Session {
                    channel: channel.clone(),
                    dispatcher: None,
                });
                channel
            }
        };

        channel
            .publish(&self.settings.exchange, routing_key, payload)
            .await
            .with_context(|| format!("Failed to publish message. RoutingKey: {}", routing_key))?;

        tracing::debug!("Message published. RoutingKey: {}", routing_key);
        Ok(())
    }

    /// Run until `cancel` fires: start consuming, then check liveness every
    /// `health_check_interval` and restart after `reconnect_backoff` when the
    /// session is dead.
    ///
    /// Only the first `start` failure is returned; later restart failures are
    /// logged and retried on the next check. The session is always stopped
    /// before this returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AppError> {
        tracing::info!("Credit engine consumer loop started");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Consumer cancelled before start");
                return Ok(());
            }
            _ = tokio::time::sleep(self.timing.startup_delay) => {}
        }

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.start() => Some(result),
        };
        match started {
            None => {
                self.stop().await;
                tracing::info!("Consumer cancelled during start");
                return Ok(());
            }
            Some(Err(e)) => {
                self.stop().await;
                return Err(e);
            }
            Some(Ok(())) => {
                tracing::info!(
                    "Worker ready to process messages from queue: {}",
                    self.settings.queue
                );
            }
        }

        loop {
            if !self.is_connected().await {
                tracing::warn!("Connection to broker lost. Reconnecting...");
                self.stop().await;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.timing.reconnect_backoff) => {}
                }

                let restarted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = self.start() => result,
                };
                match restarted {
                    Ok(()) => tracing::info!("Reconnected to broker"),
                    Err(e) => tracing::error!("Error reconnecting to broker: {}", e),
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timing.health_check_interval) => {}
            }
        }

        tracing::info!("Consumer cancelled");
        self.stop().await;
        Ok(())
    }
}

async fn dispatch<G>(
    handler: Arc<MessageHandler<G>>,
    mut deliveries: DeliveryStream,
    stop: CancellationToken,
) where
    G: CreditGateway + ?Sized,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                tracing::debug!("Dispatcher stopped");
                return;
            }
            next = deliveries.next() => next,
        };
        match next {
            Some(Ok(message)) => {
                handler.handle(message).await;
            }
            Some(Err(e)) => {
                tracing::error!("Delivery stream failed: {}", e);
                break;
            }
            None => break,
        }
    }
    tracing::warn!("Delivery stream ended");
}
