//! Credit Engine Worker Library
//!
//! Background worker that consumes credit-evaluation requests from a
//! RabbitMQ queue, validates them against the originating system, forwards
//! eligible requests to the credit decision engine and writes the resulting
//! status trail back through the Gateway API.
//!
//! # Modules
//!
//! - `core`: Request processing domain (models, validation, processor).
//! - `integrations`: External systems (Gateway API, AMQP broker).
//! - `amqp`: lapin-backed broker implementation.
//! - `broker`: Broker abstraction used by the consumer.
//! - `config`: Configuration management.
//! - `consumer`: Queue consumer and health/reconnect loop.
//! - `errors`: Error handling types.
//! - `gateway_client`: Gateway API client.
//! - `models`: Queue and API data models.
//! - `processor`: Per-message request processing.
//! - `status_trail`: Append-only status trail.
//! - `telemetry`: Logging setup.
//! - `validator`: Credit request validation.

pub mod core;
pub mod integrations;

pub mod amqp;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod gateway_client;
pub mod models;
pub mod processor;
pub mod status_trail;
pub mod telemetry;
pub mod validator;
