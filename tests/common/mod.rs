//! In-memory doubles for the Gateway and the broker.
#![allow(dead_code)]

use async_trait::async_trait;
use credit_engine_worker::broker::{
    Acknowledger, Broker, BrokerChannel, DeliveryStream, InboundMessage,
};
use credit_engine_worker::config::{ConsumerTiming, MessageSettings};
use credit_engine_worker::errors::AppError;
use credit_engine_worker::gateway_client::CreditGateway;
use credit_engine_worker::models::{CreditRequest, DecisionSubmission, PolicyRules, SourceRecord};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============ Gateway ============

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    GetSourceRecord(i64),
    GetPolicyRules(i64),
    SubmitDecision,
    UpdateStatus(i64),
}

/// Gateway double that answers from canned data and records every call.
#[derive(Default)]
pub struct RecordingGateway {
    source_records: Mutex<HashMap<i64, SourceRecord>>,
    policy_rules: Mutex<HashMap<i64, PolicyRules>>,
    accept_decisions: AtomicBool,
    persist_succeeds: AtomicBool,
    submit_delay: Mutex<Duration>,
    pub calls: Mutex<Vec<GatewayCall>>,
    pub submissions: Mutex<Vec<DecisionSubmission>>,
    pub persisted: Mutex<Vec<CreditRequest>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, id: i64, document: &str) -> Self {
        self.source_records.lock().unwrap().insert(
            id,
            SourceRecord {
                id,
                document: Some(document.to_string()),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_rules(self, id: i64, report_reference: Option<i64>) -> Self {
        self.policy_rules.lock().unwrap().insert(
            id,
            PolicyRules {
                id,
                report_reference,
                is_active: true,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_rules_record(self, rules: PolicyRules) -> Self {
        self.policy_rules.lock().unwrap().insert(rules.id, rules);
        self
    }

    pub fn accepting_decisions(self) -> Self {
        self.accept_decisions.store(true, Ordering::SeqCst);
        self
    }

    /// Make the decision engine take `delay` to answer.
    pub fn with_submit_delay(self, delay: Duration) -> Self {
        *self.submit_delay.lock().unwrap() = delay;
        self
    }

    pub fn persisting(self) -> Self {
        self.persist_succeeds.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<DecisionSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn persisted(&self) -> Vec<CreditRequest> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CreditGateway for RecordingGateway {
    async fn get_source_record(&self, source_request_id: i64) -> Option<SourceRecord> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::GetSourceRecord(source_request_id));
        self.source_records
            .lock()
            .unwrap()
            .get(&source_request_id)
            .cloned()
    }

    async fn get_policy_rules(&self, rules_id: i64) -> Option<PolicyRules> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::GetPolicyRules(rules_id));
        self.policy_rules.lock().unwrap().get(&rules_id).cloned()
    }

    async fn submit_decision(&self, submission: &DecisionSubmission) -> Option<SourceRecord> {
        self.calls.lock().unwrap().push(GatewayCall::SubmitDecision);
        self.submissions.lock().unwrap().push(submission.clone());
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.accept_decisions.load(Ordering::SeqCst) {
            Some(SourceRecord {
                id: submission.target_ids.first().copied().unwrap_or_default(),
                ..Default::default()
            })
        } else {
            None
        }
    }

    async fn update_status(&self, request: &CreditRequest) -> Option<CreditRequest> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::UpdateStatus(request.id));
        if self.persist_succeeds.load(Ordering::SeqCst) {
            self.persisted.lock().unwrap().push(request.clone());
            Some(request.clone())
        } else {
            None
        }
    }
}

// ============ Broker ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked(u64),
    Rejected(u64),
}

type SettlementLog = Arc<Mutex<Vec<Settlement>>>;

struct RecordingAcker {
    tag: u64,
    log: SettlementLog,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), AppError> {
        self.log.lock().unwrap().push(Settlement::Acked(self.tag));
        Ok(())
    }

    async fn reject(&self) -> Result<(), AppError> {
        self.log.lock().unwrap().push(Settlement::Rejected(self.tag));
        Ok(())
    }
}

/// Builds a message whose settlement lands in `log`.
pub fn message(tag: u64, payload: &[u8], log: &SettlementLog) -> InboundMessage {
    InboundMessage::new(
        tag,
        Some(format!("corr-{}", tag)),
        payload.to_vec(),
        Box::new(RecordingAcker {
            tag,
            log: log.clone(),
        }),
    )
}

pub fn settlement_log() -> SettlementLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Channel double backed by an unbounded mpsc queue.
pub struct InMemoryChannel {
    open: AtomicBool,
    next_tag: AtomicU64,
    sender: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    declared: Arc<Mutex<HashSet<String>>>,
    declare_calls: Arc<AtomicUsize>,
    hang_on_declare: bool,
    pub settlements: SettlementLog,
    pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub close_calls: AtomicUsize,
}

impl InMemoryChannel {
    /// Push a delivery to the registered consumer.
    pub fn deliver(&self, payload: &[u8]) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let msg = message(tag, payload, &self.settlements);
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(msg);
        }
        tag
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), AppError> {
        self.declare_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_declare {
            std::future::pending::<()>().await;
        }
        self.declared.lock().unwrap().insert(queue.to_string());
        Ok(())
    }

    async fn consume(&self, _queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (Ok::<_, AppError>(msg), rx))
        })
        .boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), AppError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(AppError::Broker("channel closed".to_string()));
        }
        self.published.lock().unwrap().push((
            exchange.to_string(),
            routing_key.to_string(),
            payload,
        ));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

/// Broker double; every `connect` yields a fresh [`InMemoryChannel`].
#[derive(Default)]
pub struct InMemoryBroker {
    refuse_connections: AtomicBool,
    hang_on_declare: AtomicBool,
    pub connect_attempts: AtomicUsize,
    pub declare_calls: Arc<AtomicUsize>,
    declared: Arc<Mutex<HashSet<String>>>,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Channels opened from now on never finish declaring a queue.
    pub fn hang_on_declare(&self, hang: bool) {
        self.hang_on_declare.store(hang, Ordering::SeqCst);
    }

    pub fn channels(&self) -> Vec<Arc<InMemoryChannel>> {
        self.channels.lock().unwrap().clone()
    }

    pub fn latest_channel(&self) -> Option<Arc<InMemoryChannel>> {
        self.channels.lock().unwrap().last().cloned()
    }

    pub fn connects(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn declared_queues(&self) -> HashSet<String> {
        self.declared.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, AppError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(AppError::Broker("connection refused".to_string()));
        }
        let channel = Arc::new(InMemoryChannel {
            open: AtomicBool::new(true),
            next_tag: AtomicU64::new(0),
            sender: Mutex::new(None),
            declared: self.declared.clone(),
            declare_calls: self.declare_calls.clone(),
            hang_on_declare: self.hang_on_declare.load(Ordering::SeqCst),
            settlements: settlement_log(),
            published: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        });
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }
}

// ============ Fixtures ============

pub fn message_settings() -> MessageSettings {
    MessageSettings {
        hostname: "localhost".to_string(),
        port: 5672,
        username: "guest".to_string(),
        password: "guest".to_string(),
        url: None,
        queue: "credit-engine-requests".to_string(),
        exchange: "credit-engine".to_string(),
        routing_key: "credit.request".to_string(),
    }
}

pub fn fast_timing() -> ConsumerTiming {
    ConsumerTiming {
        startup_delay: Duration::from_millis(0),
        health_check_interval: Duration::from_millis(20),
        reconnect_backoff: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// Poll `condition` every 10ms for up to 2 seconds.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
