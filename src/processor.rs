//! Per-message orchestration: validation, rule lookup, decision-engine
//! submission and status-trail updates.
//!
//! `process` never fails. Every error path ends in exactly one terminal
//! Failed entry on the returned request; a successful run ends in one
//! Completed entry. Either way one Started entry precedes it.

use crate::errors::{AppError, ErrorKind};
use crate::gateway_client::CreditGateway;
use crate::models::{CreditRequest, DecisionSubmission};
use crate::status_trail::StatusEntry;
use crate::validator::{self, ValidationFailure};
use chrono::Utc;
use std::sync::Arc;

pub const STARTED_MESSAGE: &str = "Credit request processing started";
pub const COMPLETED_MESSAGE: &str = "Credit engine processed";
pub const RULES_LOOKUP_FAILED: &str = "policy rules lookup failed";
pub const SUBMISSION_FAILED: &str = "decision engine submission failed";

/// Runs one credit request through the worker's pipeline.
pub struct RequestProcessor<G: ?Sized> {
    gateway: Arc<G>,
}

impl<G: CreditGateway + ?Sized> RequestProcessor<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Process `request` and return it with its trail extended.
    pub async fn process(&self, mut request: CreditRequest) -> CreditRequest {
        request
            .status_trail
            .push(StatusEntry::started(STARTED_MESSAGE, request.id));
        if request.started_at.is_none() {
            request.started_at = Some(Utc::now());
        }
        tracing::info!(
            request_id = request.id,
            "Processing credit request for {}",
            request.display_name()
        );

        match self.run(&request).await {
            Ok(()) => {
                request
                    .status_trail
                    .push(StatusEntry::completed(COMPLETED_MESSAGE, request.id));
                request.finished_at = Some(Utc::now());
                tracing::info!(request_id = request.id, "Credit request completed");
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::Validation => tracing::warn!(
                        request_id = request.id,
                        "Invalid credit request for {}: {}",
                        request.display_name(),
                        e
                    ),
                    kind => tracing::error!(
                        request_id = request.id,
                        kind = kind.as_str(),
                        "Credit request failed for {}: {}",
                        request.display_name(),
                        e
                    ),
                }
                request.status_trail.push(failure_entry(&e, request.id));
            }
        }

        request
    }

    async fn run(&self, request: &CreditRequest) -> Result<(), AppError> {
        // Without a source reference there is no record to validate against
        let source_request_id = request
            .source_request_id
            .ok_or(ValidationFailure::AnalysisRequestNotFound)?;
        let source = self.gateway.get_source_record(source_request_id).await;
        validator::validate(request, source.as_ref())?;

        let rules = match request.rule_id {
            Some(rule_id) => self.gateway.get_policy_rules(rule_id).await,
            None => None,
        }
        .ok_or_else(|| AppError::NotFound(RULES_LOOKUP_FAILED.to_string()))?;

        let submission = DecisionSubmission::build(request, &rules, source_request_id);
        self.gateway
            .submit_decision(&submission)
            .await
            .ok_or_else(|| AppError::Transport(SUBMISSION_FAILED.to_string()))?;

        Ok(())
    }
}

/// Failed entry for `err`; validation failures also carry their reason code.
fn failure_entry(err: &AppError, sender_id: i64) -> StatusEntry {
    let entry = StatusEntry::failed(err.status_message(), sender_id);
    match err.validation_failure() {
        Some(failure) => entry.with_reason_code(failure.code()),
        None => entry,
    }
}
