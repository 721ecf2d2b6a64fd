/// Request processor tests with an in-memory Gateway
/// Covers every terminal path of the pipeline and the append-only trail
mod common;

use common::{GatewayCall, RecordingGateway};
use credit_engine_worker::core::models::{CreditRequest, PolicyRules};
use credit_engine_worker::core::processor::{
    RequestProcessor, COMPLETED_MESSAGE, RULES_LOOKUP_FAILED, STARTED_MESSAGE, SUBMISSION_FAILED,
};
use credit_engine_worker::core::status_trail::{StatusEntry, TaskStatus};
use credit_engine_worker::core::validator::ValidationFailure;
use std::sync::Arc;

const CORPORATE_DOC: &str = "12345678000199";
const INDIVIDUAL_DOC: &str = "12345678901";

fn request(individual: Option<i64>, corporate: Option<i64>) -> CreditRequest {
    CreditRequest {
        id: 55,
        policy_id_individual: individual,
        policy_id_corporate: corporate,
        source_request_id: Some(10),
        rule_id: Some(5),
        requester_name: Some("ACME LTDA".to_string()),
        ..Default::default()
    }
}

async fn process(
    gateway: RecordingGateway,
    req: CreditRequest,
) -> (Arc<RecordingGateway>, CreditRequest) {
    let gateway = Arc::new(gateway);
    let processor = RequestProcessor::new(gateway.clone());
    let processed = processor.process(req).await;
    (gateway, processed)
}

fn statuses(req: &CreditRequest) -> Vec<TaskStatus> {
    req.status_trail.iter().map(|e| e.status).collect()
}

#[tokio::test]
async fn test_corporate_request_completes() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules(5, Some(99))
        .accepting_decisions();

    let (gateway, processed) = process(gateway, request(None, Some(7))).await;

    assert_eq!(
        statuses(&processed),
        vec![TaskStatus::Started, TaskStatus::Completed]
    );
    let last = processed.status_trail.last().unwrap();
    assert_eq!(last.message.as_deref(), Some(COMPLETED_MESSAGE));
    assert_eq!(last.sender_id, 55);
    assert!(processed.started_at.is_some());
    assert!(processed.finished_at.is_some());

    let submissions = gateway.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].target_ids, vec![10]);
    assert_eq!(submissions[0].searched_item, 99);
    assert_eq!(submissions[0].policy_id_corporate, Some(7));
    assert_eq!(submissions[0].use_only_internal_data, Some(false));
    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::GetSourceRecord(10),
            GatewayCall::GetPolicyRules(5),
            GatewayCall::SubmitDecision,
        ]
    );
}

#[tokio::test]
async fn test_individual_document_without_individual_policy_fails() {
    let gateway = RecordingGateway::new()
        .with_source(10, INDIVIDUAL_DOC)
        .with_rules(5, Some(99))
        .accepting_decisions();

    let (gateway, processed) = process(gateway, request(None, Some(7))).await;

    assert_eq!(
        statuses(&processed),
        vec![TaskStatus::Started, TaskStatus::Failed]
    );
    let last = processed.status_trail.last().unwrap();
    assert_eq!(
        last.reason_code.as_deref(),
        Some(ValidationFailure::CreditPolicyPfIdRequired.code())
    );
    assert_eq!(
        last.message.as_deref(),
        Some(ValidationFailure::CreditPolicyPfIdRequired.message())
    );
    assert!(processed.finished_at.is_none());
    // Validation runs before any rule lookup
    assert_eq!(gateway.calls(), vec![GatewayCall::GetSourceRecord(10)]);
    assert!(gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_source_record_fails_without_submission() {
    let gateway = RecordingGateway::new()
        .with_rules(5, Some(99))
        .accepting_decisions();

    let (gateway, processed) = process(gateway, request(Some(3), Some(7))).await;

    assert_eq!(processed.status_trail.len(), 2);
    let last = processed.status_trail.last().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.reason_code.as_deref(), Some("ANALYSIS_REQUEST_NOT_FOUND"));
    assert!(gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_source_reference_makes_no_gateway_calls() {
    let gateway = RecordingGateway::new().accepting_decisions();
    let req = CreditRequest {
        source_request_id: None,
        ..request(Some(3), Some(7))
    };

    let (gateway, processed) = process(gateway, req).await;

    assert_eq!(
        processed.status_trail.last().unwrap().reason_code.as_deref(),
        Some("ANALYSIS_REQUEST_NOT_FOUND")
    );
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_empty_document_fails() {
    let gateway = RecordingGateway::new()
        .with_source(10, "")
        .with_rules(5, Some(99))
        .accepting_decisions();

    let (_, processed) = process(gateway, request(Some(3), Some(7))).await;

    assert_eq!(
        processed.status_trail.last().unwrap().reason_code.as_deref(),
        Some("DOCUMENT_REQUIRED")
    );
}

#[tokio::test]
async fn test_rules_lookup_failure_skips_submission() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .accepting_decisions();

    let (gateway, processed) = process(gateway, request(None, Some(7))).await;

    assert_eq!(
        statuses(&processed),
        vec![TaskStatus::Started, TaskStatus::Failed]
    );
    let last = processed.status_trail.last().unwrap();
    assert_eq!(last.message.as_deref(), Some(RULES_LOOKUP_FAILED));
    assert_eq!(last.reason_code, None);
    assert!(gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_rule_id_is_a_rules_lookup_failure() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules(5, Some(99))
        .accepting_decisions();
    let req = CreditRequest {
        rule_id: None,
        ..request(None, Some(7))
    };

    let (gateway, processed) = process(gateway, req).await;

    assert_eq!(
        processed.status_trail.last().unwrap().message.as_deref(),
        Some(RULES_LOOKUP_FAILED)
    );
    assert!(!gateway.calls().contains(&GatewayCall::GetPolicyRules(5)));
}

#[tokio::test]
async fn test_decision_engine_failure() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules(5, Some(99));

    let (gateway, processed) = process(gateway, request(None, Some(7))).await;

    let last = processed.status_trail.last().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.message.as_deref(), Some(SUBMISSION_FAILED));
    assert_eq!(gateway.submissions().len(), 1);
    assert!(processed.finished_at.is_none());
}

#[tokio::test]
async fn test_report_reference_defaults_to_zero() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules_record(PolicyRules {
            id: 5,
            use_internal_data: Some(true),
            report_reference: None,
            ..Default::default()
        })
        .accepting_decisions();

    let (gateway, _) = process(gateway, request(None, Some(7))).await;

    let submissions = gateway.submissions();
    assert_eq!(submissions[0].searched_item, 0);
    assert_eq!(submissions[0].use_only_internal_data, Some(true));
}

#[tokio::test]
async fn test_existing_trail_is_preserved() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules(5, Some(99))
        .accepting_decisions();
    let mut req = request(None, Some(7));
    req.status_trail.push(StatusEntry::started("earlier run", 55));
    req.status_trail.push(StatusEntry::failed("earlier failure", 55));
    let before: Vec<StatusEntry> = req.status_trail.entries().to_vec();

    let (_, processed) = process(gateway, req).await;

    assert_eq!(processed.status_trail.len(), before.len() + 2);
    assert_eq!(&processed.status_trail.entries()[..before.len()], &before[..]);
    let started = &processed.status_trail.entries()[before.len()];
    assert_eq!(started.status, TaskStatus::Started);
    assert_eq!(started.message.as_deref(), Some(STARTED_MESSAGE));
}

#[tokio::test]
async fn test_started_at_is_not_overwritten() {
    let gateway = RecordingGateway::new()
        .with_source(10, CORPORATE_DOC)
        .with_rules(5, Some(99))
        .accepting_decisions();
    let started_at = chrono::Utc::now() - chrono::Duration::hours(1);
    let req = CreditRequest {
        started_at: Some(started_at),
        ..request(None, Some(7))
    };

    let (_, processed) = process(gateway, req).await;

    assert_eq!(processed.started_at, Some(started_at));
}
