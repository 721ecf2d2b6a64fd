use crate::config::ApiSettings;
use crate::errors::AppError;
use crate::models::{CreditRequest, DecisionSubmission, PolicyRules, SourceRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

const USER_AGENT: &str = "LMS-CreditEngine-Worker/1.0";
const API_PREFIX: &str = "workerIntegration";

/// The four Gateway operations the worker depends on.
///
/// Every failure (transport error, non-2xx status, empty body, undecodable
/// body) surfaces as `None`; implementations log the cause.
#[async_trait]
pub trait CreditGateway: Send + Sync {
    /// Fetch the analysis request a credit request refers to.
    async fn get_source_record(&self, source_request_id: i64) -> Option<SourceRecord>;

    /// Fetch credit policy rules by id.
    async fn get_policy_rules(&self, rules_id: i64) -> Option<PolicyRules>;

    /// Submit a request to the decision engine.
    async fn submit_decision(&self, submission: &DecisionSubmission) -> Option<SourceRecord>;

    /// Persist the request with its updated status trail; echoes the stored request.
    async fn update_status(&self, request: &CreditRequest) -> Option<CreditRequest>;
}

/// Client for the Gateway REST API.
#[derive(Clone)]
pub struct ApiGatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiGatewayClient {
    /// Creates a new `ApiGatewayClient`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Base URL and per-request timeout.
    pub fn new(settings: &ApiSettings) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, endpoint)
    }

    /// Sends one request and decodes the JSON response.
    ///
    /// Non-2xx and empty bodies map to `NotFound`, connection errors and
    /// timeouts to `Transport`, undecodable bodies to `Internal`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, AppError> {
        let url = self.endpoint_url(endpoint);
        tracing::debug!("Sending request: {} {}", method, url);

        let mut request = self.client.request(method.clone(), &url).query(query);
        if let Some(ref json) = body {
            tracing::debug!("Request body: {}", json);
            request = request.json(json);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::error!("Timeout sending request to {}: {}", url, e);
                AppError::Transport(format!("Timeout calling {}: {}", endpoint, e))
            } else {
                tracing::error!("HTTP connection error sending request to {}: {}", url, e);
                AppError::Transport(format!("Request to {} failed: {}", endpoint, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Transport(format!("Failed to read {} response: {}", endpoint, e)))?;

        if !status.is_success() {
            tracing::error!(
                "API error: {} - {} - {}",
                status,
                status.canonical_reason().unwrap_or("Unknown"),
                text
            );
            if status == StatusCode::BAD_REQUEST {
                tracing::error!(
                    "Bad request details - URL: {}, Method: {}, Body sent: {}",
                    url,
                    method,
                    body.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".to_string())
                );
            }
            return Err(AppError::NotFound(format!(
                "{} returned status {}",
                endpoint, status
            )));
        }

        tracing::debug!("API response: {} - {}", status, text);

        if text.trim().is_empty() {
            return Err(AppError::NotFound(format!(
                "{} returned an empty body",
                endpoint
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::Internal(format!("Failed to parse {} response: {}", endpoint, e))
        })
    }
}

/// Collapse a call result into the `Option` the trait exposes.
fn settle<T>(endpoint: &str, result: Result<T, AppError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                endpoint,
                kind = e.kind().as_str(),
                "Gateway call returned no result: {}",
                e
            );
            None
        }
    }
}

#[async_trait]
impl CreditGateway for ApiGatewayClient {
    async fn get_source_record(&self, source_request_id: i64) -> Option<SourceRecord> {
        tracing::info!("Fetching analysis request {}", source_request_id);
        let endpoint = "get-analysis-request-by-id";
        let result = self
            .call(
                Method::GET,
                endpoint,
                &[("analysisRequestId", source_request_id.to_string())],
                None,
            )
            .await;
        settle(endpoint, result)
    }

    async fn get_policy_rules(&self, rules_id: i64) -> Option<PolicyRules> {
        tracing::info!("Fetching credit policy rules {}", rules_id);
        let endpoint = "get-info-rules-by-id";
        let result = self
            .call(
                Method::GET,
                endpoint,
                &[("rulesId", rules_id.to_string())],
                None,
            )
            .await;
        settle(endpoint, result)
    }

    async fn submit_decision(&self, submission: &DecisionSubmission) -> Option<SourceRecord> {
        tracing::info!(
            "Submitting analysis request {:?} to the credit engine",
            submission.target_ids.first()
        );
        let endpoint = "process-engine";
        let result = match serde_json::to_value(submission) {
            Ok(body) => self.call(Method::POST, endpoint, &[], Some(body)).await,
            Err(e) => Err(AppError::from(e)),
        };
        settle(endpoint, result)
    }

    async fn update_status(&self, request: &CreditRequest) -> Option<CreditRequest> {
        tracing::info!(
            "Updating credit engine status for analysis request {:?}",
            request.source_request_id
        );
        let endpoint = "update-task-credit-engine-status";
        let result = match serde_json::to_value(request) {
            Ok(body) => self.call(Method::PUT, endpoint, &[], Some(body)).await,
            Err(e) => Err(AppError::from(e)),
        };
        settle(endpoint, result)
    }
}
