use crate::status_trail::StatusTrail;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Queue Models ============

/// A credit-evaluation request, as received from the queue and sent back to
/// the Gateway once processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditRequest {
    /// Credit policy id for corporate documents (14 digits).
    #[serde(rename = "CreditPolicyId", default)]
    pub policy_id_corporate: Option<i64>,
    /// Credit policy id for individual documents (11 digits).
    #[serde(rename = "CreditPolicyPfId", default)]
    pub policy_id_individual: Option<i64>,
    /// Id of the analysis request in the originating system.
    #[serde(rename = "AnalysisRequestId", default)]
    pub source_request_id: Option<i64>,
    /// Id of the credit policy rules to apply.
    #[serde(rename = "CreditPolicyRuleId", default)]
    pub rule_id: Option<i64>,
    /// Name of the customer the request is about.
    #[serde(rename = "AnalysisRequestName", default)]
    pub requester_name: Option<String>,
    #[serde(rename = "UserId", default)]
    pub user_id: Option<i64>,
    #[serde(rename = "UserGroupId", default)]
    pub user_group_id: Option<i64>,
    #[serde(
        rename = "TaskStartedAt",
        with = "timestamp::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "TaskFinishedAt",
        with = "timestamp::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "CreditEngineStatus", default)]
    pub status_trail: StatusTrail,
    #[serde(rename = "Id", default)]
    pub id: i64,
    #[serde(
        rename = "CreatedAt",
        with = "timestamp::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "UpdatedAt",
        with = "timestamp::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "Status", default)]
    pub active: bool,
}

impl CreditRequest {
    /// Name used in log lines; falls back to the request id.
    pub fn display_name(&self) -> String {
        match self.requester_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("request #{}", self.id),
        }
    }
}

// ============ External API Models ============

/// The canonical analysis request fetched from the originating system.
///
/// Only used for validation; never mutated by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub user_group_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    /// CPF (11 digits) or CNPJ (14 digits) of the customer.
    #[serde(default)]
    pub document: Option<String>,
    #[serde(
        with = "timestamp::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub requested_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requested_amount: Option<BigDecimal>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub approved_reason: Option<String>,
    #[serde(default)]
    pub analysis_request_status_id: Option<i64>,
    #[serde(default)]
    pub analysis_request_status_name: Option<String>,
    #[serde(default)]
    pub credit_limit: Option<BigDecimal>,
}

/// Credit policy configuration for a rule id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRules {
    #[serde(default)]
    pub id: i64,
    // Field name is misspelled on the wire.
    #[serde(rename = "externalCreditPolicyMetricsEntepriseId", default)]
    pub external_metrics_enterprise_id: Option<i64>,
    #[serde(rename = "externalCreditPolicyMetricsPersonId", default)]
    pub external_metrics_person_id: Option<i64>,
    #[serde(default)]
    pub customer_type: Option<i64>,
    #[serde(default)]
    pub customer_status: Option<i64>,
    #[serde(default)]
    pub has_invoice: bool,
    #[serde(default)]
    pub min_credit_amount: Option<BigDecimal>,
    #[serde(default)]
    pub max_credit_amount: Option<BigDecimal>,
    #[serde(default)]
    pub cnae: Option<String>,
    /// Restrict the decision engine to internal data sources.
    #[serde(rename = "useOnInternalData", default)]
    pub use_internal_data: Option<bool>,
    /// Report the decision engine should produce.
    #[serde(rename = "reportId", default)]
    pub report_reference: Option<i64>,
    #[serde(default)]
    pub is_active: bool,
}

/// Body posted to the decision engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecisionSubmission {
    #[serde(rename = "RequestId")]
    pub target_ids: Vec<i64>,
    pub searched_item: i64,
    #[serde(rename = "CreditPolicyId")]
    pub policy_id_corporate: Option<i64>,
    #[serde(rename = "CreditPolicyPfId")]
    pub policy_id_individual: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_only_internal_data: Option<bool>,
    pub features: Option<Vec<Feature>>,
}

impl DecisionSubmission {
    /// Builds the submission for one source request.
    ///
    /// Credentials and features stay empty; the decision engine fills them
    /// from its own policy.
    pub fn build(request: &CreditRequest, rules: &PolicyRules, source_request_id: i64) -> Self {
        Self {
            target_ids: vec![source_request_id],
            searched_item: rules.report_reference.unwrap_or(0),
            policy_id_corporate: request.policy_id_corporate,
            policy_id_individual: request.policy_id_individual,
            username: None,
            password: None,
            use_only_internal_data: Some(rules.use_internal_data.unwrap_or(false)),
            features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Feature {
    pub id: Option<i64>,
    pub name: Option<String>,
}

/// Lenient timestamp (de)serialization.
///
/// The Gateway emits RFC 3339 timestamps as well as naive ones without an
/// offset; naive values are taken as UTC. Output is always RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Parse a timestamp string into `DateTime<Utc>`.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        // Try ISO 8601 / RFC3339 format first (standard)
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                // Fallback: naive ISO datetime, assume UTC
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(|e| {
            serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e))
        })
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.trim().is_empty() => super::parse(&raw)
                    .map(Some)
                    .map_err(|e| {
                        serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e))
                    }),
                _ => Ok(None),
            }
        }
    }
}
