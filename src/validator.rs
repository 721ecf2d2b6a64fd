//! Business validation of a credit request against its source record.
//!
//! Rules run in order and the first failure wins:
//! 1. the source record must exist
//! 2. its document must be non-empty
//! 3. an 11-digit document (individual) needs `policy_id_individual`
//! 4. a 14-digit document (corporate) needs `policy_id_corporate`
//!
//! Any other document length passes.

use crate::models::{CreditRequest, SourceRecord};
use std::fmt;

/// Length of an individual taxpayer document (CPF).
pub const INDIVIDUAL_DOCUMENT_LEN: usize = 11;
/// Length of a corporate taxpayer document (CNPJ).
pub const CORPORATE_DOCUMENT_LEN: usize = 14;

/// Reason a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    AnalysisRequestNotFound,
    DocumentRequired,
    CreditPolicyPfIdRequired,
    CreditPolicyIdRequired,
}

impl ValidationFailure {
    /// Stable reason code reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationFailure::AnalysisRequestNotFound => "ANALYSIS_REQUEST_NOT_FOUND",
            ValidationFailure::DocumentRequired => "DOCUMENT_REQUIRED",
            ValidationFailure::CreditPolicyPfIdRequired => "CREDIT_POLICY_PF_ID_REQUIRED",
            ValidationFailure::CreditPolicyIdRequired => "CREDIT_POLICY_ID_REQUIRED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ValidationFailure::AnalysisRequestNotFound => "Analysis request not found",
            ValidationFailure::DocumentRequired => "Document is required",
            ValidationFailure::CreditPolicyPfIdRequired => {
                "Document has 11 digits but no individual credit policy id was provided"
            }
            ValidationFailure::CreditPolicyIdRequired => {
                "Document has 14 digits but no corporate credit policy id was provided"
            }
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Validate `request` against the source record fetched for it.
///
/// Pure: the caller performs the Gateway read and passes `None` when the
/// record could not be found.
pub fn validate(
    request: &CreditRequest,
    source: Option<&SourceRecord>,
) -> Result<(), ValidationFailure> {
    let source = source.ok_or(ValidationFailure::AnalysisRequestNotFound)?;

    let document = match source.document.as_deref() {
        Some(doc) if !doc.is_empty() => doc,
        _ => return Err(ValidationFailure::DocumentRequired),
    };

    match document.chars().count() {
        INDIVIDUAL_DOCUMENT_LEN if request.policy_id_individual.is_none() => {
            Err(ValidationFailure::CreditPolicyPfIdRequired)
        }
        CORPORATE_DOCUMENT_LEN if request.policy_id_corporate.is_none() => {
            Err(ValidationFailure::CreditPolicyIdRequired)
        }
        _ => Ok(()),
    }
}
