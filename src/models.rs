use crate::payload::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a lead in the processing pipeline.
///
/// `REJECTED`, `DELIVERED` and `PERMANENTLY_FAILED` are terminal: the
/// pipeline never moves a lead out of them on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    /// Accepted at the intake boundary and queued for processing.
    Received,
    /// Failed business validation.
    Rejected,
    /// Passed validation and mapping, awaiting delivery.
    Ready,
    /// Successfully sent to the partner endpoint.
    Delivered,
    /// Last delivery attempt failed but may be retried.
    Failed,
    /// Retries exhausted, partner rejected the request, or mapping aborted.
    PermanentlyFailed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Received => "RECEIVED",
            LeadStatus::Rejected => "REJECTED",
            LeadStatus::Ready => "READY",
            LeadStatus::Delivered => "DELIVERED",
            LeadStatus::Failed => "FAILED",
            LeadStatus::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(LeadStatus::Received),
            "REJECTED" => Some(LeadStatus::Rejected),
            "READY" => Some(LeadStatus::Ready),
            "DELIVERED" => Some(LeadStatus::Delivered),
            "FAILED" => Some(LeadStatus::Failed),
            "PERMANENTLY_FAILED" => Some(LeadStatus::PermanentlyFailed),
            _ => None,
        }
    }

    /// Terminal statuses admit no further automatic processing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Rejected | LeadStatus::Delivered | LeadStatus::PermanentlyFailed
        )
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code for a missing or empty required field. Fixed, unlike the
/// locator-pattern and eligibility codes which come from configuration.
pub const REASON_MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";

/// Reason code for a lead whose delivery retries were exhausted.
pub const REASON_RETRIES_EXHAUSTED: &str = "RETRIES_EXHAUSTED";

/// Reason code for a lead the partner rejected with a client-error response.
pub const REASON_DELIVERY_REJECTED: &str = "DELIVERY_REJECTED";

/// A lead as persisted: the submission exactly as received plus everything
/// the pipeline derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Opaque unique identifier, assigned at intake, immutable.
    pub id: i64,
    /// When the submission arrived. Immutable.
    pub received_at: DateTime<Utc>,
    /// The submission exactly as received. Immutable.
    pub raw_payload: JsonMap,
    /// Captured request context (headers, origin) for audit. Immutable.
    pub source_metadata: JsonMap,
    pub status: LeadStatus,
    /// Set only when status is REJECTED, FAILED or PERMANENTLY_FAILED.
    pub rejection_reason: Option<String>,
    /// Output of the normalization stage; overwritten on reprocessing.
    pub normalized_payload: Option<JsonMap>,
    /// Output of the mapping stage; overwritten on reprocessing.
    pub partner_payload: Option<JsonMap>,
    /// SHA-256 fingerprint of `raw_payload` for duplicate detection.
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    /// Whether the state machine admits a move from the current status to
    /// `target`. Terminal statuses admit nothing.
    pub fn can_transition_to(&self, target: LeadStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match self.status {
            LeadStatus::Received => matches!(
                target,
                LeadStatus::Rejected | LeadStatus::Ready | LeadStatus::Failed
            ),
            LeadStatus::Ready => matches!(
                target,
                LeadStatus::Delivered | LeadStatus::Failed | LeadStatus::PermanentlyFailed
            ),
            LeadStatus::Failed => matches!(
                target,
                LeadStatus::Delivered | LeadStatus::Failed | LeadStatus::PermanentlyFailed
            ),
            _ => false,
        }
    }

    /// Moves the lead to `target`, bumping `updated_at`. Fails on a
    /// transition the state machine does not admit.
    pub fn transition_to(&mut self, target: LeadStatus) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(target) {
            return Err(InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_rejected(&mut self, reason: &str) -> Result<(), InvalidTransition> {
        self.transition_to(LeadStatus::Rejected)?;
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: &str) -> Result<(), InvalidTransition> {
        self.transition_to(LeadStatus::Failed)?;
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn mark_permanently_failed(&mut self, reason: &str) -> Result<(), InvalidTransition> {
        self.transition_to(LeadStatus::PermanentlyFailed)?;
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }
}

/// Returned when a status transition violates the lead state machine.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: LeadStatus,
    pub to: LeadStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid status transition from {} to {}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// One recorded network call to the partner endpoint. Append-only: attempts
/// are never mutated after they are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub lead_id: i64,
    /// 1-based, strictly increasing per lead, never reused.
    pub attempt_no: i32,
    pub requested_at: DateTime<Utc>,
    /// Absent on network-level failures.
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(lead_id: i64, attempt_no: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            lead_id,
            attempt_no,
            requested_at: now,
            response_status: None,
            response_body: None,
            error_message: None,
            success: false,
            created_at: now,
        }
    }

    pub fn mark_success(&mut self, status: i32, body: String) {
        self.success = true;
        self.response_status = Some(status);
        self.response_body = Some(body);
    }

    pub fn mark_failure(&mut self, status: Option<i32>, error: String) {
        self.success = false;
        self.response_status = status;
        self.error_message = Some(error);
    }
}
