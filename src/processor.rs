use crate::errors::AppError;
use crate::mapping::Mapper;
use crate::models::{
    DeliveryAttempt, LeadRecord, LeadStatus, REASON_DELIVERY_REJECTED, REASON_RETRIES_EXHAUSTED,
};
use crate::normalization::Normalizer;
use crate::partner_client::{DeliveryResult, PartnerClient};
use crate::retry::{FailureKind, RetryDecision, RetryPolicy};
use crate::store::LeadStore;
use crate::validation::{ValidationOutcome, Validator};
use std::sync::Arc;
use std::time::Duration;

/// What processing a lead produced. `Retry` is the only outcome that asks
/// the caller to schedule further work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Rejected { reason: String },
    Delivered,
    Retry { after: Duration },
    PermanentlyFailed { reason: String },
    /// Lead failed before any delivery attempt was possible; not retried
    /// automatically.
    Failed { reason: String },
    /// Lead was already in a terminal status; nothing was done.
    AlreadyTerminal { status: LeadStatus },
}

/// Drives a lead through validation, normalization, mapping and delivery.
///
/// `process` is the single entry point and is safe to call repeatedly for
/// the same lead: it dispatches on the persisted status, so a lead that
/// already reached a terminal status is left untouched and a `FAILED` lead
/// resumes at delivery instead of being re-transformed.
pub struct Processor {
    store: Arc<dyn LeadStore>,
    validator: Validator,
    normalizer: Normalizer,
    mapper: Mapper,
    client: PartnerClient,
    policy: RetryPolicy,
}

impl Processor {
    pub fn new(
        store: Arc<dyn LeadStore>,
        validator: Validator,
        normalizer: Normalizer,
        mapper: Mapper,
        client: PartnerClient,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            validator,
            normalizer,
            mapper,
            client,
            policy,
        }
    }

    pub async fn process(&self, lead_id: i64) -> Result<ProcessOutcome, AppError> {
        let mut lead = self.store.get_lead(lead_id).await?;

        if lead.status.is_terminal() {
            tracing::debug!(lead_id, status = %lead.status, "lead already terminal, skipping");
            return Ok(ProcessOutcome::AlreadyTerminal {
                status: lead.status,
            });
        }

        match lead.status {
            LeadStatus::Received => self.run_from_start(&mut lead).await,
            LeadStatus::Ready | LeadStatus::Failed => self.deliver(&mut lead).await,
            // Terminal statuses were handled above.
            _ => Ok(ProcessOutcome::AlreadyTerminal {
                status: lead.status,
            }),
        }
    }

    async fn run_from_start(&self, lead: &mut LeadRecord) -> Result<ProcessOutcome, AppError> {
        if let ValidationOutcome::Rejected { reason } = self.validator.validate(&lead.raw_payload) {
            tracing::info!(lead_id = lead.id, reason = %reason, "lead rejected");
            lead.mark_rejected(&reason)?;
            self.store.save_lead(lead).await?;
            return Ok(ProcessOutcome::Rejected { reason });
        }

        let normalized = self.normalizer.normalize(&lead.raw_payload);

        let outcome = match self.mapper.map(&normalized) {
            Ok(outcome) => outcome,
            Err(missing) => {
                // The lead passed validation, so a missing hard-required
                // field points at the rule configuration. Kept out of the
                // retry loop; operators resolve it.
                let reason = missing.to_string();
                tracing::error!(lead_id = lead.id, %reason, "mapping aborted");
                lead.normalized_payload = Some(normalized);
                lead.mark_failed(&reason)?;
                self.store.save_lead(lead).await?;
                return Ok(ProcessOutcome::Failed { reason });
            }
        };

        lead.normalized_payload = Some(normalized);
        lead.partner_payload = Some(outcome.partner_payload);
        lead.transition_to(LeadStatus::Ready)?;
        self.store.save_lead(lead).await?;

        self.deliver(lead).await
    }

    async fn deliver(&self, lead: &mut LeadRecord) -> Result<ProcessOutcome, AppError> {
        let partner_payload = match &lead.partner_payload {
            Some(p) => p.clone(),
            None => {
                // A lead that failed during transformation has nothing to
                // deliver; reprocessing it restates the stored failure
                // until an operator resolves the configuration.
                let reason = lead
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "missing partner payload".to_string());
                tracing::error!(
                    lead_id = lead.id,
                    status = %lead.status,
                    %reason,
                    "no partner payload to deliver"
                );
                return Ok(ProcessOutcome::Failed { reason });
            }
        };

        let attempt_no = self.store.attempt_count(lead.id).await? + 1;
        let mut attempt = DeliveryAttempt::new(lead.id, attempt_no as i32);

        let result = self.client.deliver(&partner_payload).await;

        // The attempt row goes in before the lead status moves, so a crash
        // between the two leaves an extra attempt on record rather than a
        // delivered lead with no audit trail.
        match result {
            DeliveryResult::Delivered { status, body } => {
                attempt.mark_success(i32::from(status), body);
                self.store.record_attempt(&attempt).await?;

                lead.transition_to(LeadStatus::Delivered)?;
                lead.rejection_reason = None;
                self.store.save_lead(lead).await?;
                tracing::info!(lead_id = lead.id, attempt_no, "lead delivered");
                Ok(ProcessOutcome::Delivered)
            }
            DeliveryResult::Failed {
                kind,
                status,
                detail,
            } => {
                attempt.mark_failure(status.map(i32::from), detail.clone());
                self.store.record_attempt(&attempt).await?;

                match self.policy.decide(attempt_no, kind) {
                    RetryDecision::RetryAfter(after) => {
                        let reason = attempt_reason(status, &detail);
                        lead.mark_failed(&reason)?;
                        self.store.save_lead(lead).await?;
                        tracing::warn!(
                            lead_id = lead.id,
                            attempt_no,
                            delay_ms = after.as_millis() as u64,
                            "delivery failed, retry scheduled"
                        );
                        Ok(ProcessOutcome::Retry { after })
                    }
                    RetryDecision::Terminal => {
                        let reason = match kind {
                            FailureKind::Permanent => REASON_DELIVERY_REJECTED,
                            FailureKind::Transient => REASON_RETRIES_EXHAUSTED,
                        };
                        lead.mark_permanently_failed(reason)?;
                        self.store.save_lead(lead).await?;
                        tracing::warn!(
                            lead_id = lead.id,
                            attempt_no,
                            reason,
                            "lead permanently failed"
                        );
                        Ok(ProcessOutcome::PermanentlyFailed {
                            reason: reason.to_string(),
                        })
                    }
                }
            }
        }
    }
}

fn attempt_reason(status: Option<u16>, detail: &str) -> String {
    match status {
        Some(s) => format!("partner responded {}", s),
        None => format!("no response: {}", detail),
    }
}
