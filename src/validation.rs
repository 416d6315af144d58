use crate::config::ValidationRules;
use crate::models::REASON_MISSING_REQUIRED_FIELD;
use crate::payload::{self, JsonMap};
use regex::Regex;

/// Outcome of validating a raw submission: accepted, or rejected with the
/// reason code to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: String },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }
}

/// Validates raw submissions against the deployment's business rules.
///
/// Rules run in a fixed order and the first failure wins; no error
/// aggregation. Pure over the payload and the configured rule set.
pub struct Validator {
    rules: ValidationRules,
    locator_pattern: Regex,
}

impl Validator {
    /// Compiles the locator pattern once. Fails on an invalid pattern so a
    /// misconfigured deployment dies at startup, not per lead.
    pub fn new(rules: ValidationRules) -> anyhow::Result<Self> {
        let locator_pattern = Regex::new(&rules.locator_pattern).map_err(|e| {
            anyhow::anyhow!(
                "invalid locator pattern '{}': {}",
                rules.locator_pattern,
                e
            )
        })?;
        Ok(Self {
            rules,
            locator_pattern,
        })
    }

    /// Evaluates the rule chain:
    ///
    /// 1. Non-empty payload.
    /// 2. Locator field present and matching the configured pattern.
    /// 3. Eligibility field present and exactly one of the accepted
    ///    representations (no partial truthiness).
    /// 4. Every configured required field present and non-empty.
    pub fn validate(&self, raw_payload: &JsonMap) -> ValidationOutcome {
        if raw_payload.is_empty() {
            tracing::debug!("validation failed: empty payload");
            return rejected(REASON_MISSING_REQUIRED_FIELD);
        }

        if let Some(outcome) = self.check_locator(raw_payload) {
            return outcome;
        }
        if let Some(outcome) = self.check_eligibility(raw_payload) {
            return outcome;
        }
        for field in &self.rules.required_fields {
            match payload::get_path(raw_payload, field) {
                Some(value) if payload::is_present(value) => {}
                _ => {
                    tracing::debug!(field = %field, "validation failed: missing required field");
                    return rejected(REASON_MISSING_REQUIRED_FIELD);
                }
            }
        }

        tracing::debug!("validation passed");
        ValidationOutcome::Accepted
    }

    fn check_locator(&self, raw_payload: &JsonMap) -> Option<ValidationOutcome> {
        let value = match payload::get_path(raw_payload, &self.rules.locator_field) {
            Some(v) if !v.is_null() => v,
            _ => {
                tracing::debug!(
                    field = %self.rules.locator_field,
                    "validation failed: locator field missing"
                );
                return Some(rejected(REASON_MISSING_REQUIRED_FIELD));
            }
        };

        // Numbers are matched through their canonical string form; values
        // with no string form (objects, arrays, booleans) cannot match.
        let as_string = payload::scalar_to_string(value);
        let matches = as_string
            .as_deref()
            .map(|s| self.locator_pattern.is_match(s))
            .unwrap_or(false);

        if !matches {
            tracing::debug!(
                field = %self.rules.locator_field,
                value = ?value,
                "validation failed: locator does not match pattern"
            );
            return Some(rejected(&self.rules.locator_reason));
        }
        None
    }

    fn check_eligibility(&self, raw_payload: &JsonMap) -> Option<ValidationOutcome> {
        let value = match payload::get_path(raw_payload, &self.rules.eligibility_field) {
            Some(v) if !v.is_null() => v,
            _ => {
                tracing::debug!(
                    field = %self.rules.eligibility_field,
                    "validation failed: eligibility field missing"
                );
                return Some(rejected(REASON_MISSING_REQUIRED_FIELD));
            }
        };

        // Exact comparison against the accepted representations: boolean
        // true or a listed string literal. Integer 1 and other truthy
        // values are not accepted.
        let accepted = self.rules.eligibility_accepted.iter().any(|a| a == value);
        if !accepted {
            tracing::debug!(
                field = %self.rules.eligibility_field,
                value = ?value,
                "validation failed: eligibility value not accepted"
            );
            return Some(rejected(&self.rules.eligibility_reason));
        }
        None
    }
}

fn rejected(reason: &str) -> ValidationOutcome {
    ValidationOutcome::Rejected {
        reason: reason.to_string(),
    }
}
