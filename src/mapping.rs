use crate::config::{AttributeRule, AttributeType};
use crate::payload::{self, JsonMap};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Contact field copied from the payload into every partner payload.
pub const CONTACT_FIELD: &str = "phone";

/// Path the configured product name is written to.
pub const PRODUCT_NAME_FIELD: &str = "product.name";

/// Mapping aborted because a hard-required field is absent. This is treated
/// as a processing defect (the lead already passed validation), not bad
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRequiredField(pub String);

impl fmt::Display for MissingRequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required field: {}", self.0)
    }
}

impl std::error::Error for MissingRequiredField {}

/// Result of mapping a normalized lead into the partner's schema.
#[derive(Debug, Clone)]
pub struct MappingOutcome {
    pub partner_payload: JsonMap,
    /// Optional attributes dropped because they failed their rule. Reported
    /// for the audit log, never a processing error.
    pub omitted_attributes: Vec<String>,
}

/// Maps normalized leads into partner payloads.
///
/// The partner endpoint tolerates missing optional data but not malformed
/// data, so the mapper privileges delivering the lead over completeness:
/// the contact field and the configured product name are hard requirements,
/// everything else is validated permissively and dropped on failure.
pub struct Mapper {
    rules: HashMap<String, AttributeRule>,
    product_name: String,
}

impl Mapper {
    pub fn new(rules: HashMap<String, AttributeRule>, product_name: String) -> Self {
        Self {
            rules,
            product_name,
        }
    }

    pub fn map(&self, normalized: &JsonMap) -> Result<MappingOutcome, MissingRequiredField> {
        let mut partner_payload = JsonMap::new();
        let mut omitted_attributes = Vec::new();

        // Hard-required: the contact field from the payload.
        match normalized.get(CONTACT_FIELD) {
            Some(value) if payload::is_present(value) => {
                partner_payload.insert(CONTACT_FIELD.to_string(), value.clone());
            }
            _ => return Err(MissingRequiredField(CONTACT_FIELD.to_string())),
        }

        // Hard-required: the product name from static configuration.
        if self.product_name.trim().is_empty() {
            return Err(MissingRequiredField(PRODUCT_NAME_FIELD.to_string()));
        }
        payload::set_path(
            &mut partner_payload,
            PRODUCT_NAME_FIELD,
            Value::String(self.product_name.clone()),
        );

        // Everything in the rule table is optional. Sorted iteration keeps
        // the omission report deterministic.
        let mut names: Vec<&String> = self.rules.keys().collect();
        names.sort();
        for name in names {
            let value = match normalized.get(name.as_str()) {
                Some(v) if !v.is_null() => v,
                // Missing optional attributes are simply not included.
                _ => continue,
            };

            let rule = &self.rules[name.as_str()];
            if attribute_is_valid(value, rule) {
                partner_payload.insert(name.clone(), value.clone());
            } else {
                tracing::info!(attribute = %name, value = ?value, "omitting invalid attribute");
                omitted_attributes.push(name.clone());
            }
        }

        if !omitted_attributes.is_empty() {
            tracing::info!(
                count = omitted_attributes.len(),
                attributes = ?omitted_attributes,
                "omitted invalid optional attributes"
            );
        }

        Ok(MappingOutcome {
            partner_payload,
            omitted_attributes,
        })
    }
}

/// Permissive numeric test: integers, floats and numeric strings qualify;
/// booleans explicitly do not.
pub fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Bool(_) => false,
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn attribute_is_valid(value: &Value, rule: &AttributeRule) -> bool {
    match rule.attribute_type {
        AttributeType::Text => {
            if rule.is_numeric {
                is_numeric(value)
            } else {
                value.is_string()
            }
        }
        AttributeType::Dropdown => {
            let allowed = match &rule.values {
                Some(values) if !values.is_empty() => values,
                // No restrictions configured: accept any value.
                _ => return true,
            };
            match value {
                Value::String(s) => allowed.iter().any(|a| a == s),
                _ => false,
            }
        }
        AttributeType::Range => is_numeric(value),
    }
}
