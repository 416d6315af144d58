use crate::config::NormalizationRules;
use crate::payload::JsonMap;
use serde_json::Value;

/// Canonicalizes raw submissions before mapping.
///
/// Every string is trimmed; a trimmed string equal to `true`/`false`
/// (case-insensitive) becomes a real boolean; maps and lists are walked
/// recursively; the configured identity field is lower-cased after the
/// generic pass. Sub-trees listed in `exempt_subtrees` are copied verbatim,
/// since deployments disagree on whether free-form question maps should be
/// touched.
pub struct Normalizer {
    rules: NormalizationRules,
}

impl Normalizer {
    pub fn new(rules: NormalizationRules) -> Self {
        Self { rules }
    }

    /// Pure and idempotent: normalizing an already-normalized payload is a
    /// no-op. An empty payload normalizes to an empty map, never an error.
    pub fn normalize(&self, raw_payload: &JsonMap) -> JsonMap {
        let mut normalized = JsonMap::new();
        for (key, value) in raw_payload {
            if self.rules.exempt_subtrees.iter().any(|e| e == key) {
                normalized.insert(key.clone(), value.clone());
            } else {
                normalized.insert(key.clone(), normalize_value(value));
            }
        }

        // Identity field gets an extra lower-casing pass.
        if let Some(Value::String(email)) = normalized.get(&self.rules.email_field) {
            let lowered = email.to_lowercase();
            normalized.insert(self.rules.email_field.clone(), Value::String(lowered));
        }

        normalized
    }
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => normalize_string(s),
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

fn normalize_string(s: &str) -> Value {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(trimmed.to_string())
}
