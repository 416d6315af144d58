use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Process configuration, loaded from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub partner_api_url: String,
    pub partner_api_token: String,
    pub partner_timeout_secs: u64,
    /// Product name stamped into every partner payload. Static configuration,
    /// never sourced from the submission.
    pub product_name: String,
    pub max_delivery_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Shared secret for the intake webhook; unset disables the check.
    pub webhook_secret: Option<String>,
    /// Path to the pipeline rules JSON (validation + normalization +
    /// attribute table).
    pub rules_path: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            partner_api_url: std::env::var("PARTNER_API_URL")
                .map_err(|_| anyhow::anyhow!("PARTNER_API_URL environment variable required"))
                .and_then(|raw| {
                    let parsed = url::Url::parse(&raw)
                        .map_err(|e| anyhow::anyhow!("PARTNER_API_URL is not a valid URL: {}", e))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("PARTNER_API_URL must start with http:// or https://");
                    }
                    Ok(raw)
                })?,
            partner_api_token: std::env::var("PARTNER_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("PARTNER_API_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("PARTNER_API_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            partner_timeout_secs: std::env::var("PARTNER_API_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PARTNER_API_TIMEOUT_SECS must be a number"))?,
            product_name: std::env::var("PARTNER_PRODUCT_NAME")
                .map_err(|_| anyhow::anyhow!("PARTNER_PRODUCT_NAME environment variable required"))
                .and_then(|name| {
                    if name.trim().is_empty() {
                        anyhow::bail!("PARTNER_PRODUCT_NAME cannot be empty");
                    }
                    Ok(name)
                })?,
            max_delivery_attempts: std::env::var("MAX_DELIVERY_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_DELIVERY_ATTEMPTS must be a number"))?,
            retry_base_ms: std::env::var("RETRY_BASE_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BASE_MS must be a number"))?,
            retry_max_ms: std::env::var("RETRY_MAX_MS")
                .unwrap_or_else(|_| "480000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_MAX_MS must be a number"))?,
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            rules_path: std::env::var("PIPELINE_RULES_FILE")
                .unwrap_or_else(|_| "./config/pipeline_rules.json".to_string()),
        };

        if config.max_delivery_attempts == 0 {
            anyhow::bail!("MAX_DELIVERY_ATTEMPTS must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Partner API URL: {}", config.partner_api_url);
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!("Rules file: {}", config.rules_path);
        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set, intake authentication disabled");
        }

        Ok(config)
    }
}

/// Externalized pipeline rules: the validation rule set, normalization
/// options, and the per-attribute rule table. Loaded once at startup and
/// injected into the pipeline stages; reloads are the caller's concern.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRules {
    pub validation: ValidationRules,
    #[serde(default)]
    pub normalization: NormalizationRules,
    /// Attribute name -> validation rule for the optional partner attributes.
    #[serde(default)]
    pub attributes: HashMap<String, AttributeRule>,
}

/// Deployment-specific validation rule set. Field references are payload
/// paths, so nested variants (`address.zip`, bracket-quoted question keys)
/// configure the same engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationRules {
    /// Path of the locator field (e.g. a postal code).
    pub locator_field: String,
    /// Pattern the locator value must match.
    pub locator_pattern: String,
    /// Rejection code for a present-but-non-matching locator.
    pub locator_reason: String,
    /// Path of the boolean-like eligibility field.
    pub eligibility_field: String,
    /// Exact accepted representations: boolean `true` or string literals.
    pub eligibility_accepted: Vec<Value>,
    /// Rejection code for a present-but-not-accepted eligibility value.
    pub eligibility_reason: String,
    /// Other scalar fields that must be present and non-empty, in check order.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Normalization options that differ between deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizationRules {
    /// Identity field lower-cased after the generic pass.
    #[serde(default = "default_email_field")]
    pub email_field: String,
    /// Top-level sub-trees copied verbatim instead of being normalized
    /// (e.g. a free-form question/answer map).
    #[serde(default)]
    pub exempt_subtrees: Vec<String>,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            email_field: default_email_field(),
            exempt_subtrees: Vec::new(),
        }
    }
}

fn default_email_field() -> String {
    "email".to_string()
}

/// Validation rule for one optional partner attribute.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeRule {
    pub attribute_type: AttributeType,
    /// For `text`: require a numeric value instead of a plain string.
    #[serde(default)]
    pub is_numeric: bool,
    /// For `dropdown`: exact allow-list; empty or absent means unrestricted.
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Text,
    Dropdown,
    Range,
}

impl PipelineRules {
    /// Loads and parses the rules file. Attribute keys starting with `_`
    /// are metadata entries and are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read rules file {}: {}", path.display(), e)
        })?;
        let mut rules: PipelineRules = serde_json::from_str(&data).map_err(|e| {
            anyhow::anyhow!("failed to parse rules file {}: {}", path.display(), e)
        })?;

        rules.attributes.retain(|key, _| !key.starts_with('_'));

        tracing::info!(
            "Loaded pipeline rules: {} optional attributes, locator field '{}'",
            rules.attributes.len(),
            rules.validation.locator_field
        );
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_document() {
        let doc = r#"{
            "validation": {
                "locator_field": "zipcode",
                "locator_pattern": "^53\\d{3}$",
                "locator_reason": "ZIP_PATTERN_MISMATCH",
                "eligibility_field": "questions[Sind Sie Eigentümer der Immobilie?]",
                "eligibility_accepted": ["Ja", "true", true],
                "eligibility_reason": "NOT_ELIGIBLE",
                "required_fields": ["email", "phone"]
            },
            "normalization": {
                "exempt_subtrees": ["questions"]
            },
            "attributes": {
                "_comment": {"attribute_type": "text"},
                "roof_area": {"attribute_type": "range"},
                "salutation": {"attribute_type": "dropdown", "values": ["Herr", "Frau"]}
            }
        }"#;

        let mut rules: PipelineRules = serde_json::from_str(doc).unwrap();
        rules.attributes.retain(|key, _| !key.starts_with('_'));

        assert_eq!(rules.validation.locator_field, "zipcode");
        assert_eq!(rules.validation.eligibility_accepted.len(), 3);
        assert_eq!(rules.normalization.email_field, "email");
        assert_eq!(rules.normalization.exempt_subtrees, vec!["questions"]);
        assert_eq!(rules.attributes.len(), 2);
        assert_eq!(
            rules.attributes["roof_area"].attribute_type,
            AttributeType::Range
        );
        assert_eq!(
            rules.attributes["salutation"].values.as_deref(),
            Some(&["Herr".to_string(), "Frau".to_string()][..])
        );
    }
}
