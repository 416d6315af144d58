use crate::payload::JsonMap;
use crate::retry::{classify_status, FailureKind};
use std::time::Duration;

/// Response bodies are persisted with every attempt; cap them so a
/// misbehaving partner cannot bloat the audit trail.
const MAX_BODY_LEN: usize = 2048;

/// Result of a single delivery attempt against the partner endpoint.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    Delivered {
        status: u16,
        body: String,
    },
    Failed {
        kind: FailureKind,
        /// None when no HTTP response was received (timeout, connect error).
        status: Option<u16>,
        detail: String,
    },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// HTTP client for the partner's lead intake endpoint.
pub struct PartnerClient {
    client: reqwest::Client,
    endpoint_url: String,
    api_token: String,
}

impl PartnerClient {
    pub fn new(endpoint_url: String, api_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build partner HTTP client: {}", e))?;
        Ok(Self {
            client,
            endpoint_url,
            api_token,
        })
    }

    /// POSTs the partner payload. Transport problems are folded into the
    /// result rather than surfaced as errors, so the caller has a single
    /// classification path for every attempt.
    pub async fn deliver(&self, partner_payload: &JsonMap) -> DeliveryResult {
        let response = self
            .client
            .post(&self.endpoint_url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .json(partner_payload)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("partner request failed before a response: {}", e);
                return DeliveryResult::Failed {
                    kind: FailureKind::Transient,
                    status: None,
                    detail: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) => truncate(&text),
            Err(e) => format!("<unreadable body: {}>", e),
        };

        if (200..300).contains(&status) {
            tracing::debug!(status, "partner accepted lead");
            DeliveryResult::Delivered { status, body }
        } else {
            let kind = classify_status(status);
            tracing::warn!(status, ?kind, "partner rejected delivery attempt");
            DeliveryResult::Failed {
                kind,
                status: Some(status),
                detail: body,
            }
        }
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
