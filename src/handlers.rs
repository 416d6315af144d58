use crate::errors::AppError;
use crate::models::LeadStatus;
use crate::payload::JsonMap;
use crate::store::{LeadStore, StatusCount};
use crate::worker::WorkQueue;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use moka::future::Cache;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lead and attempt persistence.
    pub store: Arc<dyn LeadStore>,
    /// Background delivery queue.
    pub queue: WorkQueue,
    /// Shared secret for the intake webhook; `None` disables the check.
    pub webhook_secret: Option<String>,
    /// content_hash -> lead id, used to annotate repeat submissions.
    pub recent_submission_cache: Cache<String, i64>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub id: i64,
    pub status: LeadStatus,
    /// Correlation id echoed into `source_metadata` for log searches.
    pub intake_ref: String,
    /// Id of an earlier lead with the same payload, when one is known.
    /// Duplicates are annotated, never dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<i64>,
}

/// POST /webhooks/leads
///
/// Accepts a raw submission, persists it exactly as received and queues it
/// for processing. Returns 202 as soon as the lead is durable; all business
/// validation happens in the pipeline, so a rejectable payload is still
/// accepted here.
pub async fn intake_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<IntakeResponse>), AppError> {
    validate_webhook_secret(&state, &headers)?;

    let raw_payload = match payload {
        Value::Object(map) => map,
        _ => {
            return Err(AppError::BadRequest(
                "payload must be a JSON object".to_string(),
            ))
        }
    };

    let content_hash = hash_payload(&raw_payload);
    let duplicate_of = match state.recent_submission_cache.get(&content_hash).await {
        Some(id) => Some(id),
        None => state
            .store
            .find_by_content_hash(&content_hash)
            .await?
            .map(|l| l.id),
    };

    let intake_ref = Uuid::new_v4().to_string();
    let source_metadata = capture_source_metadata(&headers, &intake_ref);
    let lead = state
        .store
        .create_lead(raw_payload, source_metadata, Some(content_hash.clone()))
        .await?;

    state
        .recent_submission_cache
        .insert(content_hash, lead.id)
        .await;

    if let Err(e) = state.queue.enqueue(lead.id).await {
        // The lead is durable; a stalled queue only delays processing.
        tracing::error!(lead_id = lead.id, error = %e, "failed to enqueue lead");
    }

    if let Some(original) = duplicate_of {
        tracing::info!(
            lead_id = lead.id,
            duplicate_of = original,
            "repeat submission accepted"
        );
    } else {
        tracing::info!(lead_id = lead.id, "lead accepted");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IntakeResponse {
            id: lead.id,
            status: lead.status,
            intake_ref,
            duplicate_of,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct LeadDetailResponse {
    pub lead: crate::models::LeadRecord,
    pub attempts: Vec<crate::models::DeliveryAttempt>,
}

/// GET /api/v1/leads/:id
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<LeadDetailResponse>, AppError> {
    let lead = state.store.get_lead(id).await?;
    let attempts = state.store.list_attempts(id).await?;
    Ok(Json(LeadDetailResponse { lead, attempts }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: i64,
    pub by_status: Vec<StatusCount>,
}

/// GET /api/v1/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, AppError> {
    let by_status = state.store.stats().await?;
    let total = by_status.iter().map(|c| c.count).sum();
    Ok(Json(StatsResponse { total, by_status }))
}

fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // No secret configured: skip validation (warned at startup).
    let Some(ref expected_secret) = state.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    // Constant-time comparison to prevent timing attacks.
    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// SHA-256 over the serialized payload, hex-encoded.
pub fn hash_payload(raw_payload: &JsonMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Value::Object(raw_payload.clone()).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn capture_source_metadata(headers: &HeaderMap, intake_ref: &str) -> JsonMap {
    let mut metadata = JsonMap::new();
    metadata.insert(
        "intake_ref".to_string(),
        Value::String(intake_ref.to_string()),
    );
    for name in ["user-agent", "x-forwarded-for", "content-type", "origin"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            metadata.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    metadata
}
