use crate::errors::{AppError, ResultExt};
use crate::models::{DeliveryAttempt, LeadRecord, LeadStatus};
use crate::payload::JsonMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Per-status lead count, as reported by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Persistence boundary for leads and their delivery attempts.
///
/// The pipeline only ever talks to this trait; the Postgres implementation
/// backs production and the in-memory one backs the end-to-end tests.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Persists a new lead in `RECEIVED` and returns it with its id.
    async fn create_lead(
        &self,
        raw_payload: JsonMap,
        source_metadata: JsonMap,
        content_hash: Option<String>,
    ) -> Result<LeadRecord, AppError>;

    async fn get_lead(&self, id: i64) -> Result<LeadRecord, AppError>;

    /// Most recent lead with the same payload fingerprint, if any.
    async fn find_by_content_hash(&self, hash: &str) -> Result<Option<LeadRecord>, AppError>;

    /// Writes the lead's mutable columns back. The raw payload and intake
    /// metadata are immutable and never touched here.
    async fn save_lead(&self, lead: &LeadRecord) -> Result<(), AppError>;

    /// Appends one delivery attempt and returns it with its id.
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<DeliveryAttempt, AppError>;

    async fn attempt_count(&self, lead_id: i64) -> Result<u32, AppError>;

    /// Attempts for a lead, oldest first.
    async fn list_attempts(&self, lead_id: i64) -> Result<Vec<DeliveryAttempt>, AppError>;

    async fn stats(&self) -> Result<Vec<StatusCount>, AppError>;
}

/// Postgres-backed store.
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn json_column(row: &PgRow, column: &str) -> Result<JsonMap, AppError> {
    let value: serde_json::Value = row
        .try_get(column)
        .with_context(|| format!("reading column {}", column))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(AppError::InternalError(format!(
            "column {} holds non-object JSON: {}",
            column, other
        ))),
    }
}

fn optional_json_column(row: &PgRow, column: &str) -> Result<Option<JsonMap>, AppError> {
    let value: Option<serde_json::Value> = row
        .try_get(column)
        .with_context(|| format!("reading column {}", column))?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(AppError::InternalError(format!(
            "column {} holds non-object JSON: {}",
            column, other
        ))),
    }
}

fn map_lead_row(row: PgRow) -> Result<LeadRecord, AppError> {
    let status_raw: String = row.try_get("status").context("reading column status")?;
    let status = LeadStatus::parse(&status_raw).ok_or_else(|| {
        AppError::InternalError(format!("unknown lead status in database: {}", status_raw))
    })?;

    Ok(LeadRecord {
        id: row.try_get("id").context("reading column id")?,
        received_at: row
            .try_get("received_at")
            .context("reading column received_at")?,
        raw_payload: json_column(&row, "raw_payload")?,
        source_metadata: json_column(&row, "source_metadata")?,
        status,
        rejection_reason: row
            .try_get("rejection_reason")
            .context("reading column rejection_reason")?,
        normalized_payload: optional_json_column(&row, "normalized_payload")?,
        partner_payload: optional_json_column(&row, "partner_payload")?,
        content_hash: row
            .try_get("content_hash")
            .context("reading column content_hash")?,
        created_at: row
            .try_get("created_at")
            .context("reading column created_at")?,
        updated_at: row
            .try_get("updated_at")
            .context("reading column updated_at")?,
    })
}

fn map_attempt_row(row: PgRow) -> Result<DeliveryAttempt, AppError> {
    Ok(DeliveryAttempt {
        id: row.try_get("id").context("reading column id")?,
        lead_id: row.try_get("lead_id").context("reading column lead_id")?,
        attempt_no: row
            .try_get("attempt_no")
            .context("reading column attempt_no")?,
        requested_at: row
            .try_get("requested_at")
            .context("reading column requested_at")?,
        response_status: row
            .try_get("response_status")
            .context("reading column response_status")?,
        response_body: row
            .try_get("response_body")
            .context("reading column response_body")?,
        error_message: row
            .try_get("error_message")
            .context("reading column error_message")?,
        success: row.try_get("success").context("reading column success")?,
        created_at: row
            .try_get("created_at")
            .context("reading column created_at")?,
    })
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn create_lead(
        &self,
        raw_payload: JsonMap,
        source_metadata: JsonMap,
        content_hash: Option<String>,
    ) -> Result<LeadRecord, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO inbound_lead (received_at, raw_payload, source_metadata, status, content_hash)
            VALUES (NOW(), $1, $2, $3, $4)
            RETURNING id, received_at, raw_payload, source_metadata, status,
                      rejection_reason, normalized_payload, partner_payload,
                      content_hash, created_at, updated_at
            "#,
        )
        .bind(serde_json::Value::Object(raw_payload))
        .bind(serde_json::Value::Object(source_metadata))
        .bind(LeadStatus::Received.as_str())
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await
        .context("inserting lead")?;

        map_lead_row(row)
    }

    async fn get_lead(&self, id: i64) -> Result<LeadRecord, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, received_at, raw_payload, source_metadata, status,
                   rejection_reason, normalized_payload, partner_payload,
                   content_hash, created_at, updated_at
            FROM inbound_lead WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading lead {}", id))?;

        match row {
            Some(row) => map_lead_row(row),
            None => Err(AppError::NotFound(format!("lead {} not found", id))),
        }
    }

    async fn find_by_content_hash(&self, hash: &str) -> Result<Option<LeadRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, received_at, raw_payload, source_metadata, status,
                   rejection_reason, normalized_payload, partner_payload,
                   content_hash, created_at, updated_at
            FROM inbound_lead WHERE content_hash = $1
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .context("looking up lead by content hash")?;

        row.map(map_lead_row).transpose()
    }

    async fn save_lead(&self, lead: &LeadRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE inbound_lead
            SET status = $2,
                rejection_reason = $3,
                normalized_payload = $4,
                partner_payload = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(lead.id)
        .bind(lead.status.as_str())
        .bind(&lead.rejection_reason)
        .bind(lead.normalized_payload.clone().map(serde_json::Value::Object))
        .bind(lead.partner_payload.clone().map(serde_json::Value::Object))
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving lead {}", lead.id))?;
        Ok(())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<DeliveryAttempt, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO delivery_attempt
                (lead_id, attempt_no, requested_at, response_status,
                 response_body, error_message, success)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, lead_id, attempt_no, requested_at, response_status,
                      response_body, error_message, success, created_at
            "#,
        )
        .bind(attempt.lead_id)
        .bind(attempt.attempt_no)
        .bind(attempt.requested_at)
        .bind(attempt.response_status)
        .bind(&attempt.response_body)
        .bind(&attempt.error_message)
        .bind(attempt.success)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("recording attempt for lead {}", attempt.lead_id))?;

        map_attempt_row(row)
    }

    async fn attempt_count(&self, lead_id: i64) -> Result<u32, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM delivery_attempt WHERE lead_id = $1")
            .bind(lead_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("counting attempts for lead {}", lead_id))?;
        let n: i64 = row.try_get("n").context("reading attempt count")?;
        Ok(n.max(0) as u32)
    }

    async fn list_attempts(&self, lead_id: i64) -> Result<Vec<DeliveryAttempt>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, lead_id, attempt_no, requested_at, response_status,
                   response_body, error_message, success, created_at
            FROM delivery_attempt WHERE lead_id = $1
            ORDER BY attempt_no ASC
            "#,
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("listing attempts for lead {}", lead_id))?;

        rows.into_iter().map(map_attempt_row).collect()
    }

    async fn stats(&self) -> Result<Vec<StatusCount>, AppError> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM inbound_lead GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .context("computing lead stats")?;

        rows.into_iter()
            .map(|row| {
                Ok(StatusCount {
                    status: row.try_get("status").context("reading column status")?,
                    count: row.try_get("n").context("reading stats count")?,
                })
            })
            .collect()
    }
}

#[derive(Default)]
struct MemoryInner {
    leads: HashMap<i64, LeadRecord>,
    attempts: Vec<DeliveryAttempt>,
    next_lead_id: i64,
    next_attempt_id: i64,
}

/// In-memory store used by the end-to-end tests. Mirrors the Postgres
/// store's observable behavior, including id assignment and ordering.
#[derive(Default)]
pub struct MemoryLeadStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn create_lead(
        &self,
        raw_payload: JsonMap,
        source_metadata: JsonMap,
        content_hash: Option<String>,
    ) -> Result<LeadRecord, AppError> {
        let mut inner = self.inner.lock().await;
        inner.next_lead_id += 1;
        let now: DateTime<Utc> = Utc::now();
        let lead = LeadRecord {
            id: inner.next_lead_id,
            received_at: now,
            raw_payload,
            source_metadata,
            status: LeadStatus::Received,
            rejection_reason: None,
            normalized_payload: None,
            partner_payload: None,
            content_hash,
            created_at: now,
            updated_at: now,
        };
        inner.leads.insert(lead.id, lead.clone());
        Ok(lead)
    }

    async fn get_lead(&self, id: i64) -> Result<LeadRecord, AppError> {
        let inner = self.inner.lock().await;
        inner
            .leads
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("lead {} not found", id)))
    }

    async fn find_by_content_hash(&self, hash: &str) -> Result<Option<LeadRecord>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .leads
            .values()
            .filter(|l| l.content_hash.as_deref() == Some(hash))
            .max_by_key(|l| l.id)
            .cloned())
    }

    async fn save_lead(&self, lead: &LeadRecord) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        match inner.leads.get_mut(&lead.id) {
            Some(existing) => {
                existing.status = lead.status;
                existing.rejection_reason = lead.rejection_reason.clone();
                existing.normalized_payload = lead.normalized_payload.clone();
                existing.partner_payload = lead.partner_payload.clone();
                existing.updated_at = lead.updated_at;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("lead {} not found", lead.id))),
        }
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<DeliveryAttempt, AppError> {
        let mut inner = self.inner.lock().await;
        inner.next_attempt_id += 1;
        let mut stored = attempt.clone();
        stored.id = inner.next_attempt_id;
        stored.created_at = Utc::now();
        inner.attempts.push(stored.clone());
        Ok(stored)
    }

    async fn attempt_count(&self, lead_id: i64) -> Result<u32, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.attempts.iter().filter(|a| a.lead_id == lead_id).count() as u32)
    }

    async fn list_attempts(&self, lead_id: i64) -> Result<Vec<DeliveryAttempt>, AppError> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<DeliveryAttempt> = inner
            .attempts
            .iter()
            .filter(|a| a.lead_id == lead_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_no);
        Ok(attempts)
    }

    async fn stats(&self) -> Result<Vec<StatusCount>, AppError> {
        let inner = self.inner.lock().await;
        let mut counts: HashMap<&'static str, i64> = HashMap::new();
        for lead in inner.leads.values() {
            *counts.entry(lead.status.as_str()).or_default() += 1;
        }
        let mut stats: Vec<StatusCount> = counts
            .into_iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect();
        stats.sort_by(|a, b| a.status.cmp(&b.status));
        Ok(stats)
    }
}
