//! End-to-end pipeline tests: HTTP intake through delivery, against the
//! in-memory store and a mocked partner endpoint.

use axum::{
    routing::{get, post},
    Router,
};
use lead_gateway::config::{NormalizationRules, ValidationRules};
use lead_gateway::handlers::{self, AppState};
use lead_gateway::mapping::Mapper;
use lead_gateway::models::LeadStatus;
use lead_gateway::normalization::Normalizer;
use lead_gateway::partner_client::PartnerClient;
use lead_gateway::processor::Processor;
use lead_gateway::retry::RetryPolicy;
use lead_gateway::store::{LeadStore, MemoryLeadStore};
use lead_gateway::validation::Validator;
use lead_gateway::worker;
use moka::future::Cache;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    base_url: String,
    store: Arc<MemoryLeadStore>,
    client: reqwest::Client,
}

impl TestApp {
    async fn spawn(partner_url: String, webhook_secret: Option<String>) -> Self {
        let rules = ValidationRules {
            locator_field: "zipcode".to_string(),
            locator_pattern: r"^53\d{3}$".to_string(),
            locator_reason: "ZIP_PATTERN_MISMATCH".to_string(),
            eligibility_field: "questions[Sind Sie Eigentümer der Immobilie?]".to_string(),
            eligibility_accepted: vec![json!("Ja"), json!("true"), json!(true)],
            eligibility_reason: "NOT_ELIGIBLE".to_string(),
            required_fields: vec!["email".to_string(), "phone".to_string()],
        };
        let normalization = NormalizationRules {
            email_field: "email".to_string(),
            exempt_subtrees: vec!["questions".to_string()],
        };
        let mut attributes = HashMap::new();
        attributes.insert(
            "first_name".to_string(),
            serde_json::from_value(json!({ "attribute_type": "text" })).unwrap(),
        );
        attributes.insert(
            "roof_area".to_string(),
            serde_json::from_value(json!({ "attribute_type": "range" })).unwrap(),
        );

        let store = Arc::new(MemoryLeadStore::new());
        let processor = Arc::new(Processor::new(
            store.clone(),
            Validator::new(rules).unwrap(),
            Normalizer::new(normalization),
            Mapper::new(attributes, "solar_premium".to_string()),
            PartnerClient::new(partner_url, "partner-token".to_string(), Duration::from_secs(5))
                .unwrap(),
            RetryPolicy::new(Duration::from_millis(20), Duration::from_millis(160), 3),
        ));
        let queue = worker::spawn_worker(processor, 64);

        let app_state = Arc::new(AppState {
            store: store.clone(),
            queue,
            webhook_secret,
            recent_submission_cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(1_000)
                .build(),
        });

        let app = Router::new()
            .route("/health", get(handlers::health))
            .route("/webhooks/leads", post(handlers::intake_lead))
            .route("/api/v1/leads/:id", get(handlers::get_lead))
            .route("/api/v1/stats", get(handlers::get_stats))
            .with_state(app_state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            store,
            client: reqwest::Client::new(),
        }
    }

    async fn submit(&self, payload: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}/webhooks/leads", self.base_url))
            .json(&payload)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let body: Value = resp.json().await.unwrap();
        (status, body)
    }

    async fn wait_for_status(&self, lead_id: i64, expected: LeadStatus) -> bool {
        for _ in 0..300 {
            if self.store.get_lead(lead_id).await.unwrap().status == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn valid_payload() -> Value {
    json!({
        "zipcode": "53859",
        "questions": { "Sind Sie Eigentümer der Immobilie?": "Ja" },
        "email": "  Jane@Example.COM ",
        "phone": "+491511234567",
        "first_name": " Jane ",
        "roof_area": 120,
    })
}

#[tokio::test]
async fn valid_lead_travels_the_whole_pipeline() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/leads"))
        .and(header("Authorization", "Bearer partner-token"))
        .and(body_json(json!({
            "phone": "+491511234567",
            "product": { "name": "solar_premium" },
            "first_name": "Jane",
            "roof_area": 120,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&partner)
        .await;

    let app = TestApp::spawn(format!("{}/leads", partner.uri()), None).await;
    let (status, body) = app.submit(valid_payload()).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    let lead_id = body["id"].as_i64().unwrap();
    assert_eq!(body["status"], json!("RECEIVED"));

    assert!(app.wait_for_status(lead_id, LeadStatus::Delivered).await);

    // Full audit trail via the read API.
    let detail: Value = app
        .client
        .get(format!("{}/api/v1/leads/{}", app.base_url, lead_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["lead"]["status"], json!("DELIVERED"));
    // Raw payload preserved exactly as received.
    assert_eq!(detail["lead"]["raw_payload"]["email"], json!("  Jane@Example.COM "));
    assert_eq!(
        detail["lead"]["normalized_payload"]["email"],
        json!("jane@example.com")
    );
    let attempts = detail["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["attempt_no"], json!(1));
    assert_eq!(attempts[0]["success"], json!(true));
    assert_eq!(attempts[0]["response_status"], json!(201));
}

#[tokio::test]
async fn invalid_lead_is_rejected_and_partner_never_called() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let mut payload = valid_payload();
    payload["zipcode"] = json!("10115");
    let (status, body) = app.submit(payload).await;
    // Intake accepts everything; rejection happens in the pipeline.
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    let lead_id = body["id"].as_i64().unwrap();

    assert!(app.wait_for_status(lead_id, LeadStatus::Rejected).await);
    let lead = app.store.get_lead(lead_id).await.unwrap();
    assert_eq!(lead.rejection_reason.as_deref(), Some("ZIP_PATTERN_MISMATCH"));
    assert_eq!(app.store.attempt_count(lead_id).await.unwrap(), 0);
}

#[tokio::test]
async fn partner_client_error_fails_permanently_after_one_attempt() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown attribute"))
        .expect(1)
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let (_, body) = app.submit(valid_payload()).await;
    let lead_id = body["id"].as_i64().unwrap();

    assert!(app.wait_for_status(lead_id, LeadStatus::PermanentlyFailed).await);
    let lead = app.store.get_lead(lead_id).await.unwrap();
    assert_eq!(lead.rejection_reason.as_deref(), Some("DELIVERY_REJECTED"));
    assert_eq!(app.store.attempt_count(lead_id).await.unwrap(), 1);

    let attempts = app.store.list_attempts(lead_id).await.unwrap();
    assert_eq!(attempts[0].response_status, Some(422));
    assert_eq!(attempts[0].error_message.as_deref(), Some("unknown attribute"));
}

#[tokio::test]
async fn transient_failure_is_retried_until_delivered() {
    let partner = MockServer::start().await;
    // First call fails with a server error, subsequent calls succeed.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&partner)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let (_, body) = app.submit(valid_payload()).await;
    let lead_id = body["id"].as_i64().unwrap();

    assert!(app.wait_for_status(lead_id, LeadStatus::Delivered).await);

    let attempts = app.store.list_attempts(lead_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].response_status, Some(500));
    assert!(attempts[1].success);
    assert_eq!(attempts[1].attempt_no, 2);
}

#[tokio::test]
async fn retries_exhaust_into_permanent_failure() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let (_, body) = app.submit(valid_payload()).await;
    let lead_id = body["id"].as_i64().unwrap();

    assert!(app.wait_for_status(lead_id, LeadStatus::PermanentlyFailed).await);
    let lead = app.store.get_lead(lead_id).await.unwrap();
    assert_eq!(lead.rejection_reason.as_deref(), Some("RETRIES_EXHAUSTED"));
    assert_eq!(app.store.attempt_count(lead_id).await.unwrap(), 3);
}

#[tokio::test]
async fn repeat_submission_is_annotated_not_dropped() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let (_, first) = app.submit(valid_payload()).await;
    let first_id = first.get("id").and_then(Value::as_i64).unwrap();
    assert!(first.get("duplicate_of").is_none());

    let (status, second) = app.submit(valid_payload()).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    assert_eq!(second["duplicate_of"], json!(first_id));
    assert_ne!(second["id"], first["id"]);
}

#[tokio::test]
async fn webhook_secret_is_enforced() {
    let partner = MockServer::start().await;
    let app = TestApp::spawn(partner.uri(), Some("s3cret".to_string())).await;

    let resp = app
        .client
        .post(format!("{}/webhooks/leads", app.base_url))
        .json(&valid_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .post(format!("{}/webhooks/leads", app.base_url))
        .header("X-Webhook-Token", "wrong")
        .json(&valid_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .post(format!("{}/webhooks/leads", app.base_url))
        .header("X-Webhook-Token", "s3cret")
        .json(&valid_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn non_object_payload_is_a_bad_request() {
    let partner = MockServer::start().await;
    let app = TestApp::spawn(partner.uri(), None).await;

    let resp = app
        .client
        .post(format!("{}/webhooks/leads", app.base_url))
        .json(&json!([1, 2, 3]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_reflect_pipeline_outcomes() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&partner)
        .await;

    let app = TestApp::spawn(partner.uri(), None).await;
    let (_, delivered) = app.submit(valid_payload()).await;
    let mut bad = valid_payload();
    bad["zipcode"] = json!("10115");
    // Distinct payloads keep content hashes apart.
    bad["phone"] = json!("+49000");
    let (_, rejected) = app.submit(bad).await;

    assert!(
        app.wait_for_status(delivered["id"].as_i64().unwrap(), LeadStatus::Delivered)
            .await
    );
    assert!(
        app.wait_for_status(rejected["id"].as_i64().unwrap(), LeadStatus::Rejected)
            .await
    );

    let stats: Value = app
        .client
        .get(format!("{}/api/v1/stats", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total"], json!(2));
    let by_status = stats["by_status"].as_array().unwrap();
    let count = |s: &str| {
        by_status
            .iter()
            .find(|c| c["status"] == json!(s))
            .map(|c| c["count"].clone())
    };
    assert_eq!(count("DELIVERED"), Some(json!(1)));
    assert_eq!(count("REJECTED"), Some(json!(1)));
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let partner = MockServer::start().await;
    let app = TestApp::spawn(partner.uri(), None).await;
    let body: Value = app
        .client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["service"], json!("lead-gateway"));
}
