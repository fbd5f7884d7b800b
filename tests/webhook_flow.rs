//! End-to-end webhook tests: HTTP request in, state + outbound acks out.
//!
//! Uses an in-memory store, a recording sender, and a scripted classifier
//! driven through the real axum router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use kawal_obat::error::{GatewayError, SendError};
use kawal_obat::gateway::{
    ActionItem, Classification, ClassifyContext, Intent, IntentClassifier, ResponseType,
};
use kawal_obat::idempotency::IdempotencyLedger;
use kawal_obat::model::{
    ConfirmationStatus, ConversationContext, Patient, Reminder, ReminderStatus,
    VerificationStatus,
};
use kawal_obat::outbound::WaSender;
use kawal_obat::pipeline::router::{MessageRouter, RouterConfig};
use kawal_obat::store::{LibSqlStore, Store};
use kawal_obat::webhook::routes::{AppState, webhook_routes};

const TOKEN: &str = "test-token";

// ── Test doubles ────────────────────────────────────────────────────

struct RecordingSender {
    sent: tokio::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl WaSender for RecordingSender {
    async fn send_text(&self, phone: &str, body: &str) -> Result<(), SendError> {
        self.sent
            .lock()
            .await
            .push((phone.to_string(), body.to_string()));
        Ok(())
    }
}

/// Scripted classifier: panics, fails, or returns a fixed classification.
enum MockBehavior {
    /// The classifier must not be consulted at all for this test.
    PanicIfCalled,
    Fail,
    Respond(Classification),
}

struct MockClassifier {
    behavior: MockBehavior,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockClassifier {
    fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentClassifier for MockClassifier {
    async fn classify(
        &self,
        _ctx: &ClassifyContext<'_>,
        message: &str,
    ) -> Result<Classification, GatewayError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::PanicIfCalled => {
                panic!("classifier must not be invoked for message: {message}")
            }
            MockBehavior::Fail => Err(GatewayError::RequestFailed {
                reason: "unreachable".into(),
            }),
            MockBehavior::Respond(c) => Ok(c.clone()),
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    app: Router,
    store: Arc<LibSqlStore>,
    sender: Arc<RecordingSender>,
    classifier: Arc<MockClassifier>,
}

async fn harness(behavior: MockBehavior) -> Harness {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let sender = RecordingSender::new();
    let classifier = MockClassifier::new(behavior);

    let router = Arc::new(MessageRouter::new(
        store.clone() as Arc<dyn Store>,
        sender.clone() as Arc<dyn WaSender>,
        classifier.clone() as Arc<dyn IntentClassifier>,
        RouterConfig::default(),
    ));
    let ledger = Arc::new(IdempotencyLedger::new(
        store.clone() as Arc<dyn Store>,
        Duration::from_secs(3600),
    ));
    let app = webhook_routes(AppState {
        router,
        ledger,
        webhook_token: SecretString::from(TOKEN),
    });

    Harness {
        app,
        store,
        sender,
        classifier,
    }
}

impl Harness {
    async fn post(&self, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn seed_patient(&self, phone: &str, status: VerificationStatus) -> Patient {
        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            name: "Pasien Uji".into(),
            phone_number: phone.into(),
            verification_status: status,
            is_active: true,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_patient(&patient).await.unwrap();
        patient
    }

    async fn seed_sent_reminder(
        &self,
        patient_id: Uuid,
        sent_at: chrono::DateTime<Utc>,
    ) -> Reminder {
        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            patient_id,
            medication_name: "tamoxifen".into(),
            scheduled_at: sent_at,
            status: ReminderStatus::Sent,
            confirmation_status: ConfirmationStatus::Pending,
            confirmation_response: None,
            confirmation_response_at: None,
            sent_at: Some(sent_at),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_reminder(&reminder).await.unwrap();
        reminder
    }

    async fn sent_count(&self) -> usize {
        self.sender.sent.lock().await.len()
    }
}

fn gratitude_classification() -> Classification {
    Classification {
        intent: Intent::Gratitude,
        confidence: 0.9,
        response_type: ResponseType::AutoReply,
        message: Some("Sama-sama, semoga lekas sehat!".into()),
        actions: vec![],
    }
}

// ── HTTP surface ────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_missing_token() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"sender": "628123456789", "message": "halo"}).to_string()))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_payload_returns_field_issues() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let (status, body) = h.post(json!({"sender": "123"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    let issues = body["issues"].as_array().unwrap();
    assert!(issues.len() >= 2);
    // No state was touched.
    assert_eq!(h.sent_count().await, 0);
}

#[tokio::test]
async fn unknown_phone_is_ignored_not_an_error() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let (status, body) = h
        .post(json!({"sender": "6289999999999", "message": "halo"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ignored");
    assert_eq!(body["detail"], "no_patient_match");
    assert_eq!(h.sent_count().await, 0);
}

#[tokio::test]
async fn health_requires_auth() {
    let h = harness(MockBehavior::PanicIfCalled).await;

    let unauthenticated = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(unauthenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authenticated = Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(authenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── Idempotency ─────────────────────────────────────────────────────

#[tokio::test]
async fn replayed_payload_processed_exactly_once() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Verified).await;
    let reminder = h.seed_sent_reminder(patient.id, Utc::now()).await;

    let payload = json!({
        "sender": "6281234567890",
        "message": "SUDAH",
        "message_id": "wamid.replay-1",
    });

    let (status, body) = h.post(payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["result"], "confirmation");

    for _ in 0..3 {
        let (status, body) = h.post(payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], true);
    }

    // Exactly one state mutation and one outbound ack.
    let reloaded = h.store.get_reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(reloaded.confirmation_status, ConfirmationStatus::Confirmed);
    assert_eq!(reloaded.confirmation_response.as_deref(), Some("SUDAH"));
    assert_eq!(h.sent_count().await, 1);
}

#[tokio::test]
async fn replay_without_message_id_uses_fallback_fingerprint() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    h.seed_patient("6281234567890", VerificationStatus::Pending).await;

    let payload = json!({
        "sender": "6281234567890",
        "message": "Ya",
        "timestamp": 1_754_816_400i64,
    });
    let (_, first) = h.post(payload.clone()).await;
    assert_eq!(first["duplicate"], false);
    let (_, second) = h.post(payload).await;
    assert_eq!(second["duplicate"], true);
}

// ── Priority ordering ───────────────────────────────────────────────

#[tokio::test]
async fn verification_context_never_reaches_classifier() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Pending).await;
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::Verification,
            None,
            None,
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

    // Free text that would scream "emergency" at any classifier.
    let (status, body) = h
        .post(json!({
            "sender": "6281234567890",
            "message": "tolong ini darurat sekali",
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "verification");
    // The mock panics when called; surviving here proves it never was.
    assert_eq!(h.classifier.call_count(), 0);
}

// ── Confirmation scoping ────────────────────────────────────────────

#[tokio::test]
async fn sudah_updates_only_most_recent_sent_reminder() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Verified).await;
    let older = h
        .seed_sent_reminder(patient.id, Utc::now() - chrono::Duration::hours(8))
        .await;
    let newer = h
        .seed_sent_reminder(patient.id, Utc::now() - chrono::Duration::hours(1))
        .await;

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "SUDAH"}))
        .await;
    assert_eq!(body["result"], "confirmation");
    assert_eq!(body["detail"], "confirmed");

    let newer_row = h.store.get_reminder(newer.id).await.unwrap().unwrap();
    let older_row = h.store.get_reminder(older.id).await.unwrap().unwrap();
    assert_eq!(newer_row.confirmation_status, ConfirmationStatus::Confirmed);
    assert_eq!(older_row.confirmation_status, ConfirmationStatus::Pending);
}

// ── Unsubscribe precedence ──────────────────────────────────────────

#[tokio::test]
async fn unsubscribe_wins_over_accept() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Pending).await;
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::Verification,
            None,
            None,
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

    let (_, body) = h
        .post(json!({
            "sender": "6281234567890",
            "message": "ya tapi saya mau berhenti",
        }))
        .await;
    assert_eq!(body["result"], "verification");
    assert_eq!(body["detail"], "unsubscribed");

    let reloaded = h.store.get_patient(patient.id).await.unwrap().unwrap();
    assert_eq!(reloaded.verification_status, VerificationStatus::Declined);
    assert!(!reloaded.is_active);
}

// ── Expiry safety net ───────────────────────────────────────────────

#[tokio::test]
async fn expired_context_still_completes_verification() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Pending).await;
    // Context set with a zero TTL is already expired at read time.
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::Verification,
            None,
            None,
            Duration::from_secs(0),
        )
        .await
        .unwrap();

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "Ya saya setuju"}))
        .await;
    assert_eq!(body["result"], "verification");
    assert_eq!(body["detail"], "verified");

    let reloaded = h.store.get_patient(patient.id).await.unwrap().unwrap();
    assert_eq!(reloaded.verification_status, VerificationStatus::Verified);
}

// ── No-match passthrough ────────────────────────────────────────────

#[tokio::test]
async fn sudah_without_awaiting_reminder_goes_to_classifier() {
    let h = harness(MockBehavior::Respond(gratitude_classification())).await;
    h.seed_patient("6281234567890", VerificationStatus::Verified).await;

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "sudah"}))
        .await;
    assert_eq!(body["result"], "classified");
    assert_eq!(h.classifier.call_count(), 1);
}

#[tokio::test]
async fn second_ya_after_verification_is_ignored_and_logged() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Verified).await;

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "YA"}))
        .await;
    assert_eq!(body["result"], "verification");
    assert_eq!(body["detail"], "ignored_already_resolved");

    let logs = h.store.list_verification_logs(patient.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].result, "ignored_already_resolved");
    // No reply was expected, none was sent.
    assert_eq!(h.sent_count().await, 0);
}

// ── Classifier failure fallback ─────────────────────────────────────

#[tokio::test]
async fn classifier_failure_still_answers_patient() {
    let h = harness(MockBehavior::Fail).await;
    h.seed_patient("6281234567890", VerificationStatus::Verified).await;

    let (status, body) = h
        .post(json!({"sender": "6281234567890", "message": "apakah programnya gratis?"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "fallback");
    // Generic acknowledgement still went out.
    assert_eq!(h.sent_count().await, 1);
}

// ── Emergency escalation & actions ──────────────────────────────────

#[tokio::test]
async fn emergency_intent_escalates_and_executes_actions() {
    let classification = Classification {
        intent: Intent::Emergency,
        confidence: 0.97,
        response_type: ResponseType::AutoReply,
        message: Some("Relawan kami segera menghubungi Anda.".into()),
        actions: vec![ActionItem {
            action_type: "notify_volunteer".into(),
            data: json!({"message": "pasien sesak napas", "priority": "emergency"}),
        }],
    };
    let h = harness(MockBehavior::Respond(classification)).await;
    h.seed_patient("6281234567890", VerificationStatus::Verified).await;

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "saya sesak napas sekali"}))
        .await;
    assert_eq!(body["result"], "classified");
    assert_eq!(body["detail"], "emergency+escalated");
    // Auto-reply was sent.
    assert_eq!(h.sent_count().await, 1);
}

// ── Poll-style replies ──────────────────────────────────────────────

#[tokio::test]
async fn verification_poll_option_verifies() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Pending).await;
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::Verification,
            None,
            None,
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

    let (_, body) = h
        .post(json!({
            "sender": "6281234567890",
            "poll_name": "Verifikasi Kepesertaan",
            "selected_option": "Ya",
        }))
        .await;
    assert_eq!(body["detail"], "verified");
}

#[tokio::test]
async fn help_poll_option_escalates() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Verified).await;
    let reminder = h.seed_sent_reminder(patient.id, Utc::now()).await;
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::ReminderConfirmation,
            Some("reminder"),
            Some(reminder.id),
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

    let (_, body) = h
        .post(json!({
            "sender": "6281234567890",
            "poll_name": "Konfirmasi Minum Obat",
            "selected_option": "Butuh Bantuan",
        }))
        .await;
    assert_eq!(body["result"], "confirmation");
    assert_eq!(body["detail"], "escalated");
    // Reminder untouched by the help request.
    let reloaded = h.store.get_reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(reloaded.confirmation_status, ConfirmationStatus::Pending);
}

// ── Spec scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn scenario_pending_patient_accepts_verification() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281234567890", VerificationStatus::Pending).await;
    h.store
        .set_context(
            patient.id,
            &patient.phone_number,
            ConversationContext::Verification,
            None,
            None,
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

    let (_, body) = h
        .post(json!({"sender": "6281234567890", "message": "Ya saya setuju"}))
        .await;
    assert_eq!(body["detail"], "verified");

    // Status transitioned.
    let reloaded = h.store.get_patient(patient.id).await.unwrap().unwrap();
    assert_eq!(reloaded.verification_status, VerificationStatus::Verified);

    // Exactly one audit row with result=verified.
    let logs = h.store.list_verification_logs(patient.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].result, "verified");
    assert_eq!(logs[0].message_body, "Ya saya setuju");

    // One outbound ack; context cleared.
    assert_eq!(h.sent_count().await, 1);
    assert!(h
        .store
        .active_context(patient.id, &patient.phone_number)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn scenario_belum_keeps_reminder_pending_with_response() {
    let h = harness(MockBehavior::PanicIfCalled).await;
    let patient = h.seed_patient("6281298765432", VerificationStatus::Verified).await;
    let reminder = h.seed_sent_reminder(patient.id, Utc::now()).await;

    let (_, body) = h
        .post(json!({"sender": "6281298765432", "message": "belum minum obatnya"}))
        .await;
    assert_eq!(body["result"], "confirmation");
    assert_eq!(body["detail"], "still_pending");

    let reloaded = h.store.get_reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(reloaded.confirmation_status, ConfirmationStatus::Pending);
    assert_eq!(reloaded.status, ReminderStatus::Sent);
    assert_eq!(
        reloaded.confirmation_response.as_deref(),
        Some("belum minum obatnya")
    );

    // Ack offers continued monitoring.
    let sent = h.sender.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("memantau"));
}
