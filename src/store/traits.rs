//! Backend-agnostic `Store` trait — single async interface for all
//! persistence this subsystem touches.
//!
//! All cross-request coordination goes through this trait; request handlers
//! hold no mutable state of their own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    ConversationContext, ConversationMessage, ConversationState, MessageDirection,
    NotificationPriority, Patient, Reminder, VerificationLog, VerificationStatus,
    VolunteerNotification,
};

/// Parameters for appending one conversation log entry.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub patient_id: Uuid,
    pub direction: MessageDirection,
    pub body: String,
    pub intent: Option<String>,
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Patients ────────────────────────────────────────────────────

    /// Insert a patient. Registration normally happens in the dashboard;
    /// this exists for seeding and tests.
    async fn insert_patient(&self, patient: &Patient) -> Result<(), DatabaseError>;

    /// Look up an active patient by canonical phone number.
    ///
    /// The schema makes duplicates impossible; if a backend without that
    /// constraint returns several rows, the first match wins.
    async fn find_active_patient_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Patient>, DatabaseError>;

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>, DatabaseError>;

    /// Transition a patient's verification status, guarded on the current
    /// status. Returns false when the guard did not match (no row updated).
    async fn transition_verification_status(
        &self,
        id: Uuid,
        from: VerificationStatus,
        to: VerificationStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Flip a patient's `is_active` flag (unsubscribe semantics).
    async fn set_patient_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError>;

    // ── Conversation state ──────────────────────────────────────────

    /// Active (non-expired) context for a patient+phone pair, or `None`.
    ///
    /// Expiry is evaluated here, at read time. An expired row is reported
    /// as absent — there is no background sweeper.
    async fn active_context(
        &self,
        patient_id: Uuid,
        phone: &str,
    ) -> Result<Option<ConversationState>, DatabaseError>;

    /// Create or overwrite the context row for a patient+phone pair.
    async fn set_context(
        &self,
        patient_id: Uuid,
        phone: &str,
        context: ConversationContext,
        related_entity_type: Option<&str>,
        related_entity_id: Option<Uuid>,
        ttl: Duration,
    ) -> Result<(), DatabaseError>;

    /// Null the context fields without deleting history or counters.
    async fn clear_context(&self, patient_id: Uuid, phone: &str) -> Result<(), DatabaseError>;

    /// Append one message to the conversation log and bump the state's
    /// message counter. Append-only; rows are never mutated afterwards.
    async fn append_message(&self, msg: &NewMessage) -> Result<Uuid, DatabaseError>;

    /// Most recent conversation messages for a patient, oldest first.
    async fn recent_messages(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    // ── Reminders ───────────────────────────────────────────────────

    /// Insert a reminder row (scheduler path and `send_followup` actions).
    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), DatabaseError>;

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, DatabaseError>;

    /// Reminders awaiting confirmation (`status='SENT'`,
    /// `confirmation_status='PENDING'`), most recently sent first.
    async fn awaiting_reminders(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Reminder>, DatabaseError>;

    /// The reminder a late confirmation should land on: most recently sent
    /// row still awaiting confirmation (`sent_at` DESC, LIMIT 1).
    async fn latest_awaiting_reminder(
        &self,
        patient_id: Uuid,
    ) -> Result<Option<Reminder>, DatabaseError> {
        Ok(self
            .awaiting_reminders(patient_id, 1)
            .await?
            .into_iter()
            .next())
    }

    /// Mark a reminder confirmed. Conditional on the row still being
    /// PENDING-confirmation, so a racing duplicate is a no-op. Returns
    /// whether a row was updated.
    async fn confirm_reminder(
        &self,
        id: Uuid,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Record a "not yet" response without resolving the confirmation.
    async fn record_pending_response(
        &self,
        id: Uuid,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Remove reminders that have not been sent yet (unsubscribe).
    /// Sent history is preserved. Returns the number of rows removed.
    async fn deactivate_pending_reminders(&self, patient_id: Uuid) -> Result<u64, DatabaseError>;

    // ── Audit & escalation ──────────────────────────────────────────

    /// Append one immutable verification audit row.
    async fn append_verification_log(
        &self,
        patient_id: Uuid,
        message_body: &str,
        result: &str,
    ) -> Result<(), DatabaseError>;

    /// Verification audit rows for a patient, oldest first.
    async fn list_verification_logs(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<VerificationLog>, DatabaseError>;

    /// Create a volunteer notification with status "pending"; assignment
    /// and resolution happen in the dashboard.
    async fn create_notification(
        &self,
        patient_id: Uuid,
        message: &str,
        priority: NotificationPriority,
    ) -> Result<VolunteerNotification, DatabaseError>;

    // ── Idempotency ledger ──────────────────────────────────────────

    /// Atomic check-and-set of a dedup marker. Returns true when the
    /// fingerprint is first-seen within the window, false on re-delivery.
    /// Markers older than `window` are pruned opportunistically.
    async fn check_and_set_marker(
        &self,
        fingerprint: &str,
        window: Duration,
    ) -> Result<bool, DatabaseError>;
}
