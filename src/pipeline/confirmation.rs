//! Reminder confirmation state machine.
//!
//! Owns the `confirmation_status` side of a reminder row. The target row id
//! is fetched just before the update and the update itself is conditional on
//! the row still being PENDING, so duplicates that slip past the idempotency
//! ledger land as no-ops.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{MessageDirection, NotificationPriority, Patient};
use crate::outbound::{WaSender, templates};
use crate::pipeline::keywords::ConfirmationKeyword;
use crate::store::Store;
use crate::store::traits::NewMessage;

/// What the state machine did with a confirmation reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Reminder marked CONFIRMED (or was already — still acknowledged).
    Confirmed,
    /// "Not yet" — response recorded, confirmation stays PENDING.
    StillPending,
    /// Reply matched neither list; patient was asked to clarify.
    NeedsClarification,
    /// Patient asked for help; a volunteer was notified.
    Escalated,
}

impl ConfirmationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::StillPending => "still_pending",
            Self::NeedsClarification => "needs_clarification",
            Self::Escalated => "escalated",
        }
    }
}

pub struct ConfirmationSm {
    store: Arc<dyn Store>,
    sender: Arc<dyn WaSender>,
}

impl ConfirmationSm {
    pub fn new(store: Arc<dyn Store>, sender: Arc<dyn WaSender>) -> Self {
        Self { store, sender }
    }

    /// Apply a matched confirmation keyword to a specific reminder row.
    pub async fn handle(
        &self,
        patient: &Patient,
        phone: &str,
        reminder_id: Uuid,
        keyword: ConfirmationKeyword,
        raw_text: &str,
    ) -> Result<ConfirmationOutcome, PipelineError> {
        let now = Utc::now();
        let outcome = match keyword {
            ConfirmationKeyword::Done => {
                let updated = self
                    .store
                    .confirm_reminder(reminder_id, raw_text, now)
                    .await?;
                if !updated {
                    // Already confirmed by a racing delivery — no-op, but the
                    // patient still deserves the thank-you.
                    info!(reminder_id = %reminder_id, "Reminder already confirmed; duplicate reply");
                }
                self.send_ack(patient, phone, &templates::confirmation_done(&patient.name))
                    .await;
                ConfirmationOutcome::Confirmed
            }
            ConfirmationKeyword::NotYet => {
                // Stays PENDING — only the response text and timestamp land.
                self.store
                    .record_pending_response(reminder_id, raw_text, now)
                    .await?;
                self.send_ack(
                    patient,
                    phone,
                    &templates::confirmation_not_yet(&patient.name),
                )
                .await;
                ConfirmationOutcome::StillPending
            }
            ConfirmationKeyword::Invalid => {
                self.send_ack(patient, phone, &templates::confirmation_clarify())
                    .await;
                ConfirmationOutcome::NeedsClarification
            }
        };

        info!(
            patient_id = %patient.id,
            reminder_id = %reminder_id,
            outcome = outcome.label(),
            "Confirmation reply processed"
        );
        Ok(outcome)
    }

    /// "Butuh Bantuan" poll option — escalate to a volunteer.
    pub async fn escalate_help_request(
        &self,
        patient: &Patient,
        phone: &str,
        raw_text: &str,
    ) -> Result<ConfirmationOutcome, PipelineError> {
        self.store
            .create_notification(
                patient.id,
                &format!("Pasien meminta bantuan saat konfirmasi obat: {raw_text}"),
                NotificationPriority::High,
            )
            .await?;
        self.send_ack(patient, phone, &templates::need_help(&patient.name))
            .await;
        Ok(ConfirmationOutcome::Escalated)
    }

    async fn send_ack(&self, patient: &Patient, phone: &str, body: &str) {
        if let Err(e) = self.sender.send_text(phone, body).await {
            warn!(patient_id = %patient.id, error = %e, "Failed to send confirmation ack");
        }
        if let Err(e) = self
            .store
            .append_message(&NewMessage {
                patient_id: patient.id,
                direction: MessageDirection::Outbound,
                body: body.to_string(),
                intent: None,
                confidence: None,
            })
            .await
        {
            warn!(patient_id = %patient.id, error = %e, "Failed to log outbound ack");
        }
    }
}
