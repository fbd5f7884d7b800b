//! Verification state machine — owns the patient consent lifecycle.
//!
//! Transitions: PENDING → VERIFIED | DECLINED. Unsubscribe is a decline
//! plus deactivation (patient goes inactive, unsent reminders are removed).
//! Transitions are guarded on the current status at the database level, so
//! replying twice never double-transitions. Every handled reply writes one
//! audit row and sends at most one acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::model::{
    ConversationContext, MessageDirection, Patient, VerificationStatus,
};
use crate::outbound::{WaSender, templates};
use crate::pipeline::keywords::VerificationKeyword;
use crate::store::Store;
use crate::store::traits::NewMessage;

/// What the state machine did with a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Declined,
    Unsubscribed,
    /// Reply didn't match any keyword list; patient was re-prompted.
    Clarified,
    /// Patient already resolved (or lost the transition race); logged only.
    Ignored,
}

impl VerificationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Declined => "declined",
            Self::Unsubscribed => "unsubscribed",
            Self::Clarified => "clarification_needed",
            Self::Ignored => "ignored_already_resolved",
        }
    }
}

pub struct VerificationSm {
    store: Arc<dyn Store>,
    sender: Arc<dyn WaSender>,
    /// TTL used when re-arming the verification context after a clarify.
    context_ttl: Duration,
}

impl VerificationSm {
    pub fn new(store: Arc<dyn Store>, sender: Arc<dyn WaSender>, context_ttl: Duration) -> Self {
        Self {
            store,
            sender,
            context_ttl,
        }
    }

    /// Drive one verification reply through the state machine.
    pub async fn handle(
        &self,
        patient: &Patient,
        phone: &str,
        keyword: VerificationKeyword,
        raw_text: &str,
    ) -> Result<VerificationOutcome, PipelineError> {
        // Re-entrancy guard: a resolved patient cannot transition again.
        // This also covers a stale verification context surviving past the
        // transition (the second reply is logged, nothing else happens).
        if patient.verification_status != VerificationStatus::Pending {
            warn!(
                patient_id = %patient.id,
                status = patient.verification_status.as_str(),
                "Verification reply for already-resolved patient; ignoring"
            );
            self.store
                .append_verification_log(patient.id, raw_text, "ignored_already_resolved")
                .await?;
            self.store.clear_context(patient.id, phone).await?;
            return Ok(VerificationOutcome::Ignored);
        }

        let outcome = match keyword {
            VerificationKeyword::Accept => self.accept(patient).await?,
            VerificationKeyword::Decline => self.decline(patient, false).await?,
            VerificationKeyword::Unsubscribe => self.decline(patient, true).await?,
            VerificationKeyword::Other => {
                // Not a transition — keep the expectation open and re-prompt.
                self.store
                    .set_context(
                        patient.id,
                        phone,
                        ConversationContext::Verification,
                        None,
                        None,
                        self.context_ttl,
                    )
                    .await?;
                VerificationOutcome::Clarified
            }
        };

        self.store
            .append_verification_log(patient.id, raw_text, outcome.label())
            .await?;

        if !matches!(outcome, VerificationOutcome::Clarified) {
            self.store.clear_context(patient.id, phone).await?;
        }

        // No ack when the transition lost a race: the winning delivery
        // already answered.
        let ack = match outcome {
            VerificationOutcome::Verified => Some(templates::verification_accepted(&patient.name)),
            VerificationOutcome::Declined => Some(templates::verification_declined(&patient.name)),
            VerificationOutcome::Unsubscribed => Some(templates::unsubscribed(&patient.name)),
            VerificationOutcome::Clarified => Some(templates::verification_clarify()),
            VerificationOutcome::Ignored => None,
        };
        if let Some(ack) = ack {
            self.send_ack(patient, phone, &ack).await;
        }

        info!(
            patient_id = %patient.id,
            outcome = outcome.label(),
            "Verification reply processed"
        );
        Ok(outcome)
    }

    async fn accept(&self, patient: &Patient) -> Result<VerificationOutcome, PipelineError> {
        let transitioned = self
            .store
            .transition_verification_status(
                patient.id,
                VerificationStatus::Pending,
                VerificationStatus::Verified,
                Some(Utc::now()),
            )
            .await?;

        if transitioned {
            Ok(VerificationOutcome::Verified)
        } else {
            // Lost a race with a concurrent reply.
            Ok(VerificationOutcome::Ignored)
        }
    }

    async fn decline(
        &self,
        patient: &Patient,
        unsubscribe: bool,
    ) -> Result<VerificationOutcome, PipelineError> {
        let transitioned = self
            .store
            .transition_verification_status(
                patient.id,
                VerificationStatus::Pending,
                VerificationStatus::Declined,
                None,
            )
            .await?;

        if !transitioned {
            return Ok(VerificationOutcome::Ignored);
        }

        if unsubscribe {
            // Stronger than decline: no future contact at all.
            self.store.set_patient_active(patient.id, false).await?;
            self.store.deactivate_pending_reminders(patient.id).await?;
            Ok(VerificationOutcome::Unsubscribed)
        } else {
            Ok(VerificationOutcome::Declined)
        }
    }

    /// Send an acknowledgement and log it. Failures never abort processing —
    /// the state transition is already durable.
    async fn send_ack(&self, patient: &Patient, phone: &str, body: &str) {
        if let Err(e) = self.sender.send_text(phone, body).await {
            warn!(patient_id = %patient.id, error = %e, "Failed to send verification ack");
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
