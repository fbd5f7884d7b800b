//! Message router — the priority pipeline over resolved inbound events.
//!
//! See the module docs on [`crate::pipeline`] for the branch order. The
//! guiding rule: deterministic, auditable keyword matching wins whenever a
//! prior prompt created a specific expectation; the probabilistic classifier
//! only ever sees genuinely open-ended text.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{GatewayError, PipelineError};
use crate::gateway::{ClassifyContext, Intent, IntentClassifier, ResponseType};
use crate::model::{
    ConversationContext, MessageDirection, NotificationPriority, Patient, VerificationStatus,
};
use crate::outbound::{WaSender, templates};
use crate::pipeline::actions::ActionExecutor;
use crate::pipeline::confirmation::{ConfirmationOutcome, ConfirmationSm};
use crate::pipeline::keywords::{
    self, ConfirmationKeyword, PollConfirmation, VerificationKeyword,
};
use crate::pipeline::verification::{VerificationOutcome, VerificationSm};
use crate::store::Store;
use crate::store::traits::NewMessage;
use crate::webhook::payload::{CanonicalEvent, MessageContent};

/// Router tunables, injected per instance (no process-wide globals).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub context_ttl: Duration,
    pub history_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            context_ttl: Duration::from_secs(1800),
            history_limit: 10,
        }
    }
}

/// What the router did with an event — surfaced in the webhook response
/// and in logs.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// No active patient owns this phone number; nothing was touched.
    Ignored { reason: String },
    Verification(VerificationOutcome),
    Confirmation(ConfirmationOutcome),
    /// Classifier ran; actions may have fired.
    Classified {
        intent: Intent,
        confidence: f32,
        escalated: bool,
        actions_executed: usize,
    },
    /// Classifier unavailable/failed — generic acknowledgement sent.
    Fallback,
}

impl RouteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::Verification(_) => "verification",
            Self::Confirmation(_) => "confirmation",
            Self::Classified { .. } => "classified",
            Self::Fallback => "fallback",
        }
    }
}

pub struct MessageRouter {
    store: Arc<dyn Store>,
    sender: Arc<dyn WaSender>,
    classifier: Arc<dyn IntentClassifier>,
    verification: VerificationSm,
    confirmation: ConfirmationSm,
    executor: ActionExecutor,
    config: RouterConfig,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn WaSender>,
        classifier: Arc<dyn IntentClassifier>,
        config: RouterConfig,
    ) -> Self {
        let verification = VerificationSm::new(store.clone(), sender.clone(), config.context_ttl);
        let confirmation = ConfirmationSm::new(store.clone(), sender.clone());
        let executor = ActionExecutor::new(store.clone());
        Self {
            store,
            sender,
            classifier,
            verification,
            confirmation,
            executor,
            config,
        }
    }

    /// Resolve the patient and run the priority pipeline for one event.
    pub async fn handle_event(&self, event: &CanonicalEvent) -> Result<RouteOutcome, PipelineError> {
        // Patient resolution. No match → ignored, no state touched.
        let Some(patient) = self
            .store
            .find_active_patient_by_phone(&event.sender)
            .await?
        else {
            debug!(sender = %event.sender, "No active patient for sender; ignoring");
            return Ok(RouteOutcome::Ignored {
                reason: "no_patient_match".into(),
            });
        };

        // Log the inbound message. Fire-and-forget: audit must never block
        // the reply path.
        if let Err(e) = self
            .store
            .append_message(&NewMessage {
                patient_id: patient.id,
                direction: MessageDirection::Inbound,
                body: event.text().to_string(),
                intent: None,
                confidence: None,
            })
            .await
        {
            warn!(patient_id = %patient.id, error = %e, "Failed to log inbound message");
        }

        let outcome = self.route(&patient, event).await?;
        info!(
            patient_id = %patient.id,
            outcome = outcome.label(),
            "Inbound message routed"
        );
        Ok(outcome)
    }

    /// The priority pipeline. Strict order; first applicable branch wins.
    async fn route(
        &self,
        patient: &Patient,
        event: &CanonicalEvent,
    ) -> Result<RouteOutcome, PipelineError> {
        let phone = &event.sender;
        let text = event.text();
        let context = self.store.active_context(patient.id, phone).await?;

        // Step 1: active verification context — strict keywords only, the
        // classifier must never see a consent decision.
        if let Some(state) = &context
            && state.current_context == Some(ConversationContext::Verification)
        {
            let keyword = self.verification_keyword(event);
            let outcome = self
                .verification
                .handle(patient, phone, keyword, text)
                .await?;
            return Ok(RouteOutcome::Verification(outcome));
        }

        // Step 2: active reminder-confirmation context.
        if let Some(state) = &context
            && state.current_context == Some(ConversationContext::ReminderConfirmation)
        {
            return self
                .confirm_with_context(patient, event, state.related_entity_id)
                .await;
        }

        // Step 3: no context, but the patient is still unverified. Safety
        // net: an expired TTL must never permanently block verification.
        if patient.verification_status == VerificationStatus::Pending {
            let keyword = self.verification_keyword(event);
            let outcome = self
                .verification
                .handle(patient, phone, keyword, text)
                .await?;
            return Ok(RouteOutcome::Verification(outcome));
        }

        // Step 4: no context, verified patient, confirmation-shaped reply —
        // late confirmation against the newest reminder still waiting.
        if patient.verification_status == VerificationStatus::Verified {
            if let Some(outcome) = self.confirm_without_context(patient, event).await? {
                return Ok(outcome);
            }
        }

        // Resolved patients repeating a consent keyword ("YA" long after
        // verification): no-op, logged as an anomaly, no reply — nothing
        // was expected from them.
        if patient.verification_status != VerificationStatus::Pending {
            let keyword = self.verification_keyword(event);
            if matches!(
                keyword,
                VerificationKeyword::Accept | VerificationKeyword::Decline
            ) {
                warn!(
                    patient_id = %patient.id,
                    status = patient.verification_status.as_str(),
                    "Consent keyword from resolved patient; ignoring"
                );
                self.store
                    .append_verification_log(patient.id, text, "ignored_already_resolved")
                    .await?;
                return Ok(RouteOutcome::Verification(VerificationOutcome::Ignored));
            }
        }

        // Step 5/6: open-ended text — classify, or fall back to a generic ack.
        self.classify(patient, event).await
    }

    /// Poll options take priority over free-text keyword matching.
    fn verification_keyword(&self, event: &CanonicalEvent) -> VerificationKeyword {
        match &event.content {
            MessageContent::Poll {
                selected_option, ..
            } => keywords::match_verification_poll(selected_option)
                .unwrap_or_else(|| keywords::match_verification(selected_option)),
            MessageContent::Text(text) => keywords::match_verification(text),
        }
    }

    /// Step 2 — a confirmation context is open; resolve the target row and
    /// apply the reply. Done/NotYet close the context; Invalid keeps it open.
    async fn confirm_with_context(
        &self,
        patient: &Patient,
        event: &CanonicalEvent,
        related_reminder: Option<uuid::Uuid>,
    ) -> Result<RouteOutcome, PipelineError> {
        let phone = &event.sender;
        let text = event.text();

        // "Butuh Bantuan" short-circuits to escalation.
        if let MessageContent::Poll {
            selected_option, ..
        } = &event.content
            && keywords::match_confirmation_poll(selected_option)
                == Some(PollConfirmation::NeedHelp)
        {
            let outcome = self
                .confirmation
                .escalate_help_request(patient, phone, text)
                .await?;
            self.store.clear_context(patient.id, phone).await?;
            return Ok(RouteOutcome::Confirmation(outcome));
        }

        let keyword = self.confirmation_keyword(event);

        // The context may point at the reminder it was opened for; if not
        // (or it vanished), fall back to the newest awaiting row.
        let reminder_id = match related_reminder {
            Some(id) if self.store.get_reminder(id).await?.is_some() => Some(id),
            _ => self
                .store
                .latest_awaiting_reminder(patient.id)
                .await?
                .map(|r| r.id),
        };

        let Some(reminder_id) = reminder_id else {
            // Context without a live reminder — clear it and treat the text
            // as open-ended.
            warn!(patient_id = %patient.id, "Confirmation context without reminder; clearing");
            self.store.clear_context(patient.id, phone).await?;
            return self.classify(patient, event).await;
        };

        let outcome = self
            .confirmation
            .handle(patient, phone, reminder_id, keyword, text)
            .await?;

        if !matches!(outcome, ConfirmationOutcome::NeedsClarification) {
            self.store.clear_context(patient.id, phone).await?;
        }
        Ok(RouteOutcome::Confirmation(outcome))
    }

    /// Step 4 — no context, but the reply looks like a confirmation. Only
    /// fires when a reminder is actually awaiting one; otherwise the caller
    /// falls through to classification.
    async fn confirm_without_context(
        &self,
        patient: &Patient,
        event: &CanonicalEvent,
    ) -> Result<Option<RouteOutcome>, PipelineError> {
        let keyword = self.confirmation_keyword(event);
        if keyword == ConfirmationKeyword::Invalid {
            return Ok(None);
        }

        let Some(reminder) = self.store.latest_awaiting_reminder(patient.id).await? else {
            return Ok(None);
        };

        let outcome = self
            .confirmation
            .handle(patient, &event.sender, reminder.id, keyword, event.text())
            .await?;
        Ok(Some(RouteOutcome::Confirmation(outcome)))
    }

    fn confirmation_keyword(&self, event: &CanonicalEvent) -> ConfirmationKeyword {
        match &event.content {
            MessageContent::Poll {
                selected_option, ..
            } => match keywords::match_confirmation_poll(selected_option) {
                Some(PollConfirmation::Done) => ConfirmationKeyword::Done,
                Some(PollConfirmation::NotYet) => ConfirmationKeyword::NotYet,
                Some(PollConfirmation::NeedHelp) | None => {
                    keywords::match_confirmation(selected_option)
                }
            },
            MessageContent::Text(text) => keywords::match_confirmation(text),
        }
    }

    /// Steps 5 and 6 — classify open-ended text; degrade to a generic ack
    /// on any classifier failure. The patient always gets a reply.
    async fn classify(
        &self,
        patient: &Patient,
        event: &CanonicalEvent,
    ) -> Result<RouteOutcome, PipelineError> {
        let phone = &event.sender;
        let text = event.text();

        let history = self
            .store
            .recent_messages(patient.id, self.config.history_limit)
            .await
            .unwrap_or_default();
        let active_reminders = self
            .store
            .awaiting_reminders(patient.id, 5)
            .await
            .unwrap_or_default();

        let ctx = ClassifyContext {
            patient,
            active_reminders: &active_reminders,
            history: &history,
        };

        let classification = match self.classifier.classify(&ctx, text).await {
            Ok(c) => c,
            Err(GatewayError::Disabled) => {
                debug!(patient_id = %patient.id, "Classifier disabled; sending generic ack");
                self.send_reply(patient, phone, &templates::generic_fallback(&patient.name), None)
                    .await;
                return Ok(RouteOutcome::Fallback);
            }
            Err(e) => {
                warn!(patient_id = %patient.id, error = %e, "Classification failed; sending generic ack");
                self.send_reply(patient, phone, &templates::generic_fallback(&patient.name), None)
                    .await;
                return Ok(RouteOutcome::Fallback);
            }
        };

        // Emergency escalates immediately, regardless of confidence.
        let escalated = classification.intent == Intent::Emergency;
        if escalated {
            let preview: String = text.chars().take(200).collect();
            if let Err(e) = self
                .store
                .create_notification(
                    patient.id,
                    &format!("DARURAT: pesan pasien: {preview}"),
                    NotificationPriority::Emergency,
                )
                .await
            {
                warn!(patient_id = %patient.id, error = %e, "Failed to create emergency notification");
            }
        }

        // Reply first, actions after: webhook latency must not wait on side
        // effects, and a failing action must not cost the patient their reply.
        let reply = match (&classification.response_type, &classification.message) {
            (ResponseType::AutoReply, Some(message)) => message.clone(),
            _ => templates::generic_fallback(&patient.name),
        };
        self.send_reply(
            patient,
            phone,
            &reply,
            Some((classification.intent, classification.confidence)),
        )
        .await;

        let actions_executed = self
            .executor
            .execute_all(&classification.actions, patient)
            .await;

        Ok(RouteOutcome::Classified {
            intent: classification.intent,
            confidence: classification.confidence,
            escalated,
            actions_executed,
        })
    }

    /// Send a reply and log it with optional intent metadata.
    async fn send_reply(
        &self,
        patient: &Patient,
        phone: &str,
        body: &str,
        intent: Option<(Intent, f32)>,
    ) {
        if let Err(e) = self.sender.send_text(phone, body).await {
            warn!(patient_id = %patient.id, error = %e, "Failed to send reply");
        }
        if let Err(e) = self
            .store
            .append_message(&NewMessage {
                patient_id: patient.id,
                direction: MessageDirection::Outbound,
                body: body.to_string(),
                intent: intent.map(|(i, _)| i.as_str().to_string()),
                confidence: intent.map(|(_, c)| c),
            })
            .await
        {
            warn!(patient_id = %patient.id, error = %e, "Failed to log outbound reply");
        }
    }
}
