//! Intent classification gateway.
//!
//! The natural-language classifier is an external capability behind the
//! `IntentClassifier` trait: given full patient + conversation context and a
//! free-text message, it returns a primary intent, confidence, optional
//! auto-reply, and a list of follow-up actions. The LLM-backed
//! implementation uses rig-core (Anthropic or OpenAI), with a bounded
//! timeout — on failure the router falls back to a generic acknowledgement.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::warn;

use rig::client::CompletionClient;
use rig::completion::Prompt;

use crate::config::ClassifierConfig;
use crate::error::GatewayError;
use crate::model::{ConversationMessage, MessageDirection, Patient, Reminder};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    Anthropic,
    OpenAi,
}

/// Primary intent of a free-form patient message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Patient reports a medical emergency — always escalated.
    Emergency,
    /// Side effects, dosage questions, medication worries.
    MedicationConcern,
    /// Wants a different reminder time or schedule.
    ScheduleChange,
    GeneralInquiry,
    Gratitude,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::MedicationConcern => "medication_concern",
            Self::ScheduleChange => "schedule_change",
            Self::GeneralInquiry => "general_inquiry",
            Self::Gratitude => "gratitude",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_or_unknown(s: &str) -> Self {
        match s {
            "emergency" => Self::Emergency,
            "medication_concern" => Self::MedicationConcern,
            "schedule_change" => Self::ScheduleChange,
            "general_inquiry" => Self::GeneralInquiry,
            "gratitude" => Self::Gratitude,
            _ => Self::Unknown,
        }
    }
}

/// How the classifier wants the reply handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Send `message` back to the patient directly.
    AutoReply,
    /// A volunteer should craft the reply; send nothing automatic.
    VolunteerReview,
}

/// One follow-up action suggested by the classifier.
///
/// The `action_type` tag stays a raw string: the gateway evolves
/// independently and unknown types must be skippable, not a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Full classification result.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub response_type: ResponseType,
    pub message: Option<String>,
    pub actions: Vec<ActionItem>,
}

/// Context handed to the classifier alongside the message.
pub struct ClassifyContext<'a> {
    pub patient: &'a Patient,
    pub active_reminders: &'a [Reminder],
    pub history: &'a [ConversationMessage],
}

/// External intent-classification capability.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        ctx: &ClassifyContext<'_>,
        message: &str,
    ) -> Result<Classification, GatewayError>;
}

// ── LLM-backed implementation ───────────────────────────────────────

/// Classifier backed by an LLM via rig-core.
pub struct LlmClassifier {
    config: ClassifierConfig,
}

impl LlmClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, GatewayError> {
        match self.config.backend {
            ClassifierBackend::Anthropic => {
                use rig::providers::anthropic;
                let client: rig::client::Client<anthropic::client::AnthropicExt> =
                    anthropic::Client::new(self.config.api_key.expose_secret()).map_err(|e| {
                        GatewayError::RequestFailed {
                            reason: format!("Failed to create Anthropic client: {e}"),
                        }
                    })?;
                client
                    .agent(&self.config.model)
                    .preamble(preamble)
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|e| GatewayError::RequestFailed {
                        reason: e.to_string(),
                    })
            }
            ClassifierBackend::OpenAi => {
                use rig::providers::openai;
                let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                    openai::Client::new(self.config.api_key.expose_secret()).map_err(|e| {
                        GatewayError::RequestFailed {
                            reason: format!("Failed to create OpenAI client: {e}"),
                        }
                    })?;
                client
                    .agent(&self.config.model)
                    .preamble(preamble)
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|e| GatewayError::RequestFailed {
                        reason: e.to_string(),
                    })
            }
        }
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(
        &self,
        ctx: &ClassifyContext<'_>,
        message: &str,
    ) -> Result<Classification, GatewayError> {
        if !self.config.enabled {
            return Err(GatewayError::Disabled);
        }

        let preamble = build_system_prompt();
        let prompt = build_user_prompt(ctx, message);

        let raw = tokio::time::timeout(self.config.timeout, self.complete(&preamble, &prompt))
            .await
            .map_err(|_| GatewayError::Timeout {
                timeout: self.config.timeout,
            })??;

        parse_classification(&raw).map_err(|reason| {
            warn!(raw_response = %raw, %reason, "Failed to parse classifier response");
            GatewayError::InvalidResponse { reason }
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You classify WhatsApp messages from Indonesian cancer patients in a \
     medication-reminder program run by volunteers.\n\n\
     Intents:\n\
     - \"emergency\": severe symptoms, urgent danger, needs immediate human help\n\
     - \"medication_concern\": side effects, dosage questions, worries about the medicine\n\
     - \"schedule_change\": wants reminders at a different time\n\
     - \"general_inquiry\": questions about the program or anything else\n\
     - \"gratitude\": thanks, no action needed\n\
     - \"unknown\": cannot tell\n\n\
     Respond with ONLY a JSON object:\n\
     {\"intent\": \"...\", \"confidence\": 0.0, \"response_type\": \"auto_reply\"|\"volunteer_review\", \
     \"message\": \"...\", \"actions\": [{\"type\": \"...\", \"data\": {}}]}\n\n\
     Action types: log_confirmation, send_followup, notify_volunteer, \
     update_patient_status, create_manual_confirmation.\n\
     Rules:\n\
     - Reply messages are in polite Bahasa Indonesia, short, warm, no medical advice\n\
     - NEVER diagnose or recommend treatment; route medical questions to a volunteer\n\
     - For emergencies always include a notify_volunteer action with priority \"emergency\"\n\
     - Low confidence (<0.5) must use response_type volunteer_review"
        .to_string()
}

fn build_user_prompt(ctx: &ClassifyContext<'_>, message: &str) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&format!(
        "Patient: {} (verification: {}, active: {})\n",
        ctx.patient.name,
        ctx.patient.verification_status.as_str(),
        ctx.patient.is_active,
    ));

    if !ctx.active_reminders.is_empty() {
        prompt.push_str("Active reminders:\n");
        for r in ctx.active_reminders.iter().take(5) {
            prompt.push_str(&format!(
                "  - {} ({}, confirmation {})\n",
                r.medication_name,
                r.status.as_str(),
                r.confirmation_status.as_str(),
            ));
        }
    }

    if !ctx.history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for msg in ctx.history.iter().take(10) {
            let who = match msg.direction {
                MessageDirection::Inbound => "patient",
                MessageDirection::Outbound => "system",
            };
            let preview: String = msg.body.chars().take(200).collect();
            prompt.push_str(&format!("  [{who}] {preview}\n"));
        }
    }

    let preview: String = message.chars().take(1000).collect();
    prompt.push_str(&format!("\nMessage:\n{preview}"));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    response_type: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    actions: Vec<ActionItem>,
}

/// Parse the classifier's response into a `Classification`.
fn parse_classification(raw: &str) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let parsed: RawClassification =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let response_type = match parsed.response_type.as_str() {
        "auto_reply" => ResponseType::AutoReply,
        _ => ResponseType::VolunteerReview,
    };

    Ok(Classification {
        intent: Intent::parse_or_unknown(&parsed.intent),
        confidence: parsed.confidence.clamp(0.0, 1.0),
        response_type,
        message: if parsed.message.is_empty() {
            None
        } else {
            Some(parsed.message)
        },
        actions: parsed.actions,
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::model::VerificationStatus;

    fn patient() -> Patient {
        let now = Utc::now();
        Patient {
            id: Uuid::new_v4(),
            name: "Ani".into(),
            phone_number: "6281234567890".into(),
            verification_status: VerificationStatus::Verified,
            is_active: true,
            verified_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parse_full_classification() {
        let raw = r#"{"intent": "medication_concern", "confidence": 0.82,
            "response_type": "auto_reply", "message": "Baik, kami catat ya.",
            "actions": [{"type": "notify_volunteer", "data": {"priority": "medium"}}]}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.intent, Intent::MedicationConcern);
        assert!((c.confidence - 0.82).abs() < 0.01);
        assert_eq!(c.response_type, ResponseType::AutoReply);
        assert_eq!(c.message.as_deref(), Some("Baik, kami catat ya."));
        assert_eq!(c.actions.len(), 1);
        assert_eq!(c.actions[0].action_type, "notify_volunteer");
    }

    #[test]
    fn parse_markdown_wrapped() {
        let raw = "Here is my analysis:\n```json\n{\"intent\": \"gratitude\", \"confidence\": 0.95}\n```";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.intent, Intent::Gratitude);
    }

    #[test]
    fn parse_embedded_object() {
        let raw = "Result: {\"intent\": \"emergency\", \"confidence\": 0.9} — done.";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.intent, Intent::Emergency);
    }

    #[test]
    fn unknown_intent_and_response_type_degrade_safely() {
        let raw = r#"{"intent": "escalate_now", "confidence": 2.5, "response_type": "shout"}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.intent, Intent::Unknown);
        assert!((c.confidence - 1.0).abs() < 0.01);
        assert_eq!(c.response_type, ResponseType::VolunteerReview);
        assert!(c.message.is_none());
        assert!(c.actions.is_empty());
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_classification("not json at all").is_err());
    }

    #[test]
    fn user_prompt_includes_context() {
        let p = patient();
        let now = Utc::now();
        let history = vec![ConversationMessage {
            id: Uuid::new_v4(),
            patient_id: p.id,
            direction: MessageDirection::Outbound,
            body: "Waktunya minum obat tamoxifen".into(),
            intent: None,
            confidence: None,
            processed_at: Some(now),
            created_at: now,
        }];
        let ctx = ClassifyContext {
            patient: &p,
            active_reminders: &[],
            history: &history,
        };
        let prompt = build_user_prompt(&ctx, "obatnya bikin mual terus");
        assert!(prompt.contains("Ani"));
        assert!(prompt.contains("VERIFIED"));
        assert!(prompt.contains("tamoxifen"));
        assert!(prompt.contains("bikin mual"));
    }

    #[test]
    fn system_prompt_lists_all_intents() {
        let prompt = build_system_prompt();
        for intent in [
            "emergency",
            "medication_concern",
            "schedule_change",
            "general_inquiry",
            "gratitude",
            "unknown",
        ] {
            assert!(prompt.contains(intent), "missing intent {intent}");
        }
    }

    #[tokio::test]
    async fn disabled_classifier_short_circuits() {
        let config = ClassifierConfig {
            enabled: false,
            ..Default::default()
        };
        let classifier = LlmClassifier::new(config);
        let p = patient();
        let ctx = ClassifyContext {
            patient: &p,
            active_reminders: &[],
            history: &[],
        };
        let err = classifier.classify(&ctx, "halo").await.unwrap_err();
        assert!(matches!(err, GatewayError::Disabled));
    }
}
