//! Domain rows and status enums.
//!
//! Every status enum round-trips through the TEXT column form via
//! `as_str` / `parse_or_default` — unknown strings fall back to the safest
//! variant rather than failing the row read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Patient ─────────────────────────────────────────────────────────

/// Consent/verification lifecycle of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Declined,
    /// Set by an external timeout process, never by this subsystem.
    Expired,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Declined => "DECLINED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "VERIFIED" => Self::Verified,
            "DECLINED" => Self::Declined,
            "EXPIRED" => Self::Expired,
            _ => Self::Pending,
        }
    }
}

/// A registered patient.
///
/// Created by a volunteer through the dashboard (external). This subsystem
/// only mutates `verification_status`, `verified_at`, and `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    /// Canonical digit-only phone number (country-code form, e.g. 628…).
    pub phone_number: String,
    pub verification_status: VerificationStatus,
    pub is_active: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Reminder ────────────────────────────────────────────────────────

/// Delivery status of a reminder row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "SENT" => Self::Sent,
            "DELIVERED" => Self::Delivered,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Patient-confirmation status of a reminder row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Missed,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Missed => "MISSED",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "CONFIRMED" => Self::Confirmed,
            "MISSED" => Self::Missed,
            _ => Self::Pending,
        }
    }
}

/// One scheduled reminder, unifying schedule row and delivery log.
///
/// Created by the external scheduler (or by a `send_followup` action).
/// Awaiting confirmation iff `status == Sent && confirmation_status == Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medication_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub confirmation_status: ConfirmationStatus,
    pub confirmation_response: Option<String>,
    pub confirmation_response_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn awaits_confirmation(&self) -> bool {
        self.status == ReminderStatus::Sent
            && self.confirmation_status == ConfirmationStatus::Pending
    }
}

// ── Conversation state ──────────────────────────────────────────────

/// The kind of reply currently expected from a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationContext {
    Verification,
    ReminderConfirmation,
    GeneralInquiry,
}

impl ConversationContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::ReminderConfirmation => "reminder_confirmation",
            Self::GeneralInquiry => "general_inquiry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verification" => Some(Self::Verification),
            "reminder_confirmation" => Some(Self::ReminderConfirmation),
            "general_inquiry" => Some(Self::GeneralInquiry),
            _ => None,
        }
    }
}

/// Per patient+phone record of the active expectation.
///
/// Invariant: at most one non-expired context per patient. An expired
/// context is treated as absent at read time — never acted on, never swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub phone_number: String,
    pub current_context: Option<ConversationContext>,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a logged conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Append-only conversation log entry. Audit and classifier context only —
/// never control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub direction: MessageDirection,
    pub body: String,
    pub intent: Option<String>,
    pub confidence: Option<f32>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── Audit & escalation ──────────────────────────────────────────────

/// Immutable audit row for each verification-related patient response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationLog {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub message_body: String,
    /// Resulting classification: "verified", "declined", "unsubscribed",
    /// "clarification_needed", "ignored_already_resolved".
    pub result: String,
    pub created_at: DateTime<Utc>,
}

/// Priority of a volunteer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Emergency,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "medium" => Self::Medium,
            "high" => Self::High,
            "emergency" => Self::Emergency,
            _ => Self::Low,
        }
    }
}

/// Escalation entry for a human volunteer.
///
/// This subsystem only creates rows; assignment and resolution happen in
/// the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolunteerNotification {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub message: String,
    pub priority: NotificationPriority,
    /// "pending" on creation; "assigned"/"resolved" are set externally.
    pub status: String,
    pub assigned_volunteer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
