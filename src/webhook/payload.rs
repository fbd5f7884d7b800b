//! Tolerant webhook payload normalization.
//!
//! The upstream gateway's schema is not stable: sender, text, device and id
//! arrive under several field names, and poll replies use a different shape
//! entirely. Everything is normalized into one `CanonicalEvent` here;
//! validation runs against the canonical struct, never against raw JSON.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WebhookError;

/// Accepted field-name aliases, most common first.
const SENDER_ALIASES: &[&str] = &["sender", "phone", "from", "number", "wa_number"];
const MESSAGE_ALIASES: &[&str] = &["message", "text", "body"];
const ID_ALIASES: &[&str] = &["id", "message_id", "msg_id"];
const DEVICE_ALIASES: &[&str] = &["device", "device_id", "gateway_device"];
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "time", "date"];
const POLL_NAME_ALIASES: &[&str] = &["poll_name", "poll", "poll_title"];
const POLL_OPTION_ALIASES: &[&str] = &["selected_option", "option", "choice"];

/// What the patient actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// Free text typed by the patient.
    Text(String),
    /// Structured poll reply — carries the poll title and the chosen option.
    /// Takes priority over free-text parsing when present.
    Poll {
        poll_name: String,
        selected_option: String,
    },
}

/// One normalized inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Canonical digit-only phone number (country-code form).
    pub sender: String,
    pub content: MessageContent,
    pub message_id: Option<String>,
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CanonicalEvent {
    /// The textual payload for logging, auditing, and keyword matching.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(t) => t,
            MessageContent::Poll {
                selected_option, ..
            } => selected_option,
        }
    }
}

/// Normalize a phone number to canonical digit-only country-code form.
///
/// `08…` → `628…`, bare `8…` → `628…`, `+62…`/`62…` pass through.
/// Non-digits (spaces, dashes, `+`, WhatsApp `@s.whatsapp.net` suffixes)
/// are stripped first.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.split('@').next().unwrap_or(raw);
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if let Some(rest) = digits.strip_prefix('0') {
        return format!("62{rest}");
    }
    if digits.starts_with("62") {
        return digits;
    }
    if digits.starts_with('8') {
        return format!("62{digits}");
    }
    digits
}

/// Normalize a raw webhook body into a `CanonicalEvent`.
///
/// Returns every problem found, not just the first, so the 400 response can
/// name all offending fields at once.
pub fn normalize(body: &Value) -> Result<CanonicalEvent, WebhookError> {
    let mut issues = Vec::new();

    let obj = match body.as_object() {
        Some(obj) => obj,
        None => {
            return Err(WebhookError::new(vec![
                "payload must be a JSON object".to_string()
            ]));
        }
    };

    let raw_sender = first_string(obj, SENDER_ALIASES);
    let sender = raw_sender.as_deref().map(normalize_phone);
    match &sender {
        Some(s) if s.len() >= 6 => {}
        Some(_) => issues.push("sender: too short after normalization (min 6 digits)".into()),
        None => issues.push(format!("sender: missing (one of {})", SENDER_ALIASES.join(", "))),
    }

    let poll_name = first_string(obj, POLL_NAME_ALIASES);
    let poll_option = first_string(obj, POLL_OPTION_ALIASES);
    let text = first_string(obj, MESSAGE_ALIASES);

    let content = match (poll_name, poll_option) {
        (Some(poll_name), Some(selected_option)) if !selected_option.trim().is_empty() => {
            Some(MessageContent::Poll {
                poll_name,
                selected_option,
            })
        }
        (Some(_), _) | (None, Some(_)) => {
            issues.push("poll: requires both poll_name and selected_option".into());
            None
        }
        (None, None) => match text {
            Some(t) if !t.trim().is_empty() => Some(MessageContent::Text(t)),
            _ => {
                issues.push(format!(
                    "message: missing or empty (one of {})",
                    MESSAGE_ALIASES.join(", ")
                ));
                None
            }
        },
    };

    if !issues.is_empty() {
        return Err(WebhookError::new(issues));
    }

    Ok(CanonicalEvent {
        sender: sender.unwrap_or_default(),
        content: content.unwrap_or(MessageContent::Text(String::new())),
        message_id: first_string(obj, ID_ALIASES),
        device_id: first_string(obj, DEVICE_ALIASES),
        timestamp: first_timestamp(obj).unwrap_or_else(Utc::now),
    })
}

/// First non-empty string value under any of the aliases.
fn first_string(obj: &serde_json::Map<String, Value>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        match obj.get(*alias) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Timestamp under any alias: RFC 3339 string or unix seconds/millis.
fn first_timestamp(obj: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    for alias in TIMESTAMP_ALIASES {
        match obj.get(*alias) {
            Some(Value::String(s)) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Some(dt.with_timezone(&Utc));
                }
                if let Ok(secs) = s.parse::<i64>() {
                    return epoch_to_datetime(secs);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(secs) = n.as_i64() {
                    return epoch_to_datetime(secs);
                }
            }
            _ => {}
        }
    }
    None
}

/// Interpret an integer as unix seconds, or millis when it is too large.
fn epoch_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    let secs = if value > 100_000_000_000 {
        value / 1000
    } else {
        value
    };
    Utc.timestamp_opt(secs, 0).single()
}
