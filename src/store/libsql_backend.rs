//! libSQL store — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored
//! as RFC 3339 TEXT; status enums are stored via their `as_str` forms.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    ConfirmationStatus, ConversationContext, ConversationMessage, ConversationState,
    MessageDirection, NotificationPriority, Patient, Reminder, ReminderStatus, VerificationLog,
    VerificationStatus, VolunteerNotification,
};
use crate::store::migrations;
use crate::store::traits::{NewMessage, Store};

/// libSQL store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v as f64),
        None => libsql::Value::Null,
    }
}

// ── Row mappers ─────────────────────────────────────────────────────

const PATIENT_COLUMNS: &str =
    "id, name, phone_number, verification_status, is_active, verified_at, created_at, updated_at";

fn row_to_patient(row: &libsql::Row) -> Result<Patient, libsql::Error> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let is_active: i64 = row.get(4)?;
    let verified_at: Option<String> = row.get(5).ok();
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;

    Ok(Patient {
        id: parse_uuid(&id),
        name: row.get(1)?,
        phone_number: row.get(2)?,
        verification_status: VerificationStatus::parse_or_default(&status),
        is_active: is_active != 0,
        verified_at: parse_optional_datetime(&verified_at),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const STATE_COLUMNS: &str = "id, patient_id, phone_number, current_context, related_entity_type, \
     related_entity_id, expires_at, message_count, last_message_at, created_at, updated_at";

fn row_to_state(row: &libsql::Row) -> Result<ConversationState, libsql::Error> {
    let id: String = row.get(0)?;
    let patient_id: String = row.get(1)?;
    let context: Option<String> = row.get(3).ok();
    let related_id: Option<String> = row.get(5).ok();
    let expires: Option<String> = row.get(6).ok();
    let last_message: Option<String> = row.get(8).ok();
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;

    Ok(ConversationState {
        id: parse_uuid(&id),
        patient_id: parse_uuid(&patient_id),
        phone_number: row.get(2)?,
        current_context: context.as_deref().and_then(ConversationContext::parse),
        related_entity_type: row.get(4).ok(),
        related_entity_id: related_id.as_deref().map(parse_uuid),
        expires_at: parse_optional_datetime(&expires),
        message_count: row.get(7)?,
        last_message_at: parse_optional_datetime(&last_message),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const REMINDER_COLUMNS: &str = "id, patient_id, medication_name, scheduled_at, status, \
     confirmation_status, confirmation_response, confirmation_response_at, sent_at, created_at, updated_at";

fn row_to_reminder(row: &libsql::Row) -> Result<Reminder, libsql::Error> {
    let id: String = row.get(0)?;
    let patient_id: String = row.get(1)?;
    let scheduled: String = row.get(3)?;
    let status: String = row.get(4)?;
    let confirmation: String = row.get(5)?;
    let response_at: Option<String> = row.get(7).ok();
    let sent_at: Option<String> = row.get(8).ok();
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;

    Ok(Reminder {
        id: parse_uuid(&id),
        patient_id: parse_uuid(&patient_id),
        medication_name: row.get(2)?,
        scheduled_at: parse_datetime(&scheduled),
        status: ReminderStatus::parse_or_default(&status),
        confirmation_status: ConfirmationStatus::parse_or_default(&confirmation),
        confirmation_response: row.get(6).ok(),
        confirmation_response_at: parse_optional_datetime(&response_at),
        sent_at: parse_optional_datetime(&sent_at),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<ConversationMessage, libsql::Error> {
    let id: String = row.get(0)?;
    let patient_id: String = row.get(1)?;
    let direction: String = row.get(2)?;
    let confidence: Option<f64> = row.get(5).ok();
    let processed: Option<String> = row.get(6).ok();
    let created: String = row.get(7)?;

    Ok(ConversationMessage {
        id: parse_uuid(&id),
        patient_id: parse_uuid(&patient_id),
        direction: if direction == "outbound" {
            MessageDirection::Outbound
        } else {
            MessageDirection::Inbound
        },
        body: row.get(3)?,
        intent: row.get(4).ok(),
        confidence: confidence.map(|c| c as f32),
        processed_at: parse_optional_datetime(&processed),
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Patients ────────────────────────────────────────────────────

    async fn insert_patient(&self, patient: &Patient) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO patients (id, name, phone_number, verification_status, is_active, verified_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    patient.id.to_string(),
                    patient.name.clone(),
                    patient.phone_number.clone(),
                    patient.verification_status.as_str(),
                    patient.is_active as i64,
                    opt_text(patient.verified_at.map(|t| t.to_rfc3339())),
                    patient.created_at.to_rfc3339(),
                    patient.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_patient: {e}")))?;
        Ok(())
    }

    async fn find_active_patient_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Patient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PATIENT_COLUMNS} FROM patients \
                     WHERE phone_number = ?1 AND is_active = 1 ORDER BY created_at ASC"
                ),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active_patient_by_phone: {e}")))?;

        let first = match rows.next().await {
            Ok(Some(row)) => row_to_patient(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("patient row parse: {e}")))?,
            Ok(None) => None,
            Err(e) => {
                return Err(DatabaseError::Query(format!(
                    "find_active_patient_by_phone: {e}"
                )));
            }
        };

        // The UNIQUE constraint should make this unreachable.
        if first.is_some() && matches!(rows.next().await, Ok(Some(_))) {
            warn!(phone, "Multiple active patients share a phone number; using first match");
        }

        Ok(first)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_patient: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_patient(&row).map_err(|e| {
                DatabaseError::Query(format!("patient row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_patient: {e}"))),
        }
    }

    async fn transition_verification_status(
        &self,
        id: Uuid,
        from: VerificationStatus,
        to: VerificationStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn()
            .execute(
                "UPDATE patients SET verification_status = ?1, verified_at = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND verification_status = ?5",
                params![
                    to.as_str(),
                    opt_text(verified_at.map(|t| t.to_rfc3339())),
                    now,
                    id.to_string(),
                    from.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_verification_status: {e}")))?;

        debug!(patient_id = %id, from = from.as_str(), to = to.as_str(), updated, "Verification transition");
        Ok(updated > 0)
    }

    async fn set_patient_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE patients SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active as i64, now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_patient_active: {e}")))?;
        Ok(())
    }

    // ── Conversation state ──────────────────────────────────────────

    async fn active_context(
        &self,
        patient_id: Uuid,
        phone: &str,
    ) -> Result<Option<ConversationState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM conversation_states \
                     WHERE patient_id = ?1 AND phone_number = ?2"
                ),
                params![patient_id.to_string(), phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("active_context: {e}")))?;

        let state = match rows.next().await {
            Ok(Some(row)) => row_to_state(&row)
                .map_err(|e| DatabaseError::Query(format!("state row parse: {e}")))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("active_context: {e}"))),
        };

        // Read-time expiry: an expired or context-less row is absent.
        if state.current_context.is_none() {
            return Ok(None);
        }
        if let Some(expires_at) = state.expires_at
            && expires_at <= Utc::now()
        {
            debug!(patient_id = %patient_id, "Conversation context expired; treating as absent");
            return Ok(None);
        }

        Ok(Some(state))
    }

    async fn set_context(
        &self,
        patient_id: Uuid,
        phone: &str,
        context: ConversationContext,
        related_entity_type: Option<&str>,
        related_entity_id: Option<Uuid>,
        ttl: Duration,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        self.conn()
            .execute(
                "INSERT INTO conversation_states \
                 (id, patient_id, phone_number, current_context, related_entity_type, related_entity_id, expires_at, message_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8) \
                 ON CONFLICT (patient_id, phone_number) DO UPDATE SET \
                 current_context = excluded.current_context, \
                 related_entity_type = excluded.related_entity_type, \
                 related_entity_id = excluded.related_entity_id, \
                 expires_at = excluded.expires_at, \
                 updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    patient_id.to_string(),
                    phone,
                    context.as_str(),
                    opt_text(related_entity_type.map(String::from)),
                    opt_text(related_entity_id.map(|u| u.to_string())),
                    expires_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_context: {e}")))?;

        debug!(patient_id = %patient_id, context = context.as_str(), "Conversation context set");
        Ok(())
    }

    async fn clear_context(&self, patient_id: Uuid, phone: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE conversation_states SET current_context = NULL, \
                 related_entity_type = NULL, related_entity_id = NULL, expires_at = NULL, \
                 updated_at = ?1 WHERE patient_id = ?2 AND phone_number = ?3",
                params![now, patient_id.to_string(), phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_context: {e}")))?;
        Ok(())
    }

    async fn append_message(&self, msg: &NewMessage) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn()
            .execute(
                "INSERT INTO conversation_messages \
                 (id, patient_id, direction, body, intent, confidence, processed_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id.to_string(),
                    msg.patient_id.to_string(),
                    msg.direction.as_str(),
                    msg.body.clone(),
                    opt_text(msg.intent.clone()),
                    opt_real(msg.confidence),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message: {e}")))?;

        // Counter bump is best-effort; the log row is what matters.
        let _ = self
            .conn()
            .execute(
                "UPDATE conversation_states SET message_count = message_count + 1, \
                 last_message_at = ?1 WHERE patient_id = ?2",
                params![now.to_rfc3339(), msg.patient_id.to_string()],
            )
            .await;

        Ok(id)
    }

    async fn recent_messages(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, patient_id, direction, body, intent, confidence, processed_at, created_at \
                 FROM conversation_messages WHERE patient_id = ?1 \
                 ORDER BY created_at DESC LIMIT ?2",
                params![patient_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("Skipping message row: {e}"),
            }
        }
        messages.reverse();
        Ok(messages)
    }

    // ── Reminders ───────────────────────────────────────────────────

    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO reminders (id, patient_id, medication_name, scheduled_at, status, \
                 confirmation_status, confirmation_response, confirmation_response_at, sent_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    reminder.id.to_string(),
                    reminder.patient_id.to_string(),
                    reminder.medication_name.clone(),
                    reminder.scheduled_at.to_rfc3339(),
                    reminder.status.as_str(),
                    reminder.confirmation_status.as_str(),
                    opt_text(reminder.confirmation_response.clone()),
                    opt_text(reminder.confirmation_response_at.map(|t| t.to_rfc3339())),
                    opt_text(reminder.sent_at.map(|t| t.to_rfc3339())),
                    reminder.created_at.to_rfc3339(),
                    reminder.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_reminder: {e}")))?;
        Ok(())
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_reminder: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_reminder(&row).map_err(|e| {
                DatabaseError::Query(format!("reminder row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_reminder: {e}"))),
        }
    }

    async fn awaiting_reminders(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Reminder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders \
                     WHERE patient_id = ?1 AND status = 'SENT' AND confirmation_status = 'PENDING' \
                     ORDER BY sent_at DESC LIMIT ?2"
                ),
                params![patient_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("awaiting_reminders: {e}")))?;

        let mut reminders = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_reminder(&row) {
                Ok(reminder) => reminders.push(reminder),
                Err(e) => warn!("Skipping reminder row: {e}"),
            }
        }
        Ok(reminders)
    }

    async fn confirm_reminder(
        &self,
        id: Uuid,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        // Conditional on PENDING so a duplicate that slipped past the
        // ledger lands as a no-op instead of overwriting the response.
        let updated = self
            .conn()
            .execute(
                "UPDATE reminders SET confirmation_status = 'CONFIRMED', \
                 confirmation_response = ?1, confirmation_response_at = ?2, updated_at = ?2 \
                 WHERE id = ?3 AND confirmation_status = 'PENDING'",
                params![response, at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("confirm_reminder: {e}")))?;

        debug!(reminder_id = %id, updated, "Reminder confirmation update");
        Ok(updated > 0)
    }

    async fn record_pending_response(
        &self,
        id: Uuid,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE reminders SET confirmation_response = ?1, \
                 confirmation_response_at = ?2, updated_at = ?2 \
                 WHERE id = ?3 AND confirmation_status = 'PENDING'",
                params![response, at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_pending_response: {e}")))?;
        Ok(updated > 0)
    }

    async fn deactivate_pending_reminders(&self, patient_id: Uuid) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM reminders WHERE patient_id = ?1 AND status = 'PENDING'",
                params![patient_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_pending_reminders: {e}")))?;

        if removed > 0 {
            info!(patient_id = %patient_id, removed, "Unsent reminders removed on unsubscribe");
        }
        Ok(removed)
    }

    // ── Audit & escalation ──────────────────────────────────────────

    async fn append_verification_log(
        &self,
        patient_id: Uuid,
        message_body: &str,
        result: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO verification_logs (id, patient_id, message_body, result, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    patient_id.to_string(),
                    message_body,
                    result,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_verification_log: {e}")))?;
        Ok(())
    }

    async fn list_verification_logs(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<VerificationLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, patient_id, message_body, result, created_at \
                 FROM verification_logs WHERE patient_id = ?1 ORDER BY created_at ASC",
                params![patient_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_verification_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let pid: String = row.get(1).unwrap_or_default();
            let created: String = row.get(4).unwrap_or_default();
            logs.push(VerificationLog {
                id: parse_uuid(&id),
                patient_id: parse_uuid(&pid),
                message_body: row.get(2).unwrap_or_default(),
                result: row.get(3).unwrap_or_default(),
                created_at: parse_datetime(&created),
            });
        }
        Ok(logs)
    }

    async fn create_notification(
        &self,
        patient_id: Uuid,
        message: &str,
        priority: NotificationPriority,
    ) -> Result<VolunteerNotification, DatabaseError> {
        let notification = VolunteerNotification {
            id: Uuid::new_v4(),
            patient_id,
            message: message.to_string(),
            priority,
            status: "pending".to_string(),
            assigned_volunteer_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.conn()
            .execute(
                "INSERT INTO volunteer_notifications \
                 (id, patient_id, message, priority, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    notification.id.to_string(),
                    notification.patient_id.to_string(),
                    notification.message.clone(),
                    notification.priority.as_str(),
                    notification.status.clone(),
                    notification.created_at.to_rfc3339(),
                    notification.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_notification: {e}")))?;

        info!(patient_id = %patient_id, priority = priority.as_str(), "Volunteer notification created");
        Ok(notification)
    }

    // ── Idempotency ledger ──────────────────────────────────────────

    async fn check_and_set_marker(
        &self,
        fingerprint: &str,
        window: Duration,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());

        // Opportunistic prune keeps the table bounded without a sweeper.
        let _ = self
            .conn()
            .execute(
                "DELETE FROM idempotency_markers WHERE seen_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await;

        // INSERT OR IGNORE is the atomic check-and-set: affected rows == 0
        // means another delivery already claimed this fingerprint.
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO idempotency_markers (fingerprint, seen_at) VALUES (?1, ?2)",
                params![fingerprint, now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("check_and_set_marker: {e}")))?;

        Ok(inserted > 0)
    }
}
