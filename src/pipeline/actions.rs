//! Action executor — applies the classifier's follow-up action list.
//!
//! Each action is applied at most once per inbound event. Failures are
//! isolated per action and logged; none of them reaches the webhook
//! response. Unknown action types are skipped so the classifier can grow
//! new actions without breaking this side.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::gateway::ActionItem;
use crate::model::{
    ConfirmationStatus, NotificationPriority, Patient, Reminder, ReminderStatus,
    VerificationStatus,
};
use crate::store::Store;

pub struct ActionExecutor {
    store: Arc<dyn Store>,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Execute every action independently. Returns how many succeeded.
    pub async fn execute_all(&self, actions: &[ActionItem], patient: &Patient) -> usize {
        let mut executed = 0;
        for action in actions {
            match self.execute(action, patient).await {
                Ok(true) => executed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        patient_id = %patient.id,
                        action_type = %action.action_type,
                        error = %e,
                        "Action execution failed; continuing with remaining actions"
                    );
                }
            }
        }
        executed
    }

    /// Execute one action. Ok(false) means "recognized but nothing to do"
    /// or "unknown type, skipped".
    async fn execute(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        match action.action_type.as_str() {
            "log_confirmation" => self.log_confirmation(action, patient).await,
            "send_followup" => self.send_followup(action, patient).await,
            "notify_volunteer" => self.notify_volunteer(action, patient).await,
            "update_patient_status" => self.update_patient_status(action, patient).await,
            "create_manual_confirmation" => self.create_manual_confirmation(action, patient).await,
            other => {
                debug!(
                    patient_id = %patient.id,
                    action_type = other,
                    "Unknown action type from classifier; skipping"
                );
                Ok(false)
            }
        }
    }

    /// Confirm the most recent reminder still awaiting confirmation.
    async fn log_confirmation(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        let Some(reminder) = self.store.latest_awaiting_reminder(patient.id).await? else {
            debug!(patient_id = %patient.id, "log_confirmation: no reminder awaiting confirmation");
            return Ok(false);
        };

        let response = action.data["response"]
            .as_str()
            .unwrap_or("dikonfirmasi melalui percakapan");
        let updated = self
            .store
            .confirm_reminder(reminder.id, response, Utc::now())
            .await?;
        if updated {
            info!(patient_id = %patient.id, reminder_id = %reminder.id, "Confirmation logged by classifier action");
        }
        Ok(updated)
    }

    /// Schedule a follow-up reminder at now + delay.
    async fn send_followup(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        let delay_minutes = action.data["delay_minutes"].as_i64().unwrap_or(60).max(1);
        let medication = action.data["medication_name"]
            .as_str()
            .unwrap_or("obat sesuai jadwal")
            .to_string();

        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            medication_name: medication,
            scheduled_at: now + chrono::Duration::minutes(delay_minutes),
            status: ReminderStatus::Pending,
            confirmation_status: ConfirmationStatus::Pending,
            confirmation_response: None,
            confirmation_response_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_reminder(&reminder).await?;
        info!(
            patient_id = %patient.id,
            reminder_id = %reminder.id,
            delay_minutes,
            "Follow-up reminder scheduled"
        );
        Ok(true)
    }

    async fn notify_volunteer(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        let message = action.data["message"]
            .as_str()
            .unwrap_or("Pasien memerlukan perhatian relawan")
            .to_string();
        let priority = action.data["priority"]
            .as_str()
            .map(NotificationPriority::parse_or_default)
            .unwrap_or(NotificationPriority::Medium);

        self.store
            .create_notification(patient.id, &message, priority)
            .await?;
        Ok(true)
    }

    /// Patient-status changes suggested by the classifier.
    ///
    /// Only two mutations are allowed from here: deactivation, and a
    /// guarded verification transition from the patient's current status.
    async fn update_patient_status(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        let mut changed = false;

        if let Some(active) = action.data["is_active"].as_bool() {
            self.store.set_patient_active(patient.id, active).await?;
            if !active {
                self.store.deactivate_pending_reminders(patient.id).await?;
            }
            changed = true;
        }

        if let Some(status) = action.data["status"].as_str() {
            let target = VerificationStatus::parse_or_default(status);
            if target != patient.verification_status {
                changed |= self
                    .store
                    .transition_verification_status(
                        patient.id,
                        patient.verification_status,
                        target,
                        (target == VerificationStatus::Verified).then(Utc::now),
                    )
                    .await?;
            }
        }

        if !changed {
            warn!(patient_id = %patient.id, data = %action.data, "update_patient_status had nothing to apply");
        }
        Ok(changed)
    }

    /// Record a confirmation a volunteer relayed outside the reminder flow.
    async fn create_manual_confirmation(
        &self,
        action: &ActionItem,
        patient: &Patient,
    ) -> Result<bool, PipelineError> {
        let medication = action.data["medication_name"]
            .as_str()
            .unwrap_or("konfirmasi manual")
            .to_string();
        let response = action.data["response"]
            .as_str()
            .unwrap_or("dikonfirmasi manual oleh relawan")
            .to_string();

        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            medication_name: medication,
            scheduled_at: now,
            status: ReminderStatus::Delivered,
            confirmation_status: ConfirmationStatus::Confirmed,
            confirmation_response: Some(response),
            confirmation_response_at: Some(now),
            sent_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_reminder(&reminder).await?;
        info!(patient_id = %patient.id, reminder_id = %reminder.id, "Manual confirmation recorded");
        Ok(true)
    }
}
