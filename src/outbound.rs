//! Outbound acknowledgements through the WhatsApp gateway.
//!
//! Send failures are logged and swallowed by callers: the inbound event is
//! already durably processed by the time an ack goes out, and the webhook
//! response must not depend on gateway health.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::error::SendError;

/// Outbound message sender — pure I/O, no routing logic.
#[async_trait]
pub trait WaSender: Send + Sync {
    /// Send a text message to a canonical phone number.
    async fn send_text(&self, phone: &str, body: &str) -> Result<(), SendError>;
}

/// HTTP client for the WhatsApp gateway's send endpoint.
pub struct HttpWaSender {
    base_url: String,
    token: SecretString,
    device_id: String,
    client: reqwest::Client,
}

impl HttpWaSender {
    pub fn new(base_url: String, token: SecretString, device_id: String) -> Self {
        Self {
            base_url,
            token,
            device_id,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WaSender for HttpWaSender {
    async fn send_text(&self, phone: &str, body: &str) -> Result<(), SendError> {
        let payload = serde_json::json!({
            "device": self.device_id,
            "number": phone,
            "message": body,
        });

        let response = self
            .client
            .post(format!("{}/send/message", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "WhatsApp gateway rejected message");
            return Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

// ── Acknowledgement templates ───────────────────────────────────────

/// Short templated Indonesian ack texts, one per pipeline outcome.
pub mod templates {
    pub fn verification_accepted(name: &str) -> String {
        format!(
            "Terima kasih, {name}! Nomor Anda sudah terverifikasi. \
             Kami akan mengirimkan pengingat minum obat sesuai jadwal. 💙"
        )
    }

    pub fn verification_declined(name: &str) -> String {
        format!(
            "Baik, {name}. Kami tidak akan mengirimkan pengingat. \
             Jika berubah pikiran, silakan hubungi relawan pendamping Anda."
        )
    }

    pub fn unsubscribed(name: &str) -> String {
        format!(
            "Baik, {name}. Semua pengingat telah dihentikan. \
             Semoga sehat selalu. 🙏"
        )
    }

    pub fn verification_clarify() -> String {
        "Mohon balas dengan \"Ya\" untuk menerima pengingat minum obat, \
         atau \"Tidak\" jika tidak bersedia."
            .to_string()
    }

    pub fn confirmation_done(name: &str) -> String {
        format!("Terima kasih, {name}! Konfirmasi minum obat sudah kami catat. Semangat! 💪")
    }

    pub fn confirmation_not_yet(name: &str) -> String {
        format!(
            "Baik, {name}. Jangan lupa segera minum obatnya ya. \
             Kami akan tetap memantau — balas \"SUDAH\" setelah minum obat."
        )
    }

    pub fn confirmation_clarify() -> String {
        "Mohon balas dengan \"SUDAH\" jika sudah minum obat, \
         atau \"BELUM\" jika belum."
            .to_string()
    }

    pub fn need_help(name: &str) -> String {
        format!(
            "Baik, {name}. Relawan pendamping kami akan segera menghubungi Anda. \
             Mohon ditunggu ya. 🙏"
        )
    }

    pub fn generic_fallback(name: &str) -> String {
        format!(
            "Terima kasih atas pesannya, {name}. \
             Pesan Anda sudah kami terima dan akan ditindaklanjuti oleh relawan kami."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_mention_patient_name() {
        assert!(templates::verification_accepted("Ani").contains("Ani"));
        assert!(templates::confirmation_done("Budi").contains("Budi"));
        assert!(templates::generic_fallback("Citra").contains("Citra"));
    }

    #[test]
    fn clarify_templates_name_expected_replies() {
        assert!(templates::verification_clarify().contains("Ya"));
        assert!(templates::confirmation_clarify().contains("SUDAH"));
    }
}
