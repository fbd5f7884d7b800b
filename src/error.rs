//! Error types for Kawal Obat.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Webhook payload validation errors.
///
/// Carries field-level issues so the HTTP layer can return a useful 400 body.
#[derive(Debug, thiserror::Error)]
#[error("Invalid webhook payload: {}", issues.join("; "))]
pub struct WebhookError {
    pub issues: Vec<String>,
}

impl WebhookError {
    pub fn new(issues: Vec<String>) -> Self {
        Self { issues }
    }
}

/// Intent classification gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Classifier request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Classifier timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Classifier disabled by configuration")]
    Disabled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbound messaging gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("WhatsApp gateway request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("WhatsApp gateway rejected message: status {status}, body {body}")]
    Rejected { status: u16, body: String },
}

/// Message-routing pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Verification transition failed: {0}")]
    Verification(String),

    #[error("Confirmation transition failed: {0}")]
    Confirmation(String),

    #[error("Action execution failed for {action_type}: {reason}")]
    Action { action_type: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
