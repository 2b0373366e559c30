//! Error types for the outreach pipeline.

use std::time::Duration;

use crate::pipeline::stage::ProcessingStage;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by external collaborators (scraper, enricher, drafter).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Scrape failed for {entity}: {reason}")]
    Scrape { entity: String, reason: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Message generation failed: {0}")]
    Generation(String),

    #[error("UI automation failed: {0}")]
    Automation(String),

    #[error("Input not ready yet: {0}")]
    NotReady(String),
}

/// Errors from workload-level operations (API calls, operator actions).
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("Workload {id} not found")]
    NotFound { id: String },

    #[error("Invalid selection for {id}: {reason}")]
    InvalidSelection { id: String, reason: String },

    #[error("Workload {id} is at stage {stage}, expected {expected}")]
    InvalidStage {
        id: String,
        stage: ProcessingStage,
        expected: String,
    },

    #[error("Workload {id} has no person named {name}")]
    UnknownPerson { id: String, name: String },

    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
