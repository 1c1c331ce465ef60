pub mod config;
pub mod metrics;
pub mod server;
pub mod store;
pub mod template;
pub mod transport;
pub mod workflow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),
    #[error("Invalid goto target: {0}")]
    InvalidTarget(String),
    #[error("Invalid step: {0}")]
    InvalidStep(String),
    #[error("Condition evaluation error: {0}")]
    ConditionEval(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Broadcast error: {0}")]
    Broadcast(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Step limit exceeded: {0}")]
    StepLimit(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownStepType(_) => "UnknownStepType",
            Error::InvalidTarget(_) => "InvalidTarget",
            Error::InvalidStep(_) => "InvalidStep",
            Error::ConditionEval(_) => "ConditionEvalError",
            Error::Transport(_) => "TransportError",
            Error::Broadcast(_) => "BroadcastError",
            Error::Template(_) => "TemplateError",
            Error::Config(_) => "ConfigError",
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFound",
            Error::StepLimit(_) => "StepLimit",
            Error::Io(_) => "IoError",
            Error::Sqlx(_) => "DatabaseError",
            Error::Http(_) => "HttpError",
            Error::SerdeJson(_) | Error::SerdeYaml(_) => "ParseError",
            Error::Uuid(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Errors caused by the submitted workflow rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownStepType(_)
                | Error::InvalidTarget(_)
                | Error::InvalidStep(_)
                | Error::Validation(_)
                | Error::SerdeJson(_)
                | Error::SerdeYaml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
