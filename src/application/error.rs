use thiserror::Error;

use crate::{config::LoadError, domain::RenderError, infra::error::InfraError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status: 2 for usage and configuration mistakes, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_)
            | AppError::Config(_)
            | AppError::Render(RenderError::Config { .. }) => 2,
            AppError::Render(_)
            | AppError::Infra(InfraError::Io(_))
            | AppError::Infra(InfraError::Telemetry(_))
            | AppError::Unexpected(_) => 1,
        }
    }

    /// Stable label used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Render(err) => err.code(),
            AppError::Infra(InfraError::Io(_)) => "io",
            AppError::Infra(InfraError::Telemetry(_)) => "telemetry",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Unexpected(_) => "unexpected",
        }
    }
}
