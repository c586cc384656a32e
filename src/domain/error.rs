use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Staging,
    AllocatePort,
    Launch,
    Connect,
    Navigate,
    LoadWait,
    Print,
    Paginate,
    LegacyRun,
    Request,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Staging => "staging",
            Stage::AllocatePort => "allocate_port",
            Stage::Launch => "launch",
            Stage::Connect => "connect",
            Stage::Navigate => "navigate",
            Stage::LoadWait => "load_wait",
            Stage::Print => "print",
            Stage::Paginate => "paginate",
            Stage::LegacyRun => "legacy_run",
            Stage::Request => "request",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid render option `{option}`: {reason}")]
    Config { option: &'static str, reason: String },
    #[error("renderer binary not found: {searched}")]
    BinaryNotFound { searched: String },
    #[error("renderer binary is not executable: {}", .path.display())]
    BinaryNotExecutable { path: PathBuf },
    #[error("could not allocate a control port on {host} after {attempts} attempts")]
    PortAllocation { host: String, attempts: u32 },
    #[error("could not connect to renderer on {host}:{port} after {attempts} attempts: {last_error}")]
    Connection {
        host: String,
        port: u16,
        attempts: u32,
        last_error: String,
    },
    #[error("control protocol error during `{method}`: {message}")]
    Protocol { method: String, message: String },
    #[error("renderer produced an empty document{}", detail_suffix(.detail))]
    EmptyDocument { detail: String },
    #[error("renderer process failed during {stage}: {message}")]
    Process { stage: Stage, message: String },
    #[error("timed out during {stage}")]
    Timeout { stage: Stage },
    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },
    #[error("io error during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },
}

fn detail_suffix(detail: &str) -> String {
    if detail.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", detail.trim())
    }
}

impl RenderError {
    pub fn config(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            option,
            reason: reason.into(),
        }
    }

    pub fn protocol(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn process(stage: Stage, message: impl Into<String>) -> Self {
        Self::Process {
            stage,
            message: message.into(),
        }
    }

    pub fn io(stage: Stage) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { stage, source }
    }

    /// Short, stable label used for log fields and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Config { .. } => "config",
            RenderError::BinaryNotFound { .. } => "binary_not_found",
            RenderError::BinaryNotExecutable { .. } => "binary_not_executable",
            RenderError::PortAllocation { .. } => "port_allocation",
            RenderError::Connection { .. } => "connection",
            RenderError::Protocol { .. } => "protocol",
            RenderError::EmptyDocument { .. } => "empty_document",
            RenderError::Process { .. } => "process",
            RenderError::Timeout { .. } => "timeout",
            RenderError::Cancelled { .. } => "cancelled",
            RenderError::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_stage() {
        let err = RenderError::Timeout {
            stage: Stage::LoadWait,
        };
        assert_eq!(err.to_string(), "timed out during load_wait");

        let err = RenderError::io(Stage::Staging)(io::Error::other("disk full"));
        assert_eq!(err.to_string(), "io error during staging: disk full");
    }

    #[test]
    fn empty_document_includes_detail_only_when_present() {
        let bare = RenderError::EmptyDocument {
            detail: "  ".to_string(),
        };
        assert_eq!(bare.to_string(), "renderer produced an empty document");

        let detailed = RenderError::EmptyDocument {
            detail: "Exit with code 1\n".to_string(),
        };
        assert_eq!(
            detailed.to_string(),
            "renderer produced an empty document: Exit with code 1"
        );
    }
}
