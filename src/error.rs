use crate::tools::Tool;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of one tool chain on one page. Always recoverable: the chain is
/// dropped from the candidate set.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} failed: {message}")]
    Execution { tool: Tool, message: String },

    #[error("{tool} exited successfully but wrote no output: {}", path.display())]
    OutputMissing { tool: Tool, path: PathBuf },
}

impl ToolError {
    pub fn execution(tool: Tool, message: impl Into<String>) -> Self {
        Self::Execution {
            tool,
            message: message.into(),
        }
    }
}

/// Unrecovered failure of a single page. Recorded, never aborts a batch.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {page}: split failed: {message}")]
    Split { page: u32, message: String },

    #[error("page {page}: {stage}: {source}")]
    Filesystem {
        page: u32,
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl PageError {
    pub fn fs(page: u32, stage: &'static str, source: std::io::Error) -> Self {
        Self::Filesystem {
            page,
            stage,
            source,
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            Self::Split { page, .. } | Self::Filesystem { page, .. } => *page,
        }
    }
}

/// Fatal problems detected before any page is processed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("required executable not found on PATH: {name} (needed by {needed_by})")]
    MissingExecutable { name: String, needed_by: String },

    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("input is not a usable PDF: {}: {reason}", path.display())]
    InputInvalid { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
