use miette::Diagnostic;
use thiserror::Error;

use crate::workflow::SchemaViolation;

#[derive(Debug, Error, Diagnostic)]
pub enum HerdError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("failed to download from '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("{message}")]
    ArchiveCorrupt { message: String },

    #[error(transparent)]
    InvalidWorkflow(#[from] SchemaViolation),

    #[error("Unknown workflow '{name}'")]
    #[diagnostic(help("run `herd workflows list` to see the available workflows"))]
    UnknownWorkflow { name: String },

    #[error("{name}")]
    #[diagnostic(help("this workflow does not run on the host architecture"))]
    IncompatibleWorkflow { name: String },

    #[error("{resource} value is less than workflow minimum of {required}")]
    WorkflowMinimum {
        resource: &'static str,
        required: String,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client")]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
}

impl HerdError {
    /// Failures a refresh may log and retry later instead of reporting.
    ///
    /// This is an allow-list: anything not named here is a defect and must
    /// reach the caller.
    pub fn is_recoverable_refresh_failure(&self) -> bool {
        matches!(self, HerdError::Fetch { .. } | HerdError::ArchiveCorrupt { .. })
    }
}
