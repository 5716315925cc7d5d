use std::path::PathBuf;

use cad_mesh::GeometryError;
use cad_script::ExecutionError;
use serde::Serialize;
use thiserror::Error;

/// Failure talking to a language or embedding model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

/// A completion that cannot be used as code.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(#[from] ModelError),

    #[error("the model returned an empty response")]
    Empty,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(#[source] ModelError),

    #[error("failed to access corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What a failed request was working on, so the caller can reproduce it.
///
/// `code` is the first snippet that was tried and `corrected_code` the one
/// produced by the correction attempt, when there was one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_code: Option<String>,
}

impl ErrorContext {
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_corrected_code(mut self, code: Option<String>) -> Self {
        self.corrected_code = code;
        self
    }
}

/// Terminal outcome of a generation request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("retrieval unavailable: {source}")]
    RetrievalUnavailable {
        context: ErrorContext,
        #[source]
        source: RetrievalError,
    },

    #[error("generation failed: {source}")]
    GenerationFailed {
        context: ErrorContext,
        #[source]
        source: ModelError,
    },

    #[error("the model returned an empty response")]
    EmptyGeneration { context: ErrorContext },

    #[error("generated code failed to run: {error}")]
    ExecutionFailed {
        context: ErrorContext,
        error: ExecutionError,
        /// Error of the first attempt when the correction failed as well.
        original_error: Option<ExecutionError>,
    },

    #[error("malformed geometry: {source}")]
    MalformedGeometry {
        context: ErrorContext,
        #[source]
        source: GeometryError,
    },

    #[error("failed to write mesh file: {source}")]
    Export {
        context: ErrorContext,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub(crate) fn from_generation(error: GenerationError, context: ErrorContext) -> Self {
        match error {
            GenerationError::Failed(source) => Self::GenerationFailed { context, source },
            GenerationError::Empty => Self::EmptyGeneration { context },
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::RetrievalUnavailable { .. } => "retrieval_unavailable",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::EmptyGeneration { .. } => "empty_generation",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::MalformedGeometry { .. } => "malformed_geometry",
            Self::Export { .. } => "export",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::InvalidRequest { .. } => None,
            Self::RetrievalUnavailable { context, .. }
            | Self::GenerationFailed { context, .. }
            | Self::EmptyGeneration { context }
            | Self::ExecutionFailed { context, .. }
            | Self::MalformedGeometry { context, .. }
            | Self::Export { context, .. } => Some(context),
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        self.context().map(|context| context.prompt.as_str())
    }

    pub fn code(&self) -> Option<&str> {
        self.context().and_then(|context| context.code.as_deref())
    }

    pub fn corrected_code(&self) -> Option<&str> {
        self.context()
            .and_then(|context| context.corrected_code.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use cad_script::ExecutionError;

    use super::{ErrorContext, GenerationError, ModelError, PipelineError};

    #[test]
    fn generation_errors_keep_their_kind() {
        let context = ErrorContext::for_prompt("a cube");
        let empty = PipelineError::from_generation(GenerationError::Empty, context.clone());
        assert_eq!(empty.kind(), "empty_generation");

        let failed = PipelineError::from_generation(
            GenerationError::Failed(ModelError::Unavailable("quota".into())),
            context,
        );
        assert_eq!(failed.kind(), "generation_failed");
        assert!(failed.to_string().contains("quota"));
        assert_eq!(failed.prompt(), Some("a cube"));
    }

    #[test]
    fn execution_failure_exposes_both_snippets() {
        let error = PipelineError::ExecutionFailed {
            context: ErrorContext::for_prompt("a cube")
                .with_code("first")
                .with_corrected_code(Some("second".into())),
            error: ExecutionError::at("boom", 2),
            original_error: Some(ExecutionError::new("bang")),
        };
        assert_eq!(error.code(), Some("first"));
        assert_eq!(error.corrected_code(), Some("second"));
        assert_eq!(error.to_string(), "generated code failed to run: boom (line 2)");
    }

    #[test]
    fn invalid_request_has_no_context() {
        let error = PipelineError::invalid_request("missing prompt");
        assert_eq!(error.kind(), "invalid_request");
        assert!(error.context().is_none());
        assert!(error.code().is_none());
    }
}
