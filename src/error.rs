use std::fmt;
use std::path::PathBuf;

/// Errors that abort a patch cycle.
///
/// Everything else that can go wrong while patching (unrecognized layout,
/// generation failures, invalid generated code, single write failures) is
/// absorbed and represented as data.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(
        "SAFETY: refusing to patch '{}': only repositories under '{}' can be patched",
        target.display(),
        workspace.display()
    )]
    SafetyViolation { target: PathBuf, workspace: PathBuf },

    #[error("failed to start patch worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Why a single artifact was not written.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("path '{0}' escapes the repository root")]
    PathEscape(String),

    #[error("failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the generative transformation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),

    #[error("generation service unreachable: {0}")]
    Unreachable(String),

    #[error("generation service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("no generation endpoint configured")]
    NotConfigured,
}

/// Failures of the policy evidence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("failed to read knowledge document {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("knowledge base unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the approval and vulnerability-scan services.
#[derive(Debug, thiserror::Error)]
pub enum PolicyServiceError {
    #[error("policy service unreachable: {0}")]
    Unreachable(String),

    #[error("policy service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed policy service response: {0}")]
    MalformedResponse(String),
}

/// A syntax failure found by the artifact validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Syntax error in {} at line {}: {}",
            self.file, self.line, self.message
        )
    }
}

impl std::error::Error for SyntaxDiagnostic {}
