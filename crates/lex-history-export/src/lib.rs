//! Exports the version history of consolidated texts into a versioned store.
//!
//! [`Exporter::export`] walks the versions of one text in chronological order and, for
//! each dated version, rebuilds the text, writes it, and records one commit dated at the
//! start of the version.

use std::path::PathBuf;

use lex_history_core::{ConsolidationError, DEFAULT_MAX_DEPTH};

mod cache;
mod exporter;
mod layout;
mod sink;
mod source;

pub use cache::FsBodyCache;
pub use exporter::{
    commit_message, commit_timestamp, render_version_at, CommittedVersion, ExportReport, Exporter,
    ReportedWarning,
};
pub use layout::{normalize_code_name, DocumentLayout, CATEGORY_DIRS};
pub use sink::{CommitAuthor, GitSink, MemorySink, RecordedCommit, VersionedSink};
pub use source::RecordSource;

/// Fatal failures while exporting one text. Each names the text, and the version index
/// when one is involved.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("text {document_id}: destination {} already exists", path.display())]
    PreconditionViolation { document_id: String, path: PathBuf },
    #[error("text {document_id}, version {index}: {source}")]
    Consolidation {
        document_id: String,
        index: usize,
        #[source]
        source: ConsolidationError,
    },
    #[error("text {document_id}: history sink failed to {operation}: {source:#}")]
    SinkFailure {
        document_id: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("text {document_id}: record store failed: {source:#}")]
    Store {
        document_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ExportError {
    #[must_use]
    pub fn document_id(&self) -> &str {
        match self {
            Self::PreconditionViolation { document_id, .. }
            | Self::Consolidation { document_id, .. }
            | Self::SinkFailure { document_id, .. }
            | Self::Store { document_id, .. } => document_id,
        }
    }

    /// Short machine-readable name of the violated condition.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionViolation { .. } => "precondition_violation",
            Self::Consolidation { source, .. } => match source {
                ConsolidationError::TemporalConsistency { .. } => "temporal_consistency",
                ConsolidationError::MissingArtifact { .. } => "missing_artifact",
                ConsolidationError::DepthExceeded { .. } => "structure_error",
                ConsolidationError::Validation(_) => "validation",
            },
            Self::SinkFailure { .. } => "sink_failure",
            Self::Store { .. } => "store_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub max_depth: usize,
    pub author: CommitAuthor,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { max_depth: DEFAULT_MAX_DEPTH, author: CommitAuthor::default() }
    }
}
