use std::fs;
use std::path::PathBuf;

use lex_history_core::{BodyCache, ConsolidationError};

/// Article bodies pre-rendered to Markdown under `<root>/markdown/<document_id>/<article_id>.md`.
#[derive(Debug, Clone)]
pub struct FsBodyCache {
    root: PathBuf,
}

impl FsBodyCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn body_path(&self, document_id: &str, article_id: &str) -> PathBuf {
        self.root.join("markdown").join(document_id).join(format!("{article_id}.md"))
    }
}

impl BodyCache for FsBodyCache {
    fn rendered_body(
        &self,
        document_id: &str,
        article_id: &str,
    ) -> Result<String, ConsolidationError> {
        let path = self.body_path(document_id, article_id);
        fs::read_to_string(&path).map_err(|err| {
            tracing::debug!(path = %path.display(), error = %err, "article body unreadable");
            ConsolidationError::MissingArtifact {
                document_id: document_id.to_string(),
                article_id: article_id.to_string(),
            }
        })
    }

    fn has_body(&self, document_id: &str, article_id: &str) -> bool {
        self.body_path(document_id, article_id).is_file()
    }
}
