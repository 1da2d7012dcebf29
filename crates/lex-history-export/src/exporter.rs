use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use lex_history_core::{
    assemble, consolidation_date_fr, render, select_for_snapshot, validity_phrase, Article,
    AssembledDocument, AssembledNode, BodyCache, ConsistencyWarning, ConsolidationError,
    Document, Interval, RenderedDocument, SectionVersion, Snapshot,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime};
use tracing::{debug, info};

use crate::{DocumentLayout, ExportError, ExportOptions, RecordSource, VersionedSink};

/// One committed version of a text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommittedVersion {
    pub index: usize,
    pub window: Interval,
    pub message: String,
    pub commit_id: String,
    pub content_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedWarning {
    pub index: usize,
    pub warning: ConsistencyWarning,
}

/// Outcome of exporting one text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportReport {
    pub document_id: String,
    pub repository: PathBuf,
    pub file: PathBuf,
    pub commits: Vec<CommittedVersion>,
    pub skipped_placeholders: Vec<usize>,
    pub warnings: Vec<ReportedWarning>,
}

struct TextRecords {
    snapshots: Vec<Snapshot>,
    sections: Vec<SectionVersion>,
    articles: Vec<Article>,
}

impl TextRecords {
    fn load(records: &dyn RecordSource, document_id: &str) -> Result<Self, ExportError> {
        let store_error = |source: anyhow::Error| ExportError::Store {
            document_id: document_id.to_string(),
            source,
        };
        Ok(Self {
            snapshots: records.list_snapshots(document_id).map_err(store_error)?,
            sections: records.list_sections(document_id).map_err(store_error)?,
            articles: records.list_articles(document_id).map_err(store_error)?,
        })
    }

    fn assemble_version(
        &self,
        document: &Document,
        window: &Interval,
        max_depth: usize,
    ) -> Result<AssembledDocument<'_>, ConsolidationError> {
        let selection = select_for_snapshot(&document.id, window, &self.sections, &self.articles);
        assemble(window, &selection, max_depth)
    }

    /// Assemble every version in order. Every article that a dated version renders must
    /// have a cached body before the first commit is written.
    fn plan(
        &self,
        document: &Document,
        bodies: &dyn BodyCache,
        max_depth: usize,
    ) -> Result<Vec<PlannedVersion<'_>>, ExportError> {
        let consolidation_error = |index: usize, source: ConsolidationError| {
            ExportError::Consolidation { document_id: document.id.clone(), index, source }
        };
        let mut checked = BTreeSet::new();
        let mut planned = Vec::with_capacity(self.snapshots.len());
        for (index, snapshot) in self.snapshots.iter().enumerate() {
            let Some(window) = snapshot.window() else {
                planned.push(PlannedVersion { index, assembled: None });
                continue;
            };
            let assembled = self
                .assemble_version(document, &window, max_depth)
                .map_err(|source| consolidation_error(index, source))?;
            for node in &assembled.nodes {
                let AssembledNode::Article { article, .. } = *node else {
                    continue;
                };
                if checked.insert(article.id.as_str())
                    && !bodies.has_body(&document.id, &article.id)
                {
                    return Err(consolidation_error(
                        index,
                        ConsolidationError::MissingArtifact {
                            document_id: document.id.clone(),
                            article_id: article.id.clone(),
                        },
                    ));
                }
            }
            planned.push(PlannedVersion { index, assembled: Some(assembled) });
        }
        Ok(planned)
    }
}

/// A version of the text, assembled unless it is a placeholder.
struct PlannedVersion<'a> {
    index: usize,
    assembled: Option<AssembledDocument<'a>>,
}

/// Subject line plus the validity window of the version.
#[must_use]
pub fn commit_message(window: &Interval) -> String {
    format!(
        "Version consolidée au {}\n\nVersion en vigueur {}.",
        consolidation_date_fr(window.start()),
        validity_phrase(window)
    )
}

fn content_digest(content: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(content.as_bytes()))
}

/// Replays the versions of texts into a [`VersionedSink`].
pub struct Exporter<'a> {
    records: &'a dyn RecordSource,
    bodies: &'a dyn BodyCache,
    sink: &'a mut dyn VersionedSink,
    options: ExportOptions,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(
        records: &'a dyn RecordSource,
        bodies: &'a dyn BodyCache,
        sink: &'a mut dyn VersionedSink,
        options: ExportOptions,
    ) -> Self {
        Self { records, bodies, sink, options }
    }

    /// Export every dated version of `document`, oldest first, one commit each.
    ///
    /// Placeholder versions are skipped without writing or committing. Commits written
    /// before a failure are kept.
    ///
    /// # Errors
    /// - [`ExportError::PreconditionViolation`] when the destination file already exists.
    /// - [`ExportError::Consolidation`] when a node does not cover a version window, a body
    ///   is missing from the cache, or the hierarchy is too deep.
    /// - [`ExportError::SinkFailure`] / [`ExportError::Store`] for collaborator failures.
    pub fn export(
        &mut self,
        document: &Document,
        output_root: &Path,
    ) -> Result<ExportReport, ExportError> {
        let document_id = document.id.as_str();
        let sink_error = |operation: &'static str| {
            move |source: anyhow::Error| ExportError::SinkFailure {
                document_id: document_id.to_string(),
                operation,
                source,
            }
        };

        let layout = DocumentLayout::for_document(document, output_root);
        let created = self
            .sink
            .ensure_repository(&layout.repository)
            .map_err(sink_error("initialize the repository"))?;
        if !created {
            self.sink
                .reset_subtree(&layout.repository, &layout.subtree)
                .map_err(sink_error("reset the working tree"))?;
        }

        let file_path = layout.file_path();
        if self.sink.file_exists(&file_path) {
            return Err(ExportError::PreconditionViolation {
                document_id: document_id.to_string(),
                path: file_path,
            });
        }

        let records = TextRecords::load(self.records, document_id)?;
        let planned = records.plan(document, self.bodies, self.options.max_depth)?;

        let mut report = ExportReport {
            document_id: document_id.to_string(),
            repository: layout.repository.clone(),
            file: file_path.clone(),
            commits: Vec::new(),
            skipped_placeholders: Vec::new(),
            warnings: Vec::new(),
        };

        for PlannedVersion { index, assembled } in planned {
            let Some(assembled) = assembled else {
                debug!(document_id, index, "skipping placeholder version");
                report.skipped_placeholders.push(index);
                continue;
            };
            let window = assembled.window;

            let rendered = render(document, &assembled, self.bodies).map_err(|source| {
                ExportError::Consolidation { document_id: document_id.to_string(), index, source }
            })?;
            report.warnings.extend(
                assembled.warnings.into_iter().map(|warning| ReportedWarning { index, warning }),
            );

            self.sink
                .write_file(&file_path, &rendered.content)
                .map_err(sink_error("write the text"))?;
            let message = commit_message(&window);
            let timestamp = commit_timestamp(&window);
            let commit_id = self
                .sink
                .commit(
                    &layout.repository,
                    std::slice::from_ref(&layout.file),
                    &self.options.author,
                    timestamp,
                    &message,
                )
                .map_err(sink_error("commit the version"))?;

            info!(
                document_id,
                index,
                "Version {index} enregistrée ({})",
                validity_phrase(&window)
            );
            report.commits.push(CommittedVersion {
                index,
                window,
                message,
                commit_id,
                content_digest: content_digest(&rendered.content),
            });
        }

        Ok(report)
    }
}

/// Render the version of `document` in force on `at`, with its index among the text's
/// versions. Returns `None` when no dated version contains `at`.
///
/// # Errors
/// Returns [`ExportError::Store`] when records cannot be read and
/// [`ExportError::Consolidation`] when the version cannot be rebuilt.
pub fn render_version_at(
    records: &dyn RecordSource,
    bodies: &dyn BodyCache,
    document: &Document,
    at: Date,
    max_depth: usize,
) -> Result<Option<(usize, RenderedDocument)>, ExportError> {
    let text = TextRecords::load(records, &document.id)?;
    let found = text.snapshots.iter().enumerate().find_map(|(index, snapshot)| {
        snapshot.window().filter(|window| window.contains_date(at)).map(|window| (index, window))
    });
    let Some((index, window)) = found else {
        return Ok(None);
    };
    let consolidation_error = |source: ConsolidationError| ExportError::Consolidation {
        document_id: document.id.clone(),
        index,
        source,
    };
    let assembled =
        text.assemble_version(document, &window, max_depth).map_err(consolidation_error)?;
    let rendered = render(document, &assembled, bodies).map_err(consolidation_error)?;
    Ok(Some((index, rendered)))
}

/// Commit timestamp of a version: midnight UTC on its first day.
#[must_use]
pub fn commit_timestamp(window: &Interval) -> OffsetDateTime {
    window.start().midnight().assume_utc()
}
