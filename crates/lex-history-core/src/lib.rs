//! Temporal reconstruction of consolidated legal texts.
//!
//! A text is stored as flat section and article versions, each valid over a
//! `[start, end)` interval. For one version of the text, [`select_for_snapshot`]
//! keeps the records covering the window, [`assemble`] rebuilds the section tree
//! in reading order, and [`render`] linearizes it into Markdown.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;
use ulid::Ulid;

mod assemble;
mod interval;
mod render;
mod select;

pub use assemble::{
    assemble, AssembledDocument, AssembledNode, ConsistencyWarning, DEFAULT_MAX_DEPTH,
};
pub use interval::{format_iso_date, parse_iso_date, strictly_before, Endpoint, Interval};
pub use render::{
    consolidation_date_fr, permalink, render, validity_phrase, BodyCache, InMemoryBodies,
    RenderedDocument, FRENCH_MONTHS,
};
pub use select::{select_for_snapshot, Selection};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConsolidationError {
    #[error(
        "{kind} {label} is not valid for text version {snapshot} ({kind} version {node})"
    )]
    TemporalConsistency { kind: NodeKind, label: String, snapshot: Interval, node: Interval },
    #[error("missing rendered body for article {article_id} of text {document_id}")]
    MissingArtifact { document_id: String, article_id: String },
    #[error("section hierarchy exceeds maximum depth {max_depth} at section {section}")]
    DepthExceeded { max_depth: usize, section: SectionVersionId },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Section,
    Article,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Article => "article",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SectionVersionId(pub Ulid);

impl SectionVersionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SectionVersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SectionVersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A legal text. Code documents are exported under their own sub-path.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_code: bool,
}

impl Document {
    /// Check identity fields before the document is persisted or exported.
    ///
    /// # Errors
    /// Returns [`ConsolidationError::Validation`] when the identifier or name is blank.
    pub fn validate(&self) -> Result<(), ConsolidationError> {
        if self.id.trim().is_empty() {
            return Err(ConsolidationError::Validation("document id MUST be provided".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ConsolidationError::Validation(
                "document name MUST be provided".to_string(),
            ));
        }
        Ok(())
    }
}

/// Start of a text version: a concrete date, or a placeholder that is never rendered.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SnapshotStart {
    Placeholder,
    Date(Date),
}

/// One consolidated version of a text, valid over `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "SnapshotRepr", into = "SnapshotRepr")]
pub struct Snapshot {
    pub document_id: String,
    pub start: SnapshotStart,
    pub end: Endpoint,
}

impl Snapshot {
    #[must_use]
    pub fn new(document_id: &str, start: Date, end: Option<Date>) -> Self {
        Self {
            document_id: document_id.to_string(),
            start: SnapshotStart::Date(start),
            end: end.map_or(Endpoint::UnboundedFuture, Endpoint::Date),
        }
    }

    #[must_use]
    pub fn placeholder(document_id: &str, end: Option<Date>) -> Self {
        Self {
            document_id: document_id.to_string(),
            start: SnapshotStart::Placeholder,
            end: end.map_or(Endpoint::UnboundedFuture, Endpoint::Date),
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.start == SnapshotStart::Placeholder
    }

    /// The concrete window of this version, or `None` for a placeholder.
    #[must_use]
    pub fn window(&self) -> Option<Interval> {
        match self.start {
            SnapshotStart::Placeholder => None,
            SnapshotStart::Date(start) => Some(Interval::from_parts(start, self.end)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRepr {
    document_id: String,
    #[serde(with = "iso_date::option", default)]
    start: Option<Date>,
    #[serde(with = "iso_date::option", default)]
    end: Option<Date>,
}

impl From<SnapshotRepr> for Snapshot {
    fn from(repr: SnapshotRepr) -> Self {
        match repr.start {
            Some(start) => Self::new(&repr.document_id, start, repr.end),
            None => Self::placeholder(&repr.document_id, repr.end),
        }
    }
}

impl From<Snapshot> for SnapshotRepr {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            document_id: snapshot.document_id,
            start: match snapshot.start {
                SnapshotStart::Placeholder => None,
                SnapshotStart::Date(date) => Some(date),
            },
            end: snapshot.end.as_date(),
        }
    }
}

/// One version of a section. Children point at their parent; the tree is rebuilt per window.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SectionVersion {
    pub id: SectionVersionId,
    pub document_id: String,
    pub parent: Option<SectionVersionId>,
    pub numero: i64,
    pub name: String,
    pub validity: Interval,
}

/// Terminal content node. `id` keys the pre-rendered body in the [`BodyCache`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Article {
    pub id: String,
    pub document_id: String,
    pub section: SectionVersionId,
    pub number: String,
    pub validity: Interval,
}

#[derive(Serialize, Deserialize)]
struct IntervalRepr {
    #[serde(with = "iso_date")]
    start: Date,
    #[serde(with = "iso_date::option", default)]
    end: Option<Date>,
}

impl From<IntervalRepr> for Interval {
    fn from(repr: IntervalRepr) -> Self {
        Self::new(repr.start, repr.end)
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        Self { start: interval.start(), end: interval.end().as_date() }
    }
}
