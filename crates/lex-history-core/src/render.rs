use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    format_iso_date, AssembledDocument, AssembledNode, ConsolidationError, Document, Endpoint,
    Interval,
};

pub const FRENCH_MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Source of article bodies already converted to Markdown.
pub trait BodyCache {
    /// Fetch the rendered body of one article.
    ///
    /// # Errors
    /// Returns [`ConsolidationError::MissingArtifact`] when the body was never materialized.
    fn rendered_body(&self, document_id: &str, article_id: &str)
        -> Result<String, ConsolidationError>;

    /// Whether a body is available, without requiring the caller to keep it.
    fn has_body(&self, document_id: &str, article_id: &str) -> bool {
        self.rendered_body(document_id, article_id).is_ok()
    }
}

/// Body cache held in memory, keyed by `(document_id, article_id)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBodies {
    bodies: BTreeMap<(String, String), String>,
}

impl InMemoryBodies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document_id: &str, article_id: &str, body: &str) {
        self.bodies.insert((document_id.to_string(), article_id.to_string()), body.to_string());
    }
}

impl BodyCache for InMemoryBodies {
    fn rendered_body(
        &self,
        document_id: &str,
        article_id: &str,
    ) -> Result<String, ConsolidationError> {
        self.bodies.get(&(document_id.to_string(), article_id.to_string())).cloned().ok_or_else(
            || ConsolidationError::MissingArtifact {
                document_id: document_id.to_string(),
                article_id: article_id.to_string(),
            },
        )
    }
}

/// Markdown text of one version of a text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedDocument {
    pub document_id: String,
    pub window: Interval,
    pub content: String,
}

impl RenderedDocument {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.lines()
    }
}

/// Long French date, e.g. `1er janvier 2000` or `15 juin 2010`.
#[must_use]
pub fn consolidation_date_fr(date: Date) -> String {
    let month = FRENCH_MONTHS[usize::from(u8::from(date.month())) - 1];
    if date.day() == 1 {
        format!("1er {month} {}", date.year())
    } else {
        format!("{} {month} {}", date.day(), date.year())
    }
}

/// Légifrance permanent link to the text as consolidated on `date`.
#[must_use]
pub fn permalink(document_id: &str, date: Date) -> String {
    format!(
        "http://legifrance.gouv.fr/affichCode.do?cidTexte={document_id}&dateTexte={:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// `du 2000-01-01 au 2005-03-10`, or `du 2005-03-10 à maintenant` for an open window.
#[must_use]
pub fn validity_phrase(window: &Interval) -> String {
    match window.end() {
        Endpoint::Date(end) => {
            format!("du {} au {}", format_iso_date(window.start()), format_iso_date(end))
        }
        Endpoint::UnboundedPast | Endpoint::UnboundedFuture => {
            format!("du {} à maintenant", format_iso_date(window.start()))
        }
    }
}

fn heading_marker(depth: usize) -> String {
    "#".repeat(depth)
}

/// Serialize an assembled text version as Markdown.
///
/// The output depends only on its inputs, so two runs over the same records produce the
/// same bytes and consecutive versions diff cleanly.
///
/// # Errors
/// Returns [`ConsolidationError::MissingArtifact`] when an article body is not in `bodies`.
pub fn render(
    document: &Document,
    assembled: &AssembledDocument<'_>,
    bodies: &dyn BodyCache,
) -> Result<RenderedDocument, ConsolidationError> {
    let start = assembled.window.start();
    let mut content = String::new();
    content.push_str(&document.name);
    content.push_str("\n\n");
    content.push_str("- Date de consolidation : ");
    content.push_str(&consolidation_date_fr(start));
    content.push('\n');
    content.push_str("- [Lien permanent Légifrance](");
    content.push_str(&permalink(&document.id, start));
    content.push_str(")\n\n\n");

    for node in &assembled.nodes {
        match node {
            AssembledNode::Section { depth, section } => {
                content.push_str(&heading_marker(*depth));
                content.push(' ');
                content.push_str(section.name.trim());
                content.push_str("\n\n");
            }
            AssembledNode::Article { depth, article } => {
                let body = bodies.rendered_body(&document.id, &article.id)?;
                content.push_str(&heading_marker(*depth));
                content.push_str(" Article ");
                content.push_str(article.number.trim());
                content.push_str("\n\n");
                content.push_str(&body);
                content.push_str("\n\n\n");
            }
        }
    }

    Ok(RenderedDocument { document_id: document.id.clone(), window: assembled.window, content })
}
