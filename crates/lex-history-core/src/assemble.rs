use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    Article, ConsolidationError, Interval, NodeKind, SectionVersion, SectionVersionId, Selection,
};

/// Nesting limit for section hierarchies. Real codes stay well under a dozen levels.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// One heading in reading order. `depth` is 1 for top-level sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssembledNode<'a> {
    Section { depth: usize, section: &'a SectionVersion },
    Article { depth: usize, article: &'a Article },
}

impl AssembledNode<'_> {
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Section { depth, .. } | Self::Article { depth, .. } => *depth,
        }
    }

    #[must_use]
    pub fn validity(&self) -> Interval {
        match self {
            Self::Section { section, .. } => section.validity,
            Self::Article { article, .. } => article.validity,
        }
    }
}

/// Input irregularities that do not stop the export but leave the output order to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    DuplicateNumero { parent: Option<SectionVersionId>, numero: i64 },
    DuplicateArticleNumber { section: SectionVersionId, number: String },
    UnreachableSection { section: SectionVersionId },
    UnreachableArticle { article: String },
}

impl Display for ConsistencyWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNumero { parent: Some(parent), numero } => {
                write!(f, "sections under {parent} share numero {numero}; store order kept")
            }
            Self::DuplicateNumero { parent: None, numero } => {
                write!(f, "top-level sections share numero {numero}; store order kept")
            }
            Self::DuplicateArticleNumber { section, number } => {
                write!(f, "section {section} holds several articles numbered {number}")
            }
            Self::UnreachableSection { section } => {
                write!(f, "section {section} is not reachable from the root")
            }
            Self::UnreachableArticle { article } => {
                write!(f, "article {article} belongs to a section not in this version")
            }
        }
    }
}

/// The tree of one text version, flattened depth-first in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument<'a> {
    pub window: Interval,
    pub nodes: Vec<AssembledNode<'a>>,
    pub warnings: Vec<ConsistencyWarning>,
}

struct HierarchyIndex<'a> {
    sections: Vec<&'a SectionVersion>,
    articles: Vec<&'a Article>,
    children: BTreeMap<Option<SectionVersionId>, Vec<usize>>,
    articles_by_section: BTreeMap<SectionVersionId, Vec<usize>>,
}

impl<'a> HierarchyIndex<'a> {
    fn build(selection: &Selection<'a>, warnings: &mut Vec<ConsistencyWarning>) -> Self {
        let mut children: BTreeMap<Option<SectionVersionId>, Vec<usize>> = BTreeMap::new();
        for (index, section) in selection.sections.iter().enumerate() {
            children.entry(section.parent).or_default().push(index);
        }
        for (parent, siblings) in &mut children {
            siblings.sort_by_key(|index| selection.sections[*index].numero);
            for pair in siblings.windows(2) {
                let numero = selection.sections[pair[0]].numero;
                if numero == selection.sections[pair[1]].numero {
                    warnings.push(ConsistencyWarning::DuplicateNumero { parent: *parent, numero });
                }
            }
        }

        let mut articles_by_section: BTreeMap<SectionVersionId, Vec<usize>> = BTreeMap::new();
        for (index, article) in selection.articles.iter().enumerate() {
            articles_by_section.entry(article.section).or_default().push(index);
        }
        for (section, indexes) in &articles_by_section {
            let mut seen = BTreeSet::new();
            for index in indexes {
                let number = selection.articles[*index].number.trim();
                if !seen.insert(number) {
                    warnings.push(ConsistencyWarning::DuplicateArticleNumber {
                        section: *section,
                        number: number.to_string(),
                    });
                }
            }
        }

        Self {
            sections: selection.sections.clone(),
            articles: selection.articles.clone(),
            children,
            articles_by_section,
        }
    }

    fn children(&self, parent: Option<SectionVersionId>) -> &[usize] {
        self.children.get(&parent).map_or(&[], Vec::as_slice)
    }

    fn articles_of(&self, section: SectionVersionId) -> &[usize] {
        self.articles_by_section.get(&section).map_or(&[], Vec::as_slice)
    }
}

struct Walk<'w, 'a> {
    window: &'w Interval,
    index: &'w HierarchyIndex<'a>,
    max_depth: usize,
    nodes: Vec<AssembledNode<'a>>,
    visited_sections: Vec<bool>,
    visited_articles: Vec<bool>,
}

impl<'a> Walk<'_, 'a> {
    fn visit(
        &mut self,
        parent: Option<SectionVersionId>,
        depth: usize,
    ) -> Result<(), ConsolidationError> {
        let index = self.index;
        for &child in index.children(parent) {
            let section = index.sections[child];
            let label = section.name.trim();
            check_containment(self.window, NodeKind::Section, label, section.validity)?;
            if depth > self.max_depth {
                return Err(ConsolidationError::DepthExceeded {
                    max_depth: self.max_depth,
                    section: section.id,
                });
            }
            self.visited_sections[child] = true;

            self.nodes.push(AssembledNode::Section { depth, section });
            self.visit(Some(section.id), depth + 1)?;

            for &article_index in index.articles_of(section.id) {
                let article = index.articles[article_index];
                let label = format!("Article {} ({})", article.number.trim(), article.id);
                check_containment(self.window, NodeKind::Article, &label, article.validity)?;
                self.visited_articles[article_index] = true;
                self.nodes.push(AssembledNode::Article { depth, article });
            }
        }
        Ok(())
    }
}

fn check_containment(
    window: &Interval,
    kind: NodeKind,
    label: &str,
    validity: Interval,
) -> Result<(), ConsolidationError> {
    if validity.covers(window) {
        return Ok(());
    }
    Err(ConsolidationError::TemporalConsistency {
        kind,
        label: label.to_string(),
        snapshot: *window,
        node: validity,
    })
}

/// Rebuild the section tree of one text version from flat selected records.
///
/// Sibling sections are ordered by `numero` (ties keep store order and are reported as
/// warnings). Each section's nested subsections come before its own articles, which keep
/// store order. Every emitted node must cover `window`.
///
/// # Errors
/// Returns [`ConsolidationError::TemporalConsistency`] for the first node whose validity
/// does not cover `window`, or [`ConsolidationError::DepthExceeded`] when nesting goes
/// past `max_depth`.
pub fn assemble<'a>(
    window: &Interval,
    selection: &Selection<'a>,
    max_depth: usize,
) -> Result<AssembledDocument<'a>, ConsolidationError> {
    let mut warnings = Vec::new();
    let index = HierarchyIndex::build(selection, &mut warnings);
    let mut walk = Walk {
        window,
        index: &index,
        max_depth,
        nodes: Vec::new(),
        visited_sections: vec![false; index.sections.len()],
        visited_articles: vec![false; index.articles.len()],
    };
    walk.visit(None, 1)?;

    for (position, visited) in walk.visited_sections.iter().enumerate() {
        if !visited {
            warnings.push(ConsistencyWarning::UnreachableSection {
                section: index.sections[position].id,
            });
        }
    }
    for (position, visited) in walk.visited_articles.iter().enumerate() {
        if !visited {
            warnings.push(ConsistencyWarning::UnreachableArticle {
                article: index.articles[position].id.clone(),
            });
        }
    }
    for warning in &warnings {
        tracing::warn!(window = %window, "{warning}");
    }

    Ok(AssembledDocument { window: *window, nodes: walk.nodes, warnings })
}
