use crate::{Article, Interval, SectionVersion};

/// Records of one text that are in force over a whole window, in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection<'a> {
    pub sections: Vec<&'a SectionVersion>,
    pub articles: Vec<&'a Article>,
}

/// Keep the section and article versions of `document_id` whose validity covers `window`.
///
/// This is the coarse filter a database query would apply. Containment is checked again,
/// node by node, during [`crate::assemble`].
#[must_use]
pub fn select_for_snapshot<'a>(
    document_id: &str,
    window: &Interval,
    sections: &'a [SectionVersion],
    articles: &'a [Article],
) -> Selection<'a> {
    Selection {
        sections: sections
            .iter()
            .filter(|section| {
                section.document_id == document_id && section.validity.covers(window)
            })
            .collect(),
        articles: articles
            .iter()
            .filter(|article| {
                article.document_id == document_id && article.validity.covers(window)
            })
            .collect(),
    }
}
