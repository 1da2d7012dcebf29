use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lex_history_core::Document;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Top-level directories of the history tree, one per kind of text.
pub const CATEGORY_DIRS: [&str; 5] = ["codes", "constitutions", "lois", "décrets", "ordonnances"];

/// Where a text lives inside the history tree.
///
/// Codes get a repository of their own under `codes/`; other texts share the root
/// repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    pub repository: PathBuf,
    /// Path of the text's working subtree, relative to `repository`.
    pub subtree: PathBuf,
    /// Path of the Markdown file, relative to `repository`.
    pub file: PathBuf,
}

impl DocumentLayout {
    #[must_use]
    pub fn for_document(document: &Document, output_root: &Path) -> Self {
        let repository = if document.is_code {
            output_root.join("codes").join(normalize_code_name(&document.name))
        } else {
            output_root.to_path_buf()
        };
        Self {
            repository,
            subtree: PathBuf::from("."),
            file: PathBuf::from(format!("{}.md", document.name)),
        }
    }

    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.repository.join(&self.file)
    }

    /// Create the category directories under `output_root`.
    ///
    /// # Errors
    /// Returns an error when a directory cannot be created.
    pub fn create_category_dirs(output_root: &Path) -> Result<()> {
        for category in CATEGORY_DIRS {
            let dir = output_root.join(category);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Directory name for a code: lower-cased, accents stripped, every run of other
/// characters collapsed to `_`.
#[must_use]
pub fn normalize_code_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.nfd().filter(|ch| !is_combining_mark(*ch)) {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}
