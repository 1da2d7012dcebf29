use anyhow::Result;
use lex_history_core::{Article, SectionVersion, Snapshot};
use lex_history_store_sqlite::{Dataset, SqliteStore};

/// Read side of the record store, scoped to one text.
pub trait RecordSource {
    /// Versions of the text ordered by start date, placeholders first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>>;

    /// # Errors
    /// Returns an error when the store cannot be read.
    fn list_sections(&self, document_id: &str) -> Result<Vec<SectionVersion>>;

    /// # Errors
    /// Returns an error when the store cannot be read.
    fn list_articles(&self, document_id: &str) -> Result<Vec<Article>>;
}

impl RecordSource for SqliteStore {
    fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>> {
        SqliteStore::list_snapshots(self, document_id)
    }

    fn list_sections(&self, document_id: &str) -> Result<Vec<SectionVersion>> {
        SqliteStore::list_sections(self, document_id)
    }

    fn list_articles(&self, document_id: &str) -> Result<Vec<Article>> {
        SqliteStore::list_articles(self, document_id)
    }
}

/// An in-memory dataset serves records in file order, except snapshots, which are sorted
/// the way the SQLite store returns them.
impl RecordSource for Dataset {
    fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>> {
        let mut snapshots = self
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.document_id == document_id)
            .cloned()
            .collect::<Vec<_>>();
        snapshots.sort_by_key(|snapshot| snapshot.window().map(|window| window.start()));
        Ok(snapshots)
    }

    fn list_sections(&self, document_id: &str) -> Result<Vec<SectionVersion>> {
        Ok(self
            .sections
            .iter()
            .filter(|section| section.document_id == document_id)
            .cloned()
            .collect())
    }

    fn list_articles(&self, document_id: &str) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .iter()
            .filter(|article| article.document_id == document_id)
            .cloned()
            .collect())
    }
}
