use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use lex_history_core::{
    format_iso_date, parse_iso_date, Article, Document, Interval, SectionVersion,
    SectionVersionId, Snapshot, SnapshotStart,
};
use rusqlite::{
    params, Connection, DatabaseName, OptionalExtension, Params, Row, Transaction,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS documents (
  document_id TEXT PRIMARY KEY CHECK (length(trim(document_id)) > 0),
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  is_code INTEGER NOT NULL CHECK (is_code IN (0, 1))
);

CREATE TABLE IF NOT EXISTS snapshots (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  document_id TEXT NOT NULL,
  start_date TEXT,
  end_date TEXT,
  CHECK (start_date IS NULL OR end_date IS NULL OR start_date <= end_date),
  FOREIGN KEY (document_id) REFERENCES documents(document_id)
);

CREATE TABLE IF NOT EXISTS section_versions (
  section_version_id TEXT PRIMARY KEY,
  document_id TEXT NOT NULL,
  parent_id TEXT,
  numero INTEGER NOT NULL,
  name TEXT NOT NULL,
  start_date TEXT NOT NULL,
  end_date TEXT,
  FOREIGN KEY (document_id) REFERENCES documents(document_id),
  FOREIGN KEY (parent_id) REFERENCES section_versions(section_version_id)
    DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS articles (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  article_id TEXT NOT NULL,
  document_id TEXT NOT NULL,
  section_version_id TEXT NOT NULL,
  number TEXT NOT NULL,
  start_date TEXT NOT NULL,
  end_date TEXT,
  UNIQUE(document_id, article_id),
  FOREIGN KEY (document_id) REFERENCES documents(document_id),
  FOREIGN KEY (section_version_id) REFERENCES section_versions(section_version_id)
    DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS idx_snapshots_document ON snapshots(document_id, start_date);
CREATE INDEX IF NOT EXISTS idx_section_versions_document ON section_versions(document_id);
CREATE INDEX IF NOT EXISTS idx_section_versions_parent ON section_versions(parent_id);
CREATE INDEX IF NOT EXISTS idx_articles_document ON articles(document_id);
CREATE INDEX IF NOT EXISTS idx_articles_section ON articles(section_version_id);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// Records of one or more texts, as exchanged in JSON import files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub sections: Vec<SectionVersion>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_documents: usize,
    pub skipped_existing_documents: usize,
    pub imported_snapshots: usize,
    pub skipped_existing_snapshots: usize,
    pub imported_sections: usize,
    pub skipped_existing_sections: usize,
    pub imported_articles: usize,
    pub skipped_existing_articles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Read a JSON dataset file.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a valid dataset.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse dataset JSON {}", path.display()))
}

impl SqliteStore {
    /// Open a SQLite-backed record store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }

    /// Import a dataset in one transaction. Existing rows are skipped when `skip_existing`
    /// is set and rejected otherwise.
    ///
    /// # Errors
    /// Returns an error when a record is invalid, conflicts with an existing row, or
    /// references a missing document or section.
    pub fn import_dataset(
        &mut self,
        dataset: &Dataset,
        skip_existing: bool,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let tx = self.conn.transaction().context("failed to start import transaction")?;

        for document in &dataset.documents {
            document.validate().map_err(|err| anyhow!("document validation failed: {err}"))?;
            if exists(
                &tx,
                "SELECT EXISTS(SELECT 1 FROM documents WHERE document_id = ?1)",
                params![document.id],
            )? {
                if !skip_existing {
                    return Err(anyhow!("document already exists: {}", document.id));
                }
                summary.skipped_existing_documents += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO documents(document_id, name, is_code) VALUES (?1, ?2, ?3)",
                params![document.id, document.name, document.is_code],
            )
            .with_context(|| format!("failed to insert document {}", document.id))?;
            summary.imported_documents += 1;
        }

        for snapshot in &dataset.snapshots {
            let start = match snapshot.start {
                SnapshotStart::Placeholder => None,
                SnapshotStart::Date(date) => Some(format_iso_date(date)),
            };
            let end = snapshot.end.as_date().map(format_iso_date);
            let already = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM snapshots
                     WHERE document_id = ?1 AND start_date IS ?2 AND end_date IS ?3)",
                    params![snapshot.document_id, start, end],
                    |row| row.get::<_, i64>(0),
                )
                .context("failed to check existing snapshot")?
                == 1;
            if already {
                if !skip_existing {
                    return Err(anyhow!(
                        "snapshot already exists for {}: {:?} -> {:?}",
                        snapshot.document_id,
                        start,
                        end
                    ));
                }
                summary.skipped_existing_snapshots += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO snapshots(document_id, start_date, end_date) VALUES (?1, ?2, ?3)",
                params![snapshot.document_id, start, end],
            )
            .with_context(|| format!("failed to insert snapshot of {}", snapshot.document_id))?;
            summary.imported_snapshots += 1;
        }

        for section in &dataset.sections {
            let id = section.id.to_string();
            if exists(
                &tx,
                "SELECT EXISTS(SELECT 1 FROM section_versions WHERE section_version_id = ?1)",
                params![id],
            )? {
                if !skip_existing {
                    return Err(anyhow!("section version already exists: {id}"));
                }
                summary.skipped_existing_sections += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO section_versions(
                    section_version_id, document_id, parent_id, numero, name, start_date, end_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    section.document_id,
                    section.parent.map(|parent| parent.to_string()),
                    section.numero,
                    section.name,
                    format_iso_date(section.validity.start()),
                    section.validity.end().as_date().map(format_iso_date),
                ],
            )
            .with_context(|| format!("failed to insert section version {id}"))?;
            summary.imported_sections += 1;
        }

        for article in &dataset.articles {
            if exists(
                &tx,
                "SELECT EXISTS(SELECT 1 FROM articles WHERE document_id = ?1 AND article_id = ?2)",
                params![article.document_id, article.id],
            )? {
                if !skip_existing {
                    return Err(anyhow!("article already exists: {}", article.id));
                }
                summary.skipped_existing_articles += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO articles(
                    article_id, document_id, section_version_id, number, start_date, end_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    article.id,
                    article.document_id,
                    article.section.to_string(),
                    article.number,
                    format_iso_date(article.validity.start()),
                    article.validity.end().as_date().map(format_iso_date),
                ],
            )
            .with_context(|| format!("failed to insert article {}", article.id))?;
            summary.imported_articles += 1;
        }

        tx.commit().context("failed to commit import transaction")?;
        Ok(summary)
    }

    /// List known texts ordered by identifier.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document_id, name, is_code FROM documents ORDER BY document_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Document { id: row.get(0)?, name: row.get(1)?, is_code: row.get(2)? })
        })?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?);
        }
        Ok(documents)
    }

    /// Look up one text by identifier.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.conn
            .query_row(
                "SELECT document_id, name, is_code FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| Ok(Document { id: row.get(0)?, name: row.get(1)?, is_code: row.get(2)? }),
            )
            .optional()
            .with_context(|| format!("failed to load document {document_id}"))
    }

    /// Versions of a text ordered by start date; placeholders come first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or hold malformed dates.
    pub fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT start_date, end_date FROM snapshots
             WHERE document_id = ?1
             ORDER BY start_date ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![document_id])?;

        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            let start: Option<String> = row.get(0)?;
            let end = parse_optional_date(row.get::<_, Option<String>>(1)?.as_deref())?;
            let snapshot = match start {
                Some(raw) => Snapshot::new(document_id, parse_date(&raw)?, end),
                None => Snapshot::placeholder(document_id, end),
            };
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Section versions of a text in store order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or hold malformed identifiers or dates.
    pub fn list_sections(&self, document_id: &str) -> Result<Vec<SectionVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT section_version_id, parent_id, numero, name, start_date, end_date
             FROM section_versions
             WHERE document_id = ?1
             ORDER BY rowid ASC",
        )?;
        let mut rows = stmt.query(params![document_id])?;

        let mut sections = Vec::new();
        while let Some(row) = rows.next()? {
            let id = parse_section_version_id(&row.get::<_, String>(0)?)?;
            let parent = row
                .get::<_, Option<String>>(1)?
                .map(|raw| parse_section_version_id(&raw))
                .transpose()?;
            sections.push(SectionVersion {
                id,
                document_id: document_id.to_string(),
                parent,
                numero: row.get(2)?,
                name: row.get(3)?,
                validity: validity_from_row(row, 4)?,
            });
        }
        Ok(sections)
    }

    /// Articles of a text in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or hold malformed identifiers or dates.
    pub fn list_articles(&self, document_id: &str) -> Result<Vec<Article>> {
        let mut stmt = self.conn.prepare(
            "SELECT article_id, section_version_id, number, start_date, end_date
             FROM articles
             WHERE document_id = ?1
             ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query(params![document_id])?;

        let mut articles = Vec::new();
        while let Some(row) = rows.next()? {
            articles.push(Article {
                id: row.get(0)?,
                document_id: document_id.to_string(),
                section: parse_section_version_id(&row.get::<_, String>(1)?)?,
                number: row.get(2)?,
                validity: validity_from_row(row, 3)?,
            });
        }
        Ok(articles)
    }

    /// Write an online `SQLite` backup of this database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the parent directory or the backup cannot be created.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn exists(tx: &Transaction<'_>, sql: &str, values: impl Params) -> Result<bool> {
    let found = tx
        .query_row(sql, values, |row| row.get::<_, i64>(0))
        .with_context(|| format!("failed to run existence probe: {sql}"))?;
    Ok(found == 1)
}

fn validity_from_row(row: &Row<'_>, first_column: usize) -> Result<Interval> {
    let start = parse_date(&row.get::<_, String>(first_column)?)?;
    let end = parse_optional_date(row.get::<_, Option<String>>(first_column + 1)?.as_deref())?;
    Ok(Interval::new(start, end))
}

fn parse_date(raw: &str) -> Result<time::Date> {
    parse_iso_date(raw).with_context(|| format!("invalid stored date: {raw}"))
}

fn parse_optional_date(raw: Option<&str>) -> Result<Option<time::Date>> {
    raw.map(parse_date).transpose()
}

fn parse_section_version_id(raw: &str) -> Result<SectionVersionId> {
    let parsed = Ulid::from_str(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(SectionVersionId(parsed))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

#[cfg(test)]
impl SqliteStore {
    fn raw_connection(&self) -> &Connection {
        &self.conn
    }
}
