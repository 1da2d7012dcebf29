use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Identity recorded as both author and committer of every version commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self { name: "Législateur".to_string(), email: String::new() }
    }
}

impl Display for CommitAuthor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Append-only versioned store receiving one commit per text version.
pub trait VersionedSink {
    /// Initialize `repository` if needed. Returns `true` when it was created.
    ///
    /// # Errors
    /// Returns an error when the repository cannot be inspected or initialized.
    fn ensure_repository(&mut self, repository: &Path) -> Result<bool>;

    /// Discard uncommitted changes under `subtree` (relative to `repository`).
    ///
    /// # Errors
    /// Returns an error when the working tree cannot be restored.
    fn reset_subtree(&mut self, repository: &Path, subtree: &Path) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    /// # Errors
    /// Returns an error when the file cannot be written.
    fn write_file(&mut self, path: &Path, content: &str) -> Result<()>;

    /// Record `files` (relative to `repository`) in a new commit and return its id.
    ///
    /// # Errors
    /// Returns an error when staging or committing fails.
    fn commit(
        &mut self,
        repository: &Path,
        files: &[PathBuf],
        author: &CommitAuthor,
        timestamp: OffsetDateTime,
        message: &str,
    ) -> Result<String>;
}

/// Sink backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitSink {
    program: PathBuf,
}

impl Default for GitSink {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitSink {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn run_command(
        &self,
        repository: &Path,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .envs(envs.iter().copied())
            .current_dir(repository)
            .output()
            .with_context(|| {
                format!("failed to run {} {}", self.program.display(), args.join(" "))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(anyhow!(
                "git {} failed in {} ({}): {}",
                args.join(" "),
                repository.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    fn has_commits(&self, repository: &Path) -> bool {
        self.run_command(repository, &["rev-parse", "--verify", "--quiet", "HEAD"], &[]).is_ok()
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

impl VersionedSink for GitSink {
    fn ensure_repository(&mut self, repository: &Path) -> Result<bool> {
        fs::create_dir_all(repository)
            .with_context(|| format!("failed to create directory {}", repository.display()))?;
        if repository.join(".git").exists() {
            return Ok(false);
        }
        self.run_command(repository, &["init", "--quiet"], &[])?;
        Ok(true)
    }

    fn reset_subtree(&mut self, repository: &Path, subtree: &Path) -> Result<()> {
        // An empty repository has nothing to restore.
        if !self.has_commits(repository) {
            return Ok(());
        }
        self.run_command(repository, &["checkout", "--", path_arg(subtree)?], &[])?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_file(&mut self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    fn commit(
        &mut self,
        repository: &Path,
        files: &[PathBuf],
        author: &CommitAuthor,
        timestamp: OffsetDateTime,
        message: &str,
    ) -> Result<String> {
        let mut add_args = vec!["add", "--"];
        for file in files {
            add_args.push(path_arg(file)?);
        }
        self.run_command(repository, &add_args, &[])?;

        let date = timestamp.format(&Rfc3339).context("failed to format commit timestamp")?;
        let envs = [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_AUTHOR_DATE", date.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_DATE", date.as_str()),
        ];
        // Consecutive versions may render identically; each still gets its commit.
        self.run_command(
            repository,
            &[
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "--no-verify",
                "--allow-empty",
                "-m",
                message,
            ],
            &envs,
        )?;
        self.run_command(repository, &["rev-parse", "HEAD"], &[])
    }
}

/// A commit captured by [`MemorySink`], with the committed file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub id: String,
    pub repository: PathBuf,
    pub files: Vec<(PathBuf, String)>,
    pub author: CommitAuthor,
    pub timestamp: OffsetDateTime,
    pub message: String,
}

/// Sink that keeps files and commits in memory. Used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sees_disk: bool,
    repositories: BTreeSet<PathBuf>,
    working: BTreeMap<PathBuf, String>,
    committed: BTreeMap<PathBuf, String>,
    commits: Vec<RecordedCommit>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose existence checks also see files already on disk, so a dry run meets
    /// the same destination precondition as a real export.
    #[must_use]
    pub fn over_disk() -> Self {
        Self { sees_disk: true, ..Self::default() }
    }

    #[must_use]
    pub fn commits(&self) -> &[RecordedCommit] {
        &self.commits
    }

    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&str> {
        self.working.get(path).map(String::as_str)
    }

    /// Place a file in the working tree as if it were already on disk.
    pub fn seed_file(&mut self, path: impl Into<PathBuf>, content: &str) {
        self.working.insert(path.into(), content.to_string());
    }
}

impl VersionedSink for MemorySink {
    fn ensure_repository(&mut self, repository: &Path) -> Result<bool> {
        Ok(self.repositories.insert(repository.to_path_buf()))
    }

    /// Restores committed files only; untracked files stay, as with `git checkout`.
    fn reset_subtree(&mut self, repository: &Path, subtree: &Path) -> Result<()> {
        let root = repository.join(subtree);
        for (path, content) in &self.committed {
            if path.starts_with(&root) {
                self.working.insert(path.clone(), content.clone());
            }
        }
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.working.contains_key(path) || (self.sees_disk && path.exists())
    }

    fn write_file(&mut self, path: &Path, content: &str) -> Result<()> {
        self.working.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn commit(
        &mut self,
        repository: &Path,
        files: &[PathBuf],
        author: &CommitAuthor,
        timestamp: OffsetDateTime,
        message: &str,
    ) -> Result<String> {
        if !self.repositories.contains(repository) {
            return Err(anyhow!("no repository at {}", repository.display()));
        }
        let mut contents = Vec::with_capacity(files.len());
        for file in files {
            let path = repository.join(file);
            let content = self
                .working
                .get(&path)
                .cloned()
                .ok_or_else(|| anyhow!("cannot commit missing file {}", path.display()))?;
            self.committed.insert(path, content.clone());
            contents.push((file.clone(), content));
        }
        let id = format!("memory-{}", self.commits.len() + 1);
        self.commits.push(RecordedCommit {
            id: id.clone(),
            repository: repository.to_path_buf(),
            files: contents,
            author: author.clone(),
            timestamp,
            message: message.to_string(),
        });
        Ok(id)
    }
}
