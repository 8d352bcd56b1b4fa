//! Git-backed record storage.
//!
//! [`CommitStore`] wraps one local git working directory and exposes the
//! handful of operations the recorders need: write-and-stage, commit with
//! an explicit author date, push, glob lookup, history listing, and blob
//! reads at arbitrary commits. Commit hashes are treated as opaque record
//! ids everywhere above this module.
//!
//! A store is not safe for concurrent mutation: the git index and working
//! tree form a single critical section. Callers serialize access (the
//! recorder holds each store behind a mutex).

use chrono::{DateTime, TimeZone, Utc};
use git2::{ObjectType, Repository, Signature, Sort, Time, TreeWalkMode, TreeWalkResult};
use globset::{Glob, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};

/// Errors raised by the commit store and the recorders above it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying git operation failed.
    #[error("git operation failed on {path}: {source}")]
    Git {
        path: String,
        #[source]
        source: git2::Error,
    },

    /// A file system operation failed.
    #[error("file operation failed on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A lookup pattern matched more than one tracked file.
    #[error("pattern '{pattern}' matches {} tracked files: {}", matches.len(), matches.join(", "))]
    AmbiguousPath { pattern: String, matches: Vec<String> },

    /// A commit expected to hold exactly one record touched zero or many
    /// files.
    #[error("commit {id} changed {count} files, expected exactly one")]
    MalformedRecord { id: String, count: usize },

    /// A lookup pattern did not compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A record id is not a commit hash known to the repository.
    #[error("unknown record id {id}: {reason}")]
    UnknownRecord { id: String, reason: String },
}

/// One commit, summarized for lookups and listings.
#[derive(Debug, Clone)]
pub struct CommitSummary {
    /// Full hex hash.
    pub hash: String,
    /// Commit time (equals the record's document date).
    pub date: DateTime<Utc>,
    /// Full commit message.
    pub message: String,
    /// Paths touched by the commit, relative to the repository root.
    pub files: Vec<String>,
}

/// A local git working directory holding one record archive.
pub struct CommitStore {
    repo: Repository,
    workdir: PathBuf,
    author_name: String,
    author_email: String,
}

impl CommitStore {
    /// Opens the repository at `workdir`, initializing it (and the
    /// directory) if absent.
    pub fn init_or_open(
        workdir: &Path,
        author_name: &str,
        author_email: &str,
    ) -> Result<Self, StorageError> {
        let repo = if workdir.join(".git").exists() {
            Repository::open(workdir).map_err(|e| git_error(workdir, e))?
        } else {
            fs::create_dir_all(workdir).map_err(|e| io_error(workdir, e))?;
            Repository::init(workdir).map_err(|e| git_error(workdir, e))?
        };

        Ok(Self {
            repo,
            workdir: workdir.to_path_buf(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        })
    }

    /// The working directory this store writes into.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Writes `content` to `rel_path` (creating parent directories) and
    /// stages it.
    pub fn write_and_stage(&self, rel_path: &str, content: &[u8]) -> Result<(), StorageError> {
        let absolute = self.workdir.join(rel_path);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::write(&absolute, content).map_err(|e| io_error(&absolute, e))?;

        let mut index = self.repo.index().map_err(|e| self.git_err(e))?;
        index
            .add_path(Path::new(rel_path))
            .map_err(|e| self.git_err(e))?;
        index.write().map_err(|e| self.git_err(e))?;

        Ok(())
    }

    /// Commits the staged tree with author and committer dates both set
    /// to `author_date`, so history orders by document date rather than
    /// by when the tracker happened to run.
    ///
    /// Returns `None` when the staged tree is identical to HEAD's tree,
    /// i.e. nothing actually changed.
    pub fn commit(
        &self,
        message: &str,
        author_date: DateTime<Utc>,
    ) -> Result<Option<String>, StorageError> {
        let mut index = self.repo.index().map_err(|e| self.git_err(e))?;
        let tree_id = index.write_tree().map_err(|e| self.git_err(e))?;

        let head = self.repo.head().ok();
        if let Some(head_ref) = &head {
            if let Ok(head_tree) = head_ref.peel_to_tree() {
                if head_tree.id() == tree_id {
                    return Ok(None);
                }
            }
        }

        let tree = self.repo.find_tree(tree_id).map_err(|e| self.git_err(e))?;
        let signature = Signature::new(
            &self.author_name,
            &self.author_email,
            &Time::new(author_date.timestamp(), 0),
        )
        .map_err(|e| self.git_err(e))?;

        let parent = head.and_then(|h| h.peel_to_commit().ok());
        let oid = match parent {
            Some(parent) => self
                .repo
                .commit(
                    Some("HEAD"),
                    &signature,
                    &signature,
                    message,
                    &tree,
                    &[&parent],
                )
                .map_err(|e| self.git_err(e))?,
            None => self
                .repo
                .commit(Some("HEAD"), &signature, &signature, message, &tree, &[])
                .map_err(|e| self.git_err(e))?,
        };

        Ok(Some(oid.to_string()))
    }

    /// Pushes the current branch to the `origin` remote.
    ///
    /// A repository with no remote or an unborn branch is a no-op; an
    /// already-synced branch pushes cleanly.
    pub fn push(&self) -> Result<(), StorageError> {
        let mut remote = match self.repo.find_remote("origin") {
            Ok(remote) => remote,
            Err(_) => {
                tracing::debug!(
                    "No origin remote configured for {}, skipping push",
                    self.workdir.display()
                );
                return Ok(());
            }
        };

        let head = match self.repo.head() {
            Ok(head) => head,
            Err(_) => return Ok(()),
        };
        let refname = match head.name() {
            Some(name) => name.to_string(),
            None => return Ok(()),
        };

        let refspec = format!("{refname}:{refname}");
        remote
            .push(&[refspec.as_str()], None)
            .map_err(|e| self.git_err(e))?;

        tracing::info!("Pushed {} to origin", self.workdir.display());
        Ok(())
    }

    /// Whether any tracked file at HEAD matches `pattern`.
    pub fn is_tracked(&self, pattern: &str) -> Result<bool, StorageError> {
        Ok(!self.head_matches(pattern)?.is_empty())
    }

    /// Resolves a pattern that must match at most one tracked file.
    ///
    /// Returns the latest commit touching the file and the resolved
    /// relative path, or `None` when nothing matches.
    pub fn find_unique(
        &self,
        pattern: &str,
    ) -> Result<Option<(CommitSummary, String)>, StorageError> {
        let mut matches = self.head_matches(pattern)?;
        match matches.len() {
            0 => Ok(None),
            1 => {
                let rel_path = matches.remove(0);
                let commit = self.latest_commit_touching(&rel_path)?;
                Ok(commit.map(|c| (c, rel_path)))
            }
            _ => Err(StorageError::AmbiguousPath {
                pattern: pattern.to_string(),
                matches,
            }),
        }
    }

    /// Lists commits newest first, optionally restricted to those
    /// touching a file matching `pattern`.
    pub fn log(&self, pattern: Option<&str>) -> Result<Vec<CommitSummary>, StorageError> {
        let matcher = pattern.map(compile_pattern).transpose()?;

        let mut revwalk = match self.repo.revwalk() {
            Ok(walk) => walk,
            Err(_) => return Ok(Vec::new()),
        };
        if revwalk.push_head().is_err() {
            // Unborn branch: no commits yet.
            return Ok(Vec::new());
        }
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(|e| self.git_err(e))?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid.map_err(|e| self.git_err(e))?;
            let commit = self.repo.find_commit(oid).map_err(|e| self.git_err(e))?;
            let files = self.files_changed_by(&commit)?;

            if let Some(matcher) = &matcher {
                if !files.iter().any(|f| matcher.is_match(f)) {
                    continue;
                }
            }

            commits.push(CommitSummary {
                hash: oid.to_string(),
                date: Utc
                    .timestamp_opt(commit.time().seconds(), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                message: commit.message().unwrap_or("").to_string(),
                files,
            });
        }

        Ok(commits)
    }

    /// The files touched by commit `hash`.
    pub fn changed_files(&self, hash: &str) -> Result<Vec<String>, StorageError> {
        let commit = self.find_commit(hash)?;
        self.files_changed_by(&commit)
    }

    /// Reads a file's bytes as of commit `hash`, straight from the object
    /// database. Does not touch the working tree.
    pub fn read_file_at(&self, hash: &str, rel_path: &str) -> Result<Vec<u8>, StorageError> {
        let commit = self.find_commit(hash)?;
        let tree = commit.tree().map_err(|e| self.git_err(e))?;
        let entry = tree
            .get_path(Path::new(rel_path))
            .map_err(|e| self.git_err(e))?;
        let object = entry.to_object(&self.repo).map_err(|e| self.git_err(e))?;
        let blob = object
            .peel_to_blob()
            .map_err(|e| self.git_err(e))?;
        Ok(blob.content().to_vec())
    }

    /// Reads a file's bytes as of HEAD.
    pub fn read_file_at_head(&self, rel_path: &str) -> Result<Vec<u8>, StorageError> {
        let head = self.repo.head().map_err(|e| self.git_err(e))?;
        let commit = head.peel_to_commit().map_err(|e| self.git_err(e))?;
        self.read_file_at(&commit.id().to_string(), rel_path)
    }

    /// The commit a record id refers to, with summary metadata.
    pub fn summarize(&self, hash: &str) -> Result<CommitSummary, StorageError> {
        let commit = self.find_commit(hash)?;
        let files = self.files_changed_by(&commit)?;
        Ok(CommitSummary {
            hash: commit.id().to_string(),
            date: Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now),
            message: commit.message().unwrap_or("").to_string(),
            files,
        })
    }

    fn find_commit(&self, hash: &str) -> Result<git2::Commit<'_>, StorageError> {
        let oid = git2::Oid::from_str(hash).map_err(|e| StorageError::UnknownRecord {
            id: hash.to_string(),
            reason: e.to_string(),
        })?;
        self.repo
            .find_commit(oid)
            .map_err(|e| StorageError::UnknownRecord {
                id: hash.to_string(),
                reason: e.to_string(),
            })
    }

    /// Walks HEAD's tree collecting blob paths matching `pattern`.
    fn head_matches(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let matcher = compile_pattern(pattern)?;

        let head = match self.repo.head() {
            Ok(head) => head,
            Err(_) => return Ok(Vec::new()),
        };
        let tree = match head.peel_to_tree() {
            Ok(tree) => tree,
            Err(_) => return Ok(Vec::new()),
        };

        let mut matches = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                let path = format!("{root}{}", entry.name().unwrap_or_default());
                if matcher.is_match(&path) {
                    matches.push(path);
                }
            }
            TreeWalkResult::Ok
        })
        .map_err(|e| self.git_err(e))?;

        Ok(matches)
    }

    /// The most recent commit whose diff touches `rel_path`.
    fn latest_commit_touching(
        &self,
        rel_path: &str,
    ) -> Result<Option<CommitSummary>, StorageError> {
        let mut revwalk = match self.repo.revwalk() {
            Ok(walk) => walk,
            Err(_) => return Ok(None),
        };
        if revwalk.push_head().is_err() {
            return Ok(None);
        }
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(|e| self.git_err(e))?;

        for oid in revwalk {
            let oid = oid.map_err(|e| self.git_err(e))?;
            let commit = self.repo.find_commit(oid).map_err(|e| self.git_err(e))?;
            let files = self.files_changed_by(&commit)?;
            if files.iter().any(|f| f == rel_path) {
                return Ok(Some(CommitSummary {
                    hash: oid.to_string(),
                    date: Utc
                        .timestamp_opt(commit.time().seconds(), 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                    message: commit.message().unwrap_or("").to_string(),
                    files,
                }));
            }
        }

        Ok(None)
    }

    /// Diffs a commit against its first parent (or the empty tree for a
    /// root commit) and returns the touched paths.
    fn files_changed_by(&self, commit: &git2::Commit<'_>) -> Result<Vec<String>, StorageError> {
        let tree = commit.tree().map_err(|e| self.git_err(e))?;
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .map_err(|e| self.git_err(e))?;

        let mut files = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                let path = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path());
                if let Some(p) = path {
                    files.push(p.to_string_lossy().to_string());
                }
                true
            },
            None,
            None,
            None,
        )
        .map_err(|e| self.git_err(e))?;

        Ok(files)
    }

    fn git_err(&self, source: git2::Error) -> StorageError {
        git_error(&self.workdir, source)
    }
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher, StorageError> {
    Ok(Glob::new(pattern)
        .map_err(|e| StorageError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher())
}

fn git_error(path: &Path, source: git2::Error) -> StorageError {
    StorageError::Git {
        path: path.display().to_string(),
        source,
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}
