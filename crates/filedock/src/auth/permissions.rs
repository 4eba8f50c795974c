//! File-backed set of permitted path prefixes.
//!
//! The backing file is plain UTF-8, one prefix per line. Blank lines and
//! lines starting with `#` are skipped on load and never written back.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};

use super::write_atomic;

/// File name of the permission table inside the auth data directory.
pub const PERMISSIONS_FILE_NAME: &str = ".permissions";

/// Thread-safe store of permitted path prefixes.
///
/// Entries are kept verbatim; uniqueness is by exact string equality.
pub struct PermissionStore {
    /// Path to the `.permissions` file.
    path: PathBuf,
    /// Permitted prefixes.
    entries: RwLock<HashSet<String>>,
}

impl PermissionStore {
    /// Creates an empty store that persists to `path`.
    ///
    /// This does not read the file; call `load()` for that.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(HashSet::new()),
        }
    }

    /// Creates a store backed by `.permissions` inside `data_dir`.
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join(PERMISSIONS_FILE_NAME))
    }

    /// Returns the path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads entries from the backing file, replacing the in-memory set.
    ///
    /// A missing file is not an error and leaves the store empty.
    pub fn load(&self) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on permission store"))?;

        if !self.path.exists() {
            tracing::debug!(
                "Permission file not found at {:?}, starting empty",
                self.path
            );
            entries.clear();
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read permission file: {}", self.path.display()))?;

        entries.clear();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            entries.insert(line.to_string());
        }

        tracing::info!(
            "Loaded {} permissions from {:?}",
            entries.len(),
            self.path
        );
        Ok(())
    }

    /// Adds a prefix and rewrites the backing file.
    ///
    /// Only entries that `load()` reads back unchanged are accepted: a single
    /// line, non-blank, no surrounding whitespace and no leading `#`.
    ///
    /// If the write fails the entry stays in memory; retrying is safe since
    /// every save writes the full set.
    pub fn add(&self, path: &str) -> Result<()> {
        validate_entry(path)?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on permission store"))?;

        if entries.insert(path.to_string()) {
            tracing::info!(path = %path, "Added permission");
        }
        self.persist(&entries)
    }

    /// Removes a prefix and rewrites the backing file.
    ///
    /// Removing an absent entry still rewrites the file.
    pub fn remove(&self, path: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on permission store"))?;

        if entries.remove(path) {
            tracing::info!(path = %path, "Removed permission");
        }
        self.persist(&entries)
    }

    /// Removes every entry and rewrites the backing file.
    pub fn clear_all(&self) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on permission store"))?;

        let count = entries.len();
        entries.clear();
        tracing::info!("Cleared {} permissions", count);
        self.persist(&entries)
    }

    /// Checks whether `path` is permitted.
    ///
    /// `path` is permitted if it is itself an entry, or if any contiguous run
    /// of its `/`-separated segments, joined with `/`, is an entry. For
    /// `a/b/c` the candidates are `a`, `a/b`, `a/b/c`, `b`, `b/c` and `c`.
    /// Runs that do not start at the first segment are included, so an entry
    /// `b` also permits `a/b/c`. Matching is case-sensitive with no wildcards.
    pub fn has(&self, path: &str) -> Result<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on permission store"))?;

        let matched = matching_entry(&entries, path);
        match matched {
            Some(entry) => tracing::debug!(path = %path, entry = %entry, "Permission granted"),
            None => tracing::debug!(path = %path, "No permission entry matches"),
        }
        Ok(matched.is_some())
    }

    /// Returns all entries, sorted.
    pub fn list(&self) -> Result<BTreeSet<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on permission store"))?;

        Ok(entries.iter().cloned().collect())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> Result<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on permission store"))?;
        Ok(entries.len())
    }

    /// Returns true if the store has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Writes the given set to disk. Called with the write lock held.
    fn persist(&self, entries: &HashSet<String>) -> Result<()> {
        let sorted: BTreeSet<&String> = entries.iter().collect();
        let mut contents = String::new();
        for entry in sorted {
            contents.push_str(entry);
            contents.push('\n');
        }

        write_atomic(&self.path, &contents, "permission file")?;

        tracing::debug!("Saved {} permissions to {:?}", entries.len(), self.path);
        Ok(())
    }
}

fn validate_entry(path: &str) -> Result<()> {
    if path.contains(['\n', '\r']) {
        anyhow::bail!("Permission entry must be a single line: {:?}", path);
    }
    if path.trim().is_empty() {
        anyhow::bail!("Permission entry must not be blank");
    }
    if path.trim() != path {
        anyhow::bail!(
            "Permission entry must not have surrounding whitespace: {:?}",
            path
        );
    }
    if path.starts_with('#') {
        anyhow::bail!("Permission entry must not start with '#': {:?}", path);
    }
    Ok(())
}

/// Returns the entry that permits `path`, if any.
///
/// Scans every segment run `segments[i..j]` for `0 <= i < j <= len`, which
/// is quadratic in path depth.
fn matching_entry<'a>(entries: &'a HashSet<String>, path: &str) -> Option<&'a String> {
    if let Some(entry) = entries.get(path) {
        return Some(entry);
    }

    let segments: Vec<&str> = path.split('/').collect();
    for i in 0..segments.len() {
        for j in (i + 1)..=segments.len() {
            let candidate = segments[i..j].join("/");
            if let Some(entry) = entries.get(&candidate) {
                return Some(entry);
            }
        }
    }
    None
}

/// Returns the default permissions path inside `data_dir`.
pub fn default_permissions_path<P: AsRef<Path>>(data_dir: P) -> PathBuf {
    data_dir.as_ref().join(PERMISSIONS_FILE_NAME)
}
