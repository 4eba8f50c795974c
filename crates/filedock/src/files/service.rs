//! Read, write, create, delete and upload against the served root.

use std::io;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;

use crate::access::{AccessController, FileOperation};
use crate::config::{FilesConfig, DEFAULT_MAX_UPLOAD_SIZE};
use crate::error::AccessError;
use crate::paths::{self, ResolvedPath};

/// Errors from file operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// Rejected by the access controller or the path checks.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// The path does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A file was expected but the path is a directory.
    #[error("path is a directory: {0}")]
    IsADirectory(String),

    /// A directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Content writes are limited to markdown files.
    #[error("only markdown files can be updated: {0}")]
    MarkdownOnly(String),

    /// The root itself cannot be deleted.
    #[error("cannot delete root directory")]
    CannotDeleteRoot,

    /// Unknown entry kind for create.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// Upload exceeds the configured limit.
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FileError {
    /// HTTP status the boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            FileError::Access(e) => e.status_code(),
            FileError::NotFound(_) => 404,
            FileError::IsADirectory(_)
            | FileError::NotADirectory(_)
            | FileError::MarkdownOnly(_)
            | FileError::CannotDeleteRoot
            | FileError::InvalidType(_)
            | FileError::FileTooLarge { .. } => 400,
            FileError::Io(_) => 500,
        }
    }
}

/// Kind of entry to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

impl FromStr for EntryKind {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dir" => Ok(EntryKind::Dir),
            "file" => Ok(EntryKind::File),
            _ => Err(FileError::InvalidType(s.to_string())),
        }
    }
}

/// A file read through [`FileService::read_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Base name of the file.
    pub name: String,
    /// Contents, with invalid UTF-8 replaced.
    pub content: String,
}

/// File operations gated by an [`AccessController`].
pub struct FileService {
    access: Arc<AccessController>,
    markdown_only_writes: bool,
    max_upload_size: u64,
}

impl FileService {
    pub fn new(access: Arc<AccessController>) -> Self {
        Self {
            access,
            markdown_only_writes: true,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    pub fn from_config(access: Arc<AccessController>, config: &FilesConfig) -> Self {
        Self::new(access)
            .with_markdown_only_writes(config.markdown_only_writes)
            .with_max_upload_size(config.max_upload_size)
    }

    pub fn with_markdown_only_writes(mut self, enabled: bool) -> Self {
        self.markdown_only_writes = enabled;
        self
    }

    pub fn with_max_upload_size(mut self, limit: u64) -> Self {
        self.max_upload_size = limit;
        self
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    /// Returns the existing path a directory tree should be built from.
    pub async fn tree_root(
        &self,
        token: Option<&str>,
        rel_path: &str,
    ) -> Result<ResolvedPath, FileError> {
        let resolved = self.authorize(token, rel_path, FileOperation::List)?;
        self.metadata(&resolved).await?;
        Ok(resolved)
    }

    /// Reads a file's contents.
    pub async fn read_file(
        &self,
        token: Option<&str>,
        rel_path: &str,
    ) -> Result<FileContent, FileError> {
        let resolved = self.authorize(token, rel_path, FileOperation::Read)?;
        let metadata = self.metadata(&resolved).await?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(resolved.relative().to_string()));
        }

        let data = fs::read(resolved.as_path()).await?;
        Ok(FileContent {
            name: base_name(&resolved),
            content: String::from_utf8_lossy(&data).into_owned(),
        })
    }

    /// Returns the path of an existing regular file for raw serving.
    pub async fn raw_path(
        &self,
        token: Option<&str>,
        rel_path: &str,
    ) -> Result<ResolvedPath, FileError> {
        let resolved = self.authorize(token, rel_path, FileOperation::Read)?;
        let metadata = self.metadata(&resolved).await?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(resolved.relative().to_string()));
        }
        Ok(resolved)
    }

    /// Replaces a file's contents, creating the file if needed.
    pub async fn write_file(
        &self,
        token: Option<&str>,
        rel_path: &str,
        body: &[u8],
    ) -> Result<(), FileError> {
        let resolved = self.authorize(token, rel_path, FileOperation::Write)?;
        if self.markdown_only_writes && !resolved.relative().to_lowercase().ends_with(".md") {
            return Err(FileError::MarkdownOnly(resolved.relative().to_string()));
        }
        if fs::metadata(resolved.as_path())
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(FileError::IsADirectory(resolved.relative().to_string()));
        }

        fs::write(resolved.as_path(), body)
            .await
            .map_err(|e| not_found_or_io(e, &resolved))?;

        tracing::info!(path = %resolved.relative(), bytes = body.len(), "Wrote file");
        Ok(())
    }

    /// Deletes a file, or a directory with everything under it.
    ///
    /// Deleting a path that does not exist succeeds.
    pub async fn delete(&self, token: Option<&str>, rel_path: &str) -> Result<(), FileError> {
        let resolved = self.authorize(token, rel_path, FileOperation::Delete)?;
        if resolved.is_root() {
            return Err(FileError::CannotDeleteRoot);
        }

        match fs::symlink_metadata(resolved.as_path()).await {
            Ok(m) if m.is_dir() => fs::remove_dir_all(resolved.as_path()).await?,
            Ok(_) => fs::remove_file(resolved.as_path()).await?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(path = %resolved.relative(), "Deleted");
        Ok(())
    }

    /// Creates a directory or file named `name` inside `parent_rel`.
    ///
    /// Returns the relative path of the new entry. Directories are created
    /// with any missing ancestors; an existing file is overwritten.
    pub async fn create(
        &self,
        token: Option<&str>,
        parent_rel: &str,
        name: &str,
        kind: EntryKind,
        content: &str,
    ) -> Result<String, FileError> {
        let name = paths::validate_entry_name(name)?;
        let parent = self.authorize(token, parent_rel, FileOperation::Create)?;
        self.require_dir(&parent).await?;

        let target = self.child_of(&parent, &name)?;
        match kind {
            EntryKind::Dir => fs::create_dir_all(target.as_path()).await?,
            EntryKind::File => fs::write(target.as_path(), content).await?,
        }

        tracing::info!(path = %target.relative(), kind = ?kind, "Created");
        Ok(target.relative().to_string())
    }

    /// Stores uploaded bytes as `filename` inside `dir_rel`.
    ///
    /// Only the last segment of `filename` is used. Returns the relative
    /// path of the stored file.
    pub async fn upload(
        &self,
        token: Option<&str>,
        dir_rel: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, FileError> {
        let dir = self.authorize(token, dir_rel, FileOperation::Upload)?;
        self.require_dir(&dir).await?;

        let size = bytes.len() as u64;
        if size > self.max_upload_size {
            return Err(FileError::FileTooLarge {
                size,
                limit: self.max_upload_size,
            });
        }

        let filename = paths::sanitize_upload_filename(filename)?;
        let target = self.child_of(&dir, &filename)?;
        fs::write(target.as_path(), bytes).await?;

        tracing::info!(path = %target.relative(), bytes = size, "Uploaded file");
        Ok(target.relative().to_string())
    }

    fn authorize(
        &self,
        token: Option<&str>,
        rel_path: &str,
        op: FileOperation,
    ) -> Result<ResolvedPath, FileError> {
        let resolved = self.access.authorize(token, rel_path, op)?;
        paths::verify_physical(self.access.root(), &resolved)?;
        Ok(resolved)
    }

    /// Contains `parent/name` and checks it physically.
    fn child_of(&self, parent: &ResolvedPath, name: &str) -> Result<ResolvedPath, FileError> {
        let rel = if parent.is_root() {
            name.to_string()
        } else {
            format!("{}/{}", parent.relative(), name)
        };
        let target = paths::safe_join(self.access.root(), &rel)?;
        paths::verify_physical(self.access.root(), &target)?;
        Ok(target)
    }

    async fn metadata(&self, resolved: &ResolvedPath) -> Result<std::fs::Metadata, FileError> {
        fs::metadata(resolved.as_path())
            .await
            .map_err(|e| not_found_or_io(e, resolved))
    }

    async fn require_dir(&self, resolved: &ResolvedPath) -> Result<(), FileError> {
        match fs::metadata(resolved.as_path()).await {
            Ok(m) if m.is_dir() => Ok(()),
            _ => Err(FileError::NotADirectory(resolved.relative().to_string())),
        }
    }
}

fn not_found_or_io(e: io::Error, resolved: &ResolvedPath) -> FileError {
    if e.kind() == io::ErrorKind::NotFound {
        FileError::NotFound(resolved.relative().to_string())
    } else {
        FileError::Io(e)
    }
}

fn base_name(resolved: &ResolvedPath) -> String {
    resolved
        .as_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
