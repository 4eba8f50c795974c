//! Confinement of untrusted relative paths to a fixed root.
//!
//! Two entry points exist because call sites differ in how they phrase the
//! check. [`resolve`] normalises the input against a synthetic root and
//! rejects any `..` that would climb above it. [`safe_join`] rejects obvious
//! escapes up front, joins, and then re-derives the offset from the root.
//! Both are purely lexical and reach the same verdict for every input.
//!
//! Neither function touches the filesystem, so a symlink planted inside the
//! root can still point outside it. Callers about to open or mutate a path
//! use [`verify_physical`] as a second, filesystem-aware step.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::AccessError;

/// The directory that every resolved path must stay inside.
///
/// Established once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    /// Creates a root, making `path` absolute and lexically clean.
    ///
    /// Relative paths are anchored at the current working directory.
    /// Symlinks are not resolved here.
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self {
            path: normalize_lexically(&absolute),
        })
    }

    /// The absolute root path.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Returns true if `candidate` equals the root or lies strictly under it.
    ///
    /// The comparison is component-wise, so `/data2` is not under `/data`.
    pub fn contains(&self, candidate: &Path) -> bool {
        candidate == self.path || candidate.starts_with(&self.path)
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// An absolute path proven to be the root or a descendant of it.
///
/// Only [`resolve`] and [`safe_join`] construct values of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    relative: String,
}

impl ResolvedPath {
    /// The absolute, contained path.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Slash-separated offset from the root; empty for the root itself.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Returns true if this path is the root.
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Consumes the value, returning the absolute path.
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolves `rel_path` against `root` by lexical normalisation.
///
/// The input is treated as if it were prefixed with a separator, so leading
/// slashes, empty segments and `.` segments are harmless. A `..` segment
/// pops the previous segment; one that would climb above the synthetic root
/// is rejected with [`AccessError::InvalidPath`].
pub fn resolve(root: &Root, rel_path: &str) -> Result<ResolvedPath, AccessError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in rel_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AccessError::InvalidPath(rel_path.to_string()));
                }
            }
            other => segments.push(other),
        }
    }

    let mut target = root.as_path().to_path_buf();
    for segment in &segments {
        target.push(segment);
    }
    let target = normalize_lexically(&target);

    if !root.contains(&target) {
        return Err(AccessError::InvalidPath(rel_path.to_string()));
    }

    Ok(ResolvedPath {
        relative: to_relative(root, &target),
        path: target,
    })
}

/// Joins `rel_path` onto `root`, rejecting explicit escapes before and after.
///
/// Leading separators are stripped first (request paths are root-relative).
/// The remainder must not be absolute and must not begin with `..`. After
/// joining, the offset from the root is recomputed and must not begin with
/// `..` either, which catches escapes hidden deeper in the input.
pub fn safe_join(root: &Root, rel_path: &str) -> Result<ResolvedPath, AccessError> {
    let trimmed = rel_path.trim_start_matches('/');
    let candidate = Path::new(trimmed);

    if candidate.is_absolute() || candidate.has_root() {
        return Err(AccessError::InvalidPath(rel_path.to_string()));
    }
    let first = candidate
        .components()
        .find(|c| !matches!(c, Component::CurDir));
    if matches!(first, Some(Component::ParentDir)) {
        return Err(AccessError::InvalidPath(rel_path.to_string()));
    }

    let joined = normalize_lexically(&root.as_path().join(candidate));
    let offset = relative_offset(root.as_path(), &joined);
    if matches!(offset.components().next(), Some(Component::ParentDir)) {
        return Err(AccessError::InvalidPath(rel_path.to_string()));
    }
    if !root.contains(&joined) {
        return Err(AccessError::InvalidPath(rel_path.to_string()));
    }

    Ok(ResolvedPath {
        relative: to_relative(root, &joined),
        path: joined,
    })
}

/// Slash-separated form of `path` relative to `root`.
///
/// Returns an empty string for the root itself and for paths outside it.
pub fn to_relative(root: &Root, path: &Path) -> String {
    match path.strip_prefix(root.as_path()) {
        Ok(rel) => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => String::new(),
    }
}

/// Confirms that the physical location of `resolved` is still inside `root`.
///
/// Canonicalises the root and the deepest existing ancestor of `resolved`
/// (the path itself may not exist yet, e.g. before a create). Catches
/// symlinks inside the root that point elsewhere. This narrows but does not
/// close the window between check and use.
pub fn verify_physical(root: &Root, resolved: &ResolvedPath) -> Result<(), AccessError> {
    let canonical_root = fs::canonicalize(root.as_path())?;

    let mut ancestor = resolved.as_path();
    let canonical = loop {
        match fs::canonicalize(ancestor) {
            Ok(p) => break p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink would be followed by a later create.
                if fs::symlink_metadata(ancestor).is_ok_and(|m| m.file_type().is_symlink()) {
                    return Err(AccessError::InvalidPath(resolved.relative().to_string()));
                }
                match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => return Err(AccessError::Io(e.to_string())),
                }
            }
            // A regular file used as a directory.
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(AccessError::InvalidPath(resolved.relative().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    };

    if canonical == canonical_root || canonical.starts_with(&canonical_root) {
        Ok(())
    } else {
        tracing::warn!(
            path = %resolved.as_path().display(),
            target = %canonical.display(),
            "Symlink resolves outside root"
        );
        Err(AccessError::InvalidPath(resolved.relative().to_string()))
    }
}

/// Checks a name for a new directory entry.
///
/// The trimmed name must be non-empty, contain no separator and not be `.`
/// or `..`. Returns the trimmed name.
pub fn validate_entry_name(name: &str) -> Result<String, AccessError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccessError::InvalidPath("name is required".to_string()));
    }
    if name.chars().any(std::path::is_separator) || name == "." || name == ".." {
        return Err(AccessError::InvalidPath(format!("invalid name: {}", name)));
    }
    Ok(name.to_string())
}

/// Reduces a client-supplied upload file name to its last segment.
///
/// Trailing separators are ignored. Rejects names that reduce to nothing,
/// to `.` or to `..`.
pub fn sanitize_upload_filename(name: &str) -> Result<String, AccessError> {
    let trimmed = name.trim_end_matches(std::path::is_separator);
    let base = trimmed
        .rsplit(std::path::is_separator)
        .next()
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        return Err(AccessError::InvalidPath(format!(
            "invalid filename: {}",
            name
        )));
    }
    Ok(base.to_string())
}

/// Collapses `.` and `..` components without consulting the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lexical equivalent of "relative path from `base` to `target`".
fn relative_offset(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_root() -> Root {
        Root::new("/srv/filedock/data").unwrap()
    }

    const HOSTILE: &[&str] = &[
        "..",
        "../",
        "../../etc/passwd",
        "/../../etc/passwd",
        "a/../../b",
        "a/b/../../../c",
        "./../x",
        ".././..",
        "//..//..//etc",
        "a/./b/.././../../..",
    ];

    const BENIGN: &[&str] = &[
        "",
        "/",
        ".",
        "./",
        "docs",
        "/docs/readme.md",
        "docs//notes///today.md",
        "a/../b",
        "a/b/..",
        "a/./b/./c",
        "...",
        "..hidden",
        "dir../file",
    ];

    #[test]
    fn test_root_is_absolute_and_clean() {
        let root = Root::new("/srv/./filedock/../filedock/data").unwrap();
        assert_eq!(root.as_path(), Path::new("/srv/filedock/data"));

        let relative = Root::new("data").unwrap();
        assert!(relative.as_path().is_absolute());
        assert!(relative.as_path().ends_with("data"));
    }

    #[test]
    fn test_root_contains_is_component_wise() {
        let root = test_root();
        assert!(root.contains(Path::new("/srv/filedock/data")));
        assert!(root.contains(Path::new("/srv/filedock/data/a")));
        assert!(!root.contains(Path::new("/srv/filedock/data2")));
        assert!(!root.contains(Path::new("/srv/filedock")));
    }

    #[test]
    fn test_resolve_parent_traversal_rejected() {
        let root = test_root();
        let result = resolve(&root, "../../etc/passwd");
        assert!(matches!(result, Err(AccessError::InvalidPath(_))));
    }

    #[test]
    fn test_resolve_collapses_inner_parent() {
        let root = test_root();
        let resolved = resolve(&root, "a/../b").unwrap();
        assert_eq!(resolved.as_path(), Path::new("/srv/filedock/data/b"));
        assert_eq!(resolved.relative(), "b");
    }

    #[test]
    fn test_resolve_empty_is_root() {
        let root = test_root();
        let resolved = resolve(&root, "").unwrap();
        assert_eq!(resolved.as_path(), root.as_path());
        assert!(resolved.is_root());
        assert_eq!(resolved.relative(), "");
    }

    #[test]
    fn test_resolve_leading_slash_and_empty_segments() {
        let root = test_root();
        let resolved = resolve(&root, "//docs///notes//a.md").unwrap();
        assert_eq!(
            resolved.as_path(),
            Path::new("/srv/filedock/data/docs/notes/a.md")
        );
        assert_eq!(resolved.relative(), "docs/notes/a.md");
    }

    #[test]
    fn test_resolve_dot_names_are_plain_segments() {
        let root = test_root();
        assert_eq!(resolve(&root, "...").unwrap().relative(), "...");
        assert_eq!(resolve(&root, "..hidden").unwrap().relative(), "..hidden");
    }

    #[test]
    fn test_hostile_inputs_rejected_by_both_variants() {
        let root = test_root();
        for input in HOSTILE {
            assert!(
                resolve(&root, input).is_err(),
                "resolve accepted {:?}",
                input
            );
            assert!(
                safe_join(&root, input).is_err(),
                "safe_join accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_benign_inputs_agree_across_variants() {
        let root = test_root();
        for input in BENIGN {
            let a = resolve(&root, input).unwrap();
            let b = safe_join(&root, input).unwrap();
            assert_eq!(a, b, "variants disagree on {:?}", input);
            assert!(root.contains(a.as_path()));
        }
    }

    #[test]
    fn test_generated_inputs_never_escape() {
        let root = test_root();
        let pieces = ["..", ".", "", "a", "b", "..."];
        // Every sequence of up to four pieces, with and without a leading slash.
        let mut inputs = vec![String::new()];
        for _ in 0..4 {
            let mut next = Vec::new();
            for prefix in &inputs {
                for piece in &pieces {
                    next.push(format!("{}/{}", prefix, piece));
                }
            }
            inputs.extend(next);
        }

        for input in &inputs {
            for candidate in [input.as_str(), input.trim_start_matches('/')] {
                let a = resolve(&root, candidate);
                let b = safe_join(&root, candidate);
                assert_eq!(a.is_ok(), b.is_ok(), "verdicts differ on {:?}", candidate);
                if let Ok(resolved) = a {
                    assert!(
                        root.contains(resolved.as_path()),
                        "{:?} escaped to {:?}",
                        candidate,
                        resolved.as_path()
                    );
                }
            }
        }
    }

    #[test]
    fn test_to_relative() {
        let root = test_root();
        assert_eq!(to_relative(&root, root.as_path()), "");
        assert_eq!(
            to_relative(&root, Path::new("/srv/filedock/data/a/b.md")),
            "a/b.md"
        );
        assert_eq!(to_relative(&root, Path::new("/etc/passwd")), "");
    }

    #[test]
    fn test_validate_entry_name() {
        assert_eq!(validate_entry_name("  notes.md ").unwrap(), "notes.md");
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("   ").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("dir/").is_err());
        assert!(validate_entry_name(".").is_err());
        assert!(validate_entry_name("..").is_err());
    }

    #[test]
    fn test_sanitize_upload_filename() {
        assert_eq!(sanitize_upload_filename("photo.png").unwrap(), "photo.png");
        assert_eq!(
            sanitize_upload_filename("../../etc/passwd").unwrap(),
            "passwd"
        );
        assert_eq!(sanitize_upload_filename("dir/file.txt/").unwrap(), "file.txt");
        assert!(sanitize_upload_filename("").is_err());
        assert!(sanitize_upload_filename("/").is_err());
        assert!(sanitize_upload_filename("///").is_err());
        assert!(sanitize_upload_filename(".").is_err());
        assert!(sanitize_upload_filename("a/..").is_err());
    }

    #[test]
    fn test_verify_physical_accepts_missing_leaf() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("docs")).unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        let resolved = resolve(&root, "docs/not-yet-created.md").unwrap();
        assert!(verify_physical(&root, &resolved).is_ok());
    }

    #[test]
    fn test_verify_physical_rejects_path_through_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.md"), "# Notes").unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        for rel in ["notes.md/x", "notes.md/x/y.md"] {
            let resolved = resolve(&root, rel).unwrap();
            let err = verify_physical(&root, &resolved).unwrap_err();
            assert!(matches!(err, AccessError::InvalidPath(_)), "{}: {:?}", rel, err);
            assert_eq!(err.status_code(), 400);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_physical_rejects_symlink_escape() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("sneaky")).unwrap();

        let root = Root::new(temp_dir.path()).unwrap();
        // Lexically fine, physically outside.
        let resolved = resolve(&root, "sneaky/secret.txt").unwrap();
        let result = verify_physical(&root, &resolved);
        assert!(matches!(result, Err(AccessError::InvalidPath(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_physical_rejects_dangling_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("does-not-exist.md"),
            temp_dir.path().join("dangling.md"),
        )
        .unwrap();

        let root = Root::new(temp_dir.path()).unwrap();
        let resolved = resolve(&root, "dangling.md").unwrap();
        assert!(matches!(
            verify_physical(&root, &resolved),
            Err(AccessError::InvalidPath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_physical_allows_internal_symlink() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("real"),
            temp_dir.path().join("alias"),
        )
        .unwrap();

        let root = Root::new(temp_dir.path()).unwrap();
        let resolved = resolve(&root, "alias/file.md").unwrap();
        assert!(verify_physical(&root, &resolved).is_ok());
    }

    #[test]
    fn test_relative_offset() {
        assert_eq!(
            relative_offset(Path::new("/a/b"), Path::new("/a/b/c/d")),
            PathBuf::from("c/d")
        );
        assert_eq!(
            relative_offset(Path::new("/a/b"), Path::new("/a/x")),
            PathBuf::from("../x")
        );
        assert_eq!(relative_offset(Path::new("/a"), Path::new("/a")), PathBuf::new());
    }
}
