//! Path containment.
//!
//! Every externally supplied path passes through this module before anything
//! else looks at it. See [`resolver`] for the two lexical variants and the
//! physical (symlink-aware) follow-up check.

pub mod resolver;

pub use resolver::{
    resolve, safe_join, sanitize_upload_filename, to_relative, validate_entry_name,
    verify_physical, ResolvedPath, Root,
};
