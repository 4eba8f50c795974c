//! File operations behind the access controller.
//!
//! # Security
//!
//! Every operation first calls [`AccessController::authorize`] and then
//! [`verify_physical`] on the contained path, so neither `..` tricks nor
//! symlinks planted inside the root reach anything outside it.
//!
//! [`AccessController::authorize`]: crate::access::AccessController::authorize
//! [`verify_physical`]: crate::paths::verify_physical

pub mod service;

pub use service::{EntryKind, FileContent, FileError, FileService};
