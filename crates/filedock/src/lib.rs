//! # filedock
//!
//! Access control and path resolution for serving a directory tree over a
//! file API.
//!
//! ## Overview
//!
//! Every request path passes through the same pipeline before anything
//! touches the filesystem:
//!
//! - **Path containment**: the untrusted relative path is resolved inside a
//!   fixed root, and `..` escapes are rejected
//! - **Permissions**: the contained path must fall under a permitted prefix
//! - **Sessions**: the caller must present a live session token
//!
//! Users and permissions persist to two small files in an auth data
//! directory (`user.json` and `.permissions`). Sessions live in memory and
//! are dropped whenever `user.json` is edited out of band.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      FileService                          │
//! ├──────────────────────────────────────────────────────────┤
//! │                   AccessController                        │
//! │                                                           │
//! │  ┌────────────┐  ┌─────────────┐  ┌──────────┐  ┌───────┐ │
//! │  │   paths    │  │ Permission  │  │   User   │  │Session│ │
//! │  │  resolver  │  │    Store    │  │  Store   │─▶│ Store │ │
//! │  └────────────┘  └─────────────┘  └──────────┘  └───────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filedock::{AccessController, Config, FileService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let access = Arc::new(AccessController::open(&config)?);
//!
//!     let token = access.login("admin", "admin")?;
//!     let files = FileService::from_config(access, &config.files);
//!     let readme = files.read_file(Some(&token), "docs/readme.md").await?;
//!     println!("{}", readme.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`paths`]: containment of untrusted relative paths
//! - [`auth`]: permission, user and session stores
//! - [`access`]: the composed authorization check
//! - [`files`]: file operations gated by the access controller
//! - [`config`]: configuration loading and defaults
//! - [`error`]: the outward error taxonomy

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod files;
pub mod paths;

pub use access::{AccessController, AccessPolicy, FileOperation};
pub use auth::{
    AuthOutcome, CredentialVerifier, PermissionStore, PlaintextVerifier, RandomTokens,
    Session, SessionStore, TokenIssuer, User, UserStore, UsernameTokens,
};
pub use config::{Config, ConfigError};
pub use error::AccessError;
pub use files::{EntryKind, FileContent, FileError, FileService};
pub use paths::{resolve, safe_join, ResolvedPath, Root};
