//! filedock
//!
//! Administration CLI for the access-control data of a filedock root.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use filedock::auth::PermissionStore;
use filedock::config::Config;
use filedock::paths::{self, Root};
use filedock::AccessController;
use tracing_appender::non_blocking::WorkerGuard;

/// filedock - access control for a served directory tree.
#[derive(Parser, Debug)]
#[command(name = "filedock")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the root and auth directories and the default admin account
    Init,

    /// Show where a relative path resolves inside the root
    Resolve {
        /// Relative path as a client would send it
        path: String,

        /// Also check that no symlink leads outside the root
        #[arg(long)]
        physical: bool,
    },

    /// Manage the permission table
    #[command(subcommand)]
    Permissions(PermissionsCommands),
}

/// Subcommands for the permission table.
#[derive(Subcommand, Debug, Clone)]
pub enum PermissionsCommands {
    /// List all permitted prefixes
    List,

    /// Permit a path prefix
    Add {
        /// Prefix to permit, e.g. docs/public
        path: String,
    },

    /// Remove a permitted prefix
    Remove {
        /// Prefix to remove
        path: String,
    },

    /// Remove every permitted prefix
    Clear,

    /// Check whether a path is permitted
    Check {
        /// Relative path to check
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    let _guard = init_tracing(&config, cli.verbose)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    config.validate()?;

    match cli.command {
        Commands::Init => {
            let controller = AccessController::open(&config)?;
            println!("Root:        {}", controller.root());
            println!("Auth data:   {}", config.auth.data_dir.display());
            println!("Users:       {}", controller.users().len()?);
            println!("Permissions: {}", controller.permissions().len()?);
        }
        Commands::Resolve { path, physical } => {
            let root = Root::new(&config.files.root).with_context(|| {
                format!("Failed to resolve root: {}", config.files.root.display())
            })?;
            let resolved = match paths::resolve(&root, &path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };
            if physical {
                if let Err(e) = paths::verify_physical(&root, &resolved) {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
            println!("{}", resolved.as_path().display());
        }
        Commands::Permissions(cmd) => {
            let store = PermissionStore::in_dir(&config.auth.data_dir);
            store.load()?;

            match cmd {
                PermissionsCommands::List => {
                    let entries = store.list()?;
                    if entries.is_empty() {
                        println!("No permissions configured.");
                    } else {
                        println!("Permitted prefixes:");
                        for entry in entries {
                            println!("  {}", entry);
                        }
                    }
                }
                PermissionsCommands::Add { path } => {
                    store.add(&path)?;
                    println!("Permitted {}", path);
                }
                PermissionsCommands::Remove { path } => {
                    store.remove(&path)?;
                    println!("Removed {}", path);
                }
                PermissionsCommands::Clear => {
                    store.clear_all()?;
                    println!("Cleared all permissions");
                }
                PermissionsCommands::Check { path } => {
                    if store.has(&path)? {
                        println!("{} is permitted", path);
                    } else {
                        println!("{} is not permitted", path);
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Installs the global subscriber. Logs go to `daemon.log_file` when set,
/// otherwise to stderr. The returned guard flushes the file writer on drop.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };

    match &config.daemon.log_file {
        Some(log_file) => {
            let dir = log_file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = log_file
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", log_file.display()))?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(level)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(level)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_command() {
        let cli = Cli::try_parse_from(["filedock", "init"]).unwrap();
        assert!(matches!(cli.command, Commands::Init));
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["filedock", "init", "--verbose", "-c", "/etc/filedock.toml"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/filedock.toml")));
    }

    #[test]
    fn test_resolve_command() {
        let cli = Cli::try_parse_from(["filedock", "resolve", "a/../b", "--physical"]).unwrap();
        match cli.command {
            Commands::Resolve { path, physical } => {
                assert_eq!(path, "a/../b");
                assert!(physical);
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_permissions_list() {
        let cli = Cli::try_parse_from(["filedock", "permissions", "list"]).unwrap();
        match cli.command {
            Commands::Permissions(PermissionsCommands::List) => {}
            _ => panic!("Expected Permissions List command"),
        }
    }

    #[test]
    fn test_permissions_add() {
        let cli = Cli::try_parse_from(["filedock", "permissions", "add", "docs/public"]).unwrap();
        match cli.command {
            Commands::Permissions(PermissionsCommands::Add { path }) => {
                assert_eq!(path, "docs/public");
            }
            _ => panic!("Expected Permissions Add command"),
        }
    }

    #[test]
    fn test_permissions_check() {
        let cli = Cli::try_parse_from(["filedock", "permissions", "check", "docs/a.md"]).unwrap();
        match cli.command {
            Commands::Permissions(PermissionsCommands::Check { path }) => {
                assert_eq!(path, "docs/a.md");
            }
            _ => panic!("Expected Permissions Check command"),
        }
    }

    #[test]
    fn test_permissions_requires_subcommand() {
        assert!(Cli::try_parse_from(["filedock", "permissions"]).is_err());
    }

    #[test]
    fn test_permissions_add_requires_path() {
        assert!(Cli::try_parse_from(["filedock", "permissions", "add"]).is_err());
    }
}
