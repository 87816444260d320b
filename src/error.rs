// src/error.rs

//! Error types for the compose library
//!
//! Every fallible library operation returns [`Result`]. Errors that carry
//! several offending items (configuration violations, unresolved
//! dependencies, ambiguous certificates) keep all of them so the final
//! report is itemized rather than stopping at the first one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem or process I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with the path that caused it
    #[error("I/O error on '{path}': {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more configuration options are missing or invalid
    #[error("Invalid configuration:\n{}", .0.join("\n"))]
    Config(Vec<String>),

    /// The variants document does not conform to its schema
    #[error("Variants document does not validate:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    /// Structural problem in the variant tree (bad nesting, empty arches)
    #[error("Invalid variant tree: {0}")]
    VariantTree(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The closure solver reported requirements it could not satisfy
    #[error("Unresolved dependencies detected:\n{}", format_unresolved(.0))]
    UnresolvedDependencies(BTreeMap<String, BTreeSet<String>>),

    /// Ambiguous or missing inputs while resolving packages or certificates
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Destination exists and differs from the source
    #[error("Refusing to overwrite '{dst}': {reason}")]
    LinkConflict { dst: PathBuf, reason: String },

    /// External program exited with a non-zero status
    #[error("Command failed ({}): {command}{}", describe_exit(.exit_code), describe_log(.log_file))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        log_file: Option<PathBuf>,
    },

    /// A value is outside its permitted domain
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The compose directory is in a state that forbids the operation
    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A worker in a phase pool failed or panicked
    #[error("Worker failed in {pool}: {reason}")]
    Worker { pool: String, reason: String },
}

impl Error {
    /// Wrap an I/O error with the path it concerns
    pub fn io_path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoPath {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Error::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "killed by signal".to_string(),
    }
}

fn describe_log(log_file: &Option<PathBuf>) -> String {
    match log_file {
        Some(path) => format!(". See {} for more details.", path.display()),
        None => String::new(),
    }
}

fn format_unresolved(deps: &BTreeMap<String, BTreeSet<String>>) -> String {
    let mut lines = Vec::new();
    for (package, missing) in deps {
        for requirement in missing {
            lines.push(format!("Unresolved dependency for {}: {}", package, requirement));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_violation() {
        let err = Error::Config(vec![
            "Config option not set: product_name".to_string(),
            "Config option not set: product_short".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("product_name"));
        assert!(msg.contains("product_short"));
    }

    #[test]
    fn test_unresolved_dependencies_enumerated() {
        let mut deps = BTreeMap::new();
        deps.insert(
            "foo-1.0-1.x86_64".to_string(),
            BTreeSet::from(["libbar.so.1()(64bit)".to_string(), "baz".to_string()]),
        );
        let msg = Error::UnresolvedDependencies(deps).to_string();
        assert!(msg.contains("foo-1.0-1.x86_64: baz"));
        assert!(msg.contains("foo-1.0-1.x86_64: libbar.so.1()(64bit)"));
    }

    #[test]
    fn test_command_failed_mentions_log() {
        let err = Error::CommandFailed {
            command: "createrepo /tmp/repo".to_string(),
            exit_code: Some(1),
            log_file: Some(PathBuf::from("/tmp/createrepo.log")),
        };
        let msg = err.to_string();
        assert!(msg.contains("(1)"));
        assert!(msg.contains("/tmp/createrepo.log"));
    }
}
