// src/wrappers/mod.rs

//! Command builders and output parsers for the external tools
//!
//! Builders only assemble argument vectors; running them is the job of
//! [`crate::runner`], which keeps every wrapper testable without the tool
//! being installed.

pub mod createrepo;
pub mod iso;
pub mod jigdo;
pub mod koji;
pub mod lorax;
pub mod repoclosure;
pub mod solver;

/// `file://` URL for a local path; URLs with a scheme pass through
pub(crate) fn as_url(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        format!("file://{}", path)
    }
}
