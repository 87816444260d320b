// src/lib.rs

//! Distribution compose orchestrator
//!
//! Turns a package source (a build-system tag or plain repositories), a
//! variants document and a configuration file into a compose: per-variant,
//! per-arch package trees with repository metadata, installer trees and
//! ISO images.
//!
//! # Architecture
//!
//! - [`compose::Compose`]: the compose directory, its configuration, variant tree and manifests
//! - [`paths`]: every on-disk location, as pure functions of (arch, variant)
//! - [`phases`]: the fixed phase sequence, each phase fanning out over a worker pool
//! - [`pkgset`] and [`gather`]: which package files go into which tree
//! - [`wrappers`]: command builders for the external tools
//! - [`metadata`]: `.treeinfo`, `.discinfo`, `composeinfo.json` and the manifests

pub mod arch;
pub mod compose;
pub mod comps;
pub mod config;
mod error;
pub mod gather;
pub mod kickstart;
pub mod linker;
pub mod media_split;
pub mod metadata;
pub mod paths;
pub mod phases;
pub mod pipeline;
pub mod pkgset;
pub mod pool;
pub mod runner;
pub mod scm;
pub mod util;
pub mod variants;
pub mod wrappers;
pub mod xml;

pub use compose::{Compose, ComposeOptions, ComposeType};
pub use config::ComposeConf;
pub use error::{Error, Result};
pub use pipeline::{ComposeRequest, prepare_compose, run_compose};
pub use variants::{Variant, VariantForest, VariantType};
