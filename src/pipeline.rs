// src/pipeline.rs

//! Whole compose runs
//!
//! [`prepare_compose`] creates (or reopens) the compose directory and
//! reads the variants; [`run_compose`] validates every phase, runs them in
//! order and keeps `STATUS` current. Any error dooms the compose.

use crate::compose::{
    Compose, ComposeOptions, ComposeType, STATUS_DOOMED, STATUS_FINISHED, STATUS_STARTED,
    create_compose_dir,
};
use crate::config::ComposeConf;
use crate::error::{Error, Result};
use crate::metadata;
use crate::phases::{PhaseRunner, SharedPkgset, all_phases};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Where and how to compose
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub config: PathBuf,
    pub target_dir: PathBuf,
    /// Reuse this compose directory instead of allocating a new one
    pub compose_dir: Option<PathBuf>,
    pub compose_type: ComposeType,
    pub label: Option<String>,
    pub options: ComposeOptions,
}

/// Open the compose described by `request`, with its variants read
pub fn prepare_compose(request: &ComposeRequest) -> Result<Compose> {
    let conf = ComposeConf::load(&request.config)?;
    let topdir = match &request.compose_dir {
        Some(dir) => {
            info!("Resuming compose in {}", dir.display());
            dir.clone()
        }
        None => create_compose_dir(
            &request.target_dir,
            &conf,
            request.compose_type,
            request.label.as_deref(),
            None,
        )?,
    };
    let mut compose = Compose::open(conf, &topdir, request.options.clone())?;
    compose.read_variants()?;
    Ok(compose)
}

/// Every configuration problem of every phase
pub fn validate_phases(compose: &Compose, phases: &[PhaseRunner]) -> Vec<String> {
    phases.iter().flat_map(|p| p.validate(compose)).collect()
}

/// Run every phase and record the outcome in `STATUS`
pub fn run_compose(compose: Arc<Compose>) -> Result<()> {
    info!("Compose top directory: {}", compose.topdir.display());
    compose.write_status(STATUS_STARTED)?;
    match run_phases(&compose) {
        Ok(()) => {
            compose.write_status(STATUS_FINISHED)?;
            info!("Compose finished: {}", compose.topdir.display());
            Ok(())
        }
        Err(e) => {
            error!("Compose failed: {}", e);
            if let Err(status_err) = compose.write_status(STATUS_DOOMED) {
                error!("Could not mark compose as doomed: {}", status_err);
            }
            Err(e)
        }
    }
}

fn run_phases(compose: &Arc<Compose>) -> Result<()> {
    let pkgset = SharedPkgset::default();
    let mut phases = all_phases(&pkgset);

    let errors = validate_phases(compose, &phases);
    if !errors.is_empty() {
        return Err(Error::Config(errors));
    }

    for phase in phases.iter_mut() {
        phase.start(compose)?;
        phase.stop(compose)?;
        // images are mastered from trees that already carry their metadata
        if phase.name() == "extra_files" {
            write_tree_metadata(compose)?;
        }
    }

    let composeinfo = metadata::write_compose_info(compose)?;
    info!("Wrote {}", composeinfo.display());
    let images = compose.write_image_manifest()?;
    info!("Wrote {}", images.display());
    Ok(())
}

fn timestamp_secs(discinfo_timestamp: &str) -> Option<i64> {
    discinfo_timestamp.split('.').next()?.parse().ok()
}

/// `.discinfo` and `media.repo` for every tree including sources, and
/// `.treeinfo` for every binary tree
pub fn write_tree_metadata(compose: &Compose) -> Result<()> {
    for variant in compose.get_variants(&[], None, true) {
        let mut arches = variant.arches.clone();
        arches.push("src".to_string());
        for arch in &arches {
            let Some(timestamp) = metadata::write_discinfo(compose, arch, variant)? else {
                continue;
            };
            metadata::write_media_repo(compose, arch, variant, &timestamp)?;
            if arch != "src" {
                metadata::write_tree_info(compose, arch, variant, timestamp_secs(&timestamp))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    const VARIANTS: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch></arches>
    <variants>
      <variant id="HA" name="High Availability" type="addon"><arches><arch>x86_64</arch></arches></variant>
    </variants>
  </variant>
</variants>"#;

    #[test]
    fn test_timestamp_secs() {
        assert_eq!(timestamp_secs("1420070400.123456"), Some(1420070400));
        assert_eq!(timestamp_secs("garbage"), None);
    }

    #[test]
    fn test_tree_metadata_written_for_every_tree() {
        let (_dir, compose) = compose_with("", VARIANTS);
        write_tree_metadata(&compose).unwrap();
        let server = compose.variant("Server").unwrap();
        let os_tree = compose.paths.compose.os_tree("x86_64", server);
        assert!(os_tree.join(".discinfo").is_file());
        assert!(os_tree.join("media.repo").is_file());
        assert!(os_tree.join(".treeinfo").is_file());
        let src_tree = compose.paths.compose.os_tree("src", server);
        assert!(src_tree.join(".discinfo").is_file());
        assert!(!src_tree.join(".treeinfo").exists());
    }

    #[test]
    fn test_invalid_config_dooms_compose() {
        let (_dir, compose) = compose_with("createrepo_checksum = 5\n", VARIANTS);
        let compose = Arc::new(compose);
        let err = run_compose(Arc::clone(&compose)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(compose.get_status().as_deref(), Some(STATUS_DOOMED));
    }

    #[test]
    fn test_validation_collects_all_phases() {
        let (_dir, compose) = compose_with("createrepo_checksum = 5\nbootable = \"yes\"\n", VARIANTS);
        let pkgset = SharedPkgset::default();
        let errors = validate_phases(&compose, &all_phases(&pkgset));
        assert!(errors.iter().any(|e| e.contains("createrepo_checksum")), "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("bootable")), "{:?}", errors);
    }
}
