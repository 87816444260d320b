// src/phases/gather.rs

//! Dependency closure per (arch, variant) and placement of the result

use super::{Phase, SharedPkgset};
use crate::compose::Compose;
use crate::config::checks::OptionSpec;
use crate::error::{Error, Result};
use crate::gather::{self, GatherMethod, GatherSource, link_files};
use std::sync::Arc;
use tracing::info;

pub struct GatherPhase {
    pkgset: SharedPkgset,
}

impl GatherPhase {
    pub fn new(pkgset: SharedPkgset) -> Self {
        Self { pkgset }
    }
}

impl Phase for GatherPhase {
    fn name(&self) -> &'static str {
        "gather"
    }

    fn config_options(&self, compose: &Compose) -> Vec<OptionSpec> {
        let mut specs = gather::config_options();
        if let Ok(source) = GatherSource::from_conf(compose) {
            specs.extend(source.config_options());
        }
        if let Ok(method) = GatherMethod::from_conf(compose) {
            specs.extend(method.config_options());
        }
        specs
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        let pkgset = self
            .pkgset
            .get()
            .ok_or_else(|| Error::Compose("Gather needs a populated package set".to_string()))?;
        let results = gather::gather_wrapper(compose, pkgset)?;

        for arch in compose.get_arches() {
            for variant in compose.get_variants(&[], Some(arch.as_str()), false) {
                let Some(pkg_map) = results.get(&arch).and_then(|by_uid| by_uid.get(&variant.uid)) else {
                    continue;
                };
                link_files(compose, &arch, variant, pkg_map, pkgset)?;
            }
        }

        let manifest = compose.write_rpm_manifest()?;
        info!("Wrote rpm manifest: {}", manifest.display());
        Ok(())
    }
}
