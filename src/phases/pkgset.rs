// src/phases/pkgset.rs

//! Package source snapshot

use super::{Phase, SharedPkgset};
use crate::compose::Compose;
use crate::config::checks::OptionSpec;
use crate::error::{Error, Result};
use crate::pkgset::{self, PkgsetSource};
use std::sync::Arc;

pub struct PkgsetPhase {
    result: SharedPkgset,
}

impl PkgsetPhase {
    pub fn new(result: SharedPkgset) -> Self {
        Self { result }
    }
}

impl Phase for PkgsetPhase {
    fn name(&self) -> &'static str {
        "pkgset"
    }

    fn config_options(&self, compose: &Compose) -> Vec<OptionSpec> {
        let mut specs = pkgset::config_options();
        // an unknown source is already reported by the pkgset_source check
        if let Ok(source) = PkgsetSource::from_conf(compose) {
            specs.extend(source.config_options());
        }
        specs
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        let result = pkgset::populate(compose)?;
        self.result
            .set(result)
            .map_err(|_| Error::Compose("Package set was already populated".to_string()))
    }
}
