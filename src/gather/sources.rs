// src/gather/sources.rs

//! Where package requests come from

use super::PackageRequest;
use crate::comps::CompsWrapper;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::metadata::manifest::read_json;
use crate::variants::Variant;
use std::collections::{BTreeMap, BTreeSet};

/// variant uid -> tree arch -> package name -> [arch, or null for the best one]
type JsonMapping = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Option<String>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum GatherSource {
    /// Groups of the per-arch comps file, filtered by the variant's groups
    Comps,
    /// Explicit package mapping from `gather_source_mapping`
    Json,
}

impl GatherSource {
    pub fn from_conf(compose: &Compose) -> Result<Self> {
        let name = compose.conf.require_str("gather_source")?;
        name.parse()
            .map_err(|_| Error::Config(vec![format!("Unknown gather_source: {}", name)]))
    }

    pub fn config_options(self) -> Vec<OptionSpec> {
        match self {
            GatherSource::Comps => vec![OptionSpec::required(
                "comps_file",
                &[ValueKind::Str, ValueKind::Table],
            )],
            GatherSource::Json => vec![OptionSpec::required("gather_source_mapping", &[ValueKind::Str])],
        }
    }

    /// Package and group requests for `variant`, or for every variant
    pub fn get_packages(
        self,
        compose: &Compose,
        arch: &str,
        variant: Option<&Variant>,
    ) -> Result<(BTreeSet<PackageRequest>, BTreeSet<String>)> {
        match self {
            GatherSource::Comps => Ok((BTreeSet::new(), comps_groups(compose, arch, variant)?)),
            GatherSource::Json => Ok((json_packages(compose, arch, variant)?, BTreeSet::new())),
        }
    }
}

fn comps_groups(compose: &Compose, arch: &str, variant: Option<&Variant>) -> Result<BTreeSet<String>> {
    let mut comps = CompsWrapper::load(&compose.paths.work.comps(Some(arch), None))?;
    if let Some(variant) = variant {
        comps.filter_groups(&variant.groups)?;
    }
    Ok(comps.group_ids().into_iter().collect())
}

fn json_packages(compose: &Compose, arch: &str, variant: Option<&Variant>) -> Result<BTreeSet<PackageRequest>> {
    let path = compose
        .conf
        .resolve_path(compose.conf.require_str("gather_source_mapping")?);
    let mapping: JsonMapping = read_json(&path)?;

    let per_variant: Vec<&BTreeMap<String, BTreeMap<String, Vec<Option<String>>>>> = match variant {
        Some(v) => mapping.get(&v.uid).into_iter().collect(),
        None => mapping.values().collect(),
    };
    let mut packages = BTreeSet::new();
    for by_arch in per_variant {
        for (name, arches) in by_arch.get(arch).into_iter().flatten() {
            for pkg_arch in arches {
                packages.insert((name.clone(), pkg_arch.clone()));
            }
        }
    }
    Ok(packages)
}
