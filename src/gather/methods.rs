// src/gather/methods.rs

//! How package requests become package lists
//!
//! `deps` runs the closure solver over the arch repository. `nodeps`
//! picks the requested packages straight out of the global package set
//! without looking at dependencies.

use super::{GatherRequest, get_lookaside_repos, input_entry, request_string, write_solver_config};
use crate::arch::{get_compatible_arches, get_valid_arches, tree_arch_to_yum_arch};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::kickstart::SolverKickstart;
use crate::pkgset::{PackageSet, PkgsetResult, is_multilib};
use crate::runner::{self, RunOptions};
use crate::variants::{Variant, VariantType};
use crate::wrappers::solver::{PkgMap, SolverOpts, parse_missing_deps, parse_packages, solver_cmd};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum GatherMethod {
    /// Dependency closure computed by the external solver
    Deps,
    /// Requested packages only
    Nodeps,
}

impl GatherMethod {
    pub fn from_conf(compose: &Compose) -> Result<Self> {
        let name = compose.conf.require_str("gather_method")?;
        name.parse()
            .map_err(|_| Error::Config(vec![format!("Unknown gather_method: {}", name)]))
    }

    pub fn config_options(self) -> Vec<OptionSpec> {
        match self {
            GatherMethod::Deps => vec![
                OptionSpec::optional("check_deps", &[ValueKind::Bool]),
                OptionSpec::optional("gather_fulltree", &[ValueKind::Bool]),
                OptionSpec::optional("gather_selfhosting", &[ValueKind::Bool]),
            ],
            GatherMethod::Nodeps => Vec::new(),
        }
    }

    pub fn gather(
        self,
        compose: &Compose,
        arch: &str,
        variant: &Variant,
        request: &GatherRequest,
        pkgset: &PkgsetResult,
    ) -> Result<PkgMap> {
        match self {
            GatherMethod::Deps => {
                write_config(compose, arch, variant, request)?;
                let pkg_map = resolve_deps(compose, arch, variant)?;
                check_deps(compose, arch, variant)?;
                Ok(pkg_map)
            }
            GatherMethod::Nodeps => {
                let global = pkgset
                    .global()
                    .ok_or_else(|| Error::NotFound("global package set".to_string()))?;
                Ok(select_packages(global, arch, &request.packages))
            }
        }
    }
}

/// `(name, url)` of the lookaside repositories of one (arch, variant)
fn lookaside_repos(compose: &Compose, arch: &str, variant: &Variant) -> Result<Vec<(String, String)>> {
    Ok(get_lookaside_repos(compose, arch, Some(variant))?
        .into_iter()
        .enumerate()
        .map(|(num, url)| (format!("lookaside-repo-{}", num), url))
        .collect())
}

/// Solver input reading from the arch repository plus lookasides
pub fn write_config(compose: &Compose, arch: &str, variant: &Variant, request: &GatherRequest) -> Result<()> {
    let mut ks = SolverKickstart::default();
    let mut repos = vec![(
        "compose-repo".to_string(),
        compose.paths.work.arch_repo(Some(arch)).display().to_string(),
    )];
    repos.extend(lookaside_repos(compose, arch, variant)?);
    ks.add_repos(repos.iter().map(|(n, u)| (n.as_str(), u.as_str())), None);

    ks.groups = request.groups.clone();
    ks.packages = request.packages.iter().map(request_string).collect();
    ks.exclude_packages = request.filter_packages.iter().map(request_string).collect();
    ks.fulltree_excludes = request.fulltree_excludes.clone();
    ks.multilib_whitelist = request.multilib_whitelist.clone();
    ks.multilib_blacklist = request.multilib_blacklist.clone();
    ks.prepopulate = request.prepopulate.clone();
    write_solver_config(compose, arch, Some(variant), &ks)
}

/// Solver flags for one (arch, variant)
///
/// Optional variants are always fulltree and self-hosting. Addons and
/// layered products are fulltree but never self-hosting; what the parent
/// already ships is kept out through the fulltree excludes.
pub fn solver_opts(compose: &Compose, arch: &str, variant: &Variant) -> Result<SolverOpts> {
    let mut fulltree = compose.conf.get_bool("gather_fulltree", false);
    let mut selfhosting = compose.conf.get_bool("gather_selfhosting", false);
    match variant.variant_type {
        VariantType::Optional => {
            fulltree = true;
            selfhosting = true;
        }
        VariantType::Addon | VariantType::LayeredProduct => {
            fulltree = true;
            selfhosting = false;
        }
        VariantType::Variant => {}
    }
    let multilib_methods = if is_multilib(compose, arch) {
        compose.conf.get_str_list("multilib_methods")
    } else {
        Vec::new()
    };

    Ok(SolverOpts {
        destdir: compose.paths.work.tmp_dir(arch, Some(variant)),
        name: variant.uid.clone(),
        selfhosting,
        fulltree,
        greedy: Some(compose.conf.get_str("greedy_method").unwrap_or("none").to_string()),
        arch: Some(tree_arch_to_yum_arch(arch)),
        full_archlist: true,
        cache_dir: Some(compose.paths.work.solver_cache_dir(arch, Some(variant))),
        lookaside_repos: lookaside_repos(compose, arch, variant)?
            .into_iter()
            .map(|(name, _)| name)
            .collect(),
        multilib_methods,
        ..SolverOpts::default()
    })
}

fn read_log(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))
}

/// Run the solver; in DEBUG mode an existing log is parsed instead
pub fn resolve_deps(compose: &Compose, arch: &str, variant: &Variant) -> Result<PkgMap> {
    let log = compose.paths.work.solver_log(Some(arch), Some(variant));
    let msg = format!("Running solver (arch: {}, variant: {})", arch, variant.uid);
    if compose.debug && log.exists() {
        warn!("[SKIP ] {}", msg);
        return Ok(parse_packages(&read_log(&log)?));
    }
    info!("[BEGIN] {}", msg);

    let opts = solver_opts(compose, arch, variant)?;
    let cmd = solver_cmd(&compose.paths.work.solver_conf(Some(arch), Some(variant)), &opts);
    // the solver litters its working directory
    let workdir = tempfile::Builder::new().prefix("solver_").tempdir()?;
    runner::run(
        &cmd,
        &RunOptions::new().workdir(workdir.path()).log_file(&log).show_cmd(),
    )?;
    let pkg_map = parse_packages(&read_log(&log)?);

    info!("[DONE ] {}", msg);
    Ok(pkg_map)
}

/// Fail on unresolved dependencies in the solver log unless `check_deps`
/// is off
pub fn check_deps(compose: &Compose, arch: &str, variant: &Variant) -> Result<()> {
    if !compose.conf.get_bool("check_deps", true) {
        return Ok(());
    }
    let log = compose.paths.work.solver_log(Some(arch), Some(variant));
    let missing = parse_missing_deps(&read_log(&log)?);
    if missing.is_empty() {
        return Ok(());
    }
    for (pkg, deps) in &missing {
        error!("Unresolved dependencies in package {}: {:?}", pkg, deps);
    }
    Err(Error::UnresolvedDependencies(missing))
}

/// Requested binaries of a valid arch, their source packages, and
/// debuginfo built for a compatible arch from the same sources
pub fn select_packages(
    global: &PackageSet,
    arch: &str,
    packages: &BTreeSet<super::PackageRequest>,
) -> PkgMap {
    let mut result = PkgMap::default();
    let valid_arches = get_valid_arches(arch, true, true, false);
    // source rpm file name -> binary arches seen
    let mut seen_srpms: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for pkg in global.iter() {
        if pkg.is_source() || pkg.is_debug() || !valid_arches.contains(&pkg.arch) {
            continue;
        }
        let requested = packages
            .iter()
            .any(|(name, req_arch)| *name == pkg.name && req_arch.as_ref().is_none_or(|a| *a == pkg.arch));
        if !requested {
            continue;
        }
        result.rpm.push(input_entry(&pkg.file_path));
        if let Some(srpm) = &pkg.sourcerpm {
            seen_srpms.entry(srpm.as_str()).or_default().insert(pkg.arch.as_str());
        }
    }

    for pkg in global.iter().filter(|p| p.is_source()) {
        if seen_srpms.contains_key(pkg.file_name().as_str()) {
            result.srpm.push(input_entry(&pkg.file_path));
        }
    }

    for pkg in global.iter() {
        if !pkg.is_debug() || !valid_arches.contains(&pkg.arch) {
            continue;
        }
        let Some(seen) = pkg.sourcerpm.as_deref().and_then(|s| seen_srpms.get(s)) else {
            continue;
        };
        // i386 debuginfo belongs to an i686 package
        let compatible = get_compatible_arches(&pkg.arch, false);
        if compatible.iter().any(|a| seen.contains(a.as_str())) {
            result.debuginfo.push(input_entry(&pkg.file_path));
        }
    }
    result
}
