// src/pkgset/mod.rs

//! Package sets
//!
//! The package source (a build-system tag or a list of repositories) is
//! read into one global [`PackageSet`]. A set per tree arch is merged down
//! from it, and repositories are indexed for the global set and every arch
//! so the closure solver can run against them.

pub mod koji;
pub mod package_set;
pub mod repos;

pub use package_set::{PackageSet, PathResolver, RpmRecord};

use crate::arch::get_valid_arches;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::linker::relative_path;
use crate::runner::{self, RunOptions};
use crate::wrappers::createrepo::{CreaterepoOpts, CreaterepoWrapper};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// Key of the global set in [`PkgsetResult::package_sets`]
pub const GLOBAL: &str = "global";

const CREATEREPO_WORKERS: u32 = 5;

/// Where packages come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PkgsetSource {
    /// Latest builds of a build-system tag at a fixed event
    Koji,
    /// Packages downloaded from yum repositories
    Repos,
}

impl PkgsetSource {
    pub fn from_conf(compose: &Compose) -> Result<Self> {
        let name = compose.conf.require_str("pkgset_source")?;
        name.parse()
            .map_err(|_| Error::Config(vec![format!("Unknown pkgset_source: {}", name)]))
    }

    pub fn config_options(self) -> Vec<OptionSpec> {
        match self {
            PkgsetSource::Koji => koji::config_options(),
            PkgsetSource::Repos => repos::config_options(),
        }
    }
}

/// Output of the pkgset phase
#[derive(Debug, Clone, Default)]
pub struct PkgsetResult {
    /// One set per tree arch plus [`GLOBAL`]
    pub package_sets: BTreeMap<String, PackageSet>,
    /// Common prefix of every package path; ends with `/`
    pub path_prefix: String,
}

impl PkgsetResult {
    pub fn global(&self) -> Option<&PackageSet> {
        self.package_sets.get(GLOBAL)
    }

    pub fn for_arch(&self, arch: &str) -> Option<&PackageSet> {
        self.package_sets.get(arch)
    }
}

pub fn config_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::required("pkgset_source", &[ValueKind::Str]).values(&["koji", "repos"]),
        OptionSpec::optional("multilib_arches", &[ValueKind::List]),
        OptionSpec::optional("sigkeys", &[ValueKind::List]),
        OptionSpec::optional("createrepo_c", &[ValueKind::Bool]),
        OptionSpec::optional("createrepo_checksum", &[ValueKind::Str]).values(&["sha", "sha256"]),
    ]
}

/// Read the configured package source
pub fn populate(compose: &Compose) -> Result<PkgsetResult> {
    match PkgsetSource::from_conf(compose)? {
        PkgsetSource::Koji => koji::get_pkgset_from_koji(compose),
        PkgsetSource::Repos => repos::get_pkgset_from_repos(compose),
    }
}

pub(crate) fn is_multilib(compose: &Compose, arch: &str) -> bool {
    compose.conf.get_str_list("multilib_arches").iter().any(|a| a == arch)
}

/// Package arches the global set accepts: `src` plus everything valid
/// for some tree arch
pub fn all_arches(compose: &Compose) -> BTreeSet<String> {
    let mut result = BTreeSet::from(["src".to_string()]);
    for arch in compose.get_arches() {
        result.extend(get_valid_arches(&arch, is_multilib(compose, &arch), true, false));
    }
    result
}

/// Reload the global set from `snapshot_name` in DEBUG mode, or build it
/// with `populate` and snapshot it; the global package list is written
/// either way
pub(crate) fn load_or_populate_global<F>(
    compose: &Compose,
    snapshot_name: &str,
    msg: &str,
    path_prefix: &str,
    populate: F,
) -> Result<PackageSet>
where
    F: FnOnce(&mut PackageSet) -> Result<()>,
{
    let snapshot = compose.paths.work.global_dir().join(snapshot_name);
    let pkgset = if compose.debug && snapshot.is_file() {
        warn!("[SKIP ] {}", msg);
        PackageSet::load_snapshot(&snapshot)?
    } else {
        info!("{}", msg);
        let mut pkgset = PackageSet::new(compose.conf.sigkeys(), Some(all_arches(compose)));
        populate(&mut pkgset)?;
        pkgset.save_snapshot(&snapshot)?;
        pkgset
    };
    pkgset.save_file_list(&compose.paths.work.package_list(None, None, None), Some(path_prefix))?;
    Ok(pkgset)
}

/// Merge a set per tree arch out of `global` and write its package list
pub fn populate_arch_pkgsets(
    compose: &Compose,
    path_prefix: &str,
    global: &PackageSet,
) -> Result<BTreeMap<String, PackageSet>> {
    let mut result = BTreeMap::new();
    for arch in compose.get_arches() {
        info!("Populating package set for arch: {}", arch);
        let arches = get_valid_arches(&arch, is_multilib(compose, &arch), true, true);
        let mut pkgset = PackageSet::new(compose.conf.sigkeys(), Some(arches.iter().cloned().collect()));
        pkgset.merge(global, &arch, &arches);
        pkgset.save_file_list(
            &compose.paths.work.package_list(Some(&arch), None, None),
            Some(path_prefix),
        )?;
        result.insert(arch, pkgset);
    }
    Ok(result)
}

fn createrepo_wrapper(compose: &Compose) -> CreaterepoWrapper {
    CreaterepoWrapper::new(compose.conf.get_bool("createrepo_c", false))
}

/// Repodata of the same directory in an older compose, if any
fn old_repodata(compose: &Compose, repo_dir: &Path) -> Option<std::path::PathBuf> {
    if compose.old_composes.is_empty() {
        return None;
    }
    let Some(old_compose) = compose.find_old_compose() else {
        info!("No suitable old compose found in: {:?}", compose.old_composes);
        return None;
    };
    let old_repo_dir = old_compose.join(relative_path(repo_dir, &compose.topdir));
    if old_repo_dir.is_dir() {
        info!("Using old repodata from: {}", old_repo_dir.display());
        Some(old_repo_dir)
    } else {
        None
    }
}

/// Index the global package set
pub fn create_global_repo(compose: &Compose, path_prefix: &str) -> Result<()> {
    let repo_dir = compose.paths.work.arch_repo(None);
    let msg = "Running createrepo for the global package set";
    if compose.debug && repo_dir.join("repodata").is_dir() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    info!("[BEGIN] {}", msg);

    // no --skip-stat: re-signed copies must be picked up
    let opts = CreaterepoOpts {
        pkglist: Some(compose.paths.work.package_list(None, None, None)),
        outputdir: Some(repo_dir.clone()),
        baseurl: Some(format!("file://{}", path_prefix)),
        workers: Some(CREATEREPO_WORKERS),
        update_md_path: old_repodata(compose, &repo_dir),
        checksum: compose.conf.get_str("createrepo_checksum").map(str::to_string),
        ..CreaterepoOpts::default()
    };
    let cmd = createrepo_wrapper(compose).createrepo_cmd(Path::new(path_prefix), &opts);
    runner::run(
        &cmd,
        &RunOptions::new()
            .log_file(compose.log_file(Some(GLOBAL), "arch_repo")?)
            .show_cmd(),
    )?;
    info!("[DONE ] {}", msg);
    Ok(())
}

/// Index the package set of one tree arch, reusing the global repodata
pub fn create_arch_repos(compose: &Compose, arch: &str, path_prefix: &str) -> Result<()> {
    let repo_dir = compose.paths.work.arch_repo(Some(arch));
    let msg = format!("Running createrepo for arch '{}'", arch);
    if compose.debug && repo_dir.join("repodata").is_dir() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    info!("[BEGIN] {}", msg);

    let opts = CreaterepoOpts {
        pkglist: Some(compose.paths.work.package_list(Some(arch), None, None)),
        outputdir: Some(repo_dir),
        baseurl: Some(format!("file://{}", path_prefix)),
        workers: Some(CREATEREPO_WORKERS),
        skip_stat: true,
        groupfile: compose
            .has_comps()
            .then(|| compose.paths.work.comps(Some(arch), None)),
        update_md_path: Some(compose.paths.work.arch_repo(None)),
        checksum: compose.conf.get_str("createrepo_checksum").map(str::to_string),
        ..CreaterepoOpts::default()
    };
    let cmd = createrepo_wrapper(compose).createrepo_cmd(Path::new(path_prefix), &opts);
    runner::run(
        &cmd,
        &RunOptions::new()
            .log_file(compose.log_file(Some(arch), "arch_repo")?)
            .show_cmd(),
    )?;
    info!("[DONE ] {}", msg);
    Ok(())
}

/// Per-arch sets, package lists and repositories for a populated global set
pub(crate) fn finish(compose: &Compose, global: PackageSet, path_prefix: String) -> Result<PkgsetResult> {
    let mut package_sets = populate_arch_pkgsets(compose, &path_prefix, &global)?;
    create_global_repo(compose, &path_prefix)?;
    for arch in compose.get_arches() {
        create_arch_repos(compose, &arch, &path_prefix)?;
    }
    package_sets.insert(GLOBAL.to_string(), global);
    Ok(PkgsetResult {
        package_sets,
        path_prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    const VARIANTS: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch><arch>s390x</arch></arches>
  </variant>
</variants>"#;

    #[test]
    fn test_pkgset_source_parse() {
        assert_eq!("koji".parse::<PkgsetSource>().unwrap(), PkgsetSource::Koji);
        assert_eq!("repos".parse::<PkgsetSource>().unwrap(), PkgsetSource::Repos);
        assert!("nfs".parse::<PkgsetSource>().is_err());
    }

    #[test]
    fn test_all_arches() {
        let (_dir, compose) = compose_with("multilib_arches = [\"x86_64\"]\n", VARIANTS);
        let arches = all_arches(&compose);
        for arch in ["src", "noarch", "x86_64", "i686", "s390x"] {
            assert!(arches.contains(arch), "missing {}", arch);
        }
        assert!(!arches.contains("ppc64"));
    }

    #[test]
    fn test_populate_arch_pkgsets_writes_lists() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let mut global = PackageSet::new(vec![None], None);
        global.insert(package_set::tests::record("bash-4.2-1.src.rpm", None));
        global.insert(package_set::tests::record(
            "bash-4.2-1.x86_64.rpm",
            Some("bash-4.2-1.src.rpm"),
        ));

        let sets = populate_arch_pkgsets(&compose, "/repo/", &global).unwrap();
        assert_eq!(sets.keys().collect::<Vec<_>>(), vec!["s390x", "x86_64"]);
        assert!(sets["s390x"].is_empty());

        let list = std::fs::read_to_string(compose.paths.work.package_list(Some("x86_64"), None, None)).unwrap();
        assert_eq!(list, "bash-4.2-1.src.rpm\nbash-4.2-1.x86_64.rpm\n");
    }
}
