// src/pkgset/repos.rs

//! Package set from yum repositories
//!
//! Per tree arch, the closure solver downloads everything the configured
//! sources ask for from `pkgset_repos`. The downloads are linked into one
//! flat pool under `work/global/download/`, which then serves as the
//! package source for the rest of the compose.

use super::{PackageSet, PkgsetResult};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::gather::{self, GatherSource};
use crate::kickstart::SolverKickstart;
use crate::linker::{LinkType, LinkerPool};
use crate::paths::EnsureDir;
use crate::runner::{self, RunOptions};
use crate::wrappers::solver::{SolverOpts, solver_cmd};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;
use walkdir::WalkDir;

const LINKER_THREADS: usize = 10;
const SNAPSHOT_FILE: &str = "packages.json";

pub fn config_options() -> Vec<OptionSpec> {
    vec![OptionSpec::required("pkgset_repos", &[ValueKind::Table])]
}

/// `(name, url)` of every repository configured for `arch`
///
/// Relative paths are taken relative to the configuration directory.
pub fn arch_repos(compose: &Compose, arch: &str) -> Vec<(String, String)> {
    let repos = compose
        .conf
        .get("pkgset_repos")
        .and_then(|v| v.as_table())
        .and_then(|t| t.get(arch))
        .map(crate::config::value_to_strings)
        .unwrap_or_default();
    repos
        .iter()
        .enumerate()
        .map(|(num, repo)| {
            let url = if repo.contains("://") {
                repo.clone()
            } else {
                compose.conf.resolve_path(repo).display().to_string()
            };
            (format!("repo-{}", num), url)
        })
        .collect()
}

/// Solver input covering every variant of `arch`
fn write_download_config(compose: &Compose, arch: &str) -> Result<()> {
    let mut ks = SolverKickstart::default();
    let mut repos = arch_repos(compose, arch);
    let comps_repo = if compose.has_comps() {
        repos.push((
            "comps".to_string(),
            compose.paths.work.comps_repo(Some(arch)).display().to_string(),
        ));
        Some("comps")
    } else {
        None
    };
    ks.add_repos(repos.iter().map(|(n, u)| (n.as_str(), u.as_str())), comps_repo);

    let (packages, groups) = GatherSource::from_conf(compose)?.get_packages(compose, arch, None)?;
    ks.packages = packages.iter().map(gather::request_string).collect();
    // every package providing system-release
    ks.packages.insert("system-release".to_string());
    ks.groups = groups;
    ks.prepopulate = gather::get_prepopulate_packages(compose, arch, None)?;
    gather::write_solver_config(compose, arch, None, &ks)
}

fn download_packages(compose: &Compose, arch: &str) -> Result<PathBuf> {
    write_download_config(compose, arch)?;
    let download_dir = compose.paths.work.solver_download_dir(arch);
    let opts = SolverOpts {
        destdir: download_dir.clone(),
        name: "FOO".to_string(),
        selfhosting: true,
        fulltree: true,
        multilib_methods: vec!["all".to_string()],
        download: true,
        full_archlist: true,
        arch: Some(arch.to_string()),
        cache_dir: Some(compose.paths.work.solver_cache_dir(arch, None)),
        force: true,
        ..SolverOpts::default()
    };
    let cmd = solver_cmd(&compose.paths.work.solver_conf(Some(arch), None), &opts);
    runner::run(
        &cmd,
        &RunOptions::new()
            .log_file(compose.log_file(Some(arch), "pkgset_download")?)
            .show_cmd(),
    )?;
    Ok(download_dir)
}

pub fn get_pkgset_from_repos(compose: &Compose) -> Result<PkgsetResult> {
    let mut pool = LinkerPool::new(LinkType::from_conf(&compose.conf)?, LINKER_THREADS);

    let pool_dir = compose.paths.work.download_dir().ensure_dir()?;
    let path_prefix = format!("{}/", pool_dir.display());

    let mut seen_packages = BTreeSet::new();
    let mut file_list = BTreeSet::new();
    for arch in compose.get_arches() {
        let download_dir = download_packages(compose, &arch)?;
        for entry in WalkDir::new(&download_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().is_file() || !file_name.ends_with(".rpm") {
                continue;
            }
            if !seen_packages.insert(file_name.clone()) {
                continue;
            }
            let dst = pool_dir.join(&file_name);
            file_list.insert(dst.clone());
            pool.queue_put(entry.into_path(), dst);
        }
    }

    let msg = "Linking downloaded pkgset packages";
    info!("[BEGIN] {}", msg);
    pool.start()?;
    pool.stop()?;
    info!("[DONE ] {}", msg);

    let file_list: Vec<PathBuf> = file_list.into_iter().collect();
    let global = super::load_or_populate_global(
        compose,
        SNAPSHOT_FILE,
        "Populating the global package set from a file list",
        &path_prefix,
        |pkgset: &mut PackageSet| pkgset.populate_from_files(&file_list),
    )?;
    super::finish(compose, global, path_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    #[test]
    fn test_arch_repos_resolve_relative_paths() {
        let (dir, compose) = compose_with(
            "[pkgset_repos]\nx86_64 = [\"repos/x86_64\", \"http://example.com/f21/x86_64/\"]\n",
            r#"<variants><variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant></variants>"#,
        );
        let repos = arch_repos(&compose, "x86_64");
        assert_eq!(
            repos,
            vec![
                ("repo-0".to_string(), dir.path().join("repos/x86_64").display().to_string()),
                ("repo-1".to_string(), "http://example.com/f21/x86_64/".to_string()),
            ]
        );
        assert!(arch_repos(&compose, "ppc64").is_empty());
    }
}
