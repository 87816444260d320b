// src/phases/createrepo.rs

//! Repository metadata for every gathered tree
//!
//! Binary and debuginfo repositories are indexed per (arch, variant),
//! source repositories once per variant. Addons share a tree with their
//! parent, so several jobs can name the same repository directory; the
//! first one indexes it and the rest skip.

use super::Phase;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::linker::relative_path;
use crate::paths::EnsureDir;
use crate::pool::WorkerPool;
use crate::runner::{self, RunOptions};
use crate::scm::{ScmSource, get_dir_from_scm};
use crate::variants::Variant;
use crate::wrappers::createrepo::{CreaterepoOpts, CreaterepoWrapper};
use crate::wrappers::solver::PkgType;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const CREATEREPO_THREADS: usize = 3;
const CREATEREPO_WORKERS: u32 = 3;
const LOCK_FILE: &str = ".createrepo.lock";

/// One repository to index; `arch` is `src` for source repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoJob {
    pub arch: String,
    pub variant_uid: String,
    pub pkg_type: PkgType,
}

/// Repository directory -> "already indexed" flag
///
/// Holding a directory's mutex serializes every job targeting it.
#[derive(Debug, Default)]
pub struct RepoLocks {
    dirs: Mutex<BTreeMap<PathBuf, Arc<Mutex<bool>>>>,
}

impl RepoLocks {
    fn for_dir(&self, dir: &Path) -> Result<Arc<Mutex<bool>>> {
        let mut dirs = self.dirs.lock().map_err(|_| poisoned())?;
        Ok(dirs.entry(dir.to_path_buf()).or_default().clone())
    }
}

fn poisoned() -> Error {
    Error::Worker {
        pool: "createrepo".to_string(),
        reason: "repository lock poisoned".to_string(),
    }
}

#[derive(Default)]
pub struct CreaterepoPhase {
    pool: Option<WorkerPool<RepoJob>>,
}

impl Phase for CreaterepoPhase {
    fn name(&self) -> &'static str {
        "createrepo"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("createrepo_c", &[ValueKind::Bool]),
            OptionSpec::optional("createrepo_checksum", &[ValueKind::Str]).values(&["sha256", "sha"]),
            OptionSpec::optional("product_id", &[ValueKind::Str, ValueKind::Table]),
            OptionSpec::optional("product_id_allow_missing", &[ValueKind::Bool]),
        ]
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        get_productids_from_scm(compose)?;

        let mut pool = WorkerPool::new("createrepo", CREATEREPO_THREADS);
        for job in repo_jobs(compose) {
            pool.queue_put(job);
        }
        let compose = Arc::clone(compose);
        let locks = Arc::new(RepoLocks::default());
        pool.start(move |job: &RepoJob, _num| {
            let variant = compose
                .variant(&job.variant_uid)
                .ok_or_else(|| Error::NotFound(format!("variant {}", job.variant_uid)))?;
            create_variant_repo(&compose, &job.arch, variant, job.pkg_type, &locks)
        })?;
        self.pool = Some(pool);
        Ok(())
    }

    fn stop(&mut self, _compose: &Arc<Compose>) -> Result<()> {
        match self.pool.as_mut() {
            Some(pool) => pool.stop(),
            None => Ok(()),
        }
    }
}

/// Binary and debuginfo jobs per (arch, variant), then a source job per variant
pub fn repo_jobs(compose: &Compose) -> Vec<RepoJob> {
    let mut jobs = Vec::new();
    for arch in compose.get_arches() {
        for variant in compose.get_variants(&[], Some(arch.as_str()), false) {
            for pkg_type in [PkgType::Rpm, PkgType::Debuginfo] {
                jobs.push(RepoJob {
                    arch: arch.clone(),
                    variant_uid: variant.uid.clone(),
                    pkg_type,
                });
            }
        }
    }
    for variant in compose.get_variants(&[], None, false) {
        jobs.push(RepoJob {
            arch: "src".to_string(),
            variant_uid: variant.uid.clone(),
            pkg_type: PkgType::Srpm,
        });
    }
    jobs
}

/// Package list relative to the repository, for trees where packages live
/// outside the repository directory
pub fn write_repo_package_list(package_dir: &Path, repo_dir: &Path, file_list: &Path) -> Result<()> {
    let rel_dir = relative_path(package_dir, repo_dir);
    let mut names = Vec::new();
    if package_dir.is_dir() {
        for entry in fs::read_dir(package_dir).map_err(|e| Error::io_path(package_dir, e))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".rpm") {
                names.push(name);
            }
        }
    }
    names.sort();
    let mut content = String::new();
    for name in names {
        content.push_str(&rel_dir.join(name).display().to_string());
        content.push('\n');
    }
    let file_list = file_list.to_path_buf().ensure_parent()?;
    fs::write(&file_list, content).map_err(|e| Error::io_path(&file_list, e))
}

pub fn create_variant_repo(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkg_type: PkgType,
    locks: &RepoLocks,
) -> Result<()> {
    let cp = &compose.paths.compose;
    let (repo_dir, package_dir, repo_dir_arch) = match pkg_type {
        PkgType::Rpm => (
            Some(cp.repository(arch, variant)),
            cp.packages(arch, variant),
            compose.paths.work.arch_repo(Some(arch)),
        ),
        PkgType::Srpm => (
            Some(cp.repository("src", variant)),
            cp.packages("src", variant),
            compose.paths.work.arch_repo(None),
        ),
        PkgType::Debuginfo => {
            let Some(package_dir) = cp.debug_packages(arch, variant) else {
                return Ok(());
            };
            (
                cp.debug_repository(arch, variant),
                package_dir,
                compose.paths.work.arch_repo(Some(arch)),
            )
        }
    };
    let Some(repo_dir) = repo_dir else {
        return Ok(());
    };
    let msg = format!(
        "Creating repo (arch: {}, variant: {}): {}",
        arch,
        variant.uid,
        repo_dir.display()
    );

    let dir_lock = locks.for_dir(&repo_dir)?;
    let mut done = dir_lock.lock().map_err(|_| poisoned())?;
    if *done {
        warn!("[SKIP ] Already in progress: {}", msg);
        return Ok(());
    }
    *done = true;
    if compose.debug && repo_dir.join("repodata").is_dir() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    info!("[BEGIN] {}", msg);

    let repo_dir = repo_dir.ensure_dir()?;
    let lock_path = repo_dir.join(LOCK_FILE);
    let lock = File::create(&lock_path).map_err(|e| Error::io_path(&lock_path, e))?;
    lock.lock_exclusive().map_err(|e| Error::io_path(&lock_path, e))?;
    let result = index_repo(compose, arch, variant, pkg_type, &repo_dir, &package_dir, &repo_dir_arch);
    let _ = lock.unlock();
    let _ = fs::remove_file(&lock_path);
    result?;

    info!("[DONE ] {}", msg);
    Ok(())
}

fn index_repo(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkg_type: PkgType,
    repo_dir: &Path,
    package_dir: &Path,
    repo_dir_arch: &Path,
) -> Result<()> {
    let file_list = if repo_dir != package_dir {
        let file_list = compose
            .paths
            .work
            .repo_package_list(arch, variant, Some(pkg_type.as_ref()));
        write_repo_package_list(package_dir, repo_dir, &file_list)?;
        Some(file_list)
    } else {
        None
    };

    let groupfile = (compose.has_comps() && pkg_type == PkgType::Rpm)
        .then(|| compose.paths.work.comps(Some(arch), Some(variant)));
    let opts = CreaterepoOpts {
        pkglist: file_list,
        outputdir: Some(repo_dir.to_path_buf()),
        skip_stat: true,
        workers: Some(CREATEREPO_WORKERS),
        groupfile,
        update_md_path: Some(repo_dir_arch.to_path_buf()),
        checksum: compose.conf.get_str("createrepo_checksum").map(str::to_string),
        ..CreaterepoOpts::default()
    };
    let wrapper = CreaterepoWrapper::new(compose.conf.get_bool("createrepo_c", false));
    let log_name = match pkg_type {
        PkgType::Debuginfo => format!("createrepo-{}-debuginfo", variant.uid),
        _ => format!("createrepo-{}", variant.uid),
    };
    runner::run(
        &wrapper.createrepo_cmd(repo_dir, &opts),
        &RunOptions::new()
            .log_file(compose.log_file(Some(arch), &log_name)?)
            .show_cmd(),
    )?;

    // product certificates go into binary repositories only
    if pkg_type != PkgType::Rpm || !compose.conf.contains("product_id") {
        return Ok(());
    }
    let product_id = compose.paths.work.product_id(arch, variant);
    if !product_id.is_file() {
        return Ok(());
    }
    let repodata = repo_dir.join("repodata");
    let cmd = wrapper.modifyrepo_cmd(&repodata, &product_id, None, Some("gz"), false);
    runner::run(
        &cmd,
        &RunOptions::new()
            .log_file(compose.log_file(Some(arch), &format!("modifyrepo-{}", variant.uid))?)
            .show_cmd(),
    )?;
    // modifyrepo does not know productid; consumers look for the plain file too
    let plain = repodata.join("productid");
    fs::copy(&product_id, &plain).map_err(|e| Error::io_path(&plain, e))?;
    Ok(())
}

/// Certificates named `*<uid>-<arch>-*.pem` in `dir`, sorted
pub fn find_product_certs(dir: &Path, variant_uid: &str, arch: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*{}-{}-*.pem", dir.display(), variant_uid, arch);
    let mut found = Vec::new();
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::InvalidValue(format!("Invalid glob '{}': {}", pattern, e)))?;
    for entry in entries {
        found.push(entry.map_err(|e| Error::Io(e.into()))?);
    }
    found.sort();
    Ok(found)
}

/// Fetch `product_id` and stage one certificate per (arch, variant)
///
/// Every missing or ambiguous certificate is reported at once.
pub fn get_productids_from_scm(compose: &Compose) -> Result<()> {
    let Some(source) = ScmSource::from_conf(&compose.conf, "product_id", "dir")? else {
        info!("No product certificates specified");
        return Ok(());
    };
    let allow_missing = compose.conf.get_bool("product_id_allow_missing", false);

    let msg = "Getting product certificates from SCM...";
    info!("[BEGIN] {}", msg);
    let tmp = tempfile::Builder::new().prefix("product_id_").tempdir()?;
    get_dir_from_scm(&source, tmp.path(), Some(&compose.log_file(None, "product_id")?))?;

    let mut errors = Vec::new();
    for arch in compose.get_arches() {
        for variant in compose.get_variants(&[], Some(arch.as_str()), false) {
            let pem_files = find_product_certs(tmp.path(), &variant.uid, &arch)?;
            match pem_files.as_slice() {
                [] => {
                    let msg = format!(
                        "No product certificate found (arch: {}, variant: {})",
                        arch, variant.uid
                    );
                    if allow_missing {
                        warn!("{}", msg);
                    } else {
                        errors.push(msg);
                    }
                }
                [pem] => {
                    let target = compose.paths.work.product_id(&arch, variant).ensure_parent()?;
                    fs::copy(pem, &target).map_err(|e| Error::io_path(&target, e))?;
                }
                many => {
                    let names: Vec<String> = many
                        .iter()
                        .filter_map(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                        .collect();
                    errors.push(format!(
                        "Multiple product certificates found (arch: {}, variant: {}): {}",
                        arch,
                        variant.uid,
                        names.join(", ")
                    ));
                }
            }
        }
    }
    if !errors.is_empty() {
        return Err(Error::Resolution(errors.join("\n")));
    }
    info!("[DONE ] {}", msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    const VARIANTS: &str = r#"<variants>
  <variant id="Client" name="Client" type="variant"><arches><arch>x86_64</arch></arches></variant>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>ppc64</arch><arch>x86_64</arch></arches>
    <variants>
      <variant id="HA" name="High Availability" type="addon"><arches><arch>x86_64</arch></arches></variant>
    </variants>
  </variant>
</variants>"#;

    #[test]
    fn test_repo_jobs() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let jobs = repo_jobs(&compose);
        let srpm: Vec<&str> = jobs
            .iter()
            .filter(|j| j.pkg_type == PkgType::Srpm)
            .map(|j| j.variant_uid.as_str())
            .collect();
        assert_eq!(srpm, vec!["Client", "Server", "Server-HA"]);
        assert!(jobs.iter().filter(|j| j.pkg_type == PkgType::Srpm).all(|j| j.arch == "src"));

        let x86: Vec<(&str, PkgType)> = jobs
            .iter()
            .filter(|j| j.arch == "x86_64")
            .map(|j| (j.variant_uid.as_str(), j.pkg_type))
            .collect();
        assert_eq!(x86.len(), 6);
        assert!(x86.contains(&("Server-HA", PkgType::Debuginfo)));
        assert_eq!(jobs.iter().filter(|j| j.arch == "ppc64").count(), 2);
    }

    #[test]
    fn test_repo_package_list_is_relative() {
        let dir = tempfile::tempdir().unwrap();
        let packages = dir.path().join("tree/Packages");
        fs::create_dir_all(&packages).unwrap();
        for name in ["b-1-1.noarch.rpm", "a-1-1.x86_64.rpm", "README"] {
            fs::write(packages.join(name), "").unwrap();
        }
        let list = dir.path().join("work/list.conf");
        write_repo_package_list(&packages, &dir.path().join("tree/addons/HA"), &list).unwrap();
        assert_eq!(
            fs::read_to_string(&list).unwrap(),
            "../../Packages/a-1-1.x86_64.rpm\n../../Packages/b-1-1.noarch.rpm\n"
        );
    }

    #[test]
    fn test_second_job_for_same_dir_skips() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let server = compose.variant("Server").unwrap();
        let locks = RepoLocks::default();
        let repo = compose.paths.compose.repository("x86_64", server);
        *locks.for_dir(&repo).unwrap().lock().unwrap() = true;
        // a real run would need createrepo; an indexed directory returns early
        create_variant_repo(&compose, "x86_64", server, PkgType::Rpm, &locks).unwrap();
        assert!(!repo.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_product_cert_lookup() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Server-x86_64-1.pem", "RHEL-Server-x86_64-2.pem", "Server-ppc64-1.pem", "Client-x86_64-1.pem"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let found = find_product_certs(dir.path(), "Server", "x86_64").unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["RHEL-Server-x86_64-2.pem", "Server-x86_64-1.pem"]);
        assert_eq!(find_product_certs(dir.path(), "Client", "x86_64").unwrap().len(), 1);
        assert!(find_product_certs(dir.path(), "Client", "ppc64").unwrap().is_empty());
    }

    #[test]
    fn test_product_certs_report_every_problem() {
        let (dir, compose) = compose_with("product_id = { scm = \"file\", dir = \"certs\" }\n", VARIANTS);
        let certs = dir.path().join("certs");
        fs::create_dir_all(&certs).unwrap();
        fs::write(certs.join("Server-x86_64-1.pem"), "a").unwrap();
        fs::write(certs.join("Server-x86_64-2.pem"), "b").unwrap();
        fs::write(certs.join("Client-x86_64-1.pem"), "c").unwrap();

        let err = get_productids_from_scm(&compose).unwrap_err();
        let Error::Resolution(msg) = err else {
            panic!("expected a resolution error, got {:?}", err);
        };
        assert!(msg.contains("Multiple product certificates found (arch: x86_64, variant: Server)"));
        assert!(msg.contains("No product certificate found (arch: ppc64, variant: Server)"));
        assert!(msg.contains("No product certificate found (arch: x86_64, variant: Server-HA)"));
    }

    #[test]
    fn test_missing_product_certs_tolerated() {
        let (dir, compose) = compose_with(
            "product_id_allow_missing = true\nproduct_id = { scm = \"file\", dir = \"certs\" }\n",
            VARIANTS,
        );
        let certs = dir.path().join("certs");
        fs::create_dir_all(&certs).unwrap();
        fs::write(certs.join("Client-x86_64-1.pem"), "client").unwrap();

        get_productids_from_scm(&compose).unwrap();
        let client = compose.variant("Client").unwrap();
        let staged = compose.paths.work.product_id("x86_64", client);
        assert_eq!(fs::read_to_string(staged).unwrap(), "client");
    }
}
