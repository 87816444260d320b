// src/pkgset/package_set.rs

//! Indexed package collections
//!
//! A [`PackageSet`] holds package records keyed by file path plus a
//! per-arch ordering. The global set is read from the package source once;
//! one set per tree arch is then merged down from it.

use crate::arch::get_valid_arches;
use crate::error::{Error, Result};
use crate::metadata::manifest::{read_json, write_json};
use crate::pool::WorkerPool;
use crate::util::{parse_nvra, pkg_is_srpm};
use rpm::IndexTag;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Bumped whenever [`RpmRecord`] changes shape
pub const SNAPSHOT_VERSION: u32 = 1;

const READER_THREADS: usize = 10;

/// Header data of one package file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmRecord {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    /// `src` or `nosrc` for source packages
    pub arch: String,
    pub file_path: PathBuf,
    /// Source package file name; `None` for source packages
    pub sourcerpm: Option<String>,
    #[serde(default)]
    pub excludearch: Vec<String>,
    #[serde(default)]
    pub exclusivearch: Vec<String>,
    /// Signing key of the copy that was picked
    #[serde(default)]
    pub sigkey: Option<String>,
    /// Provides `system-release`
    #[serde(default)]
    pub is_system_release: bool,
}

impl RpmRecord {
    /// Read the header of `path`
    pub fn read(path: &Path) -> Result<Self> {
        let metadata = rpm::PackageMetadata::open(path)
            .map_err(|e| Error::parse(format!("RPM header of {}", path.display()), e))?;
        let header_err = |e: rpm::Error| Error::parse(format!("RPM header of {}", path.display()), e);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let arch = if file_name.ends_with(".nosrc.rpm") {
            "nosrc".to_string()
        } else if pkg_is_srpm(&file_name) {
            "src".to_string()
        } else {
            metadata.get_arch().map_err(header_err)?.to_string()
        };
        let sourcerpm = if arch == "src" || arch == "nosrc" {
            None
        } else {
            metadata.get_source_rpm().ok().map(str::to_string)
        };
        let string_array = |tag: IndexTag| -> Vec<String> {
            metadata
                .header
                .get_entry_data_as_string_array(tag)
                .map(|values| values.to_vec())
                .unwrap_or_default()
        };

        Ok(Self {
            name: metadata.get_name().map_err(header_err)?.to_string(),
            epoch: metadata.get_epoch().ok(),
            version: metadata.get_version().map_err(header_err)?.to_string(),
            release: metadata.get_release().map_err(header_err)?.to_string(),
            excludearch: string_array(IndexTag::RPMTAG_EXCLUDEARCH),
            exclusivearch: string_array(IndexTag::RPMTAG_EXCLUSIVEARCH),
            is_system_release: string_array(IndexTag::RPMTAG_PROVIDENAME)
                .iter()
                .any(|p| p == "system-release"),
            arch,
            file_path: path.to_path_buf(),
            sourcerpm,
            sigkey: None,
        })
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_source(&self) -> bool {
        self.arch == "src" || self.arch == "nosrc"
    }

    pub fn is_debug(&self) -> bool {
        self.name.contains("-debuginfo")
    }

    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        match self.epoch {
            Some(epoch) if epoch > 0 => format!(
                "{}-{}:{}-{}.{}",
                self.name, epoch, self.version, self.release, self.arch
            ),
            _ => format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch),
        }
    }

    /// Name of the source package this was built from
    pub fn source_name(&self) -> Option<String> {
        if self.is_source() {
            return Some(self.name.clone());
        }
        let sourcerpm = self.sourcerpm.as_deref()?;
        parse_nvra(sourcerpm).ok().map(|nvra| nvra.name)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    sigkey_ordering: Vec<Option<String>>,
    arches: Option<BTreeSet<String>>,
    packages: Vec<RpmRecord>,
}

#[derive(Default)]
struct ReadState {
    records: BTreeMap<PathBuf, RpmRecord>,
    srpms_by_name: BTreeMap<String, PathBuf>,
}

/// Resolves a queued item to a package file and the signing key used
pub type PathResolver<T> = Arc<dyn Fn(&T) -> Result<(PathBuf, Option<String>)> + Send + Sync>;

fn local_path(path: &PathBuf) -> Result<(PathBuf, Option<String>)> {
    Ok((path.clone(), None))
}

#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    /// Preferred signing keys; `None` allows unsigned copies
    pub sigkey_ordering: Vec<Option<String>>,
    /// Arches accepted from the package source; `None` accepts all
    pub arches: Option<BTreeSet<String>>,
    files: BTreeMap<PathBuf, RpmRecord>,
    rpms_by_arch: BTreeMap<String, Vec<PathBuf>>,
    srpms_by_name: BTreeMap<String, PathBuf>,
}

impl PackageSet {
    pub fn new(sigkey_ordering: Vec<Option<String>>, arches: Option<BTreeSet<String>>) -> Self {
        let sigkey_ordering = if sigkey_ordering.is_empty() {
            vec![None]
        } else {
            sigkey_ordering
        };
        Self {
            sigkey_ordering,
            arches,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&RpmRecord> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Every record, in file path order
    pub fn iter(&self) -> impl Iterator<Item = &RpmRecord> {
        self.files.values()
    }

    pub fn arches(&self) -> impl Iterator<Item = &str> {
        self.rpms_by_arch.keys().map(String::as_str)
    }

    /// Records of one package arch in insertion order
    pub fn packages_for_arch(&self, arch: &str) -> Vec<&RpmRecord> {
        self.rpms_by_arch
            .get(arch)
            .map(|paths| paths.iter().filter_map(|p| self.files.get(p)).collect())
            .unwrap_or_default()
    }

    /// Source package by file name
    pub fn srpm_by_file_name(&self, file_name: &str) -> Option<&RpmRecord> {
        self.srpms_by_name.get(file_name).and_then(|p| self.files.get(p))
    }

    /// Add a record; a path already present is ignored
    pub fn insert(&mut self, record: RpmRecord) -> bool {
        if self.files.contains_key(&record.file_path) {
            return false;
        }
        if record.is_source() {
            self.srpms_by_name
                .insert(record.file_name(), record.file_path.clone());
        }
        self.rpms_by_arch
            .entry(record.arch.clone())
            .or_default()
            .push(record.file_path.clone());
        self.files.insert(record.file_path.clone(), record);
        true
    }

    /// Read package headers with a pool of reader threads
    ///
    /// Source packages are read to completion first: noarch packages take
    /// ExcludeArch/ExclusiveArch from their source package.
    pub fn read_packages<T>(&mut self, rpms: Vec<T>, srpms: Vec<T>, resolve: PathResolver<T>) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(ReadState::default()));

        for (label, items) in [("SRPMs", srpms), ("RPMs", rpms)] {
            let mut pool = WorkerPool::new(format!("pkgset-{}", label.to_lowercase()), READER_THREADS);
            for item in items {
                pool.queue_put(item);
            }
            let total = pool.queue_total();
            let state = Arc::clone(&state);
            let resolve = Arc::clone(&resolve);
            debug!("Package set: spawning {} worker threads ({})", READER_THREADS, label);
            pool.run(move |item, num| {
                if num % 100 == 0 || num == total {
                    debug!("Processed {} out of {} packages", num, total);
                }
                let (path, sigkey) = resolve(item)?;
                let mut record = RpmRecord::read(&path)?;
                record.sigkey = sigkey;

                let mut state = state.lock().map_err(|_| Error::Worker {
                    pool: "pkgset".to_string(),
                    reason: "package set lock poisoned".to_string(),
                })?;
                if record.is_source() {
                    state.srpms_by_name.insert(record.file_name(), path.clone());
                } else if record.arch == "noarch" {
                    let srpm = record
                        .sourcerpm
                        .as_ref()
                        .and_then(|name| state.srpms_by_name.get(name))
                        .and_then(|p| state.records.get(p));
                    match srpm {
                        Some(srpm) => {
                            record.excludearch = srpm.excludearch.clone();
                            record.exclusivearch = srpm.exclusivearch.clone();
                        }
                        None => warn!("Can't find a SRPM for {}", record.file_name()),
                    }
                }
                state.records.insert(path, record);
                Ok(())
            })?;
            debug!("Package set: worker threads stopped ({})", label);
        }

        let state = Arc::try_unwrap(state)
            .map_err(|_| Error::Worker {
                pool: "pkgset".to_string(),
                reason: "reader threads still hold the package set".to_string(),
            })?
            .into_inner()
            .map_err(|_| Error::Worker {
                pool: "pkgset".to_string(),
                reason: "package set lock poisoned".to_string(),
            })?;
        // file path order keeps the arch lists independent of thread timing
        for record in state.records.into_values() {
            self.insert(record);
        }
        Ok(())
    }

    /// Read a flat list of package files
    pub fn populate_from_files(&mut self, file_list: &[PathBuf]) -> Result<()> {
        let msg = "Getting RPMs from file list";
        info!("[BEGIN] {}", msg);
        let (srpms, rpms): (Vec<PathBuf>, Vec<PathBuf>) = file_list
            .iter()
            .map(|p| std::path::absolute(p).unwrap_or_else(|_| p.clone()))
            .partition(|p| pkg_is_srpm(&p.to_string_lossy()));
        self.read_packages(rpms, srpms, Arc::new(local_path))?;
        info!("[DONE ] {}", msg);
        Ok(())
    }

    /// Merge records of `other` for the package arches valid in a tree of
    /// `primary_arch`
    ///
    /// Sources are merged last and only when a binary built from them was
    /// merged; noarch packages are dropped when their ExcludeArch or
    /// ExclusiveArch rules out the tree arch.
    pub fn merge(&mut self, other: &PackageSet, primary_arch: &str, arch_list: &[String]) {
        let msg = format!("Merging package sets for {}: {:?}", primary_arch, arch_list);
        debug!("[BEGIN] {}", msg);

        let mut arch_list: Vec<String> = arch_list.to_vec();
        if arch_list.iter().any(|a| a == "src") && !arch_list.iter().any(|a| a == "nosrc") {
            arch_list.push("nosrc".to_string());
        }
        for source_arch in ["nosrc", "src"] {
            if let Some(pos) = arch_list.iter().position(|a| a == source_arch) {
                let arch = arch_list.remove(pos);
                arch_list.push(arch);
            }
        }

        let exclusivearch_list: HashSet<String> = get_valid_arches(primary_arch, false, false, false)
            .into_iter()
            .collect();
        let mut seen_sourcerpms: HashSet<String> = HashSet::new();

        for arch in &arch_list {
            self.rpms_by_arch.entry(arch.clone()).or_default();
            let mut seen_names: HashSet<String> = self
                .packages_for_arch(arch)
                .iter()
                .map(|r| r.name.clone())
                .collect();

            for record in other.packages_for_arch(arch) {
                if self.files.contains_key(&record.file_path) || seen_names.contains(&record.name) {
                    continue;
                }
                if arch == "noarch" {
                    if record.excludearch.iter().any(|a| exclusivearch_list.contains(a)) {
                        debug!(
                            "Excluding (EXCLUDEARCH: {:?}): {}",
                            record.excludearch.iter().collect::<BTreeSet<_>>(),
                            record.file_name()
                        );
                        continue;
                    }
                    if !record.exclusivearch.is_empty()
                        && !record.exclusivearch.iter().any(|a| exclusivearch_list.contains(a))
                    {
                        debug!(
                            "Excluding (EXCLUSIVEARCH: {:?}): {}",
                            record.exclusivearch.iter().collect::<BTreeSet<_>>(),
                            record.file_name()
                        );
                        continue;
                    }
                }

                if arch == "src" || arch == "nosrc" {
                    if !seen_sourcerpms.contains(&record.name) {
                        continue;
                    }
                } else if let Some(source_name) = record.source_name() {
                    seen_sourcerpms.insert(source_name);
                }

                seen_names.insert(record.name.clone());
                self.insert(record.clone());
            }
        }
        debug!("[DONE ] {}", msg);
    }

    /// Write every package path, arch by arch, stripping `remove_path_prefix`
    pub fn save_file_list(&self, path: &Path, remove_path_prefix: Option<&str>) -> Result<()> {
        let mut content = String::new();
        for paths in self.rpms_by_arch.values() {
            for rpm_path in paths {
                let rpm_path = rpm_path.to_string_lossy();
                let rpm_path = remove_path_prefix
                    .and_then(|prefix| rpm_path.strip_prefix(prefix))
                    .unwrap_or(&rpm_path);
                content.push_str(rpm_path);
                content.push('\n');
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| Error::io_path(path, e))
    }

    /// Persist the set as a versioned JSON snapshot
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let mut packages = Vec::with_capacity(self.files.len());
        for paths in self.rpms_by_arch.values() {
            packages.extend(paths.iter().filter_map(|p| self.files.get(p)).cloned());
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            sigkey_ordering: self.sigkey_ordering.clone(),
            arches: self.arches.clone(),
            packages,
        };
        write_json(path, &snapshot)
    }

    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let snapshot: Snapshot = read_json(path)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::parse(
                format!("package set snapshot {}", path.display()),
                format!(
                    "unsupported version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            ));
        }
        let mut set = PackageSet::new(snapshot.sigkey_ordering, snapshot.arches);
        for record in snapshot.packages {
            set.insert(record);
        }
        Ok(set)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(file: &str, sourcerpm: Option<&str>) -> RpmRecord {
        let path = PathBuf::from("/repo").join(file);
        let nvra = parse_nvra(file).unwrap();
        RpmRecord {
            name: nvra.name,
            epoch: None,
            version: nvra.version,
            release: nvra.release,
            arch: nvra.arch,
            file_path: path,
            sourcerpm: sourcerpm.map(str::to_string),
            excludearch: Vec::new(),
            exclusivearch: Vec::new(),
            sigkey: None,
            is_system_release: false,
        }
    }

    fn global() -> PackageSet {
        let mut set = PackageSet::new(vec![None], None);
        set.insert(record("bash-4.2-1.src.rpm", None));
        set.insert(record("bash-4.2-1.x86_64.rpm", Some("bash-4.2-1.src.rpm")));
        set.insert(record("bash-4.2-1.i686.rpm", Some("bash-4.2-1.src.rpm")));
        set.insert(record("orphan-1.0-1.src.rpm", None));
        set.insert(record("docs-1.0-1.noarch.rpm", Some("docs-1.0-1.src.rpm")));
        set.insert(record("docs-1.0-1.src.rpm", None));
        let mut s390 = record("s390-utils-1.0-1.noarch.rpm", Some("s390-utils-1.0-1.src.rpm"));
        s390.exclusivearch = vec!["s390x".to_string()];
        set.insert(s390);
        let mut nox86 = record("nox86-1.0-1.noarch.rpm", Some("nox86-1.0-1.src.rpm"));
        nox86.excludearch = vec!["x86_64".to_string()];
        set.insert(nox86);
        set
    }

    fn names(set: &PackageSet, arch: &str) -> Vec<String> {
        set.packages_for_arch(arch)
            .iter()
            .map(|r| r.file_name())
            .collect()
    }

    #[test]
    fn test_merge_filters_sources_and_noarch() {
        let global = global();
        let mut arch_set = PackageSet::new(vec![None], None);
        let arches = get_valid_arches("x86_64", false, true, true);
        arch_set.merge(&global, "x86_64", &arches);

        assert_eq!(names(&arch_set, "x86_64"), vec!["bash-4.2-1.x86_64.rpm"]);
        assert!(names(&arch_set, "i686").is_empty());
        assert_eq!(names(&arch_set, "noarch"), vec!["docs-1.0-1.noarch.rpm"]);
        // orphan has no binary; s390-utils and nox86 were excluded
        assert_eq!(
            names(&arch_set, "src"),
            vec!["bash-4.2-1.src.rpm", "docs-1.0-1.src.rpm"]
        );
    }

    #[test]
    fn test_merge_twice_is_idempotent() {
        let global = global();
        let arches = get_valid_arches("x86_64", true, true, true);
        let mut once = PackageSet::new(vec![None], None);
        once.merge(&global, "x86_64", &arches);
        let mut twice = once.clone();
        twice.merge(&global, "x86_64", &arches);
        assert_eq!(once.len(), twice.len());
        for arch in ["x86_64", "i686", "noarch", "src"] {
            assert_eq!(names(&once, arch), names(&twice, arch));
        }
    }

    #[test]
    fn test_snapshot_roundtrip_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkgset_global.json");
        let global = global();
        global.save_snapshot(&path).unwrap();
        let loaded = PackageSet::load_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), global.len());
        assert!(loaded.srpm_by_file_name("bash-4.2-1.src.rpm").is_some());

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replacen("\"version\": 1", "\"version\": 99", 1)).unwrap();
        assert!(PackageSet::load_snapshot(&path).is_err());
    }

    #[test]
    fn test_save_file_list_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.conf");
        let mut set = PackageSet::new(vec![None], None);
        set.insert(record("bash-4.2-1.x86_64.rpm", Some("bash-4.2-1.src.rpm")));
        set.save_file_list(&path, Some("/repo/")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bash-4.2-1.x86_64.rpm\n");
    }

    #[test]
    fn test_nevra_and_source_name() {
        let mut r = record("bash-4.2-1.x86_64.rpm", Some("bash-4.2-1.src.rpm"));
        assert_eq!(r.nevra(), "bash-4.2-1.x86_64");
        r.epoch = Some(2);
        assert_eq!(r.nevra(), "bash-2:4.2-1.x86_64");
        assert_eq!(r.source_name().as_deref(), Some("bash"));
    }
}
