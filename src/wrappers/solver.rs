// src/wrappers/solver.rs

//! Dependency-closure solver (`pungi-gather`)
//!
//! The solver prints one line per selected package:
//!
//! ```text
//! RPM(input,fulltree): /mnt/koji/.../bash-4.2-1.x86_64.rpm
//! SRPM: file:///mnt/koji/.../bash-4.2-1.src.rpm
//! DEBUGINFO(fulltree-exclude): /mnt/.../bash-debuginfo-4.2-1.x86_64.rpm
//! ```
//!
//! and reports missing requirements as
//! `Unresolvable dependency <req> in <package>`.

use crate::runner::CommandSpec;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Package kind in a gather result
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::AsRefStr,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum PkgType {
    Rpm,
    Srpm,
    Debuginfo,
}

impl PkgType {
    pub const ALL: [PkgType; 3] = [PkgType::Rpm, PkgType::Srpm, PkgType::Debuginfo];
}

/// One gathered file and the solver flags explaining why it is there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub path: PathBuf,
    pub flags: BTreeSet<String>,
}

impl PackageEntry {
    pub fn new(path: impl Into<PathBuf>, flags: &[&str]) -> Self {
        Self {
            path: path.into(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// rpm / srpm / debuginfo lists of one (arch, variant)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgMap {
    pub rpm: Vec<PackageEntry>,
    pub srpm: Vec<PackageEntry>,
    pub debuginfo: Vec<PackageEntry>,
}

impl PkgMap {
    pub fn get(&self, pkg_type: PkgType) -> &Vec<PackageEntry> {
        match pkg_type {
            PkgType::Rpm => &self.rpm,
            PkgType::Srpm => &self.srpm,
            PkgType::Debuginfo => &self.debuginfo,
        }
    }

    pub fn get_mut(&mut self, pkg_type: PkgType) -> &mut Vec<PackageEntry> {
        match pkg_type {
            PkgType::Rpm => &mut self.rpm,
            PkgType::Srpm => &mut self.srpm,
            PkgType::Debuginfo => &mut self.debuginfo,
        }
    }

    pub fn is_empty(&self) -> bool {
        PkgType::ALL.iter().all(|t| self.get(*t).is_empty())
    }
}

/// Flags passed to one solver run
#[derive(Debug, Clone, Default)]
pub struct SolverOpts {
    pub destdir: PathBuf,
    pub name: String,
    pub selfhosting: bool,
    pub fulltree: bool,
    pub greedy: Option<String>,
    pub nodeps: bool,
    /// Download packages into `destdir` instead of only listing them
    pub download: bool,
    pub full_archlist: bool,
    pub arch: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub lookaside_repos: Vec<String>,
    pub multilib_methods: Vec<String>,
    /// Reuse an existing `destdir`
    pub force: bool,
}

pub fn solver_cmd(config: &Path, opts: &SolverOpts) -> CommandSpec {
    let mut cmd = vec![
        "pungi-gather".to_string(),
        "-G".to_string(),
        format!("--config={}", config.display()),
        format!("--destdir={}", opts.destdir.display()),
        format!("--name={}", opts.name),
    ];
    if opts.selfhosting {
        cmd.push("--selfhosting".into());
    }
    if opts.fulltree {
        cmd.push("--fulltree".into());
    }
    cmd.push(format!("--greedy={}", opts.greedy.as_deref().unwrap_or("none")));
    if opts.nodeps {
        cmd.push("--nodeps".into());
    }
    if !opts.download {
        cmd.push("--nodownload".into());
    }
    if opts.full_archlist {
        cmd.push("--full-archlist".into());
    }
    if let Some(arch) = &opts.arch {
        cmd.push(format!("--arch={}", arch));
    }
    cmd.extend(opts.multilib_methods.iter().map(|m| format!("--multilib={}", m)));
    if let Some(cache_dir) = &opts.cache_dir {
        cmd.push(format!("--cachedir={}", cache_dir.display()));
    }
    cmd.extend(
        opts.lookaside_repos
            .iter()
            .map(|r| format!("--lookaside-repo={}", r)),
    );
    if opts.force {
        cmd.push("--force".into());
    }
    CommandSpec::Args(cmd)
}

static RPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^RPM(\((?P<flags>[^)]+)\))?: (?:file://)?(?P<path>/?[^ ]+)$").unwrap());
static SRPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SRPM(\((?P<flags>[^)]+)\))?: (?:file://)?(?P<path>/?[^ ]+)$").unwrap());
static DEBUGINFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^DEBUGINFO(\((?P<flags>[^)]+)\))?: (?:file://)?(?P<path>/?[^ ]+)$").unwrap()
});
static UNRESOLVED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*Unresolvable dependency (.+) in ([^ ]+).*$").unwrap());

fn package_regex(pkg_type: PkgType) -> &'static Regex {
    match pkg_type {
        PkgType::Rpm => &RPM_RE,
        PkgType::Srpm => &SRPM_RE,
        PkgType::Debuginfo => &DEBUGINFO_RE,
    }
}

/// Parse solver output into a package map
pub fn parse_packages(output: &str) -> PkgMap {
    let mut result = PkgMap::default();
    for line in output.lines() {
        for pkg_type in PkgType::ALL {
            let Some(caps) = package_regex(pkg_type).captures(line) else {
                continue;
            };
            let flags = caps
                .name("flags")
                .map(|m| m.as_str())
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            result.get_mut(pkg_type).push(PackageEntry {
                path: PathBuf::from(&caps["path"]),
                flags,
            });
            break;
        }
    }
    result
}

/// Unresolved requirements per package
pub fn parse_missing_deps(output: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut result: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for line in output.lines() {
        if let Some(caps) = UNRESOLVED_RE.captures(line) {
            result
                .entry(caps[2].to_string())
                .or_default()
                .insert(caps[1].to_string());
        }
    }
    result
}
