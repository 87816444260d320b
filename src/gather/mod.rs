// src/gather/mod.rs

//! Package gathering
//!
//! For every tree arch and variant, the configured source yields package
//! and group requests. The configured method turns them into rpm, srpm
//! and debuginfo lists. The variant forest is then trimmed so that
//! addons and layered products do not ship what their parent already
//! has, and optional variants do not ship what a more specific variant
//! claimed.
//!
//! The work runs as an ordered list of [`GatherPass`]es. Each pass sees
//! the whole forest for every arch and finishes before the next one
//! starts. Resolution passes fan out across (arch, variant) pairs;
//! trimming passes are sequential.

pub mod link;
pub mod methods;
pub mod sources;

pub use link::link_files;
pub use methods::GatherMethod;
pub use sources::GatherSource;

use crate::arch::{get_compatible_arches, split_name_arch};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::kickstart::SolverKickstart;
use crate::metadata::manifest::read_json;
use crate::pkgset::PkgsetResult;
use crate::scm::{ScmSource, get_file_from_scm};
use crate::util::parse_nvra;
use crate::variants::{Variant, VariantQuery, VariantType};
use crate::wrappers::solver::{PackageEntry, PkgMap, PkgType};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use tracing::{debug, info, warn};

const PREPOPULATE_FILE: &str = "prepopulate.json";

/// `(name, arch)`; no arch means the solver picks the best one
pub type PackageRequest = (String, Option<String>);

/// `(name, arch)` pairs per package kind
pub type PkgKeys = BTreeMap<PkgType, BTreeSet<(String, String)>>;

/// Package names per package kind
pub type PkgNames = BTreeMap<PkgType, BTreeSet<String>>;

/// arch -> variant uid -> gathered packages
pub type GatherResults = BTreeMap<String, BTreeMap<String, PkgMap>>;

/// variant uid -> arch -> build -> ["name.arch", ..]
type PrepopulateData = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>;

/// `name` or `name.arch`
pub fn request_string(request: &PackageRequest) -> String {
    match &request.1 {
        Some(arch) => format!("{}.{}", request.0, arch),
        None => request.0.clone(),
    }
}

pub fn config_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::required("gather_source", &[ValueKind::Str]).values(&["comps", "json"]),
        OptionSpec::required("gather_method", &[ValueKind::Str]).values(&["deps", "nodeps"]),
        OptionSpec::optional("multilib_arches", &[ValueKind::List]),
        OptionSpec::optional("multilib_methods", &[ValueKind::List]),
        OptionSpec::optional("greedy_method", &[ValueKind::Str]).values(&["none", "all", "build"]),
        OptionSpec::optional("gather_fulltree", &[ValueKind::Bool]),
        OptionSpec::optional("gather_selfhosting", &[ValueKind::Bool]),
        OptionSpec::optional("check_deps", &[ValueKind::Bool]),
        OptionSpec::optional("gather_prepopulate", &[ValueKind::Str, ValueKind::Table]),
        OptionSpec::optional("gather_lookaside_repos", &[ValueKind::List]),
        OptionSpec::optional("additional_packages", &[ValueKind::List]),
        OptionSpec::optional("filter_packages", &[ValueKind::List]),
        OptionSpec::optional("multilib_whitelist", &[ValueKind::Table]),
        OptionSpec::optional("multilib_blacklist", &[ValueKind::Table]),
        OptionSpec::optional("link_type", &[ValueKind::Str]).values(&[
            "hardlink",
            "copy",
            "hardlink-or-copy",
            "symlink",
            "abspath-symlink",
        ]),
        OptionSpec::deprecated("additional_packages_multiarch", "Use multilib_whitelist instead"),
        OptionSpec::deprecated("filter_packages_multiarch", "Use multilib_blacklist instead"),
    ]
}

/// Write the solver input for `arch` and `variant` (`None` covers every
/// variant); an existing file is kept in DEBUG mode
pub fn write_solver_config(
    compose: &Compose,
    arch: &str,
    variant: Option<&Variant>,
    ks: &SolverKickstart,
) -> Result<()> {
    let path = compose.paths.work.solver_conf(Some(arch), variant);
    let msg = format!(
        "Writing solver config (arch: {}, variant: {}): {}",
        arch,
        variant.map(|v| v.uid.as_str()).unwrap_or("*"),
        path.display()
    );
    if compose.debug && path.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    info!("{}", msg);
    ks.write(&path)
}

fn incompatible_arch(pkg: &str, pkg_arch: Option<&str>, arch: &str) -> Error {
    Error::Resolution(format!(
        "Incompatible package arch '{}' of {} for tree arch '{}'",
        pkg_arch.unwrap_or("none"),
        pkg,
        arch
    ))
}

/// Fetch `gather_prepopulate` into `work/global/prepopulate.json`
pub fn write_prepopulate_file(compose: &Compose) -> Result<()> {
    let Some(source) = ScmSource::from_conf(&compose.conf, "gather_prepopulate", "file")? else {
        return Ok(());
    };
    let target = compose.paths.work.global_dir().join(PREPOPULATE_FILE);
    let msg = format!("Writing prepopulate file: {}", target.display());
    if compose.debug && target.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    debug!("{}", msg);

    let tmp = tempfile::Builder::new().prefix("prepopulate_file_").tempdir()?;
    let fetched = get_file_from_scm(&source, tmp.path(), None)?;
    let file = fetched
        .first()
        .ok_or_else(|| Error::NotFound("gather_prepopulate fetched no file".to_string()))?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
    }
    fs::copy(file, &target).map_err(|e| Error::io_path(&target, e))?;
    Ok(())
}

/// Packages the solver must see before resolving, as `name.arch`
///
/// Without a variant, entries of every variant are returned. Each entry
/// has to carry an arch compatible with the tree arch.
pub fn get_prepopulate_packages(
    compose: &Compose,
    arch: &str,
    variant: Option<&Variant>,
) -> Result<BTreeSet<String>> {
    let path = compose.paths.work.global_dir().join(PREPOPULATE_FILE);
    let mut result = BTreeSet::new();
    if !path.is_file() {
        return Ok(result);
    }
    let data: PrepopulateData = read_json(&path)?;
    let compatible = get_compatible_arches(arch, true);

    let per_variant: Vec<&BTreeMap<String, BTreeMap<String, Vec<String>>>> = match variant {
        Some(v) => data.get(&v.uid).into_iter().collect(),
        None => data.values().collect(),
    };
    for by_arch in per_variant {
        let Some(builds) = by_arch.get(arch) else {
            continue;
        };
        for pkg in builds.values().flatten() {
            let (_, pkg_arch) = split_name_arch(pkg);
            if !pkg_arch.as_ref().is_some_and(|a| compatible.contains(a)) {
                return Err(incompatible_arch(pkg, pkg_arch.as_deref(), arch));
            }
            result.insert(pkg.clone());
        }
    }
    Ok(result)
}

pub fn get_additional_packages(compose: &Compose, arch: &str, variant: &Variant) -> Result<BTreeSet<PackageRequest>> {
    let compatible = get_compatible_arches(arch, true);
    let mut result = BTreeSet::new();
    for pkg in compose
        .conf
        .get_arch_variant_strings("additional_packages", arch, Some(&variant.uid))?
    {
        let (name, pkg_arch) = split_name_arch(&pkg);
        if let Some(pkg_arch) = &pkg_arch {
            if !compatible.contains(pkg_arch) {
                return Err(incompatible_arch(&pkg, Some(pkg_arch), arch));
            }
        }
        result.insert((name, pkg_arch));
    }
    Ok(result)
}

pub fn get_filter_packages(compose: &Compose, arch: &str, variant: &Variant) -> Result<BTreeSet<PackageRequest>> {
    Ok(compose
        .conf
        .get_arch_variant_strings("filter_packages", arch, Some(&variant.uid))?
        .iter()
        .map(|pkg| split_name_arch(pkg))
        .collect())
}

pub fn get_multilib_whitelist(compose: &Compose, arch: &str) -> BTreeSet<String> {
    compose.conf.get_arch_strings("multilib_whitelist", arch).into_iter().collect()
}

pub fn get_multilib_blacklist(compose: &Compose, arch: &str) -> BTreeSet<String> {
    compose.conf.get_arch_strings("multilib_blacklist", arch).into_iter().collect()
}

pub fn get_lookaside_repos(compose: &Compose, arch: &str, variant: Option<&Variant>) -> Result<Vec<String>> {
    compose
        .conf
        .get_arch_variant_strings("gather_lookaside_repos", arch, variant.map(|v| v.uid.as_str()))
}

/// Requests of one variant before resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantPackages {
    pub packages: BTreeSet<PackageRequest>,
    pub groups: BTreeSet<String>,
    pub filter_packages: BTreeSet<PackageRequest>,
}

/// Everything a gather method needs for one (arch, variant)
#[derive(Debug, Clone, Default)]
pub struct GatherRequest {
    pub packages: BTreeSet<PackageRequest>,
    pub groups: BTreeSet<String>,
    pub filter_packages: BTreeSet<PackageRequest>,
    pub multilib_whitelist: BTreeSet<String>,
    pub multilib_blacklist: BTreeSet<String>,
    /// Source package names whose binaries the parent already ships
    pub fulltree_excludes: BTreeSet<String>,
    pub prepopulate: BTreeSet<String>,
}

fn parent_of<'a>(compose: &'a Compose, variant: &Variant) -> Result<&'a Variant> {
    compose
        .parent_of(variant)
        .ok_or_else(|| Error::VariantTree(format!("Variant {} has no parent", variant.uid)))
}

/// Collect the requests of `variant`
///
/// Addons and layered products also take everything their parent asks
/// for. Optional variants take the requests of the parent and of its
/// addons and layered products. Neither inherits filtered packages.
pub fn get_variant_packages(
    compose: &Compose,
    arch: &str,
    variant: Option<&Variant>,
    pkgset: Option<&PkgsetResult>,
) -> Result<VariantPackages> {
    let (packages, groups) = GatherSource::from_conf(compose)?.get_packages(compose, arch, variant)?;
    let mut result = VariantPackages {
        packages,
        groups,
        filter_packages: BTreeSet::new(),
    };
    let Some(variant) = variant else {
        return Ok(result);
    };

    result.packages.extend(get_additional_packages(compose, arch, variant)?);
    result.filter_packages.extend(get_filter_packages(compose, arch, variant)?);

    let (release, release_filter) = get_system_release_packages(compose, arch, variant, pkgset)?;
    result.packages.extend(release);
    result.filter_packages.extend(release_filter);

    let inherited: Vec<&Variant> = match variant.variant_type {
        VariantType::Optional => parent_of(compose, variant)?.get_variants(
            &VariantQuery::new()
                .arch(arch)
                .types(&[VariantType::Variant, VariantType::Addon, VariantType::LayeredProduct])
                .include_self(),
        ),
        VariantType::Addon | VariantType::LayeredProduct => vec![parent_of(compose, variant)?],
        VariantType::Variant => Vec::new(),
    };
    for other in inherited {
        let other = get_variant_packages(compose, arch, Some(other), pkgset)?;
        result.packages.extend(other.packages);
        result.groups.extend(other.groups);
    }
    Ok(result)
}

/// Pick one package providing `system-release`
///
/// A single provider is always requested. With several, a plain variant
/// prefers `<uid>-release*` or `*release-<uid>` (lowercase uid), else the
/// first name in sort order; the others are filtered out. Other variant
/// types defer to their parent.
pub fn get_system_release_packages(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkgset: Option<&PkgsetResult>,
) -> Result<(BTreeSet<PackageRequest>, BTreeSet<PackageRequest>)> {
    let mut packages = BTreeSet::new();
    let mut filter = BTreeSet::new();
    let Some(arch_set) = pkgset.and_then(|p| p.for_arch(arch)) else {
        return Ok((packages, filter));
    };

    let names: BTreeSet<&str> = arch_set
        .iter()
        .filter(|r| r.is_system_release)
        .map(|r| r.name.as_str())
        .collect();
    match names.len() {
        0 => return Ok((packages, filter)),
        1 => {
            packages.extend(names.iter().map(|n| (n.to_string(), None)));
            return Ok((packages, filter));
        }
        _ => {}
    }
    if variant.variant_type != VariantType::Variant {
        return get_system_release_packages(compose, arch, parent_of(compose, variant)?, pkgset);
    }

    let uid = variant.uid.to_lowercase();
    let suffix = format!("release-{}", uid);
    let prefix = format!("{}-release", uid);
    let best = names
        .iter()
        .find(|n| n.ends_with(&suffix) || n.starts_with(&prefix))
        .or_else(|| names.first())
        .copied()
        .unwrap_or_default();
    packages.insert((best.to_string(), None));
    filter.extend(
        names
            .iter()
            .filter(|n| **n != best)
            .map(|n| (n.to_string(), None)),
    );
    Ok((packages, filter))
}

/// Resolve one (arch, variant) with the configured method
pub fn gather_packages(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkgset: &PkgsetResult,
    fulltree_excludes: &BTreeSet<String>,
) -> Result<PkgMap> {
    let method = GatherMethod::from_conf(compose)?;
    let msg = format!("Gathering packages (arch: {}, variant: {})", arch, variant.uid);
    info!("[BEGIN] {}", msg);

    let input = get_variant_packages(compose, arch, Some(variant), Some(pkgset))?;
    let request = GatherRequest {
        packages: input.packages,
        groups: input.groups,
        filter_packages: input.filter_packages,
        multilib_whitelist: get_multilib_whitelist(compose, arch),
        multilib_blacklist: get_multilib_blacklist(compose, arch),
        fulltree_excludes: fulltree_excludes.clone(),
        prepopulate: get_prepopulate_packages(compose, arch, Some(variant))?,
    };
    let pkg_map = method.gather(compose, arch, variant, &request, pkgset)?;

    info!("[DONE ] {}", msg);
    Ok(pkg_map)
}

/// `(name, arch)` of every entry, per package kind
pub fn pkg_keys(pkg_map: &PkgMap) -> Result<PkgKeys> {
    let mut result = PkgKeys::new();
    for pkg_type in PkgType::ALL {
        let keys = result.entry(pkg_type).or_default();
        for entry in pkg_map.get(pkg_type) {
            let nvra = parse_nvra(&entry.path.to_string_lossy())?;
            keys.insert((nvra.name, nvra.arch));
        }
    }
    Ok(result)
}

/// What [`trim_packages`] did to one package map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimResult {
    /// Names left in the variant, now claimed by it
    pub kept: PkgNames,
    /// Entries pulled in only through fulltree; they belong to the parent
    pub moved_to_parent: PkgMap,
    pub removed: PkgMap,
}

/// Remove from `pkg_map` what the parent already ships or what another
/// variant claimed
///
/// Names in `remove_pkgs` are dropped, except sources and debuginfo of a
/// layered product, which are kept so they stay available with it.
/// Entries whose (name, arch) the parent has are dropped too. Of the
/// rest, `fulltree-exclude` entries without the `input` flag go to
/// [`TrimResult::moved_to_parent`]; everything else stays and is claimed.
pub fn trim_packages(
    arch: &str,
    variant: &Variant,
    pkg_map: &mut PkgMap,
    parent_pkgs: &PkgKeys,
    remove_pkgs: &PkgNames,
) -> Result<TrimResult> {
    let msg = format!("Trimming package list (arch: {}, variant: {})", arch, variant.uid);
    info!("[BEGIN] {}", msg);

    let mut result = TrimResult::default();
    for pkg_type in PkgType::ALL {
        let kept = result.kept.entry(pkg_type).or_default();
        let remove = remove_pkgs.get(&pkg_type);
        let parent = parent_pkgs.get(&pkg_type);

        let entries = std::mem::take(pkg_map.get_mut(pkg_type));
        let mut new_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            let nvra = parse_nvra(&entry.path.to_string_lossy())?;
            if remove.is_some_and(|names| names.contains(&nvra.name)) {
                if variant.variant_type == VariantType::LayeredProduct && pkg_type != PkgType::Rpm {
                    new_entries.push(entry);
                    continue;
                }
                warn!(
                    "Removed addon package (arch: {}, variant: {}): {}: {}",
                    arch,
                    variant.uid,
                    pkg_type,
                    entry.path.display()
                );
                result.removed.get_mut(pkg_type).push(entry);
            } else if parent.is_some_and(|keys| keys.contains(&(nvra.name.clone(), nvra.arch.clone()))) {
                result.removed.get_mut(pkg_type).push(entry);
            } else if entry.has_flag("fulltree-exclude") && !entry.has_flag("input") {
                result.moved_to_parent.get_mut(pkg_type).push(entry);
            } else {
                kept.insert(nvra.name);
                new_entries.push(entry);
            }
        }
        *pkg_map.get_mut(pkg_type) = new_entries;

        info!(
            "Removed packages (arch: {}, variant: {}): {}: {}",
            arch,
            variant.uid,
            pkg_type,
            result.removed.get(pkg_type).len()
        );
        info!(
            "Moved to parent (arch: {}, variant: {}): {}: {}",
            arch,
            variant.uid,
            pkg_type,
            result.moved_to_parent.get(pkg_type).len()
        );
    }

    info!("[DONE ] {}", msg);
    Ok(result)
}

/// Write the package lists of one (arch, variant), one file per kind,
/// with `path_prefix` stripped
pub fn write_packages(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkg_map: &PkgMap,
    path_prefix: &str,
) -> Result<()> {
    let msg = format!("Writing package list (arch: {}, variant: {})", arch, variant.uid);
    info!("[BEGIN] {}", msg);

    for pkg_type in PkgType::ALL {
        let path = compose
            .paths
            .work
            .package_list(Some(arch), Some(variant), Some(pkg_type.as_ref()));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
        }
        let mut file = fs::File::create(&path).map_err(|e| Error::io_path(&path, e))?;
        for entry in pkg_map.get(pkg_type) {
            let full = entry.path.to_string_lossy();
            let relative = full.strip_prefix(path_prefix).unwrap_or(&full);
            writeln!(file, "{}", relative).map_err(|e| Error::io_path(&path, e))?;
        }
    }

    info!("[DONE ] {}", msg);
    Ok(())
}

/// Resolves one (arch, variant) given the source names to leave out of
/// fulltree
pub type ResolveFn<'a> = dyn Fn(&str, &Variant, &BTreeSet<String>) -> Result<PkgMap> + Sync + 'a;

pub struct GatherContext<'a> {
    pub compose: &'a Compose,
    pub path_prefix: &'a str,
    pub resolve: &'a ResolveFn<'a>,
}

/// Results accumulated across the passes
#[derive(Debug, Default)]
pub struct GatherState {
    pub results: GatherResults,
    /// Names kept by addons and layered products
    pub claimed: PkgNames,
}

impl GatherState {
    fn pkg_map(&self, arch: &str, uid: &str) -> Option<&PkgMap> {
        self.results.get(arch).and_then(|m| m.get(uid))
    }

    fn parent_pkgs(&self, arch: &str, parent: &Variant) -> Result<PkgKeys> {
        match self.pkg_map(arch, &parent.uid) {
            Some(pkg_map) => pkg_keys(pkg_map),
            None => Ok(PkgKeys::new()),
        }
    }

    fn move_to_parent(&mut self, arch: &str, parent: &Variant, moved: PkgMap) {
        let parent_map = self
            .results
            .entry(arch.to_string())
            .or_default()
            .entry(parent.uid.clone())
            .or_default();
        for pkg_type in PkgType::ALL {
            let target = parent_map.get_mut(pkg_type);
            for entry in moved.get(pkg_type) {
                debug!(
                    "Moving package to parent (arch: {}, variant: {}, pkg_type: {}): {}",
                    arch,
                    parent.uid,
                    pkg_type,
                    entry.path.display()
                );
                if !target.contains(entry) {
                    target.push(entry.clone());
                }
            }
        }
    }
}

fn merge_names(into: &mut PkgNames, from: PkgNames) {
    for (pkg_type, names) in from {
        into.entry(pkg_type).or_default().extend(names);
    }
}

/// One step of the gather pipeline
pub struct GatherPass {
    pub name: &'static str,
    pub run: fn(&GatherContext<'_>, &mut GatherState) -> Result<()>,
}

/// Resolution first (variants, addons, layered products, optional), then
/// trimming in the same order, then the package lists
pub const GATHER_PASSES: &[GatherPass] = &[
    GatherPass { name: "resolve variants", run: resolve_variants },
    GatherPass { name: "resolve addons", run: resolve_addons },
    GatherPass { name: "resolve layered products", run: resolve_layered_products },
    GatherPass { name: "resolve optional", run: resolve_optional },
    GatherPass { name: "trim addons", run: trim_addons },
    GatherPass { name: "trim layered products", run: trim_layered_products },
    GatherPass { name: "trim optional", run: trim_optional },
    GatherPass { name: "write package lists", run: write_package_lists },
];

/// Resolve every variant of `variant_type` on every arch concurrently
fn resolve_type(ctx: &GatherContext<'_>, state: &mut GatherState, variant_type: VariantType) -> Result<()> {
    let compose = ctx.compose;
    let mut jobs = Vec::new();
    for arch in compose.get_arches() {
        for variant in compose.get_variants(&[variant_type], Some(&arch), false) {
            let mut fulltree_excludes = BTreeSet::new();
            if matches!(variant_type, VariantType::Addon | VariantType::LayeredProduct) {
                let parent = state.parent_pkgs(&arch, parent_of(compose, variant)?)?;
                if let Some(srpms) = parent.get(&PkgType::Srpm) {
                    fulltree_excludes.extend(srpms.iter().map(|(name, _)| name.clone()));
                }
            }
            jobs.push((arch.clone(), variant, fulltree_excludes));
        }
    }

    let resolved = jobs
        .into_par_iter()
        .map(|(arch, variant, fulltree_excludes)| {
            let pkg_map = (ctx.resolve)(&arch, variant, &fulltree_excludes)?;
            Ok((arch, variant.uid.clone(), pkg_map))
        })
        .collect::<Result<Vec<_>>>()?;
    for (arch, uid, pkg_map) in resolved {
        state.results.entry(arch).or_default().insert(uid, pkg_map);
    }
    Ok(())
}

fn resolve_variants(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    resolve_type(ctx, state, VariantType::Variant)
}

fn resolve_addons(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    resolve_type(ctx, state, VariantType::Addon)
}

fn resolve_layered_products(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    resolve_type(ctx, state, VariantType::LayeredProduct)
}

fn resolve_optional(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    resolve_type(ctx, state, VariantType::Optional)
}

/// Trim every child of `variant_type` against its parent; returns the
/// names the children kept
fn trim_children(
    ctx: &GatherContext<'_>,
    state: &mut GatherState,
    variant_type: VariantType,
    remove_pkgs: &PkgNames,
    move_to_parent: bool,
) -> Result<PkgNames> {
    let compose = ctx.compose;
    let mut claimed = PkgNames::new();
    for arch in compose.get_arches() {
        for variant in compose.get_variants(&[variant_type], Some(&arch), false) {
            let parent = parent_of(compose, variant)?;
            let parent_pkgs = state.parent_pkgs(&arch, parent)?;
            let Some(pkg_map) = state
                .results
                .get_mut(&arch)
                .and_then(|m| m.get_mut(&variant.uid))
            else {
                continue;
            };
            let trimmed = trim_packages(&arch, variant, pkg_map, &parent_pkgs, remove_pkgs)?;
            merge_names(&mut claimed, trimmed.kept);
            if move_to_parent {
                state.move_to_parent(&arch, parent, trimmed.moved_to_parent);
            }
        }
    }
    Ok(claimed)
}

fn trim_addons(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    let claimed = trim_children(ctx, state, VariantType::Addon, &PkgNames::new(), true)?;
    merge_names(&mut state.claimed, claimed);
    Ok(())
}

fn trim_layered_products(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    let addon_claimed = state.claimed.clone();
    let claimed = trim_children(ctx, state, VariantType::LayeredProduct, &addon_claimed, true)?;
    merge_names(&mut state.claimed, claimed);
    Ok(())
}

fn trim_optional(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    let claimed = state.claimed.clone();
    trim_children(ctx, state, VariantType::Optional, &claimed, false)?;
    Ok(())
}

fn write_package_lists(ctx: &GatherContext<'_>, state: &mut GatherState) -> Result<()> {
    let compose = ctx.compose;
    for arch in compose.get_arches() {
        for variant in compose.get_variants(&[], Some(&arch), true) {
            let pkg_map = state.pkg_map(&arch, &variant.uid).cloned().unwrap_or_default();
            write_packages(compose, &arch, variant, &pkg_map, ctx.path_prefix)?;
        }
    }
    Ok(())
}

/// Run `passes` in order
pub fn run_passes(ctx: &GatherContext<'_>, passes: &[GatherPass]) -> Result<GatherResults> {
    let mut state = GatherState::default();
    for pass in passes {
        debug!("Gather pass: {}", pass.name);
        (pass.run)(ctx, &mut state)?;
    }
    Ok(state.results)
}

/// Gather every (arch, variant) of the compose from `pkgset`
pub fn gather_wrapper(compose: &Compose, pkgset: &PkgsetResult) -> Result<GatherResults> {
    let resolve = |arch: &str, variant: &Variant, fulltree_excludes: &BTreeSet<String>| -> Result<PkgMap> {
        gather_packages(compose, arch, variant, pkgset, fulltree_excludes)
    };
    let ctx = GatherContext {
        compose,
        path_prefix: &pkgset.path_prefix,
        resolve: &resolve,
    };
    run_passes(&ctx, GATHER_PASSES)
}

/// A package entry flagged as directly requested
pub(crate) fn input_entry(path: impl Into<std::path::PathBuf>) -> PackageEntry {
    PackageEntry::new(path, &["input"])
}
