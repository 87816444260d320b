// src/phases/extra_files.rs

//! Extra files placed into the os trees
//!
//! ```toml
//! extra_files = [
//!     ["^Server$", { "*" = [{ scm = "git", repo = "https://example.com/docs.git", file = "EULA", target = "/" }] }],
//!     ["^Server$", { x86_64 = [{ scm = "rpm", repo = "%(variant_uid_lower)s-release", file = "GPL" }] }],
//! ]
//! ```
//!
//! An `rpm` source whose `repo` is a package name (optionally `name.arch`,
//! with shell wildcards) is looked up in the package set of the arch.

use super::{Phase, SharedPkgset};
use crate::arch::split_name_arch;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::linker::copy_tree_replacing;
use crate::paths::EnsureDir;
use crate::pkgset::PackageSet;
use crate::scm::{ScmKind, ScmSource, get_dir_from_scm, get_file_from_scm};
use crate::variants::Variant;
use glob::Pattern;
use std::path::PathBuf;
use std::sync::Arc;
use toml::Value;
use tracing::info;

pub struct ExtraFilesPhase {
    pkgset: SharedPkgset,
}

impl ExtraFilesPhase {
    pub fn new(pkgset: SharedPkgset) -> Self {
        Self { pkgset }
    }
}

impl Phase for ExtraFilesPhase {
    fn name(&self) -> &'static str {
        "extra_files"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![OptionSpec::optional("extra_files", &[ValueKind::List])]
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        if !compose.conf.contains("extra_files") {
            return Ok(());
        }
        let pkgset = self.pkgset.get();
        let mut arches = compose.get_arches();
        arches.push("src".to_string());
        for arch in &arches {
            let package_set = pkgset.and_then(|p| {
                if arch == "src" { p.global() } else { p.for_arch(arch) }
            });
            for variant in compose.get_variants(&[], Some(arch.as_str()), false) {
                copy_extra_files(compose, arch, variant, package_set)?;
            }
        }
        Ok(())
    }
}

/// Expand `%(name)s` placeholders
pub fn expand_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut result = template.to_string();
    for (name, value) in vars {
        result = result.replace(&format!("%({})s", name), value);
    }
    result
}

fn template_vars(arch: &str, variant: &Variant) -> Vec<(&'static str, String)> {
    vec![
        ("arch", arch.to_string()),
        ("variant_id", variant.id.clone()),
        ("variant_id_lower", variant.id.to_lowercase()),
        ("variant_uid", variant.uid.clone()),
        ("variant_uid_lower", variant.uid.to_lowercase()),
    ]
}

fn is_package_name(repo: &str) -> bool {
    !repo.starts_with('/') && !repo.contains("://")
}

/// Binary packages of `package_set` matching `name[.arch]`, sorted by path
pub fn find_packages(package_set: &PackageSet, name_arch: &str) -> Result<Vec<PathBuf>> {
    let (name, arch) = split_name_arch(name_arch);
    let pattern = Pattern::new(&name)
        .map_err(|e| Error::InvalidValue(format!("Invalid package pattern '{}': {}", name, e)))?;
    let mut found: Vec<PathBuf> = package_set
        .iter()
        .filter(|rpm| !rpm.is_source() && !rpm.is_debug())
        .filter(|rpm| pattern.matches(&rpm.name))
        .filter(|rpm| arch.as_ref().is_none_or(|a| *a == rpm.arch))
        .map(|rpm| rpm.file_path.clone())
        .collect();
    found.sort();
    Ok(found)
}

/// Source described by one `extra_files` entry, package names resolved
fn entry_source(
    compose: &Compose,
    entry: &Value,
    vars: &[(&str, String)],
    package_set: Option<&PackageSet>,
) -> Result<(ScmSource, bool)> {
    let is_file = entry.get("file").is_some();
    let mut source = ScmSource::from_value(&compose.conf, entry, if is_file { "file" } else { "dir" })?;
    if source.kind == ScmKind::Rpm && source.repo.iter().all(|r| is_package_name(r)) {
        let mut rpms = Vec::new();
        for repo in &source.repo {
            let name_arch = expand_template(repo, vars);
            if let Some(package_set) = package_set {
                rpms.extend(find_packages(package_set, &name_arch)?);
            }
        }
        source.repo = rpms.iter().map(|p| p.display().to_string()).collect();
    }
    Ok((source, is_file))
}

/// Fetch every configured source for (arch, variant) into the work dir and
/// copy the result over the os tree
pub fn copy_extra_files(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    package_set: Option<&PackageSet>,
) -> Result<()> {
    let entries = compose.conf.get_arch_variant_data("extra_files", arch, Some(&variant.uid))?;
    if entries.is_empty() {
        return Ok(());
    }
    let msg = format!("Getting extra files (arch: {}, variant: {})", arch, variant.uid);
    info!("[BEGIN] {}", msg);

    let vars = template_vars(arch, variant);
    let extra_files_dir = compose.paths.work.extra_files_dir(arch, variant)?.ensure_dir()?;
    let log_file = compose.log_file(Some(arch), &format!("extra-files-{}", variant.uid))?;
    for entry in &entries {
        let (source, is_file) = entry_source(compose, entry, &vars, package_set)?;
        let target = entry.get("target").and_then(Value::as_str).unwrap_or_default();
        let target_dir = extra_files_dir.join(target.trim_start_matches('/'));
        if is_file {
            get_file_from_scm(&source, &target_dir, Some(&log_file))?;
        } else {
            get_dir_from_scm(&source, &target_dir, Some(&log_file))?;
        }
    }

    let has_files = std::fs::read_dir(&extra_files_dir)
        .map_err(|e| Error::io_path(&extra_files_dir, e))?
        .next()
        .is_some();
    if has_files {
        copy_tree_replacing(&extra_files_dir, &compose.paths.compose.os_tree(arch, variant))?;
    }
    info!("[DONE ] {}", msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;
    use crate::pkgset::package_set::tests::record;
    use std::fs;

    const VARIANTS: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant>
  <variant id="Client" name="Client" type="variant"><arches><arch>x86_64</arch></arches></variant>
</variants>"#;

    #[test]
    fn test_expand_template() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let vars = template_vars("x86_64", compose.variant("Server").unwrap());
        assert_eq!(
            expand_template("%(variant_uid_lower)s-release.%(arch)s", &vars),
            "server-release.x86_64"
        );
    }

    #[test]
    fn test_find_packages() {
        let mut set = PackageSet::new(vec![None], None);
        for file in [
            "server-release-21-1.x86_64.rpm",
            "server-release-21-1.i686.rpm",
            "server-release-notes-21-1.noarch.rpm",
            "server-release-21-1.src.rpm",
        ] {
            set.insert(record(file, None));
        }
        let names = |found: Vec<PathBuf>| -> Vec<String> {
            found
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(
            names(find_packages(&set, "server-release.x86_64").unwrap()),
            vec!["server-release-21-1.x86_64.rpm"]
        );
        assert_eq!(names(find_packages(&set, "server-release").unwrap()).len(), 2);
        assert_eq!(names(find_packages(&set, "server-release*").unwrap()).len(), 3);
    }

    #[test]
    fn test_files_land_in_matching_variant_only() {
        let (dir, compose) = compose_with(
            r#"extra_files = [["^Server$", { "*" = [{ scm = "file", file = "EULA", target = "/docs" }, { scm = "file", file = "GPL" }] }]]
"#,
            VARIANTS,
        );
        fs::write(dir.path().join("EULA"), "eula").unwrap();
        fs::write(dir.path().join("GPL"), "gpl").unwrap();
        let server = compose.variant("Server").unwrap();
        let client = compose.variant("Client").unwrap();

        copy_extra_files(&compose, "x86_64", server, None).unwrap();
        copy_extra_files(&compose, "x86_64", client, None).unwrap();

        let os_tree = compose.paths.compose.os_tree("x86_64", server);
        assert_eq!(fs::read_to_string(os_tree.join("docs/EULA")).unwrap(), "eula");
        assert_eq!(fs::read_to_string(os_tree.join("GPL")).unwrap(), "gpl");
        assert!(!compose.paths.compose.os_tree("x86_64", client).exists());
    }
}
