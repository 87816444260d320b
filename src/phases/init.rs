// src/phases/init.rs

//! Comps preparation
//!
//! The comps file is fetched once, filtered per tree arch and per
//! (arch, variant) with the external `comps_filter` tool, and every arch
//! gets a small repository carrying only the group metadata. This phase
//! also fetches the prepopulate document. Later phases depend on its
//! output unconditionally, so it can never be skipped.

use super::Phase;
use crate::comps::CompsWrapper;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind, is_false, is_true};
use crate::error::{Error, Result};
use crate::gather::write_prepopulate_file;
use crate::paths::EnsureDir;
use crate::runner::{self, CommandSpec, RunOptions};
use crate::scm::{ScmSource, get_file_from_scm};
use crate::variants::Variant;
use crate::wrappers::createrepo::{CreaterepoOpts, CreaterepoWrapper};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BASE_PRODUCT: &[&str] = &["base_product_name", "base_product_short", "base_product_version"];

pub struct InitPhase;

impl Phase for InitPhase {
    fn name(&self) -> &'static str {
        "init"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        init_options()
    }

    fn skip(&self, _compose: &Compose) -> bool {
        false
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        write_global_comps(compose)?;
        let arches = compose.get_arches();
        for arch in &arches {
            write_arch_comps(compose, arch)?;
        }
        for arch in &arches {
            create_comps_repo(compose, arch)?;
        }
        for variant in compose.get_variants(&[], None, false) {
            for arch in &variant.arches {
                write_variant_comps(compose, arch, variant)?;
            }
        }
        write_prepopulate_file(compose)
    }
}

/// Options every compose needs, checked before any phase runs
fn init_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::required("product_name", &[ValueKind::Str]),
        OptionSpec::required("product_short", &[ValueKind::Str]),
        OptionSpec::required("product_version", &[ValueKind::Str]),
        OptionSpec::optional("product_discinfo_description", &[ValueKind::Str]),
        OptionSpec::optional("product_is_layered", &[ValueKind::Bool])
            .requires(is_true, BASE_PRODUCT)
            .conflicts(is_false, BASE_PRODUCT),
        OptionSpec::optional("base_product_name", &[ValueKind::Str]),
        OptionSpec::optional("base_product_short", &[ValueKind::Str]),
        OptionSpec::optional("base_product_version", &[ValueKind::Str]),
        OptionSpec::optional("comps_file", &[ValueKind::Str, ValueKind::Table]),
        OptionSpec::optional("comps_filter_environments", &[ValueKind::Bool]),
        OptionSpec::required("variants_file", &[ValueKind::Str, ValueKind::Table]),
        OptionSpec::required("sigkeys", &[ValueKind::List]),
        OptionSpec::optional("tree_arches", &[ValueKind::List]),
        OptionSpec::optional("tree_variants", &[ValueKind::List]),
        OptionSpec::optional("multilib_arches", &[ValueKind::List]),
        OptionSpec::optional("createrepo_c", &[ValueKind::Bool]),
        OptionSpec::optional("createrepo_checksum", &[ValueKind::Str]).values(&["sha256", "sha"]),
        OptionSpec::optional("runroot", &[ValueKind::Bool])
            .requires(is_true, &["runroot_tag", "runroot_channel"])
            .conflicts(is_false, &["runroot_tag", "runroot_channel"]),
        OptionSpec::optional("runroot_tag", &[ValueKind::Str]),
        OptionSpec::optional("runroot_channel", &[ValueKind::Str]),
    ]
}

/// Fetch `comps_file` into `work/global/comps/comps-global.xml`
pub fn write_global_comps(compose: &Compose) -> Result<()> {
    let Some(source) = ScmSource::from_conf(&compose.conf, "comps_file", "file")? else {
        return Ok(());
    };
    let target = compose.paths.work.comps(None, None).ensure_parent()?;
    let msg = format!("Writing global comps file: {}", target.display());
    if compose.debug && target.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    debug!("{}", msg);

    let tmp = tempfile::Builder::new().prefix("comps_").tempdir()?;
    let fetched = get_file_from_scm(&source, tmp.path(), Some(&compose.log_file(None, "comps")?))?;
    let file = fetched
        .first()
        .ok_or_else(|| Error::NotFound("comps_file fetched no file".to_string()))?;
    std::fs::copy(file, &target).map_err(|e| Error::io_path(&target, e))?;
    Ok(())
}

/// `comps_filter` invocation producing `output` from the global comps file
pub fn comps_filter_cmd(arch: &str, output: &Path, input: &Path, keep_empty: &[String], no_cleanup: bool) -> CommandSpec {
    let mut cmd = vec!["comps_filter".to_string(), format!("--arch={}", arch)];
    if no_cleanup {
        cmd.push("--no-cleanup".into());
    }
    cmd.extend(keep_empty.iter().map(|group| format!("--keep-empty-group={}", group)));
    cmd.push(format!("--output={}", output.display()));
    cmd.push(input.display().to_string());
    CommandSpec::Args(cmd)
}

pub fn write_arch_comps(compose: &Compose, arch: &str) -> Result<()> {
    if !compose.has_comps() {
        return Ok(());
    }
    let target = compose.paths.work.comps(Some(arch), None).ensure_parent()?;
    let msg = format!("Writing comps file for arch '{}': {}", arch, target.display());
    if compose.debug && target.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    debug!("{}", msg);
    let cmd = comps_filter_cmd(arch, &target, &compose.paths.work.comps(None, None), &[], true);
    runner::run(&cmd, &RunOptions::new().log_file(compose.log_file(Some(arch), "comps_filter")?))?;
    Ok(())
}

/// Per-variant comps: filtered by arch, then reduced to the variant's
/// groups and (unless disabled) environments
pub fn write_variant_comps(compose: &Compose, arch: &str, variant: &Variant) -> Result<()> {
    if !compose.has_comps() {
        return Ok(());
    }
    let target = compose.paths.work.comps(Some(arch), Some(variant)).ensure_parent()?;
    let msg = format!(
        "Writing comps file (arch: {}, variant: {}): {}",
        arch,
        variant.uid,
        target.display()
    );
    if compose.debug && target.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    debug!("{}", msg);

    let keep_empty = vec![
        "conflicts".to_string(),
        format!("conflicts-{}", variant.uid.to_lowercase()),
    ];
    let cmd = comps_filter_cmd(arch, &target, &compose.paths.work.comps(None, None), &keep_empty, false);
    runner::run(&cmd, &RunOptions::new().log_file(compose.log_file(Some(arch), "comps_filter")?))?;

    let mut comps = CompsWrapper::load(&target)?;
    comps.filter_groups(&variant.groups)?;
    if compose.conf.get_bool("comps_filter_environments", true) {
        comps.filter_environments(&variant.environments);
    }
    comps.write(&target)
}

/// Repository holding only the arch comps file
pub fn create_comps_repo(compose: &Compose, arch: &str) -> Result<()> {
    if !compose.has_comps() {
        return Ok(());
    }
    let comps_repo = compose.paths.work.comps_repo(Some(arch)).ensure_dir()?;
    let msg = format!("Creating comps repo for arch '{}'", arch);
    if compose.debug && comps_repo.join("repodata").is_dir() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }
    info!("[BEGIN] {}", msg);
    let opts = CreaterepoOpts {
        outputdir: Some(comps_repo.clone()),
        skip_stat: true,
        groupfile: Some(compose.paths.work.comps(Some(arch), None)),
        checksum: compose.conf.get_str("createrepo_checksum").map(str::to_string),
        ..CreaterepoOpts::default()
    };
    let cmd = CreaterepoWrapper::new(compose.conf.get_bool("createrepo_c", false)).createrepo_cmd(&comps_repo, &opts);
    runner::run(
        &cmd,
        &RunOptions::new()
            .log_file(compose.log_file(Some(arch), "comps_repo")?)
            .show_cmd(),
    )?;
    info!("[DONE ] {}", msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;
    use crate::config::ComposeConf;
    use crate::config::checks::validate_options;

    const VARIANTS: &str = r#"<variants><variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant></variants>"#;

    #[test]
    fn test_init_is_never_skipped() {
        let (_dir, mut compose) = compose_with("skip_phases = [\"init\"]\n", VARIANTS);
        compose.skip_phases = vec!["init".to_string()];
        assert!(!InitPhase.skip(&compose));
    }

    #[test]
    fn test_layered_product_requires_base_product() {
        let text = "product_name = \"Fedora\"\nproduct_short = \"F\"\nproduct_version = \"21\"\n\
                    product_is_layered = true\nbase_product_name = \"Fedora\"\n";
        let conf = ComposeConf::parse(text, "/tmp").unwrap();
        let errors = validate_options(&conf, &init_options());
        assert!(errors.iter().any(|e| e.contains("base_product_short")));
        assert!(errors.iter().any(|e| e.contains("base_product_version")));
        assert!(errors.iter().any(|e| e.contains("variants_file")));
    }

    #[test]
    fn test_comps_filter_cmd() {
        let cmd = comps_filter_cmd(
            "x86_64",
            Path::new("/w/comps-Server.x86_64.xml"),
            Path::new("/w/comps-global.xml"),
            &["conflicts".to_string(), "conflicts-server".to_string()],
            false,
        );
        let CommandSpec::Args(args) = cmd else {
            panic!("expected an argument vector");
        };
        assert_eq!(
            args,
            vec![
                "comps_filter",
                "--arch=x86_64",
                "--keep-empty-group=conflicts",
                "--keep-empty-group=conflicts-server",
                "--output=/w/comps-Server.x86_64.xml",
                "/w/comps-global.xml",
            ]
        );
    }

    #[test]
    fn test_without_comps_nothing_is_written() {
        let (_dir, compose) = compose_with("", VARIANTS);
        write_global_comps(&compose).unwrap();
        write_arch_comps(&compose, "x86_64").unwrap();
        create_comps_repo(&compose, "x86_64").unwrap();
        assert!(!compose.paths.work.comps(None, None).exists());
        assert!(!compose.paths.work.comps_repo(Some("x86_64")).exists());
    }

    #[test]
    fn test_global_comps_is_fetched() {
        let (dir, compose) = compose_with("comps_file = \"comps.xml\"\n", VARIANTS);
        std::fs::write(dir.path().join("comps.xml"), "<comps/>").unwrap();
        write_global_comps(&compose).unwrap();
        let fetched = std::fs::read_to_string(compose.paths.work.comps(None, None)).unwrap();
        assert_eq!(fetched, "<comps/>");
    }
}
