// src/phases/buildinstall.rs

//! Installer trees
//!
//! `lorax` (or the legacy `buildinstall`) runs once per arch against the
//! arch repository. When all of them are done, the output is copied into
//! the os tree of every variant with the boot configuration relabelled to
//! the variant's volume id, and `images/boot.iso` becomes the variant's
//! boot image.

use super::{Phase, skipped_by_request};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind, is_true};
use crate::error::{Error, Result};
use crate::linker::{copy_preserving_mtime, copy_tree_replacing, relative_path};
use crate::metadata::checksum::write_checksum_files;
use crate::metadata::manifest::{Image, ImageType};
use crate::paths::EnsureDir;
use crate::pool::WorkerPool;
use crate::runner::{self, CommandSpec, Executor, RunOptions, stagger_delay};
use crate::scm::{ScmSource, get_file_from_scm};
use crate::util::get_volid;
use crate::variants::{Variant, VariantType};
use crate::wrappers::iso;
use crate::wrappers::koji::KojiWrapper;
use crate::wrappers::lorax::{InstallerOpts, buildinstall_cmd, lorax_cmd};
use regex::{Captures, Regex};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Boot loader configurations carrying the volume label
const BOOT_CONFIGS: &[&str] = &[
    "isolinux/isolinux.cfg",
    "etc/yaboot.conf",
    "ppc/ppc64/yaboot.conf",
    "EFI/BOOT/BOOTX64.conf",
    "EFI/BOOT/grub.cfg",
];

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#":(CDLABEL|LABEL)=[^ "\n]*"#).unwrap());
static GRUB_SEARCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(search .* -l) '[^'\n]*'").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BuildinstallMethod {
    Lorax,
    Buildinstall,
}

impl BuildinstallMethod {
    pub fn from_conf(compose: &Compose) -> Result<Self> {
        let name = compose.conf.get_str("buildinstall_method").unwrap_or("lorax");
        name.parse()
            .map_err(|_| Error::InvalidValue(format!("Unsupported buildinstall method: {}", name)))
    }

    /// Buildroot packages needed to run the method in runroot
    pub fn runroot_packages(self) -> Vec<String> {
        // glibc32 is needed by yaboot on ppc64
        let tool = match self {
            BuildinstallMethod::Lorax => "lorax",
            BuildinstallMethod::Buildinstall => "anaconda",
        };
        ["glibc32", "strace", tool].iter().map(|p| p.to_string()).collect()
    }
}

#[derive(Debug)]
pub struct BuildinstallJob {
    pub arch: String,
    pub cmd: CommandSpec,
}

#[derive(Default)]
pub struct BuildinstallPhase {
    pool: Option<WorkerPool<BuildinstallJob>>,
}

impl Phase for BuildinstallPhase {
    fn name(&self) -> &'static str {
        "buildinstall"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("bootable", &[ValueKind::Bool]).requires(is_true, &["buildinstall_method"]),
            OptionSpec::optional("buildinstall_method", &[ValueKind::Str]).values(&["lorax", "buildinstall"]),
            OptionSpec::optional("buildinstall_upgrade_image", &[ValueKind::Bool]),
            OptionSpec::optional("buildinstall_kickstart", &[ValueKind::Str, ValueKind::Table]),
            OptionSpec::optional("symlink_isos_to", &[ValueKind::Str]),
        ]
    }

    fn skip(&self, compose: &Compose) -> bool {
        if skipped_by_request(compose, self.name()) {
            return true;
        }
        if !compose.conf.get_bool("bootable", false) {
            debug!("Not a bootable product. Skipping buildinstall.");
            return true;
        }
        false
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        let method = BuildinstallMethod::from_conf(compose)?;
        let mut pool = WorkerPool::new("buildinstall", compose.get_arches().len());
        for arch in compose.get_arches() {
            let cmd = installer_cmd(compose, &arch, method)?;
            pool.queue_put(BuildinstallJob { arch, cmd });
        }

        let executor = Executor::from_conf(&compose.conf)?;
        let compose = Arc::clone(compose);
        pool.start(move |job: &BuildinstallJob, num| {
            if !executor.is_local() {
                std::thread::sleep(stagger_delay(num));
            }
            run_buildinstall(&compose, &executor, method, job)
        })?;
        self.pool = Some(pool);
        Ok(())
    }

    fn stop(&mut self, compose: &Arc<Compose>) -> Result<()> {
        if let Some(pool) = self.pool.as_mut() {
            pool.stop()?;
        }
        copy_files(compose)
    }
}

/// Installer command for `arch`, writing into the arch buildinstall dir
pub fn installer_cmd(compose: &Compose, arch: &str, method: BuildinstallMethod) -> Result<CommandSpec> {
    let conf = &compose.conf;
    let version = conf.require_str("product_version")?;
    let volid = get_volid(conf, arch, None, false)?;
    let opts = InstallerOpts {
        product: conf.require_str("product_name")?,
        version,
        release: version,
        repo_baseurls: vec![compose.paths.work.arch_repo(Some(arch)).display().to_string()],
        nomacboot: true,
        noupgrade: !conf.get_bool("buildinstall_upgrade_image", false),
        is_final: compose.supported,
        buildarch: Some(arch),
        volid: volid.as_deref(),
        ..InstallerOpts::default()
    };
    let output_dir = compose.paths.work.buildinstall_dir(arch)?;
    Ok(match method {
        BuildinstallMethod::Lorax => lorax_cmd(&opts, &output_dir),
        BuildinstallMethod::Buildinstall => buildinstall_cmd(&opts, &output_dir, None),
    })
}

fn dir_is_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)
        .map_err(|e| Error::io_path(dir, e))?
        .next()
        .is_none())
}

fn run_buildinstall(
    compose: &Compose,
    executor: &Executor,
    method: BuildinstallMethod,
    job: &BuildinstallJob,
) -> Result<()> {
    let arch = job.arch.as_str();
    let msg = format!("Running buildinstall for arch {}", arch);
    let output_dir = compose.paths.work.buildinstall_dir(arch)?;
    if output_dir.is_dir() {
        if !dir_is_empty(&output_dir)? {
            warn!("[SKIP ] {}", msg);
            return Ok(());
        }
        debug!("Removing existing (but empty) buildinstall dir: {}", output_dir.display());
        fs::remove_dir(&output_dir).map_err(|e| Error::io_path(&output_dir, e))?;
    }

    info!("[BEGIN] {}", msg);
    let log_file = compose.log_file(Some(arch), "buildinstall")?;
    let execution = executor.execute(
        &job.cmd,
        arch,
        &method.runroot_packages(),
        &[compose.topdir.clone()],
        &RunOptions::new().log_file(&log_file).show_cmd(),
    )?;

    let koji = KojiWrapper::new(compose.conf.get_str("koji_profile").unwrap_or("koji"));
    let rpms = koji.list_buildroot_rpms(execution.task_id)?;
    let rpms_log = compose.log_file(Some(arch), "buildinstall-RPMs")?;
    fs::write(&rpms_log, rpms.join("\n")).map_err(|e| Error::io_path(&rpms_log, e))?;

    info!("[DONE ] {}", msg);
    Ok(())
}

/// Copy installer output into every variant tree of every arch
pub fn copy_files(compose: &Compose) -> Result<()> {
    let kickstart = get_kickstart_file(compose)?;
    for arch in compose.get_arches() {
        let buildinstall_dir = compose.paths.work.buildinstall_dir(&arch)?;
        if !buildinstall_dir.is_dir() || dir_is_empty(&buildinstall_dir)? {
            continue;
        }
        for variant in compose.get_variants(&[VariantType::Variant], Some(arch.as_str()), false) {
            let os_tree = compose.paths.compose.os_tree(&arch, variant);
            let volid = get_volid(&compose.conf, &arch, Some(variant), false)?.unwrap_or_default();
            tweak_buildinstall(&buildinstall_dir, &os_tree, &volid, kickstart.as_deref())?;
            symlink_boot_iso(compose, &arch, variant)?;
        }
    }
    Ok(())
}

/// Fetch `buildinstall_kickstart` into `work/global/ks.cfg` once
pub fn get_kickstart_file(compose: &Compose) -> Result<Option<PathBuf>> {
    let Some(source) = ScmSource::from_conf(&compose.conf, "buildinstall_kickstart", "file")? else {
        debug!("Path to ks.cfg (buildinstall_kickstart) not specified.");
        return Ok(None);
    };
    let msg = "Getting ks.cfg";
    let kickstart = compose.paths.work.topdir(None).join("ks.cfg");
    if kickstart.exists() {
        warn!("[SKIP ] {}", msg);
        return Ok(Some(kickstart));
    }
    info!("[BEGIN] {}", msg);
    let tmp = tempfile::Builder::new().prefix("buildinstall_kickstart_").tempdir()?;
    let fetched = get_file_from_scm(&source, tmp.path(), None)?;
    let src = fetched
        .first()
        .ok_or_else(|| Error::NotFound("buildinstall_kickstart fetched no file".to_string()))?;
    let kickstart = kickstart.ensure_parent()?;
    copy_preserving_mtime(src, &kickstart)?;
    info!("[DONE ] {}", msg);
    Ok(Some(kickstart))
}

/// Volume id as written into boot configs; yaboot needs another level of
/// escaping
pub fn escape_volid(volid: &str, yaboot: bool) -> String {
    let escaped = volid.replace(' ', "\\x20");
    if yaboot {
        escaped.replace('\\', "\\\\")
    } else {
        escaped
    }
}

/// Point every label reference in a boot config at `volid`
pub fn tweak_config(data: &str, config: &str, volid: &str, kickstart: bool) -> String {
    let new_volid = escape_volid(volid, config.contains("yaboot"));
    let ks = if kickstart {
        format!(" ks=hd:LABEL={}:/ks.cfg", new_volid)
    } else {
        String::new()
    };
    // one pass, so the inserted ks= argument is never rewritten again
    let data = LABEL_RE.replace_all(data, |caps: &Captures| {
        format!(":{}={}{}", &caps[1], new_volid, ks)
    });
    GRUB_SEARCH_RE
        .replace_all(&data, |caps: &Captures| format!("{} '{}'", &caps[1], volid))
        .into_owned()
}

/// Make a tree world readable; directories and executables also searchable
fn make_world_readable(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::io_path(root, e.into()))?;
        if entry.path_is_symlink() {
            continue;
        }
        let path = entry.path();
        let mut perms = fs::metadata(path).map_err(|e| Error::io_path(path, e))?.permissions();
        let mode = perms.mode();
        let search = if entry.file_type().is_dir() || mode & 0o111 != 0 { 0o111 } else { 0 };
        perms.set_mode(mode | 0o444 | search);
        fs::set_permissions(path, perms).map_err(|e| Error::io_path(path, e))?;
    }
    Ok(())
}

/// Sync boot configs inside `images/efiboot.img` with the tweaked copies
fn update_efiboot(tmp_dir: &Path) -> Result<()> {
    let image = tmp_dir.join("images").join("efiboot.img");
    if !image.is_file() {
        return Ok(());
    }
    let mount_dir = tempfile::Builder::new().prefix("tweak_buildinstall_").tempdir()?;
    let mount_point = mount_dir.path().display().to_string();
    let image = image.display().to_string();
    runner::run(
        &CommandSpec::args(["mount", "-o", "loop", image.as_str(), mount_point.as_str()]),
        &RunOptions::new(),
    )?;
    let mut result = Ok(());
    for config in BOOT_CONFIGS {
        let in_image = mount_dir.path().join(config);
        if !in_image.is_file() {
            continue;
        }
        let cmd = CommandSpec::args([
            "cp".to_string(),
            "-v".into(),
            "--remove-destination".into(),
            tmp_dir.join(config).display().to_string(),
            in_image.display().to_string(),
        ]);
        result = runner::run(&cmd, &RunOptions::new()).map(|_| ());
        if result.is_err() {
            break;
        }
    }
    runner::run(&CommandSpec::args(["umount", mount_point.as_str()]), &RunOptions::new())?;
    result
}

/// Copy installer output from `src` into `dst`, relabelled to `volid`
pub fn tweak_buildinstall(src: &Path, dst: &Path, volid: &str, kickstart: Option<&Path>) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::NotFound(format!("Directory does not exist: {}", src.display())));
    }
    let dst = dst.to_path_buf().ensure_dir()?;
    let tmp = tempfile::Builder::new().prefix("tweak_buildinstall_").tempdir()?;
    copy_tree_replacing(src, tmp.path())?;

    for config in BOOT_CONFIGS {
        let path = tmp.path().join(config);
        if !path.exists() {
            continue;
        }
        let data = fs::read_to_string(&path).map_err(|e| Error::io_path(&path, e))?;
        // the copy may share an inode with the original
        fs::remove_file(&path).map_err(|e| Error::io_path(&path, e))?;
        if let Some(kickstart) = kickstart {
            copy_preserving_mtime(kickstart, &dst.join("ks.cfg"))?;
        }
        fs::write(&path, tweak_config(&data, config, volid, kickstart.is_some()))
            .map_err(|e| Error::io_path(&path, e))?;
    }
    update_efiboot(tmp.path())?;

    make_world_readable(tmp.path())?;
    copy_tree_replacing(tmp.path(), &dst)
}

/// Expose `images/boot.iso` of the os tree as the variant boot image
pub fn symlink_boot_iso(compose: &Compose, arch: &str, variant: &Variant) -> Result<()> {
    if arch == "src" {
        return Ok(());
    }
    let boot_iso = compose.paths.compose.os_tree(arch, variant).join("images").join("boot.iso");
    if !boot_iso.is_file() {
        return Ok(());
    }
    let cp = &compose.paths.compose;
    let symlink_to = compose.conf.get_str("symlink_isos_to").map(Path::new);
    let Some(iso_dir) = cp.ensure_iso_dir(arch, variant, symlink_to)? else {
        return Ok(());
    };
    let Some(new_path) = cp.iso_path(arch, variant, "boot", None, ".iso")? else {
        return Ok(());
    };
    let msg = format!("Symlinking boot.iso (arch: {}, variant: {})", arch, variant.uid);
    if fs::symlink_metadata(&new_path).is_ok() {
        warn!("[SKIP ] {}", msg);
        return Ok(());
    }

    info!("[BEGIN] {}", msg);
    // no hardlink, the ISO dir may be on another device
    let target = relative_path(&boot_iso, &iso_dir);
    std::os::unix::fs::symlink(&target, &new_path).map_err(|e| Error::io_path(&new_path, e))?;

    let iso_name = new_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sums = write_checksum_files(&new_path)?;
    runner::run(&iso::manifest_cmd(&iso_name), &RunOptions::new().workdir(&iso_dir))?;

    let mut image = Image::from_file(&new_path, &cp.relative(&new_path), arch, ImageType::Boot)?;
    image.checksums = sums
        .into_iter()
        .map(|(kind, value)| (kind.name().to_string(), value))
        .collect();
    image.bootable = true;
    image.implant_md5 = Some(iso::get_implanted_md5(&new_path)?);
    image.volume_id = iso::get_volume_id(&new_path).ok();
    compose.images()?.add(arch, &variant.uid, image);
    info!("[DONE ] {}", msg);
    Ok(())
}
