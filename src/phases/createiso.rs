// src/phases/createiso.rs

//! DVD images of the os trees
//!
//! Every (variant, arch) tree holding packages is split into discs. Each
//! disc gets its own `.treeinfo`/`.discinfo` (and, when split, its own
//! repodata) staged in the work area; the staged files win over the tree
//! in the graft points, so the tree itself is never modified.

use super::Phase;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::linker::copy_tree_replacing;
use crate::media_split::{Disc, MediaSplitter};
use crate::metadata::add_checksum;
use crate::metadata::checksum::write_checksum_files;
use crate::metadata::discinfo::{read_discinfo, write_discinfo};
use crate::metadata::manifest::{Image, ImageType};
use crate::metadata::treeinfo::IniDocument;
use crate::paths::EnsureDir;
use crate::phases::buildinstall::BuildinstallMethod;
use crate::pool::WorkerPool;
use crate::runner::{CommandSpec, Executor, RunOptions, shell_quote, stagger_delay};
use crate::util::get_volid;
use crate::variants::{Variant, VariantType};
use crate::wrappers::createrepo::{CreaterepoOpts, CreaterepoWrapper};
use crate::wrappers::iso::{self, GraftPoints, MkisofsOpts};
use crate::wrappers::jigdo;
use crate::wrappers::koji::KojiWrapper;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Single layer DVD
const MEDIA_SIZE: u64 = 4_700_000_000;
const MEDIA_RESERVE: u64 = 10 * 1024 * 1024;

const RUNROOT_PACKAGES: &[&str] = &["coreutils", "genisoimage", "isomd5sum", "jigdo", "strace", "lsof"];

/// One image to master
#[derive(Debug, Clone)]
pub struct IsoJob {
    pub arch: String,
    pub variant_uid: String,
    pub iso_path: PathBuf,
    pub relative_iso_path: PathBuf,
    pub bootable: bool,
    pub disc_num: u32,
    pub disc_count: u32,
    /// Real location of a symlinked ISO dir, mounted into runroot tasks
    pub mount: Option<PathBuf>,
    pub cmd: CommandSpec,
}

#[derive(Default)]
pub struct CreateisoPhase {
    pool: Option<WorkerPool<IsoJob>>,
}

impl Phase for CreateisoPhase {
    fn name(&self) -> &'static str {
        "createiso"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("create_optional_isos", &[ValueKind::Bool]),
            OptionSpec::optional("create_jigdo", &[ValueKind::Bool]),
            OptionSpec::optional("symlink_isos_to", &[ValueKind::Str]),
        ]
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        let jobs = iso_jobs(compose)?;
        let mut pool = WorkerPool::new("createiso", jobs.len());
        for job in jobs {
            pool.queue_put(job);
        }
        let executor = Executor::from_conf(&compose.conf)?;
        let compose = Arc::clone(compose);
        pool.start(move |job: &IsoJob, num| {
            if !executor.is_local() {
                std::thread::sleep(stagger_delay(num));
            }
            create_iso(&compose, &executor, job)
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

fn tree_has_rpms(os_tree: &Path) -> bool {
    WalkDir::new(os_tree)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file() && e.file_name().to_string_lossy().ends_with(".rpm"))
}

/// `<path>-<suffix>` next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!("-{}", suffix));
    path.with_file_name(name)
}

/// Every image to build, with its work area staged
pub fn iso_jobs(compose: &Compose) -> Result<Vec<IsoJob>> {
    let cp = &compose.paths.compose;
    let symlink_to = compose.conf.get_str("symlink_isos_to").map(Path::new);
    let types = [VariantType::Variant, VariantType::LayeredProduct, VariantType::Optional];
    let mut jobs = Vec::new();

    for variant in compose.get_variants(&types, None, true) {
        let mut arches = variant.arches.clone();
        arches.push("src".to_string());
        for arch in &arches {
            let Some(iso_dir) = cp.ensure_iso_dir(arch, variant, symlink_to)? else {
                continue;
            };
            let os_tree = cp.os_tree(arch, variant);
            if !tree_has_rpms(&os_tree) {
                warn!("No RPMs found for {}.{}, skipping ISO", variant.uid, arch);
                continue;
            }

            let discs = split_iso(compose, arch, variant)?;
            let disc_count = discs.len() as u32;
            for (idx, disc) in discs.iter().enumerate() {
                let disc_num = idx as u32 + 1;
                let iso_path = cp
                    .iso_path(arch, variant, "dvd", Some(disc_num), ".iso")?
                    .ok_or_else(|| Error::NotFound(format!("ISO path for {}.{}", variant.uid, arch)))?;
                if iso_path.is_file() {
                    warn!("Skipping mkisofs, image already exists: {}", iso_path.display());
                    continue;
                }
                let graft_points = prepare_iso(compose, arch, variant, disc_num, disc_count, disc)?;
                let bootable = compose.conf.get_bool("bootable", false)
                    && arch != "src"
                    && variant.is_type(VariantType::Variant);
                let cmd = iso_cmd(compose, arch, variant, &iso_dir, &iso_path, &graft_points, bootable)?;
                let mount = fs::read_link(&iso_dir).ok().map(|target| {
                    iso_dir.parent().map(|p| p.join(&target)).unwrap_or(target)
                });
                jobs.push(IsoJob {
                    arch: arch.clone(),
                    variant_uid: variant.uid.clone(),
                    relative_iso_path: cp.relative(&iso_path),
                    iso_path,
                    bootable,
                    disc_num,
                    disc_count,
                    mount,
                    cmd,
                });
            }
        }
    }
    Ok(jobs)
}

/// Shell chain run from the ISO directory: master, hybridize, implant the
/// MD5, list the content and write the jigdo files
pub fn iso_cmd(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    iso_dir: &Path,
    iso_path: &Path,
    graft_points: &Path,
    bootable: bool,
) -> Result<CommandSpec> {
    let iso_name = iso_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let boot_args = if bootable {
        let createfrom = match BuildinstallMethod::from_conf(compose)? {
            BuildinstallMethod::Lorax => "/usr/share/lorax/config_files/ppc",
            BuildinstallMethod::Buildinstall => "/usr/lib/anaconda-runtime/boot",
        };
        iso::get_boot_options(arch, Path::new(createfrom))?
    } else {
        Vec::new()
    };
    let opts = MkisofsOpts {
        volid: get_volid(&compose.conf, arch, Some(variant), false)?,
        exclude: vec!["./lost+found".to_string()],
        boot_args,
        graft_points: Some(graft_points.to_path_buf()),
        ..MkisofsOpts::default()
    };

    let mut chain = vec![format!("cd {}", shell_quote(&iso_dir.display().to_string()))];
    chain.push(iso::mkisofs_cmd(Path::new(&iso_name), &[], &opts)?.to_shell());
    if bootable && arch == "x86_64" {
        chain.push(format!("isohybrid --uefi {}", shell_quote(&iso_name)));
    } else if bootable && arch == "i386" {
        chain.push(format!("isohybrid {}", shell_quote(&iso_name)));
    }
    chain.push(iso::implantisomd5_cmd(Path::new(&iso_name), compose.supported).to_shell());
    chain.push(iso::manifest_cmd(&iso_name).to_shell());
    if compose.conf.get_bool("create_jigdo", true) {
        if let Some(jigdo_dir) = compose.paths.compose.jigdo_dir(arch, variant) {
            let jigdo_dir = jigdo_dir.ensure_dir()?;
            let os_tree = compose.paths.compose.os_tree(arch, variant);
            chain.push(jigdo::make_template_cmd(iso_path, &os_tree, &jigdo_dir).to_shell());
        }
    }
    Ok(CommandSpec::shell(chain.join(" && ")))
}

/// Build arch of a runroot task; non-bootable images go to x86_64 when the
/// tag has it, source images otherwise to the first tag arch
pub fn runroot_build_arch(arch: &str, bootable: bool, tag_arches: &[String]) -> String {
    if bootable {
        return arch.to_string();
    }
    if tag_arches.iter().any(|a| a == "x86_64") {
        return "x86_64".to_string();
    }
    match (arch, tag_arches.first()) {
        ("src", Some(first)) => first.clone(),
        _ => arch.to_string(),
    }
}

fn tag_arches(compose: &Compose) -> Result<Vec<String>> {
    let koji = KojiWrapper::new(compose.conf.get_str("koji_profile").unwrap_or("koji"));
    let tag = koji.get_tag(compose.conf.require_str("runroot_tag")?)?;
    Ok(tag
        .get("arches")
        .and_then(|a| a.as_str())
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

fn create_iso(compose: &Compose, executor: &Executor, job: &IsoJob) -> Result<()> {
    let iso_name = job
        .iso_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let msg = format!(
        "Creating ISO (arch: {}, variant: {}): {}",
        job.arch, job.variant_uid, iso_name
    );
    info!("[BEGIN] {}", msg);

    let mut packages: Vec<String> = RUNROOT_PACKAGES.iter().map(|p| p.to_string()).collect();
    let mut build_arch = job.arch.clone();
    if !executor.is_local() {
        if job.bootable {
            let tool = match BuildinstallMethod::from_conf(compose)? {
                BuildinstallMethod::Lorax => "lorax",
                BuildinstallMethod::Buildinstall => "anaconda",
            };
            packages.push(tool.to_string());
        }
        build_arch = runroot_build_arch(&job.arch, job.bootable, &tag_arches(compose)?);
    }
    let mut mounts = vec![compose.topdir.clone()];
    mounts.extend(job.mount.clone());

    let log_file = compose.log_file(Some(&job.arch), &format!("createiso-{}", iso_name))?;
    let result = executor.execute(
        &job.cmd,
        &build_arch,
        &packages,
        &mounts,
        &RunOptions::new().log_file(&log_file).show_cmd(),
    );
    if let Err(e) = result {
        error!("CreateISO failed, removing ISO: {}", job.iso_path.display());
        let _ = fs::remove_file(&job.iso_path);
        return Err(e);
    }

    let sums = write_checksum_files(&job.iso_path)?;
    let mut image = Image::from_file(&job.iso_path, &job.relative_iso_path, &job.arch, ImageType::Dvd)?;
    image.disc_number = job.disc_num;
    image.disc_count = job.disc_count;
    image.checksums = sums
        .into_iter()
        .map(|(kind, value)| (kind.name().to_string(), value))
        .collect();
    image.bootable = job.bootable;
    image.implant_md5 = Some(iso::get_implanted_md5(&job.iso_path)?);
    image.volume_id = iso::get_volume_id(&job.iso_path).ok();
    compose.images()?.add(&job.arch, &job.variant_uid, image);

    info!("[DONE ] {}", msg);
    Ok(())
}

/// Split the os tree into discs
///
/// Extra files are put on every disc and lead it. Repository metadata is
/// left out since each disc gets its own, and so is the boot image.
/// Packages come last so boot and metadata files land on the first disc.
pub fn split_iso(compose: &Compose, arch: &str, variant: &Variant) -> Result<Vec<Disc>> {
    let mut ms = MediaSplitter::new(MEDIA_SIZE - MEDIA_RESERVE);
    let os_tree = compose.paths.compose.os_tree(arch, variant);
    let packages_dir = compose.paths.compose.packages(arch, variant);
    let repodata = compose.paths.compose.repository(arch, variant).join("repodata");

    let mut extra_files = BTreeSet::new();
    let extra_files_dir = compose.paths.work.extra_files_dir(arch, variant)?;
    if extra_files_dir.is_dir() {
        for entry in WalkDir::new(&extra_files_dir) {
            let entry = entry.map_err(|e| Error::io_path(&extra_files_dir, e.into()))?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&extra_files_dir) {
                    extra_files.insert(rel.to_path_buf());
                }
            }
        }
    }

    let mut ignore = BTreeSet::new();
    let treeinfo = os_tree.join(".treeinfo");
    if treeinfo.is_file() {
        let doc = IniDocument::load(&treeinfo)?;
        if let Some(boot_iso) = doc.get(&format!("images-{}", arch), "boot.iso") {
            ignore.insert(PathBuf::from(boot_iso));
        }
    }
    debug!("split_iso ignoring {:?}", ignore);

    let mut packages = Vec::new();
    let mut other_files = Vec::new();
    let walker = WalkDir::new(&os_tree)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != repodata);
    for entry in walker {
        let entry = entry.map_err(|e| Error::io_path(&os_tree, e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(&os_tree) else {
            continue;
        };
        if ignore.contains(rel) {
            info!("split_iso: Skipping {}", rel.display());
            continue;
        }
        let size = fs::symlink_metadata(path).map_err(|e| Error::io_path(path, e))?.len();
        let item = (path.display().to_string(), size, extra_files.contains(rel));
        if path.parent() == Some(packages_dir.as_path()) {
            packages.push(item);
        } else {
            other_files.push(item);
        }
    }

    for (path, size, sticky) in other_files.into_iter().chain(packages) {
        ms.add_file(&path, size, sticky)?;
    }
    Ok(ms.split())
}

/// Stage disc metadata in the work area and write the graft points
pub fn prepare_iso(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    disc_num: u32,
    disc_count: u32,
    disc: &Disc,
) -> Result<PathBuf> {
    let tree_dir = compose.paths.compose.os_tree(arch, variant);
    let iso_dir = compose.paths.work.iso_dir(arch, variant, "dvd", Some(disc_num))?.ensure_dir()?;

    let treeinfo = tree_dir.join(".treeinfo");
    let mut doc = if treeinfo.is_file() {
        IniDocument::load(&treeinfo)?
    } else {
        IniDocument::new()
    };
    doc.set("media", "discnum", disc_num.to_string());
    doc.set("media", "totaldiscs", disc_count.max(1).to_string());

    // the boot image is not part of the DVD
    let image_sections: Vec<String> = doc
        .section_names()
        .filter(|name| name.starts_with("images-"))
        .map(str::to_string)
        .collect();
    for section in image_sections {
        if let Some(path) = doc.remove(&section, "boot.iso") {
            doc.remove("checksums", &path);
        }
    }

    // mkisofs modifies boot images in place
    for file in ["isolinux/isolinux.bin", "images/boot.img"] {
        let src = tree_dir.join(file);
        if src.exists() {
            let dst = iso_dir.join(file).ensure_parent()?;
            crate::linker::copy_preserving_mtime(&src, &dst)?;
        }
    }

    if disc_count > 1 {
        doc.remove("checksums", "repodata/repomd.xml");
        let packages_dir = compose.paths.compose.packages(arch, variant);
        let file_list: Vec<String> = disc
            .files
            .iter()
            .map(Path::new)
            .filter(|p| p.extension().is_some_and(|e| e == "rpm") && p.starts_with(&packages_dir))
            .filter_map(|p| p.strip_prefix(&tree_dir).ok())
            .map(|p| p.display().to_string())
            .collect();

        if !file_list.is_empty() {
            copy_tree_replacing(&tree_dir.join("repodata"), &iso_dir.join("repodata"))?;
            let list_path = sibling(&iso_dir, "file-list");
            fs::write(&list_path, file_list.join("\n")).map_err(|e| Error::io_path(&list_path, e))?;
            let opts = CreaterepoOpts {
                skip_stat: true,
                pkglist: Some(list_path),
                outputdir: Some(iso_dir.clone()),
                workers: Some(3),
                checksum: compose.conf.get_str("createrepo_checksum").map(str::to_string),
                ..CreaterepoOpts::default()
            };
            let cmd = CreaterepoWrapper::new(compose.conf.get_bool("createrepo_c", false)).createrepo_cmd(&tree_dir, &opts);
            crate::runner::run(
                &cmd,
                &RunOptions::new()
                    .log_file(compose.log_file(Some(arch), &format!("createiso-repo-{}-disc{}", variant.uid, disc_num))?),
            )?;
            add_checksum(&mut doc, &iso_dir, "repodata/repomd.xml")?;
        }
    }
    doc.write(&iso_dir.join(".treeinfo"))?;

    let discinfo = read_discinfo(&tree_dir.join(".discinfo"))?;
    write_discinfo(
        &iso_dir.join(".discinfo"),
        &discinfo.description,
        &discinfo.arch,
        Some(&[disc_num]),
        Some(&discinfo.timestamp),
    )?;

    let points = if disc_count <= 1 {
        iso::get_graft_points(&[tree_dir.clone(), iso_dir.clone()], &[])?
    } else {
        let mut from_list = GraftPoints::new();
        for file in &disc.files {
            let path = PathBuf::from(file);
            if let Ok(rel) = path.strip_prefix(&tree_dir) {
                from_list.insert(rel.display().to_string(), path.clone());
            }
        }
        iso::merge_trees(&from_list, &iso::scan_tree(&iso_dir)?, false)
    };
    let graft_points = sibling(&iso_dir, "graft-points");
    iso::write_graft_points(
        &graft_points,
        &points,
        &["*/lost+found".to_string(), "*/boot.iso".to_string()],
    )?;
    Ok(graft_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    const VARIANTS: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch></arches>
    <variants>
      <variant id="HA" name="High Availability" type="addon"><arches><arch>x86_64</arch></arches></variant>
    </variants>
  </variant>
</variants>"#;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// os tree with two packages, repodata, boot images and an extra file
    fn populate_tree(compose: &Compose) -> PathBuf {
        let server = compose.variant("Server").unwrap();
        let os_tree = compose.paths.compose.os_tree("x86_64", server);
        write(&os_tree.join("Packages/bash-4.2-1.x86_64.rpm"), "bash");
        write(&os_tree.join("Packages/zsh-5.0-1.x86_64.rpm"), "zsh");
        write(&os_tree.join("repodata/repomd.xml"), "<repomd/>");
        write(&os_tree.join("images/boot.iso"), "boot");
        write(&os_tree.join("isolinux/isolinux.bin"), "isolinux");
        write(&os_tree.join("EULA"), "eula");
        write(
            &os_tree.join(".treeinfo"),
            "[header]\nversion = 1.0\n\n[images-x86_64]\nboot.iso = images/boot.iso\n\n[checksums]\nimages/boot.iso = sha256:00\nrepodata/repomd.xml = sha256:11\n",
        );
        write(&os_tree.join(".discinfo"), "1420070400.000000\nFedora 21\nx86_64\nALL\n");
        let extra = compose.paths.work.extra_files_dir("x86_64", server).unwrap();
        write(&extra.join("EULA"), "eula");
        os_tree
    }

    #[test]
    fn test_split_iso_order_and_exclusions() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let os_tree = populate_tree(&compose);
        let discs = split_iso(&compose, "x86_64", compose.variant("Server").unwrap()).unwrap();
        assert_eq!(discs.len(), 1);
        let rel: Vec<String> = discs[0]
            .files
            .iter()
            .map(|f| Path::new(f).strip_prefix(&os_tree).unwrap().display().to_string())
            .collect();
        assert_eq!(
            rel,
            vec![
                "EULA",
                ".discinfo",
                ".treeinfo",
                "isolinux/isolinux.bin",
                "Packages/bash-4.2-1.x86_64.rpm",
                "Packages/zsh-5.0-1.x86_64.rpm",
            ]
        );
    }

    #[test]
    fn test_prepare_single_disc() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let os_tree = populate_tree(&compose);
        let server = compose.variant("Server").unwrap();
        let discs = split_iso(&compose, "x86_64", server).unwrap();
        let graft_points = prepare_iso(&compose, "x86_64", server, 1, 1, &discs[0]).unwrap();

        let iso_dir = compose.paths.work.iso_dir("x86_64", server, "dvd", Some(1)).unwrap();
        let doc = IniDocument::load(&iso_dir.join(".treeinfo")).unwrap();
        assert_eq!(doc.get("media", "discnum"), Some("1"));
        assert_eq!(doc.get("media", "totaldiscs"), Some("1"));
        assert_eq!(doc.get("images-x86_64", "boot.iso"), None);
        assert_eq!(doc.get("checksums", "images/boot.iso"), None);
        assert_eq!(doc.get("checksums", "repodata/repomd.xml"), Some("sha256:11"));

        let discinfo = read_discinfo(&iso_dir.join(".discinfo")).unwrap();
        assert_eq!(discinfo.timestamp, "1420070400.000000");
        assert!(iso_dir.join("isolinux/isolinux.bin").is_file());

        let points = fs::read_to_string(graft_points).unwrap();
        assert!(points.contains(&format!(".treeinfo={}", iso_dir.join(".treeinfo").display())));
        assert!(points.contains(&format!("repodata/repomd.xml={}", os_tree.join("repodata/repomd.xml").display())));
        assert!(!points.contains("boot.iso"));
        // tree itself is untouched
        let original = IniDocument::load(&os_tree.join(".treeinfo")).unwrap();
        assert_eq!(original.get("images-x86_64", "boot.iso"), Some("images/boot.iso"));
    }

    #[test]
    fn test_no_jobs_without_packages() {
        let (_dir, compose) = compose_with("", VARIANTS);
        assert!(iso_jobs(&compose).unwrap().is_empty());
    }

    #[test]
    fn test_bootable_x86_64_cmd() {
        let (_dir, compose) = compose_with("bootable = true\nbuildinstall_method = \"lorax\"\ncreate_jigdo = false\n", VARIANTS);
        let server = compose.variant("Server").unwrap();
        let cmd = iso_cmd(
            &compose,
            "x86_64",
            server,
            Path::new("/c/Server/x86_64/iso"),
            Path::new("/c/Server/x86_64/iso/F-21-Server-x86_64-dvd1.iso"),
            Path::new("/w/graft-points"),
            true,
        )
        .unwrap();
        let CommandSpec::Shell(shell) = cmd else {
            panic!("expected a shell chain");
        };
        let steps: Vec<&str> = shell.split(" && ").collect();
        assert_eq!(steps[0], "cd /c/Server/x86_64/iso");
        assert!(steps[1].starts_with("/usr/bin/genisoimage "));
        assert!(steps[1].contains("-b isolinux/isolinux.bin"));
        assert!(steps[1].contains("-graft-points -path-list /w/graft-points"));
        assert_eq!(steps[2], "isohybrid --uefi F-21-Server-x86_64-dvd1.iso");
        assert!(steps[3].starts_with("/usr/bin/implantisomd5 "));
        assert!(steps[4].starts_with("isoinfo -R -f -i"));
        assert_eq!(steps.len(), 5);
    }

    #[test]
    fn test_runroot_build_arch() {
        let tag = vec!["ppc64".to_string(), "x86_64".to_string()];
        assert_eq!(runroot_build_arch("ppc64", true, &tag), "ppc64");
        assert_eq!(runroot_build_arch("ppc64", false, &tag), "x86_64");
        let ppc_only = vec!["ppc64".to_string(), "s390x".to_string()];
        assert_eq!(runroot_build_arch("src", false, &ppc_only), "ppc64");
        assert_eq!(runroot_build_arch("s390x", false, &ppc_only), "s390x");
    }
}
